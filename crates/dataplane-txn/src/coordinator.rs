//! Transaction coordinator.
//!
//! Runs a unit of work inside one server-side transaction:
//!
//! 1. Read the current configuration version
//! 2. Open a transaction bound to that version
//! 3. Run the unit of work with the transaction id
//! 4. Commit
//!
//! Recoverable conflicts restart the whole cycle after the policy's delay,
//! up to `max_attempts` cycles. The span from version read through commit is
//! a critical section: one coordinator never has two transactions open.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dataplane_common::{
    ConfigVersion, DataplaneError, DataplaneResult, RemoteConfigClient, TransactionConfig,
    TransactionId,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::retry::RetryPolicy;

/// Lifecycle of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Opened, operations may be applied.
    Created,
    /// Committed (terminal success).
    Committed,
    /// Abandoned after a failure (terminal).
    Aborted,
}

/// A transaction opened by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Remote transaction id.
    pub id: TransactionId,
    /// Version the transaction is bound to.
    pub version: ConfigVersion,
    /// Attempt number (1-based) that opened it.
    pub attempt: u32,
    /// Current state.
    pub state: TransactionState,
}

/// Counters for coordinator activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Calls to `run_in_transaction`.
    pub runs: u64,
    /// Full cycles started.
    pub attempts: u64,
    /// Successful commits.
    pub commits: u64,
    /// Recoverable conflicts seen (retried or not).
    pub conflicts: u64,
    /// Runs that ended in a fatal error.
    pub failures: u64,
    /// Runs that used up every attempt.
    pub exhausted: u64,
    /// Runs stopped by cancellation.
    pub cancelled: u64,
}

/// Clears the active transaction slot when an attempt ends, including
/// when the caller drops the future mid-flight.
struct ActiveSlot<'a> {
    slot: &'a Mutex<Option<Transaction>>,
}

impl<'a> ActiveSlot<'a> {
    fn open(slot: &'a Mutex<Option<Transaction>>, txn: Transaction) -> Self {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(txn);
        Self { slot }
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Executes units of work atomically against the remote store.
pub struct TransactionCoordinator {
    client: Arc<dyn RemoteConfigClient>,
    policy: RetryPolicy,
    call_timeout: Duration,
    shutdown: CancellationToken,
    /// Held from version read through commit.
    section: tokio::sync::Mutex<()>,
    active: Mutex<Option<Transaction>>,
    last: Mutex<Option<Transaction>>,
    stats: Mutex<CoordinatorStats>,
}

impl TransactionCoordinator {
    /// Creates a coordinator with default policy and timeouts.
    pub fn new(client: Arc<dyn RemoteConfigClient>) -> Self {
        Self::from_config(client, &TransactionConfig::default())
    }

    /// Creates a coordinator from a transaction config section.
    pub fn from_config(client: Arc<dyn RemoteConfigClient>, config: &TransactionConfig) -> Self {
        Self {
            client,
            policy: RetryPolicy::from_config(config),
            call_timeout: config.call_timeout(),
            shutdown: CancellationToken::new(),
            section: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
            last: Mutex::new(None),
            stats: Mutex::new(CoordinatorStats::default()),
        }
    }

    /// Replaces the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Ties every run to `token`; cancelling it stops all runs before commit.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// The retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The transaction currently open, if any.
    pub fn active_transaction(&self) -> Option<Transaction> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recently finished transaction and its terminal state.
    pub fn last_transaction(&self) -> Option<Transaction> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true while a run holds the critical section.
    pub fn is_busy(&self) -> bool {
        self.section.try_lock().is_err()
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> CoordinatorStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, update: impl FnOnce(&mut CoordinatorStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Runs `unit_of_work` inside a transaction, retrying recoverable
    /// conflicts.
    ///
    /// Everything that belongs to one user-facing change must happen inside
    /// a single call; two calls are two transactions.
    pub async fn run_in_transaction<T, F, Fut>(&self, unit_of_work: F) -> DataplaneResult<T>
    where
        F: FnMut(TransactionId) -> Fut,
        Fut: Future<Output = DataplaneResult<T>>,
    {
        self.run_cancellable(&CancellationToken::new(), unit_of_work)
            .await
    }

    /// Like [`run_in_transaction`](Self::run_in_transaction), but stops
    /// without committing once `cancel` fires.
    #[instrument(skip_all, fields(max_attempts = self.policy.max_attempts()))]
    pub async fn run_cancellable<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut unit_of_work: F,
    ) -> DataplaneResult<T>
    where
        F: FnMut(TransactionId) -> Fut,
        Fut: Future<Output = DataplaneResult<T>>,
    {
        self.record(|s| s.runs += 1);
        let _section = self.section.lock().await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.is_cancelled(cancel) {
                self.record(|s| s.cancelled += 1);
                return Err(DataplaneError::Cancelled);
            }

            let err = match self.attempt(attempt, cancel, &mut unit_of_work).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if matches!(err, DataplaneError::Cancelled) {
                self.record(|s| s.cancelled += 1);
                return Err(err);
            }
            if !err.is_recoverable() {
                self.record(|s| s.failures += 1);
                return Err(err);
            }

            self.record(|s| s.conflicts += 1);
            if !self.policy.allows_retry_after(attempt) {
                warn!(attempt, error = %err, "giving up on transaction");
                self.record(|s| s.exhausted += 1);
                return Err(DataplaneError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_after(attempt);
            warn!(attempt, ?delay, error = %err, "transaction conflict, retrying");
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.record(|s| s.cancelled += 1);
                    return Err(DataplaneError::Cancelled);
                }
                _ = self.shutdown.cancelled() => {
                    self.record(|s| s.cancelled += 1);
                    return Err(DataplaneError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One full version-read/open/work/commit cycle.
    async fn attempt<T, F, Fut>(
        &self,
        attempt: u32,
        cancel: &CancellationToken,
        unit_of_work: &mut F,
    ) -> DataplaneResult<T>
    where
        F: FnMut(TransactionId) -> Fut,
        Fut: Future<Output = DataplaneResult<T>>,
    {
        self.record(|s| s.attempts += 1);

        let version = self
            .bounded("read version", self.client.read_version())
            .await?;
        let id = self
            .bounded("open transaction", self.client.open_transaction(version))
            .await?;
        debug!(attempt, %version, transaction = %id, "transaction opened");

        let slot = ActiveSlot::open(
            &self.active,
            Transaction {
                id: id.clone(),
                version,
                attempt,
                state: TransactionState::Created,
            },
        );

        let result = async {
            let value = unit_of_work(id.clone()).await?;
            if self.is_cancelled(cancel) {
                return Err(DataplaneError::Cancelled);
            }
            self.bounded("commit transaction", self.client.commit_transaction(&id))
                .await?;
            Ok(value)
        }
        .await;

        self.finish(match result {
            Ok(_) => TransactionState::Committed,
            Err(_) => TransactionState::Aborted,
        });
        drop(slot);

        match &result {
            Ok(_) => {
                self.record(|s| s.commits += 1);
                info!(attempt, %version, transaction = %id, "transaction committed");
            }
            Err(err) => debug!(attempt, transaction = %id, error = %err, "transaction aborted"),
        }
        result
    }

    fn finish(&self, state: TransactionState) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(txn) = active.as_mut() {
            txn.state = state;
            *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(txn.clone());
        }
    }

    fn is_cancelled(&self, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || self.shutdown.is_cancelled()
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = DataplaneResult<T>>,
    ) -> DataplaneResult<T> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| DataplaneError::timeout(operation, self.call_timeout))?
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("policy", &self.policy)
            .field("call_timeout", &self.call_timeout)
            .field("active", &self.active_transaction())
            .finish()
    }
}
