//! In-memory stand-in for the remote configuration API.
//!
//! Behaves like the real store where the sync layer depends on it:
//! - every successful commit bumps the version by one
//! - a transaction stages a private copy of the configuration; reads
//!   without a transaction see only committed state
//! - create/delete at index `i` shift every later item
//! - committing a transaction opened at an older version fails with
//!   `406 ... outdated and cannot be committed`
//!
//! Faults can be queued for the next commits or writes, and every call is
//! logged for ordering assertions.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dataplane_common::{
    ApiError, Collection, ConfigVersion, DataplaneError, DataplaneResult, DriverRegistry,
    IndexedItem, ParentRef, Payload, RemoteConfigClient, ResourceDriver, ResourceKind,
    TransactionId,
};
use tracing::debug;

type CollectionKey = (ParentRef, ResourceKind);
type Store = BTreeMap<CollectionKey, Vec<Payload>>;

/// A call received by the fake store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Version read.
    ReadVersion,
    /// Transaction open requested against `version`; `transaction` is the
    /// id handed out, `None` when the open was refused.
    Open {
        version: u64,
        transaction: Option<String>,
    },
    /// Commit attempted.
    Commit { transaction: String },
    /// Committed collection read.
    Read { kind: ResourceKind },
    /// Item created inside a transaction.
    Create {
        transaction: String,
        kind: ResourceKind,
        index: usize,
    },
    /// Item replaced inside a transaction.
    Update {
        transaction: String,
        kind: ResourceKind,
        index: usize,
    },
    /// Item deleted inside a transaction.
    Delete {
        transaction: String,
        kind: ResourceKind,
        index: usize,
    },
}

impl Call {
    /// Returns true for create/update/delete.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Call::Create { .. } | Call::Update { .. } | Call::Delete { .. }
        )
    }

    /// Transaction the call was made in, if any.
    pub fn transaction(&self) -> Option<&str> {
        match self {
            Call::Commit { transaction }
            | Call::Create { transaction, .. }
            | Call::Update { transaction, .. }
            | Call::Delete { transaction, .. } => Some(transaction),
            Call::Open { transaction, .. } => transaction.as_deref(),
            _ => None,
        }
    }
}

enum CommitFault {
    /// A concurrent writer commits first.
    Outdate,
    /// A concurrent writer commits this content first.
    Race(CollectionKey, Vec<Payload>),
    /// The commit is rejected with this body.
    Reject(ApiError),
}

struct Staged {
    base: u64,
    collections: Store,
}

struct State {
    version: u64,
    committed: Store,
    transactions: BTreeMap<String, Staged>,
    next_id: u64,
    commits: usize,
    commit_faults: VecDeque<CommitFault>,
    write_faults: VecDeque<ApiError>,
    /// Armed by a successful commit, consumed by committed reads.
    read_faults: VecDeque<ApiError>,
    reads_fail_after_commit: Option<ApiError>,
    calls: Vec<Call>,
}

/// In-memory remote configuration store.
pub struct FakeDataplane {
    state: Mutex<State>,
}

impl Default for FakeDataplane {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDataplane {
    /// Creates an empty store at version 1.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                version: 1,
                committed: Store::new(),
                transactions: BTreeMap::new(),
                next_id: 0,
                commits: 0,
                commit_faults: VecDeque::new(),
                write_faults: VecDeque::new(),
                read_faults: VecDeque::new(),
                reads_fail_after_commit: None,
                calls: Vec::new(),
            }),
        }
    }

    /// Creates an empty store behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current committed version.
    pub fn version(&self) -> ConfigVersion {
        ConfigVersion(self.lock().version)
    }

    /// Sets committed content without touching the version.
    pub fn seed(&self, parent: &ParentRef, kind: ResourceKind, items: Collection) {
        self.lock()
            .committed
            .insert((parent.clone(), kind), into_payloads(items));
    }

    /// Replaces committed content as another writer would, bumping the
    /// version.
    pub fn external_write(&self, parent: &ParentRef, kind: ResourceKind, items: Collection) {
        let mut state = self.lock();
        state
            .committed
            .insert((parent.clone(), kind), into_payloads(items));
        state.version += 1;
    }

    /// Committed collection, indexed by position.
    pub fn collection(&self, parent: &ParentRef, kind: ResourceKind) -> Collection {
        collection_of(&self.lock().committed, parent, kind)
    }

    /// The next `n` commits lose a race with another writer: the version
    /// moves on and the commit fails as outdated.
    pub fn outdate_next_commits(&self, n: usize) {
        let mut state = self.lock();
        for _ in 0..n {
            state.commit_faults.push_back(CommitFault::Outdate);
        }
    }

    /// The next commit loses to another writer that commits `items` for
    /// (`parent`, `kind`) just before it.
    pub fn race_next_commit(&self, parent: &ParentRef, kind: ResourceKind, items: Collection) {
        self.lock()
            .commit_faults
            .push_back(CommitFault::Race((parent.clone(), kind), into_payloads(items)));
    }

    /// The next commit is rejected with `error`.
    pub fn reject_next_commit(&self, error: ApiError) {
        self.lock()
            .commit_faults
            .push_back(CommitFault::Reject(error));
    }

    /// The next create/update/delete is rejected with `error`.
    pub fn fail_next_write(&self, error: ApiError) {
        self.lock().write_faults.push_back(error);
    }

    /// The first committed read after the next successful commit is
    /// rejected with `error`. Reads before that commit are unaffected.
    pub fn fail_read_after_next_commit(&self, error: ApiError) {
        self.lock().reads_fail_after_commit = Some(error);
    }

    /// Drops every open transaction, as the remote does on expiry.
    pub fn expire_transactions(&self) {
        self.lock().transactions.clear();
    }

    /// Transactions opened and not yet committed, rejected or expired.
    pub fn open_transactions(&self) -> usize {
        self.lock().transactions.len()
    }

    /// Successful commits.
    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Only the create/update/delete calls, in order.
    pub fn writes(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_write())
            .cloned()
            .collect()
    }

    /// Number of version reads.
    pub fn version_reads(&self) -> usize {
        self.count(|c| matches!(c, Call::ReadVersion))
    }

    /// Number of transactions opened.
    pub fn opens(&self) -> usize {
        self.count(|c| matches!(c, Call::Open { .. }))
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Forgets the call log.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// A driver for `kind` backed by this store.
    pub fn driver(self: &Arc<Self>, kind: ResourceKind) -> FakeDriver {
        FakeDriver {
            kind,
            store: Arc::clone(self),
        }
    }

    /// A registry with one fake driver per kind.
    pub fn drivers(
        self: &Arc<Self>,
        kinds: impl IntoIterator<Item = ResourceKind>,
    ) -> DriverRegistry {
        let mut registry = DriverRegistry::new();
        for kind in kinds {
            registry.register(Arc::new(self.driver(kind)));
        }
        registry
    }

    /// Applies `op` to the staged copy of one collection.
    fn stage<R>(
        &self,
        call: Call,
        transaction: &TransactionId,
        parent: &ParentRef,
        kind: ResourceKind,
        op: impl FnOnce(&mut Vec<Payload>) -> Result<R, ApiError>,
    ) -> DataplaneResult<R> {
        let mut state = self.lock();
        state.calls.push(call);

        if let Some(error) = state.write_faults.pop_front() {
            return Err(DataplaneError::from_api(error));
        }
        let staged = state
            .transactions
            .get_mut(transaction.as_str())
            .ok_or_else(|| transaction_not_found(transaction.as_str()))?;
        let items = staged
            .collections
            .entry((parent.clone(), kind))
            .or_default();
        op(items).map_err(DataplaneError::from_api)
    }
}

impl std::fmt::Debug for FakeDataplane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeDataplane")
            .field("version", &state.version)
            .field("collections", &state.committed.len())
            .field("open_transactions", &state.transactions.len())
            .finish()
    }
}

fn into_payloads(mut items: Collection) -> Vec<Payload> {
    items.sort_by_key(|item| item.index);
    items.into_iter().map(|item| item.payload).collect()
}

fn collection_of(store: &Store, parent: &ParentRef, kind: ResourceKind) -> Collection {
    store
        .get(&(parent.clone(), kind))
        .map(|payloads| {
            payloads
                .iter()
                .enumerate()
                .map(|(index, payload)| IndexedItem::new(index, payload.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn transaction_not_found(id: &str) -> DataplaneError {
    DataplaneError::from_api(ApiError::new(
        404,
        format!("transaction {} not found", id),
    ))
}

fn outdated(id: &str) -> DataplaneError {
    DataplaneError::from_api(ApiError::new(
        406,
        format!("transaction {} is outdated and cannot be committed", id),
    ))
}

fn missing_item(kind: ResourceKind, index: usize) -> ApiError {
    ApiError::new(404, format!("{} at index {} does not exist", kind, index))
}

#[async_trait]
impl RemoteConfigClient for FakeDataplane {
    async fn read_version(&self) -> DataplaneResult<ConfigVersion> {
        let mut state = self.lock();
        state.calls.push(Call::ReadVersion);
        Ok(ConfigVersion(state.version))
    }

    async fn open_transaction(&self, version: ConfigVersion) -> DataplaneResult<TransactionId> {
        let mut state = self.lock();
        if version.get() != state.version {
            state.calls.push(Call::Open {
                version: version.get(),
                transaction: None,
            });
            return Err(DataplaneError::from_api(ApiError::new(
                409,
                format!(
                    "version mismatch: requested {}, current {}",
                    version, state.version
                ),
            )));
        }

        state.next_id += 1;
        let id = format!("tx-{}", state.next_id);
        let staged = Staged {
            base: state.version,
            collections: state.committed.clone(),
        };
        state.transactions.insert(id.clone(), staged);
        state.calls.push(Call::Open {
            version: version.get(),
            transaction: Some(id.clone()),
        });
        debug!(%id, %version, "fake transaction opened");
        Ok(TransactionId::new(id))
    }

    async fn commit_transaction(&self, transaction: &TransactionId) -> DataplaneResult<()> {
        let mut state = self.lock();
        let id = transaction.as_str();
        state.calls.push(Call::Commit {
            transaction: id.to_string(),
        });

        let staged = state
            .transactions
            .remove(id)
            .ok_or_else(|| transaction_not_found(id))?;

        match state.commit_faults.pop_front() {
            Some(CommitFault::Outdate) => {
                state.version += 1;
                return Err(outdated(id));
            }
            Some(CommitFault::Race(key, payloads)) => {
                state.committed.insert(key, payloads);
                state.version += 1;
                return Err(outdated(id));
            }
            Some(CommitFault::Reject(error)) => return Err(DataplaneError::from_api(error)),
            None => {}
        }
        if staged.base != state.version {
            return Err(outdated(id));
        }

        state.committed = staged.collections;
        state.version += 1;
        state.commits += 1;
        if let Some(error) = state.reads_fail_after_commit.take() {
            state.read_faults.push_back(error);
        }
        debug!(%id, version = state.version, "fake transaction committed");
        Ok(())
    }
}

/// Resource driver over a [`FakeDataplane`].
#[derive(Debug, Clone)]
pub struct FakeDriver {
    kind: ResourceKind,
    store: Arc<FakeDataplane>,
}

#[async_trait]
impl ResourceDriver for FakeDriver {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn create_at(
        &self,
        transaction: &TransactionId,
        parent: &ParentRef,
        item: &IndexedItem,
    ) -> DataplaneResult<()> {
        let call = Call::Create {
            transaction: transaction.to_string(),
            kind: self.kind,
            index: item.index,
        };
        let kind = self.kind;
        self.store.stage(call, transaction, parent, kind, |items| {
            if item.index > items.len() {
                return Err(ApiError::new(
                    400,
                    format!(
                        "{} index {} is past the end ({} items)",
                        kind,
                        item.index,
                        items.len()
                    ),
                ));
            }
            items.insert(item.index, item.payload.clone());
            Ok(())
        })
    }

    async fn read_all(&self, parent: &ParentRef) -> DataplaneResult<Collection> {
        let mut state = self.store.lock();
        state.calls.push(Call::Read { kind: self.kind });
        if let Some(error) = state.read_faults.pop_front() {
            return Err(DataplaneError::from_api(error));
        }
        Ok(collection_of(&state.committed, parent, self.kind))
    }

    async fn update_at(
        &self,
        transaction: &TransactionId,
        parent: &ParentRef,
        index: usize,
        item: &IndexedItem,
    ) -> DataplaneResult<()> {
        let call = Call::Update {
            transaction: transaction.to_string(),
            kind: self.kind,
            index,
        };
        let kind = self.kind;
        self.store.stage(call, transaction, parent, kind, |items| {
            let slot = items.get_mut(index).ok_or_else(|| missing_item(kind, index))?;
            *slot = item.payload.clone();
            Ok(())
        })
    }

    async fn delete_at(
        &self,
        transaction: &TransactionId,
        parent: &ParentRef,
        index: usize,
    ) -> DataplaneResult<()> {
        let call = Call::Delete {
            transaction: transaction.to_string(),
            kind: self.kind,
            index,
        };
        let kind = self.kind;
        self.store.stage(call, transaction, parent, kind, |items| {
            if index >= items.len() {
                return Err(missing_item(kind, index));
            }
            items.remove(index);
            Ok(())
        })
    }
}
