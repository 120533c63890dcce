//! Desired-state syncer: the surface exposed to the declarative layer.
//!
//! Each public operation is exactly one coordinator run, so everything a
//! user-facing change touches commits or fails together.

use std::collections::BTreeMap;
use std::sync::Arc;

use dataplane_common::{
    Collection, DataplaneResult, DriverRegistry, ParentRef, ReconcileConfig, ResourceKind,
    TransactionId,
};
use dataplane_txn::TransactionCoordinator;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::executor::{execute_plan, ExecutionReport};
use crate::plan::ReconciliationPlan;
use crate::reconciler::Reconciler;

/// Desired collections for one parent, keyed by kind.
pub type DesiredState = BTreeMap<ResourceKind, Collection>;

/// Remote state read back after a successful apply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservedSnapshot {
    /// The parent that was synced.
    pub parent: ParentRef,
    /// Committed collections of every kind that was requested.
    pub collections: BTreeMap<ResourceKind, Collection>,
    /// What the committed attempt changed, per kind.
    pub reports: BTreeMap<ResourceKind, ExecutionReport>,
    /// Set when the post-commit read failed. The apply itself still
    /// committed; `collections` then holds only the kinds read before the
    /// failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_back_error: Option<String>,
}

impl ObservedSnapshot {
    /// Observed collection for `kind`, empty if the kind was not requested.
    pub fn collection(&self, kind: ResourceKind) -> &[dataplane_common::IndexedItem] {
        self.collections
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Reconciles and applies indexed collections through the coordinator.
pub struct ConfigSyncer {
    coordinator: Arc<TransactionCoordinator>,
    drivers: DriverRegistry,
    rules: ReconcileConfig,
}

impl ConfigSyncer {
    /// Creates a syncer with default rules for every kind.
    pub fn new(coordinator: Arc<TransactionCoordinator>, drivers: DriverRegistry) -> Self {
        Self {
            coordinator,
            drivers,
            rules: ReconcileConfig::default(),
        }
    }

    /// Replaces the per-kind reconciliation rules.
    pub fn with_rules(mut self, rules: ReconcileConfig) -> Self {
        self.rules = rules;
        self
    }

    /// The coordinator shared by every operation.
    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    /// Registered drivers.
    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    fn reconciler(&self, kind: ResourceKind) -> Reconciler {
        Reconciler::new(self.rules.rules_for(kind))
    }

    /// Moves every collection named in `desired` to its desired content.
    ///
    /// Kinds missing from `desired` are left alone; a kind mapped to an
    /// empty collection is cleared. Observed state is re-read on every
    /// attempt, inside the transaction window. Malformed desired indices
    /// fail before any transaction is opened. Once the commit succeeds the
    /// call succeeds; a failed read-back is reported on the snapshot.
    #[instrument(skip(self, desired), fields(%parent, kinds = desired.len()))]
    pub async fn apply_desired_state(
        &self,
        parent: &ParentRef,
        desired: &DesiredState,
    ) -> DataplaneResult<ObservedSnapshot> {
        for (kind, items) in desired {
            self.drivers.require(*kind)?;
            Reconciler::validate_desired(items)?;
        }

        let reports = self
            .coordinator
            .run_in_transaction(|tx| async move {
                let mut reports = BTreeMap::new();
                for (kind, items) in desired {
                    let report = self.sync_kind(&tx, parent, *kind, items).await?;
                    reports.insert(*kind, report);
                }
                Ok(reports)
            })
            .await?;

        let changes: usize = reports.values().map(ExecutionReport::changes).sum();
        info!(changes, "desired state applied");

        let mut collections = BTreeMap::new();
        let mut read_back_error = None;
        for kind in desired.keys() {
            let driver = self.drivers.require(*kind)?;
            match driver.read_all(parent).await {
                Ok(items) => {
                    collections.insert(*kind, items);
                }
                Err(e) => {
                    warn!(%kind, error = %e, "read-back after commit failed");
                    read_back_error = Some(e.to_string());
                    break;
                }
            }
        }

        Ok(ObservedSnapshot {
            parent: parent.clone(),
            collections,
            reports,
            read_back_error,
        })
    }

    /// Deletes every item of every registered kind under `parent`.
    ///
    /// Kinds are cleared in reverse apply order, rules before the ACLs they
    /// reference.
    #[instrument(skip(self), fields(%parent))]
    pub async fn delete_all(&self, parent: &ParentRef) -> DataplaneResult<()> {
        let deleted = self
            .coordinator
            .run_in_transaction(|tx| async move {
                let mut deleted = 0;
                for kind in self.drivers.kinds().rev() {
                    deleted += self.sync_kind(&tx, parent, kind, &[]).await?.deleted;
                }
                Ok(deleted)
            })
            .await?;

        info!(deleted, "all indexed items removed");
        Ok(())
    }

    /// Computes per-kind plans without opening a transaction.
    #[instrument(skip(self, desired), fields(%parent))]
    pub async fn plan(
        &self,
        parent: &ParentRef,
        desired: &DesiredState,
    ) -> DataplaneResult<BTreeMap<ResourceKind, ReconciliationPlan>> {
        let mut plans = BTreeMap::new();
        for (kind, items) in desired {
            let driver = self.drivers.require(*kind)?;
            let observed = driver.read_all(parent).await?;
            plans.insert(*kind, self.reconciler(*kind).reconcile(&observed, items)?);
        }
        Ok(plans)
    }

    async fn sync_kind(
        &self,
        tx: &TransactionId,
        parent: &ParentRef,
        kind: ResourceKind,
        desired: &[dataplane_common::IndexedItem],
    ) -> DataplaneResult<ExecutionReport> {
        let driver = self.drivers.require(kind)?;
        let observed = driver.read_all(parent).await?;
        let plan = self.reconciler(kind).reconcile(&observed, desired)?;

        if plan.is_empty() {
            debug!(%kind, "already in sync");
            return Ok(ExecutionReport::default());
        }
        execute_plan(driver.as_ref(), tx, parent, &plan).await
    }
}

impl std::fmt::Debug for ConfigSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSyncer")
            .field("drivers", &self.drivers)
            .field("rules", &self.rules)
            .finish()
    }
}
