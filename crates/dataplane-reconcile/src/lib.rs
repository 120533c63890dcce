//! Ordered collection reconciliation for index-addressed resources.
//!
//! - [`Reconciler`]: diffs observed against desired and returns a
//!   [`ReconciliationPlan`]
//! - [`execute_plan`]: applies a plan through a driver in shift-safe order
//! - [`ConfigSyncer`]: `apply_desired_state` / `delete_all`, one transaction
//!   per call
//!
//! # Ordering
//!
//! Deleting index `i` on the remote moves every later item down by one.
//! Plans therefore run deletions highest-first, then creations lowest-first,
//! then in-place updates. Every deletion of a plan, including the first half
//! of each recreate pair, is applied before any creation.
//!
//! # Example
//!
//! ```ignore
//! use dataplane_reconcile::{ConfigSyncer, DesiredState};
//!
//! let syncer = ConfigSyncer::new(coordinator, drivers).with_rules(config.reconcile);
//! let mut desired = DesiredState::new();
//! desired.insert(ResourceKind::HttpRequestRule, rules);
//! let snapshot = syncer.apply_desired_state(&ParentRef::frontend("www"), &desired).await?;
//! ```

mod executor;
mod plan;
mod reconciler;
mod syncer;

pub use executor::{execute_plan, ExecutionReport};
pub use plan::{PlanOp, PlannedCreate, PlannedDelete, PlannedUpdate, ReconciliationPlan};
pub use reconciler::{changed_fields, Reconciler};
pub use syncer::{ConfigSyncer, DesiredState, ObservedSnapshot};
