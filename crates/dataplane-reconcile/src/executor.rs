//! Applies a plan through a resource driver inside an open transaction.

use dataplane_common::{DataplaneResult, ParentRef, ResourceDriver, TransactionId};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::plan::{PlanOp, ReconciliationPlan};

/// What a plan execution did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// Items created.
    pub created: usize,
    /// Items updated in place.
    pub updated: usize,
    /// Items deleted.
    pub deleted: usize,
    /// Deletes that found nothing to delete.
    pub already_absent: usize,
}

impl ExecutionReport {
    /// Total remote calls that changed something.
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Runs every operation of `plan` in application order.
///
/// Stops at the first failure and returns it unmodified; the enclosing unit
/// of work decides the fate of the transaction. A delete that finds nothing
/// counts as done.
#[instrument(skip(driver, plan), fields(kind = %driver.kind(), %parent, %transaction, plan = %plan))]
pub async fn execute_plan(
    driver: &dyn ResourceDriver,
    transaction: &TransactionId,
    parent: &ParentRef,
    plan: &ReconciliationPlan,
) -> DataplaneResult<ExecutionReport> {
    let mut report = ExecutionReport::default();

    for op in plan.operations() {
        match op {
            PlanOp::Delete { index, recreate } => {
                debug!(index, recreate, "delete");
                match driver.delete_at(transaction, parent, index).await {
                    Ok(()) => report.deleted += 1,
                    Err(err) if err.is_not_found() => {
                        warn!(index, error = %err, "item already absent, skipping delete");
                        report.already_absent += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
            PlanOp::Create(item) => {
                debug!(index = item.index, "create");
                driver.create_at(transaction, parent, item).await?;
                report.created += 1;
            }
            PlanOp::Update(item) => {
                debug!(index = item.index, "update");
                driver
                    .update_at(transaction, parent, item.index, item)
                    .await?;
                report.updated += 1;
            }
        }
    }

    Ok(report)
}
