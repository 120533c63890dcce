//! Reconciliation plans and their application order.

use std::collections::BTreeSet;
use std::fmt;

use dataplane_common::IndexedItem;
use serde::Serialize;

/// An item to insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedCreate {
    /// Item at its final index.
    pub item: IndexedItem,
    /// True if this is the second half of a delete+recreate pair.
    pub recreate: bool,
}

/// An in-place update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedUpdate {
    /// New content at the unchanged index.
    pub item: IndexedItem,
    /// Fields whose values differ from the observed item.
    pub changed_fields: BTreeSet<String>,
}

/// An item to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedDelete {
    /// Index as observed before any operation of the plan runs.
    pub index: usize,
    /// True if this is the first half of a delete+recreate pair.
    pub recreate: bool,
}

/// One remote call, in the order it must be applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlanOp<'a> {
    /// Delete the item at `index`.
    Delete {
        /// Index to delete.
        index: usize,
        /// Part of a recreate pair.
        recreate: bool,
    },
    /// Insert `item` at `item.index`.
    Create(&'a IndexedItem),
    /// Replace the item at `item.index`.
    Update(&'a IndexedItem),
}

/// Create/update/delete partition for one collection.
///
/// Invariants upheld by the reconciler:
/// - `to_delete` is sorted by descending index
/// - `to_create` is sorted by ascending index
/// - `to_update` is sorted by ascending index
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationPlan {
    /// Insertions, ascending.
    pub to_create: Vec<PlannedCreate>,
    /// In-place updates.
    pub to_update: Vec<PlannedUpdate>,
    /// Removals, descending.
    pub to_delete: Vec<PlannedDelete>,
}

impl ReconciliationPlan {
    /// Returns true if nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Number of remote calls the plan makes.
    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }

    /// Indices replaced through delete+recreate.
    pub fn recreated_indices(&self) -> BTreeSet<usize> {
        self.to_delete
            .iter()
            .filter(|d| d.recreate)
            .map(|d| d.index)
            .collect()
    }

    /// Operations in application order.
    ///
    /// Deletions run first, highest index first, so no deletion moves an
    /// index a later deletion still needs. Creations follow in ascending
    /// order, so each insert lands at its final position. After both phases
    /// every surviving item sits at its original index again, which is where
    /// the updates address it.
    pub fn operations(&self) -> Vec<PlanOp<'_>> {
        let deletes = self.to_delete.iter().map(|d| PlanOp::Delete {
            index: d.index,
            recreate: d.recreate,
        });
        let creates = self.to_create.iter().map(|c| PlanOp::Create(&c.item));
        let updates = self.to_update.iter().map(|u| PlanOp::Update(&u.item));
        deletes.chain(creates).chain(updates).collect()
    }
}

impl fmt::Display for ReconciliationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{} ~{} -{}",
            self.to_create.len(),
            self.to_update.len(),
            self.to_delete.len()
        )?;
        let recreated = self.recreated_indices().len();
        if recreated > 0 {
            write!(f, " ({} recreated)", recreated)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataplane_common::Payload;
    use pretty_assertions::assert_eq;

    fn item(index: usize) -> IndexedItem {
        IndexedItem::new(index, Payload::new())
    }

    #[test]
    fn test_empty_plan() {
        let plan = ReconciliationPlan::default();
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
        assert!(plan.operations().is_empty());
        assert_eq!(plan.to_string(), "+0 ~0 -0");
    }

    #[test]
    fn test_operations_order() {
        let plan = ReconciliationPlan {
            to_create: vec![
                PlannedCreate {
                    item: item(0),
                    recreate: true,
                },
                PlannedCreate {
                    item: item(4),
                    recreate: false,
                },
            ],
            to_update: vec![PlannedUpdate {
                item: item(2),
                changed_fields: BTreeSet::new(),
            }],
            to_delete: vec![PlannedDelete {
                index: 0,
                recreate: true,
            }],
        };

        let ops = plan.operations();
        assert_eq!(ops.len(), 4);
        assert!(matches!(ops[0], PlanOp::Delete { index: 0, recreate: true }));
        assert!(matches!(ops[1], PlanOp::Create(i) if i.index == 0));
        assert!(matches!(ops[2], PlanOp::Create(i) if i.index == 4));
        assert!(matches!(ops[3], PlanOp::Update(i) if i.index == 2));

        assert_eq!(plan.recreated_indices().into_iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(plan.to_string(), "+2 ~1 -1 (1 recreated)");
    }
}
