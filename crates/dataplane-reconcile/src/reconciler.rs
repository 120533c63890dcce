//! Ordered collection reconciler.
//!
//! Items are matched purely by position. For rule chains that is the point:
//! order is semantic, so "insert before 3" becomes "replace 3..N and append".
//! Kinds with an identity field (ACL names) additionally treat a changed
//! identity at the same index as a different entity and recreate it.

use std::collections::{BTreeMap, BTreeSet};

use dataplane_common::{
    DataplaneError, DataplaneResult, IdentityRule, IndexedItem, KindRules, Payload, ResourceKind,
};
use serde_json::Value;

use crate::plan::{PlannedCreate, PlannedDelete, PlannedUpdate, ReconciliationPlan};

/// Computes plans for one resource kind. Holds no state between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciler {
    rules: KindRules,
}

impl Reconciler {
    /// Creates a reconciler with explicit rules.
    pub fn new(rules: KindRules) -> Self {
        Self { rules }
    }

    /// Creates a reconciler with the default rules of `kind`.
    pub fn for_kind(kind: ResourceKind) -> Self {
        Self::new(KindRules::default_for(kind))
    }

    /// Rules in use.
    pub fn rules(&self) -> &KindRules {
        &self.rules
    }

    /// Rejects a desired collection with duplicate or non-contiguous
    /// indices. Needs no remote state, so callers run it before opening a
    /// transaction.
    pub fn validate_desired(desired: &[IndexedItem]) -> DataplaneResult<()> {
        index_by_position(desired, "desired").map(|_| ())
    }

    /// Diffs `observed` against `desired`.
    ///
    /// Both collections must have unique, contiguous indices; input order is
    /// irrelevant.
    pub fn reconcile(
        &self,
        observed: &[IndexedItem],
        desired: &[IndexedItem],
    ) -> DataplaneResult<ReconciliationPlan> {
        let observed = index_by_position(observed, "observed")?;
        let desired = index_by_position(desired, "desired")?;

        let mut plan = ReconciliationPlan::default();

        for (&index, &want) in &desired {
            match observed.get(&index) {
                None => plan.to_create.push(PlannedCreate {
                    item: want.clone(),
                    recreate: false,
                }),
                Some(&have) => {
                    let changed = changed_fields(&have.payload, &want.payload);
                    if changed.is_empty() {
                        continue;
                    }
                    if self.updatable(have, want, &changed) {
                        plan.to_update.push(PlannedUpdate {
                            item: want.clone(),
                            changed_fields: changed,
                        });
                    } else {
                        plan.to_delete.push(PlannedDelete {
                            index,
                            recreate: true,
                        });
                        plan.to_create.push(PlannedCreate {
                            item: want.clone(),
                            recreate: true,
                        });
                    }
                }
            }
        }

        for &index in observed.keys() {
            if !desired.contains_key(&index) {
                plan.to_delete.push(PlannedDelete {
                    index,
                    recreate: false,
                });
            }
        }

        plan.to_create.sort_by_key(|c| c.item.index);
        plan.to_update.sort_by_key(|u| u.item.index);
        plan.to_delete.sort_by(|a, b| b.index.cmp(&a.index));
        Ok(plan)
    }

    fn updatable(&self, have: &IndexedItem, want: &IndexedItem, changed: &BTreeSet<String>) -> bool {
        let same_entity = match &self.rules.identity {
            IdentityRule::Position => true,
            IdentityRule::Field { name } => have.field(name) == want.field(name),
        };
        same_entity && changed.iter().all(|field| self.rules.update.allows(field))
    }
}

/// Keys whose values differ, including keys present on one side only.
pub fn changed_fields(observed: &Payload, desired: &Payload) -> BTreeSet<String> {
    let keys: BTreeSet<&String> = observed.keys().chain(desired.keys()).collect();
    keys.into_iter()
        .filter(|key| observed.get(*key) != desired.get(*key))
        .filter(|key| !both_null_or_missing(observed.get(*key), desired.get(*key)))
        .cloned()
        .collect()
}

/// The remote omits null fields, so a missing key equals an explicit null.
fn both_null_or_missing(a: Option<&Value>, b: Option<&Value>) -> bool {
    matches!(
        (a, b),
        (None | Some(Value::Null), None | Some(Value::Null))
    )
}

fn index_by_position<'a>(
    items: &'a [IndexedItem],
    label: &str,
) -> DataplaneResult<BTreeMap<usize, &'a IndexedItem>> {
    let mut by_index = BTreeMap::new();
    for item in items {
        if by_index.insert(item.index, item).is_some() {
            return Err(DataplaneError::plan_conflict(format!(
                "duplicate {} index {}",
                label, item.index
            )));
        }
    }
    // keys are sorted, so contiguity means the last key is len - 1
    if let Some((&last, _)) = by_index.last_key_value() {
        if last + 1 != by_index.len() {
            return Err(DataplaneError::plan_conflict(format!(
                "{} indices are not contiguous: {} items, highest index {}",
                label,
                by_index.len(),
                last
            )));
        }
    }
    Ok(by_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataplane_common::UpdatePolicy;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn rule(index: usize, cond: &str) -> IndexedItem {
        IndexedItem::from_value(index, json!({"type": "deny", "cond": "if", "cond_test": cond}))
            .unwrap()
    }

    fn named(index: usize, name: &str) -> IndexedItem {
        IndexedItem::from_value(index, json!({"acl_name": name, "criterion": "path_beg"})).unwrap()
    }

    fn indices_created(plan: &ReconciliationPlan) -> Vec<usize> {
        plan.to_create.iter().map(|c| c.item.index).collect()
    }

    fn indices_deleted(plan: &ReconciliationPlan) -> Vec<usize> {
        plan.to_delete.iter().map(|d| d.index).collect()
    }

    #[test]
    fn test_identical_collections_yield_empty_plan() {
        let items = vec![rule(0, "a"), rule(1, "b"), rule(2, "c")];
        let plan = Reconciler::for_kind(ResourceKind::HttpRequestRule)
            .reconcile(&items, &items)
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_scenario_shrink_and_update() {
        let observed = vec![rule(0, "a"), rule(1, "b"), rule(2, "c")];
        let desired = vec![rule(0, "a"), rule(1, "c")];

        let plan = Reconciler::for_kind(ResourceKind::HttpRequestRule)
            .reconcile(&observed, &desired)
            .unwrap();

        assert_eq!(indices_deleted(&plan), vec![2]);
        assert!(!plan.to_delete[0].recreate);
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].item, rule(1, "c"));
        assert_eq!(
            plan.to_update[0].changed_fields,
            BTreeSet::from(["cond_test".to_string()])
        );
        assert!(plan.to_create.is_empty());
    }

    #[test]
    fn test_scenario_create_from_empty() {
        let desired = vec![rule(1, "y"), rule(0, "x")];
        let plan = Reconciler::for_kind(ResourceKind::TcpRequestRule)
            .reconcile(&[], &desired)
            .unwrap();

        assert_eq!(indices_created(&plan), vec![0, 1]);
        assert!(plan.to_create.iter().all(|c| !c.recreate));
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn test_deletes_descending() {
        let observed: Vec<_> = (0..5).map(|i| rule(i, &i.to_string())).collect();
        let desired = vec![rule(0, "0")];
        let plan = Reconciler::for_kind(ResourceKind::HttpResponseRule)
            .reconcile(&observed, &desired)
            .unwrap();
        assert_eq!(indices_deleted(&plan), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_identity_change_forces_recreate() {
        let observed = vec![named(0, "is_api"), named(1, "is_static")];
        let desired = vec![named(0, "is_admin"), named(1, "is_static")];

        let plan = Reconciler::for_kind(ResourceKind::Acl)
            .reconcile(&observed, &desired)
            .unwrap();

        assert!(plan.to_update.is_empty());
        assert_eq!(indices_deleted(&plan), vec![0]);
        assert_eq!(indices_created(&plan), vec![0]);
        assert!(plan.to_delete[0].recreate);
        assert!(plan.to_create[0].recreate);
    }

    #[test]
    fn test_same_identity_updates_in_place() {
        let observed = vec![named(0, "is_api")];
        let mut changed = named(0, "is_api");
        changed
            .payload
            .insert("value".to_string(), json!("/api"));

        let plan = Reconciler::for_kind(ResourceKind::Acl)
            .reconcile(&observed, &[changed])
            .unwrap();
        assert_eq!(plan.to_update.len(), 1);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn test_allowlist_forces_recreate_for_other_fields() {
        let rules = KindRules {
            identity: IdentityRule::Position,
            update: UpdatePolicy::allowlist(["cond_test"]),
        };
        let reconciler = Reconciler::new(rules);

        let observed = vec![rule(0, "a"), rule(1, "b")];
        let mut retyped = rule(1, "b");
        retyped.payload.insert("type".to_string(), json!("allow"));
        let desired = vec![rule(0, "z"), retyped];

        let plan = reconciler.reconcile(&observed, &desired).unwrap();
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].item.index, 0);
        assert_eq!(plan.recreated_indices(), BTreeSet::from([1]));
        assert_eq!(indices_created(&plan), vec![1]);
    }

    #[test]
    fn test_insert_in_the_middle_shifts_by_position() {
        let observed = vec![rule(0, "a"), rule(1, "b"), rule(2, "c")];
        let desired = vec![rule(0, "a"), rule(1, "new"), rule(2, "b"), rule(3, "c")];

        let plan = Reconciler::for_kind(ResourceKind::HttpRequestRule)
            .reconcile(&observed, &desired)
            .unwrap();

        let updated: Vec<_> = plan.to_update.iter().map(|u| u.item.index).collect();
        assert_eq!(updated, vec![1, 2]);
        assert_eq!(indices_created(&plan), vec![3]);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn test_duplicate_desired_index_is_plan_conflict() {
        let desired = vec![rule(0, "a"), rule(0, "b")];
        let err = Reconciler::for_kind(ResourceKind::HttpRequestRule)
            .reconcile(&[], &desired)
            .unwrap_err();
        assert!(matches!(err, DataplaneError::PlanConflict { .. }));
        assert!(err.to_string().contains("duplicate desired index 0"));
    }

    #[test]
    fn test_gap_in_desired_is_plan_conflict() {
        let desired = vec![rule(0, "a"), rule(2, "c")];
        let err = Reconciler::for_kind(ResourceKind::HttpRequestRule)
            .reconcile(&[], &desired)
            .unwrap_err();
        assert!(matches!(err, DataplaneError::PlanConflict { .. }));
    }

    #[test]
    fn test_validate_desired_without_observed_state() {
        assert!(Reconciler::validate_desired(&[]).is_ok());
        assert!(Reconciler::validate_desired(&[rule(1, "b"), rule(0, "a")]).is_ok());

        let err = Reconciler::validate_desired(&[rule(0, "a"), rule(2, "c")]).unwrap_err();
        assert!(matches!(err, DataplaneError::PlanConflict { .. }));
        let err = Reconciler::validate_desired(&[rule(1, "a"), rule(1, "b")]).unwrap_err();
        assert!(err.to_string().contains("duplicate desired index 1"));
    }

    #[test]
    fn test_changed_fields_treats_null_as_missing() {
        let a = named(0, "x").payload;
        let mut b = a.clone();
        b.insert("comment".to_string(), Value::Null);
        assert!(changed_fields(&a, &b).is_empty());

        b.insert("comment".to_string(), json!("hi"));
        assert_eq!(changed_fields(&a, &b), BTreeSet::from(["comment".to_string()]));
    }
}
