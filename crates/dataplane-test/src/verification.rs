//! Verification helpers for the fake store
//!
//! Checks committed content and the order of remote calls.

use crate::fake::{Call, FakeDataplane};
use crate::fixtures::payloads;
use dataplane_common::{IndexedItem, ParentRef, ResourceKind};
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("{kind} under {parent}: expected {expected} items, found {actual}")]
    CountMismatch {
        parent: String,
        kind: ResourceKind,
        expected: usize,
        actual: usize,
    },

    #[error("{kind} under {parent} differs at index {index}: expected {expected}, got {actual}")]
    ItemMismatch {
        parent: String,
        kind: ResourceKind,
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("call #{position} ({call:?}) breaks write ordering: {reason}")]
    OrderViolation {
        position: usize,
        call: Call,
        reason: String,
    },

    #[error("call #{position} ({call:?}) ran outside transaction {expected:?}")]
    Interleaved {
        position: usize,
        call: Call,
        expected: Option<String>,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Committed-state verifier
pub struct StoreVerifier<'a> {
    store: &'a FakeDataplane,
}

impl<'a> StoreVerifier<'a> {
    /// Create a new verifier
    pub fn new(store: &'a FakeDataplane) -> Self {
        Self { store }
    }

    /// Verify the committed collection equals `expected`, index for index
    pub fn assert_collection(
        &self,
        parent: &ParentRef,
        kind: ResourceKind,
        expected: &[IndexedItem],
    ) -> VerifyResult<()> {
        let actual = payloads(&self.store.collection(parent, kind));
        let expected = payloads(expected);

        if actual.len() != expected.len() {
            return Err(VerificationError::CountMismatch {
                parent: parent.to_string(),
                kind,
                expected: expected.len(),
                actual: actual.len(),
            });
        }

        for (index, (want, got)) in expected.iter().zip(&actual).enumerate() {
            if want != got {
                return Err(VerificationError::ItemMismatch {
                    parent: parent.to_string(),
                    kind,
                    index,
                    expected: serde_json::Value::Object(want.clone()).to_string(),
                    actual: serde_json::Value::Object(got.clone()).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Verify the committed collection is empty
    pub fn assert_empty(&self, parent: &ParentRef, kind: ResourceKind) -> VerifyResult<()> {
        self.assert_collection(parent, kind, &[])
    }

    /// Verify write ordering per transaction and kind
    pub fn assert_write_order(&self) -> VerifyResult<()> {
        check_write_order(&self.store.calls())
    }

    /// Verify no transaction's calls interleave with another's
    pub fn assert_serialized(&self) -> VerifyResult<()> {
        check_serialized(&self.store.calls())
    }
}

/// Within each (transaction, kind): deletes come first in strictly
/// descending index order, then creates in strictly ascending order, then
/// updates.
pub fn check_write_order(calls: &[Call]) -> VerifyResult<()> {
    #[derive(PartialEq, PartialOrd)]
    enum Phase {
        Delete,
        Create,
        Update,
    }

    // (transaction, kind) -> (phase, last index)
    let mut seen: Vec<((String, ResourceKind), Phase, usize)> = Vec::new();

    for (position, call) in calls.iter().enumerate() {
        let (transaction, kind, index, phase) = match call {
            Call::Delete {
                transaction,
                kind,
                index,
            } => (transaction, *kind, *index, Phase::Delete),
            Call::Create {
                transaction,
                kind,
                index,
            } => (transaction, *kind, *index, Phase::Create),
            Call::Update {
                transaction,
                kind,
                index,
            } => (transaction, *kind, *index, Phase::Update),
            _ => continue,
        };
        let key = (transaction.clone(), kind);
        let violation = |reason: &str| VerificationError::OrderViolation {
            position,
            call: call.clone(),
            reason: reason.to_string(),
        };

        match seen.iter_mut().find(|(k, _, _)| *k == key) {
            None => seen.push((key, phase, index)),
            Some((_, last_phase, last_index)) => {
                if phase < *last_phase {
                    return Err(violation("phase went backwards"));
                }
                if phase == *last_phase {
                    let ok = match phase {
                        Phase::Delete => index < *last_index,
                        Phase::Create => index > *last_index,
                        Phase::Update => index > *last_index,
                    };
                    if !ok {
                        return Err(violation("indices out of order within phase"));
                    }
                }
                *last_phase = phase;
                *last_index = index;
            }
        }
    }
    Ok(())
}

/// Every write and commit belongs to the most recently opened transaction.
///
/// Refused opens hand out no id and leave the current transaction as is.
pub fn check_serialized(calls: &[Call]) -> VerifyResult<()> {
    let mut current: Option<String> = None;
    for (position, call) in calls.iter().enumerate() {
        if let Call::Open { transaction, .. } = call {
            if transaction.is_some() {
                current = transaction.clone();
            }
            continue;
        }
        if let Some(transaction) = call.transaction() {
            if current.as_deref() != Some(transaction) {
                return Err(VerificationError::Interleaved {
                    position,
                    call: call.clone(),
                    expected: current.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(kind: &str, index: usize) -> Call {
        let transaction = "tx-1".to_string();
        let kind_ = ResourceKind::HttpRequestRule;
        match kind {
            "d" => Call::Delete {
                transaction,
                kind: kind_,
                index,
            },
            "c" => Call::Create {
                transaction,
                kind: kind_,
                index,
            },
            _ => Call::Update {
                transaction,
                kind: kind_,
                index,
            },
        }
    }

    #[test]
    fn test_valid_order_accepted() {
        let calls = vec![
            write("d", 4),
            write("d", 1),
            write("c", 1),
            write("c", 5),
            write("u", 0),
        ];
        assert!(check_write_order(&calls).is_ok());
    }

    #[test]
    fn test_ascending_deletes_rejected() {
        let calls = vec![write("d", 1), write("d", 4)];
        assert!(matches!(
            check_write_order(&calls),
            Err(VerificationError::OrderViolation { position: 1, .. })
        ));
    }

    #[test]
    fn test_delete_after_create_rejected() {
        let calls = vec![write("c", 0), write("d", 3)];
        assert!(check_write_order(&calls).is_err());
    }

    fn opened(id: Option<&str>) -> Call {
        Call::Open {
            version: 1,
            transaction: id.map(str::to_string),
        }
    }

    #[test]
    fn test_serialized_requires_latest_transaction() {
        let calls = vec![opened(Some("tx-1")), write("c", 0)];
        assert!(check_serialized(&calls).is_ok());

        let calls = vec![opened(Some("tx-1")), opened(Some("tx-2")), write("c", 0)];
        assert!(matches!(
            check_serialized(&calls),
            Err(VerificationError::Interleaved { position: 2, .. })
        ));
    }

    #[test]
    fn test_refused_open_keeps_current_transaction() {
        let calls = vec![opened(Some("tx-1")), opened(None), write("c", 0)];
        assert!(check_serialized(&calls).is_ok());

        let calls = vec![opened(None), write("c", 0)];
        assert!(check_serialized(&calls).is_err());
    }
}
