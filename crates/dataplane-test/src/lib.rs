//! Integration test infrastructure for dataplane configuration sync
//!
//! Provides:
//! - An in-memory remote store with real index-shift and version semantics
//! - Fault injection for commits and writes
//! - Fixtures for rules and ACLs
//! - Committed-state and call-order verification helpers

mod fake;
pub mod fixtures;
mod logging;
mod verification;

pub use fake::{Call, FakeDataplane, FakeDriver};
pub use fixtures::*;
pub use logging::init_test_logging;
pub use verification::*;
