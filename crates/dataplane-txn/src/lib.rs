//! Transaction coordinator for a versioned remote configuration store.
//!
//! - [`TransactionCoordinator`]: runs a unit of work inside one transaction
//!   and retries recoverable conflicts under a bounded [`RetryPolicy`]
//! - [`Transaction`]: id, bound version and lifecycle state of one attempt
//!
//! # Example
//!
//! ```ignore
//! use dataplane_txn::TransactionCoordinator;
//!
//! let coordinator = TransactionCoordinator::from_config(client, &config.transaction);
//! coordinator
//!     .run_in_transaction(|tx| async move {
//!         acls.delete_at(&tx, &parent, 2).await?;
//!         acls.update_at(&tx, &parent, 1, &item).await
//!     })
//!     .await?;
//! ```

mod coordinator;
mod retry;

pub use coordinator::{CoordinatorStats, Transaction, TransactionCoordinator, TransactionState};
pub use retry::{Backoff, RetryPolicy};

pub use tokio_util::sync::CancellationToken;
