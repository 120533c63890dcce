//! Transaction protocol of the remote configuration store.

use async_trait::async_trait;

use crate::error::DataplaneResult;
use crate::types::{ConfigVersion, TransactionId};

/// Primitive transaction calls against the remote store.
///
/// Only the transaction coordinator calls these. Per-resource calls live on
/// [`ResourceDriver`](crate::ResourceDriver).
#[async_trait]
pub trait RemoteConfigClient: Send + Sync {
    /// Reads the current configuration version.
    async fn read_version(&self) -> DataplaneResult<ConfigVersion>;

    /// Opens a transaction bound to `version`.
    async fn open_transaction(&self, version: ConfigVersion) -> DataplaneResult<TransactionId>;

    /// Commits a transaction. Conflicts surface as recoverable errors.
    async fn commit_transaction(&self, transaction: &TransactionId) -> DataplaneResult<()>;
}
