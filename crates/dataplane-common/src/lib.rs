//! Shared building blocks for versioned dataplane configuration sync.
//!
//! This crate holds everything the coordinator, the reconciler and the
//! concrete backends agree on:
//!
//! - [`RemoteConfigClient`]: version read, transaction open and commit
//! - [`ResourceDriver`]: index-addressed CRUD for one resource kind
//! - [`DriverRegistry`]: drivers selected by [`ResourceKind`]
//! - [`DataplaneError`]: the error taxonomy and conflict classification
//! - [`config`]: serde configuration for all layers
//!
//! # Architecture
//!
//! 1. The caller supplies desired collections per (parent, kind)
//! 2. The reconciler reads observed collections through drivers
//! 3. The coordinator opens a transaction bound to the current version
//! 4. Plan entries run through drivers inside that transaction
//! 5. The coordinator commits, retrying recoverable conflicts

pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod types;

pub use client::RemoteConfigClient;
pub use config::{
    BackoffKind, ClientConfig, DataplaneConfig, IdentityRule, KindRules, ReconcileConfig,
    TransactionConfig, UpdatePolicy,
};
pub use driver::{DriverRegistry, ResourceDriver};
pub use error::{ApiError, ConflictKind, DataplaneError, DataplaneResult};
pub use types::{
    Collection, ConfigVersion, IndexedItem, ParentKind, ParentRef, Payload, ResourceKind,
    TransactionId,
};
