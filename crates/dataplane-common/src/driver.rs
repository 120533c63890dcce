//! Per-collection resource driver contract and the kind-keyed registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DataplaneError, DataplaneResult};
use crate::types::{Collection, IndexedItem, ParentRef, ResourceKind, TransactionId};

/// Index-addressed CRUD for one resource kind.
///
/// Implementations translate one plan entry into one remote call and hold
/// no reconciliation logic. Errors are returned unmodified; the reconciler
/// decides what a `NotFound` means.
///
/// # Example
///
/// ```ignore
/// struct AclDriver { http: Arc<Client> }
///
/// #[async_trait]
/// impl ResourceDriver for AclDriver {
///     fn kind(&self) -> ResourceKind { ResourceKind::Acl }
///     async fn create_at(&self, tx: &TransactionId, parent: &ParentRef, item: &IndexedItem)
///         -> DataplaneResult<()> { /* POST .../acls */ }
///     // ...
/// }
/// ```
#[async_trait]
pub trait ResourceDriver: Send + Sync {
    /// The kind this driver serves.
    fn kind(&self) -> ResourceKind;

    /// Inserts `item` at `item.index`, shifting later items up.
    async fn create_at(
        &self,
        transaction: &TransactionId,
        parent: &ParentRef,
        item: &IndexedItem,
    ) -> DataplaneResult<()>;

    /// Reads the full committed collection of `parent`.
    async fn read_all(&self, parent: &ParentRef) -> DataplaneResult<Collection>;

    /// Replaces the item at `index` in place.
    async fn update_at(
        &self,
        transaction: &TransactionId,
        parent: &ParentRef,
        index: usize,
        item: &IndexedItem,
    ) -> DataplaneResult<()>;

    /// Deletes the item at `index`, shifting later items down.
    async fn delete_at(
        &self,
        transaction: &TransactionId,
        parent: &ParentRef,
        index: usize,
    ) -> DataplaneResult<()>;
}

/// Drivers keyed by resource kind.
///
/// Iteration follows [`ResourceKind`] order.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<ResourceKind, Arc<dyn ResourceDriver>>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a driver under its own kind, replacing any previous one.
    pub fn register(&mut self, driver: Arc<dyn ResourceDriver>) -> &mut Self {
        self.drivers.insert(driver.kind(), driver);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, driver: Arc<dyn ResourceDriver>) -> Self {
        self.register(driver);
        self
    }

    /// Returns the driver for `kind`, if registered.
    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn ResourceDriver>> {
        self.drivers.get(&kind)
    }

    /// Returns the driver for `kind` or a validation error.
    pub fn require(&self, kind: ResourceKind) -> DataplaneResult<&Arc<dyn ResourceDriver>> {
        self.get(kind).ok_or_else(|| {
            DataplaneError::validation(format!("no driver registered for {}", kind))
        })
    }

    /// Registered kinds in apply order.
    pub fn kinds(&self) -> impl DoubleEndedIterator<Item = ResourceKind> + '_ {
        self.drivers.keys().copied()
    }

    /// Returns the number of registered drivers.
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Returns true if no drivers are registered.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("kinds", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDriver(ResourceKind);

    #[async_trait]
    impl ResourceDriver for NullDriver {
        fn kind(&self) -> ResourceKind {
            self.0
        }

        async fn create_at(
            &self,
            _transaction: &TransactionId,
            _parent: &ParentRef,
            _item: &IndexedItem,
        ) -> DataplaneResult<()> {
            Ok(())
        }

        async fn read_all(&self, _parent: &ParentRef) -> DataplaneResult<Collection> {
            Ok(Vec::new())
        }

        async fn update_at(
            &self,
            _transaction: &TransactionId,
            _parent: &ParentRef,
            _index: usize,
            _item: &IndexedItem,
        ) -> DataplaneResult<()> {
            Ok(())
        }

        async fn delete_at(
            &self,
            _transaction: &TransactionId,
            _parent: &ParentRef,
            _index: usize,
        ) -> DataplaneResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_orders_by_kind() {
        let registry = DriverRegistry::new()
            .with(Arc::new(NullDriver(ResourceKind::TcpCheck)))
            .with(Arc::new(NullDriver(ResourceKind::HttpRequestRule)))
            .with(Arc::new(NullDriver(ResourceKind::Acl)));

        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.kinds().collect::<Vec<_>>(),
            vec![
                ResourceKind::Acl,
                ResourceKind::HttpRequestRule,
                ResourceKind::TcpCheck
            ]
        );
        assert_eq!(
            registry.kinds().rev().next(),
            Some(ResourceKind::TcpCheck)
        );
    }

    #[test]
    fn test_require_missing_driver() {
        let registry = DriverRegistry::new().with(Arc::new(NullDriver(ResourceKind::Acl)));
        assert!(registry.require(ResourceKind::Acl).is_ok());

        let err = registry.require(ResourceKind::HttpCheck).err().unwrap();
        assert!(err.to_string().contains("http_check"));
    }

    #[tokio::test]
    async fn test_driver_dispatch_through_registry() {
        let registry = DriverRegistry::new().with(Arc::new(NullDriver(ResourceKind::Acl)));
        let driver = registry.require(ResourceKind::Acl).unwrap();
        let observed = driver.read_all(&ParentRef::frontend("www")).await.unwrap();
        assert!(observed.is_empty());
    }
}
