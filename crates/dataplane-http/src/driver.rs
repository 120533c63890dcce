//! Resource driver backed by the HTTP API.
//!
//! Every indexed kind shares the same shape:
//! `configuration/{endpoint}[/{index}]?parent_type=..&parent_name=..`, plus
//! `transaction_id` on writes. One driver type covers them all, keyed by
//! [`ResourceKind::endpoint`].

use std::sync::Arc;

use async_trait::async_trait;
use dataplane_common::{
    Collection, DataplaneResult, IndexedItem, ParentRef, ResourceDriver, ResourceKind,
    TransactionId,
};
use reqwest::{Method, RequestBuilder};
use tracing::{debug, instrument};

use crate::client::DataplaneClient;
use crate::wire::{item_body, CollectionBody};

/// Driver for one indexed resource kind.
#[derive(Debug, Clone)]
pub struct HttpResourceDriver {
    kind: ResourceKind,
    client: Arc<DataplaneClient>,
}

impl HttpResourceDriver {
    /// Creates a driver for `kind`.
    pub fn new(kind: ResourceKind, client: Arc<DataplaneClient>) -> Self {
        Self { kind, client }
    }

    fn collection_path(&self) -> String {
        format!("configuration/{}", self.kind.endpoint())
    }

    fn item_path(&self, index: usize) -> String {
        format!("configuration/{}/{}", self.kind.endpoint(), index)
    }

    fn scoped(&self, builder: RequestBuilder, parent: &ParentRef) -> RequestBuilder {
        builder.query(&[
            ("parent_type", parent.kind.as_str()),
            ("parent_name", parent.name.as_str()),
        ])
    }

    fn write(
        &self,
        method: Method,
        path: &str,
        transaction: &TransactionId,
        parent: &ParentRef,
    ) -> RequestBuilder {
        self.scoped(self.client.request(method, path), parent)
            .query(&[("transaction_id", transaction.as_str())])
    }
}

#[async_trait]
impl ResourceDriver for HttpResourceDriver {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[instrument(skip(self, item), fields(kind = %self.kind, %parent, index = item.index))]
    async fn create_at(
        &self,
        transaction: &TransactionId,
        parent: &ParentRef,
        item: &IndexedItem,
    ) -> DataplaneResult<()> {
        let request = self
            .write(Method::POST, &self.collection_path(), transaction, parent)
            .json(&item_body(item, item.index));
        self.client.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(kind = %self.kind, %parent))]
    async fn read_all(&self, parent: &ParentRef) -> DataplaneResult<Collection> {
        let request = self.scoped(
            self.client.request(Method::GET, &self.collection_path()),
            parent,
        );
        let body: CollectionBody = self.client.send_json(request).await?;
        let items = body.into_items()?;
        debug!(count = items.len(), "collection read");
        Ok(items)
    }

    #[instrument(skip(self, item), fields(kind = %self.kind, %parent))]
    async fn update_at(
        &self,
        transaction: &TransactionId,
        parent: &ParentRef,
        index: usize,
        item: &IndexedItem,
    ) -> DataplaneResult<()> {
        let request = self
            .write(Method::PUT, &self.item_path(index), transaction, parent)
            .json(&item_body(item, index));
        self.client.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(kind = %self.kind, %parent))]
    async fn delete_at(
        &self,
        transaction: &TransactionId,
        parent: &ParentRef,
        index: usize,
    ) -> DataplaneResult<()> {
        let request = self.write(Method::DELETE, &self.item_path(index), transaction, parent);
        self.client.send(request).await?;
        Ok(())
    }
}
