//! Core data model: versions, transactions, parents and indexed items.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DataplaneError, DataplaneResult};

/// Opaque JSON object carried by an indexed item.
pub type Payload = Map<String, Value>;

/// Generation of the remote configuration store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigVersion(pub u64);

impl ConfigVersion {
    /// Returns the raw version number.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a server-side transaction.
///
/// Cheap to clone; each id is used for exactly one coordinator attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Arc<str>);

impl TransactionId {
    /// Wraps a transaction id returned by the remote.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of object that owns indexed collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentKind {
    /// A frontend section.
    Frontend,
    /// A backend section.
    Backend,
    /// A defaults section.
    Defaults,
}

impl ParentKind {
    /// Returns the `parent_type` query value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentKind::Frontend => "frontend",
            ParentKind::Backend => "backend",
            ParentKind::Defaults => "defaults",
        }
    }
}

impl fmt::Display for ParentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete parent: kind plus name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParentRef {
    /// Parent kind.
    pub kind: ParentKind,
    /// Parent name (e.g. "www").
    pub name: String,
}

impl ParentRef {
    /// Creates a parent reference.
    pub fn new(kind: ParentKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Shorthand for a frontend parent.
    pub fn frontend(name: impl Into<String>) -> Self {
        Self::new(ParentKind::Frontend, name)
    }

    /// Shorthand for a backend parent.
    pub fn backend(name: impl Into<String>) -> Self {
        Self::new(ParentKind::Backend, name)
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Indexed resource kinds.
///
/// The declaration order is the apply order: ACLs land before the rules that
/// reference them. Teardown walks the kinds in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Acl,
    HttpRequestRule,
    HttpResponseRule,
    TcpRequestRule,
    TcpResponseRule,
    HttpCheck,
    TcpCheck,
}

impl ResourceKind {
    /// Every kind, in apply order.
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Acl,
        ResourceKind::HttpRequestRule,
        ResourceKind::HttpResponseRule,
        ResourceKind::TcpRequestRule,
        ResourceKind::TcpResponseRule,
        ResourceKind::HttpCheck,
        ResourceKind::TcpCheck,
    ];

    /// Returns the kind name used in configuration files and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Acl => "acl",
            ResourceKind::HttpRequestRule => "http_request_rule",
            ResourceKind::HttpResponseRule => "http_response_rule",
            ResourceKind::TcpRequestRule => "tcp_request_rule",
            ResourceKind::TcpResponseRule => "tcp_response_rule",
            ResourceKind::HttpCheck => "http_check",
            ResourceKind::TcpCheck => "tcp_check",
        }
    }

    /// Returns the configuration endpoint segment for this kind.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ResourceKind::Acl => "acls",
            ResourceKind::HttpRequestRule => "http_request_rules",
            ResourceKind::HttpResponseRule => "http_response_rules",
            ResourceKind::TcpRequestRule => "tcp_request_rules",
            ResourceKind::TcpResponseRule => "tcp_response_rules",
            ResourceKind::HttpCheck => "http_checks",
            ResourceKind::TcpCheck => "tcp_checks",
        }
    }

    /// Payload field that names the entity, for kinds that have one.
    ///
    /// Rule chains and checks are identified by position only.
    pub fn identity_field(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Acl => Some("acl_name"),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member of an ordered per-parent collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedItem {
    /// Zero-based position, unique within the collection.
    pub index: usize,
    /// Everything except the index.
    pub payload: Payload,
}

impl IndexedItem {
    /// Creates an item from an index and payload.
    pub fn new(index: usize, payload: Payload) -> Self {
        Self { index, payload }
    }

    /// Creates an item from a JSON value, which must be an object.
    ///
    /// An `index` key inside the object is dropped; the explicit index wins.
    pub fn from_value(index: usize, value: Value) -> DataplaneResult<Self> {
        match value {
            Value::Object(mut payload) => {
                payload.remove("index");
                Ok(Self::new(index, payload))
            }
            other => Err(DataplaneError::validation(format!(
                "item {} payload must be a JSON object, got {}",
                index, other
            ))),
        }
    }

    /// Returns a payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Returns a copy of this item placed at another index.
    pub fn at(&self, index: usize) -> Self {
        Self {
            index,
            payload: self.payload.clone(),
        }
    }
}

/// Ordered items for one (parent, kind): either desired or observed.
pub type Collection = Vec<IndexedItem>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_resource_kind_order_matches_all() {
        let mut sorted = ResourceKind::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, ResourceKind::ALL.to_vec());
        assert_eq!(ResourceKind::ALL[0], ResourceKind::Acl);
    }

    #[test]
    fn test_resource_kind_names() {
        assert_eq!(ResourceKind::HttpRequestRule.endpoint(), "http_request_rules");
        assert_eq!(ResourceKind::TcpCheck.as_str(), "tcp_check");
        assert_eq!(ResourceKind::Acl.identity_field(), Some("acl_name"));
        assert_eq!(ResourceKind::HttpCheck.identity_field(), None);

        let parsed: ResourceKind = serde_json::from_value(json!("tcp_response_rule")).unwrap();
        assert_eq!(parsed, ResourceKind::TcpResponseRule);
    }

    #[test]
    fn test_parent_ref_display() {
        assert_eq!(ParentRef::frontend("www").to_string(), "frontend:www");
        assert_eq!(ParentRef::backend("api").kind.as_str(), "backend");
    }

    #[test]
    fn test_indexed_item_from_value() {
        let item = IndexedItem::from_value(2, json!({"index": 7, "acl_name": "is_api"})).unwrap();
        assert_eq!(item.index, 2);
        assert_eq!(item.field("acl_name"), Some(&json!("is_api")));
        assert!(item.field("index").is_none());

        assert!(IndexedItem::from_value(0, json!("deny")).is_err());
    }

    #[test]
    fn test_config_version() {
        let v = ConfigVersion(41);
        assert_eq!(v.get(), 41);
        assert_eq!(v.to_string(), "41");
    }
}
