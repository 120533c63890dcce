//! Request and response bodies of the configuration API.

use dataplane_common::{Collection, DataplaneError, DataplaneResult, IndexedItem};
use serde::Deserialize;
use serde_json::Value;

/// Body returned when a transaction is opened.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TransactionBody {
    pub id: String,
    #[serde(rename = "_version", default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Collection responses come wrapped (`{_version, data}`) or bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CollectionBody {
    Wrapped { data: Vec<Value> },
    Bare(Vec<Value>),
}

impl CollectionBody {
    /// Converts the entries into items sorted by index.
    ///
    /// Entries without an `index` take their position in the response.
    pub fn into_items(self) -> DataplaneResult<Collection> {
        let entries = match self {
            CollectionBody::Wrapped { data } => data,
            CollectionBody::Bare(data) => data,
        };

        let mut items = entries
            .into_iter()
            .enumerate()
            .map(|(position, entry)| {
                let index = match entry.get("index") {
                    None | Some(Value::Null) => position,
                    Some(value) => value
                        .as_u64()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or_else(|| {
                            DataplaneError::validation(format!("invalid index in response: {}", value))
                        })?,
                };
                IndexedItem::from_value(index, entry)
            })
            .collect::<DataplaneResult<Collection>>()?;

        items.sort_by_key(|item| item.index);
        Ok(items)
    }
}

/// Request body for create/update: the payload plus its index.
pub(crate) fn item_body(item: &IndexedItem, index: usize) -> Value {
    let mut body = item.payload.clone();
    body.insert("index".to_string(), Value::from(index));
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_wrapped_and_bare_collections() {
        let wrapped: CollectionBody = serde_json::from_value(json!({
            "_version": 7,
            "data": [
                {"index": 1, "acl_name": "b"},
                {"index": 0, "acl_name": "a"}
            ]
        }))
        .unwrap();
        let items = wrapped.into_items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].index, 0);
        assert_eq!(items[0].field("acl_name"), Some(&json!("a")));
        assert!(items[0].field("index").is_none());

        let bare: CollectionBody = serde_json::from_value(json!([{"type": "allow"}])).unwrap();
        assert_eq!(bare.into_items().unwrap()[0].index, 0);
    }

    #[test]
    fn test_invalid_index_rejected() {
        let body: CollectionBody = serde_json::from_value(json!([{"index": "x"}])).unwrap();
        assert!(body.into_items().is_err());
    }

    #[test]
    fn test_item_body_carries_index() {
        let item = IndexedItem::from_value(3, json!({"type": "deny"})).unwrap();
        assert_eq!(item_body(&item, 3), json!({"type": "deny", "index": 3}));
    }
}
