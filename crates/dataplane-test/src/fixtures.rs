//! Test fixtures for common rule and ACL shapes

use dataplane_common::{Collection, IndexedItem, ParentRef, Payload};
use serde_json::{json, Value};

/// Frontend most scenarios run against
pub fn www() -> ParentRef {
    ParentRef::frontend("www")
}

/// Backend most scenarios run against
pub fn api_backend() -> ParentRef {
    ParentRef::backend("api")
}

/// Builds an item from a JSON object literal
///
/// Panics if `value` is not an object; fixtures are always literals.
pub fn item(index: usize, value: Value) -> IndexedItem {
    match value {
        Value::Object(payload) => IndexedItem::new(index, payload),
        other => panic!("fixture payload must be an object, got {}", other),
    }
}

/// Numbers payloads by position
pub fn collection<I>(payloads: I) -> Collection
where
    I: IntoIterator<Item = Value>,
{
    payloads
        .into_iter()
        .enumerate()
        .map(|(index, value)| item(index, value))
        .collect()
}

/// Payloads of a collection, in index order
pub fn payloads(items: &[IndexedItem]) -> Vec<Payload> {
    let mut sorted: Vec<_> = items.iter().collect();
    sorted.sort_by_key(|i| i.index);
    sorted.into_iter().map(|i| i.payload.clone()).collect()
}

/// HTTP request rule fixtures
pub mod http_rules {
    use super::*;

    /// `deny if <acl>`
    pub fn deny_if(index: usize, acl: &str) -> IndexedItem {
        item(
            index,
            json!({"type": "deny", "cond": "if", "cond_test": acl, "deny_status": 403}),
        )
    }

    /// `allow if <acl>`
    pub fn allow_if(index: usize, acl: &str) -> IndexedItem {
        item(index, json!({"type": "allow", "cond": "if", "cond_test": acl}))
    }

    /// `set-header <name> <value>`
    pub fn set_header(index: usize, name: &str, value: &str) -> IndexedItem {
        item(
            index,
            json!({"type": "set-header", "hdr_name": name, "hdr_format": value}),
        )
    }

    /// Rules matching the scenario names A, B, C...
    pub fn lettered(letters: &str) -> Collection {
        letters
            .chars()
            .enumerate()
            .map(|(index, letter)| deny_if(index, &format!("is_{}", letter)))
            .collect()
    }
}

/// ACL fixtures
pub mod acls {
    use super::*;

    /// `acl <name> path_beg <value>`
    pub fn path_beg(index: usize, name: &str, value: &str) -> IndexedItem {
        item(
            index,
            json!({"acl_name": name, "criterion": "path_beg", "value": value}),
        )
    }

    /// `acl <name> hdr(host) -i <host>`
    pub fn host(index: usize, name: &str, host: &str) -> IndexedItem {
        item(
            index,
            json!({"acl_name": name, "criterion": "hdr(host)", "value": format!("-i {}", host)}),
        )
    }
}

/// TCP request rule fixtures
pub mod tcp_rules {
    use super::*;

    /// `tcp-request connection reject if <acl>`
    pub fn reject_if(index: usize, acl: &str) -> IndexedItem {
        item(
            index,
            json!({"type": "connection", "action": "reject", "cond": "if", "cond_test": acl}),
        )
    }

    /// `tcp-request content accept`
    pub fn accept(index: usize) -> IndexedItem {
        item(index, json!({"type": "content", "action": "accept"}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lettered_rules_are_numbered() {
        let rules = http_rules::lettered("abc");
        let indices: Vec<_> = rules.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(rules[2].field("cond_test"), Some(&json!("is_c")));
    }

    #[test]
    fn test_payloads_sorted_by_index() {
        let items = vec![acls::path_beg(1, "b", "/b"), acls::path_beg(0, "a", "/a")];
        let names: Vec<_> = payloads(&items)
            .iter()
            .map(|p| p["acl_name"].clone())
            .collect();
        assert_eq!(names, vec![json!("a"), json!("b")]);
    }
}
