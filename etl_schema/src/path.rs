//! Dot-path resolution against a parsed JSON payload, used by Validate,
//! GetJoinKey, and PrepareValues alike.

use serde_json::Value;

pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_top_level() {
        let v = json!({"id": "abc"});
        assert_eq!(resolve(&v, "id"), Some(&json!("abc")));
    }

    #[test]
    fn resolves_nested_dot_path() {
        let v = json!({"user": {"name": "Alice"}});
        assert_eq!(resolve(&v, "user.name"), Some(&json!("Alice")));
    }

    #[test]
    fn missing_path_returns_none() {
        let v = json!({"id": "abc"});
        assert_eq!(resolve(&v, "missing"), None);
    }

    #[test]
    fn non_object_intermediate_returns_none() {
        let v = json!({"id": "abc"});
        assert_eq!(resolve(&v, "id.nested"), None);
    }
}
