use std::collections::HashMap;

use serde_json::Value;

/// Walk a dotted path (`user.address.0.city`) into a JSON value. Numeric
/// segments index arrays.
pub fn walk_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render `{{name.path}}` references against upstream payloads (by label)
/// and the run's `state` namespaces. Unresolvable references render empty.
pub fn render(
    template: &str,
    upstream: &HashMap<String, Value>,
    state: &HashMap<String, Value>,
) -> String {
    let mut out = String::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unclosed reference: keep the literal text.
            out.push_str(&rest[start..]);
            return out;
        };
        out.push_str(&resolve(after[..end].trim(), upstream, state));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn resolve(expr: &str, upstream: &HashMap<String, Value>, state: &HashMap<String, Value>) -> String {
    let (root, path) = match expr.split_once('.') {
        Some((root, path)) => (root, path),
        None => (expr, ""),
    };

    let target = if root == "state" {
        let (namespace, inner) = match path.split_once('.') {
            Some((namespace, inner)) => (namespace, inner),
            None => (path, ""),
        };
        state.get(namespace).and_then(|v| walk_path(v, inner))
    } else {
        upstream.get(root).and_then(|v| walk_path(v, path))
    };

    match target {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_walk_path() {
        let value = json!({"user": {"tags": ["a", "b"], "name": "Ada"}});
        assert_eq!(walk_path(&value, "user.name"), Some(&json!("Ada")));
        assert_eq!(walk_path(&value, "user.tags.1"), Some(&json!("b")));
        assert_eq!(walk_path(&value, "user.missing"), None);
        assert_eq!(walk_path(&value, ""), Some(&value));
    }

    #[test]
    fn test_render_upstream_refs() {
        let mut upstream = HashMap::new();
        upstream.insert("Research".to_string(), json!({"summary": "all good"}));
        upstream.insert("Draft".to_string(), json!("plain text"));
        let state = HashMap::new();

        let rendered = render(
            "Summary: {{Research.summary}} / Draft: {{Draft}}",
            &upstream,
            &state,
        );
        assert_eq!(rendered, "Summary: all good / Draft: plain text");
    }

    #[test]
    fn test_render_state_refs() {
        let upstream = HashMap::new();
        let mut state = HashMap::new();
        state.insert("memo".to_string(), json!({"count": 3}));

        assert_eq!(render("count={{state.memo.count}}", &upstream, &state), "count=3");
    }

    #[test]
    fn test_missing_refs_render_empty() {
        let rendered = render("[{{nothing.here}}]", &HashMap::new(), &HashMap::new());
        assert_eq!(rendered, "[]");
    }

    #[test]
    fn test_unclosed_reference_kept_literal() {
        let rendered = render("a {{broken", &HashMap::new(), &HashMap::new());
        assert_eq!(rendered, "a {{broken");
    }
}
