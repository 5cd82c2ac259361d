use serde_json::Value;
use thiserror::Error;

/// A placeholder could not be resolved against the context.
///
/// Callers are expected to collapse this to the original string (render is
/// best-effort by contract); the error type exists so the fallback path is
/// observable in tests.
#[derive(Debug, Error, PartialEq)]
#[error("unresolvable placeholder {placeholder}")]
pub struct RenderError {
    pub placeholder: String,
}

/// Render `{{dotted.path}}` placeholders in a single pass against a JSON root.
///
/// Single-pass scanning prevents second-order substitution: a value that
/// itself contains `{{..}}` is emitted verbatim. Any placeholder that does not
/// resolve to a scalar fails the whole render, so the caller can fall back to
/// the untouched input.
pub fn render(template: &str, root: &Value) -> Result<String, RenderError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        let Some(end_offset) = rest[start..].find("}}") else {
            // Unclosed placeholder, nothing sensible to substitute
            return Err(RenderError {
                placeholder: rest[start..].to_string(),
            });
        };
        let raw = &rest[start + 2..start + end_offset];
        let path = raw.trim();
        match lookup(root, path).and_then(scalar_to_string) {
            Some(value) => rendered.push_str(&value),
            None => {
                return Err(RenderError {
                    placeholder: format!("{{{{{path}}}}}"),
                });
            }
        }
        rest = &rest[start + end_offset + 2..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

/// Resolve a dotted path (`payload.order.id`) inside a JSON value.
/// Array segments may be numeric indexes.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // Null and composite values are not renderable inline
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_basic_substitution() {
        let root = json!({"payload": {"name": "world", "count": 3}});
        let out = render("hello {{payload.name}} x{{payload.count}}", &root).unwrap();
        assert_eq!(out, "hello world x3");
    }

    #[test]
    fn test_render_prevents_second_order_substitution() {
        let root = json!({"payload": {"a": "injected {{payload.b}}", "b": "nope"}});
        let out = render("value={{payload.a}}", &root).unwrap();
        assert_eq!(out, "value=injected {{payload.b}}");
    }

    #[test]
    fn test_render_fails_on_unknown_path() {
        let root = json!({"payload": {}});
        let err = render("hi {{payload.missing}}", &root).unwrap_err();
        assert_eq!(err.placeholder, "{{payload.missing}}");
    }

    #[test]
    fn test_render_fails_on_unclosed_placeholder() {
        let root = json!({});
        assert!(render("prefix {{payload.x", &root).is_err());
    }

    #[test]
    fn test_render_fails_on_composite_value() {
        let root = json!({"payload": {"obj": {"k": 1}}});
        assert!(render("{{payload.obj}}", &root).is_err());
    }

    #[test]
    fn test_lookup_array_index() {
        let root = json!({"items": ["a", "b"]});
        assert_eq!(lookup(&root, "items.1"), Some(&json!("b")));
        assert_eq!(lookup(&root, "items.5"), None);
    }
}
