//! Dotted-key flattening used by the v12 HTTP/WS codec.
//!
//! OneBot v12 implementations are allowed to send nested extra fields as
//! dotted keys (`"foo.bar": 1` instead of `"foo": {"bar": 1}`). Before an
//! event or action response is deserialized into its concrete schema, any
//! such keys are lifted into real nested objects.

use serde_json::{Map, Value};

/// Recursively expands dotted keys in a JSON object into nested objects.
/// Non-object values and array elements are recursed into but otherwise
/// left untouched.
pub fn flattened_to_nested(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(expand_object(map)),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(flattened_to_nested).collect())
        }
        other => other,
    }
}

fn expand_object(map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let value = flattened_to_nested(value);
        insert_dotted(&mut out, &key, value);
    }
    out
}

fn insert_dotted(out: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        None => {
            out.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = out
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(nested) = entry else {
                unreachable!()
            };
            insert_dotted(nested, rest, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leaves_flat_objects_untouched() {
        let input = json!({"a": 1, "b": "x"});
        assert_eq!(flattened_to_nested(input.clone()), input);
    }

    #[test]
    fn lifts_a_single_dotted_key() {
        let input = json!({"a.b": 1});
        assert_eq!(flattened_to_nested(input), json!({"a": {"b": 1}}));
    }

    #[test]
    fn lifts_multiple_segments() {
        let input = json!({"a.b.c": 1});
        assert_eq!(flattened_to_nested(input), json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn merges_siblings_under_the_same_prefix() {
        let input = json!({"a.b": 1, "a.c": 2});
        assert_eq!(flattened_to_nested(input), json!({"a": {"b": 1, "c": 2}}));
    }

    #[test]
    fn recurses_into_arrays() {
        let input = json!({"items": [{"a.b": 1}]});
        assert_eq!(
            flattened_to_nested(input),
            json!({"items": [{"a": {"b": 1}}]})
        );
    }
}
