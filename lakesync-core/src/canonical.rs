//! Canonical JSON rendering for content hashing
//!
//! Object keys are emitted in lexicographic order at every nesting level;
//! arrays keep their order. Two structurally equal values therefore always
//! canonicalise to the same byte sequence, which is what makes `delta_id`
//! a pure function of delta content.

use serde_json::Value;

/// Render a JSON value with lexicographically sorted object keys
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json's encoder handles string escaping
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_keys_sorted() {
        let v = json!({"b": 1, "a": {"z": true, "y": null}});
        assert_eq!(canonical_json(&v), r#"{"a":{"y":null,"z":true},"b":1}"#);
    }

    #[test]
    fn test_array_order_preserved() {
        let v = json!([3, 1, {"b": 2, "a": 1}]);
        assert_eq!(canonical_json(&v), r#"[3,1,{"a":1,"b":2}]"#);
    }

    #[test]
    fn test_string_escaping() {
        let v = json!({"k": "a\"b"});
        assert_eq!(canonical_json(&v), r#"{"k":"a\"b"}"#);
    }

    #[test]
    fn test_key_order_invariance() {
        let a: serde_json::Value = serde_json::from_str(r#"{"x":1,"y":[true,null]}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"y":[true,null],"x":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }
}
