use serde_json::Value;

/// Determines whether a document conforms to a schema.
///
/// The accepted vocabulary is a deliberately small JSON-schema subset:
/// `type` (object/array/string/number/boolean/null), `properties` +
/// `required` for objects, `enum` for strings, and `minimum`/`maximum` for
/// numbers. `fields` is accepted as an alias of `properties` and `min`/`max`
/// as aliases of `minimum`/`maximum`. Unknown vocabulary is permissive.
/// A non-object schema validates everything.
pub fn validate(doc: &Value, schema: &Value) -> bool {
    let schema_obj = match schema.as_object() {
        Some(s) => s,
        None => return true,
    };

    if let Some(expected) = schema_obj.get("type").and_then(|t| t.as_str()) {
        let type_ok = match expected {
            "object" => doc.is_object(),
            "array" => doc.is_array(),
            "string" => doc.is_string(),
            "number" => doc.is_number(),
            "boolean" => doc.is_boolean(),
            "null" => doc.is_null(),
            _ => true,
        };
        if !type_ok {
            return false;
        }
    }

    if let Some(doc_obj) = doc.as_object() {
        if let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) {
            for name in required {
                if let Some(name) = name.as_str() {
                    if !doc_obj.contains_key(name) {
                        return false;
                    }
                }
            }
        }

        for props_key in ["properties", "fields"] {
            if let Some(props) = schema_obj.get(props_key).and_then(|p| p.as_object()) {
                for (field, sub_schema) in props {
                    if let Some(value) = doc_obj.get(field) {
                        if !validate(value, sub_schema) {
                            return false;
                        }
                    }
                }
            }
        }
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(doc) {
            return false;
        }
    }

    if let Some(value) = doc.as_f64() {
        for bound_key in ["minimum", "min"] {
            if let Some(bound) = schema_obj.get(bound_key).and_then(|b| b.as_f64()) {
                if value < bound {
                    return false;
                }
            }
        }
        for bound_key in ["maximum", "max"] {
            if let Some(bound) = schema_obj.get(bound_key).and_then(|b| b.as_f64()) {
                if value > bound {
                    return false;
                }
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_fields_must_be_present() {
        let schema = json!({"type": "object", "required": ["user_id"]});
        assert!(validate(&json!({"user_id": "u-9"}), &schema));
        assert!(!validate(&json!({"plan": "x"}), &schema));
    }

    #[test]
    fn property_types_are_enforced_when_present() {
        let schema = json!({
            "type": "object",
            "properties": {"user_id": {"type": "string"}, "credits": {"type": "number"}},
            "required": ["user_id"]
        });
        assert!(validate(&json!({"user_id": "u-9", "credits": 10}), &schema));
        assert!(!validate(&json!({"user_id": 42}), &schema));
        // A field absent from the document and from `required` is fine.
        assert!(validate(&json!({"user_id": "u-9"}), &schema));
    }

    #[test]
    fn fields_is_an_alias_of_properties() {
        let schema = json!({"fields": {"age": {"type": "number", "min": 0, "max": 150}}});
        assert!(validate(&json!({"age": 33}), &schema));
        assert!(!validate(&json!({"age": -1}), &schema));
        assert!(!validate(&json!({"age": 200}), &schema));
        assert!(!validate(&json!({"age": "old"}), &schema));
    }

    #[test]
    fn minimum_and_maximum_bound_numbers() {
        let schema = json!({"properties": {"score": {"minimum": 1, "maximum": 5}}});
        assert!(validate(&json!({"score": 3}), &schema));
        assert!(!validate(&json!({"score": 0}), &schema));
        assert!(!validate(&json!({"score": 5.5}), &schema));
    }

    #[test]
    fn enum_restricts_string_values() {
        let schema = json!({"properties": {"plan": {"type": "string", "enum": ["free", "premium"]}}});
        assert!(validate(&json!({"plan": "free"}), &schema));
        assert!(!validate(&json!({"plan": "gold"}), &schema));
    }

    #[test]
    fn nested_object_schemas_recurse() {
        let schema = json!({
            "properties": {
                "meta": {"type": "object", "properties": {"tier": {"type": "number"}}, "required": ["tier"]}
            }
        });
        assert!(validate(&json!({"meta": {"tier": 1}}), &schema));
        assert!(!validate(&json!({"meta": {"tier": "one"}}), &schema));
        assert!(!validate(&json!({"meta": {}}), &schema));
    }

    #[test]
    fn unknown_vocabulary_is_permissive() {
        assert!(validate(&json!({"x": 1}), &json!({"type": "integer"})));
        assert!(validate(&json!({"x": 1}), &json!({"pattern": ".*"})));
        assert!(validate(&json!({"x": 1}), &json!(null)));
    }
}
