// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Structural validation of task parameters against a backend's declared
//! parameter schema.
//!
//! A schema is a JSON object mapping field names to expected type names:
//! `"string"`, `"number"`, `"boolean"`, `"array"`, `"object"`, or `"any"`.
//! Every declared field is required; fields the schema does not mention are
//! passed through untouched. This runs on the host before any RPC round
//! trip, and again inside the plugin as a defense against version skew.

use serde_json::Value;

/// Validates `params` against `schema`. Returns a human-readable description
/// of the first mismatch.
pub fn validate(schema: &Value, params: &Value) -> Result<(), String> {
    let fields = match schema {
        Value::Object(fields) => fields,
        Value::Null => return Ok(()),
        other => return Err(format!("schema must be a JSON object, got {}", type_name(other))),
    };

    let params = match params {
        Value::Object(map) => map,
        other => {
            return Err(format!(
                "parameters must be a JSON object, got {}",
                type_name(other)
            ))
        }
    };

    for (field, expected) in fields {
        let expected = expected
            .as_str()
            .ok_or_else(|| format!("schema field '{field}' must name a type"))?;

        let value = params
            .get(field)
            .ok_or_else(|| format!("missing required parameter '{field}' ({expected})"))?;

        if !matches_type(value, expected) {
            return Err(format!(
                "parameter '{field}' should be {expected}, got {} ({value})",
                type_name(value)
            ));
        }
    }

    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "any" => true,
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // An unknown type name never matches; the plugin author will see the
        // mismatch message naming it.
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_matching_params() {
        let schema = json!({"value": "number", "label": "string"});
        assert!(validate(&schema, &json!({"value": 3, "label": "x"})).is_ok());
    }

    #[test]
    fn accepts_extra_fields() {
        let schema = json!({"value": "number"});
        assert!(validate(&schema, &json!({"value": 3, "extra": true})).is_ok());
    }

    #[test]
    fn rejects_missing_field() {
        let schema = json!({"value": "number"});
        let err = validate(&schema, &json!({})).unwrap_err();
        assert!(err.contains("missing required parameter 'value'"));
    }

    #[test]
    fn rejects_wrong_type() {
        let schema = json!({"value": "number"});
        let err = validate(&schema, &json!({"value": "three"})).unwrap_err();
        assert!(err.contains("'value'"));
    }

    #[test]
    fn null_schema_accepts_anything() {
        assert!(validate(&Value::Null, &json!({"whatever": [1, 2]})).is_ok());
    }

    #[test]
    fn rejects_non_object_params() {
        let schema = json!({"value": "number"});
        assert!(validate(&schema, &json!([1, 2, 3])).is_err());
    }
}
