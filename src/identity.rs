//! Opaque identifier encoding for simple and composite primary keys.
//!
//! Composite identifiers join the stringified key values with the descriptor
//! separator in declaration order. Decoding splits on the same separator, so
//! key values must not contain the separator character.

use crate::descriptor::ResourceDescriptor;
use crate::error::ResourceError;
use crate::instance::Attributes;
use serde_json::Value;

/// Encode an instance's identity into a single identifier string.
pub fn encode(descriptor: &ResourceDescriptor, attributes: &Attributes) -> Result<String, ResourceError> {
    if !descriptor.has_identity() {
        return Err(ResourceError::Identity(format!(
            "no primary key declared for {}",
            descriptor.name
        )));
    }
    let parts: Vec<String> = descriptor
        .primary_key_columns
        .iter()
        .map(|column| scalar_string(attributes.get(column).unwrap_or(&Value::Null)))
        .collect();
    Ok(parts.join(&descriptor.separator))
}

/// Stringify one key value; multi-valued entries contribute their last element.
fn scalar_string(value: &Value) -> String {
    match value {
        Value::Array(items) => items.last().map(scalar_string).unwrap_or_default(),
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Decode an identifier into (column, value) filter pairs. Values come back
/// as strings; the driver casts them per column.
pub fn decode(
    descriptor: &ResourceDescriptor,
    identifier: &str,
) -> Result<Vec<(String, Value)>, ResourceError> {
    let columns = &descriptor.primary_key_columns;
    match columns.len() {
        0 => Err(ResourceError::Development(format!(
            "extract_identifier_conditions is not defined for {}",
            descriptor.name
        ))),
        1 => Ok(vec![(columns[0].clone(), Value::String(identifier.to_string()))]),
        n => {
            let parts: Vec<&str> = identifier.split(descriptor.separator.as_str()).collect();
            if parts.len() != n {
                return Err(ResourceError::Identity(format!(
                    "malformed identifier '{}' for {}",
                    identifier, descriptor.name
                )));
            }
            Ok(columns
                .iter()
                .zip(parts)
                .map(|(column, part)| (column.clone(), Value::String(part.to_string())))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(pk: &[&str]) -> ResourceDescriptor {
        ResourceDescriptor {
            name: "Listing".into(),
            table: "listings".into(),
            primary_key_columns: pk.iter().map(|s| s.to_string()).collect(),
            fillable_columns: Vec::new(),
            create_excluded: Vec::new(),
            update_excluded: Vec::new(),
            update_allowed_override: Vec::new(),
            relations: Vec::new(),
            auto_increment: false,
            deletable: false,
            index_filtering_required: true,
            created_at_column: None,
            updated_at_column: None,
            separator: "_".into(),
            validation: Default::default(),
        }
    }

    fn attrs(value: serde_json::Value) -> Attributes {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn single_key_round_trip() {
        let d = descriptor(&["id"]);
        let encoded = encode(&d, &attrs(json!({"id": 42}))).unwrap();
        assert_eq!(encoded, "42");
        assert_eq!(decode(&d, &encoded).unwrap(), vec![("id".into(), json!("42"))]);
    }

    #[test]
    fn composite_key_round_trip() {
        let d = descriptor(&["tenant", "sku"]);
        let encoded = encode(&d, &attrs(json!({"tenant": "t1", "sku": "s1"}))).unwrap();
        assert_eq!(encoded, "t1_s1");
        assert_eq!(
            decode(&d, &encoded).unwrap(),
            vec![("tenant".into(), json!("t1")), ("sku".into(), json!("s1"))]
        );
    }

    #[test]
    fn multi_valued_keys_contribute_their_last_element() {
        let d = descriptor(&["id"]);
        let encoded = encode(&d, &attrs(json!({"id": [3, 9]}))).unwrap();
        assert_eq!(encoded, "9");
    }

    #[test]
    fn encode_without_identity_is_an_identity_error() {
        let d = descriptor(&[]);
        assert!(matches!(
            encode(&d, &Attributes::new()),
            Err(ResourceError::Identity(_))
        ));
    }

    #[test]
    fn decode_without_identity_is_a_development_error() {
        let d = descriptor(&[]);
        assert!(matches!(
            decode(&d, "anything"),
            Err(ResourceError::Development(_))
        ));
    }

    #[test]
    fn malformed_composite_identifier_is_rejected() {
        let d = descriptor(&["tenant", "sku"]);
        assert!(matches!(
            decode(&d, "only-one-part"),
            Err(ResourceError::Identity(_))
        ));
    }
}
