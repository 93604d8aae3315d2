//! Rule-driven request validation producing a sanitized field map.

use crate::descriptor::ValidationRule;
use crate::error::{ResourceError, ValidationErrors};
use crate::instance::Attributes;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate the body against per-column rules; required fields must be
    /// present. On success the body comes back with nested objects stripped
    /// (the service consumes scalar/array values only).
    pub fn validate(
        body: &Attributes,
        rules: &HashMap<String, ValidationRule>,
    ) -> Result<Attributes, ResourceError> {
        let mut errors = ValidationErrors::new();
        for (column, rule) in rules {
            let value = body.get(column);
            if rule.required == Some(true) && value.map(Value::is_null).unwrap_or(true) {
                errors.add(column, format!("{} is required", column));
                continue;
            }
            if let Some(v) = value {
                check_field(column, v, rule, &mut errors);
            }
        }
        if !errors.is_empty() {
            return Err(ResourceError::Validation(errors));
        }
        Ok(sanitized(body))
    }

    /// Validate only the fields present in the body (PATCH semantics);
    /// required is not enforced for missing fields.
    pub fn validate_partial(
        body: &Attributes,
        rules: &HashMap<String, ValidationRule>,
    ) -> Result<Attributes, ResourceError> {
        let mut errors = ValidationErrors::new();
        for (column, value) in body {
            if let Some(rule) = rules.get(column) {
                check_field(column, value, rule, &mut errors);
            }
        }
        if !errors.is_empty() {
            return Err(ResourceError::Validation(errors));
        }
        Ok(sanitized(body))
    }
}

fn sanitized(body: &Attributes) -> Attributes {
    body.iter()
        .filter(|(_, v)| !v.is_object())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn check_field(column: &str, v: &Value, rule: &ValidationRule, errors: &mut ValidationErrors) {
    if v.is_null() {
        return;
    }
    if let Some(format) = &rule.format {
        check_format(column, v, format, errors);
    }
    if let Some(max) = rule.max_length {
        if let Some(s) = v.as_str() {
            if s.len() > max as usize {
                errors.add(column, format!("{} must be at most {} characters", column, max));
            }
        }
    }
    if let Some(min) = rule.min_length {
        if let Some(s) = v.as_str() {
            if s.len() < min as usize {
                errors.add(column, format!("{} must be at least {} characters", column, min));
            }
        }
    }
    if let Some(pattern) = &rule.pattern {
        match Regex::new(pattern) {
            Ok(re) => {
                if let Some(s) = v.as_str() {
                    if !re.is_match(s) {
                        errors.add(column, format!("{} does not match required pattern", column));
                    }
                }
            }
            Err(_) => errors.add(column, format!("invalid pattern for {}", column)),
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            errors.add(
                column,
                format!("{} must be one of: {:?}", column, allowed.iter().take(5).collect::<Vec<_>>()),
            );
        }
    }
    if let Some(min) = rule.minimum {
        if let Some(n) = v.as_f64() {
            if n < min {
                errors.add(column, format!("{} must be at least {}", column, min));
            }
        }
    }
    if let Some(max) = rule.maximum {
        if let Some(n) = v.as_f64() {
            if n > max {
                errors.add(column, format!("{} must be at most {}", column, max));
            }
        }
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn check_format(column: &str, v: &Value, format: &str, errors: &mut ValidationErrors) {
    match format.to_lowercase().as_str() {
        "email" => {
            if let Some(s) = v.as_str() {
                if !s.contains('@') || s.len() < 3 {
                    errors.add(column, format!("{} must be a valid email", column));
                }
            }
        }
        "uuid" => {
            if let Some(s) = v.as_str() {
                if uuid::Uuid::parse_str(s).is_err() {
                    errors.add(column, format!("{} must be a valid UUID", column));
                }
            }
        }
        _ => {}
    }
}
