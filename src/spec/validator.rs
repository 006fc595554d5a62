//! JSON Schema validation for contract-declared payloads.
//!
//! The contract document is plain JSON Schema (OpenAPI 3.1), so validation
//! walks `serde_json::Value` trees directly. Internal `#/` references are
//! resolved against the loaded document. The keyword subset implemented here
//! covers everything the shipped contract uses: `type` (including type
//! arrays), `required`, `properties`, `additionalProperties: false`,
//! `minLength`/`maxLength`, `pattern`, `format: date-time`, `enum`, `items`.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// One schema violation, addressed by the offending path in the payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_value: Option<Value>,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            rejected_value: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.rejected_value = Some(value);
        self
    }
}

/// Pluggable validation seam so the contract format is not hard-coded into
/// the dispatch layer or the repositories.
pub trait Validator: Send + Sync {
    fn validate(&self, schema: &Value, instance: &Value) -> Result<(), Vec<FieldIssue>>;
}

/// Validator over the raw contract document.
pub struct JsonSchemaValidator {
    root: Arc<Value>,
}

impl JsonSchemaValidator {
    /// `root` is the document `#/` references resolve against, normally the
    /// full OpenAPI document.
    pub fn new(root: Arc<Value>) -> Self {
        Self { root }
    }

    fn resolve<'a>(&'a self, reference: &str) -> Option<&'a Value> {
        let pointer = reference.strip_prefix('#')?;
        self.root.pointer(pointer)
    }

    fn check(&self, schema: &Value, instance: &Value, path: &str, issues: &mut Vec<FieldIssue>) {
        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            match self.resolve(reference) {
                Some(target) => self.check(target, instance, path, issues),
                None => issues.push(FieldIssue::new(
                    display_path(path),
                    format!("Unresolvable schema reference '{}'", reference),
                )),
            }
            return;
        }

        if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
            if !allowed.contains(instance) {
                issues.push(
                    FieldIssue::new(display_path(path), "Value is not one of the allowed values")
                        .with_value(instance.clone()),
                );
                return;
            }
        }

        if let Some(type_spec) = schema.get("type") {
            if !type_matches(type_spec, instance) {
                issues.push(
                    FieldIssue::new(
                        display_path(path),
                        format!(
                            "Expected type {} but got {}",
                            type_names(type_spec),
                            json_type_name(instance)
                        ),
                    )
                    .with_value(instance.clone()),
                );
                return;
            }
        }

        match instance {
            Value::String(s) => self.check_string(schema, s, path, issues),
            Value::Object(map) => self.check_object(schema, map, path, issues),
            Value::Array(items) => {
                if let Some(item_schema) = schema.get("items") {
                    for (i, item) in items.iter().enumerate() {
                        let child = join_path(path, &i.to_string());
                        self.check(item_schema, item, &child, issues);
                    }
                }
            }
            _ => {}
        }
    }

    fn check_string(&self, schema: &Value, s: &str, path: &str, issues: &mut Vec<FieldIssue>) {
        let len = s.chars().count();

        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if (len as u64) < min {
                issues.push(
                    FieldIssue::new(
                        display_path(path),
                        format!("Must be at least {} character(s) long", min),
                    )
                    .with_value(Value::String(s.to_owned())),
                );
            }
        }

        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if (len as u64) > max {
                issues.push(
                    FieldIssue::new(
                        display_path(path),
                        format!("Must be at most {} character(s) long", max),
                    )
                    .with_value(Value::String(s.to_owned())),
                );
            }
        }

        if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(s) {
                        issues.push(
                            FieldIssue::new(
                                display_path(path),
                                format!("Does not match pattern '{}'", pattern),
                            )
                            .with_value(Value::String(s.to_owned())),
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(pattern, error = %err, "Contract declares an invalid pattern");
                }
            }
        }

        if let Some("date-time") = schema.get("format").and_then(Value::as_str) {
            if chrono::DateTime::parse_from_rfc3339(s).is_err() {
                issues.push(
                    FieldIssue::new(
                        display_path(path),
                        "Must be a valid RFC 3339 date-time with timezone",
                    )
                    .with_value(Value::String(s.to_owned())),
                );
            }
        }
    }

    fn check_object(
        &self,
        schema: &Value,
        map: &serde_json::Map<String, Value>,
        path: &str,
        issues: &mut Vec<FieldIssue>,
    ) {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(name) {
                    issues.push(FieldIssue::new(
                        join_path(path, name),
                        format!("Missing required property '{}'", name),
                    ));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(props) = properties {
            for (name, prop_schema) in props {
                if let Some(value) = map.get(name) {
                    let child = join_path(path, name);
                    self.check(prop_schema, value, &child, issues);
                }
            }
        }

        if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
            for name in map.keys() {
                let declared = properties.map(|p| p.contains_key(name)).unwrap_or(false);
                if !declared {
                    issues.push(
                        FieldIssue::new(
                            join_path(path, name),
                            format!("Unknown property '{}'", name),
                        )
                        .with_value(map[name].clone()),
                    );
                }
            }
        }
    }
}

impl Validator for JsonSchemaValidator {
    fn validate(&self, schema: &Value, instance: &Value) -> Result<(), Vec<FieldIssue>> {
        let mut issues = Vec::new();
        self.check(schema, instance, "", &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_owned()
    } else {
        format!("{}.{}", prefix, segment)
    }
}

/// Root-level violations have no property path; report them against the body.
fn display_path(path: &str) -> String {
    if path.is_empty() {
        "body".to_owned()
    } else {
        path.to_owned()
    }
}

fn type_matches(type_spec: &Value, instance: &Value) -> bool {
    match type_spec {
        Value::String(name) => single_type_matches(name, instance),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| single_type_matches(name, instance)),
        _ => true,
    }
}

fn single_type_matches(name: &str, instance: &Value) -> bool {
    match name {
        "null" => instance.is_null(),
        "boolean" => instance.is_boolean(),
        "string" => instance.is_string(),
        "array" => instance.is_array(),
        "object" => instance.is_object(),
        "number" => instance.is_number(),
        "integer" => instance.is_i64() || instance.is_u64(),
        _ => true,
    }
}

fn type_names(type_spec: &Value) -> String {
    match type_spec {
        Value::String(name) => format!("'{}'", name),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .map(|n| format!("'{}'", n))
            .collect::<Vec<_>>()
            .join(" or "),
        _ => "<unknown>".to_owned(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
