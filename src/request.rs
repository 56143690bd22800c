//! Build requests
//!
//! A build request is an ordered JSON list of `{name, type, config}`
//! entries. The shape is checked against an embedded JSON Schema before
//! ingestion so malformed requests fail the whole build up front, with
//! no partial model constructed. Entry configs deserialize straight into
//! YAML value trees so mapping order survives from request to generated
//! parameter file.

use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;
use serde_yaml::Value;

use crate::error::{Result, TrellisError};
use crate::node::NodeType;

static REQUEST_SCHEMA: Lazy<serde_json::Value> = Lazy::new(|| {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "required": ["name", "type"],
            "properties": {
                "name": { "type": "string", "minLength": 1 },
                "type": { "type": "string" },
                "config": { "type": "object" }
            }
        }
    })
});

static REQUEST_VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    jsonschema::validator_for(&REQUEST_SCHEMA).expect("request schema compiles")
});

/// One entry of a build request.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub config: Value,
}

impl RequestEntry {
    /// Parsed node kind; unknown types are construction-time errors.
    pub fn node_type(&self) -> Result<NodeType> {
        NodeType::parse(&self.entry_type).ok_or_else(|| TrellisError::InvalidRequest {
            detail: format!("unknown entry type '{}'", self.entry_type),
        })
    }
}

/// Parse and validate a build request document.
pub fn parse_request(text: &str) -> Result<Vec<RequestEntry>> {
    let doc: serde_json::Value = serde_json::from_str(text)?;
    let errors: Vec<String> = REQUEST_VALIDATOR
        .iter_errors(&doc)
        .map(|e| e.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(TrellisError::InvalidRequest {
            detail: errors.join("; "),
        });
    }
    // Reparse from text so mapping order reaches the YAML trees intact
    let entries: Vec<RequestEntry> = serde_json::from_str(text)?;
    for entry in &entries {
        entry.node_type()?;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_requests_parse() {
        let entries = parse_request(
            r#"[
                {"name": "module1", "type": "module", "config": {"params": {"n": "1"}}},
                {"name": "join", "type": "connector", "config": {"map": ["module1", "module2"]}}
            ]"#,
        )
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "module1");
        assert_eq!(entries[0].node_type().unwrap(), NodeType::Module);
        assert_eq!(entries[1].node_type().unwrap(), NodeType::Connector);
    }

    #[test]
    fn entry_configs_preserve_key_order() {
        let entries = parse_request(
            r#"[{"name": "m", "type": "module", "config": {"config": {"zeta": "1", "alpha": "2", "mid": "3"}}}]"#,
        )
        .unwrap();
        let Value::Mapping(config) = &entries[0].config else {
            panic!("config should be a mapping");
        };
        let inner = config.get("config").unwrap().as_mapping().unwrap();
        let keys: Vec<&str> = inner.iter().filter_map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn missing_required_fields_fail_validation() {
        let err = parse_request(r#"[{"name": "m"}]"#).unwrap_err();
        assert!(matches!(err, TrellisError::InvalidRequest { .. }));
    }

    #[test]
    fn unknown_entry_types_fail_validation() {
        let err = parse_request(r#"[{"name": "m", "type": "widget"}]"#).unwrap_err();
        assert!(matches!(err, TrellisError::InvalidRequest { detail } if detail.contains("widget")));
    }

    #[test]
    fn non_array_documents_fail_validation() {
        let err = parse_request(r#"{"name": "m", "type": "module"}"#).unwrap_err();
        assert!(matches!(err, TrellisError::InvalidRequest { .. }));
    }

    #[test]
    fn entry_type_is_case_insensitive() {
        let entries =
            parse_request(r#"[{"name": "m", "type": "Module"}]"#).unwrap();
        assert_eq!(entries[0].node_type().unwrap(), NodeType::Module);
    }
}
