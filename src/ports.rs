//! Port model: the connection points on a node
//!
//! A port resolves to another node's output namespace when connected, or
//! keeps an arbitrary placeholder value when orphaned. Orphan ports are
//! re-exposed at the composite boundary with a `mapping` provenance record
//! pointing back at the inner module and port they stand for.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// Provenance record for a re-exposed port: which inner module/port it
/// stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub module: String,
    pub port: String,
}

/// One connection point on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// Reference id, unique within the owning node's port list
    #[serde(rename = "ref")]
    pub ref_id: String,
    /// Human-readable label
    pub label: String,
    /// Namespace this port currently resolves to
    pub namespace: String,
    /// Provenance for re-exposed orphan ports; absent for authored ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mapping: Vec<PortMapping>,
}

impl Port {
    pub fn new(
        ref_id: impl Into<String>,
        label: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            ref_id: ref_id.into(),
            label: label.into(),
            namespace: namespace.into(),
            mapping: Vec::new(),
        }
    }
}

/// Expand the legacy `input_namespace` shorthand into a port list.
///
/// A bare string becomes a single `in` port; a mapping becomes one port
/// per key. Anything else (including null) yields no ports.
pub fn port_spec(input_namespace: &Value) -> Vec<Port> {
    match input_namespace {
        Value::String(namespace) => vec![Port::new("in", "In", namespace.clone())],
        Value::Mapping(map) => map
            .iter()
            .filter_map(|(k, v)| {
                let key = k.as_str()?;
                let namespace = v.as_str()?;
                Some(Port::new(key, key, namespace))
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Parse a `ports` config entry into typed ports.
pub fn ports_from_value(value: &Value) -> Option<Vec<Port>> {
    serde_yaml::from_value(value.clone()).ok()
}

/// Render a port list back into a config value.
pub fn ports_to_value(ports: &[Port]) -> Value {
    serde_yaml::to_value(ports).unwrap_or(Value::Sequence(Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_shorthand_yields_single_in_port() {
        let ports = port_spec(&Value::String("upstream".into()));
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].ref_id, "in");
        assert_eq!(ports[0].label, "In");
        assert_eq!(ports[0].namespace, "upstream");
        assert!(ports[0].mapping.is_empty());
    }

    #[test]
    fn mapping_shorthand_yields_port_per_key() {
        let value: Value = serde_yaml::from_str("in1: ns_a\nin2: ns_b").unwrap();
        let ports = port_spec(&value);
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].ref_id, "in1");
        assert_eq!(ports[0].namespace, "ns_a");
        assert_eq!(ports[1].ref_id, "in2");
        assert_eq!(ports[1].namespace, "ns_b");
    }

    #[test]
    fn null_shorthand_yields_no_ports() {
        assert!(port_spec(&Value::Null).is_empty());
    }

    #[test]
    fn ports_round_trip_through_config_values() {
        let mut port = Port::new("in", "In", "ns");
        port.mapping.push(PortMapping {
            module: "inner".into(),
            port: "in".into(),
        });
        let value = ports_to_value(&[port.clone()]);
        let parsed = ports_from_value(&value).unwrap();
        assert_eq!(parsed, vec![port]);
    }

    #[test]
    fn empty_mapping_is_not_serialized() {
        let value = ports_to_value(&[Port::new("in", "In", "ns")]);
        let rendered = serde_yaml::to_string(&value).unwrap();
        assert!(!rendered.contains("mapping"));
    }
}
