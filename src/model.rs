//! Workflow graph model
//!
//! Owns the node list and everything that wires it: module insertion with
//! rulename wrangling, connector application, lookups and orphan-port
//! analysis. One model is built per request, expanded in place, then
//! discarded after code generation.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

use crate::alerts::WorkflowAlerts;
use crate::error::{Result, TrellisError};
use crate::node::{ModuleSpec, Node, NodeType};
use crate::ports::{port_spec, ports_from_value, Port, PortMapping};
use crate::source::SourceFetcher;

/// Rule names land in a Python-hosted workflow, so wrangle them away from
/// the keywords and builtins generated code is likely to shadow.
const RESERVED_WORDS: &[&str] = &[
    "all", "and", "any", "as", "assert", "break", "class", "continue", "def", "del", "dict",
    "elif", "else", "except", "filter", "finally", "for", "from", "global", "if", "import", "in",
    "input", "is", "lambda", "list", "map", "max", "min", "none", "nonlocal", "not", "object",
    "or", "pass", "print", "raise", "range", "return", "set", "sorted", "str", "sum", "try",
    "tuple", "type", "while", "with", "yield", "zip",
];

/// Sanitize a display name into a valid rulename: whitespace, path and dot
/// separators become underscores, parentheses are stripped, the result is
/// lowercased and nudged off reserved words.
pub fn wrangle_rule_name(name: &str) -> String {
    let cleaned = name
        .replace(' ', "_")
        .replace('/', "_")
        .replace('.', "_")
        .replace('(', "")
        .replace(')', "")
        .to_lowercase();
    wrangle_if_reserved(cleaned)
}

fn wrangle_if_reserved(name: String) -> String {
    if RESERVED_WORDS.contains(&name.as_str()) {
        wrangle_if_reserved(name + "_")
    } else {
        name
    }
}

/// Connector spec: `map: [source, target]`.
///
/// The source is either a plain module name (single-input form) or a
/// mapping of target port refs to module names.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorSpec {
    pub map: (ConnectorSource, String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConnectorSource {
    Single(String),
    ByPort(BTreeMap<String, String>),
}

/// The composed workflow graph.
pub struct Model {
    pub nodes: Vec<Node>,
    pub alerts: Option<WorkflowAlerts>,
    partial_build: bool,
    fetcher: Arc<SourceFetcher>,
}

impl Model {
    pub fn new() -> Self {
        Self::with_fetcher(Arc::new(SourceFetcher::new()))
    }

    pub fn with_fetcher(fetcher: Arc<SourceFetcher>) -> Self {
        Self {
            nodes: Vec::new(),
            alerts: None,
            partial_build: false,
            fetcher,
        }
    }

    /// Partial builds drop connectors whose nodes are missing instead of
    /// failing the request.
    pub fn set_partial_build(&mut self, partial_build: bool) {
        self.partial_build = partial_build;
    }

    pub fn partial_build(&self) -> bool {
        self.partial_build
    }

    pub(crate) fn fetcher(&self) -> &Arc<SourceFetcher> {
        &self.fetcher
    }

    // ─────────────────────────────────────────────────────────────
    // Construction & wiring
    // ─────────────────────────────────────────────────────────────

    /// Add a module node. Always succeeds; the rulename is wrangled unique
    /// and the namespace pinned to it.
    pub fn add_module(&mut self, name: &str, spec: ModuleSpec) -> &mut Node {
        let rulename = spec
            .rulename
            .unwrap_or_else(|| self.wrangle_name(name));
        let ports = match spec.config.get("ports") {
            Some(v) => ports_from_value(v).unwrap_or_default(),
            None => port_spec(spec.config.get("input_namespace").unwrap_or(&Value::Null)),
        };
        let node = Node {
            name: name.to_string(),
            rulename: rulename.clone(),
            nodetype: spec.nodetype.unwrap_or(NodeType::Module),
            config: spec.config,
            ports,
            namespace: rulename,
            snakefile: spec.snakefile,
        };
        debug!(name, rulename = %node.rulename, "added module");
        self.nodes.push(node);
        self.nodes.last_mut().expect("node just pushed")
    }

    /// Apply a connector: rebind the target's ports to the source
    /// module(s). Missing nodes fail the build unless this is a partial
    /// build, in which case the connector is dropped.
    pub fn add_connector(&mut self, name: &str, spec: &ConnectorSpec) -> Result<()> {
        let (source, target) = &spec.map;
        let Some(target_ix) = self.index_by_name(target) else {
            if self.partial_build {
                debug!(connector = name, target = %target, "target missing, connector dropped");
                return Ok(());
            }
            return Err(TrellisError::NodeNotFound {
                name: target.clone(),
            });
        };
        match source {
            ConnectorSource::ByPort(map) => {
                let mut resolved: Vec<(String, String)> = Vec::with_capacity(map.len());
                for (port_ref, module) in map {
                    match self.index_by_name(module) {
                        Some(ix) => {
                            resolved.push((port_ref.clone(), self.nodes[ix].namespace.clone()))
                        }
                        None if self.partial_build => {
                            debug!(connector = name, module = %module, "source missing, connector dropped");
                            return Ok(());
                        }
                        None => {
                            return Err(TrellisError::NodeNotFound {
                                name: module.clone(),
                            })
                        }
                    }
                }
                let node = &mut self.nodes[target_ix];
                for (port_ref, namespace) in resolved {
                    if let Some(port) = node.ports.iter_mut().find(|p| p.ref_id == port_ref) {
                        port.namespace = namespace;
                    }
                }
            }
            ConnectorSource::Single(module) => {
                let Some(source_ix) = self.index_by_name(module) else {
                    if self.partial_build {
                        debug!(connector = name, module = %module, "source missing, connector dropped");
                        return Ok(());
                    }
                    return Err(TrellisError::NodeNotFound {
                        name: module.clone(),
                    });
                };
                let namespace = self.nodes[source_ix].namespace.clone();
                self.nodes[target_ix].ports = port_spec(&Value::String(namespace));
            }
        }
        Ok(())
    }

    /// Wrangle a unique rulename for a display name, disambiguating
    /// collisions with a numeric suffix.
    pub fn wrangle_name(&self, basename: &str) -> String {
        let name = wrangle_rule_name(basename);
        let taken = self.wrangled_name_list();
        let mut wrangled = name.clone();
        let mut offset = 1;
        while taken.iter().any(|t| *t == wrangled) {
            wrangled = format!("{name}_{offset}");
            offset += 1;
        }
        wrangled
    }

    pub fn wrangled_name_list(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.rulename.as_str()).collect()
    }

    // ─────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────

    fn index_by_name(&self, name: &str) -> Option<usize> {
        let name = name.to_lowercase();
        self.nodes
            .iter()
            .position(|n| n.name.to_lowercase() == name)
    }

    pub fn get_node_by_name(&self, name: &str) -> Option<&Node> {
        self.index_by_name(name).map(|ix| &self.nodes[ix])
    }

    pub fn get_node_by_rulename(&self, rulename: &str) -> Option<&Node> {
        let rulename = rulename.to_lowercase();
        self.nodes.iter().find(|n| n.rulename == rulename)
    }

    pub(crate) fn get_node_by_rulename_mut(&mut self, rulename: &str) -> Option<&mut Node> {
        let rulename = rulename.to_lowercase();
        self.nodes.iter_mut().find(|n| n.rulename == rulename)
    }

    /// Rulename for an exact display name, if present.
    pub fn lookup_rulename(&self, name: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .map(|n| n.rulename.as_str())
    }

    pub fn lookup_rulenames(&self, names: &[&str]) -> Vec<Option<String>> {
        names
            .iter()
            .map(|name| self.lookup_rulename(name).map(str::to_string))
            .collect()
    }

    /// True when no port anywhere references this node's output.
    pub fn node_is_terminus(&self, rulename: &str) -> bool {
        !self
            .nodes
            .iter()
            .flat_map(|n| n.ports.iter())
            .any(|p| p.namespace == rulename)
    }

    pub fn get_module_names(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.nodetype == NodeType::Module)
            .map(|n| n.rulename.clone())
            .collect()
    }

    pub fn get_rulenames(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.rulename.clone()).collect()
    }

    pub fn get_input_namespaces(&self) -> Vec<String> {
        self.nodes
            .iter()
            .flat_map(|n| n.ports.iter())
            .map(|p| p.namespace.clone())
            .filter(|ns| !ns.is_empty())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────
    // Orphan analysis
    // ─────────────────────────────────────────────────────────────

    /// Ports whose namespace matches no node in the model, re-exposed as
    /// composite-level ports with provenance back to the inner port.
    pub fn expose_orphan_inputs(&self) -> Vec<Port> {
        let all_namespaces: HashSet<&str> =
            self.nodes.iter().map(|n| n.rulename.as_str()).collect();
        let mut module_ports = Vec::new();
        for node in &self.nodes {
            for port in &node.ports {
                if all_namespaces.contains(port.namespace.as_str()) {
                    continue; // port is connected
                }
                module_ports.push(Port {
                    ref_id: format!("{}${}", node.rulename, port.ref_id),
                    label: format!("{} ({})", port.ref_id, node.rulename),
                    namespace: port.namespace.clone(),
                    mapping: vec![PortMapping {
                        module: node.rulename.clone(),
                        port: port.ref_id.clone(),
                    }],
                });
            }
        }
        module_ports
    }

    /// Orphan input namespaces only (no provenance).
    pub fn expose_orphan_inputs_list(&self) -> Vec<String> {
        self.expose_orphan_inputs()
            .into_iter()
            .map(|p| p.namespace)
            .collect()
    }

    /// Nodes whose namespace no port references: the pipeline termini.
    pub fn expose_orphan_outputs(&self) -> Vec<String> {
        let input_namespaces: HashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.ports.iter())
            .map(|p| p.namespace.as_str())
            .collect();
        self.nodes
            .iter()
            .filter(|n| !input_namespaces.contains(n.namespace.as_str()))
            .map(|n| n.rulename.clone())
            .collect()
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with_input(input_namespace: &str) -> ModuleSpec {
        let config: Value =
            serde_yaml::from_str(&format!("input_namespace: {input_namespace}")).unwrap();
        ModuleSpec::with_config(config)
    }

    #[test]
    fn wrangle_rule_name_sanitizes_separators() {
        assert_eq!(
            wrangle_rule_name("replace/special.and.(remove).brackets/but_not_underscores"),
            "replace_special_and_remove_brackets_but_not_underscores"
        );
    }

    #[test]
    fn wrangle_rule_name_avoids_reserved_words() {
        assert_eq!(wrangle_rule_name("map"), "map_");
        assert_eq!(wrangle_rule_name("Filter"), "filter_");
        assert_eq!(wrangle_rule_name("mapper"), "mapper");
    }

    #[test]
    fn duplicate_names_get_distinct_rulenames() {
        let mut m = Model::new();
        m.add_module("module", ModuleSpec::default());
        m.add_module("module", ModuleSpec::default());
        m.add_module("module", ModuleSpec::default());
        let rulenames = m.get_rulenames();
        assert_eq!(rulenames, vec!["module", "module_1", "module_2"]);
    }

    #[test]
    fn namespace_tracks_rulename_at_creation() {
        let mut m = Model::new();
        let node = m.add_module("My Module", ModuleSpec::default());
        assert_eq!(node.rulename, "my_module");
        assert_eq!(node.namespace, "my_module");
    }

    #[test]
    fn connector_single_form_rebinds_target_ports() {
        let mut m = Model::new();
        m.add_module("module1", ModuleSpec::default());
        m.add_module("module2", spec_with_input("placeholder"));
        let spec = ConnectorSpec {
            map: (ConnectorSource::Single("module1".into()), "module2".into()),
        };
        m.add_connector("join", &spec).unwrap();
        let m2 = m.get_node_by_name("module2").unwrap();
        assert_eq!(m2.ports.len(), 1);
        assert_eq!(m2.ports[0].namespace, "module1");
    }

    #[test]
    fn connector_by_port_form_rebinds_by_ref() {
        let mut m = Model::new();
        m.add_module("module1", ModuleSpec::default());
        m.add_module("module2", spec_with_input("in1"));
        let config: Value =
            serde_yaml::from_str("ports:\n- ref: in2a\n  label: A\n  namespace: p1\n- ref: in2b\n  label: B\n  namespace: p2")
                .unwrap();
        m.add_module("module3", ModuleSpec::with_config(config));
        let mut map = BTreeMap::new();
        map.insert("in2a".to_string(), "module1".to_string());
        map.insert("in2b".to_string(), "module2".to_string());
        let spec = ConnectorSpec {
            map: (ConnectorSource::ByPort(map), "module3".into()),
        };
        m.add_connector("join", &spec).unwrap();
        let m3 = m.get_node_by_name("module3").unwrap();
        assert_eq!(m3.ports[0].namespace, "module1");
        assert_eq!(m3.ports[1].namespace, "module2");
    }

    #[test]
    fn connector_with_missing_target_fails() {
        let mut m = Model::new();
        m.add_module("module1", ModuleSpec::default());
        let spec = ConnectorSpec {
            map: (ConnectorSource::Single("module1".into()), "ghost".into()),
        };
        let err = m.add_connector("join", &spec).unwrap_err();
        assert!(matches!(err, TrellisError::NodeNotFound { name } if name == "ghost"));
    }

    #[test]
    fn partial_build_drops_dangling_connectors() {
        let mut m = Model::new();
        m.set_partial_build(true);
        m.add_module("module1", ModuleSpec::default());
        let spec = ConnectorSpec {
            map: (ConnectorSource::Single("ghost".into()), "module1".into()),
        };
        assert!(m.add_connector("join", &spec).is_ok());
    }

    #[test]
    fn lookup_is_case_insensitive_for_names() {
        let mut m = Model::new();
        m.add_module("Align Reads", ModuleSpec::default());
        assert!(m.get_node_by_name("align reads").is_some());
        assert!(m.get_node_by_rulename("ALIGN_READS").is_some());
        assert_eq!(m.lookup_rulename("Align Reads"), Some("align_reads"));
        assert_eq!(m.lookup_rulename("align reads"), None);
    }

    #[test]
    fn orphan_inputs_track_connection_state() {
        let mut m = Model::new();
        m.add_module("module1", ModuleSpec::default());
        m.add_module("module2", spec_with_input("dangling"));
        let orphans = m.expose_orphan_inputs();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].ref_id, "module2$in");
        assert_eq!(orphans[0].label, "in (module2)");
        assert_eq!(orphans[0].namespace, "dangling");
        assert_eq!(orphans[0].mapping[0].module, "module2");
        assert_eq!(orphans[0].mapping[0].port, "in");

        // connect it and the orphan disappears
        let spec = ConnectorSpec {
            map: (ConnectorSource::Single("module1".into()), "module2".into()),
        };
        m.add_connector("join", &spec).unwrap();
        assert!(m.expose_orphan_inputs().is_empty());
    }

    #[test]
    fn orphan_outputs_are_unreferenced_nodes() {
        let mut m = Model::new();
        m.add_module("module1", ModuleSpec::default());
        m.add_module("module2", spec_with_input("module1"));
        assert_eq!(m.expose_orphan_outputs(), vec!["module2"]);
        assert!(m.node_is_terminus("module2"));
        assert!(!m.node_is_terminus("module1"));
    }
}
