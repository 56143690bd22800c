//! Recursive module expansion
//!
//! A composite module's workflow declares its sub-modules; expansion
//! replaces the composite node with the flat graph of those sub-modules,
//! rewiring every external edge so the surrounding graph is undisturbed.
//! `expand_all_modules` drives this to a fixed point, so arbitrarily
//! nested composites flatten to leaves.

use std::collections::HashMap;

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{Result, TrellisError};
use crate::model::Model;
use crate::node::ModuleSpec;
use crate::source::list_declared_modules;

/// Ancestor display names per expansion chain, keyed by rulename.
type Lineages = HashMap<String, Vec<String>>;

impl Model {
    /// Expand one module into its constituent sub-modules.
    ///
    /// Leaf modules (no nested declarations with config entries) are left
    /// unchanged. Returns the rulenames of the nodes that replaced the
    /// module, or an empty list for a leaf.
    pub async fn expand_module(&mut self, rulename: &str) -> Result<Vec<String>> {
        let mut lineages = Lineages::new();
        self.expand_module_inner(rulename, &mut lineages).await
    }

    /// Expand all modules recursively until the module list stops
    /// changing.
    pub async fn expand_all_modules(&mut self) -> Result<()> {
        let mut lineages = Lineages::new();
        let mut previous: Vec<String> = Vec::new();
        loop {
            let modules = self.get_module_names();
            if modules == previous {
                break;
            }
            previous = modules.clone();
            for rulename in modules {
                // may already have been replaced earlier in this round
                if self.get_node_by_rulename(&rulename).is_none() {
                    continue;
                }
                self.expand_module_inner(&rulename, &mut lineages).await?;
            }
        }
        Ok(())
    }

    async fn expand_module_inner(
        &mut self,
        rulename: &str,
        lineages: &mut Lineages,
    ) -> Result<Vec<String>> {
        // Identify node
        let node = self
            .get_node_by_rulename(rulename)
            .ok_or_else(|| TrellisError::RuleNotFound {
                rulename: rulename.to_string(),
            })?;
        if node.nodetype != crate::node::NodeType::Module {
            return Err(TrellisError::NotAModule {
                rulename: rulename.to_string(),
            });
        }
        let parent_name = node.name.clone();
        let parent_rulename = node.rulename.clone();
        let parent_namespace = node.namespace.clone();
        let parent_ports = node.ports.clone();
        let source = node.source()?.clone();

        // Read the module spec (workflow, parameter file) from source
        let fetcher = self.fetcher().clone();
        let workflow_text = fetcher.read_workflow(&source).await?;
        let config: Value = serde_yaml::from_str(&fetcher.read_config(&source).await?)?;

        // Narrow declared modules to those with parameter-file entries;
        // not every config key is a sub-module.
        let submodules: Vec<String> = list_declared_modules(&workflow_text)
            .into_iter()
            .filter(|m| config.get(m.as_str()).is_some())
            .collect();
        if submodules.is_empty() {
            return Ok(Vec::new());
        }
        debug!(rulename, count = submodules.len(), "expanding module");

        // Fail fast on a module that includes itself through its own
        // sub-modules; acyclicity is otherwise taken on trust.
        let lineage = lineages.get(rulename).cloned().unwrap_or_default();
        if let Some(hit) = submodules
            .iter()
            .find(|m| **m == parent_name || lineage.contains(*m))
        {
            let mut chain = lineage.clone();
            chain.push(parent_name.clone());
            return Err(TrellisError::ExpansionCycle {
                module: hit.clone(),
                chain,
            });
        }
        let mut child_lineage = lineage;
        child_lineage.push(parent_name);

        // Keep record of orphan namespaces before expansion
        let orphan_outputs_prior = self.expose_orphan_outputs();

        // Add new nodes
        let mut rulemapping: HashMap<String, String> = HashMap::new();
        let mut new_rulenames: Vec<String> = Vec::with_capacity(submodules.len());
        for m in &submodules {
            let entry = config.get(m.as_str()).expect("filtered on presence");
            let sub_config = entry
                .get("config")
                .cloned()
                .unwrap_or_else(|| Value::Mapping(Mapping::new()));
            let snakefile = entry
                .get("snakefile")
                .and_then(|v| serde_yaml::from_value(v.clone()).ok());
            let spec = ModuleSpec {
                rulename: None,
                snakefile,
                config: sub_config,
                nodetype: None,
            };
            let node = self.add_module(m, spec);
            // Restore the namespace the sub-module recorded when its own
            // composite was saved
            let recorded = node
                .config
                .get("namespace")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(ns) = recorded {
                node.namespace = ns;
            }
            let new_rulename = node.rulename.clone();
            if *m != new_rulename {
                rulemapping.insert(m.clone(), new_rulename.clone());
            }
            lineages.insert(new_rulename.clone(), child_lineage.clone());
            new_rulenames.push(new_rulename);
        }

        // Ensure namespace consistency between new nodes after rename
        for rn in &new_rulenames {
            let node = self
                .get_node_by_rulename_mut(rn)
                .expect("node just added");
            if let Some(mapped) = rulemapping.get(&node.namespace) {
                node.namespace = mapped.clone();
            }
            for port in &mut node.ports {
                if let Some(mapped) = rulemapping.get(&port.namespace) {
                    port.namespace = mapped.clone();
                }
            }
        }

        // The expansion may surface at most one new orphan output; the
        // sort keeps rulename wrangling stable across runs
        let mut new_orphan_outputs: Vec<String> = self
            .expose_orphan_outputs()
            .into_iter()
            .filter(|o| !orphan_outputs_prior.contains(o))
            .collect();
        new_orphan_outputs.sort();
        if new_orphan_outputs.len() > 1 {
            return Err(TrellisError::MultipleOrphanOutputs {
                namespaces: new_orphan_outputs,
            });
        }

        // Preserve incoming connections to the parent node
        for port in &parent_ports {
            let Some(mapping) = port.mapping.first() else {
                continue;
            };
            let mut target_module = mapping.module.clone();
            if let Some(mapped) = rulemapping.get(&target_module) {
                target_module = mapped.clone();
            }
            let target_port = mapping.port.clone();
            let target_node = self.get_node_by_rulename_mut(&target_module).ok_or_else(|| {
                TrellisError::RuleNotFound {
                    rulename: target_module.clone(),
                }
            })?;
            for p in &mut target_node.ports {
                if p.ref_id == target_port {
                    p.namespace = port.namespace.clone();
                }
            }
        }

        // Preserve outgoing connections from the parent node
        if let Some(new_output) = new_orphan_outputs.first() {
            for node in &mut self.nodes {
                for port in &mut node.ports {
                    if port.namespace == parent_namespace {
                        port.namespace = new_output.clone();
                    }
                }
            }
        }

        // Remove the expanded node from the model
        self.nodes.retain(|n| n.rulename != parent_rulename);

        Ok(new_rulenames)
    }
}
