//! Parameter-link resolution
//!
//! A configuration value may declare that it takes its value from another
//! module's configuration: a sibling key `:name` carries
//! `{link: [module, "config", ...path, key]}`. Resolution follows link
//! chains eagerly and writes the resolved value into the output tree
//! only; source configurations are never touched.

use serde_yaml::Value;

use crate::error::{Result, TrellisError};
use crate::model::Model;

impl Model {
    /// Resolve every parameter link in a configuration tree, returning a
    /// new tree.
    pub fn resolve_parameter_links(&self, cnode: &Value) -> Result<Value> {
        let Value::Mapping(map) = cnode else {
            return Ok(cnode.clone());
        };
        let mut updated = map.clone();
        for (key, value) in map {
            let Some(key_str) = key.as_str() else {
                continue;
            };
            if let Some(param_name) = key_str.strip_prefix(':') {
                if value.get("link").is_some() {
                    let resolved = self.resolve_link_value(value)?;
                    updated.insert(Value::from(param_name), resolved);
                }
            } else if value.is_mapping() {
                updated.insert(key.clone(), self.resolve_parameter_links(value)?);
            }
        }
        Ok(Value::Mapping(updated))
    }

    /// Resolve one link marker to its literal value, chasing chained
    /// links in the referenced module's raw configuration.
    pub fn resolve_link_value(&self, metadata: &Value) -> Result<Value> {
        let link = metadata
            .get("link")
            .and_then(Value::as_sequence)
            .ok_or_else(|| TrellisError::BadLink {
                detail: "link marker is not a list".into(),
            })?;
        let segments: Vec<&str> = link.iter().filter_map(Value::as_str).collect();
        if segments.len() != link.len() || segments.len() < 3 {
            return Err(TrellisError::BadLink {
                detail: format!("link needs [module, \"config\", ..., key], got {link:?}"),
            });
        }

        let module_ref = segments[0];
        let linked = self
            .get_node_by_name(module_ref)
            .or_else(|| self.get_node_by_rulename(module_ref))
            .ok_or_else(|| TrellisError::LinkSourceNotFound {
                module: module_ref.to_string(),
            })?;
        if segments[1] != "config" {
            return Err(TrellisError::BadLink {
                detail: format!("link root must be \"config\", got \"{}\"", segments[1]),
            });
        }

        let mut cursor = &linked.config;
        for segment in &segments[2..segments.len() - 1] {
            cursor = cursor.get(segment).ok_or_else(|| TrellisError::BadLink {
                detail: format!("no \"{segment}\" under link path in '{module_ref}'"),
            })?;
        }
        let final_key = segments[segments.len() - 1];
        let value = cursor
            .get(final_key)
            .ok_or_else(|| TrellisError::BadLink {
                detail: format!("no \"{final_key}\" at link target in '{module_ref}'"),
            })?
            .clone();

        // A linked value may itself be linked; chase the chain
        let metadata_name = format!(":{final_key}");
        if let Some(next) = cursor.get(metadata_name.as_str()) {
            if next.get("link").is_some() {
                return self.resolve_link_value(next);
            }
        }
        Ok(value)
    }
}
