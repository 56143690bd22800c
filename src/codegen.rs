//! Code generation
//!
//! Turns a composed model into its two artifacts: the workflow script
//! (one module-import block per node, parameters reached through the
//! config file rather than inlined, so the parameter file can be edited
//! without regenerating the script) and the parameter file itself.

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{Result, TrellisError};
use crate::model::Model;
use crate::node::Snakefile;
use crate::ports::ports_to_value;
use crate::quoted_yaml;

/// Default parameter-file reference emitted at the top of the workflow
pub const DEFAULT_CONFIGFILE: &str = "config/config.yaml";

impl Model {
    /// Build the workflow script, linking the composed modules.
    pub fn build_snakefile(&self, configfile: Option<&str>) -> String {
        let mut s = String::new();
        if let Some(configfile) = configfile {
            s.push_str(&format!("configfile: \"{configfile}\"\n"));
        }
        for node in &self.nodes {
            let rulename = &node.rulename;
            s.push('\n');
            s.push_str(&format!("module {rulename}:\n"));
            s.push_str("    snakefile:\n");
            match &node.snakefile {
                Some(Snakefile::Remote { .. }) => {
                    // dynamic evaluation of the fetch function named in
                    // the parameter file
                    s.push_str(&format!(
                        "        globals().get(config[\"{rulename}\"][\"snakefile\"][\"function\"])(\n"
                    ));
                    s.push_str(&format!(
                        "            *config[\"{rulename}\"][\"snakefile\"][\"args\"],\n"
                    ));
                    s.push_str(&format!(
                        "            **config[\"{rulename}\"][\"snakefile\"][\"kwargs\"],\n"
                    ));
                    s.push_str("        )\n");
                }
                _ => {
                    s.push_str(&format!("        config[\"{rulename}\"][\"snakefile\"]\n"));
                }
            }
            s.push_str("    config:\n");
            s.push_str(&format!("        config[\"{rulename}\"][\"config\"]\n"));
            s.push_str(&format!(
                "use rule * from {rulename} exclude _test as {rulename}_*\n"
            ));
        }
        if let Some(alerts) = &self.alerts {
            s.push_str(&alerts.render_blocks());
        }
        s
    }

    /// Build the parameter file as a value tree: composite-level ports
    /// and namespace at the root, one entry per node keyed by rulename.
    pub fn construct_snakefile_config(&self) -> Result<Value> {
        let mut c = Mapping::new();
        c.insert(
            Value::from("ports"),
            ports_to_value(&self.expose_orphan_inputs()),
        );
        let outputs = self.expose_orphan_outputs();
        match outputs.as_slice() {
            // no orphan output: the model forms a terminal composite
            [] => {
                debug!("model has no orphan outputs; terminal composite");
            }
            [single] => {
                c.insert(Value::from("namespace"), Value::from(single.clone()));
            }
            _ => {
                return Err(TrellisError::MultipleOrphanOutputs {
                    namespaces: outputs,
                });
            }
        }

        for node in &self.nodes {
            let mut cnode = match self.resolve_parameter_links(&node.config)? {
                Value::Mapping(map) => map,
                _ => Mapping::new(),
            };

            // Input ports; an authored ports entry wins
            if node.ports.is_empty() {
                cnode.insert(Value::from("ports"), Value::Sequence(Vec::new()));
            } else if !cnode.contains_key(Value::from("ports")) {
                cnode.insert(Value::from("ports"), ports_to_value(&node.ports));
            }

            // Output namespace
            cnode.insert(Value::from("namespace"), Value::from(node.namespace.clone()));

            let mut entry = Mapping::new();
            entry.insert(Value::from("name"), Value::from(node.name.clone()));
            entry.insert(Value::from("type"), Value::from(node.nodetype.as_str()));
            entry.insert(
                Value::from("snakefile"),
                node.snakefile
                    .as_ref()
                    .map(Snakefile::to_value)
                    .unwrap_or(Value::Null),
            );
            entry.insert(Value::from("config"), Value::Mapping(cnode));
            c.insert(Value::from(node.rulename.clone()), Value::Mapping(entry));
        }
        Ok(Value::Mapping(c))
    }

    /// Build the parameter file as quoted block YAML.
    pub fn build_snakefile_config(&self) -> Result<String> {
        Ok(quoted_yaml::dump(&self.construct_snakefile_config()?))
    }
}

/// Transcribe YAML into the workflow tool's Python config-assignment
/// dialect, used to flatten the parameter file into a single-file build.
pub fn yaml_to_config(content: &str) -> Result<String> {
    let doc: Value = serde_yaml::from_str(content)?;
    let Value::Mapping(map) = &doc else {
        return Ok("config={}\n".to_string());
    };
    let body = parse_struct(map);
    let lines: Vec<String> = body
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| format!("config{l}"))
        .collect();
    Ok(format!("config={{}}\n{}\n", lines.join("\n")))
}

fn parse_struct(map: &Mapping) -> String {
    let mut c = String::new();
    for (key, value) in map {
        let key = plain_key(key);
        match value {
            Value::Mapping(m) => {
                c.push_str(&format!("[\"{key}\"]={{}}\n"));
                for line in parse_struct(m).lines().filter(|l| !l.is_empty()) {
                    c.push_str(&format!("[\"{key}\"]{line}\n"));
                }
            }
            Value::Sequence(items) => {
                c.push_str(&format!("[\"{key}\"]=[]\n"));
                for item in items {
                    match item {
                        Value::Mapping(_) | Value::Sequence(_) => {
                            c.push_str(&format!(
                                "[\"{key}\"].append({})\n",
                                python_literal(item)
                            ));
                        }
                        Value::Null => {
                            c.push_str(&format!("[\"{key}\"].append(\"None\")\n"));
                        }
                        other => {
                            c.push_str(&format!(
                                "[\"{key}\"].append(\"{}\")\n",
                                plain_scalar(other)
                            ));
                        }
                    }
                }
            }
            Value::Null => {
                c.push_str(&format!("[\"{key}\"]=\"None\"\n"));
            }
            other => {
                c.push_str(&format!("[\"{key}\"]=\"{}\"\n", plain_scalar(other)));
            }
        }
    }
    c
}

fn plain_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => plain_scalar(other),
    }
}

/// Scalar rendered the way the host language prints it.
fn plain_scalar(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

/// Render a value as a Python literal (for list items that are
/// containers).
fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Sequence(items) => {
            let rendered: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Mapping(map) => {
            let rendered: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", python_literal(k), python_literal(v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        Value::Tagged(tagged) => python_literal(&tagged.value),
    }
}
