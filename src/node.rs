//! Graph nodes and their workflow source locators

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{Result, TrellisError};
use crate::ports::Port;

/// Path fragment identifying the workflow file inside a module tree
pub const WORKFLOW_FILE: &str = "workflow/Snakefile";
/// Path fragment identifying the parameter file inside a module tree
pub const CONFIG_FILE: &str = "config/config.yaml";

/// Node kind. Connectors are applied as wiring operations during
/// construction and never stored in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Module,
    Connector,
    Source,
    Terminal,
}

impl NodeType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "module" => Some(NodeType::Module),
            "connector" => Some(NodeType::Connector),
            "source" => Some(NodeType::Source),
            "terminal" => Some(NodeType::Terminal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Module => "module",
            NodeType::Connector => "connector",
            NodeType::Source => "source",
            NodeType::Terminal => "terminal",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locator for a module's workflow source.
///
/// Local sources are plain paths; remote sources carry the fetch function
/// and its arguments as authored in the parameter file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Snakefile {
    Local(PathBuf),
    Remote {
        function: String,
        args: Vec<String>,
        #[serde(default)]
        kwargs: Mapping,
    },
}

impl Snakefile {
    pub fn github(repo: impl Into<String>, kwargs: Mapping) -> Self {
        Snakefile::Remote {
            function: "github".into(),
            args: vec![repo.into()],
            kwargs,
        }
    }

    /// Derive the parameter-file locator from the workflow locator.
    pub fn config_source(&self) -> Result<Snakefile> {
        match self {
            Snakefile::Local(path) => {
                let p = path.to_string_lossy().replace(WORKFLOW_FILE, CONFIG_FILE);
                Ok(Snakefile::Local(PathBuf::from(p)))
            }
            Snakefile::Remote {
                function,
                args,
                kwargs,
            } => {
                let mut kwargs = kwargs.clone();
                let path = self.remote_path()?.replace(WORKFLOW_FILE, CONFIG_FILE);
                kwargs.insert(Value::from("path"), Value::from(path));
                Ok(Snakefile::Remote {
                    function: function.clone(),
                    args: args.clone(),
                    kwargs,
                })
            }
        }
    }

    fn kwarg(&self, key: &str) -> Option<&str> {
        match self {
            Snakefile::Local(_) => None,
            Snakefile::Remote { kwargs, .. } => {
                kwargs.get(Value::from(key)).and_then(Value::as_str)
            }
        }
    }

    /// `owner/repo` argument of a remote locator.
    pub fn remote_repo(&self) -> Result<&str> {
        match self {
            Snakefile::Remote { args, .. } => {
                args.first().map(String::as_str).ok_or_else(|| {
                    TrellisError::MissingRemoteField {
                        field: "a repository",
                        locator: self.to_string(),
                    }
                })
            }
            Snakefile::Local(_) => Err(TrellisError::SourceKind {
                expected: "remote",
                locator: self.to_string(),
            }),
        }
    }

    pub fn remote_owner_repo(&self) -> Result<(&str, &str)> {
        let repo = self.remote_repo()?;
        repo.split_once('/')
            .ok_or_else(|| TrellisError::MissingRemoteField {
                field: "an owner/repo pair",
                locator: self.to_string(),
            })
    }

    /// Branch, tag or commit of a remote locator, in that precedence.
    pub fn remote_reference(&self) -> Result<&str> {
        self.kwarg("branch")
            .or_else(|| self.kwarg("tag"))
            .or_else(|| self.kwarg("commit"))
            .ok_or_else(|| TrellisError::MissingRemoteField {
                field: "a branch, tag or commit",
                locator: self.to_string(),
            })
    }

    /// Repository-relative path of a remote locator.
    pub fn remote_path(&self) -> Result<&str> {
        self.kwarg("path")
            .ok_or_else(|| TrellisError::MissingRemoteField {
                field: "a path",
                locator: self.to_string(),
            })
    }

    /// Check a remote locator is well-formed and supported.
    pub fn validate_remote(&self) -> Result<()> {
        match self {
            Snakefile::Local(_) => Err(TrellisError::SourceKind {
                expected: "remote",
                locator: self.to_string(),
            }),
            Snakefile::Remote { function, .. } => {
                if function != "github" {
                    return Err(TrellisError::UnsupportedFetchFunction {
                        function: function.clone(),
                    });
                }
                self.remote_owner_repo()?;
                self.remote_reference()?;
                self.remote_path()?;
                Ok(())
            }
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Snakefile::Local(_))
    }

    pub fn to_value(&self) -> Value {
        serde_yaml::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Snakefile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Snakefile::Local(path) => write!(f, "{}", path.display()),
            Snakefile::Remote {
                function,
                args,
                kwargs,
            } => {
                let kwargs: Vec<String> = kwargs
                    .iter()
                    .map(|(k, v)| {
                        format!(
                            "{}={}",
                            k.as_str().unwrap_or("?"),
                            v.as_str().unwrap_or("?")
                        )
                    })
                    .collect();
                write!(f, "{}({}, {})", function, args.join(", "), kwargs.join(", "))
            }
        }
    }
}

/// Module spec accepted by `Model::add_module`: the `config` member of a
/// build-request entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleSpec {
    /// Preset rulename; wrangled from the display name when absent
    #[serde(default)]
    pub rulename: Option<String>,
    /// Workflow source locator
    #[serde(default)]
    pub snakefile: Option<Snakefile>,
    /// The module's own configuration tree
    #[serde(default = "empty_mapping")]
    pub config: Value,
    /// Explicit node kind; defaults to module
    #[serde(default)]
    pub nodetype: Option<NodeType>,
}

impl Default for ModuleSpec {
    fn default() -> Self {
        Self {
            rulename: None,
            snakefile: None,
            config: empty_mapping(),
            nodetype: None,
        }
    }
}

impl ModuleSpec {
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_yaml::from_value(value.clone())?)
    }

    pub fn with_config(config: Value) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }
}

fn empty_mapping() -> Value {
    Value::Mapping(Mapping::new())
}

/// A vertex of the composed workflow graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// Display name, as authored in the build request
    pub name: String,
    /// Sanitized unique identifier; key into the generated parameter file
    pub rulename: String,
    pub nodetype: NodeType,
    /// The module's own configuration tree (never mutated by resolution)
    pub config: Value,
    pub ports: Vec<Port>,
    /// Output identifier other nodes' ports reference
    pub namespace: String,
    pub snakefile: Option<Snakefile>,
}

impl Node {
    /// Workflow source, or a structured error naming the node.
    pub fn source(&self) -> Result<&Snakefile> {
        self.snakefile
            .as_ref()
            .ok_or_else(|| TrellisError::MissingSource {
                rulename: self.rulename.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github_locator(path: &str) -> Snakefile {
        let mut kwargs = Mapping::new();
        kwargs.insert(Value::from("path"), Value::from(path));
        kwargs.insert(Value::from("branch"), Value::from("main"));
        Snakefile::github("octo/pipelines", kwargs)
    }

    #[test]
    fn local_config_source_swaps_workflow_for_config() {
        let src = Snakefile::Local(PathBuf::from(
            "repo/workflows/proj/modules/align/workflow/Snakefile",
        ));
        let cfg = src.config_source().unwrap();
        assert_eq!(
            cfg,
            Snakefile::Local(PathBuf::from(
                "repo/workflows/proj/modules/align/config/config.yaml"
            ))
        );
    }

    #[test]
    fn remote_config_source_rewrites_kwarg_path() {
        let src = github_locator("workflows/proj/modules/align/workflow/Snakefile");
        let cfg = src.config_source().unwrap();
        assert_eq!(
            cfg.remote_path().unwrap(),
            "workflows/proj/modules/align/config/config.yaml"
        );
        assert_eq!(cfg.remote_reference().unwrap(), "main");
    }

    #[test]
    fn locator_deserializes_untagged() {
        let local: Snakefile = serde_yaml::from_str("\"some/workflow/Snakefile\"").unwrap();
        assert!(local.is_local());

        let remote: Snakefile = serde_yaml::from_str(
            "function: github\nargs: [octo/pipelines]\nkwargs:\n  path: workflows/p/t/m/workflow/Snakefile\n  tag: v1.0",
        )
        .unwrap();
        assert_eq!(remote.remote_reference().unwrap(), "v1.0");
        assert_eq!(remote.remote_owner_repo().unwrap(), ("octo", "pipelines"));
    }

    #[test]
    fn remote_validation_requires_reference_and_path() {
        let mut kwargs = Mapping::new();
        kwargs.insert(Value::from("path"), Value::from("workflows/a/b/c/workflow/Snakefile"));
        let no_ref = Snakefile::github("octo/pipelines", kwargs);
        assert!(matches!(
            no_ref.validate_remote(),
            Err(TrellisError::MissingRemoteField { field: "a branch, tag or commit", .. })
        ));

        let mut kwargs = Mapping::new();
        kwargs.insert(Value::from("branch"), Value::from("main"));
        let no_path = Snakefile::github("octo/pipelines", kwargs);
        assert!(matches!(
            no_path.validate_remote(),
            Err(TrellisError::MissingRemoteField { field: "a path", .. })
        ));

        let unsupported = Snakefile::Remote {
            function: "gitlab".into(),
            args: vec!["octo/pipelines".into()],
            kwargs: Mapping::new(),
        };
        assert!(matches!(
            unsupported.validate_remote(),
            Err(TrellisError::UnsupportedFetchFunction { .. })
        ));
    }

    #[test]
    fn nodetype_parses_case_insensitively() {
        assert_eq!(NodeType::parse("Module"), Some(NodeType::Module));
        assert_eq!(NodeType::parse("SOURCE"), Some(NodeType::Source));
        assert_eq!(NodeType::parse("widget"), None);
    }
}
