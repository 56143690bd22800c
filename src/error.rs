//! Error types with fix suggestions

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum TrellisError {
    // ─────────────────────────────────────────────────────────────
    // Reference errors (recoverable under partial builds)
    // ─────────────────────────────────────────────────────────────
    #[error("No matching node found for name '{name}'")]
    NodeNotFound { name: String },

    #[error("No matching node found for rulename '{rulename}'")]
    RuleNotFound { rulename: String },

    #[error("No matching node found for link source '{module}'")]
    LinkSourceNotFound { module: String },

    // ─────────────────────────────────────────────────────────────
    // Structural limitations
    // ─────────────────────────────────────────────────────────────
    #[error("More than one orphan output namespace: {namespaces:?}")]
    MultipleOrphanOutputs { namespaces: Vec<String> },

    #[error("Node '{rulename}' is not a module")]
    NotAModule { rulename: String },

    #[error("Module '{module}' appears in its own expansion chain: {chain:?}")]
    ExpansionCycle { module: String, chain: Vec<String> },

    #[error("Malformed parameter link: {detail}")]
    BadLink { detail: String },

    // ─────────────────────────────────────────────────────────────
    // Source locator errors
    // ─────────────────────────────────────────────────────────────
    #[error("Only the github function is supported for remote workflows, got '{function}'")]
    UnsupportedFetchFunction { function: String },

    #[error("Remote workflow requires {field} to be specified: {locator}")]
    MissingRemoteField { field: &'static str, locator: String },

    #[error("Module workflow is not in the expected folder structure: {path}")]
    BadModuleLayout { path: String },

    #[error("Node '{rulename}' has no workflow source")]
    MissingSource { rulename: String },

    #[error("Expected a {expected} workflow source, got: {locator}")]
    SourceKind {
        expected: &'static str,
        locator: String,
    },

    // ─────────────────────────────────────────────────────────────
    // External tool errors
    // ─────────────────────────────────────────────────────────────
    #[error("Request to {url} failed with status {status}")]
    RemoteApi { url: String, status: u16 },

    #[error("Dry run reported a non-recoverable failure\nstdout: {stdout}\nstderr: {stderr}")]
    DryRunFailed { stdout: String, stderr: String },

    #[error("Dry run output carried no affected-files section\nstdout: {stdout}\nstderr: {stderr}")]
    MissingFilesUnparsed { stdout: String, stderr: String },

    // ─────────────────────────────────────────────────────────────
    // Request / serialization / I/O
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid build request: {detail}")]
    InvalidRequest { detail: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, TrellisError>;

impl TrellisError {
    /// Reference errors are the only class a partial build may swallow.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            TrellisError::NodeNotFound { .. }
                | TrellisError::RuleNotFound { .. }
                | TrellisError::LinkSourceNotFound { .. }
        )
    }
}

impl FixSuggestion for TrellisError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TrellisError::NodeNotFound { .. } | TrellisError::RuleNotFound { .. } => {
                Some("Check connector names against the module list, or build with --partial")
            }
            TrellisError::LinkSourceNotFound { .. } => {
                Some("Parameter links must name a module in the same build request")
            }
            TrellisError::MultipleOrphanOutputs { .. } => {
                Some("Composite modules support a single output; connect the extra termini")
            }
            TrellisError::NotAModule { .. } => None,
            TrellisError::ExpansionCycle { .. } => {
                Some("Break the cycle: a module cannot include itself through its sub-modules")
            }
            TrellisError::BadLink { .. } => {
                Some("Links take the form [module, \"config\", ...path, key]")
            }
            TrellisError::UnsupportedFetchFunction { .. } => Some("Use function: github"),
            TrellisError::MissingRemoteField { .. } => {
                Some("Remote workflows need args: [owner/repo] and kwargs path plus branch, tag or commit")
            }
            TrellisError::BadModuleLayout { .. } => {
                Some("Modules live under <repo>/workflows/<project>/<type>/<name>/workflow/")
            }
            TrellisError::MissingSource { .. } => {
                Some("Give the module a snakefile entry (local path or github locator)")
            }
            TrellisError::SourceKind { .. } => None,
            TrellisError::RemoteApi { .. } => {
                Some("Check the repository, branch and path; unauthenticated API calls are rate-limited")
            }
            TrellisError::DryRunFailed { .. } => {
                Some("The workflow tool rejected the generated build; inspect stderr above")
            }
            TrellisError::MissingFilesUnparsed { .. } => None,
            TrellisError::InvalidRequest { .. } => {
                Some("Requests are a JSON list of {name, type, config} entries")
            }
            TrellisError::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
            TrellisError::Json(_) => Some("Check the request file is valid JSON"),
            TrellisError::Io(_) => Some("Check file paths and permissions"),
            TrellisError::Http(_) => Some("Check network access to the module repository"),
        }
    }
}
