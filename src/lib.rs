//! Trellis - composable pipeline builder
//!
//! Wires independently-authored workflow modules into a single Snakemake
//! workflow: a graph model of nodes, ports and namespaces; recursive
//! expansion of composite modules; parameter-link resolution; generators
//! for the workflow script and its parameter file; packaging of module
//! sources; and an iterative dependency probe that dry-runs the generated
//! build to discover a node's true upstream dependencies.

pub mod alerts;
pub mod build;
pub mod codegen;
pub mod error;
pub mod expand;
pub mod links;
pub mod model;
pub mod node;
pub mod package;
pub mod ports;
pub mod probe;
pub mod quoted_yaml;
pub mod request;
pub mod source;

pub use alerts::{process_workflow_alerts, WorkflowAlerts};
pub use build::{build_from_request, save_workflow, BuildOptions, BuiltWorkflow};
pub use codegen::{yaml_to_config, DEFAULT_CONFIGFILE};
pub use error::{FixSuggestion, Result, TrellisError};
pub use model::{wrangle_rule_name, ConnectorSpec, ConnectorSource, Model};
pub use node::{ModuleSpec, Node, NodeType, Snakefile};
pub use package::Packager;
pub use ports::{port_spec, Port, PortMapping};
pub use probe::{
    check_node_dependencies, missing_file_dependencies, DependencyReport, DryRunner, RunOutput,
    SnakemakeRunner,
};
pub use request::{parse_request, RequestEntry};
pub use source::{list_declared_modules, SourceFetcher};
