//! Build orchestration
//!
//! Turns a validated request into a model (two passes: modules first so
//! every namespace exists, then connectors), expands it, and renders or
//! saves the generated artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use serde_yaml::Value;
use tracing::{debug, info};

use crate::alerts::process_workflow_alerts;
use crate::codegen::DEFAULT_CONFIGFILE;
use crate::error::Result;
use crate::model::{ConnectorSpec, Model};
use crate::node::{ModuleSpec, NodeType};
use crate::package::Packager;
use crate::request::RequestEntry;
use crate::source::SourceFetcher;

/// Options controlling one build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Flatten nested modules before generating code
    pub expand: bool,
    /// Drop connectors with missing nodes instead of failing
    pub partial_build: bool,
    /// Where `save_workflow` writes the build tree
    pub build_path: PathBuf,
    /// Delete the build tree before writing
    pub clean_build: bool,
    /// Materialize module sources into the build tree
    pub package_modules: bool,
    /// Raw notification configuration, if any
    pub alerts: Option<Value>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            expand: true,
            partial_build: false,
            build_path: PathBuf::from("build"),
            clean_build: true,
            package_modules: false,
            alerts: None,
        }
    }
}

/// A generated workflow: both artifacts plus the model they came from.
pub struct BuiltWorkflow {
    pub config_text: String,
    pub snakefile_text: String,
    pub model: Model,
}

/// Build a workflow from request entries.
pub async fn build_from_request(
    entries: &[RequestEntry],
    fetcher: Arc<SourceFetcher>,
    options: &BuildOptions,
) -> Result<BuiltWorkflow> {
    debug!(entries = entries.len(), ?options, "building workflow");
    let mut model = Model::with_fetcher(fetcher);
    model.set_partial_build(options.partial_build);

    // Add modules first so every namespace exists before connectors run
    for entry in entries {
        let node_type = entry.node_type()?;
        if node_type == NodeType::Connector {
            continue;
        }
        let mut spec = ModuleSpec::from_value(&entry.config)?;
        spec.nodetype.get_or_insert(node_type);
        model.add_module(&entry.name, spec);
    }
    for entry in entries {
        if entry.node_type()? != NodeType::Connector {
            continue;
        }
        let spec: ConnectorSpec = serde_yaml::from_value(entry.config.clone())?;
        model.add_connector(&entry.name, &spec)?;
    }

    if let Some(alerts) = &options.alerts {
        model.alerts = Some(process_workflow_alerts(alerts));
    }

    if options.expand {
        model.expand_all_modules().await?;
    }

    let config_text = model.build_snakefile_config()?;
    let snakefile_text = model.build_snakefile(Some(DEFAULT_CONFIGFILE));
    Ok(BuiltWorkflow {
        config_text,
        snakefile_text,
        model,
    })
}

/// Write the generated workflow (and optionally its packaged modules) to
/// the build directory. Packaging rewrites source locators, so the
/// artifacts are regenerated afterwards.
pub async fn save_workflow(built: &mut BuiltWorkflow, options: &BuildOptions) -> Result<PathBuf> {
    let build_path = &options.build_path;
    if options.clean_build {
        let _ = tokio::fs::remove_dir_all(build_path).await;
    }
    tokio::fs::create_dir_all(build_path.join("config")).await?;
    tokio::fs::create_dir_all(build_path.join("workflow")).await?;

    if options.package_modules {
        let fetcher = built.model.fetcher().clone();
        let packager = Packager::new(build_path, fetcher);
        packager.package_all(&mut built.model).await?;
        built.config_text = built.model.build_snakefile_config()?;
        built.snakefile_text = built.model.build_snakefile(Some(DEFAULT_CONFIGFILE));
    }

    tokio::fs::write(build_path.join("workflow/Snakefile"), &built.snakefile_text).await?;
    tokio::fs::write(build_path.join("config/config.yaml"), &built.config_text).await?;
    info!(path = %build_path.display(), "workflow saved");
    Ok(build_path.clone())
}
