//! Dependency probe
//!
//! Discovers a composed workflow's true upstream file dependencies
//! without parsing any module's rules: the external pipeline tool is
//! treated as an oracle. The generated build is dry-run in an isolated
//! directory; every missing input it reports is touched as a placeholder
//! and the dry run repeated until the tool stops complaining. The
//! resulting file set tells us whether a target node's inputs are
//! reachable from the graph.
//!
//! The loop has no iteration cap; callers wanting a bound impose a
//! timeout around the whole probe call.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::build::{build_from_request, BuildOptions};
use crate::codegen::yaml_to_config;
use crate::error::{Result, TrellisError};
use crate::ports::ports_from_value;
use crate::request::RequestEntry;

/// Marker line preceding the missing-file list in dry-run output
const AFFECTED_FILES_MARKER: &str = "affected files:";
/// The one failure class the probe recovers from by touching files
const MISSING_INPUT_EXCEPTION: &str = "MissingInputException";

/// Captured output of one dry-run invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

/// External dry-run capability.
///
/// The production implementation shells out to the pipeline tool; tests
/// substitute scripted oracles.
#[async_trait]
pub trait DryRunner: Send + Sync {
    async fn dry_run(&self, snakefile: &Path, workdir: &Path) -> Result<RunOutput>;
}

/// Dry-runs a build through the `snakemake` executable.
pub struct SnakemakeRunner {
    executable: String,
}

impl SnakemakeRunner {
    pub fn new() -> Self {
        Self {
            executable: "snakemake".to_string(),
        }
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }
}

impl Default for SnakemakeRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DryRunner for SnakemakeRunner {
    async fn dry_run(&self, snakefile: &Path, workdir: &Path) -> Result<RunOutput> {
        let output = tokio::process::Command::new(&self.executable)
            .arg("--snakefile")
            .arg(snakefile)
            .arg("--d3dag")
            .current_dir(workdir)
            .output()
            .await?;
        Ok(RunOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Result of a node dependency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DependencyReport {
    Ok,
    Missing { unresolved: Vec<String> },
}

/// Extract the missing-file list from one dry run.
///
/// A non-empty stdout means the build succeeded; an empty stderr means
/// there is nothing to report. Any failure class other than a missing
/// input aborts the probe with the tool's raw output attached.
pub fn parse_missing_files(output: &RunOutput) -> Result<Vec<String>> {
    if !output.stdout.is_empty() {
        return Ok(Vec::new());
    }
    if output.stderr.is_empty() {
        return Ok(Vec::new());
    }
    let exceptions: HashSet<&str> = output
        .stderr
        .lines()
        .take(2)
        .filter_map(|line| line.split(' ').next())
        .filter(|word| word.ends_with("Exception"))
        .collect();
    if exceptions.iter().any(|e| *e != MISSING_INPUT_EXCEPTION) {
        return Err(TrellisError::DryRunFailed {
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
        });
    }
    let lines: Vec<&str> = output
        .stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let marker = lines
        .iter()
        .position(|l| *l == AFFECTED_FILES_MARKER)
        .ok_or_else(|| TrellisError::MissingFilesUnparsed {
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
        })?;
    Ok(lines[marker + 1..].iter().map(|l| l.to_string()).collect())
}

/// Iteratively discover missing file dependencies for a single-file
/// build.
///
/// Returns missing paths in discovery order. If the accumulated set ever
/// intersects `target_namespaces` the probe returns early with the
/// partial set; callers that only need a yes/no answer about one node
/// pass its expected upstream paths here.
pub async fn missing_file_dependencies(
    content: &str,
    target_namespaces: &[String],
    runner: &dyn DryRunner,
) -> Result<Vec<String>> {
    let dir = tempfile::tempdir()?;
    let snakefile = dir.path().join("Snakefile");
    tokio::fs::write(&snakefile, content).await?;

    let mut deps: Vec<String> = Vec::new();
    loop {
        let output = runner.dry_run(&snakefile, dir.path()).await?;
        let files = parse_missing_files(&output)?;
        if files.is_empty() {
            break;
        }
        debug!(count = files.len(), "dry run reported missing inputs");
        for file in files {
            if !deps.contains(&file) {
                deps.push(file);
            }
        }
        // Return early if target dependencies are already unresolved
        if deps.iter().any(|d| target_namespaces.contains(d)) {
            return Ok(deps);
        }
        // Touch placeholders so the next dry run sees them resolved
        for dep in &deps {
            let target = dir.path().join(dep);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(&target)
                .await?;
        }
    }
    Ok(deps)
}

/// Flatten a generated parameter file and workflow script into one
/// self-contained text the dry-run tool can consume without a config
/// file on disk.
pub fn flatten_build(config_text: &str, snakefile_text: &str) -> Result<String> {
    let workflow: Vec<&str> = snakefile_text
        .lines()
        .filter(|line| !line.starts_with("configfile:"))
        .collect();
    Ok(format!(
        "{}\n{}",
        yaml_to_config(config_text)?,
        workflow.join("\n")
    ))
}

/// Check whether a node's declared inputs are reachable from the
/// composed graph described by `entries`. The target node is the first
/// entry; the rest of the request is its candidate upstream graph.
pub async fn check_node_dependencies(
    entries: &[RequestEntry],
    fetcher: std::sync::Arc<crate::source::SourceFetcher>,
    runner: &dyn DryRunner,
) -> Result<DependencyReport> {
    let options = BuildOptions {
        partial_build: true,
        ..BuildOptions::default()
    };
    let built = build_from_request(entries, fetcher, &options).await?;
    let Some(first) = built.model.nodes.first() else {
        return Ok(DependencyReport::Ok);
    };
    let first_name = first.name.clone();

    // Expected upstream namespaces for the target node, read from its
    // resolved parameter-file entry
    let config = built.model.construct_snakefile_config()?;
    let node = built.model.get_node_by_name(&first_name).ok_or_else(|| {
        TrellisError::NodeNotFound {
            name: first_name.clone(),
        }
    })?;
    let ports = config
        .get(node.rulename.as_str())
        .and_then(|entry| entry.get("config"))
        .and_then(|c| c.get("ports"))
        .and_then(ports_from_value)
        .unwrap_or_default();
    let port_namespaces: HashSet<String> =
        ports.iter().map(|p| p.namespace.clone()).collect();
    let target_namespaces: Vec<String> = port_namespaces
        .iter()
        .map(|ns| format!("results/{ns}"))
        .collect();

    // Probe the flattened build for unresolved sources
    let content = flatten_build(&built.config_text, &built.snakefile_text)?;
    let missing = missing_file_dependencies(&content, &target_namespaces, runner).await?;
    let unresolved_sources: HashSet<String> = missing
        .iter()
        .filter_map(|path| path.strip_prefix("results/"))
        .filter_map(|rest| rest.split('/').next())
        .map(str::to_string)
        .collect();

    let mut unresolved: Vec<String> = unresolved_sources
        .intersection(&port_namespaces)
        .cloned()
        .collect();
    unresolved.sort();
    if unresolved.is_empty() {
        Ok(DependencyReport::Ok)
    } else {
        Ok(DependencyReport::Missing { unresolved })
    }
}
