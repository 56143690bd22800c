//! Module packaging
//!
//! Materializes each node's workflow source into the build tree so the
//! generated pipeline can run without reaching back to the authoring
//! machine or the network. Local modules are copied, remote modules
//! downloaded blob by blob; either way the node's locator is rewritten to
//! the packaged path.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, TrellisError};
use crate::model::Model;
use crate::node::{Node, Snakefile};
use crate::source::SourceFetcher;

/// Folders skipped at the module root: run products, not module source
const IGNORE_IN_ROOT: &[&str] = &["results", "logs", "benchmarks"];
/// Names skipped anywhere in the module tree
const IGNORE_ANYWHERE: &[&str] = &[".snakemake", "__pycache__"];
/// Cached test artifacts skipped anywhere in the module tree
const IGNORE_SUFFIXES: &[&str] = &[".test.sh", ".test.yaml"];
/// Cap on concurrent blob downloads per module
const MAX_CONCURRENT_DOWNLOADS: usize = 8;

/// Fixed on-disk layout every module lives under:
/// `<repoRoot>/workflows/<project>/<type>/<moduleName>/workflow/<file>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLayout {
    pub repo_root: String,
    pub project: String,
    pub module_type: String,
    pub module_name: String,
    pub workflow_folder: String,
}

/// Parse the layout out of a local workflow path.
pub fn local_layout(path: &Path) -> Result<ModuleLayout> {
    let bad = || TrellisError::BadModuleLayout {
        path: path.display().to_string(),
    };
    let dir = path.parent().ok_or_else(bad)?;
    let comps: Vec<String> = dir
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if comps.len() < 6 {
        return Err(bad());
    }
    let tail = &comps[comps.len() - 6..];
    if tail[1] != "workflows" {
        return Err(bad());
    }
    Ok(ModuleLayout {
        repo_root: tail[0].clone(),
        project: tail[2].clone(),
        module_type: tail[3].clone(),
        module_name: tail[4].clone(),
        workflow_folder: tail[5].clone(),
    })
}

/// Parse the layout out of a remote workflow path. The leading segments
/// before `workflows` are the repository-internal base path.
pub fn remote_layout(workflow_path: &str) -> Result<ModuleLayout> {
    let bad = || TrellisError::BadModuleLayout {
        path: workflow_path.to_string(),
    };
    let parts: Vec<&str> = workflow_path.split('/').collect();
    // drop the file name, keep the directories
    if parts.len() < 6 {
        return Err(bad());
    }
    let dirs = &parts[..parts.len() - 1];
    let tail = &dirs[dirs.len() - 5..];
    if tail[0] != "workflows" {
        return Err(bad());
    }
    Ok(ModuleLayout {
        repo_root: String::new(),
        project: tail[1].to_string(),
        module_type: tail[2].to_string(),
        module_name: tail[3].to_string(),
        workflow_folder: tail[4].to_string(),
    })
}

fn ignored_anywhere(name: &str) -> bool {
    IGNORE_ANYWHERE.contains(&name) || IGNORE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Materializes module sources into a build directory.
pub struct Packager {
    build_path: PathBuf,
    fetcher: Arc<SourceFetcher>,
}

impl Packager {
    pub fn new(build_path: impl Into<PathBuf>, fetcher: Arc<SourceFetcher>) -> Self {
        Self {
            build_path: build_path.into(),
            fetcher,
        }
    }

    /// Package every node in the model, rewriting locators as it goes.
    pub async fn package_all(&self, model: &mut Model) -> Result<()> {
        for node in &mut model.nodes {
            if matches!(node.source()?, Snakefile::Local(_)) {
                self.package_local(node)?;
            } else {
                self.package_remote(node).await?;
            }
        }
        Ok(())
    }

    /// Copy a local module into the build tree.
    pub fn package_local(&self, node: &mut Node) -> Result<()> {
        let source = node.source()?;
        let Snakefile::Local(path) = source else {
            return Err(TrellisError::SourceKind {
                expected: "local",
                locator: source.to_string(),
            });
        };
        let layout = local_layout(path)?;
        let module_dir = path
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| TrellisError::BadModuleLayout {
                path: path.display().to_string(),
            })?
            .to_path_buf();

        let dest = self
            .build_path
            .join("workflow")
            .join("modules")
            .join("local")
            .join(&layout.repo_root)
            .join("workflows")
            .join(&layout.project)
            .join(&layout.module_type)
            .join(&layout.module_name);
        fs::create_dir_all(&dest)?;
        debug!(module = %node.rulename, dest = %dest.display(), "packaging local module");

        for entry in fs::read_dir(&module_dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if IGNORE_IN_ROOT.contains(&file_name.as_str()) || ignored_anywhere(&file_name) {
                continue;
            }
            let src_path = entry.path();
            let dest_path = dest.join(&file_name);
            if src_path.is_file() {
                fs::copy(&src_path, &dest_path)?;
            } else {
                copy_tree(&src_path, &dest_path)?;
            }
        }

        node.snakefile = Some(Snakefile::Local(packaged_path(
            &["modules", "local", &layout.repo_root],
            &layout,
        )));
        Ok(())
    }

    /// Download a remote module's blobs into the build tree.
    pub async fn package_remote(&self, node: &mut Node) -> Result<()> {
        let source = node.source()?.clone();
        source.validate_remote()?;
        let layout = remote_layout(source.remote_path()?)?;
        let (owner, repo) = source.remote_owner_repo()?;
        let owner = owner.to_string();
        let repo = repo.to_string();
        let reference = source.remote_reference()?.to_string();
        let repo_full = source.remote_repo()?.to_string();

        let dest = self
            .build_path
            .join("workflow")
            .join("modules")
            .join(&owner)
            .join(&repo);
        fs::create_dir_all(&dest)?;

        let blobs = self.fetcher.module_blobs(&source).await?;
        debug!(
            module = %node.rulename,
            blobs = blobs.len(),
            "packaging remote module"
        );
        let downloads: Vec<Result<()>> = stream::iter(blobs.into_iter().map(|blob| {
            let fetcher = Arc::clone(&self.fetcher);
            let dest = dest.clone();
            let repo_full = repo_full.clone();
            let reference = reference.clone();
            async move {
                let bytes = fetcher.fetch_blob(&repo_full, &reference, &blob.path).await?;
                let target = dest.join(&blob.path);
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&target, bytes).await?;
                Ok(())
            }
        }))
        .buffer_unordered(MAX_CONCURRENT_DOWNLOADS)
        .collect()
        .await;
        for download in downloads {
            download?;
        }

        node.snakefile = Some(Snakefile::Local(packaged_path(
            &["modules", &owner, &repo],
            &layout,
        )));
        Ok(())
    }
}

/// Build-relative locator for a packaged module's workflow file.
fn packaged_path(prefix: &[&str], layout: &ModuleLayout) -> PathBuf {
    let mut path = PathBuf::new();
    for part in prefix {
        if !part.is_empty() {
            path.push(part);
        }
    }
    path.push("workflows");
    path.push(&layout.project);
    path.push(&layout.module_type);
    path.push(&layout.module_name);
    path.push(&layout.workflow_folder);
    path.push("Snakefile");
    path
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    let walker = WalkDir::new(src)
        .into_iter()
        .filter_entry(|e| !ignored_anywhere(&e.file_name().to_string_lossy()));
    for entry in walker {
        let entry = entry.map_err(|e| TrellisError::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir stays under its root");
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ModuleSpec, NodeType};
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn module_node(name: &str, snakefile: PathBuf) -> Node {
        Node {
            name: name.to_string(),
            rulename: name.to_string(),
            nodetype: NodeType::Module,
            config: ModuleSpec::default().config,
            ports: Vec::new(),
            namespace: name.to_string(),
            snakefile: Some(Snakefile::Local(snakefile)),
        }
    }

    #[test]
    fn local_layout_requires_the_workflows_segment() {
        let ok = local_layout(Path::new(
            "repo/workflows/proj/modules/align/workflow/Snakefile",
        ))
        .unwrap();
        assert_eq!(ok.repo_root, "repo");
        assert_eq!(ok.project, "proj");
        assert_eq!(ok.module_type, "modules");
        assert_eq!(ok.module_name, "align");
        assert_eq!(ok.workflow_folder, "workflow");

        assert!(local_layout(Path::new("repo/other/proj/modules/align/workflow/Snakefile")).is_err());
        assert!(local_layout(Path::new("short/workflow/Snakefile")).is_err());
    }

    #[test]
    fn remote_layout_allows_a_base_path() {
        let layout =
            remote_layout("nested/base/workflows/proj/modules/align/workflow/Snakefile").unwrap();
        assert_eq!(layout.project, "proj");
        assert_eq!(layout.module_name, "align");
        assert!(remote_layout("workflows/align/workflow/Snakefile").is_err());
    }

    #[test]
    fn package_local_copies_and_rewrites_the_locator() {
        let tmp = TempDir::new().unwrap();
        let module_root = tmp
            .path()
            .join("repo/workflows/proj/modules/align");
        write(&module_root.join("workflow/Snakefile"), "rule all:\n");
        write(&module_root.join("config/config.yaml"), "params: {}\n");
        write(&module_root.join("results/out.txt"), "run product\n");
        write(&module_root.join("workflow/.snakemake/lock"), "lock\n");
        write(&module_root.join("workflow/run.test.sh"), "#!/bin/sh\n");

        let build = tmp.path().join("build");
        let packager = Packager::new(&build, Arc::new(SourceFetcher::new()));
        let mut node = module_node("align", module_root.join("workflow/Snakefile"));
        packager.package_local(&mut node).unwrap();

        let packaged = build.join("workflow/modules/local/repo/workflows/proj/modules/align");
        assert!(packaged.join("workflow/Snakefile").exists());
        assert!(packaged.join("config/config.yaml").exists());
        assert!(!packaged.join("results").exists());
        assert!(!packaged.join("workflow/.snakemake").exists());
        assert!(!packaged.join("workflow/run.test.sh").exists());

        assert_eq!(
            node.snakefile,
            Some(Snakefile::Local(PathBuf::from(
                "modules/local/repo/workflows/proj/modules/align/workflow/Snakefile"
            )))
        );
    }

    #[test]
    fn package_local_rejects_misplaced_modules() {
        let tmp = TempDir::new().unwrap();
        let stray = tmp.path().join("elsewhere/align/workflow/Snakefile");
        write(&stray, "rule all:\n");
        let packager = Packager::new(tmp.path().join("build"), Arc::new(SourceFetcher::new()));
        let mut node = module_node("align", stray);
        assert!(matches!(
            packager.package_local(&mut node),
            Err(TrellisError::BadModuleLayout { .. })
        ));
    }
}
