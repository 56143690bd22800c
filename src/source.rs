//! Workflow source access
//!
//! Reads workflow and parameter files through a node's locator (local path
//! or remote repository), lists repository trees for packaging, and scans
//! workflow text for nested module declarations. Remote tree listings are
//! cached with a short TTL so that several modules from one repository do
//! not trigger repeated API calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{Result, TrellisError};
use crate::node::Snakefile;

/// Host serving raw file contents
const RAW_CONTENT_HOST: &str = "https://raw.githubusercontent.com";
/// Host serving the repository tree API
const TREE_API_HOST: &str = "https://api.github.com";
/// Tree listings are reused for this long before refetching
const TREE_CACHE_TTL: Duration = Duration::from_secs(600);
/// HTTP timeout for individual fetches
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

static MODULE_DECL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^module (.*):").expect("module declaration regex"));

/// Scan workflow text for `module <name>:` declarations.
///
/// This is the single point deciding what counts as a nested module
/// declaration; the expansion algorithm never looks at workflow text
/// itself.
pub fn list_declared_modules(text: &str) -> Vec<String> {
    MODULE_DECL_RE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// One entry of a recursive repository tree listing.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: String,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.entry_type == "blob"
    }
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
}

type TreeKey = (String, String, String);

/// Shared fetch layer for module sources.
pub struct SourceFetcher {
    client: reqwest::Client,
    tree_cache: DashMap<TreeKey, (Instant, Arc<Vec<TreeEntry>>)>,
}

impl SourceFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("trellis/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            tree_cache: DashMap::new(),
        }
    }

    /// Read a file through a locator: local filesystem or remote raw host.
    pub async fn read(&self, source: &Snakefile) -> Result<String> {
        match source {
            Snakefile::Local(path) => Ok(tokio::fs::read_to_string(path).await?),
            Snakefile::Remote { .. } => {
                source.validate_remote()?;
                let url = self.raw_url(
                    source.remote_repo()?,
                    source.remote_reference()?,
                    source.remote_path()?,
                )?;
                self.fetch_text(url).await
            }
        }
    }

    /// Read a module's workflow file.
    pub async fn read_workflow(&self, source: &Snakefile) -> Result<String> {
        self.read(source).await
    }

    /// Read a module's parameter file, located by substituting the
    /// workflow path for the config path.
    pub async fn read_config(&self, source: &Snakefile) -> Result<String> {
        self.read(&source.config_source()?).await
    }

    /// Download one repository blob as raw bytes.
    pub async fn fetch_blob(&self, repo: &str, reference: &str, path: &str) -> Result<Vec<u8>> {
        let url = self.raw_url(repo, reference, path)?;
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(TrellisError::RemoteApi {
                url: url.into(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Recursive tree listing for a repository reference, TTL-cached per
    /// (owner, repo, reference). A racing fill only costs a duplicate
    /// fetch.
    pub async fn repo_tree(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<Arc<Vec<TreeEntry>>> {
        let key = (owner.to_string(), repo.to_string(), reference.to_string());
        if let Some(cached) = self.tree_cache.get(&key) {
            let (stamp, tree) = cached.value();
            if stamp.elapsed() < TREE_CACHE_TTL {
                debug!(owner, repo, reference, "tree cache hit");
                return Ok(Arc::clone(tree));
            }
        }

        let url = Url::parse(&format!(
            "{TREE_API_HOST}/repos/{owner}/{repo}/git/trees/{reference}?recursive=1"
        ))
        .map_err(|e| TrellisError::InvalidRequest {
            detail: format!("bad tree URL: {e}"),
        })?;
        debug!(%url, "listing repository tree");
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(TrellisError::RemoteApi {
                url: url.into(),
                status: response.status().as_u16(),
            });
        }
        let listing: TreeResponse = response.json().await?;
        let tree = Arc::new(listing.tree);
        self.tree_cache
            .insert(key, (Instant::now(), Arc::clone(&tree)));
        Ok(tree)
    }

    /// Blobs under a remote module's folder (the path prefix two levels
    /// above the workflow file).
    pub async fn module_blobs(&self, source: &Snakefile) -> Result<Vec<TreeEntry>> {
        source.validate_remote()?;
        let (owner, repo) = source.remote_owner_repo()?;
        let reference = source.remote_reference()?;
        let module_folder = module_folder(source.remote_path()?);
        let tree = self.repo_tree(owner, repo, reference).await?;
        Ok(tree
            .iter()
            .filter(|e| e.is_blob() && e.path.contains(&module_folder))
            .cloned()
            .collect())
    }

    fn raw_url(&self, repo: &str, reference: &str, path: &str) -> Result<Url> {
        Url::parse(&format!("{RAW_CONTENT_HOST}/{repo}/{reference}/{path}")).map_err(|e| {
            TrellisError::InvalidRequest {
                detail: format!("bad raw content URL: {e}"),
            }
        })
    }

    async fn fetch_text(&self, url: Url) -> Result<String> {
        debug!(%url, "fetching remote file");
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(TrellisError::RemoteApi {
                url: url.into(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

impl Default for SourceFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Module folder prefix for a workflow path: strip the file name and the
/// `workflow` directory, keep the trailing slash.
pub fn module_folder(workflow_path: &str) -> String {
    let parts: Vec<&str> = workflow_path.split('/').collect();
    if parts.len() <= 2 {
        return String::new();
    }
    let mut folder = parts[..parts.len() - 2].join("/");
    folder.push('/');
    folder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_modules_are_scanned_per_line() {
        let text = "\
configfile: \"config/config.yaml\"

module align:
    snakefile: config[\"align\"][\"snakefile\"]
use rule * from align exclude _test as align_*

module summarise:
    snakefile: config[\"summarise\"][\"snakefile\"]
";
        assert_eq!(list_declared_modules(text), vec!["align", "summarise"]);
    }

    #[test]
    fn indented_module_lines_are_not_declarations() {
        let text = "    module nested:\nrule all:\n";
        assert!(list_declared_modules(text).is_empty());
    }

    #[test]
    fn module_folder_strips_workflow_and_file() {
        assert_eq!(
            module_folder("workflows/proj/modules/align/workflow/Snakefile"),
            "workflows/proj/modules/align/"
        );
    }
}
