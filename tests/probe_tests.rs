//! Dependency probe integration tests
//!
//! Runs `check_node_dependencies` against fixture modules with a
//! scripted dry-run oracle standing in for the external pipeline tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use trellis::{
    check_node_dependencies, parse_request, DependencyReport, DryRunner, RunOutput, SourceFetcher,
};

const LEAF_WORKFLOW: &str = "rule copy:\n    input: []\n    output: \"out.txt\"\n";

fn write_module(root: &Path, name: &str, config: &str) -> PathBuf {
    let dir = root.join("repo/workflows/proj/modules").join(name);
    fs::create_dir_all(dir.join("workflow")).unwrap();
    fs::create_dir_all(dir.join("config")).unwrap();
    let snakefile = dir.join("workflow/Snakefile");
    fs::write(&snakefile, LEAF_WORKFLOW).unwrap();
    fs::write(dir.join("config/config.yaml"), config).unwrap();
    snakefile
}

/// Request with module2 as the target node, wired after module1.
fn target_request(root: &Path) -> String {
    let module1 = write_module(root, "module1", "params: {}\n");
    let module2 = write_module(root, "module2", "input_namespace: unset\n");
    format!(
        r#"[
        {{"name": "module2", "type": "module", "config": {{"config": {{"input_namespace": "module1"}}, "snakefile": "{m2}"}}}},
        {{"name": "module1", "type": "module", "config": {{"config": {{}}, "snakefile": "{m1}"}}}}
    ]"#,
        m1 = module1.display(),
        m2 = module2.display(),
    )
}

struct ScriptedRunner {
    responses: Mutex<Vec<RunOutput>>,
}

impl ScriptedRunner {
    fn new(responses: Vec<RunOutput>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait]
impl DryRunner for ScriptedRunner {
    async fn dry_run(
        &self,
        _snakefile: &Path,
        _workdir: &Path,
    ) -> trellis::Result<RunOutput> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(RunOutput {
                stdout: "{\"nodes\": [], \"links\": []}".into(),
                stderr: String::new(),
            })
        } else {
            Ok(responses.remove(0))
        }
    }
}

fn missing(files: &[&str]) -> RunOutput {
    let mut stderr = String::from(
        "MissingInputException in rule copy:\nMissing input files for rule copy:\n    affected files:\n",
    );
    for f in files {
        stderr.push_str(&format!("        {f}\n"));
    }
    RunOutput {
        stdout: String::new(),
        stderr,
    }
}

#[tokio::test]
async fn resolved_targets_report_ok() {
    let tmp = TempDir::new().unwrap();
    let entries = parse_request(&target_request(tmp.path())).unwrap();
    // the oracle only ever misses files outside the target's namespaces
    let runner = ScriptedRunner::new(vec![missing(&["results/elsewhere/data.txt"])]);
    let report = check_node_dependencies(&entries, Arc::new(SourceFetcher::new()), &runner)
        .await
        .unwrap();
    assert_eq!(report, DependencyReport::Ok);
}

#[tokio::test]
async fn unresolved_targets_name_their_namespaces() {
    let tmp = TempDir::new().unwrap();
    let entries = parse_request(&target_request(tmp.path())).unwrap();
    let runner = ScriptedRunner::new(vec![missing(&[
        "results/module1/out.txt",
        "results/elsewhere/data.txt",
    ])]);
    let report = check_node_dependencies(&entries, Arc::new(SourceFetcher::new()), &runner)
        .await
        .unwrap();
    assert_eq!(
        report,
        DependencyReport::Missing {
            unresolved: vec!["module1".to_string()]
        }
    );
}

#[tokio::test]
async fn dependency_reports_serialize_for_the_front_end() {
    let ok = serde_json::to_string(&DependencyReport::Ok).unwrap();
    assert_eq!(ok, r#"{"status":"ok"}"#);
    let missing = serde_json::to_string(&DependencyReport::Missing {
        unresolved: vec!["module1".to_string()],
    })
    .unwrap();
    assert_eq!(missing, r#"{"status":"missing","unresolved":["module1"]}"#);
}
