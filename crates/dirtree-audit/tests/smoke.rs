use std::fs;
use std::path::Path;

use dirtree_audit::config::AuditConfig;
use dirtree_audit::runner::{AuditRunner, RunnerError};
use dirtree_core::AuditError;
use sha2::{Digest, Sha256};
use tempfile::tempdir;

const BALLOTS_JSONL: &str = r#"{"preferences": ["Alice", "Bob", "Carol"], "count": 30}
{"preferences": ["Bob", "Carol"], "count": 22}
{"preferences": ["Carol", "Alice"], "count": 9}
{"preferences": ["Dan"], "count": 4}
"#;

fn load_config(input_dir: &Path, output_dir: &Path) -> AuditConfig {
    let ballots_path = input_dir.join("ballots.jsonl");
    fs::write(&ballots_path, BALLOTS_JSONL).expect("ballots written");

    let yaml = format!(
        r#"
run_id: "test_smoke"
election:
  candidates: ["Alice", "Bob", "Carol", "Dan"]
  min_depth: 1
  concentration: 1.0
  seed: "smoke-tree"
ballots:
  path: "{ballots}"
  inline:
    - preferences: ["Dan", "Carol", "Bob"]
      count: 5
audit:
  elections: 64
  ballots_total: 400
  winners: 1
  workers: 2
  seed: "smoke-audit"
  predictive_samples: 25
  marginal_samples: 8
outputs:
  json: "{json}"
  summary_md: "{summary}"
  plots_dir: "{plots}"
logging:
  enable_structured: false
"#,
        ballots = ballots_path.display(),
        json = output_dir.join("audit.json").display(),
        summary = output_dir.join("summary.md").display(),
        plots = output_dir.join("plots").display()
    );

    let mut cfg: AuditConfig = serde_yaml::from_str(&yaml).expect("valid yaml");
    cfg.validate().expect("config validates");
    cfg
}

fn run_once(input_dir: &Path, output_dir: &Path) -> (String, serde_json::Value) {
    let config = load_config(input_dir, output_dir);
    let outputs = config.resolved_outputs();
    let runner = AuditRunner::new(config, outputs).expect("runner created");
    assert_eq!(runner.observed_ballots(), 70);

    let summary = runner.run().expect("audit completes");
    assert_eq!(summary.elections, 64);
    assert_eq!(summary.observed_ballots, 70);
    assert!(summary.summary_path.exists(), "summary markdown missing");
    // Plot rendering is optional; ensure any failure surfaces explicitly
    if let Some(plot_path) = summary.plot_path {
        assert!(plot_path.exists(), "plot path reported but missing on disk");
    }

    let json = fs::read_to_string(&summary.json_path).expect("json readable");
    let value: serde_json::Value = serde_json::from_str(&json).expect("report decodes");
    let digest = hex::encode(Sha256::digest(json.as_bytes()));
    (digest, value)
}

#[test]
fn audit_smoke_test_is_reproducible() {
    let input = tempdir().expect("temp dir");
    let first_out = tempdir().expect("temp dir");
    let second_out = tempdir().expect("temp dir");

    let (first_digest, report) = run_once(input.path(), first_out.path());
    let (second_digest, _) = run_once(input.path(), second_out.path());
    assert_eq!(
        first_digest, second_digest,
        "audit.json differs between identical runs"
    );

    let candidates = report["candidates"].as_array().expect("candidate rows");
    assert_eq!(candidates.len(), 4);
    let total: f64 = candidates
        .iter()
        .map(|c| c["probability"].as_f64().expect("probability"))
        .sum();
    assert!((total - 1.0).abs() < 1e-9);

    let order: Vec<&str> = report["observed"]["order"]
        .as_array()
        .expect("observed order")
        .iter()
        .map(|v| v.as_str().expect("name"))
        .collect();
    assert_eq!(order.len(), 4);
    assert_eq!(order.last(), Some(&"Alice"));

    let predictive_total: u64 = report["predictive"]
        .as_array()
        .expect("predictive ballots")
        .iter()
        .map(|b| b["count"].as_u64().expect("count"))
        .sum();
    assert_eq!(predictive_total, 25);
    assert_eq!(report["marginals"].as_array().map(Vec::len), Some(5));
}

#[test]
fn cancelled_runner_writes_nothing() {
    let input = tempdir().expect("temp dir");
    let output = tempdir().expect("temp dir");
    let config = load_config(input.path(), output.path());
    let outputs = config.resolved_outputs();
    let runner = AuditRunner::new(config, outputs).expect("runner created");

    runner.cancellation_token().cancel();
    let err = runner.run().expect_err("cancelled");
    assert!(matches!(err, RunnerError::Audit(AuditError::Cancelled)));
    assert!(!output.path().join("audit.json").exists());
}
