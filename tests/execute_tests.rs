use std::sync::Arc;

use recon_harness::config::{DebugConfig, ExecutionMode};
use recon_harness::execute::{execute, execute_with_config, OutcomeStatus, Task};
use recon_harness::harness::Harness;
use recon_harness::replay::ReplayHarness;
use recon_harness::types::{Category, CheckStatus};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const STRUCTURED: &str = r#"{"status":"success","message":"test","value":42}"#;

fn harness(h: ReplayHarness) -> Arc<dyn Harness> {
    Arc::new(h)
}

#[tokio::test]
async fn full_mode_runs_every_builtin_module() {
    let task = Task { id: "t".into(), goal: "check platform".into(), metadata: json!({}) };
    let outcome = execute(harness(ReplayHarness::new()), &task, &CancellationToken::new()).await;

    let suite = outcome.suite.as_ref().unwrap();
    assert_eq!(suite.mode, "full");
    // tools (2 skips), 2 llm fails, finding skip, recon skip, 3 memory tiers, graph
    assert_eq!(suite.total_tests(), 10);
    assert_eq!(suite.total_failed(), 2);
    assert_eq!(suite.overall_status, CheckStatus::Fail);
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.summary["total_tests"], 10);
}

#[tokio::test]
async fn framework_mode_only_registers_framework_modules() {
    let task = Task { metadata: json!({"mode": "framework"}), ..Task::default() };
    let outcome = execute(harness(ReplayHarness::new()), &task, &CancellationToken::new()).await;

    let suite = outcome.suite.unwrap();
    assert!(suite.results.iter().all(|r| r.category() == Category::Framework));
    assert_eq!(suite.total_tests(), 4);
    assert_eq!(outcome.status, OutcomeStatus::Success);
}

#[tokio::test]
async fn single_mode_reports_unknown_names_as_errors() {
    let task = Task {
        metadata: json!({"mode": "single", "tests": ["llm-completion", "warp-drive"]}),
        ..Task::default()
    };
    let h = harness(ReplayHarness::new().with_completion(STRUCTURED));
    let outcome = execute(h, &task, &CancellationToken::new()).await;

    let suite = outcome.suite.unwrap();
    assert_eq!(suite.total_tests(), 3);
    assert_eq!(suite.results[0].status(), CheckStatus::Pass);
    assert_eq!(suite.results[1].status(), CheckStatus::Pass);
    assert_eq!(suite.results[2].name(), "warp-drive");
    assert_eq!(suite.results[2].status(), CheckStatus::Error);
    assert_eq!(suite.results[2].requirement(), "unknown");
    assert_eq!(outcome.status, OutcomeStatus::Failed);
}

#[tokio::test]
async fn skip_lists_remove_modules() {
    let config = DebugConfig {
        mode: ExecutionMode::Sdk,
        skip_tests: vec!["network-recon".into(), "tool-invocation".into()],
        ..DebugConfig::default()
    };
    let outcome = execute_with_config(
        harness(ReplayHarness::new().with_completion(STRUCTURED).with_mission("m", "n")),
        &config,
        &CancellationToken::new(),
    )
    .await;

    let suite = outcome.suite.unwrap();
    let names: Vec<_> = suite.results.iter().map(|r| r.name()).collect();
    assert_eq!(names, vec!["LLM Completion", "LLM Structured Output", "Finding Submission"]);
    assert_eq!(suite.overall_status, CheckStatus::Pass);
}

#[tokio::test]
async fn bad_configuration_fails_without_a_suite() {
    let task = Task { metadata: json!({"mode": "warp"}), ..Task::default() };
    let outcome = execute(harness(ReplayHarness::new()), &task, &CancellationToken::new()).await;

    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert!(outcome.suite.is_none());
    assert!(outcome.error.unwrap().starts_with("Configuration error"));
}

#[tokio::test]
async fn cancelled_before_start_fails_the_outcome() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let task = Task { metadata: json!({"mode": "sdk"}), ..Task::default() };
    let outcome = execute(harness(ReplayHarness::new()), &task, &cancel).await;

    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert!(outcome.error.unwrap().starts_with("Execution error"));
}
