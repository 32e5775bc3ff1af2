use std::sync::Arc;
use std::time::Duration;

use recon_harness::graph::RelationType;
use recon_harness::harness::{Harness, MemoryStore, MemoryTier};
use recon_harness::modules::{
    FindingSubmissionModule, GraphStorageModule, LlmCompletionModule, MemoryTiersModule,
    NetworkReconModule, ToolInvocationModule,
};
use recon_harness::replay::ReplayHarness;
use recon_harness::runner::DiagnosticModule;
use recon_harness::types::{CheckResult, CheckStatus};
use serde_json::json;
use tokio_util::sync::CancellationToken;

async fn run(module: &dyn DiagnosticModule, harness: Arc<ReplayHarness>) -> Vec<CheckResult> {
    let harness: Arc<dyn Harness> = harness;
    module.run(CancellationToken::new(), harness).await
}

fn statuses(results: &[CheckResult]) -> Vec<CheckStatus> {
    results.iter().map(CheckResult::status).collect()
}

fn recon_fixture() -> ReplayHarness {
    ReplayHarness::new()
        .with_mission("m-1", "lab sweep")
        .with_connection("subnet", json!("10.0.0.0/30"))
        .with_tool_output("ping", json!({"results": [{"host": "10.0.0.1", "alive": true}]}))
        .with_tool_output(
            "nmap",
            json!({"hosts": [{"ip": "10.0.0.1", "ports": [{"port": 80, "state": "open", "service": "http"}]}]}),
        )
}

#[tokio::test]
async fn network_recon_runs_phases_and_stores_the_graph() {
    let h = Arc::new(recon_fixture());
    let module = NetworkReconModule::new(None, Vec::new(), Duration::from_secs(5));

    let results = run(&module, Arc::clone(&h)).await;
    let names: Vec<&str> = results.iter().map(CheckResult::name).collect();
    assert_eq!(
        names,
        vec![
            "Recon Target",
            "Ping Sweep",
            "Recon Phase: discover",
            "Recon Phase: probe",
            "Recon Phase: scan",
            "Recon Graph Storage",
            "LLM Security Analysis",
            "Recon Memory",
        ]
    );
    assert_eq!(
        statuses(&results),
        vec![
            CheckStatus::Pass,
            CheckStatus::Pass,
            CheckStatus::Pass,
            CheckStatus::Skip,
            CheckStatus::Skip,
            CheckStatus::Pass,
            CheckStatus::Skip,
            CheckStatus::Pass,
        ]
    );
    assert_eq!(results[1].details()["alive"], json!(2));
    assert!(results[6].message().contains("LLM analysis unavailable"));

    let batches = h.stored_batches().await;
    assert_eq!(batches.len(), 1);
    let last = batches[0].relationships.last().unwrap();
    assert_eq!(last.rel_type, RelationType::PartOf);
    assert_eq!(last.to_id, "m-1");

    let summary = h.memory_get(MemoryTier::Working, "recon_summary").await.unwrap().unwrap();
    assert_eq!(summary["total_ports"], 1);
    assert_eq!(summary["subnet"], "10.0.0.0/30");
}

#[tokio::test]
async fn network_recon_analysis_is_stored_in_working_memory() {
    let reply = "Assessment follows.\n{\"summary\": \"One web host\", \"risk_level\": \"Medium\", \
                 \"high_risk_services\": [\"http:80\"], \"recommendations\": [\"Serve over TLS\"]}";
    let h = Arc::new(recon_fixture().with_completion(reply));
    let module = NetworkReconModule::new(None, Vec::new(), Duration::from_secs(5));

    let results = run(&module, Arc::clone(&h)).await;
    let analysis = results.iter().find(|r| r.name() == "LLM Security Analysis").unwrap();
    assert_eq!(analysis.status(), CheckStatus::Pass);
    assert_eq!(analysis.details()["risk_level"], json!("medium"));

    let stored = h.memory_get(MemoryTier::Working, "llm_analysis").await.unwrap().unwrap();
    assert_eq!(stored["summary"], "One web host");
    assert_eq!(stored["high_risk_services"], json!(["http:80"]));
}

#[tokio::test]
async fn network_recon_rejects_an_unparseable_analysis() {
    let h = Arc::new(recon_fixture().with_completion("I cannot help with that."));
    let module = NetworkReconModule::new(None, Vec::new(), Duration::from_secs(5));

    let results = run(&module, Arc::clone(&h)).await;
    let analysis = results.iter().find(|r| r.name() == "LLM Security Analysis").unwrap();
    assert_eq!(analysis.status(), CheckStatus::Fail);
    assert!(analysis.message().contains("no JSON found"));
    assert!(h.memory_get(MemoryTier::Working, "llm_analysis").await.unwrap().is_none());
}

#[tokio::test]
async fn network_recon_stops_when_no_host_answers() {
    let h = Arc::new(
        ReplayHarness::new()
            .with_connection("subnet", json!("10.0.0.0/30"))
            .with_tool_output("ping", json!({"results": [{"host": "10.0.0.1", "alive": false}]}))
            .with_tool_output("nmap", json!({"hosts": []})),
    );
    let module = NetworkReconModule::new(None, Vec::new(), Duration::from_secs(5));

    let results = run(&module, Arc::clone(&h)).await;
    let names: Vec<&str> = results.iter().map(CheckResult::name).collect();
    assert_eq!(names, vec!["Recon Target", "Ping Sweep", "Recon Phases"]);
    assert_eq!(statuses(&results), vec![CheckStatus::Pass, CheckStatus::Pass, CheckStatus::Skip]);
    assert!(results[2].message().contains("No live hosts"));
    assert!(h.tool_calls().await.iter().all(|c| c.name == "ping"));
    assert!(h.stored_batches().await.is_empty());
}

#[tokio::test]
async fn network_recon_runs_without_a_ping_tool() {
    let h = Arc::new(
        ReplayHarness::new()
            .with_connection("subnet", json!("10.0.0.0/30"))
            .with_tool_output(
                "nmap",
                json!({"hosts": [{"ip": "10.0.0.2", "ports": [{"port": 22, "state": "open", "service": "ssh"}]}]}),
            ),
    );
    let module = NetworkReconModule::new(None, Vec::new(), Duration::from_secs(5));

    let results = run(&module, Arc::clone(&h)).await;
    assert_eq!(results[1].name(), "Ping Sweep");
    assert_eq!(results[1].status(), CheckStatus::Skip);
    assert_eq!(results[2].name(), "Recon Phase: discover");
    assert_eq!(results[2].status(), CheckStatus::Pass);
    assert!(h.tool_calls().await.iter().any(|c| c.name == "nmap"));
}

#[tokio::test]
async fn network_recon_guards_its_target() {
    let module = NetworkReconModule::new(None, Vec::new(), Duration::from_secs(5));
    let none = run(&module, Arc::new(ReplayHarness::new())).await;
    assert_eq!(statuses(&none), vec![CheckStatus::Skip]);

    let huge = NetworkReconModule::new(Some("10.0.0.0/16".into()), Vec::new(), Duration::from_secs(5));
    let results = run(&huge, Arc::new(ReplayHarness::new())).await;
    assert_eq!(statuses(&results), vec![CheckStatus::Skip]);
    assert!(results[0].message().contains("too large"));

    let bad = NetworkReconModule::new(Some("10.0.0.300/24".into()), Vec::new(), Duration::from_secs(5));
    assert_eq!(statuses(&run(&bad, Arc::new(ReplayHarness::new())).await), vec![CheckStatus::Fail]);
}

#[tokio::test]
async fn tool_invocation_prefers_safe_tools() {
    let h = Arc::new(
        ReplayHarness::new()
            .with_tool_output("ping", json!({"results": []}))
            .with_tool_output("nmap", json!({"hosts": []})),
    );
    let module = ToolInvocationModule::new(None, Duration::from_secs(1));
    let results = run(&module, Arc::clone(&h)).await;
    assert_eq!(statuses(&results), vec![CheckStatus::Pass, CheckStatus::Pass]);
    assert!(h.tool_calls().await.iter().all(|c| c.name == "ping"));

    let empty = run(&module, Arc::new(ReplayHarness::new())).await;
    assert_eq!(statuses(&empty), vec![CheckStatus::Skip, CheckStatus::Skip]);
}

#[tokio::test]
async fn tool_invocation_reports_failing_tool() {
    let h = Arc::new(ReplayHarness::new().with_tool_error("echo", "sandbox denied"));
    let module = ToolInvocationModule::new(Some("echo".into()), Duration::from_secs(1));
    let results = run(&module, h).await;
    assert_eq!(statuses(&results), vec![CheckStatus::Fail, CheckStatus::Fail]);
    assert!(results[0].error_text().unwrap().contains("sandbox denied"));
}

#[tokio::test]
async fn llm_completion_needs_content() {
    let reply = r#"{"status":"success","message":"test","value":42}"#;
    let ok = run(&LlmCompletionModule::default(), Arc::new(ReplayHarness::new().with_completion(reply))).await;
    let names: Vec<&str> = ok.iter().map(CheckResult::name).collect();
    assert_eq!(names, vec!["LLM Completion", "LLM Structured Output"]);
    assert_eq!(statuses(&ok), vec![CheckStatus::Pass, CheckStatus::Pass]);
    assert_eq!(ok[1].details()["value"], json!(42));

    let empty = run(&LlmCompletionModule::default(), Arc::new(ReplayHarness::new().with_completion("  "))).await;
    assert_eq!(statuses(&empty), vec![CheckStatus::Fail, CheckStatus::Fail]);

    let missing = run(&LlmCompletionModule::default(), Arc::new(ReplayHarness::new())).await;
    assert_eq!(statuses(&missing), vec![CheckStatus::Fail, CheckStatus::Fail]);
}

#[tokio::test]
async fn structured_output_needs_a_status() {
    let prose = run(&LlmCompletionModule::default(), Arc::new(ReplayHarness::new().with_completion("pong"))).await;
    assert_eq!(statuses(&prose), vec![CheckStatus::Pass, CheckStatus::Fail]);
    assert!(prose[1].message().contains("no JSON found"));

    let blank = run(
        &LlmCompletionModule::default(),
        Arc::new(ReplayHarness::new().with_completion(r#"{"status": "", "value": 42}"#)),
    )
    .await;
    assert_eq!(statuses(&blank), vec![CheckStatus::Pass, CheckStatus::Fail]);
    assert!(blank[1].message().contains("status"));
}

#[tokio::test]
async fn findings_require_a_mission() {
    let module = FindingSubmissionModule::default();
    assert_eq!(statuses(&run(&module, Arc::new(ReplayHarness::new())).await), vec![CheckStatus::Skip]);

    let h = Arc::new(ReplayHarness::new().with_mission("m-9", "lab"));
    assert_eq!(statuses(&run(&module, Arc::clone(&h)).await), vec![CheckStatus::Pass]);
    let findings = h.findings().await;
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].mission_id, "m-9");
}

#[tokio::test]
async fn memory_tiers_round_trip_or_skip() {
    let ok = run(&MemoryTiersModule, Arc::new(ReplayHarness::new())).await;
    assert_eq!(ok.len(), 3);
    assert!(ok.iter().all(|r| r.status() == CheckStatus::Pass));

    let off = run(&MemoryTiersModule, Arc::new(ReplayHarness::new().without_memory())).await;
    assert!(off.iter().all(|r| r.status() == CheckStatus::Skip));
    assert_eq!(off[2].name(), "Memory Tier: long_term");
}

#[tokio::test]
async fn graph_storage_checks_health_first() {
    let down = Arc::new(ReplayHarness::new().with_graph_health(false));
    assert_eq!(statuses(&run(&GraphStorageModule, Arc::clone(&down)).await), vec![CheckStatus::Skip]);
    assert!(down.stored_batches().await.is_empty());

    let up = Arc::new(ReplayHarness::new().with_mission("m-2", "lab"));
    assert_eq!(statuses(&run(&GraphStorageModule, Arc::clone(&up)).await), vec![CheckStatus::Pass]);
    let batches = up.stored_batches().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].nodes.len(), 4);
}
