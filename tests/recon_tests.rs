use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use recon_harness::error::{HarnessError, ReconError};
use recon_harness::graph::{NodeType, RelationType};
use recon_harness::harness::{ToolDescriptor, ToolInvoker};
use recon_harness::recon::{Phase, ReconConfig, ReconRunner};
use recon_harness::replay::ReplayHarness;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn one_host() -> Value {
    json!({"hosts": [
        {"ip": "10.0.0.5", "ports": [{"port": 443, "protocol": "tcp", "state": "open", "service": "https"}]}
    ]})
}

fn two_hosts() -> Value {
    json!({"hosts": [
        {"ip": "192.168.1.10", "hostname": "web", "ports": [
            {"port": 22, "protocol": "tcp", "state": "open", "service": "ssh"},
            {"port": 80, "protocol": "tcp", "state": "open", "service": "http"}
        ]},
        {"ip": "192.168.1.20", "ports": [
            {"port": 443, "protocol": "tcp", "state": "open", "service": "https"},
            {"port": 8080, "protocol": "tcp", "state": "closed"}
        ]}
    ]})
}

#[tokio::test]
async fn discover_falls_back_to_the_next_tool() {
    let h = Arc::new(
        ReplayHarness::new()
            .with_tool_error("nmap", "nmap: command not found")
            .with_tool_output("masscan", one_host()),
    );
    let runner = ReconRunner::new(Arc::clone(&h), "run-1");

    let res = runner.run_phase(Phase::Discover, &["10.0.0.0/24".into()]).await.unwrap();
    assert_eq!(res.tools_run, vec!["masscan"]);
    assert_eq!(res.errors.len(), 1);
    assert_eq!(res.errors[0].tool, "nmap");
    assert_eq!(res.nodes_created, 2);
    assert_eq!(res.relations_created, 2);

    let calls = h.tool_calls().await;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].input["ports"], "1-65535");
}

#[tokio::test]
async fn two_hosts_yield_five_nodes_and_five_relationships() {
    let h = Arc::new(ReplayHarness::new().with_tool_output("nmap", two_hosts()));
    let runner = ReconRunner::new(h, "run-2");

    let res = runner.run_phase(Phase::Discover, &["192.168.1.0/24".into()]).await.unwrap();
    assert_eq!(res.tools_run, vec!["nmap"]);
    assert!(!res.has_errors());
    assert_eq!(res.nodes_created, 5);
    assert_eq!(res.relations_created, 5);

    let has_port = res.graph.relationships.iter().filter(|r| r.rel_type == RelationType::HasPort).count();
    assert_eq!(has_port, 3);
    // Extracted entities come first, tool-execution provenance after.
    let exec = &res.graph.nodes[5];
    assert_eq!(exec.node_type, NodeType::ToolExecution);
    assert_eq!(exec.property("phase"), Some(&json!("discover")));
    assert!(res.graph.validate().is_ok());
}

#[tokio::test]
async fn full_run_feeds_discovered_ports_into_probe_and_scan() {
    let h = Arc::new(
        ReplayHarness::new()
            .with_tool_output("nmap", two_hosts())
            .with_tool_output(
                "httpx",
                json!({"endpoints": [
                    {"url": "http://192.168.1.10:80", "status_code": 200, "technologies": ["nginx"]}
                ]}),
            )
            .with_tool_output(
                "nuclei",
                json!({"findings": [
                    {"template-id": "exposed-panel", "severity": "medium", "matched-at": "http://192.168.1.10:80"}
                ]}),
            )
            .with_tool_output("subfinder", json!({"subdomains": [{"name": "api.example.com"}]}))
            .with_tool_error("amass", "rate limited"),
    );
    let runner = ReconRunner::new(Arc::clone(&h), "run-3");

    let run = runner.run_all("192.168.1.0/24", &["example.com".into()]).await.unwrap();
    let order: Vec<Phase> = run.phases.iter().map(|p| p.phase).collect();
    assert_eq!(order, vec![Phase::Discover, Phase::Probe, Phase::Scan, Phase::Domain]);
    assert_eq!(run.total_hosts, 2);
    assert_eq!(run.total_ports, 3);
    assert_eq!(run.total_endpoints, 1);
    assert_eq!(run.total_findings, 1);

    let domain = run.phase(Phase::Domain).unwrap();
    assert_eq!(domain.tools_run, vec!["subfinder"]);
    assert_eq!(domain.errors.len(), 1);
    assert_eq!(run.error_count(), 1);

    let probes: Vec<_> = h.tool_calls().await.into_iter().filter(|c| c.name == "httpx").collect();
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0].input["targets"].as_array().map(Vec::len), Some(3));

    assert_eq!(run.graph.nodes[0].node_type, NodeType::AgentRun);
    assert!(run.graph.validate().is_ok());
    assert_eq!(run.summary()["total_ports"], 3);
}

#[tokio::test]
async fn failing_tools_never_fail_the_run() {
    let runner = ReconRunner::new(Arc::new(ReplayHarness::new()), "run-4");

    let run = runner.run_all("10.0.0.0/24", &[]).await.unwrap();
    assert_eq!(run.phases.len(), 1);
    let discover = run.phase(Phase::Discover).unwrap();
    assert_eq!(discover.errors.len(), 2);
    assert_eq!(discover.nodes_created, 0);
    assert!(discover.tools_run.is_empty());
    assert_eq!(run.total_hosts, 0);
}

#[tokio::test]
async fn slow_tool_times_out_then_falls_back() {
    let h = Arc::new(
        ReplayHarness::new()
            .with_tool_output("nmap", two_hosts())
            .with_tool_delay("nmap", Duration::from_secs(5))
            .with_tool_output("masscan", one_host()),
    );
    let runner = ReconRunner::new(h, "run-5").with_config(ReconConfig {
        tool_timeout: Duration::from_millis(50),
        ..ReconConfig::default()
    });

    let res = runner.run_phase(Phase::Discover, &["10.0.0.0/24".into()]).await.unwrap();
    assert_eq!(res.tools_run, vec!["masscan"]);
    assert!(res.errors[0].message.contains("timed out"));
}

#[tokio::test]
async fn unknown_phase_is_rejected_before_any_call() {
    let h = Arc::new(ReplayHarness::new());
    let runner = ReconRunner::new(Arc::clone(&h), "run-6");

    assert_eq!(
        runner.run_phase_named("exploit", &["10.0.0.1".into()]).await.unwrap_err(),
        ReconError::UnknownPhase("exploit".into())
    );
    assert!(h.tool_calls().await.is_empty());
}

#[tokio::test]
async fn cancelled_run_reports_cancellation() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let runner = ReconRunner::new(Arc::new(ReplayHarness::new()), "run-7").with_cancel(cancel);

    assert_eq!(runner.run_all("10.0.0.0/24", &[]).await.unwrap_err(), ReconError::Cancelled);
}

struct Explosive;

#[async_trait]
impl ToolInvoker for Explosive {
    async fn invoke_tool(&self, name: &str, _input: Value) -> Result<Value, HarnessError> {
        panic!("{name} segfaulted");
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, HarnessError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn panicking_tool_becomes_a_phase_error() {
    let runner = ReconRunner::new(Arc::new(Explosive), "run-8");

    let res = runner.run_phase(Phase::Discover, &["10.0.0.1".into(), "10.0.0.2".into()]).await.unwrap();
    assert_eq!(res.errors.len(), 2);
    assert_eq!(res.errors[0].target, "10.0.0.1");
    assert_eq!(res.errors[0].tool, "nmap/masscan");
    assert!(res.errors[0].message.contains("nmap segfaulted"));
    assert!(res.tools_run.is_empty());
}
