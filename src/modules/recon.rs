use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Check;
use crate::analysis::{analysis_prompt, parse_analysis};
use crate::config::DebugConfig;
use crate::error::HarnessError;
use crate::graph::{agent_run_id, part_of};
use crate::harness::{Harness, MemoryTier, Message, ToolCall};
use crate::netutil::{expand_cidr_to_ips, host_count, parse_subnet};
use crate::recon::{ReconConfig, ReconPhaseResult, ReconRunResult, ReconRunner};
use crate::runner::DiagnosticModule;
use crate::types::{Category, CheckResult};

const REQUIREMENT: &str = "NR";

/// Largest sweep the module will run.
pub const MAX_SWEEP_HOSTS: u64 = 256;

/// Reachability checks are cheap; heavy scanners get the recon runner's bound.
const PING_CONCURRENCY: usize = 20;

/// Sweeps the target subnet, runs every recon phase and stores the resulting
/// graph under the current mission.
pub struct NetworkReconModule {
    subnet: Option<String>,
    domains: Vec<String>,
    tool_timeout: Duration,
}

impl NetworkReconModule {
    pub fn new(subnet: Option<String>, domains: Vec<String>, tool_timeout: Duration) -> Self {
        Self { subnet, domains, tool_timeout }
    }

    pub fn from_config(config: &DebugConfig) -> Self {
        Self::new(config.subnet.clone(), config.domains.clone(), config.tool_timeout)
    }

    /// Subnet from the target's connection settings, else from configuration.
    fn subnet_for(&self, harness: &dyn Harness) -> Option<String> {
        harness
            .target()
            .connection
            .get("subnet")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.subnet.clone())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Live addresses, or `None` when no ping call succeeded.
async fn ping_sweep(harness: &dyn Harness, ips: &[String]) -> (Option<Vec<String>>, CheckResult) {
    let check = Check::start("Ping Sweep", REQUIREMENT, Category::Sdk);
    let calls = ips
        .iter()
        .map(|ip| ToolCall::new("ping", json!({ "targets": [ip], "timeout": 1000, "count": 1 })))
        .collect();
    let responses = harness.invoke_tools_parallel(calls, PING_CONCURRENCY).await;

    let mut live = Vec::new();
    let mut first_error: Option<&HarnessError> = None;
    for (ip, response) in ips.iter().zip(&responses) {
        match response {
            Ok(output) => {
                let alive = output
                    .get("results")
                    .and_then(Value::as_array)
                    .is_some_and(|rows| rows.iter().any(|r| r.get("alive") == Some(&Value::Bool(true))));
                if alive {
                    live.push(ip.clone());
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    let failed = responses.iter().filter(|r| r.is_err()).count();
    if failed == responses.len() && !responses.is_empty() {
        let why = first_error.map(ToString::to_string).unwrap_or_default();
        info!(swept = ips.len(), "ping tool unavailable; sweeping with the recon tools instead");
        return (None, check.skip(format!("Ping tool unavailable: {why}")));
    }
    let pct = live.len() as f64 / ips.len().max(1) as f64 * 100.0;
    let result = check
        .pass(format!("Ping sweep: {}/{} hosts alive ({pct:.1}%)", live.len(), ips.len()))
        .with_detail("alive", live.len())
        .with_detail("swept", ips.len())
        .with_detail("failed_calls", failed);
    info!(alive = live.len(), swept = ips.len(), failed, "ping sweep finished");
    (Some(live), result)
}

fn phase_result(phase: &ReconPhaseResult) -> CheckResult {
    let check = Check::start(format!("Recon Phase: {}", phase.phase), REQUIREMENT, Category::Sdk);
    let errors: Vec<String> = phase.errors.iter().map(ToString::to_string).collect();
    let result = if phase.tools_run.is_empty() && !phase.errors.is_empty() {
        check.skip(format!("No {} tool available: {}", phase.phase, errors.join("; ")))
    } else {
        check.pass(format!(
            "{}: tools {:?}, {} nodes, {} relationships, {} errors",
            phase.phase,
            phase.tools_run,
            phase.nodes_created,
            phase.relations_created,
            phase.errors.len()
        ))
    };
    result
        .with_detail("tools_run", json!(phase.tools_run))
        .with_detail("nodes_created", phase.nodes_created)
        .with_detail("relations_created", phase.relations_created)
        .with_detail("errors", json!(errors))
        .with_detail("duration_ms", phase.duration.as_millis() as u64)
}

async fn store_graph(harness: &dyn Harness, run: &ReconRunResult, run_id: &str, mission_id: &str) -> CheckResult {
    let check = Check::start("Recon Graph Storage", REQUIREMENT, Category::Sdk);
    let health = harness.graph_health().await;
    if !health.is_healthy() {
        return check.skip(format!("Graph store unavailable: {:?} - {}", health.state, health.message));
    }

    let mut batch = run.graph.clone();
    if !mission_id.is_empty() {
        batch.push_relationship(part_of(&agent_run_id(run_id), mission_id));
    }
    if let Err(e) = batch.validate() {
        return check.fail("Recon batch violates the taxonomy", &e);
    }
    let relationships = batch.relationships.len();
    match harness.store_graph_batch(batch).await {
        Ok(ids) => check
            .pass(format!("Graph: {} nodes, {relationships} relationships stored", ids.len()))
            .with_detail("stored_ids", ids.len())
            .with_detail("relationships", relationships),
        Err(e) => check.fail(format!("Failed to store graph batch: {e}"), &e),
    }
}

async fn analyze(harness: &dyn Harness, subnet: &str, live_hosts: usize, run: &ReconRunResult) -> CheckResult {
    let check = Check::start("LLM Security Analysis", REQUIREMENT, Category::Sdk);
    if run.discovered.hosts.is_empty() {
        return check.skip("No scan results available for LLM analysis");
    }

    let prompt = analysis_prompt(subnet, live_hosts, &run.discovered);
    let reply = match harness.complete("primary", vec![Message::user(prompt)]).await {
        Ok(reply) => reply,
        Err(e) => return check.skip(format!("LLM completion failed: {e}. LLM analysis unavailable")),
    };
    let analysis = match parse_analysis(&reply.content) {
        Ok(analysis) => analysis,
        Err(e) => return check.fail(format!("Failed to parse LLM response: {e}"), &e),
    };

    match serde_json::to_value(&analysis) {
        Ok(doc) => {
            if let Err(e) = harness.memory_set(MemoryTier::Working, "llm_analysis", doc).await {
                warn!(error = %e, "failed to store LLM analysis in working memory");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode LLM analysis"),
    }
    info!(
        risk_level = %analysis.risk_level,
        high_risk_services = analysis.high_risk_services.len(),
        "LLM analysis completed"
    );
    check
        .pass(format!(
            "LLM analysis completed: Risk Level={}, High-Risk Services={}, Recommendations={}",
            analysis.risk_level,
            analysis.high_risk_services.len(),
            analysis.recommendations.len()
        ))
        .with_detail("risk_level", analysis.risk_level.as_str())
        .with_detail("high_risk_services", json!(analysis.high_risk_services))
        .with_detail("model", reply.model)
}

async fn remember(harness: &dyn Harness, summary: Value) -> CheckResult {
    let check = Check::start("Recon Memory", REQUIREMENT, Category::Sdk);
    match harness.memory_set(MemoryTier::Working, "recon_summary", summary).await {
        Ok(()) => check.pass("Stored recon summary in working memory"),
        Err(HarnessError::Unavailable(why)) => check.skip(format!("Working memory unavailable: {why}")),
        Err(e) => check.fail(format!("Failed to store recon summary: {e}"), &e),
    }
}

#[async_trait]
impl DiagnosticModule for NetworkReconModule {
    fn name(&self) -> &str {
        "network-recon"
    }

    fn description(&self) -> &str {
        "Ping sweep, phase-sequenced reconnaissance, graph storage and LLM analysis"
    }

    fn category(&self) -> Category {
        Category::Sdk
    }

    fn requirement_tag(&self) -> &str {
        REQUIREMENT
    }

    async fn run(&self, cancel: CancellationToken, harness: Arc<dyn Harness>) -> Vec<CheckResult> {
        let target = Check::start("Recon Target", REQUIREMENT, Category::Sdk);
        let Some(subnet) = self.subnet_for(harness.as_ref()) else {
            return vec![target.skip("No subnet in target connection or configuration")];
        };
        let net = match parse_subnet(&subnet) {
            Ok(net) => net,
            Err(e) => return vec![target.fail(format!("Invalid CIDR '{subnet}'"), e)],
        };
        let count = host_count(net);
        if count > MAX_SWEEP_HOSTS {
            return vec![target.skip(format!(
                "Subnet too large ({count} IPs). Max {MAX_SWEEP_HOSTS} IPs for safety"
            ))];
        }
        let mut results = vec![target
            .pass(format!("Target subnet {net} ({count} addresses)"))
            .with_detail("subnet", net.to_string())];

        let ips: Vec<String> = expand_cidr_to_ips(net).iter().map(ToString::to_string).collect();
        let (live, sweep) = ping_sweep(harness.as_ref(), &ips).await;
        results.push(sweep);
        if live.as_ref().is_some_and(Vec::is_empty) {
            results.push(
                Check::start("Recon Phases", REQUIREMENT, Category::Sdk)
                    .skip(format!("No live hosts in {net}; skipping reconnaissance")),
            );
            return results;
        }

        let mission = harness.mission();
        let run_id = if mission.id.is_empty() { "local".to_string() } else { mission.id.clone() };
        let runner = ReconRunner::new(Arc::clone(&harness), run_id.clone())
            .with_config(ReconConfig { tool_timeout: self.tool_timeout, ..ReconConfig::default() })
            .with_cancel(cancel);

        let run = match runner.run_all(&net.to_string(), &self.domains).await {
            Ok(run) => run,
            Err(e) => {
                warn!(error = %e, "recon run aborted");
                results.push(Check::start("Recon Run", REQUIREMENT, Category::Sdk).error(e));
                return results;
            }
        };
        results.extend(run.phases.iter().map(phase_result));
        results.push(store_graph(harness.as_ref(), &run, &run_id, &mission.id).await);
        let live_count = live.as_ref().map_or(run.total_hosts, Vec::len);
        results.push(analyze(harness.as_ref(), &net.to_string(), live_count, &run).await);

        let mut summary = run.summary();
        summary["subnet"] = json!(net.to_string());
        summary["live_hosts"] = json!(live.unwrap_or_default());
        results.push(remember(harness.as_ref(), summary).await);
        results
    }
}
