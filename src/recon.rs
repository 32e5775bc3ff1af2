//! Phase-sequenced reconnaissance.
//!
//! Four fixed phases (discover, probe, scan, domain), each calling one or
//! more external tools per target. Tool and parse failures are recorded in
//! the phase's error list and never stop the pipeline; only cancellation
//! ends a run early.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, ReconError};
use crate::extract::{GraphExtractor, TaxonomyExtractor};
use crate::graph::{self, GraphBatch, NodeType};
use crate::harness::{ToolInvoker, MAX_TOOL_CONCURRENCY};
use crate::netutil::target_urls;
use crate::parse::{parse_discovery, DiscoveryOutput};
use crate::runner::panic_message;
use crate::types::now_rfc3339;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Discover,
    Probe,
    Scan,
    Domain,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Discover, Phase::Probe, Phase::Scan, Phase::Domain];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Discover => "discover",
            Phase::Probe => "probe",
            Phase::Scan => "scan",
            Phase::Domain => "domain",
        }
    }

    pub fn plan(self) -> PhasePlan {
        match self {
            Phase::Discover => PhasePlan {
                tools: &["nmap", "masscan"],
                strategy: Strategy::Fallback,
                batching: Batching::PerTarget,
            },
            Phase::Probe => PhasePlan {
                tools: &["httpx"],
                strategy: Strategy::Fallback,
                batching: Batching::Batched,
            },
            Phase::Scan => PhasePlan {
                tools: &["nuclei"],
                strategy: Strategy::Fallback,
                batching: Batching::Batched,
            },
            Phase::Domain => PhasePlan {
                tools: &["subfinder", "amass"],
                strategy: Strategy::Union,
                batching: Batching::PerTarget,
            },
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ReconError::UnknownPhase(s.to_string()))
    }
}

/// How a phase combines its tools for one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Try tools in order until one responds.
    Fallback,
    /// Run every tool.
    Union,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Batching {
    /// One unit per target.
    PerTarget,
    /// One unit covering every target.
    Batched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePlan {
    pub tools: &'static [&'static str],
    pub strategy: Strategy,
    pub batching: Batching,
}

/// Input document for `tool` covering `targets`.
fn tool_input(tool: &str, targets: &[String]) -> Value {
    let first = targets.first().map(String::as_str).unwrap_or_default();
    match tool {
        "nmap" => json!({ "targets": targets, "options": "-sV" }),
        "masscan" => json!({ "targets": targets, "ports": "1-65535", "rate": 1000 }),
        "subfinder" => json!({ "domain": first }),
        "amass" => json!({ "domain": first, "passive": true }),
        _ => json!({ "targets": targets }),
    }
}

#[derive(Debug, Clone)]
pub struct ReconConfig {
    /// Bound on a single tool invocation.
    pub tool_timeout: Duration,
    /// Units in flight within a phase.
    pub max_concurrency: usize,
    pub agent_name: String,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(120),
            max_concurrency: 5,
            agent_name: "recon-harness".to_string(),
        }
    }
}

/// One failed tool invocation or undecodable output.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PhaseError {
    pub tool: String,
    pub target: String,
    pub message: String,
}

impl PhaseError {
    fn new(tool: &str, target: &str, message: impl fmt::Display) -> Self {
        Self { tool: tool.to_string(), target: target.to_string(), message: message.to_string() }
    }
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: {}", self.tool, self.target, self.message)
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ReconPhaseResult {
    pub phase: Phase,
    /// Successful invocations, in target order.
    pub tools_run: Vec<String>,
    pub nodes_created: usize,
    pub relations_created: usize,
    pub errors: Vec<PhaseError>,
    pub duration: Duration,
    /// Extracted entities followed by tool-execution provenance.
    #[serde(skip)]
    pub graph: GraphBatch,
}

impl ReconPhaseResult {
    fn empty(phase: Phase) -> Self {
        Self {
            phase,
            tools_run: Vec::new(),
            nodes_created: 0,
            relations_created: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
            graph: GraphBatch::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ReconRunResult {
    pub phases: Vec<ReconPhaseResult>,
    pub total_hosts: usize,
    pub total_ports: usize,
    pub total_endpoints: usize,
    pub total_findings: usize,
    pub duration: Duration,
    #[serde(skip)]
    pub graph: GraphBatch,
    /// Hosts and ports the discover phase decoded.
    #[serde(skip)]
    pub discovered: DiscoveryOutput,
}

impl ReconRunResult {
    pub fn phase(&self, phase: Phase) -> Option<&ReconPhaseResult> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn error_count(&self) -> usize {
        self.phases.iter().map(|p| p.errors.len()).sum()
    }

    /// Summary document suitable for memory or a report.
    pub fn summary(&self) -> Value {
        let phases: BTreeMap<&str, Value> = self
            .phases
            .iter()
            .map(|p| {
                (
                    p.phase.as_str(),
                    json!({
                        "tools_run": p.tools_run,
                        "nodes_created": p.nodes_created,
                        "relations_created": p.relations_created,
                        "errors": p.errors.len(),
                    }),
                )
            })
            .collect();
        json!({
            "phases": phases,
            "total_hosts": self.total_hosts,
            "total_ports": self.total_ports,
            "total_endpoints": self.total_endpoints,
            "total_findings": self.total_findings,
            "duration_ms": self.duration.as_millis() as u64,
        })
    }
}

struct UnitOutcome {
    label: String,
    tools_run: Vec<String>,
    errors: Vec<PhaseError>,
    entities: GraphBatch,
    outputs: Vec<Value>,
}

impl UnitOutcome {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            tools_run: Vec::new(),
            errors: Vec::new(),
            entities: GraphBatch::new(),
            outputs: Vec::new(),
        }
    }

    /// A unit that never finished still leaves one error behind.
    fn abandoned(phase: Phase, label: &str, message: impl fmt::Display) -> Self {
        let mut outcome = Self::new(label);
        outcome.errors.push(PhaseError::new(&phase.plan().tools.join("/"), label, message));
        outcome
    }
}

async fn run_unit<H: ToolInvoker + ?Sized>(
    harness: &H,
    extractor: &dyn TaxonomyExtractor,
    phase: Phase,
    label: &str,
    targets: &[String],
    tool_timeout: Duration,
) -> UnitOutcome {
    let plan = phase.plan();
    let mut outcome = UnitOutcome::new(label);
    for &tool in plan.tools {
        let call = harness.invoke_tool(tool, tool_input(tool, targets));
        let response = match time::timeout(tool_timeout, call).await {
            Ok(response) => response,
            Err(_) => Err(HarnessError::Timeout(tool_timeout)),
        };
        match response {
            Ok(output) => {
                debug!(%phase, tool, target = label, "tool responded");
                outcome.tools_run.push(tool.to_string());
                match extractor.extract(phase, tool, label, &output) {
                    Ok(batch) => outcome.entities.append(batch),
                    Err(e) => {
                        warn!(%phase, tool, target = label, error = %e, "tool output rejected");
                        outcome.errors.push(PhaseError::new(tool, label, e));
                    }
                }
                outcome.outputs.push(output);
                if plan.strategy == Strategy::Fallback {
                    break;
                }
            }
            Err(e) => {
                warn!(%phase, tool, target = label, error = %e, "tool invocation failed");
                outcome.errors.push(PhaseError::new(tool, label, e));
            }
        }
    }
    outcome
}

/// Drives the recon phases against any [`ToolInvoker`].
pub struct ReconRunner<H: ?Sized> {
    harness: Arc<H>,
    run_id: String,
    extractor: Arc<dyn TaxonomyExtractor>,
    config: ReconConfig,
    cancel: CancellationToken,
}

impl<H: ToolInvoker + ?Sized + 'static> ReconRunner<H> {
    pub fn new(harness: Arc<H>, run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        Self {
            harness,
            extractor: Arc::new(GraphExtractor::new(run_id.clone())),
            run_id,
            config: ReconConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TaxonomyExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_config(mut self, config: ReconConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run one phase by name. Unknown names fail before any tool is called.
    pub async fn run_phase_named(
        &self,
        name: &str,
        targets: &[String],
    ) -> Result<ReconPhaseResult, ReconError> {
        let phase = name.parse::<Phase>()?;
        self.run_phase(phase, targets).await
    }

    pub async fn run_phase(
        &self,
        phase: Phase,
        targets: &[String],
    ) -> Result<ReconPhaseResult, ReconError> {
        self.execute_phase(phase, targets).await.map(|(result, _)| result)
    }

    /// Discover `subnet`, then probe and scan every open TCP port found, then
    /// enumerate `domains`. Returns an error only when cancelled.
    pub async fn run_all(
        &self,
        subnet: &str,
        domains: &[String],
    ) -> Result<ReconRunResult, ReconError> {
        let start = Instant::now();
        self.ensure_live()?;
        info!(run_id = %self.run_id, subnet, domains = domains.len(), "recon run started");

        let mut phases = Vec::new();
        let (discover, outputs) = self.execute_phase(Phase::Discover, &[subnet.to_string()]).await?;
        phases.push(discover);
        self.ensure_live()?;

        let mut discovered = DiscoveryOutput::default();
        for output in &outputs {
            if let Ok(parsed) = parse_discovery("discover", output) {
                discovered.hosts.extend(parsed.hosts);
            }
        }
        let urls = target_urls(&discovered);
        if urls.is_empty() {
            info!(run_id = %self.run_id, "no open ports discovered; skipping probe and scan");
        } else {
            for phase in [Phase::Probe, Phase::Scan] {
                let (result, _) = self.execute_phase(phase, &urls).await?;
                phases.push(result);
                self.ensure_live()?;
            }
        }

        if !domains.is_empty() {
            let (result, _) = self.execute_phase(Phase::Domain, domains).await?;
            phases.push(result);
        }

        let mut graph = GraphBatch::new();
        graph.push_node(graph::agent_run_node(&self.run_id, &self.config.agent_name, &now_rfc3339()));
        for phase in &phases {
            graph.append(phase.graph.clone());
        }

        let result = ReconRunResult {
            total_hosts: graph.unique_ids(NodeType::Host).len(),
            total_ports: graph.unique_ids(NodeType::Port).len(),
            total_endpoints: graph.unique_ids(NodeType::Endpoint).len(),
            total_findings: graph.unique_ids(NodeType::Finding).len(),
            phases,
            duration: start.elapsed(),
            graph,
            discovered,
        };
        info!(
            run_id = %self.run_id,
            hosts = result.total_hosts,
            ports = result.total_ports,
            endpoints = result.total_endpoints,
            findings = result.total_findings,
            errors = result.error_count(),
            "recon run finished"
        );
        Ok(result)
    }

    fn ensure_live(&self) -> Result<(), ReconError> {
        if self.cancel.is_cancelled() {
            return Err(ReconError::Cancelled);
        }
        Ok(())
    }

    async fn execute_phase(
        &self,
        phase: Phase,
        targets: &[String],
    ) -> Result<(ReconPhaseResult, Vec<Value>), ReconError> {
        self.ensure_live()?;
        if targets.is_empty() {
            debug!(%phase, "no targets; phase is empty");
            return Ok((ReconPhaseResult::empty(phase), Vec::new()));
        }

        let start = Instant::now();
        let started_at = now_rfc3339();
        let plan = phase.plan();
        info!(%phase, targets = targets.len(), tools = ?plan.tools, "phase started");

        let units: Vec<(String, Vec<String>)> = match plan.batching {
            Batching::PerTarget => targets.iter().map(|t| (t.clone(), vec![t.clone()])).collect(),
            Batching::Batched => vec![(targets.join(","), targets.to_vec())],
        };
        let unit_count = units.len();

        let sem = Arc::new(Semaphore::new(
            self.config.max_concurrency.clamp(1, MAX_TOOL_CONCURRENCY),
        ));
        let mut set = JoinSet::new();
        for (index, (label, unit_targets)) in units.into_iter().enumerate() {
            let harness = Arc::clone(&self.harness);
            let extractor = Arc::clone(&self.extractor);
            let sem = Arc::clone(&sem);
            let cancel = self.cancel.clone();
            let tool_timeout = self.config.tool_timeout;

            set.spawn(async move {
                let work = async {
                    // The semaphore is never closed, so a failed acquire cannot happen.
                    let _permit = sem.acquire_owned().await.ok();
                    AssertUnwindSafe(run_unit(
                        &*harness,
                        &*extractor,
                        phase,
                        &label,
                        &unit_targets,
                        tool_timeout,
                    ))
                    .catch_unwind()
                    .await
                };
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => {
                        UnitOutcome::abandoned(phase, &label, "cancelled before completion")
                    }
                    res = work => match res {
                        Ok(outcome) => outcome,
                        Err(payload) => UnitOutcome::abandoned(
                            phase,
                            &label,
                            format!("tool unit panicked: {}", panic_message(payload.as_ref())),
                        ),
                    },
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<UnitOutcome>> = (0..unit_count).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(outcome);
                    }
                }
                Err(e) => warn!(%phase, error = %e, "recon unit did not complete"),
            }
        }

        let mut result = ReconPhaseResult::empty(phase);
        let mut provenance = GraphBatch::new();
        let mut outputs = Vec::new();
        let run_node_id = graph::agent_run_id(&self.run_id);
        for outcome in slots.into_iter().flatten() {
            for tool in &outcome.tools_run {
                let exec = graph::tool_execution_node(&self.run_id, tool, &outcome.label, &started_at)
                    .with_property("phase", phase.as_str());
                provenance.push_relationship(graph::executed_by(&exec.id, &run_node_id));
                provenance.push_node(exec);
            }
            result.tools_run.extend(outcome.tools_run);
            result.errors.extend(outcome.errors);
            result.graph.append(outcome.entities);
            outputs.extend(outcome.outputs);
        }
        result.nodes_created = result.graph.nodes.len();
        result.relations_created = result.graph.relationships.len();
        result.graph.append(provenance);
        result.duration = start.elapsed();

        info!(
            %phase,
            tools_run = ?result.tools_run,
            nodes = result.nodes_created,
            relations = result.relations_created,
            errors = result.errors.len(),
            "phase finished"
        );
        Ok((result, outputs))
    }
}
