//! A harness that answers from recorded fixtures.
//!
//! Used by the CLI when no live platform is attached and by the tests. Tool
//! outputs, the completion and the mission/target context come from a JSON
//! fixture; stored graph batches, findings, memory and the call log are kept
//! in memory so callers can inspect them afterwards.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::HarnessError;
use crate::graph::GraphBatch;
use crate::harness::{
    Completion, Finding, FindingSink, GraphStore, HealthState, HealthStatus, LlmClient, MemoryStore,
    MemoryTier, Message, MissionContext, PlatformContext, TargetInfo, ToolCall, ToolDescriptor,
    ToolInvoker,
};

/// Recorded answer for one tool. `{"error": "..."}` replays a failure; any
/// other value is returned verbatim.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ToolFixture {
    Failure(ToolFailure),
    Output(Value),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ToolFailure {
    pub error: String,
}

fn yes() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReplayFixture {
    #[serde(default)]
    pub tools: BTreeMap<String, ToolFixture>,
    /// Advertised tools; defaults to the names under `tools`.
    #[serde(default)]
    pub tool_list: Option<Vec<ToolDescriptor>>,
    /// Artificial latency per tool, in milliseconds.
    #[serde(default)]
    pub tool_delays_ms: BTreeMap<String, u64>,
    #[serde(default)]
    pub completion: Option<Completion>,
    #[serde(default = "yes")]
    pub graph_healthy: bool,
    #[serde(default)]
    pub graph_error: Option<String>,
    #[serde(default = "yes")]
    pub memory_available: bool,
    #[serde(default)]
    pub finding_error: Option<String>,
    #[serde(default)]
    pub mission: MissionContext,
    #[serde(default)]
    pub target: TargetInfo,
}

impl Default for ReplayFixture {
    fn default() -> Self {
        Self {
            tools: BTreeMap::new(),
            tool_list: None,
            tool_delays_ms: BTreeMap::new(),
            completion: None,
            graph_healthy: true,
            graph_error: None,
            memory_available: true,
            finding_error: None,
            mission: MissionContext::default(),
            target: TargetInfo::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ReplayHarness {
    fixture: ReplayFixture,
    memory: Mutex<HashMap<(MemoryTier, String), Value>>,
    batches: Mutex<Vec<GraphBatch>>,
    findings: Mutex<Vec<Finding>>,
    calls: Mutex<Vec<ToolCall>>,
}

impl ReplayHarness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: ReplayFixture) -> Self {
        Self { fixture, ..Self::default() }
    }

    /// Load a fixture file. Errors if the file cannot be read or decoded.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read fixture: {}", path.as_ref().display()))?;
        let fixture: ReplayFixture = serde_json::from_str(&content)
            .with_context(|| format!("invalid fixture: {}", path.as_ref().display()))?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn fixture(&self) -> &ReplayFixture {
        &self.fixture
    }

    pub fn with_tool_output(mut self, tool: impl Into<String>, output: Value) -> Self {
        self.fixture.tools.insert(tool.into(), ToolFixture::Output(output));
        self
    }

    pub fn with_tool_error(mut self, tool: impl Into<String>, message: impl Into<String>) -> Self {
        self.fixture
            .tools
            .insert(tool.into(), ToolFixture::Failure(ToolFailure { error: message.into() }));
        self
    }

    pub fn with_tool_delay(mut self, tool: impl Into<String>, delay: Duration) -> Self {
        self.fixture.tool_delays_ms.insert(tool.into(), delay.as_millis() as u64);
        self
    }

    pub fn with_completion(mut self, content: impl Into<String>) -> Self {
        self.fixture.completion = Some(Completion { content: content.into(), model: "replay".into() });
        self
    }

    pub fn with_mission(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.fixture.mission = MissionContext { id: id.into(), name: name.into() };
        self
    }

    pub fn with_connection(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fixture.target.connection.insert(key.into(), value);
        self
    }

    pub fn with_graph_health(mut self, healthy: bool) -> Self {
        self.fixture.graph_healthy = healthy;
        self
    }

    pub fn without_memory(mut self) -> Self {
        self.fixture.memory_available = false;
        self
    }

    /// Every invocation seen so far, in arrival order.
    pub async fn tool_calls(&self) -> Vec<ToolCall> {
        self.calls.lock().await.clone()
    }

    pub async fn stored_batches(&self) -> Vec<GraphBatch> {
        self.batches.lock().await.clone()
    }

    pub async fn findings(&self) -> Vec<Finding> {
        self.findings.lock().await.clone()
    }
}

#[async_trait]
impl ToolInvoker for ReplayHarness {
    async fn invoke_tool(&self, name: &str, input: Value) -> Result<Value, HarnessError> {
        self.calls.lock().await.push(ToolCall::new(name, input));
        if let Some(ms) = self.fixture.tool_delays_ms.get(name) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        match self.fixture.tools.get(name) {
            Some(ToolFixture::Output(output)) => Ok(output.clone()),
            Some(ToolFixture::Failure(f)) => {
                debug!(tool = name, error = %f.error, "replaying tool failure");
                Err(HarnessError::ToolFailed { tool: name.to_string(), message: f.error.clone() })
            }
            None => Err(HarnessError::ToolNotFound(name.to_string())),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, HarnessError> {
        if let Some(list) = &self.fixture.tool_list {
            return Ok(list.clone());
        }
        Ok(self
            .fixture
            .tools
            .keys()
            .map(|name| ToolDescriptor { name: name.clone(), description: String::new() })
            .collect())
    }
}

#[async_trait]
impl LlmClient for ReplayHarness {
    async fn complete(&self, _slot: &str, _messages: Vec<Message>) -> Result<Completion, HarnessError> {
        self.fixture
            .completion
            .clone()
            .ok_or_else(|| HarnessError::Unavailable("no completion recorded".into()))
    }
}

#[async_trait]
impl GraphStore for ReplayHarness {
    async fn store_graph_batch(&self, batch: GraphBatch) -> Result<Vec<String>, HarnessError> {
        if let Some(e) = &self.fixture.graph_error {
            return Err(HarnessError::Graph(e.clone()));
        }
        let ids = batch.nodes.iter().map(|n| n.id.clone()).collect();
        self.batches.lock().await.push(batch);
        Ok(ids)
    }

    async fn graph_health(&self) -> HealthStatus {
        if self.fixture.graph_healthy {
            HealthStatus::healthy()
        } else {
            HealthStatus { state: HealthState::Unavailable, message: "graph store offline".into() }
        }
    }
}

#[async_trait]
impl FindingSink for ReplayHarness {
    async fn submit_finding(&self, finding: Finding) -> Result<(), HarnessError> {
        if let Some(e) = &self.fixture.finding_error {
            return Err(HarnessError::Finding(e.clone()));
        }
        self.findings.lock().await.push(finding);
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for ReplayHarness {
    async fn memory_get(&self, tier: MemoryTier, key: &str) -> Result<Option<Value>, HarnessError> {
        if !self.fixture.memory_available {
            return Err(HarnessError::Unavailable("memory store not configured".into()));
        }
        Ok(self.memory.lock().await.get(&(tier, key.to_string())).cloned())
    }

    async fn memory_set(&self, tier: MemoryTier, key: &str, value: Value) -> Result<(), HarnessError> {
        if !self.fixture.memory_available {
            return Err(HarnessError::Unavailable("memory store not configured".into()));
        }
        self.memory.lock().await.insert((tier, key.to_string()), value);
        Ok(())
    }
}

impl PlatformContext for ReplayHarness {
    fn mission(&self) -> MissionContext {
        self.fixture.mission.clone()
    }

    fn target(&self) -> TargetInfo {
        self.fixture.target.clone()
    }
}
