//! Narrow capability interfaces onto the agent platform.
//!
//! Each consumer depends only on what it calls: the recon runner needs a
//! [`ToolInvoker`], diagnostic modules receive the composed [`Harness`].

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::HarnessError;
use crate::graph::GraphBatch;

/// Upper bound for any caller-supplied fan-out width.
pub const MAX_TOOL_CONCURRENCY: usize = 64;

/// A single tool invocation request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub input: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self { name: name.into(), input }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke_tool(&self, name: &str, input: Value) -> Result<Value, HarnessError>;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, HarnessError>;

    /// Invoke every call with at most `max_concurrency` in flight. Results are
    /// returned in call order; a failed call is an `Err` slot, not a failed batch.
    async fn invoke_tools_parallel(
        &self,
        calls: Vec<ToolCall>,
        max_concurrency: usize,
    ) -> Vec<Result<Value, HarnessError>> {
        let sem = Semaphore::new(max_concurrency.clamp(1, MAX_TOOL_CONCURRENCY));
        let sem = &sem;
        let pending = calls.into_iter().map(|call| async move {
            // The semaphore is never closed, so a failed acquire cannot happen.
            let _permit = sem.acquire().await.ok();
            self.invoke_tool(&call.name, call.input).await
        });
        join_all(pending).await
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    pub content: String,
    #[serde(default)]
    pub model: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, slot: &str, messages: Vec<Message>) -> Result<Completion, HarnessError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    #[default]
    Unavailable,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct HealthStatus {
    pub state: HealthState,
    #[serde(default)]
    pub message: String,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self { state: HealthState::Healthy, message: String::new() }
    }

    pub fn is_healthy(&self) -> bool {
        self.state == HealthState::Healthy
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Store a batch; returns the ids the store assigned or merged into.
    async fn store_graph_batch(&self, batch: GraphBatch) -> Result<Vec<String>, HarnessError>;

    async fn graph_health(&self) -> HealthStatus;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub title: String,
    pub content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub mission_id: String,
    pub agent: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub remediation: Option<String>,
}

#[async_trait]
pub trait FindingSink: Send + Sync {
    async fn submit_finding(&self, finding: Finding) -> Result<(), HarnessError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Working,
    Mission,
    LongTerm,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 3] = [MemoryTier::Working, MemoryTier::Mission, MemoryTier::LongTerm];

    pub fn as_str(self) -> &'static str {
        match self {
            MemoryTier::Working => "working",
            MemoryTier::Mission => "mission",
            MemoryTier::LongTerm => "long_term",
        }
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn memory_get(&self, tier: MemoryTier, key: &str) -> Result<Option<Value>, HarnessError>;

    async fn memory_set(&self, tier: MemoryTier, key: &str, value: Value) -> Result<(), HarnessError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct MissionContext {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TargetInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub connection: BTreeMap<String, Value>,
}

pub trait PlatformContext: Send + Sync {
    fn mission(&self) -> MissionContext;

    fn target(&self) -> TargetInfo;
}

/// Everything a diagnostic module may touch.
pub trait Harness:
    ToolInvoker + LlmClient + GraphStore + FindingSink + MemoryStore + PlatformContext
{
}

impl<T> Harness for T where
    T: ToolInvoker + LlmClient + GraphStore + FindingSink + MemoryStore + PlatformContext
{
}
