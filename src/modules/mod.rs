//! Built-in diagnostic modules.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::config::DebugConfig;
use crate::runner::DiagnosticModule;
use crate::types::{Category, CheckResult};

pub mod findings;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod recon;
pub mod tools;

pub use findings::FindingSubmissionModule;
pub use graph::GraphStorageModule;
pub use llm::LlmCompletionModule;
pub use memory::MemoryTiersModule;
pub use recon::NetworkReconModule;
pub use tools::ToolInvocationModule;

/// Every built-in module, SDK checks first.
pub fn builtin_modules(config: &DebugConfig) -> Vec<Arc<dyn DiagnosticModule>> {
    vec![
        Arc::new(ToolInvocationModule::new(config.tool_name.clone(), config.tool_timeout)),
        Arc::new(LlmCompletionModule::default()),
        Arc::new(FindingSubmissionModule::default()),
        Arc::new(NetworkReconModule::from_config(config)),
        Arc::new(MemoryTiersModule),
        Arc::new(GraphStorageModule),
    ]
}

/// Identity and start time of one check, stamped onto whatever result it ends with.
#[derive(Debug, Clone)]
pub(crate) struct Check {
    name: String,
    requirement: &'static str,
    category: Category,
    started: Instant,
}

impl Check {
    pub(crate) fn start(name: impl Into<String>, requirement: &'static str, category: Category) -> Self {
        Self { name: name.into(), requirement, category, started: Instant::now() }
    }

    pub(crate) fn pass(&self, message: impl Into<String>) -> CheckResult {
        CheckResult::pass(&self.name, self.requirement, self.category, self.started.elapsed(), message)
    }

    pub(crate) fn fail(&self, message: impl Into<String>, error: impl fmt::Display) -> CheckResult {
        CheckResult::fail(&self.name, self.requirement, self.category, self.started.elapsed(), message, error)
    }

    pub(crate) fn skip(&self, message: impl Into<String>) -> CheckResult {
        CheckResult::skip(&self.name, self.requirement, self.category, message)
    }

    pub(crate) fn error(&self, error: impl fmt::Display) -> CheckResult {
        CheckResult::error(&self.name, self.requirement, self.category, self.started.elapsed(), error)
    }
}
