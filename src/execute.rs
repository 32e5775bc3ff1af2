//! Agent entry point: task in, finalized suite and outcome out.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{DebugConfig, ExecutionMode};
use crate::harness::Harness;
use crate::modules::builtin_modules;
use crate::runner::Runner;
use crate::suite::SuiteResult;
use crate::types::{Category, CategorySummary, CheckResult, CheckStatus};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Task {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

#[derive(Serialize, Debug, Clone)]
pub struct AgentOutcome {
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<SuiteResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary: Value,
}

impl AgentOutcome {
    fn failed(error: String) -> Self {
        Self { status: OutcomeStatus::Failed, suite: None, error: Some(error), summary: Value::Null }
    }

    fn from_suite(suite: SuiteResult) -> Self {
        let status = match suite.overall_status {
            CheckStatus::Fail | CheckStatus::Error => OutcomeStatus::Failed,
            CheckStatus::Pass | CheckStatus::Skip => OutcomeStatus::Success,
        };
        Self { status, summary: summary_json(&suite), suite: Some(suite), error: None }
    }
}

fn summary_counts(s: &CategorySummary) -> Value {
    json!({
        "total": s.total,
        "passed": s.passed,
        "failed": s.failed,
        "skipped": s.skipped,
        "errors": s.errors,
    })
}

pub fn summary_json(suite: &SuiteResult) -> Value {
    json!({
        "mode": suite.mode,
        "duration_ms": suite.duration.as_millis() as u64,
        "total_tests": suite.total_tests(),
        "passed": suite.total_passed(),
        "failed": suite.total_failed(),
        "skipped": suite.total_skipped(),
        "errors": suite.total_errors(),
        "pass_rate": suite.pass_rate(),
        "overall_status": suite.overall_status,
        "interrupted": suite.interrupted,
        "sdk_summary": summary_counts(&suite.sdk_summary),
        "framework_summary": summary_counts(&suite.framework_summary),
    })
}

/// Register the built-in modules the mode enables, minus skipped names and categories.
pub fn register_modules(runner: &mut Runner, config: &DebugConfig) {
    for module in builtin_modules(config) {
        let enabled = match config.mode {
            ExecutionMode::Full | ExecutionMode::Single => true,
            ExecutionMode::Sdk => module.category() == Category::Sdk,
            ExecutionMode::Framework => module.category() == Category::Framework,
            ExecutionMode::NetworkRecon => module.name() == "network-recon",
        };
        if enabled
            && config.should_run_test(module.name())
            && config.should_run_category(module.category())
        {
            runner.register(module);
        }
    }
}

/// Parse configuration from the task, then run.
///
/// Configuration problems produce a failed outcome, never a panic.
pub async fn execute(
    harness: Arc<dyn Harness>,
    task: &Task,
    cancel: &CancellationToken,
) -> AgentOutcome {
    info!(task_id = %task.id, goal = %task.goal, "execution started");
    match DebugConfig::from_task(&task.goal, &task.metadata) {
        Ok(config) => execute_with_config(harness, &config, cancel).await,
        Err(e) => {
            error!(error = %e, "failed to parse configuration");
            AgentOutcome::failed(format!("Configuration error: {e}"))
        }
    }
}

pub async fn execute_with_config(
    harness: Arc<dyn Harness>,
    config: &DebugConfig,
    cancel: &CancellationToken,
) -> AgentOutcome {
    if let Err(e) = config.validate() {
        return AgentOutcome::failed(format!("Configuration error: {e}"));
    }
    let mut runner = Runner::new(harness).with_timeouts(config.timeout, config.test_timeout);
    register_modules(&mut runner, config);
    info!(
        mode = %config.mode,
        modules = runner.modules().len(),
        sdk = runner.modules_in(Category::Sdk).count(),
        framework = runner.modules_in(Category::Framework).count(),
        "modules registered"
    );

    let suite = match config.mode {
        ExecutionMode::Full => runner.run(cancel).await,
        ExecutionMode::Sdk => runner.run_category(Category::Sdk, cancel).await,
        ExecutionMode::Framework => runner.run_category(Category::Framework, cancel).await,
        ExecutionMode::NetworkRecon => {
            Ok(run_named(&runner, config.mode, &["network-recon".to_string()], "NR", cancel).await)
        }
        ExecutionMode::Single => {
            Ok(run_named(&runner, config.mode, &config.target_tests, "unknown", cancel).await)
        }
    };

    match suite {
        Ok(suite) => {
            info!(
                total = suite.total_tests(),
                passed = suite.total_passed(),
                failed = suite.total_failed(),
                status = %suite.overall_status,
                pass_rate = %format!("{:.2}%", suite.pass_rate() * 100.0),
                "execution finished"
            );
            AgentOutcome::from_suite(suite)
        }
        Err(e) => {
            error!(error = %e, "suite execution failed");
            AgentOutcome::failed(format!("Execution error: {e}"))
        }
    }
}

/// Run each named module in turn; a lookup failure becomes an Error result
/// instead of ending the run.
async fn run_named(
    runner: &Runner,
    mode: ExecutionMode,
    names: &[String],
    missing_tag: &str,
    cancel: &CancellationToken,
) -> SuiteResult {
    let mut suite = SuiteResult::new(mode.as_str());
    for name in names {
        match runner.run_single(name, cancel).await {
            Ok(results) => suite.extend(results),
            Err(e) => {
                warn!(test = %name, error = %e, "single module run failed");
                suite.push(CheckResult::error(name, missing_tag, Category::Sdk, Duration::ZERO, e));
            }
        }
    }
    suite.finalize();
    suite
}
