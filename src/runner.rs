//! Module registry and supervised execution.
//!
//! Every module runs on its own task. A panic, a timeout or a cancellation
//! inside one module becomes a single Error result for that module and the
//! suite carries on with the next one.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::RunnerError;
use crate::harness::Harness;
use crate::suite::SuiteResult;
use crate::types::{Category, CheckResult, CheckStatus};

pub const DEFAULT_SUITE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MODULE_TIMEOUT: Duration = Duration::from_secs(10);

/// A pluggable diagnostic.
///
/// `run` reports through [`CheckResult`] constructors and should return
/// promptly once `cancel` fires. The runner does not check the categories or
/// requirement tags a module puts on its results.
#[async_trait]
pub trait DiagnosticModule: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn category(&self) -> Category;

    fn requirement_tag(&self) -> &str;

    async fn run(&self, cancel: CancellationToken, harness: Arc<dyn Harness>) -> Vec<CheckResult>;
}

pub struct Runner {
    modules: Vec<Arc<dyn DiagnosticModule>>,
    harness: Arc<dyn Harness>,
    suite_timeout: Duration,
    module_timeout: Duration,
}

impl Runner {
    pub fn new(harness: Arc<dyn Harness>) -> Self {
        Self {
            modules: Vec::new(),
            harness,
            suite_timeout: DEFAULT_SUITE_TIMEOUT,
            module_timeout: DEFAULT_MODULE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, suite_timeout: Duration, module_timeout: Duration) -> Self {
        self.suite_timeout = suite_timeout;
        self.module_timeout = module_timeout;
        self
    }

    /// Append a module. Duplicate names are kept and all of them run.
    pub fn register(&mut self, module: Arc<dyn DiagnosticModule>) {
        self.modules.push(module);
    }

    pub fn modules(&self) -> &[Arc<dyn DiagnosticModule>] {
        &self.modules
    }

    pub fn modules_in(&self, category: Category) -> impl Iterator<Item = &Arc<dyn DiagnosticModule>> {
        self.modules.iter().filter(move |m| m.category() == category)
    }

    /// Every registered module once, in registration order.
    ///
    /// Suite runs are bounded by the suite timeout only; the per-module
    /// timeout applies to [`Runner::run_single`].
    pub async fn run(&self, cancel: &CancellationToken) -> Result<SuiteResult, RunnerError> {
        self.run_modules("full", self.modules.iter(), cancel).await
    }

    pub async fn run_category(
        &self,
        category: Category,
        cancel: &CancellationToken,
    ) -> Result<SuiteResult, RunnerError> {
        self.run_modules(category.as_str(), self.modules_in(category), cancel)
            .await
    }

    /// The first module named `name`, with raw results and no suite wrapper.
    pub async fn run_single(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CheckResult>, RunnerError> {
        let module = self
            .modules
            .iter()
            .find(|m| m.name() == name)
            .ok_or_else(|| RunnerError::ModuleNotFound(name.to_string()))?;
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }
        Ok(self
            .execute(module, Instant::now() + self.module_timeout, cancel)
            .await)
    }

    async fn run_modules<'a>(
        &'a self,
        mode: &str,
        modules: impl Iterator<Item = &'a Arc<dyn DiagnosticModule>>,
        cancel: &CancellationToken,
    ) -> Result<SuiteResult, RunnerError> {
        let suite_deadline = Instant::now() + self.suite_timeout;
        let mut suite = SuiteResult::new(mode);
        let mut executed = 0usize;
        info!(mode, timeout = ?self.suite_timeout, "suite started");

        for module in modules {
            let expired = Instant::now() >= suite_deadline;
            if cancel.is_cancelled() || expired {
                if executed == 0 {
                    warn!(mode, expired, "suite stopped before any module ran");
                    return Err(RunnerError::Cancelled);
                }
                warn!(
                    mode,
                    expired,
                    executed,
                    "suite interrupted; returning partial results"
                );
                suite.mark_interrupted();
                break;
            }
            let results = self.execute(module, suite_deadline, cancel).await;
            executed += 1;
            suite.extend(results);
        }

        suite.finalize();
        info!(
            mode,
            total = suite.total_tests(),
            passed = suite.total_passed(),
            failed = suite.total_failed(),
            skipped = suite.total_skipped(),
            errors = suite.total_errors(),
            status = %suite.overall_status,
            "suite finished"
        );
        Ok(suite)
    }

    /// Run one module on its own task, cut off at `deadline`.
    async fn execute(
        &self,
        module: &Arc<dyn DiagnosticModule>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Vec<CheckResult> {
        let started = Instant::now();
        let child = cancel.child_token();
        info!(module = module.name(), category = %module.category(), "module started");

        let task_module = Arc::clone(module);
        let harness = Arc::clone(&self.harness);
        let token = child.clone();
        let mut handle = tokio::spawn(async move { task_module.run(token, harness).await });

        let failure = |message: String| {
            vec![CheckResult::error(
                module.name(),
                module.requirement_tag(),
                module.category(),
                started.elapsed(),
                message,
            )]
        };

        let results = tokio::select! {
            biased;
            joined = &mut handle => match joined {
                Ok(results) => results,
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic().as_ref());
                    error!(module = module.name(), panic = %message, "module panicked");
                    failure(format!("module panicked: {message}"))
                }
                Err(e) => failure(format!("module task failed: {e}")),
            },
            _ = time::sleep_until(deadline) => {
                child.cancel();
                handle.abort();
                let limit = deadline.saturating_duration_since(started);
                warn!(module = module.name(), ?limit, "module timed out");
                failure(format!("module timed out after {limit:?}"))
            }
            _ = cancel.cancelled() => {
                child.cancel();
                handle.abort();
                warn!(module = module.name(), "module cancelled");
                failure("module cancelled before completion".to_string())
            }
        };

        let failed = results
            .iter()
            .filter(|r| matches!(r.status(), CheckStatus::Fail | CheckStatus::Error))
            .count();
        info!(
            module = module.name(),
            results = results.len(),
            failed,
            elapsed = ?started.elapsed(),
            "module finished"
        );
        results
    }
}

/// Text of a panic payload: the `&str` or `String` passed to `panic!`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
