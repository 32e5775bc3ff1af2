use std::time::{Duration, Instant};

use serde::Serialize;

use crate::types::{now_rfc3339, Category, CategorySummary, CheckResult, CheckStatus};

/// One orchestration run: every result in execution order plus the frozen
/// aggregates computed by [`SuiteResult::finalize`].
///
/// Summaries and `overall_status` are meaningless until `finalize` has run.
#[derive(Serialize, Debug, Clone)]
pub struct SuiteResult {
    pub mode: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration: Duration,
    pub results: Vec<CheckResult>,
    pub sdk_summary: CategorySummary,
    pub framework_summary: CategorySummary,
    pub overall_status: CheckStatus,
    /// Set when the suite deadline or a cancellation cut the run short.
    pub interrupted: bool,
    #[serde(skip)]
    started: Instant,
}

impl SuiteResult {
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            started_at: now_rfc3339(),
            finished_at: None,
            duration: Duration::ZERO,
            results: Vec::new(),
            sdk_summary: CategorySummary::default(),
            framework_summary: CategorySummary::default(),
            overall_status: CheckStatus::Pass,
            interrupted: false,
            started: Instant::now(),
        }
    }

    pub fn push(&mut self, result: CheckResult) {
        self.results.push(result);
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = CheckResult>) {
        self.results.extend(results);
    }

    pub(crate) fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    /// Stamp the end time and recompute summaries and the overall status from
    /// the result list. Calling it again recomputes the same aggregates.
    pub fn finalize(&mut self) {
        self.finished_at = Some(now_rfc3339());
        self.duration = self.started.elapsed();
        self.sdk_summary = CategorySummary::from_results(
            self.results.iter().filter(|r| r.category() == Category::Sdk),
        );
        self.framework_summary = CategorySummary::from_results(
            self.results.iter().filter(|r| r.category() == Category::Framework),
        );
        self.overall_status = overall_status(&self.results);
    }

    pub fn summary(&self, category: Category) -> CategorySummary {
        match category {
            Category::Sdk => self.sdk_summary,
            Category::Framework => self.framework_summary,
        }
    }

    pub fn total_tests(&self) -> usize {
        self.results.len()
    }

    pub fn total_passed(&self) -> usize {
        self.sdk_summary.passed + self.framework_summary.passed
    }

    pub fn total_failed(&self) -> usize {
        self.sdk_summary.failed + self.framework_summary.failed
    }

    pub fn total_skipped(&self) -> usize {
        self.sdk_summary.skipped + self.framework_summary.skipped
    }

    pub fn total_errors(&self) -> usize {
        self.sdk_summary.errors + self.framework_summary.errors
    }

    pub fn pass_rate(&self) -> f64 {
        let total = self.total_tests();
        if total == 0 {
            return 0.0;
        }
        self.total_passed() as f64 / total as f64
    }
}

/// Overall status by precedence: any Error, else any Fail, else all Skip
/// (non-empty), else Pass.
pub fn overall_status(results: &[CheckResult]) -> CheckStatus {
    let has = |status: CheckStatus| results.iter().any(|r| r.status() == status);
    if has(CheckStatus::Error) {
        CheckStatus::Error
    } else if has(CheckStatus::Fail) {
        CheckStatus::Fail
    } else if !results.is_empty() && results.iter().all(|r| r.status() == CheckStatus::Skip) {
        CheckStatus::Skip
    } else {
        CheckStatus::Pass
    }
}
