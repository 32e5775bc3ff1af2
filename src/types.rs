use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use time::{format_description::well_known, OffsetDateTime};

/// Terminal outcome of a single diagnostic check.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Skip => "skip",
            CheckStatus::Error => "error",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which half of the platform a check exercises.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Sdk,
    Framework,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Sdk => "sdk",
            Category::Framework => "framework",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sdk" => Ok(Category::Sdk),
            "framework" => Ok(Category::Framework),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// One diagnostic outcome.
///
/// Fields are private: a result is only built through [`CheckResult::pass`],
/// [`CheckResult::fail`], [`CheckResult::skip`] or [`CheckResult::error`], so
/// `error` is populated exactly when the status is `Fail` or `Error`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CheckResult {
    name: String,
    requirement: String,
    category: Category,
    status: CheckStatus,
    duration: Duration,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    details: BTreeMap<String, Value>,
    timestamp: String,
}

impl CheckResult {
    fn new(
        name: impl Into<String>,
        requirement: impl Into<String>,
        category: Category,
        status: CheckStatus,
        duration: Duration,
        message: String,
        error: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            requirement: requirement.into(),
            category,
            status,
            duration,
            message,
            error,
            details: BTreeMap::new(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn pass(
        name: impl Into<String>,
        requirement: impl Into<String>,
        category: Category,
        duration: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self::new(name, requirement, category, CheckStatus::Pass, duration, message.into(), None)
    }

    pub fn fail(
        name: impl Into<String>,
        requirement: impl Into<String>,
        category: Category,
        duration: Duration,
        message: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self::new(
            name,
            requirement,
            category,
            CheckStatus::Fail,
            duration,
            message.into(),
            Some(error.to_string()),
        )
    }

    /// Skipped checks carry no duration: nothing was exercised.
    pub fn skip(
        name: impl Into<String>,
        requirement: impl Into<String>,
        category: Category,
        message: impl Into<String>,
    ) -> Self {
        Self::new(name, requirement, category, CheckStatus::Skip, Duration::ZERO, message.into(), None)
    }

    pub fn error(
        name: impl Into<String>,
        requirement: impl Into<String>,
        category: Category,
        duration: Duration,
        error: impl fmt::Display,
    ) -> Self {
        let error = error.to_string();
        Self::new(
            name,
            requirement,
            category,
            CheckStatus::Error,
            duration,
            format!("check error: {error}"),
            Some(error),
        )
    }

    /// Replace the detail map.
    pub fn with_details(mut self, details: BTreeMap<String, Value>) -> Self {
        self.details = details;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requirement(&self) -> &str {
        &self.requirement
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn status(&self) -> CheckStatus {
        self.status
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error_text(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn details(&self) -> &BTreeMap<String, Value> {
        &self.details
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }
}

/// Aggregate counts over results sharing a category.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategorySummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl CategorySummary {
    /// Fold a result list into counts. Pure; summaries are never patched incrementally.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a CheckResult>) -> Self {
        results
            .into_iter()
            .fold(CategorySummary::default(), |mut summary, result| {
                summary.total += 1;
                match result.status() {
                    CheckStatus::Pass => summary.passed += 1,
                    CheckStatus::Fail => summary.failed += 1,
                    CheckStatus::Skip => summary.skipped += 1,
                    CheckStatus::Error => summary.errors += 1,
                }
                summary
            })
    }

    /// Fraction of passing checks in `0.0..=1.0`; `0.0` for an empty summary.
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total as f64
    }
}

pub(crate) fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_pair_status_and_error() {
        let pass = CheckResult::pass("a", "1", Category::Sdk, Duration::from_millis(5), "ok");
        assert_eq!(pass.status(), CheckStatus::Pass);
        assert!(pass.error_text().is_none());

        let fail = CheckResult::fail("b", "1", Category::Sdk, Duration::ZERO, "bad", "expected x");
        assert_eq!(fail.status(), CheckStatus::Fail);
        assert_eq!(fail.error_text(), Some("expected x"));

        let skip = CheckResult::skip("c", "1", Category::Framework, "no config");
        assert_eq!(skip.duration(), Duration::ZERO);
        assert!(skip.error_text().is_none());

        let err = CheckResult::error("d", "1", Category::Framework, Duration::ZERO, "boom");
        assert_eq!(err.message(), "check error: boom");
        assert_eq!(err.error_text(), Some("boom"));
    }

    #[test]
    fn summary_counts_each_status() {
        let results = vec![
            CheckResult::pass("a", "1", Category::Sdk, Duration::ZERO, ""),
            CheckResult::pass("b", "1", Category::Sdk, Duration::ZERO, ""),
            CheckResult::skip("c", "1", Category::Sdk, ""),
            CheckResult::error("d", "1", Category::Sdk, Duration::ZERO, "x"),
        ];
        let summary = CategorySummary::from_results(&results);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.pass_rate(), 0.5);
    }

    #[test]
    fn empty_summary_has_zero_pass_rate() {
        assert_eq!(CategorySummary::default().pass_rate(), 0.0);
    }

    #[test]
    fn details_serialize_with_result() {
        let r = CheckResult::pass("a", "1", Category::Sdk, Duration::ZERO, "ok")
            .with_detail("hosts", 3);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["details"]["hosts"], 3);
        assert_eq!(json["status"], "pass");
        assert!(json.get("error").is_none());
    }
}
