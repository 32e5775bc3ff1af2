use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::types::Category;

/// Which modules a run registers and how it dispatches them.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    #[default]
    Full,
    Sdk,
    Framework,
    NetworkRecon,
    Single,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Full => "full",
            ExecutionMode::Sdk => "sdk",
            ExecutionMode::Framework => "framework",
            ExecutionMode::NetworkRecon => "network-recon",
            ExecutionMode::Single => "single",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(ExecutionMode::Full),
            "sdk" => Ok(ExecutionMode::Sdk),
            "framework" => Ok(ExecutionMode::Framework),
            "network-recon" => Ok(ExecutionMode::NetworkRecon),
            "single" => Ok(ExecutionMode::Single),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugConfig {
    pub mode: ExecutionMode,
    pub verbose: bool,
    /// Module names for single mode.
    pub target_tests: Vec<String>,
    /// Whole-suite deadline.
    pub timeout: Duration,
    /// Per-module deadline.
    pub test_timeout: Duration,
    /// Per tool invocation inside a module.
    pub tool_timeout: Duration,
    pub skip_categories: Vec<Category>,
    pub skip_tests: Vec<String>,
    pub subnet: Option<String>,
    pub domains: Vec<String>,
    /// Tool the tool-invocation module executes instead of a built-in safe one.
    pub tool_name: Option<String>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Full,
            verbose: false,
            target_tests: Vec::new(),
            timeout: Duration::from_secs(10 * 60),
            test_timeout: Duration::from_secs(10),
            tool_timeout: Duration::from_secs(60),
            skip_categories: Vec::new(),
            skip_tests: Vec::new(),
            subnet: None,
            domains: Vec::new(),
            tool_name: None,
        }
    }
}

/// Per-module deadline when the recon sweep is the whole job.
pub const NETWORK_RECON_TEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

impl DebugConfig {
    /// Build from a task goal and its metadata object.
    ///
    /// A goal mentioning `network-recon` selects that mode with a longer
    /// module deadline; explicit metadata keys override both. Durations are
    /// strings such as `"90s"` or `"10m"`, or integers under a `_ms` key.
    pub fn from_task(goal: &str, metadata: &Value) -> Result<Self, ConfigError> {
        let mut cfg = DebugConfig::default();
        if goal.to_ascii_lowercase().contains("network-recon") {
            cfg.mode = ExecutionMode::NetworkRecon;
            cfg.test_timeout = NETWORK_RECON_TEST_TIMEOUT;
        }

        let meta = match metadata {
            Value::Null => {
                cfg.validate()?;
                return Ok(cfg);
            }
            Value::Object(map) => map,
            _ => return Err(ConfigError::Metadata("metadata must be an object".into())),
        };

        if let Some(mode) = meta.get("mode").and_then(Value::as_str) {
            cfg.mode = mode.parse()?;
        }
        if let Some(verbose) = meta.get("verbose").and_then(Value::as_bool) {
            cfg.verbose = verbose;
        }
        if let Some(tests) = string_list(meta.get("tests")) {
            cfg.target_tests = tests;
        }
        if let Some(d) = duration_key(meta, "timeout")? {
            cfg.timeout = d;
        }
        if let Some(d) = duration_key(meta, "test_timeout")? {
            cfg.test_timeout = d;
        }
        if let Some(d) = duration_key(meta, "tool_timeout")? {
            cfg.tool_timeout = d;
        }
        if let Some(cats) = string_list(meta.get("skip_categories")) {
            cfg.skip_categories = cats
                .iter()
                .map(|c| c.parse::<Category>().map_err(|_| ConfigError::InvalidCategory(c.clone())))
                .collect::<Result<_, _>>()?;
        }
        if let Some(tests) = string_list(meta.get("skip_tests")) {
            cfg.skip_tests = tests;
        }
        if let Some(subnet) = meta.get("subnet").and_then(Value::as_str) {
            cfg.subnet = Some(subnet.to_string());
        }
        if let Some(domains) = string_list(meta.get("domains")) {
            cfg.domains = domains;
        }
        if let Some(tool) = meta.get("tool").and_then(Value::as_str) {
            cfg.tool_name = Some(tool.to_string());
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == ExecutionMode::Single && self.target_tests.is_empty() {
            return Err(ConfigError::MissingTargetTests);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout("timeout"));
        }
        if self.test_timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout("test_timeout"));
        }
        if self.tool_timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout("tool_timeout"));
        }
        Ok(())
    }

    pub fn should_run_test(&self, name: &str) -> bool {
        !self.skip_tests.iter().any(|s| s == name)
    }

    pub fn should_run_category(&self, category: Category) -> bool {
        !self.skip_categories.contains(&category)
    }
}

/// Strings out of a JSON array; non-string entries are ignored.
fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value.and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

fn duration_key(
    meta: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    if let Some(ms) = meta.get(&format!("{key}_ms")) {
        return ms
            .as_u64()
            .map(|ms| Some(Duration::from_millis(ms)))
            .ok_or_else(|| ConfigError::Metadata(format!("{key}_ms must be a non-negative integer")));
    }
    match meta.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => parse_duration(s)
            .map(Some)
            .ok_or_else(|| ConfigError::Metadata(format!("invalid {key} duration: {s}"))),
        Some(_) => Err(ConfigError::Metadata(format!("{key} must be a duration string"))),
    }
}

/// `"500ms"`, `"30s"`, `"10m"`, `"1h"`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits.parse().ok()?;
    match unit.trim() {
        "ms" => Some(Duration::from_millis(n)),
        "" | "s" => Some(Duration::from_secs(n)),
        "m" => Some(Duration::from_secs(n * 60)),
        "h" => Some(Duration::from_secs(n * 3600)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn goal_selects_network_recon() {
        let cfg = DebugConfig::from_task("run network-recon on lab", &Value::Null).unwrap();
        assert_eq!(cfg.mode, ExecutionMode::NetworkRecon);
        assert_eq!(cfg.test_timeout, NETWORK_RECON_TEST_TIMEOUT);
    }

    #[test]
    fn metadata_overrides_goal() {
        let meta = json!({
            "mode": "single",
            "tests": ["llm-completion", 3],
            "timeout": "2m",
            "test_timeout_ms": 1500,
            "skip_categories": ["framework"],
            "domains": ["example.com"]
        });
        let cfg = DebugConfig::from_task("network-recon", &meta).unwrap();
        assert_eq!(cfg.mode, ExecutionMode::Single);
        assert_eq!(cfg.target_tests, vec!["llm-completion"]);
        assert_eq!(cfg.timeout, Duration::from_secs(120));
        assert_eq!(cfg.test_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.skip_categories, vec![Category::Framework]);
        assert!(!cfg.should_run_category(Category::Framework));
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            DebugConfig::from_task("", &json!({"mode": "turbo"})).unwrap_err(),
            ConfigError::InvalidMode("turbo".into())
        );
        assert_eq!(
            DebugConfig::from_task("", &json!({"mode": "single"})).unwrap_err(),
            ConfigError::MissingTargetTests
        );
        assert_eq!(
            DebugConfig::from_task("", &json!({"timeout": "0s"})).unwrap_err(),
            ConfigError::NonPositiveTimeout("timeout")
        );
        assert!(matches!(
            DebugConfig::from_task("", &json!({"timeout": "soon"})),
            Err(ConfigError::Metadata(_))
        ));
    }

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("m"), None);
    }
}
