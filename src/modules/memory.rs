use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::Check;
use crate::error::HarnessError;
use crate::harness::{Harness, MemoryTier};
use crate::runner::DiagnosticModule;
use crate::types::{Category, CheckResult};

const REQUIREMENT: &str = "FW-MEM";

/// Set/get round-trip on each memory tier.
pub struct MemoryTiersModule;

async fn check_tier(harness: &dyn Harness, tier: MemoryTier) -> CheckResult {
    let check = Check::start(format!("Memory Tier: {tier}"), REQUIREMENT, Category::Framework);
    let key = format!("[DEBUG]_{tier}_test");
    let value = json!({ "test": format!("{tier}_memory"), "data": [1, 2, 3, 4, 5] });

    match harness.memory_set(tier, &key, value.clone()).await {
        Ok(()) => {}
        Err(HarnessError::Unavailable(why)) => {
            return check.skip(format!("{tier} memory unavailable: {why}"));
        }
        Err(e) => return check.fail(format!("Set failed on {tier} memory: {e}"), &e),
    }

    match harness.memory_get(tier, &key).await {
        Ok(Some(got)) if got == value => check
            .pass(format!("{tier} memory round-trip succeeded"))
            .with_detail("key", key),
        Ok(Some(got)) => check.fail(
            format!("{tier} memory returned a different value"),
            format!("expected {value}, got {got}"),
        ),
        Ok(None) => check.fail(format!("{tier} memory lost key {key}"), "value missing after set"),
        Err(e) => check.fail(format!("Get failed on {tier} memory: {e}"), &e),
    }
}

#[async_trait]
impl DiagnosticModule for MemoryTiersModule {
    fn name(&self) -> &str {
        "memory-tiers"
    }

    fn description(&self) -> &str {
        "Working, mission and long-term memory tiers"
    }

    fn category(&self) -> Category {
        Category::Framework
    }

    fn requirement_tag(&self) -> &str {
        REQUIREMENT
    }

    async fn run(&self, _cancel: CancellationToken, harness: Arc<dyn Harness>) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(MemoryTier::ALL.len());
        for tier in MemoryTier::ALL {
            results.push(check_tier(harness.as_ref(), tier).await);
        }
        results
    }
}
