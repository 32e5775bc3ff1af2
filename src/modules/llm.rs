use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tracing::info;

use super::Check;
use crate::analysis::{parse_structured, STRUCTURED_PROMPT};
use crate::harness::{Harness, Message};
use crate::runner::DiagnosticModule;
use crate::types::{Category, CheckResult};

const REQUIREMENT: &str = "REQ-5";

/// A plain completion and a JSON-shaped completion on a named slot.
pub struct LlmCompletionModule {
    slot: String,
}

impl Default for LlmCompletionModule {
    fn default() -> Self {
        Self { slot: "primary".to_string() }
    }
}

#[async_trait]
impl DiagnosticModule for LlmCompletionModule {
    fn name(&self) -> &str {
        "llm-completion"
    }

    fn description(&self) -> &str {
        "LLM completion and structured output on the primary slot"
    }

    fn category(&self) -> Category {
        Category::Sdk
    }

    fn requirement_tag(&self) -> &str {
        REQUIREMENT
    }

    async fn run(&self, _cancel: CancellationToken, harness: Arc<dyn Harness>) -> Vec<CheckResult> {
        vec![self.plain(harness.as_ref()).await, self.structured(harness.as_ref()).await]
    }
}

impl LlmCompletionModule {
    async fn plain(&self, harness: &dyn Harness) -> CheckResult {
        let check = Check::start("LLM Completion", REQUIREMENT, Category::Sdk);
        let messages = vec![Message::user("Reply with the single word: pong")];
        match harness.complete(&self.slot, messages).await {
            Err(e) => check.fail(format!("Completion on slot '{}' failed: {e}", self.slot), &e),
            Ok(c) if c.content.trim().is_empty() => check.fail(
                format!("Completion on slot '{}' returned empty content", self.slot),
                "empty completion",
            ),
            Ok(c) => check
                .pass(format!("Completion on slot '{}' returned {} chars", self.slot, c.content.len()))
                .with_detail("slot", self.slot.as_str())
                .with_detail("model", c.model)
                .with_detail("response_chars", c.content.len()),
        }
    }

    async fn structured(&self, harness: &dyn Harness) -> CheckResult {
        let check = Check::start("LLM Structured Output", REQUIREMENT, Category::Sdk);
        let reply = match harness.complete(&self.slot, vec![Message::user(STRUCTURED_PROMPT)]).await {
            Ok(reply) => reply,
            Err(e) => return check.fail(format!("Structured completion failed: {e}"), &e),
        };
        match parse_structured(&reply.content) {
            Ok(parsed) => {
                info!(status = %parsed.status, value = parsed.value, "structured output decoded");
                check
                    .pass(format!(
                        "Structured output: status={}, message={}, value={}",
                        parsed.status, parsed.message, parsed.value
                    ))
                    .with_detail("status", parsed.status)
                    .with_detail("value", parsed.value)
            }
            Err(e) => check.fail(format!("Structured output rejected: {e}"), &e),
        }
    }
}
