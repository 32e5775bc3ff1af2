use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Check;
use crate::harness::{Evidence, Finding, Harness, Severity};
use crate::runner::DiagnosticModule;
use crate::types::{now_rfc3339, Category, CheckResult};

const REQUIREMENT: &str = "REQ-6";

/// Submits an informational finding to the current mission.
pub struct FindingSubmissionModule {
    prefix: String,
}

impl Default for FindingSubmissionModule {
    fn default() -> Self {
        Self { prefix: "[DEBUG]".to_string() }
    }
}

#[async_trait]
impl DiagnosticModule for FindingSubmissionModule {
    fn name(&self) -> &str {
        "finding-submission"
    }

    fn description(&self) -> &str {
        "Finding submission to the mission store"
    }

    fn category(&self) -> Category {
        Category::Sdk
    }

    fn requirement_tag(&self) -> &str {
        REQUIREMENT
    }

    async fn run(&self, _cancel: CancellationToken, harness: Arc<dyn Harness>) -> Vec<CheckResult> {
        let check = Check::start("Finding Submission", REQUIREMENT, Category::Sdk);
        let mission = harness.mission();
        if mission.id.is_empty() {
            return vec![check.skip("Mission context not available")];
        }

        let timestamp = now_rfc3339();
        let finding = Finding {
            mission_id: mission.id.clone(),
            agent: "recon-harness".to_string(),
            title: format!("{} Test Finding - {timestamp}", self.prefix),
            description: format!(
                "Test finding created at {timestamp} to verify finding submission."
            ),
            severity: Severity::Info,
            evidence: vec![Evidence {
                title: "Diagnostic execution log".to_string(),
                content: format!("Test finding submitted at {timestamp}"),
            }],
            remediation: None,
        };
        let title = finding.title.clone();
        info!(mission = %mission.id, %title, "submitting test finding");

        let result = match harness.submit_finding(finding).await {
            Ok(()) => check
                .pass(format!("Finding submitted to mission {}", mission.id))
                .with_detail("finding_title", title),
            Err(e) => check.fail(format!("Failed to submit finding: {e}"), &e),
        };
        vec![result]
    }
}
