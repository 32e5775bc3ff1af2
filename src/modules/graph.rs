use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Check;
use crate::graph::{agent_run_id, build_discovery_batch, part_of};
use crate::harness::Harness;
use crate::parse::{DiscoveredHost, DiscoveredPort, DiscoveryOutput, PortState};
use crate::runner::DiagnosticModule;
use crate::types::{now_rfc3339, Category, CheckResult};

const REQUIREMENT: &str = "FW-GRAPH";

/// Builds, validates and stores a small discovery batch.
pub struct GraphStorageModule;

fn sample_discovery() -> DiscoveryOutput {
    DiscoveryOutput {
        hosts: vec![DiscoveredHost {
            ip: "127.0.0.1".to_string(),
            hostname: Some("localhost".to_string()),
            status: "up".to_string(),
            ports: vec![DiscoveredPort {
                number: 22,
                protocol: "tcp".to_string(),
                state: PortState::Open,
                service: Some("ssh".to_string()),
                version: None,
                product: None,
            }],
        }],
    }
}

#[async_trait]
impl DiagnosticModule for GraphStorageModule {
    fn name(&self) -> &str {
        "graph-storage"
    }

    fn description(&self) -> &str {
        "Taxonomy batch validation and graph storage"
    }

    fn category(&self) -> Category {
        Category::Framework
    }

    fn requirement_tag(&self) -> &str {
        REQUIREMENT
    }

    async fn run(&self, _cancel: CancellationToken, harness: Arc<dyn Harness>) -> Vec<CheckResult> {
        let check = Check::start("Graph Storage", REQUIREMENT, Category::Framework);
        let health = harness.graph_health().await;
        if !health.is_healthy() {
            return vec![check.skip(format!(
                "Graph store unavailable: {:?} - {}",
                health.state, health.message
            ))];
        }

        let mission = harness.mission();
        let run_id = if mission.id.is_empty() { "diagnostic".to_string() } else { mission.id.clone() };
        let mut batch = build_discovery_batch(
            &run_id,
            "recon-harness",
            "127.0.0.1/32",
            "diagnostic",
            &["127.0.0.1".to_string()],
            &sample_discovery(),
            &now_rfc3339(),
        );
        if !mission.id.is_empty() {
            batch.push_relationship(part_of(&agent_run_id(&run_id), &mission.id));
        }
        if let Err(e) = batch.validate() {
            return vec![check.fail("Sample batch violates the taxonomy", &e)];
        }

        let nodes = batch.nodes.len();
        let relationships = batch.relationships.len();
        info!(nodes, relationships, "storing sample graph batch");
        let result = match harness.store_graph_batch(batch).await {
            Ok(ids) => check
                .pass(format!("Graph: {} nodes, {relationships} relationships stored", ids.len()))
                .with_detail("nodes", nodes)
                .with_detail("relationships", relationships)
                .with_detail("stored_ids", ids.len()),
            Err(e) => check.fail(format!("Failed to store graph batch: {e}"), &e),
        };
        vec![result]
    }
}
