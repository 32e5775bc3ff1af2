use serde_json::Value;

use crate::error::ParseError;
use crate::graph::{self, GraphBatch};
use crate::netutil::url_host;
use crate::parse;
use crate::recon::Phase;

/// Turns one tool's raw output into graph entities for the current run.
///
/// The recon runner counts whatever comes back as the phase's created
/// nodes and relationships.
pub trait TaxonomyExtractor: Send + Sync {
    fn extract(
        &self,
        phase: Phase,
        tool: &str,
        target: &str,
        output: &Value,
    ) -> Result<GraphBatch, ParseError>;
}

/// Maps each phase's output shape onto the fixed node vocabulary.
#[derive(Debug, Clone)]
pub struct GraphExtractor {
    run_id: String,
}

impl GraphExtractor {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self { run_id: run_id.into() }
    }

    fn probe(&self, out: parse::ProbeOutput) -> GraphBatch {
        let run = self.run_id.as_str();
        let mut batch = GraphBatch::new();
        for endpoint in out.endpoints {
            let node = graph::endpoint_node(
                run,
                &endpoint.url,
                endpoint.status,
                endpoint.title.as_deref().unwrap_or(""),
            );
            let endpoint_ref = node.id.clone();
            batch.push_node(node);
            if let Some(host) = url_host(&endpoint.url) {
                batch.push_relationship(graph::exposes(&graph::host_id(run, host), &endpoint_ref));
            }
            for tech in endpoint.technologies {
                let node = graph::technology_node(run, &tech.name, tech.version.as_deref().unwrap_or(""));
                batch.push_relationship(graph::uses_technology(&endpoint_ref, &node.id));
                batch.push_node(node);
            }
        }
        batch
    }

    fn scan(&self, out: parse::ScanOutput) -> GraphBatch {
        let run = self.run_id.as_str();
        let mut batch = GraphBatch::new();
        for finding in out.findings {
            let node = graph::finding_node(run, &finding.template_id, &finding.severity, &finding.matched_at);
            if !finding.matched_at.is_empty() {
                batch.push_relationship(graph::affects(&node.id, &graph::endpoint_id(run, &finding.matched_at)));
            }
            batch.push_node(node);
        }
        batch
    }

    fn domain(&self, out: parse::DomainOutput) -> GraphBatch {
        let run = self.run_id.as_str();
        let nodes = out
            .subdomains
            .iter()
            .map(|name| graph::subdomain_node(run, name))
            .chain(out.hosts.iter().map(|ip| graph::host_node(run, ip, "", "up")))
            .chain(out.asns.iter().map(|asn| graph::asn_node(run, asn)))
            .chain(
                out.dns_records
                    .iter()
                    .map(|r| graph::dns_record_node(run, &r.record_type, &r.value)),
            );

        let run_node_id = graph::agent_run_id(run);
        let mut batch = GraphBatch::new();
        for node in nodes {
            batch.push_relationship(graph::discovered(&run_node_id, &node.id));
            batch.push_node(node);
        }
        batch
    }
}

impl TaxonomyExtractor for GraphExtractor {
    fn extract(
        &self,
        phase: Phase,
        tool: &str,
        _target: &str,
        output: &Value,
    ) -> Result<GraphBatch, ParseError> {
        Ok(match phase {
            Phase::Discover => {
                graph::discovery_entities(&self.run_id, &parse::parse_discovery(tool, output)?)
            }
            Phase::Probe => self.probe(parse::parse_probe(tool, output)?),
            Phase::Scan => self.scan(parse::parse_scan(tool, output)?),
            Phase::Domain => self.domain(parse::parse_domain(tool, output)?),
        })
    }
}
