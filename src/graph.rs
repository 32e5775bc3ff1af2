//! Taxonomy graph builders.
//!
//! Pure functions from already-typed facts to [`GraphNode`]s and
//! [`Relationship`]s. Node ids are `<type keyword>-<run id>-<natural key>`, so
//! re-deriving a node for the same run and entity always yields the same id
//! and retried batches merge at the store instead of duplicating.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaxonomyError;
use crate::parse::DiscoveryOutput;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Host,
    Port,
    Service,
    AgentRun,
    ToolExecution,
    Endpoint,
    Technology,
    Finding,
    Subdomain,
    Asn,
    DnsRecord,
}

impl NodeType {
    pub const ALL: [NodeType; 11] = [
        NodeType::Host,
        NodeType::Port,
        NodeType::Service,
        NodeType::AgentRun,
        NodeType::ToolExecution,
        NodeType::Endpoint,
        NodeType::Technology,
        NodeType::Finding,
        NodeType::Subdomain,
        NodeType::Asn,
        NodeType::DnsRecord,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Host => "host",
            NodeType::Port => "port",
            NodeType::Service => "service",
            NodeType::AgentRun => "agent_run",
            NodeType::ToolExecution => "tool_execution",
            NodeType::Endpoint => "endpoint",
            NodeType::Technology => "technology",
            NodeType::Finding => "finding",
            NodeType::Subdomain => "subdomain",
            NodeType::Asn => "asn",
            NodeType::DnsRecord => "dns_record",
        }
    }

    fn required_properties(self) -> &'static [&'static str] {
        match self {
            NodeType::Host => &["attack_id", "ip"],
            NodeType::Port => &["attack_id", "number", "protocol"],
            NodeType::Service => &["attack_id", "name"],
            NodeType::AgentRun => &["attack_id", "agent"],
            NodeType::ToolExecution => &["attack_id", "tool", "target"],
            NodeType::Endpoint => &["attack_id", "url"],
            NodeType::Technology => &["attack_id", "name"],
            NodeType::Finding => &["attack_id", "template_id", "severity"],
            NodeType::Subdomain => &["attack_id", "name"],
            NodeType::Asn => &["attack_id", "number"],
            NodeType::DnsRecord => &["attack_id", "record_type", "value"],
        }
    }

    fn forbidden_properties(self) -> &'static [&'static str] {
        match self {
            NodeType::Port => &["port"],
            _ => &[],
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TaxonomyError::UnknownNodeType(s.to_string()))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Discovered,
    HasPort,
    RunsService,
    PartOf,
    ExecutedBy,
    Exposes,
    UsesTechnology,
    Affects,
}

impl RelationType {
    pub const ALL: [RelationType; 8] = [
        RelationType::Discovered,
        RelationType::HasPort,
        RelationType::RunsService,
        RelationType::PartOf,
        RelationType::ExecutedBy,
        RelationType::Exposes,
        RelationType::UsesTechnology,
        RelationType::Affects,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelationType::Discovered => "DISCOVERED",
            RelationType::HasPort => "HAS_PORT",
            RelationType::RunsService => "RUNS_SERVICE",
            RelationType::PartOf => "PART_OF",
            RelationType::ExecutedBy => "EXECUTED_BY",
            RelationType::Exposes => "EXPOSES",
            RelationType::UsesTechnology => "USES_TECHNOLOGY",
            RelationType::Affects => "AFFECTS",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TaxonomyError::UnknownRelationType(s.to_string()))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GraphNode {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub id: String,
    pub properties: BTreeMap<String, Value>,
    pub content: String,
}

impl GraphNode {
    fn new(node_type: NodeType, id: String, attack_id: &str) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert("attack_id".to_string(), Value::from(attack_id));
        Self { node_type, id, properties, content: String::new() }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Set `key` only when `value` is non-empty.
    fn with_optional(self, key: &str, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.with_property(key, value)
        }
    }

    fn with_content(mut self, content: String) -> Self {
        self.content = content;
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Check the id and the type's required and forbidden properties.
    pub fn validate(&self) -> Result<(), TaxonomyError> {
        let node_type = self.node_type.as_str();
        if self.id.is_empty() {
            return Err(TaxonomyError::EmptyId(node_type));
        }
        if let Some(property) = self
            .node_type
            .required_properties()
            .iter()
            .copied()
            .find(|p| !self.properties.contains_key(*p))
        {
            return Err(TaxonomyError::MissingProperty {
                node_type,
                id: self.id.clone(),
                property,
            });
        }
        if let Some(property) = self
            .node_type
            .forbidden_properties()
            .iter()
            .copied()
            .find(|p| self.properties.contains_key(*p))
        {
            return Err(TaxonomyError::ForbiddenProperty {
                node_type,
                id: self.id.clone(),
                property,
            });
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relationship {
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub rel_type: RelationType,
}

impl Relationship {
    fn new(from_id: &str, to_id: &str, rel_type: RelationType) -> Self {
        Self { from_id: from_id.to_string(), to_id: to_id.to_string(), rel_type }
    }

    pub fn validate(&self) -> Result<(), TaxonomyError> {
        if self.from_id.is_empty() || self.to_id.is_empty() {
            return Err(TaxonomyError::DanglingRelationship(self.rel_type.as_str()));
        }
        Ok(())
    }
}

/// Nodes and relationships handed to the graph store in one call.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GraphBatch {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<Relationship>,
}

impl GraphBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_node(&mut self, node: GraphNode) {
        self.nodes.push(node);
    }

    pub fn push_relationship(&mut self, rel: Relationship) {
        self.relationships.push(rel);
    }

    pub fn append(&mut self, mut other: GraphBatch) {
        self.nodes.append(&mut other.nodes);
        self.relationships.append(&mut other.relationships);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    /// Distinct ids of nodes of one type, in id order.
    pub fn unique_ids(&self, node_type: NodeType) -> BTreeSet<&str> {
        self.nodes
            .iter()
            .filter(|n| n.node_type == node_type)
            .map(|n| n.id.as_str())
            .collect()
    }

    pub fn validate(&self) -> Result<(), TaxonomyError> {
        self.nodes.iter().try_for_each(GraphNode::validate)?;
        self.relationships.iter().try_for_each(Relationship::validate)
    }
}

pub fn host_id(run_id: &str, ip: &str) -> String {
    format!("host-{run_id}-{ip}")
}

pub fn port_id(run_id: &str, ip: &str, number: u16) -> String {
    format!("port-{run_id}-{ip}-{number}")
}

pub fn agent_run_id(run_id: &str) -> String {
    format!("agent-run-{run_id}")
}

pub fn tool_execution_id(run_id: &str, tool: &str, target: &str) -> String {
    format!("tool-exec-{run_id}-{tool}-{target}")
}

pub fn endpoint_id(run_id: &str, url: &str) -> String {
    format!("endpoint-{run_id}-{url}")
}

/// Space-joined non-empty parts.
fn words(parts: &[&str]) -> String {
    parts.iter().copied().filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" ")
}

pub fn host_node(run_id: &str, ip: &str, hostname: &str, status: &str) -> GraphNode {
    GraphNode::new(NodeType::Host, host_id(run_id, ip), run_id)
        .with_property("ip", ip)
        .with_property("status", status)
        .with_optional("hostname", hostname)
        .with_content(format!("Host {ip} ({status})"))
}

/// The port number lives under `number`; a `port` key is never written.
pub fn port_node(
    run_id: &str,
    ip: &str,
    number: u16,
    protocol: &str,
    service: &str,
    version: &str,
    product: &str,
) -> GraphNode {
    GraphNode::new(NodeType::Port, port_id(run_id, ip, number), run_id)
        .with_property("number", number)
        .with_property("protocol", protocol)
        .with_optional("service", service)
        .with_optional("version", version)
        .with_optional("product", product)
        .with_content(match words(&[service, version]) {
            detail if detail.is_empty() => format!("{number}/{protocol}"),
            detail => format!("{number}/{protocol}: {detail}"),
        })
}

pub fn service_node(run_id: &str, ip: &str, number: u16, name: &str, version: &str) -> GraphNode {
    GraphNode::new(NodeType::Service, format!("service-{run_id}-{ip}-{number}-{name}"), run_id)
        .with_property("name", name)
        .with_optional("version", version)
        .with_content(words(&["Service:", name, version]))
}

pub fn agent_run_node(run_id: &str, agent: &str, started_at: &str) -> GraphNode {
    GraphNode::new(NodeType::AgentRun, agent_run_id(run_id), run_id)
        .with_property("agent", agent)
        .with_property("start_time", started_at)
        .with_property("timestamp", started_at)
        .with_content(format!("Agent run: {agent} ({run_id})"))
}

pub fn tool_execution_node(run_id: &str, tool: &str, target: &str, started_at: &str) -> GraphNode {
    GraphNode::new(NodeType::ToolExecution, tool_execution_id(run_id, tool, target), run_id)
        .with_property("tool", tool)
        .with_property("target", target)
        .with_property("start_time", started_at)
        .with_property("timestamp", started_at)
        .with_content(format!("Tool execution: {tool} on {target}"))
}

pub fn endpoint_node(run_id: &str, url: &str, status_code: Option<u16>, title: &str) -> GraphNode {
    let mut node = GraphNode::new(NodeType::Endpoint, endpoint_id(run_id, url), run_id)
        .with_property("url", url)
        .with_optional("title", title);
    if let Some(code) = status_code {
        node = node.with_property("status_code", code);
    }
    let status = status_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
    node.with_content(format!("Endpoint {url} [{status}]"))
}

pub fn technology_node(run_id: &str, name: &str, version: &str) -> GraphNode {
    GraphNode::new(NodeType::Technology, format!("technology-{run_id}-{name}"), run_id)
        .with_property("name", name)
        .with_optional("version", version)
        .with_content(words(&["Technology:", name, version]))
}

pub fn finding_node(run_id: &str, template_id: &str, severity: &str, matched_at: &str) -> GraphNode {
    GraphNode::new(NodeType::Finding, format!("finding-{run_id}-{template_id}-{matched_at}"), run_id)
        .with_property("template_id", template_id)
        .with_property("severity", severity)
        .with_optional("matched_at", matched_at)
        .with_content(if matched_at.is_empty() {
            format!("Finding {template_id} ({severity})")
        } else {
            format!("Finding {template_id} ({severity}) at {matched_at}")
        })
}

pub fn subdomain_node(run_id: &str, name: &str) -> GraphNode {
    GraphNode::new(NodeType::Subdomain, format!("subdomain-{run_id}-{name}"), run_id)
        .with_property("name", name)
        .with_content(format!("Subdomain {name}"))
}

pub fn asn_node(run_id: &str, number: &str) -> GraphNode {
    GraphNode::new(NodeType::Asn, format!("asn-{run_id}-{number}"), run_id)
        .with_property("number", number)
        .with_content(format!("ASN {number}"))
}

pub fn dns_record_node(run_id: &str, record_type: &str, value: &str) -> GraphNode {
    GraphNode::new(NodeType::DnsRecord, format!("dns-record-{run_id}-{record_type}-{value}"), run_id)
        .with_property("record_type", record_type)
        .with_property("value", value)
        .with_content(format!("DNS {record_type} {value}"))
}

/// agent-run → asset
pub fn discovered(agent_run_id: &str, asset_id: &str) -> Relationship {
    Relationship::new(agent_run_id, asset_id, RelationType::Discovered)
}

/// host → port
pub fn has_port(host_id: &str, port_id: &str) -> Relationship {
    Relationship::new(host_id, port_id, RelationType::HasPort)
}

/// port → service
pub fn runs_service(port_id: &str, service_id: &str) -> Relationship {
    Relationship::new(port_id, service_id, RelationType::RunsService)
}

/// agent-run → mission
pub fn part_of(agent_run_id: &str, mission_id: &str) -> Relationship {
    Relationship::new(agent_run_id, mission_id, RelationType::PartOf)
}

/// tool-execution → agent-run
pub fn executed_by(tool_execution_id: &str, agent_run_id: &str) -> Relationship {
    Relationship::new(tool_execution_id, agent_run_id, RelationType::ExecutedBy)
}

/// host → endpoint
pub fn exposes(host_id: &str, endpoint_id: &str) -> Relationship {
    Relationship::new(host_id, endpoint_id, RelationType::Exposes)
}

/// endpoint → technology
pub fn uses_technology(endpoint_id: &str, technology_id: &str) -> Relationship {
    Relationship::new(endpoint_id, technology_id, RelationType::UsesTechnology)
}

/// finding → endpoint
pub fn affects(finding_id: &str, endpoint_id: &str) -> Relationship {
    Relationship::new(finding_id, endpoint_id, RelationType::Affects)
}

/// Host nodes with DISCOVERED edges and open-port nodes with HAS_PORT edges,
/// host by host. Closed and filtered ports are left out.
pub fn discovery_entities(run_id: &str, output: &DiscoveryOutput) -> GraphBatch {
    let run_node_id = agent_run_id(run_id);
    let mut batch = GraphBatch::new();
    for host in &output.hosts {
        let node = host_node(run_id, &host.ip, host.hostname.as_deref().unwrap_or(""), &host.status);
        let host_ref = node.id.clone();
        batch.push_node(node);
        batch.push_relationship(discovered(&run_node_id, &host_ref));
        for port in host.ports.iter().filter(|p| p.is_open()) {
            let node = port_node(
                run_id,
                &host.ip,
                port.number,
                &port.protocol,
                port.service.as_deref().unwrap_or(""),
                port.version.as_deref().unwrap_or(""),
                port.product.as_deref().unwrap_or(""),
            );
            batch.push_relationship(has_port(&host_ref, &node.id));
            batch.push_node(node);
        }
    }
    batch
}

/// Complete batch for one discovery sweep: agent-run, the tool execution that
/// covered `subnet`, EXECUTED_BY between them, then every host and open port.
pub fn build_discovery_batch(
    run_id: &str,
    agent: &str,
    subnet: &str,
    tool: &str,
    live_hosts: &[String],
    output: &DiscoveryOutput,
    started_at: &str,
) -> GraphBatch {
    let run_node = agent_run_node(run_id, agent, started_at);
    let exec = tool_execution_node(run_id, tool, subnet, started_at)
        .with_property("subnet", subnet)
        .with_property("host_count", live_hosts.len())
        .with_property("port_count", output.open_port_count());
    let exec_rel = executed_by(&exec.id, &run_node.id);

    let mut batch = GraphBatch::new();
    batch.push_node(run_node);
    batch.push_node(exec);
    batch.push_relationship(exec_rel);
    batch.append(discovery_entities(run_id, output));
    batch
}
