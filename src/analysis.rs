//! Prompts for, and lenient parsing of, model replies that must carry JSON.
//!
//! Models tend to wrap the document in prose or code fences, so the reply is
//! cut down to the span between its first `{` and its last `}` before
//! decoding.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::ReplyError;
use crate::parse::DiscoveryOutput;
use crate::types::now_rfc3339;

/// Security assessment of a swept subnet.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkAnalysis {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub risk_level: String,
    #[serde(default)]
    pub high_risk_services: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Reply shape of the structured-output check.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StructuredReply {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub value: i64,
}

pub const STRUCTURED_PROMPT: &str = "Return a status of 'success', a message of 'test', and a value of 42. \
Respond only with a JSON object of the form {\"status\": \"...\", \"message\": \"...\", \"value\": 0}.";

/// Analyst prompt over the discovered hosts and their open ports.
pub fn analysis_prompt(subnet: &str, live_hosts: usize, discovered: &DiscoveryOutput) -> String {
    let mut hosts = String::new();
    for host in &discovered.hosts {
        match host.hostname.as_deref().filter(|h| !h.is_empty()) {
            Some(name) => {
                let _ = writeln!(hosts, "### {} ({name})", host.ip);
            }
            None => {
                let _ = writeln!(hosts, "### {}", host.ip);
            }
        }
        for port in host.open_ports() {
            let service = port.service.as_deref().unwrap_or("unknown");
            let _ = match port.version.as_deref().filter(|v| !v.is_empty()) {
                Some(version) => writeln!(hosts, "- Port {}/{}: {service} v{version}", port.number, port.protocol),
                None => writeln!(hosts, "- Port {}/{}: {service}", port.number, port.protocol),
            };
        }
        hosts.push('\n');
    }

    format!(
        "You are a network security analyst. Analyze the following network scan results and provide a security assessment.

## Scan Information
- Subnet: {subnet}
- Scan Time: {scan_time}
- Live Hosts: {live_hosts}
- Open Ports: {open_ports}

## Discovered Hosts and Services
{hosts}
## Analysis Required
1. Provide a brief summary of the network exposure
2. Identify any high-risk services (e.g., Telnet, FTP, unencrypted protocols)
3. Rate the overall risk level: low, medium, high, or critical
4. Provide 2-3 specific security recommendations

Respond in JSON format:
{{
  \"summary\": \"...\",
  \"risk_level\": \"low|medium|high|critical\",
  \"high_risk_services\": [\"service:port\", ...],
  \"recommendations\": [\"...\", ...]
}}",
        scan_time = now_rfc3339(),
        open_ports = discovered.open_port_count(),
    )
}

/// The span from the first `{` to the last `}`.
pub fn json_span(reply: &str) -> Result<&str, ReplyError> {
    let start = reply.find('{').ok_or(ReplyError::NoJson)?;
    let end = reply.rfind('}').ok_or(ReplyError::NoJson)?;
    if end < start {
        return Err(ReplyError::NoJson);
    }
    Ok(&reply[start..=end])
}

/// Decode an analysis reply. `summary` and `risk_level` are required and the
/// risk level is lowercased.
pub fn parse_analysis(reply: &str) -> Result<NetworkAnalysis, ReplyError> {
    let mut analysis: NetworkAnalysis =
        serde_json::from_str(json_span(reply)?).map_err(|e| ReplyError::Malformed(e.to_string()))?;
    if analysis.summary.trim().is_empty() {
        return Err(ReplyError::MissingField("summary"));
    }
    analysis.risk_level = analysis.risk_level.trim().to_lowercase();
    if analysis.risk_level.is_empty() {
        return Err(ReplyError::MissingField("risk_level"));
    }
    Ok(analysis)
}

pub fn parse_structured(reply: &str) -> Result<StructuredReply, ReplyError> {
    let parsed: StructuredReply =
        serde_json::from_str(json_span(reply)?).map_err(|e| ReplyError::Malformed(e.to_string()))?;
    if parsed.status.trim().is_empty() {
        return Err(ReplyError::MissingField("status"));
    }
    Ok(parsed)
}
