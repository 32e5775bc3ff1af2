//! Two-stage decoding of loosely typed tool output.
//!
//! Stage one reads into permissive `Raw*` structs where every field is
//! optional and a malformed element is dropped instead of failing its parent.
//! Stage two turns those into the typed phase outputs. Anything missing or
//! malformed reads as "not discovered".

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParseError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Unknown,
}

impl PortState {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("open") => PortState::Open,
            Some("closed") => PortState::Closed,
            Some("filtered") | Some("open|filtered") => PortState::Filtered,
            _ => PortState::Unknown,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPort {
    pub number: u16,
    pub protocol: String,
    pub state: PortState,
    pub service: Option<String>,
    pub version: Option<String>,
    pub product: Option<String>,
}

impl DiscoveredPort {
    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHost {
    pub ip: String,
    pub hostname: Option<String>,
    pub status: String,
    pub ports: Vec<DiscoveredPort>,
}

impl DiscoveredHost {
    pub fn open_ports(&self) -> impl Iterator<Item = &DiscoveredPort> {
        self.ports.iter().filter(|p| p.is_open())
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryOutput {
    pub hosts: Vec<DiscoveredHost>,
}

impl DiscoveryOutput {
    pub fn open_port_count(&self) -> usize {
        self.hosts.iter().map(|h| h.open_ports().count()).sum()
    }

    pub fn has_open_ports(&self) -> bool {
        self.open_port_count() > 0
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Technology {
    pub name: String,
    pub version: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbedEndpoint {
    pub url: String,
    pub status: Option<u16>,
    pub title: Option<String>,
    pub technologies: Vec<Technology>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutput {
    pub endpoints: Vec<ProbedEndpoint>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanFinding {
    pub template_id: String,
    pub severity: String,
    pub matched_at: String,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutput {
    pub findings: Vec<ScanFinding>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub record_type: String,
    pub value: String,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainOutput {
    pub subdomains: Vec<String>,
    pub hosts: Vec<String>,
    pub asns: Vec<String>,
    pub dns_records: Vec<DnsRecord>,
}

pub fn parse_discovery(tool: &str, output: &Value) -> Result<DiscoveryOutput, ParseError> {
    let raw: RawDiscovery = decode(tool, output)?;
    let hosts = raw
        .hosts
        .into_iter()
        .filter_map(|h| {
            let ip = h.ip?;
            let ports = h
                .ports
                .into_iter()
                .filter_map(|p| {
                    Some(DiscoveredPort {
                        number: p.port?,
                        protocol: p.protocol.unwrap_or_else(|| "tcp".to_string()),
                        state: PortState::parse(p.state.as_deref()),
                        service: p.service,
                        version: p.version,
                        product: p.product,
                    })
                })
                .collect();
            Some(DiscoveredHost {
                ip,
                hostname: h.hostname,
                status: h.status.unwrap_or_else(|| "up".to_string()),
                ports,
            })
        })
        .collect();
    Ok(DiscoveryOutput { hosts })
}

pub fn parse_probe(tool: &str, output: &Value) -> Result<ProbeOutput, ParseError> {
    let raw: RawProbe = decode(tool, output)?;
    let endpoints = raw
        .endpoints
        .into_iter()
        .filter_map(|e| {
            Some(ProbedEndpoint {
                url: e.url?,
                status: e.status,
                title: e.title,
                technologies: e
                    .technologies
                    .into_iter()
                    .map(|t| Technology { name: t.name, version: t.version })
                    .collect(),
            })
        })
        .collect();
    Ok(ProbeOutput { endpoints })
}

pub fn parse_scan(tool: &str, output: &Value) -> Result<ScanOutput, ParseError> {
    let raw: RawScan = decode(tool, output)?;
    let findings = raw
        .findings
        .into_iter()
        .filter_map(|f| {
            Some(ScanFinding {
                template_id: f.template_id?,
                severity: f.severity.unwrap_or_else(|| "info".to_string()),
                matched_at: f.matched_at.unwrap_or_default(),
            })
        })
        .collect();
    Ok(ScanOutput { findings })
}

pub fn parse_domain(tool: &str, output: &Value) -> Result<DomainOutput, ParseError> {
    let raw: RawDomain = decode(tool, output)?;
    Ok(DomainOutput {
        subdomains: raw.subdomains.into_iter().map(|n| n.0).collect(),
        hosts: raw.hosts.into_iter().map(|n| n.0).collect(),
        asns: raw.asns.into_iter().map(|n| n.0).collect(),
        dns_records: raw
            .dns_records
            .into_iter()
            .filter_map(|r| Some(DnsRecord { record_type: r.record_type?, value: r.value? }))
            .collect(),
    })
}

fn decode<T: DeserializeOwned>(tool: &str, output: &Value) -> Result<T, ParseError> {
    if !output.is_object() {
        return Err(ParseError::NotAnObject { tool: tool.to_string() });
    }
    T::deserialize(output).map_err(|e| ParseError::Malformed {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawDiscovery {
    #[serde(deserialize_with = "lenient_vec")]
    hosts: Vec<RawHost>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawHost {
    #[serde(alias = "address", deserialize_with = "lenient_string")]
    ip: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    hostname: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    status: Option<String>,
    #[serde(deserialize_with = "lenient_vec")]
    ports: Vec<RawPort>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawPort {
    #[serde(alias = "number", deserialize_with = "lenient_port")]
    port: Option<u16>,
    #[serde(deserialize_with = "lenient_string")]
    protocol: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    state: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    service: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    version: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    product: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawProbe {
    #[serde(alias = "results", deserialize_with = "lenient_vec")]
    endpoints: Vec<RawEndpoint>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawEndpoint {
    #[serde(deserialize_with = "lenient_string")]
    url: Option<String>,
    #[serde(alias = "status_code", deserialize_with = "lenient_port")]
    status: Option<u16>,
    #[serde(deserialize_with = "lenient_string")]
    title: Option<String>,
    #[serde(alias = "tech", deserialize_with = "lenient_vec")]
    technologies: Vec<RawTechnology>,
}

/// Either `"nginx"` or `{"name": "nginx", "version": "1.25"}`.
struct RawTechnology {
    name: String,
    version: Option<String>,
}

impl<'de> Deserialize<'de> for RawTechnology {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        match Value::deserialize(d)? {
            Value::String(name) if !name.trim().is_empty() => {
                Ok(RawTechnology { name: name.trim().to_string(), version: None })
            }
            Value::Object(map) => {
                let name = map.get("name").and_then(string_of);
                let version = map.get("version").and_then(string_of);
                name.map(|name| RawTechnology { name, version })
                    .ok_or_else(|| serde::de::Error::missing_field("name"))
            }
            _ => Err(serde::de::Error::custom("technology must be a name or an object")),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawScan {
    #[serde(alias = "results", deserialize_with = "lenient_vec")]
    findings: Vec<RawFinding>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawFinding {
    #[serde(rename = "template-id", alias = "template_id", alias = "template", deserialize_with = "lenient_string")]
    template_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    severity: Option<String>,
    #[serde(rename = "matched-at", alias = "matched_at", alias = "host", deserialize_with = "lenient_string")]
    matched_at: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawDomain {
    #[serde(deserialize_with = "lenient_vec")]
    subdomains: Vec<RawName>,
    #[serde(alias = "ips", deserialize_with = "lenient_vec")]
    hosts: Vec<RawName>,
    #[serde(deserialize_with = "lenient_vec")]
    asns: Vec<RawName>,
    #[serde(rename = "dns-records", alias = "dns_records", deserialize_with = "lenient_vec")]
    dns_records: Vec<RawDnsRecord>,
}

/// A bare string or an object carrying one of the usual name keys.
struct RawName(String);

impl<'de> Deserialize<'de> for RawName {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(d)?;
        let name = match &value {
            Value::Object(map) => ["name", "host", "ip", "asn", "number"]
                .iter()
                .find_map(|k| map.get(*k).and_then(string_of)),
            other => string_of(other),
        };
        name.map(RawName)
            .ok_or_else(|| serde::de::Error::custom("entry has no usable name"))
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawDnsRecord {
    #[serde(rename = "type", alias = "record_type", deserialize_with = "lenient_string")]
    record_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    value: Option<String>,
}

/// Non-empty trimmed text from a string or a number.
fn string_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(string_of(&Value::deserialize(d)?))
}

/// A 1..=65535 value from a number or a numeric string; anything else is `None`.
fn lenient_port<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u16>, D::Error> {
    let n = match Value::deserialize(d)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    Ok(n.and_then(|n| u16::try_from(n).ok()).filter(|n| *n != 0))
}

/// Elements that fail to decode are dropped; a non-array reads as empty.
fn lenient_vec<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}
