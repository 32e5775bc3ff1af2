use ipnet::{IpNet, Ipv4Net};
use std::net::{IpAddr, Ipv4Addr};

use crate::parse::DiscoveryOutput;

/// Ports that are served over TLS even when the service name says otherwise.
const TLS_PORTS: [u16; 3] = [443, 8443, 9443];

/// Parse a CIDR such as `192.168.1.0/24`. A bare address is taken as a /32.
pub fn parse_subnet(s: &str) -> Result<IpNet, ipnet::AddrParseError> {
    let s = s.trim();
    match s.parse::<IpNet>() {
        Ok(net) => Ok(net.trunc()),
        Err(e) => match s.parse::<Ipv4Addr>() {
            Ok(ip) => Ipv4Net::new(ip, 32).map(IpNet::V4).map_err(|_| e),
            Err(_) => Err(e),
        },
    }
}

/// Number of addresses a sweep of `cidr` would touch.
///
/// Matches [`expand_cidr_to_ips`] for IPv4 without allocating. IPv6 is not
/// swept and reports zero.
pub fn host_count(cidr: IpNet) -> u64 {
    match cidr {
        IpNet::V4(n4) => {
            let start = u32::from(n4.network()) as u64;
            let end = u32::from(n4.broadcast()) as u64;
            match end - start {
                0 => 1,
                1 => 2,
                span => span - 1,
            }
        }
        IpNet::V6(_) => 0,
    }
}

/// Expand a CIDR into individual host addresses.
///
/// For IPv4, excludes the network and broadcast addresses; /31 and /32 keep
/// every address. IPv6 returns an empty list.
pub fn expand_cidr_to_ips(cidr: IpNet) -> Vec<IpAddr> {
    match cidr {
        IpNet::V4(n4) => expand_ipv4net_hosts(n4)
            .into_iter()
            .map(IpAddr::V4)
            .collect(),
        IpNet::V6(_) => Vec::new(),
    }
}

fn expand_ipv4net_hosts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if end - start <= 1 {
        return (start..=end).map(Ipv4Addr::from).collect();
    }
    (start + 1..end).map(Ipv4Addr::from).collect()
}

/// Probe and scan targets: one URL per open TCP port, in discovery order.
pub fn target_urls(output: &DiscoveryOutput) -> Vec<String> {
    let mut urls = Vec::new();
    for host in &output.hosts {
        for port in host.open_ports().filter(|p| p.protocol.eq_ignore_ascii_case("tcp")) {
            let scheme = if is_tls(port.number, port.service.as_deref()) { "https" } else { "http" };
            let url = format!("{scheme}://{}:{}", bracket_v6(&host.ip), port.number);
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    urls
}

fn is_tls(number: u16, service: Option<&str>) -> bool {
    if TLS_PORTS.contains(&number) {
        return true;
    }
    service
        .map(|s| {
            let s = s.to_ascii_lowercase();
            s == "https" || s.contains("ssl") || s.contains("tls")
        })
        .unwrap_or(false)
}

fn bracket_v6(ip: &str) -> String {
    if ip.contains(':') {
        format!("[{ip}]")
    } else {
        ip.to_string()
    }
}

/// Host part of a URL like `https://10.0.0.5:8443/login`, without port or brackets.
pub fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
    let host = if let Some(stripped) = authority.strip_prefix('[') {
        stripped.split(']').next()?
    } else {
        authority.split(':').next()?
    };
    (!host.is_empty()).then_some(host)
}
