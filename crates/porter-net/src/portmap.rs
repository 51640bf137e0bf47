//! Published port mappings.
//!
//! The mapping list is parsed from the `ports` annotation and is the single
//! source of truth for both CNI and the rootless port forwarder. Rootless
//! mode may need to rewrite host IPs that are not bindable inside the child
//! namespace; the rewrite always produces a fresh list so the canonical one
//! stays untouched.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// A port mapping between host and container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Host IP to bind to.
    #[serde(rename = "HostIP", default)]
    pub host_ip: String,
    /// Host port.
    #[serde(rename = "HostPort")]
    pub host_port: u16,
    /// Container port.
    #[serde(rename = "ContainerPort")]
    pub container_port: u16,
    /// Protocol (`tcp` or `udp`).
    #[serde(rename = "Protocol", default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

/// Compute the host IP a mapping must carry inside a rootless child
/// namespace, or `None` when the mapping is left unchanged.
///
/// The loopback address is always bindable in the child namespace; other
/// concrete addresses are only bindable when they happen to be the child's
/// own IP. Port drivers that disallow a loopback child IP need the child IP
/// substituted instead.
#[must_use]
pub fn rewritten_host_ip(
    host_ip: &str,
    child_ip: Option<IpAddr>,
    disallow_loopback_child_ip: bool,
) -> Option<String> {
    let ip: IpAddr = host_ip.parse().ok()?;
    if ip.is_unspecified() {
        return None;
    }
    if !ip.is_loopback() {
        if child_ip == Some(ip) {
            return None;
        }
        if disallow_loopback_child_ip {
            if child_ip.is_none() {
                tracing::debug!(host_ip, "no child IP reported, leaving host IP unchanged");
            }
            return child_ip.map(|c| c.to_string());
        }
        return Some("127.0.0.1".to_string());
    }
    if disallow_loopback_child_ip {
        return child_ip.map(|c| c.to_string());
    }
    None
}

/// Produce the CNI-bound copy of a port list for a rootless child.
///
/// The input list is never mutated; the forwarder keeps working off the
/// original addresses.
#[must_use]
pub fn rewrite_for_child(
    ports: &[PortMapping],
    child_ip: Option<IpAddr>,
    disallow_loopback_child_ip: bool,
) -> Vec<PortMapping> {
    ports
        .iter()
        .map(|p| {
            let mut p = p.clone();
            if let Some(rewritten) =
                rewritten_host_ip(&p.host_ip, child_ip, disallow_loopback_child_ip)
            {
                tracing::debug!(
                    from = %p.host_ip,
                    to = %rewritten,
                    host_port = p.host_port,
                    "rewrote unbindable host IP for the child namespace"
                );
                p.host_ip = rewritten;
            }
            p
        })
        .collect()
}
