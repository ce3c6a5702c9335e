//! Agent identity derivation.
//!
//! `agent_id = hostname + "-" + primary_mac`, where the primary MAC comes
//! from the first non-loopback, non-virtual interface with a real hardware
//! address when interfaces are sorted by name.  Stable across restarts on
//! unchanged hardware.

use scribe_protocol::NetworkInterfaceInfo;

/// Interface name prefixes that never count as the primary NIC.
const VIRTUAL_PREFIXES: [&str; 9] = [
    "lo", "veth", "docker", "br-", "virbr", "vmnet", "tap", "tun", "wg",
];

const ZERO_MAC: &str = "00:00:00:00:00:00";

#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub hostname: String,
}

/// Derive the agent id from a hostname and the interface inventory.
pub fn derive_agent_id(hostname: &str, interfaces: &[NetworkInterfaceInfo]) -> String {
    let mut sorted: Vec<&NetworkInterfaceInfo> = interfaces.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mac = sorted
        .iter()
        .find(|iface| is_physical(&iface.name) && iface.mac != ZERO_MAC && !iface.mac.is_empty())
        .map(|iface| iface.mac.to_lowercase())
        // Hosts with no qualifying NIC still need a stable id.
        .unwrap_or_else(|| "no-mac".to_owned());

    format!("{hostname}-{mac}")
}

fn is_physical(name: &str) -> bool {
    let lower = name.to_lowercase();
    !VIRTUAL_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Build the full identity from the probe's inventory.
///
/// `agent_name` (config/env) overrides the OS hostname when set.
pub fn resolve_identity(
    probe: &mut dyn scribe_probes::Probe,
    agent_name: Option<&str>,
) -> AgentIdentity {
    let info = probe.system_info();
    let hostname = agent_name
        .map(str::to_owned)
        .or_else(scribe_probes::hostname)
        .unwrap_or_else(|| "unknown-host".to_owned());
    let agent_id = derive_agent_id(&hostname, &info.interfaces);
    AgentIdentity { agent_id, hostname }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
