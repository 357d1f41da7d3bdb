//! Per-port switchport state.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::port::canonical_port;
use crate::vlan::VlanSet;

/// Mode and VLAN membership of one port as reported by the switch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortState {
    /// Lowercase mode string (`access`, `trunk`, `hybrid`, ...).
    pub mode: String,
    /// Access VLAN for access ports, native VLAN for trunks.
    pub native_vlan: Option<u16>,
    pub allowed_vlans: VlanSet,
}

fn row_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\S+)\s+(access|trunk|hybrid|dot1q-tunnel)\s+(\S+)\s*(.*?)\s*$")
            .expect("valid switchport regex")
    })
}

/// Parse a columnar switchport table:
///
/// ```text
/// Interface   Mode     Access vlan   Allowed vlans
/// Eth1/2      trunk    N/A           1, 10-20
/// ```
pub fn parse_switchport_table(text: &str) -> BTreeMap<String, PortState> {
    let mut ports = BTreeMap::new();
    for line in text.lines() {
        let Some(caps) = row_regex().captures(line) else {
            continue;
        };
        let name = canonical_port(&caps[1]);
        let allowed = caps[4].parse().unwrap_or_default();
        ports.insert(
            name,
            PortState {
                mode: caps[2].to_ascii_lowercase(),
                native_vlan: caps[3].parse().ok(),
                allowed_vlans: allowed,
            },
        );
    }
    ports
}

/// Parse block-style switchport output (`Name:` followed by indented
/// attribute lines), as printed by `show interface switchport`.
pub fn parse_switchport_blocks(text: &str) -> BTreeMap<String, PortState> {
    let mut ports = BTreeMap::new();
    let mut current: Option<(String, PortState, Option<u16>, Option<u16>)> = None;

    let flush = |entry: Option<(String, PortState, Option<u16>, Option<u16>)>,
                     ports: &mut BTreeMap<String, PortState>| {
        if let Some((name, mut state, access, native)) = entry {
            state.native_vlan = if state.mode == "trunk" { native } else { access };
            ports.insert(name, state);
        }
    };

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key == "name" {
            flush(current.take(), &mut ports);
            current = Some((block_port_name(value), PortState::default(), None, None));
            continue;
        }
        let Some((_, state, access, native)) = current.as_mut() else {
            continue;
        };
        let first = value.split_whitespace().next().unwrap_or_default();
        match key.as_str() {
            "operational mode" => state.mode = first.to_ascii_lowercase(),
            "access mode vlan" => *access = first.parse().ok(),
            "trunking native mode vlan" => *native = first.parse().ok(),
            "trunking vlans allowed" | "trunking vlans enabled" => {
                state.allowed_vlans = value.parse().unwrap_or_default();
            }
            _ => {}
        }
    }
    flush(current.take(), &mut ports);
    ports
}

fn block_port_name(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    match lower.strip_prefix("port-channel") {
        Some(num) => format!("Po{num}"),
        None => canonical_port(raw),
    }
}
