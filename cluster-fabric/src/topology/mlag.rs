//! MLAG pairing and master election.
//!
//! A switch's MLAG peer is the target of its first link that carries a
//! VLAN. Of the two peers, the one owning the numerically higher link IP is
//! the master and provides channel numbering for both. When neither link
//! address exceeds zero (unset), the first label in sorted order wins, so the
//! result never depends on file order.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use serde::Serialize;
use switch_core::{MlagConfig, MlagVip};

use super::{channel_number, TopologyError};
use crate::config::{ClusterConfig, PortRef, SwitchLink, SwitchRole};

/// One side of an MLAG pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MlagSide {
    pub switch: String,
    pub vlan: u16,
    /// Only set on the non-master side, with the management prefix.
    pub vip: Option<(Ipv4Addr, u8)>,
    pub ports: Vec<PortRef>,
    pub cidr: Option<String>,
    /// The other side's link address.
    pub peer_ip: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MlagPair {
    pub master: String,
    pub sides: Vec<MlagSide>,
}

impl MlagPair {
    pub fn side(&self, switch: &str) -> Option<&MlagSide> {
        self.sides.iter().find(|s| s.switch == switch)
    }

    pub fn contains(&self, switch: &str) -> bool {
        self.side(switch).is_some()
    }

    /// Name used for the pair's VIP domain.
    pub fn domain(&self) -> String {
        let labels: Vec<&str> = self.sides.iter().map(|s| s.switch.as_str()).collect();
        labels.join("-")
    }

    /// Device-level MLAG parameters for `switch`, or `None` if it is not in
    /// the pair or its link lacks an address.
    pub fn config_for(&self, switch: &str) -> Option<MlagConfig> {
        let side = self.side(switch)?;
        Some(MlagConfig {
            vlan: side.vlan,
            ipl_channel: channel_number(&side.ports)?,
            ipl_ports: side.ports.iter().map(|p| p.to_string()).collect(),
            local_cidr: side.cidr.clone()?,
            peer_ip: side.peer_ip?,
            vip: self.sides.iter().find_map(|s| {
                s.vip.map(|(address, prefix)| MlagVip {
                    domain: self.domain(),
                    address,
                    prefix,
                })
            }),
        })
    }
}

/// The link from `switch` that identifies its MLAG peer: the first one
/// carrying a VLAN. Links without one are plain inter-switch links.
pub fn peer_link<'a>(config: &'a ClusterConfig, switch: &str) -> Option<&'a SwitchLink> {
    let def = config.switch(switch)?;
    def.links.iter().find(|link| link.vlan.is_some())
}

fn link_value(link: &SwitchLink) -> u32 {
    link.ip.map(u32::from).unwrap_or(0)
}

/// All MLAG pairs among the data switches, ordered by master label.
pub fn mlag_pairs(config: &ClusterConfig) -> Result<Vec<MlagPair>, TopologyError> {
    let mut candidates: BTreeSet<(String, String)> = BTreeSet::new();
    for switch in config.switches_with_role(SwitchRole::Data) {
        if let Some(link) = peer_link(config, &switch.label) {
            let (a, b) = if switch.label <= link.target {
                (switch.label.clone(), link.target.clone())
            } else {
                (link.target.clone(), switch.label.clone())
            };
            candidates.insert((a, b));
        }
    }

    let mut pairs = Vec::with_capacity(candidates.len());
    for (a, b) in candidates {
        let link_a = link_between(config, &a, &b)?;
        let link_b = link_between(config, &b, &a)?;

        let mut master = a.clone();
        let mut highest = 0u32;
        for (label, link) in [(&a, link_a), (&b, link_b)] {
            let value = link_value(link);
            if value > highest {
                highest = value;
                master = label.clone();
            }
        }

        let side = |label: &str, link: &SwitchLink, other: &SwitchLink| MlagSide {
            switch: label.to_string(),
            vlan: link.vlan.unwrap_or_default(),
            vip: if label == master {
                None
            } else {
                link.vip.map(|v| (v, config.deployer.mgmt_prefix))
            },
            ports: link.ports.clone(),
            cidr: link.cidr(),
            peer_ip: other.ip,
        };
        let sides = vec![side(a.as_str(), link_a, link_b), side(b.as_str(), link_b, link_a)];
        pairs.push(MlagPair { master, sides });
    }
    pairs.sort_by(|x, y| x.master.cmp(&y.master));
    Ok(pairs)
}

fn link_between<'a>(
    config: &'a ClusterConfig,
    from: &str,
    to: &str,
) -> Result<&'a SwitchLink, TopologyError> {
    config
        .switch(from)
        .and_then(|s| {
            s.links
                .iter()
                .find(|l| l.target == to && l.vlan.is_some())
        })
        .ok_or_else(|| TopologyError::MlagLink {
            from: from.to_string(),
            to: to.to_string(),
        })
}

/// Map each data switch to the master of its MLAG pair (itself when
/// unpaired).
pub fn master_map(config: &ClusterConfig, pairs: &[MlagPair]) -> BTreeMap<String, String> {
    config
        .switches_with_role(SwitchRole::Data)
        .map(|s| {
            let master = pairs
                .iter()
                .find(|p| p.contains(&s.label))
                .map_or_else(|| s.label.clone(), |p| p.master.clone());
            (s.label.clone(), master)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use pretty_assertions::assert_eq;

    use super::{mlag_pairs, peer_link};
    use crate::config::parse_config;

    fn pair_config(ip_a: &str, ip_b: &str, first: &str) -> String {
        let a = format!(
            r#"
[[switches]]
label = "A"
class = "mellanox"
role = "data"
ip = "192.0.2.1"
[[switches.links]]
target = "B"
ports = [29, 30]
vlan = 4000
ip = "{ip_a}"
prefix = 24
vip = "192.168.5.254"
"#
        );
        let b = format!(
            r#"
[[switches]]
label = "B"
class = "mellanox"
role = "data"
ip = "192.0.2.2"
[[switches.links]]
target = "A"
ports = [29, 30]
vlan = 4000
ip = "{ip_b}"
prefix = 24
vip = "192.168.5.254"
"#
        );
        let body = if first == "A" { a + &b } else { b + &a };
        format!("[deployer]\nmgmt_prefix = 20\n{body}")
    }

    #[test]
    fn higher_link_address_wins_regardless_of_order() {
        for first in ["A", "B"] {
            let raw = pair_config("10.0.0.5", "10.0.0.9", first);
            let config = parse_config(&raw, "inline").expect("config");
            let pairs = mlag_pairs(&config).expect("pairs");
            assert_eq!(pairs.len(), 1);
            assert_eq!(pairs[0].master, "B");
        }
    }

    #[test]
    fn peer_ip_and_vip_follow_master() {
        let config =
            parse_config(&pair_config("10.0.0.9", "10.0.0.5", "B"), "inline").expect("config");
        let pair = &mlag_pairs(&config).expect("pairs")[0];
        assert_eq!(pair.master, "A");

        let a = pair.side("A").expect("side A");
        let b = pair.side("B").expect("side B");
        assert_eq!(a.peer_ip, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(b.peer_ip, Some(Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(a.vip, None);
        assert_eq!(b.vip, Some((Ipv4Addr::new(192, 168, 5, 254), 20)));

        let cfg = pair.config_for("A").expect("mlag config");
        assert_eq!(cfg.ipl_channel, 29);
        assert_eq!(cfg.local_cidr, "10.0.0.9/24");
        assert_eq!(cfg.vip.expect("vip").domain, "A-B");
    }

    #[test]
    fn unset_addresses_fall_back_to_first_label() {
        let raw = pair_config("0.0.0.0", "0.0.0.0", "B");
        let config = parse_config(&raw, "inline").expect("config");
        assert_eq!(mlag_pairs(&config).expect("pairs")[0].master, "A");
    }

    #[test]
    fn only_a_vlan_marks_the_peer_link() {
        let plain_link = "[[switches.links]]\ntarget = \"mgmt1\"\nports = [48]\n\n";
        let raw = pair_config("10.0.0.9", "10.0.0.5", "A").replacen(
            "[[switches.links]]\ntarget = \"B\"",
            &format!("{plain_link}[[switches.links]]\ntarget = \"B\""),
            1,
        ) + r#"
[[switches]]
label = "mgmt1"
class = "cisco"
role = "mgmt"
ip = "192.0.2.10"
"#;
        let config = parse_config(&raw, "inline").expect("config");
        assert_eq!(config.switch("A").expect("A").links.len(), 2);
        assert_eq!(peer_link(&config, "A").expect("peer").target, "B");
        assert_eq!(peer_link(&config, "mgmt1").map(|l| l.target.as_str()), None);
        assert_eq!(mlag_pairs(&config).expect("pairs").len(), 1);
    }
}
