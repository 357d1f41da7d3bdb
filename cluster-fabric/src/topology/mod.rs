//! Static topology aggregation.
//!
//! Turns node templates, interface definitions and switch links into the
//! structures the provisioner applies: per-switch VLAN and MTU assignments,
//! bonded channel groups and MLAG pairs. Pure functions of the
//! configuration; nothing here touches a switch.

pub mod bonds;
pub mod mlag;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use switch_core::port_suffix;
use thiserror::Error;

use crate::config::{ClusterConfig, InterfaceDef, NetworkKind, NodeTemplate, PortRef};

pub use bonds::{Bond, ChannelGroup, PortGroup};
pub use mlag::{MlagPair, MlagSide};

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error(
        "bond {bond} member {member} in template {template} matches {found} data bindings, expected exactly one"
    )]
    BondMember {
        bond: String,
        template: String,
        member: String,
        found: usize,
    },
    #[error("bond {bond} in template {template} has unequal port lists on switch {switch}")]
    UnevenPorts {
        bond: String,
        template: String,
        switch: String,
    },
    #[error("switch {from} has no vlan-carrying link back to MLAG peer {to}")]
    MlagLink { from: String, to: String },
}

/// `switch -> port -> vlans`.
pub type VlanMap = BTreeMap<String, BTreeMap<PortRef, BTreeSet<u16>>>;
/// `switch -> port -> mtu`.
pub type MtuMap = BTreeMap<String, BTreeMap<PortRef, u32>>;

/// Channel number of a port group: the smallest numeric port suffix.
pub fn channel_number<S: AsRef<str>>(ports: &[S]) -> Option<u32> {
    ports.iter().filter_map(|p| port_suffix(p.as_ref())).min()
}

/// One node instance of a template and where its BMC and PXE NIC are cabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSlot {
    pub template: String,
    pub index: usize,
    pub ipmi: Option<(String, PortRef)>,
    pub pxe: Option<(String, PortRef)>,
}

/// Everything the provisioner needs, computed in one pass.
#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    pub vlans: VlanMap,
    pub mtus: MtuMap,
    pub mlag_pairs: Vec<MlagPair>,
    pub channel_groups: Vec<ChannelGroup>,
}

impl Topology {
    pub fn mlag_pair(&self, switch: &str) -> Option<&MlagPair> {
        self.mlag_pairs.iter().find(|p| p.contains(switch))
    }

    /// Channel groups that have ports on `switch`.
    pub fn groups_on<'a>(&'a self, switch: &'a str) -> impl Iterator<Item = &'a ChannelGroup> {
        self.channel_groups
            .iter()
            .filter(move |g| g.per_switch.contains_key(switch))
    }

    /// Ports of `switch` absorbed into some channel group, by canonical name.
    pub fn bonded_ports(&self, switch: &str) -> BTreeSet<PortRef> {
        self.groups_on(switch)
            .filter_map(|g| g.per_switch.get(switch))
            .flatten()
            .flatten()
            .map(PortRef::canonical_ref)
            .collect()
    }

    /// Union of VLANs carried by `ports` on `switch`.
    pub fn vlans_for(&self, switch: &str, ports: &[PortRef]) -> BTreeSet<u16> {
        let Some(by_port) = self.vlans.get(switch) else {
            return BTreeSet::new();
        };
        ports
            .iter()
            .filter_map(|p| by_port.get(&p.canonical_ref()))
            .flatten()
            .copied()
            .collect()
    }

    /// Largest MTU among `ports` on `switch`.
    pub fn mtu_for(&self, switch: &str, ports: &[PortRef]) -> Option<u32> {
        let by_port = self.mtus.get(switch)?;
        ports
            .iter()
            .filter_map(|p| by_port.get(&p.canonical_ref()))
            .copied()
            .max()
    }
}

/// Pure aggregation over a [`ClusterConfig`].
pub struct TopologyAggregator<'a> {
    config: &'a ClusterConfig,
}

impl<'a> TopologyAggregator<'a> {
    pub fn new(config: &'a ClusterConfig) -> Self {
        Self { config }
    }

    pub fn aggregate(&self) -> Result<Topology, TopologyError> {
        let mlag_pairs = self.mlag_pairs()?;
        let masters = mlag::master_map(self.config, &mlag_pairs);
        Ok(Topology {
            vlans: self.vlan_map(),
            mtus: self.mtu_map(),
            channel_groups: bonds::channel_groups(self.config, &masters)?,
            mlag_pairs,
        })
    }

    pub fn mlag_pairs(&self) -> Result<Vec<MlagPair>, TopologyError> {
        mlag::mlag_pairs(self.config)
    }

    pub fn vlan_map(&self) -> VlanMap {
        let mut map = VlanMap::new();
        self.walk(|iface, switch, ports| {
            let Some(vlan) = iface.vlan_id() else {
                return;
            };
            let by_port = map.entry(switch.to_string()).or_default();
            for port in ports {
                by_port.entry(port.canonical_ref()).or_default().insert(vlan);
            }
        });
        map
    }

    pub fn mtu_map(&self) -> MtuMap {
        let mut map = MtuMap::new();
        self.walk(|iface, switch, ports| {
            let Some(mtu) = iface.mtu else {
                return;
            };
            let by_port = map.entry(switch.to_string()).or_default();
            for port in ports {
                let current = by_port.entry(port.canonical_ref()).or_insert(mtu);
                *current = (*current).max(mtu);
            }
        });
        map
    }

    /// Node instances of every template, in template order.
    pub fn node_slots(&self) -> Vec<NodeSlot> {
        let mut slots = Vec::new();
        for template in &self.config.node_templates {
            let ipmi = flatten(template, NetworkKind::Ipmi);
            let pxe = flatten(template, NetworkKind::Pxe);
            for index in 0..ipmi.len().max(pxe.len()) {
                slots.push(NodeSlot {
                    template: template.label.clone(),
                    index,
                    ipmi: ipmi.get(index).cloned(),
                    pxe: pxe.get(index).cloned(),
                });
            }
        }
        slots
    }

    /// Ports cabled to `kind` NICs, per switch, in configured order.
    pub fn network_ports(&self, kind: NetworkKind) -> BTreeMap<String, Vec<PortRef>> {
        let mut out: BTreeMap<String, Vec<PortRef>> = BTreeMap::new();
        for template in &self.config.node_templates {
            for (switch, port) in flatten(template, kind) {
                let ports = out.entry(switch).or_default();
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
        }
        out
    }

    /// Visit each (interface, switch, ports) reached from each template.
    fn walk(&self, mut visit: impl FnMut(&InterfaceDef, &str, &[PortRef])) {
        for template in &self.config.node_templates {
            for label in self.config.template_interfaces(template) {
                let Some(iface) = self.config.interface(&label) else {
                    continue;
                };
                for (switch, ports) in self.resolve(template, iface, 0) {
                    visit(iface, &switch, &ports);
                }
            }
        }
    }

    /// Physical ports under `iface`, following VLAN raw devices and bond
    /// members down to data bindings.
    fn resolve(
        &self,
        template: &NodeTemplate,
        iface: &InterfaceDef,
        depth: usize,
    ) -> Vec<(String, Vec<PortRef>)> {
        if depth > 8 {
            return Vec::new();
        }
        let device = iface.device();
        let direct: Vec<(String, Vec<PortRef>)> = template
            .physical_interfaces
            .data
            .iter()
            .filter(|b| {
                b.interface
                    .as_deref()
                    .is_some_and(|i| i == device || i == iface.label)
            })
            .map(|b| (b.switch.clone(), b.ports.clone()))
            .collect();
        if !direct.is_empty() {
            return direct;
        }
        if let Some(raw) = iface
            .vlan_raw_device
            .as_deref()
            .and_then(|raw| self.config.interface_by_device(raw))
        {
            return self.resolve(template, raw, depth + 1);
        }
        self.config
            .interfaces
            .iter()
            .filter(|m| m.master_device() == Some(device) || iface.lists_slave(m.device()))
            .flat_map(|m| self.resolve(template, m, depth + 1))
            .collect()
    }
}

fn flatten(template: &NodeTemplate, kind: NetworkKind) -> Vec<(String, PortRef)> {
    template
        .bindings(kind)
        .iter()
        .flat_map(|b| b.ports.iter().map(|p| (b.switch.clone(), p.clone())))
        .collect()
}
