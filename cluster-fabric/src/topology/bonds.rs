//! Bond derivation and channel-group aggregation.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::{channel_number, TopologyError};
use crate::config::{ClusterConfig, NodeTemplate, PortRef};

/// A bonding master and its member interface labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bond {
    pub label: String,
    pub device: String,
    pub members: Vec<String>,
}

/// Ports of one LAG: for each participating switch, the ports of one node
/// instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortGroup {
    pub channel: u32,
    pub members: BTreeMap<String, Vec<PortRef>>,
}

impl PortGroup {
    pub fn ports_on(&self, switch: &str) -> &[PortRef] {
        self.members.get(switch).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Bonded ports of one (bond, template) under one master switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelGroup {
    pub bond: String,
    pub node_template: String,
    pub master_switch: String,
    /// Per switch, per node instance, the ports bonded on that switch.
    pub per_switch: BTreeMap<String, Vec<Vec<PortRef>>>,
}

impl ChannelGroup {
    /// Two switches under one master means an MLAG pair.
    pub fn is_mlag(&self) -> bool {
        self.per_switch.len() == 2
    }

    /// Position `i` across every switch forms one LAG.
    pub fn port_groups(&self) -> Vec<PortGroup> {
        let instances = self.per_switch.values().map(Vec::len).max().unwrap_or(0);
        (0..instances)
            .filter_map(|i| {
                let members: BTreeMap<String, Vec<PortRef>> = self
                    .per_switch
                    .iter()
                    .filter_map(|(switch, nodes)| Some((switch.clone(), nodes.get(i)?.clone())))
                    .collect();
                let all: Vec<&PortRef> = members.values().flatten().collect();
                let channel = channel_number(&all)?;
                Some(PortGroup { channel, members })
            })
            .collect()
    }
}

/// Bonds declared by the interface definitions: any interface that other
/// interfaces name as their master, or that lists them in `bond_slaves`.
pub fn bonds(config: &ClusterConfig) -> Vec<Bond> {
    config
        .interfaces
        .iter()
        .map(|iface| Bond {
            label: iface.label.clone(),
            device: iface.device().to_string(),
            members: config
                .interfaces
                .iter()
                .filter(|m| {
                    m.master_device() == Some(iface.device()) || iface.lists_slave(m.device())
                })
                .map(|m| m.label.clone())
                .collect(),
        })
        .filter(|bond| !bond.members.is_empty())
        .collect()
}

/// Bonds a template uses, directly or through a VLAN interface on top.
pub fn template_bonds<'a>(
    config: &ClusterConfig,
    template: &NodeTemplate,
    bonds: &'a [Bond],
) -> Vec<&'a Bond> {
    let mut used = BTreeSet::new();
    for label in config.template_interfaces(template) {
        let mut current = config.interface(&label);
        while let Some(iface) = current {
            used.insert(iface.device().to_string());
            current = iface
                .vlan_raw_device
                .as_deref()
                .and_then(|raw| config.interface_by_device(raw));
        }
    }
    bonds.iter().filter(|b| used.contains(&b.device)).collect()
}

/// Stage one: `member -> (switch, ports)` for one bond in one template.
/// Each member must match exactly one data binding.
fn member_ports(
    config: &ClusterConfig,
    template: &NodeTemplate,
    bond: &Bond,
) -> Result<Vec<(String, Vec<PortRef>)>, TopologyError> {
    let mut out = Vec::with_capacity(bond.members.len());
    for member in &bond.members {
        let device = config
            .interface(member)
            .map(|i| i.device().to_string())
            .unwrap_or_else(|| member.clone());
        let matches: Vec<_> = template
            .physical_interfaces
            .data
            .iter()
            .filter(|b| {
                b.interface
                    .as_deref()
                    .is_some_and(|i| i == device || i == member.as_str())
            })
            .collect();
        match matches.as_slice() {
            [binding] => out.push((binding.switch.clone(), binding.ports.clone())),
            _ => {
                return Err(TopologyError::BondMember {
                    bond: bond.label.clone(),
                    template: template.label.clone(),
                    member: member.clone(),
                    found: matches.len(),
                })
            }
        }
    }
    Ok(out)
}

/// Stage two: transpose each switch's member port lists so entry `i` holds
/// the ports of node instance `i`.
fn transpose_by_switch(
    bond: &Bond,
    template: &NodeTemplate,
    members: Vec<(String, Vec<PortRef>)>,
) -> Result<BTreeMap<String, Vec<Vec<PortRef>>>, TopologyError> {
    let mut by_switch: BTreeMap<String, Vec<Vec<PortRef>>> = BTreeMap::new();
    for (switch, ports) in members {
        by_switch.entry(switch).or_default().push(ports);
    }

    let mut out = BTreeMap::new();
    for (switch, lists) in by_switch {
        let len = lists[0].len();
        if lists.iter().any(|l| l.len() != len) {
            return Err(TopologyError::UnevenPorts {
                bond: bond.label.clone(),
                template: template.label.clone(),
                switch,
            });
        }
        let nodes: Vec<Vec<PortRef>> = (0..len)
            .map(|i| lists.iter().map(|l| l[i].clone()).collect())
            .collect();
        out.insert(switch, nodes);
    }
    Ok(out)
}

/// Stage three: fold per-switch groups under each switch's MLAG master so
/// both peers land in one [`ChannelGroup`].
pub fn channel_groups(
    config: &ClusterConfig,
    masters: &BTreeMap<String, String>,
) -> Result<Vec<ChannelGroup>, TopologyError> {
    let bonds = bonds(config);
    let mut groups: BTreeMap<(String, String, String), ChannelGroup> = BTreeMap::new();

    for template in &config.node_templates {
        for bond in template_bonds(config, template, &bonds) {
            let members = member_ports(config, template, bond)?;
            for (switch, nodes) in transpose_by_switch(bond, template, members)? {
                let master = masters.get(&switch).cloned().unwrap_or_else(|| switch.clone());
                let key = (bond.label.clone(), template.label.clone(), master.clone());
                groups
                    .entry(key)
                    .or_insert_with(|| ChannelGroup {
                        bond: bond.label.clone(),
                        node_template: template.label.clone(),
                        master_switch: master,
                        per_switch: BTreeMap::new(),
                    })
                    .per_switch
                    .insert(switch, nodes);
            }
        }
    }
    Ok(groups.into_values().collect())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::{bonds, channel_groups};
    use crate::config::{parse_config, PortRef};

    const LEGACY: &str = r#"
[deployer]

[[switches]]
label = "data1"
class = "mellanox"
role = "data"
ip = "192.0.2.1"

[[interfaces]]
label = "bond1"
DEVICE = "bond1"
BONDING_MASTER = "yes"

[[interfaces]]
label = "p1"
DEVICE = "eth10"
MASTER = "bond1"

[[interfaces]]
label = "p2"
DEVICE = "eth11"
MASTER = "bond1"

[[node_templates]]
label = "storage"
interfaces = ["bond1"]
[[node_templates.physical_interfaces.data]]
switch = "data1"
interface = "eth10"
ports = [7, 9]
[[node_templates.physical_interfaces.data]]
switch = "data1"
interface = "eth11"
ports = [8, 10]
"#;

    #[test]
    fn legacy_bond_style_is_recognized() {
        let config = parse_config(LEGACY, "inline").expect("config");
        let found = bonds(&config);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].members, vec!["p1".to_string(), "p2".to_string()]);
    }

    #[test]
    fn single_switch_bond_is_a_plain_lag() {
        let config = parse_config(LEGACY, "inline").expect("config");
        let groups = channel_groups(&config, &BTreeMap::new()).expect("groups");
        assert_eq!(groups.len(), 1);
        assert!(!groups[0].is_mlag());

        let lags = groups[0].port_groups();
        assert_eq!(lags.len(), 2);
        assert_eq!(lags[0].channel, 7);
        assert_eq!(lags[0].ports_on("data1"), &[PortRef::new("7"), PortRef::new("8")]);
        assert_eq!(lags[1].channel, 9);
    }

    #[test]
    fn member_without_binding_is_an_error() {
        let raw = LEGACY.replace("interface = \"eth11\"", "interface = \"eth12\"");
        let config = parse_config(&raw, "inline").expect("config");
        let err = channel_groups(&config, &BTreeMap::new()).expect_err("should fail");
        assert!(err.to_string().contains("p2"));
    }
}
