//! Typed cluster configuration.
//!
//! The TOML document is deserialized once into these structs; everything
//! downstream reads named fields instead of walking nested tables.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use switch_core::{canonical_port, port_suffix, SwitchMode};
use thiserror::Error;

/// Errors returned when loading a cluster configuration.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid config file {path}: {message}")]
    Invalid { path: String, message: String },
}

/// Load and validate a cluster configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ClusterConfig, ConfigLoadError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&raw, &path.display().to_string())
}

/// Parse and validate a configuration document. `origin` names it in errors.
pub fn parse_config(raw: &str, origin: &str) -> Result<ClusterConfig, ConfigLoadError> {
    let config: ClusterConfig = toml::from_str(raw).map_err(|source| ConfigLoadError::Parse {
        path: origin.to_string(),
        source,
    })?;
    config
        .validate()
        .map_err(|message| ConfigLoadError::Invalid {
            path: origin.to_string(),
            message,
        })?;
    Ok(config)
}

/// A switch port as written in configuration: a bare number (`12`) or a
/// prefixed identifier (`eth1/12`).
///
/// Ordered by numeric suffix, then by text, so port lists sort naturally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawPort", into = "String")]
pub struct PortRef(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u64),
    Text(String),
}

impl From<RawPort> for PortRef {
    fn from(raw: RawPort) -> Self {
        match raw {
            RawPort::Number(n) => PortRef(n.to_string()),
            RawPort::Text(s) => PortRef(s.trim().to_string()),
        }
    }
}

impl From<PortRef> for String {
    fn from(port: PortRef) -> Self {
        port.0
    }
}

impl PortRef {
    pub fn new(port: impl Into<String>) -> Self {
        PortRef(port.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key matching switch output (see [`canonical_port`]).
    pub fn canonical(&self) -> String {
        canonical_port(&self.0)
    }

    /// The same port under its canonical name, e.g. `Eth1/5` as `5`.
    pub fn canonical_ref(&self) -> PortRef {
        PortRef(self.canonical())
    }

    pub fn suffix(&self) -> Option<u32> {
        port_suffix(&self.0)
    }
}

impl AsRef<str> for PortRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for PortRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.suffix()
            .cmp(&other.suffix())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for PortRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub deployer: DeployerConfig,
    #[serde(default)]
    pub switches: Vec<SwitchDef>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceDef>,
    #[serde(default)]
    pub networks: Vec<NetworkDef>,
    #[serde(default)]
    pub node_templates: Vec<NodeTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerConfig {
    /// Prefix length of the management network, used with MLAG VIPs.
    #[serde(default = "default_mgmt_prefix")]
    pub mgmt_prefix: u8,
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
    /// Where passive switches write their command transcripts.
    #[serde(default = "default_transcript_dir")]
    pub transcript_dir: PathBuf,
    /// Scratch space for dnsmasq leases and packet captures.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub networks: Vec<ClientNetwork>,
}

fn default_mgmt_prefix() -> u8 {
    24
}

fn default_lock_dir() -> PathBuf {
    std::env::temp_dir().join("cluster-fabric").join("locks")
}

fn default_transcript_dir() -> PathBuf {
    PathBuf::from("switch-commands")
}

fn default_state_dir() -> PathBuf {
    std::env::temp_dir().join("cluster-fabric")
}

/// Client network served during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Ipmi,
    Pxe,
}

impl NetworkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkKind::Ipmi => "ipmi",
            NetworkKind::Pxe => "pxe",
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientNetwork {
    pub kind: NetworkKind,
    pub vlan: u16,
    /// Deployer's address on the bridge.
    pub bridge_ip: Ipv4Addr,
    pub prefix: u8,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Bridge name when it does not follow `br-<kind>-<vlan>`.
    #[serde(default)]
    pub bridge: Option<String>,
}

fn default_pool_size() -> u32 {
    250
}

impl ClientNetwork {
    pub fn bridge_name(&self) -> String {
        self.bridge
            .clone()
            .unwrap_or_else(|| format!("br-{}-{}", self.kind, self.vlan))
    }

    pub fn network(&self) -> Result<Ipv4Network, ipnetwork::IpNetworkError> {
        Ipv4Network::new(self.bridge_ip, self.prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchRole {
    Mgmt,
    Data,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchDef {
    pub label: String,
    /// Vendor dialect, e.g. `mellanox` or `cisco`.
    pub class: String,
    pub role: SwitchRole,
    #[serde(default)]
    pub mode: SwitchMode,
    pub ip: String,
    #[serde(default)]
    pub userid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub links: Vec<SwitchLink>,
}

/// Cabling from one switch to another. A link carrying a `vlan` is an
/// MLAG inter-peer link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchLink {
    pub target: String,
    #[serde(default)]
    pub ports: Vec<PortRef>,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub prefix: Option<u8>,
    #[serde(default)]
    pub vip: Option<Ipv4Addr>,
}

impl SwitchLink {
    pub fn cidr(&self) -> Option<String> {
        Some(format!("{}/{}", self.ip?, self.prefix?))
    }
}

/// A host interface definition. Both bonding styles are accepted: modern
/// (`bond_master` on members, `bond_mode`/`bond_slaves` on the bond) and
/// legacy (`MASTER` on members, `BONDING_MASTER` on the bond).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterfaceDef {
    pub label: String,
    #[serde(default, alias = "iface", alias = "DEVICE")]
    pub device: Option<String>,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default, alias = "MTU")]
    pub mtu: Option<u32>,
    #[serde(default, alias = "PHYSDEV")]
    pub vlan_raw_device: Option<String>,
    #[serde(default)]
    pub bond_master: Option<String>,
    #[serde(default)]
    pub bond_mode: Option<String>,
    #[serde(default)]
    pub bond_slaves: Option<String>,
    #[serde(default, rename = "MASTER")]
    pub master: Option<String>,
    #[serde(default, rename = "BONDING_MASTER")]
    pub bonding_master: Option<String>,
}

impl InterfaceDef {
    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(&self.label)
    }

    /// Bond this interface is enslaved to, in either style.
    pub fn master_device(&self) -> Option<&str> {
        self.bond_master.as_deref().or(self.master.as_deref())
    }

    /// Whether `device` is named in this interface's `bond_slaves` list.
    pub fn lists_slave(&self, device: &str) -> bool {
        self.bond_slaves
            .as_deref()
            .is_some_and(|s| s.split([' ', ',']).any(|d| d == device))
    }

    /// Tagged VLAN: the explicit `vlan`, else the numeric suffix of a
    /// `<raw>.<vlan>` device on top of a raw device.
    pub fn vlan_id(&self) -> Option<u16> {
        self.vlan.or_else(|| {
            self.vlan_raw_device.as_ref()?;
            self.device().rsplit_once('.')?.1.parse().ok()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDef {
    pub label: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub label: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub ipmi: Option<BmcCredentials>,
    #[serde(default)]
    pub physical_interfaces: PhysicalInterfaces,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcCredentials {
    pub userid: String,
    pub password: String,
    #[serde(default = "default_bmc_type")]
    pub bmc_type: String,
}

fn default_bmc_type() -> String {
    "openbmc".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhysicalInterfaces {
    #[serde(default)]
    pub ipmi: Vec<PortBinding>,
    #[serde(default)]
    pub pxe: Vec<PortBinding>,
    #[serde(default)]
    pub data: Vec<PortBinding>,
}

/// Ports on one switch, one per node instance of the template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortBinding {
    pub switch: String,
    /// Host device cabled to these ports (data bindings only).
    #[serde(default)]
    pub interface: Option<String>,
    pub ports: Vec<PortRef>,
}

impl NodeTemplate {
    /// Node instances: one per configured IPMI port.
    pub fn node_count(&self) -> usize {
        self.physical_interfaces
            .ipmi
            .iter()
            .map(|b| b.ports.len())
            .sum()
    }

    pub fn bindings(&self, kind: NetworkKind) -> &[PortBinding] {
        match kind {
            NetworkKind::Ipmi => &self.physical_interfaces.ipmi,
            NetworkKind::Pxe => &self.physical_interfaces.pxe,
        }
    }
}

impl ClusterConfig {
    pub fn switch(&self, label: &str) -> Option<&SwitchDef> {
        self.switches.iter().find(|s| s.label == label)
    }

    pub fn switches_with_role(&self, role: SwitchRole) -> impl Iterator<Item = &SwitchDef> {
        self.switches.iter().filter(move |s| s.role == role)
    }

    pub fn interface(&self, label: &str) -> Option<&InterfaceDef> {
        self.interfaces.iter().find(|i| i.label == label)
    }

    pub fn interface_by_device(&self, device: &str) -> Option<&InterfaceDef> {
        self.interfaces.iter().find(|i| i.device() == device)
    }

    pub fn network(&self, label: &str) -> Option<&NetworkDef> {
        self.networks.iter().find(|n| n.label == label)
    }

    pub fn client_network(&self, kind: NetworkKind) -> Option<&ClientNetwork> {
        self.deployer.networks.iter().find(|n| n.kind == kind)
    }

    pub fn template(&self, label: &str) -> Option<&NodeTemplate> {
        self.node_templates.iter().find(|t| t.label == label)
    }

    /// Interface labels used by a template, direct ones first, then those
    /// pulled in through its networks. Duplicates are dropped.
    pub fn template_interfaces(&self, template: &NodeTemplate) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let via_networks = template
            .networks
            .iter()
            .filter_map(|n| self.network(n))
            .flat_map(|n| n.interfaces.iter());
        template
            .interfaces
            .iter()
            .chain(via_networks)
            .filter(|label| seen.insert(label.as_str()))
            .cloned()
            .collect()
    }

    /// Check cross references. Returns the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let mut labels = BTreeSet::new();
        for switch in &self.switches {
            if !labels.insert(switch.label.as_str()) {
                return Err(format!("duplicate switch label '{}'", switch.label));
            }
        }
        for switch in &self.switches {
            for link in &switch.links {
                if self.switch(&link.target).is_none() {
                    return Err(format!(
                        "switch '{}' links to unknown switch '{}'",
                        switch.label, link.target
                    ));
                }
            }
        }
        for network in &self.networks {
            for iface in &network.interfaces {
                if self.interface(iface).is_none() {
                    return Err(format!(
                        "network '{}' references unknown interface '{iface}'",
                        network.label
                    ));
                }
            }
        }
        for template in &self.node_templates {
            for iface in &template.interfaces {
                if self.interface(iface).is_none() {
                    return Err(format!(
                        "node template '{}' references unknown interface '{iface}'",
                        template.label
                    ));
                }
            }
            for network in &template.networks {
                if self.network(network).is_none() {
                    return Err(format!(
                        "node template '{}' references unknown network '{network}'",
                        template.label
                    ));
                }
            }
            let phys = &template.physical_interfaces;
            for binding in phys.ipmi.iter().chain(&phys.pxe).chain(&phys.data) {
                if self.switch(&binding.switch).is_none() {
                    return Err(format!(
                        "node template '{}' binds ports on unknown switch '{}'",
                        template.label, binding.switch
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_config, ConfigLoadError, InterfaceDef, PortRef};

    const MINIMAL: &str = r#"
[deployer]
[[deployer.networks]]
kind = "ipmi"
vlan = 10
bridge_ip = "192.168.10.2"
prefix = 24

[[switches]]
label = "mgmt1"
class = "cisco"
role = "mgmt"
ip = "192.168.5.10"

[[interfaces]]
label = "data-10"
iface = "eth10"
MTU = 9000

[[node_templates]]
label = "compute"
interfaces = ["data-10"]
[[node_templates.physical_interfaces.ipmi]]
switch = "mgmt1"
ports = [1, "eth1/2"]
"#;

    #[test]
    fn ports_accept_numbers_and_strings() {
        let config = parse_config(MINIMAL, "inline").expect("config");
        let ports = &config.node_templates[0].physical_interfaces.ipmi[0].ports;
        assert_eq!(ports, &vec![PortRef::new("1"), PortRef::new("eth1/2")]);
        assert_eq!(config.node_templates[0].node_count(), 2);
        assert_eq!(config.deployer.networks[0].bridge_name(), "br-ipmi-10");
        assert_eq!(config.deployer.mgmt_prefix, 24);
    }

    #[test]
    fn interface_aliases_resolve() {
        let config = parse_config(MINIMAL, "inline").expect("config");
        let iface = config.interface("data-10").expect("interface");
        assert_eq!(iface.device(), "eth10");
        assert_eq!(iface.mtu, Some(9000));
    }

    #[test]
    fn unknown_switch_reference_is_rejected() {
        let raw = MINIMAL.replace("switch = \"mgmt1\"", "switch = \"mgmt9\"");
        let err = parse_config(&raw, "inline").expect_err("should fail");
        assert!(matches!(err, ConfigLoadError::Invalid { .. }));
        assert!(err.to_string().contains("mgmt9"));
    }

    #[test]
    fn vlan_comes_from_device_suffix_on_raw_device() {
        let iface = InterfaceDef {
            label: "bond0.20".to_string(),
            device: Some("bond0.20".to_string()),
            vlan_raw_device: Some("bond0".to_string()),
            ..InterfaceDef::default()
        };
        assert_eq!(iface.vlan_id(), Some(20));
    }

    #[test]
    fn ports_sort_by_numeric_suffix() {
        let mut ports = vec![PortRef::new("12"), PortRef::new("eth1/5"), PortRef::new("7")];
        ports.sort();
        assert_eq!(
            ports,
            vec![PortRef::new("eth1/5"), PortRef::new("7"), PortRef::new("12")]
        );
    }
}
