//! Mellanox Onyx (MLNX-OS).
//!
//! Commands go through the `cli` shell wrapper, so a configuration sequence
//! becomes one exec string: `cli enable "configure terminal" "vlan 10"`.

use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use super::SwitchClass;
use crate::error::Result;
use crate::session::SwitchSession;
use crate::switch::{render, CommandSet, Interface, LacpMode, MlagConfig, Switch};

static COMMANDS: CommandSet = CommandSet {
    config: "cli enable \"configure terminal\" \"{}\"",
    show: "cli enable \"{}\"",
    sep: "\" \"",
    show_vlans: "show vlan",
    create_vlan: "vlan {}",
    delete_vlan: "no vlan {}",
    show_ports: "show interfaces switchport",
    show_mac_table: "show mac-address-table",
    clear_mac_table: "clear mac-address-table dynamic",
    interface: "interface ethernet {}",
    port_channel: "interface port-channel {}",
    no_port_channel: "no interface port-channel {}",
    mlag_channel: Some("interface mlag-port-channel {}"),
    no_mlag_channel: Some("no interface mlag-port-channel {}"),
    switchport_mode: "switchport mode {}",
    access_vlan: "switchport access vlan {}",
    native_vlan: "switchport access vlan {}",
    allowed_vlans: "switchport trunk allowed-vlan {} {}",
    channel_group: "channel-group {} mode {}",
    no_channel_group: "no channel-group",
    mlag_channel_group: Some("mlag-channel-group {} mode {}"),
    no_mlag_channel_group: Some("no mlag-channel-group"),
    set_mtu: "mtu {} force",
    no_mtu: "no mtu force",
    shutdown: "shutdown",
    no_shutdown: "no shutdown",
    show_channels: "show interfaces port-channel summary",
    show_mlag_channels: Some("show interfaces mlag-port-channel summary"),
    enable_lacp: "lacp",
    channel_label: "Po{}",
    mlag_label: "Mpo{}",
};

fn mlag_enabled_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)admin status:\s*enabled").expect("valid mlag regex"))
}

pub struct Mellanox {
    session: SwitchSession,
}

impl Mellanox {
    pub fn new(session: SwitchSession) -> Self {
        Self { session }
    }

    fn boxed(session: SwitchSession) -> Box<dyn Switch> {
        Box::new(Self::new(session))
    }
}

impl Switch for Mellanox {
    fn class(&self) -> &'static str {
        "mellanox"
    }

    fn session(&self) -> &SwitchSession {
        &self.session
    }

    fn commands(&self) -> &'static CommandSet {
        &COMMANDS
    }

    fn is_mlag_configured(&self) -> Result<bool> {
        Ok(mlag_enabled_regex().is_match(&self.send_show("show mlag")?))
    }

    fn configure_mlag(&self, config: &MlagConfig) -> Result<()> {
        let ipl = config.ipl_channel;
        let vlan = config.vlan;
        let mut lines = vec![
            "lacp".to_string(),
            "protocol mlag".to_string(),
            "ip routing".to_string(),
            format!("vlan {vlan}"),
            format!("interface port-channel {ipl}"),
        ];
        for port in &config.ipl_ports {
            lines.push(self.interface_line(Interface::Port(port))?);
            lines.push(render(
                COMMANDS.channel_group,
                &[&ipl, &LacpMode::Active.as_str()],
            ));
        }
        lines.extend([
            format!("interface port-channel {ipl} ipl 1"),
            format!("interface port-channel {ipl} dcb priority-flow-control mode on force"),
            format!("interface vlan {vlan}"),
            format!("interface vlan {vlan} ip address {}", config.local_cidr),
            format!("interface vlan {vlan} ipl 1 peer-address {}", config.peer_ip),
        ]);
        if let Some(vip) = &config.vip {
            lines.push(format!(
                "mlag-vip {} ip {} /{} force",
                vip.domain, vip.address, vip.prefix
            ));
        }
        lines.push("no mlag shutdown".to_string());
        self.send_config(&lines)?;
        info!(switch = self.label(), ipl, vlan, "mlag configured");
        Ok(())
    }

    fn deconfigure_mlag(&self, config: &MlagConfig) -> Result<()> {
        let ipl = config.ipl_channel;
        let vlan = config.vlan;
        let mut lines = vec!["mlag shutdown".to_string()];
        if config.vip.is_some() {
            lines.push("no mlag-vip".to_string());
        }
        lines.extend([
            format!("interface vlan {vlan} no ipl 1 peer-address"),
            format!("no interface vlan {vlan}"),
            format!("interface port-channel {ipl} no ipl 1"),
        ]);
        for port in &config.ipl_ports {
            lines.push(self.interface_line(Interface::Port(port))?);
            lines.push(COMMANDS.no_channel_group.to_string());
        }
        lines.extend([
            format!("no interface port-channel {ipl}"),
            format!("no vlan {vlan}"),
            "no protocol mlag".to_string(),
        ]);
        self.send_config(&lines)?;
        info!(switch = self.label(), ipl, vlan, "mlag deconfigured");
        Ok(())
    }
}

inventory::submit! {
    SwitchClass {
        name: "mellanox",
        aliases: &["onyx", "mlnx-os"],
        build: Mellanox::boxed,
    }
}
