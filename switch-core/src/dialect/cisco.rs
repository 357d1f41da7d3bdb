//! Cisco NX-OS.

use std::collections::BTreeMap;

use super::SwitchClass;
use crate::parse::{parse_switchport_blocks, PortState};
use crate::session::SwitchSession;
use crate::switch::{CommandSet, Switch};

static COMMANDS: CommandSet = CommandSet {
    config: "configure terminal ; {}",
    show: "{}",
    sep: " ; ",
    show_vlans: "show vlan brief",
    create_vlan: "vlan {}",
    delete_vlan: "no vlan {}",
    show_ports: "show interface switchport",
    show_mac_table: "show mac address-table",
    clear_mac_table: "clear mac address-table dynamic",
    interface: "interface Ethernet{}",
    port_channel: "interface port-channel {}",
    no_port_channel: "no interface port-channel {}",
    mlag_channel: None,
    no_mlag_channel: None,
    switchport_mode: "switchport mode {}",
    access_vlan: "switchport access vlan {}",
    native_vlan: "switchport trunk native vlan {}",
    allowed_vlans: "switchport trunk allowed vlan {} {}",
    channel_group: "channel-group {} mode {}",
    no_channel_group: "no channel-group",
    mlag_channel_group: None,
    no_mlag_channel_group: None,
    set_mtu: "mtu {}",
    no_mtu: "no mtu",
    shutdown: "shutdown",
    no_shutdown: "no shutdown",
    show_channels: "show port-channel summary",
    show_mlag_channels: None,
    enable_lacp: "feature lacp",
    channel_label: "Po{}",
    mlag_label: "Po{}",
};

pub struct Cisco {
    session: SwitchSession,
}

impl Cisco {
    pub fn new(session: SwitchSession) -> Self {
        Self { session }
    }

    fn boxed(session: SwitchSession) -> Box<dyn Switch> {
        Box::new(Self::new(session))
    }
}

impl Switch for Cisco {
    fn class(&self) -> &'static str {
        "cisco"
    }

    fn session(&self) -> &SwitchSession {
        &self.session
    }

    fn commands(&self) -> &'static CommandSet {
        &COMMANDS
    }

    fn parse_ports(&self, raw: &str) -> BTreeMap<String, PortState> {
        parse_switchport_blocks(raw)
    }
}

inventory::submit! {
    SwitchClass {
        name: "cisco",
        aliases: &["nxos", "nx-os"],
        build: Cisco::boxed,
    }
}
