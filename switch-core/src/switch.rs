//! The vendor-neutral switch interface.
//!
//! A dialect supplies its [`CommandSet`] (command templates) and may
//! override the output parsers; every operation below is implemented once in
//! terms of those. Mutating operations read the device back afterwards and
//! fail with [`SwitchError::Config`] when the change did not take, except
//! where noted. Passive sessions never verify.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::net::Ipv4Addr;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SwitchError};
use crate::parse::{
    parse_channel_summary, parse_mac_table, parse_switchport_table, parse_vlan_ids, PortState,
};
use crate::port::{canonical_port, slot_port};
use crate::session::SwitchSession;
use crate::vlan::VlanSet;

/// Switchport mode of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    Access,
    Trunk,
    Hybrid,
}

impl PortMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PortMode::Access => "access",
            PortMode::Trunk => "trunk",
            PortMode::Hybrid => "hybrid",
        }
    }
}

impl Display for PortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation applied to a trunk's allowed-VLAN list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowOp {
    Add,
    Remove,
    None,
    All,
    Except,
}

impl AllowOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AllowOp::Add => "add",
            AllowOp::Remove => "remove",
            AllowOp::None => "none",
            AllowOp::All => "all",
            AllowOp::Except => "except",
        }
    }
}

impl Display for AllowOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LACP negotiation mode for channel members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LacpMode {
    #[default]
    Active,
    Passive,
    On,
}

impl LacpMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LacpMode::Active => "active",
            LacpMode::Passive => "passive",
            LacpMode::On => "on",
        }
    }
}

/// Output shape for [`Switch::show_mac_address_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacFormat {
    /// MACs as the switch printed them.
    Raw,
    /// MACs as colon-delimited uppercase hex pairs.
    Std,
}

/// A switch interface that configuration commands can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface<'a> {
    Port(&'a str),
    Channel(u32),
    MlagChannel(u32),
}

impl Display for Interface<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interface::Port(port) => write!(f, "port {port}"),
            Interface::Channel(n) => write!(f, "port-channel {n}"),
            Interface::MlagChannel(n) => write!(f, "mlag-port-channel {n}"),
        }
    }
}

/// Virtual IP shared by an MLAG pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlagVip {
    pub domain: String,
    pub address: Ipv4Addr,
    pub prefix: u8,
}

/// Inter-peer link parameters for one side of an MLAG pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlagConfig {
    pub vlan: u16,
    pub ipl_channel: u32,
    pub ipl_ports: Vec<String>,
    /// This side's address on the peer VLAN, `a.b.c.d/len`.
    pub local_cidr: String,
    pub peer_ip: Ipv4Addr,
    pub vip: Option<MlagVip>,
}

/// Command templates of one vendor dialect. `{}` placeholders are filled
/// positionally by [`render`].
#[derive(Debug)]
pub struct CommandSet {
    /// Wraps a configuration sequence already joined with `sep`.
    pub config: &'static str,
    /// Wraps a single exec-mode command.
    pub show: &'static str,
    pub sep: &'static str,
    pub show_vlans: &'static str,
    pub create_vlan: &'static str,
    pub delete_vlan: &'static str,
    pub show_ports: &'static str,
    pub show_mac_table: &'static str,
    pub clear_mac_table: &'static str,
    pub interface: &'static str,
    pub port_channel: &'static str,
    pub no_port_channel: &'static str,
    pub mlag_channel: Option<&'static str>,
    pub no_mlag_channel: Option<&'static str>,
    pub switchport_mode: &'static str,
    pub access_vlan: &'static str,
    pub native_vlan: &'static str,
    pub allowed_vlans: &'static str,
    pub channel_group: &'static str,
    pub no_channel_group: &'static str,
    pub mlag_channel_group: Option<&'static str>,
    pub no_mlag_channel_group: Option<&'static str>,
    pub set_mtu: &'static str,
    pub no_mtu: &'static str,
    pub shutdown: &'static str,
    pub no_shutdown: &'static str,
    pub show_channels: &'static str,
    pub show_mlag_channels: Option<&'static str>,
    pub enable_lacp: &'static str,
    /// Name of a port-channel in switchport output, e.g. `Po{}`.
    pub channel_label: &'static str,
    pub mlag_label: &'static str,
}

/// Fill `{}` placeholders in order.
pub fn render(template: &str, args: &[&dyn Display]) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut args = args.iter();
    let mut rest = template;
    while let Some(idx) = rest.find("{}") {
        out.push_str(&rest[..idx]);
        if let Some(arg) = args.next() {
            out.push_str(&arg.to_string());
        }
        rest = &rest[idx + 2..];
    }
    out.push_str(rest);
    out.trim_end().to_string()
}

/// Port -> MAC listing in the requested [`MacFormat`].
pub type MacTable = BTreeMap<String, Vec<String>>;

/// Operations every managed switch supports.
pub trait Switch: Send + Sync {
    /// Class string the dialect is registered under.
    fn class(&self) -> &'static str;

    fn session(&self) -> &SwitchSession;

    fn commands(&self) -> &'static CommandSet;

    /// Parse the output of `show_ports`.
    fn parse_ports(&self, raw: &str) -> BTreeMap<String, PortState> {
        parse_switchport_table(raw)
    }

    /// Whether MLAG is currently enabled on the device.
    fn is_mlag_configured(&self) -> Result<bool> {
        Err(self.unsupported("MLAG"))
    }

    fn configure_mlag(&self, _config: &MlagConfig) -> Result<()> {
        Err(self.unsupported("MLAG"))
    }

    fn deconfigure_mlag(&self, _config: &MlagConfig) -> Result<()> {
        Err(self.unsupported("MLAG"))
    }

    fn label(&self) -> &str {
        self.session().label()
    }

    fn unsupported(&self, operation: &'static str) -> SwitchError {
        SwitchError::Unsupported {
            class: self.class(),
            operation,
        }
    }

    /// Wrap a configuration sequence into one dialect command string.
    fn config_command(&self, lines: &[String]) -> String {
        let cmds = self.commands();
        render(cmds.config, &[&lines.join(cmds.sep)])
    }

    /// Send one configuration sequence.
    fn send_config(&self, lines: &[String]) -> Result<String> {
        self.session().send(&self.config_command(lines))
    }

    /// Send several configuration sequences under one lock acquisition.
    fn send_config_batch(&self, sequences: &[Vec<String>]) -> Result<Vec<String>> {
        let wrapped: Vec<String> = sequences.iter().map(|s| self.config_command(s)).collect();
        self.session().send_batch(&wrapped)
    }

    fn send_show(&self, command: &str) -> Result<String> {
        self.session().send(&render(self.commands().show, &[&command]))
    }

    /// Configuration-mode line selecting `target`.
    fn interface_line(&self, target: Interface<'_>) -> Result<String> {
        let cmds = self.commands();
        Ok(match target {
            Interface::Port(port) => render(cmds.interface, &[&slot_port(port)]),
            Interface::Channel(n) => render(cmds.port_channel, &[&n]),
            Interface::MlagChannel(n) => {
                let template = cmds.mlag_channel.ok_or_else(|| self.unsupported("MLAG"))?;
                render(template, &[&n])
            }
        })
    }

    /// Key of `target` in parsed switchport output.
    fn state_key(&self, target: Interface<'_>) -> String {
        let cmds = self.commands();
        match target {
            Interface::Port(port) => canonical_port(port),
            Interface::Channel(n) => render(cmds.channel_label, &[&n]),
            Interface::MlagChannel(n) => render(cmds.mlag_label, &[&n]),
        }
    }

    fn enable_lacp(&self) -> Result<()> {
        self.send_config(&[self.commands().enable_lacp.to_string()])?;
        Ok(())
    }

    fn show_vlans(&self) -> Result<String> {
        self.send_show(self.commands().show_vlans)
    }

    /// `None` when the session cannot read device state.
    fn is_vlan_created(&self, vlan: u16) -> Result<Option<bool>> {
        if !self.session().verifies() {
            return Ok(None);
        }
        Ok(Some(parse_vlan_ids(&self.show_vlans()?).contains(&vlan)))
    }

    fn vlan_ids(&self) -> Result<BTreeSet<u16>> {
        Ok(parse_vlan_ids(&self.show_vlans()?))
    }

    fn create_vlan(&self, vlan: u16) -> Result<()> {
        self.send_config(&[render(self.commands().create_vlan, &[&vlan])])?;
        match self.is_vlan_created(vlan)? {
            Some(false) => Err(SwitchError::config(
                self.label(),
                format!("failed creating vlan {vlan}"),
            )),
            _ => {
                debug!(switch = self.label(), vlan, "vlan created");
                Ok(())
            }
        }
    }

    fn delete_vlan(&self, vlan: u16) -> Result<()> {
        self.send_config(&[render(self.commands().delete_vlan, &[&vlan])])?;
        if self.is_vlan_created(vlan)? == Some(true) {
            warn!(switch = self.label(), vlan, "vlan still present after delete");
            return Err(SwitchError::config(
                self.label(),
                format!("failed deleting vlan {vlan}"),
            ));
        }
        info!(switch = self.label(), vlan, "vlan deleted");
        Ok(())
    }

    /// Parsed switchport state, or `None` when the session cannot read it.
    fn show_ports(&self) -> Result<Option<BTreeMap<String, PortState>>> {
        if !self.session().verifies() {
            return Ok(None);
        }
        let raw = self.send_show(self.commands().show_ports)?;
        Ok(Some(self.parse_ports(&raw)))
    }

    /// Set trunk/access/hybrid mode on `target`, optionally with its
    /// native (trunk) or access VLAN.
    fn set_mode(&self, target: Interface<'_>, mode: PortMode, vlan: Option<u16>) -> Result<()> {
        let cmds = self.commands();
        let mut lines = vec![
            self.interface_line(target)?,
            render(cmds.switchport_mode, &[&mode]),
        ];
        if let Some(vlan) = vlan {
            let template = match mode {
                PortMode::Trunk => cmds.native_vlan,
                PortMode::Access | PortMode::Hybrid => cmds.access_vlan,
            };
            lines.push(render(template, &[&vlan]));
        }
        self.send_config(&lines)?;

        let Some(ports) = self.show_ports()? else {
            return Ok(());
        };
        let key = self.state_key(target);
        let Some(state) = ports.get(&key) else {
            warn!(
                switch = self.label(),
                %target,
                "unable to verify switchport mode; interface may already be in a channel group"
            );
            return Ok(());
        };
        if state.mode != mode.as_str() {
            return Err(SwitchError::config(
                self.label(),
                format!("failed setting {target} to {mode} mode (reads {})", state.mode),
            ));
        }
        // Table-style trunk rows print no native VLAN.
        let reports_vlan = mode != PortMode::Trunk || state.native_vlan.is_some();
        if let Some(vlan) = vlan.filter(|_| reports_vlan) {
            if state.native_vlan != Some(vlan) {
                return Err(SwitchError::config(
                    self.label(),
                    format!("failed setting vlan {vlan} on {target}"),
                ));
            }
        }
        debug!(switch = self.label(), %target, %mode, "switchport mode set");
        Ok(())
    }

    fn set_switchport_mode(&self, port: &str, mode: PortMode, vlan: Option<u16>) -> Result<()> {
        self.set_mode(Interface::Port(port), mode, vlan)
    }

    fn set_port_channel_mode(&self, channel: u32, mode: PortMode, vlan: Option<u16>) -> Result<()> {
        self.set_mode(Interface::Channel(channel), mode, vlan)
    }

    fn set_mlag_channel_mode(&self, channel: u32, mode: PortMode, vlan: Option<u16>) -> Result<()> {
        self.set_mode(Interface::MlagChannel(channel), mode, vlan)
    }

    fn is_port_in_trunk_mode(&self, port: &str) -> Result<Option<bool>> {
        self.port_mode_is(port, PortMode::Trunk)
    }

    fn is_port_in_access_mode(&self, port: &str) -> Result<Option<bool>> {
        self.port_mode_is(port, PortMode::Access)
    }

    fn port_mode_is(&self, port: &str, mode: PortMode) -> Result<Option<bool>> {
        Ok(self
            .show_ports()?
            .and_then(|ports| ports.get(&canonical_port(port)).cloned())
            .map(|state| state.mode == mode.as_str()))
    }

    /// Whether every VLAN in `vlans` is allowed on `target`. `None` when it
    /// cannot be determined (passive session, or the interface is not listed
    /// on its own).
    fn is_vlan_allowed(&self, vlans: &VlanSet, target: Interface<'_>) -> Result<Option<bool>> {
        let Some(ports) = self.show_ports()? else {
            return Ok(None);
        };
        match ports.get(&self.state_key(target)) {
            Some(state) => Ok(Some(state.allowed_vlans.contains_all(vlans))),
            None => {
                debug!(
                    switch = self.label(),
                    %target,
                    "unable to verify allowed vlans; interface may already be in a channel group"
                );
                Ok(None)
            }
        }
    }

    fn is_vlan_allowed_for_port(&self, vlans: &VlanSet, port: &str) -> Result<Option<bool>> {
        self.is_vlan_allowed(vlans, Interface::Port(port))
    }

    /// Mutate the trunk allowed-VLAN list of `target`. A change that does not
    /// read back is logged, not returned as an error.
    fn allow_vlans(&self, target: Interface<'_>, op: AllowOp, vlans: &VlanSet) -> Result<()> {
        let list = match op {
            AllowOp::None | AllowOp::All => String::new(),
            _ => vlans.to_string(),
        };
        self.send_config(&[
            self.interface_line(target)?,
            render(self.commands().allowed_vlans, &[&op, &list]),
        ])?;

        match op {
            AllowOp::Add => match self.is_vlan_allowed(vlans, target)? {
                Some(false) => error!(
                    switch = self.label(),
                    %target,
                    vlans = %list,
                    "not all vlans were added"
                ),
                Some(true) => debug!(switch = self.label(), %target, vlans = %list, "vlans added"),
                None => {}
            },
            AllowOp::Remove => {
                if let Some(ports) = self.show_ports()? {
                    match ports.get(&self.state_key(target)) {
                        Some(state) if !state.allowed_vlans.contains_none(vlans) => error!(
                            switch = self.label(),
                            %target,
                            vlans = %list,
                            "not all vlans were removed"
                        ),
                        Some(_) => {
                            debug!(switch = self.label(), %target, vlans = %list, "vlans removed")
                        }
                        None => {}
                    }
                }
            }
            AllowOp::None | AllowOp::All | AllowOp::Except => {}
        }
        Ok(())
    }

    fn allowed_vlans_on_port(&self, port: &str, op: AllowOp, vlans: &VlanSet) -> Result<()> {
        self.allow_vlans(Interface::Port(port), op, vlans)
    }

    fn allowed_vlans_on_port_channel(
        &self,
        channel: u32,
        op: AllowOp,
        vlans: &VlanSet,
    ) -> Result<()> {
        self.allow_vlans(Interface::Channel(channel), op, vlans)
    }

    fn allowed_vlans_on_mlag_channel(
        &self,
        channel: u32,
        op: AllowOp,
        vlans: &VlanSet,
    ) -> Result<()> {
        self.allow_vlans(Interface::MlagChannel(channel), op, vlans)
    }

    fn create_port_channel_interface(&self, channel: u32) -> Result<()> {
        self.send_config(&[self.interface_line(Interface::Channel(channel))?])?;
        Ok(())
    }

    fn remove_port_channel_interface(&self, channel: u32) -> Result<()> {
        self.send_config(&[render(self.commands().no_port_channel, &[&channel])])?;
        Ok(())
    }

    fn create_mlag_interface(&self, channel: u32) -> Result<()> {
        self.send_config(&[self.interface_line(Interface::MlagChannel(channel))?])?;
        Ok(())
    }

    fn remove_mlag_interface(&self, channel: u32) -> Result<()> {
        let template = self
            .commands()
            .no_mlag_channel
            .ok_or_else(|| self.unsupported("MLAG"))?;
        self.send_config(&[render(template, &[&channel])])?;
        Ok(())
    }

    /// Channel summary as `channel -> [member port]`.
    fn show_port_channels(&self) -> Result<BTreeMap<u32, Vec<String>>> {
        Ok(parse_channel_summary(
            &self.send_show(self.commands().show_channels)?,
        ))
    }

    fn show_mlag_port_channels(&self) -> Result<BTreeMap<u32, Vec<String>>> {
        let command = self
            .commands()
            .show_mlag_channels
            .ok_or_else(|| self.unsupported("MLAG"))?;
        Ok(parse_channel_summary(&self.send_show(command)?))
    }

    fn bind_ports_to_channel(&self, ports: &[String], channel: u32, lacp: LacpMode) -> Result<()> {
        let template = self.commands().channel_group;
        self.bind_ports(ports, channel, template, lacp)?;
        if self.session().verifies() {
            let summary = self.show_port_channels()?;
            self.verify_members(&summary, ports, channel)?;
        }
        Ok(())
    }

    fn bind_ports_to_mlag_channel(
        &self,
        ports: &[String],
        channel: u32,
        lacp: LacpMode,
    ) -> Result<()> {
        let template = self
            .commands()
            .mlag_channel_group
            .ok_or_else(|| self.unsupported("MLAG"))?;
        self.bind_ports(ports, channel, template, lacp)?;
        if self.session().verifies() {
            let summary = self.show_mlag_port_channels()?;
            self.verify_members(&summary, ports, channel)?;
        }
        Ok(())
    }

    fn bind_ports(
        &self,
        ports: &[String],
        channel: u32,
        template: &str,
        lacp: LacpMode,
    ) -> Result<()> {
        let mut lines = Vec::with_capacity(ports.len() * 2);
        for port in ports {
            lines.push(self.interface_line(Interface::Port(port))?);
            lines.push(render(template, &[&channel, &lacp.as_str()]));
        }
        self.send_config(&lines)?;
        Ok(())
    }

    fn verify_members(
        &self,
        summary: &BTreeMap<u32, Vec<String>>,
        ports: &[String],
        channel: u32,
    ) -> Result<()> {
        let bound = summary.get(&channel).cloned().unwrap_or_default();
        let missing: Vec<String> = ports
            .iter()
            .map(|p| canonical_port(p))
            .filter(|p| !bound.contains(p))
            .collect();
        for port in &missing {
            error!(switch = self.label(), port = %port, channel, "port not bound to channel");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SwitchError::config(
                self.label(),
                format!("ports {} not bound to channel {channel}", missing.join(",")),
            ))
        }
    }

    fn remove_ports_from_channel(&self, ports: &[String]) -> Result<()> {
        let no_group = self.commands().no_channel_group;
        self.unbind_ports(ports, no_group)
    }

    fn remove_ports_from_mlag_channel(&self, ports: &[String]) -> Result<()> {
        let no_group = self
            .commands()
            .no_mlag_channel_group
            .ok_or_else(|| self.unsupported("MLAG"))?;
        self.unbind_ports(ports, no_group)
    }

    fn unbind_ports(&self, ports: &[String], no_group: &str) -> Result<()> {
        let mut lines = Vec::with_capacity(ports.len() * 2);
        for port in ports {
            lines.push(self.interface_line(Interface::Port(port))?);
            lines.push(no_group.to_string());
        }
        self.send_config(&lines)?;
        Ok(())
    }

    /// Shut `target` down, set (or with `mtu == 0`, restore the default)
    /// MTU, and bring it back up. The three steps go out under one lock, but
    /// a failure after the first leaves the interface administratively down.
    fn set_mtu(&self, target: Interface<'_>, mtu: u32) -> Result<()> {
        let cmds = self.commands();
        let select = self.interface_line(target)?;
        let mtu_line = if mtu == 0 {
            cmds.no_mtu.to_string()
        } else {
            render(cmds.set_mtu, &[&mtu])
        };
        self.send_config_batch(&[
            vec![select.clone(), cmds.shutdown.to_string()],
            vec![select.clone(), mtu_line],
            vec![select, cmds.no_shutdown.to_string()],
        ])?;
        debug!(switch = self.label(), %target, mtu, "mtu applied");
        Ok(())
    }

    fn set_mtu_for_port(&self, port: &str, mtu: u32) -> Result<()> {
        self.set_mtu(Interface::Port(port), mtu)
    }

    fn set_mtu_for_port_channel(&self, channel: u32, mtu: u32) -> Result<()> {
        self.set_mtu(Interface::Channel(channel), mtu)
    }

    fn set_mtu_for_mlag_channel(&self, channel: u32, mtu: u32) -> Result<()> {
        self.set_mtu(Interface::MlagChannel(channel), mtu)
    }

    fn show_mac_address_table_text(&self) -> Result<String> {
        self.send_show(self.commands().show_mac_table)
    }

    fn show_mac_address_table(&self, format: MacFormat) -> Result<MacTable> {
        let raw = self.show_mac_address_table_text()?;
        Ok(parse_mac_table(&raw, format == MacFormat::Std))
    }

    fn clear_mac_address_table(&self) -> Result<()> {
        self.send_show(self.commands().clear_mac_table)?;
        Ok(())
    }

    /// `None` for passive switches, which are never contacted.
    fn is_pingable(&self) -> Option<bool> {
        if !self.session().verifies() {
            return None;
        }
        let output = Command::new("ping")
            .args(["-c2", "-i.5", self.session().host()])
            .output();
        match output {
            Ok(out) => Some(String::from_utf8_lossy(&out.stdout).contains(" 0% packet loss")),
            Err(err) => {
                debug!(switch = self.label(), %err, "failed to run ping");
                Some(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{render, AllowOp, PortMode};

    #[test]
    fn render_fills_placeholders_in_order() {
        assert_eq!(
            render("channel-group {} mode {}", &[&5, &"active"]),
            "channel-group 5 mode active"
        );
        assert_eq!(
            render("switchport trunk allowed-vlan {} {}", &[&AllowOp::None, &""]),
            "switchport trunk allowed-vlan none"
        );
        assert_eq!(render("switchport mode {}", &[&PortMode::Trunk]), "switchport mode trunk");
    }
}
