//! Applying the aggregated topology to the switches, and hardware
//! validation.
//!
//! Each switch is configured on its own thread. A failed step is recorded in
//! that switch's [`SwitchOutcome`] and the remaining steps still run; one
//! misbehaving switch never stops the others.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use serde::de::DeserializeOwned;
use serde::Serialize;
use switch_core::{AllowOp, LacpMode, PortMode, Switch, VlanSet};
use tracing::{error, info, warn};

use crate::bmc::resolver::candidates_from;
use crate::bmc::{BmcClient, BmcCredentialResolver, Resolution, ResolverSettings};
use crate::catalog::SwitchCatalog;
use crate::config::{ClusterConfig, NetworkKind, PortRef};
use crate::discovery::{
    BmcAccess, DiscoveryEngine, DiscoveryOutcome, DiscoverySettings, DiscoveryTable,
};
use crate::error::{ClusterError, Result};
use crate::exec::CommandRunner;
use crate::operator::Operator;
use crate::topology::{ChannelGroup, Topology, TopologyAggregator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchOutcome {
    pub switch: String,
    pub steps: usize,
    pub failures: Vec<StepFailure>,
}

impl SwitchOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub action: &'static str,
    pub switches: Vec<SwitchOutcome>,
}

impl ProvisionReport {
    pub fn failures(&self) -> usize {
        self.switches.iter().map(|s| s.failures.len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures() == 0
    }
}

/// Runs steps against one switch and keeps score.
struct Steps<'s> {
    switch: &'s dyn Switch,
    outcome: SwitchOutcome,
}

impl<'s> Steps<'s> {
    fn new(switch: &'s dyn Switch) -> Self {
        Self {
            switch,
            outcome: SwitchOutcome {
                switch: switch.label().to_string(),
                steps: 0,
                failures: Vec::new(),
            },
        }
    }

    fn run(
        &mut self,
        step: impl Into<String>,
        op: impl FnOnce(&dyn Switch) -> switch_core::Result<()>,
    ) {
        let step = step.into();
        self.outcome.steps += 1;
        if let Err(err) = op(self.switch) {
            error!(switch = %self.outcome.switch, %step, %err, "step failed");
            self.outcome.failures.push(StepFailure {
                step,
                error: err.to_string(),
            });
        }
    }

    /// Failures of best-effort steps are only logged.
    fn try_run(&mut self, step: &str, op: impl FnOnce(&dyn Switch) -> switch_core::Result<()>) {
        if let Err(err) = op(self.switch) {
            warn!(switch = %self.outcome.switch, step, %err, "best-effort step failed");
        }
    }

    fn finish(self) -> SwitchOutcome {
        self.outcome
    }
}

fn port_names(ports: &[PortRef]) -> Vec<String> {
    ports.iter().map(|p| p.as_str().to_string()).collect()
}

/// Verified BMC access saved by an earlier validation run.
pub fn bmc_access_path(config: &ClusterConfig) -> PathBuf {
    config.deployer.state_dir.join("bmc-access.json")
}

/// Where each BMC was found on the IPMI network, saved by the last IPMI scan.
pub fn ipmi_table_path(config: &ClusterConfig) -> PathBuf {
    config.deployer.state_dir.join("ipmi-nodes.json")
}

fn read_state<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(err) => {
            return Err(ClusterError::UserVisible(format!(
                "failed to read {}: {err}",
                path.display()
            )))
        }
    };
    serde_json::from_str(&raw).map_err(|err| {
        ClusterError::UserVisible(format!("failed to parse {}: {err}", path.display()))
    })
}

fn write_state<T: Serialize>(path: &Path, state: &T) -> Result<()> {
    let write = || -> std::result::Result<(), String> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| e.to_string())?;
        }
        let raw = serde_json::to_string_pretty(state).map_err(|e| e.to_string())?;
        fs::write(path, raw).map_err(|e| e.to_string())
    };
    write().map_err(|err| {
        ClusterError::UserVisible(format!("failed to write {}: {err}", path.display()))
    })
}

pub fn load_bmc_access(path: &Path) -> Result<BmcAccess> {
    read_state(path)
}

pub fn save_bmc_access(path: &Path, access: &BmcAccess) -> Result<()> {
    write_state(path, access)
}

/// A missing file is an empty table: no node has a known BMC.
pub fn load_ipmi_table(path: &Path) -> Result<DiscoveryTable> {
    read_state(path)
}

pub fn save_ipmi_table(path: &Path, table: &DiscoveryTable) -> Result<()> {
    write_state(path, table)
}

/// Result of [`ClusterProvisioner::validate_hardware`].
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Switches that did not answer ping.
    pub unreachable: Vec<String>,
    pub ipmi: DiscoveryOutcome,
    pub verified_bmcs: BTreeMap<Ipv4Addr, String>,
    pub unverified_bmcs: Vec<Ipv4Addr>,
    pub pxe: Option<DiscoveryOutcome>,
}

pub struct ClusterProvisioner<'a> {
    config: &'a ClusterConfig,
    catalog: &'a SwitchCatalog,
    topology: Topology,
}

impl<'a> ClusterProvisioner<'a> {
    pub fn new(config: &'a ClusterConfig, catalog: &'a SwitchCatalog) -> Result<Self> {
        let topology = TopologyAggregator::new(config).aggregate()?;
        Ok(Self {
            config,
            catalog,
            topology,
        })
    }

    /// Run `apply` on each switch concurrently.
    fn per_switch<'s>(
        &self,
        action: &'static str,
        switches: impl Iterator<Item = &'s dyn Switch>,
        apply: impl Fn(&mut Steps<'s>) + Sync,
    ) -> ProvisionReport {
        let apply = &apply;
        let switches = thread::scope(|scope| {
            let handles: Vec<_> = switches
                .map(|switch| {
                    let label = switch.label().to_string();
                    let handle = scope.spawn(move || {
                        let mut steps = Steps::new(switch);
                        apply(&mut steps);
                        steps.finish()
                    });
                    (label, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(label, handle)| {
                    handle.join().unwrap_or_else(|_| SwitchOutcome {
                        switch: label,
                        steps: 0,
                        failures: vec![StepFailure {
                            step: action.to_string(),
                            error: "worker panicked".to_string(),
                        }],
                    })
                })
                .collect()
        });
        ProvisionReport { action, switches }
    }

    /// MLAG first, then VLANs, trunk ports, MTUs and finally channel groups.
    pub fn configure_data_switches(&self) -> ProvisionReport {
        self.per_switch("configure data switches", self.catalog.data(), |steps| {
            self.configure_data_switch(steps)
        })
    }

    fn configure_data_switch(&self, steps: &mut Steps<'_>) {
        let label = steps.switch.label().to_string();
        let topo = &self.topology;

        if let Some(mlag) = topo.mlag_pair(&label).and_then(|p| p.config_for(&label)) {
            match steps.switch.is_mlag_configured() {
                Ok(true) => info!(switch = %label, "mlag already configured"),
                _ => steps.run("configure mlag", |sw| sw.configure_mlag(&mlag)),
            }
        }

        let by_port = topo.vlans.get(&label).cloned().unwrap_or_default();
        let all_vlans: BTreeSet<u16> = by_port.values().flatten().copied().collect();
        for vlan in &all_vlans {
            steps.run(format!("create vlan {vlan}"), |sw| sw.create_vlan(*vlan));
        }

        let bonded = topo.bonded_ports(&label);
        for (port, vlans) in by_port.iter().filter(|(p, _)| !bonded.contains(*p)) {
            let set = VlanSet::from_ids(vlans.iter().copied());
            let name = port.as_str();
            steps.run(format!("trunk port {port}"), |sw| {
                sw.set_switchport_mode(name, PortMode::Trunk, None)?;
                sw.allowed_vlans_on_port(name, AllowOp::None, &VlanSet::default())?;
                sw.allowed_vlans_on_port(name, AllowOp::Add, &set)
            });
        }

        if let Some(mtus) = topo.mtus.get(&label) {
            for (port, mtu) in mtus.iter().filter(|(p, _)| !bonded.contains(*p)) {
                steps.run(format!("mtu {mtu} on port {port}"), |sw| {
                    sw.set_mtu_for_port(port.as_str(), *mtu)
                });
            }
        }

        let groups: Vec<&ChannelGroup> = topo.groups_on(&label).collect();
        if !groups.is_empty() {
            steps.run("enable lacp", |sw| sw.enable_lacp());
        }
        for group in groups {
            self.configure_channel_group(steps, &label, group);
        }
    }

    fn configure_channel_group(&self, steps: &mut Steps<'_>, label: &str, group: &ChannelGroup) {
        let mlag = group.is_mlag();
        for port_group in group.port_groups() {
            let ports = port_group.ports_on(label);
            if ports.is_empty() {
                continue;
            }
            let ch = port_group.channel;
            let names = port_names(ports);
            let vlans = VlanSet::from_ids(self.topology.vlans_for(label, ports));
            let mtu = self.topology.mtu_for(label, ports);

            if mlag {
                steps.try_run("remove mlag channel", |sw| sw.remove_mlag_interface(ch));
                steps.run(format!("mlag-port-channel {ch}"), |sw| {
                    sw.create_mlag_interface(ch)?;
                    sw.set_mlag_channel_mode(ch, PortMode::Trunk, None)?;
                    sw.allowed_vlans_on_mlag_channel(ch, AllowOp::None, &VlanSet::default())?;
                    if !vlans.is_empty() {
                        sw.allowed_vlans_on_mlag_channel(ch, AllowOp::Add, &vlans)?;
                    }
                    if let Some(mtu) = mtu {
                        sw.set_mtu_for_mlag_channel(ch, mtu)?;
                    }
                    sw.bind_ports_to_mlag_channel(&names, ch, LacpMode::Active)
                });
            } else {
                steps.try_run("remove port channel", |sw| sw.remove_port_channel_interface(ch));
                steps.run(format!("port-channel {ch}"), |sw| {
                    sw.create_port_channel_interface(ch)?;
                    sw.set_port_channel_mode(ch, PortMode::Trunk, None)?;
                    sw.allowed_vlans_on_port_channel(ch, AllowOp::None, &VlanSet::default())?;
                    if !vlans.is_empty() {
                        sw.allowed_vlans_on_port_channel(ch, AllowOp::Add, &vlans)?;
                    }
                    if let Some(mtu) = mtu {
                        sw.set_mtu_for_port_channel(ch, mtu)?;
                    }
                    sw.bind_ports_to_channel(&names, ch, LacpMode::Active)
                });
            }
        }
    }

    /// Undo [`Self::configure_data_switches`]. MLAG is only torn down on
    /// switches the operator confirms.
    pub fn deconfigure_data_switches(
        &self,
        operator: &mut dyn Operator,
    ) -> Result<ProvisionReport> {
        let mut mlag_approved = BTreeSet::new();
        for switch in self.catalog.data() {
            let label = switch.label();
            if self.topology.mlag_pair(label).is_none() {
                continue;
            }
            if operator.confirm(&format!("Deconfigure MLAG on {label}?"))? {
                mlag_approved.insert(label.to_string());
            } else {
                info!(switch = label, "leaving mlag in place");
            }
        }

        Ok(self.per_switch("deconfigure data switches", self.catalog.data(), |steps| {
            self.deconfigure_data_switch(steps, &mlag_approved)
        }))
    }

    fn deconfigure_data_switch(&self, steps: &mut Steps<'_>, mlag_approved: &BTreeSet<String>) {
        let label = steps.switch.label().to_string();
        let topo = &self.topology;

        for group in topo.groups_on(&label) {
            let mlag = group.is_mlag();
            for port_group in group.port_groups() {
                let ports = port_group.ports_on(&label);
                if ports.is_empty() {
                    continue;
                }
                let ch = port_group.channel;
                let names = port_names(ports);
                if mlag {
                    steps.run(format!("remove mlag-port-channel {ch}"), |sw| {
                        sw.remove_ports_from_mlag_channel(&names)?;
                        sw.remove_mlag_interface(ch)
                    });
                } else {
                    steps.run(format!("remove port-channel {ch}"), |sw| {
                        sw.remove_ports_from_channel(&names)?;
                        sw.remove_port_channel_interface(ch)
                    });
                }
            }
        }

        let bonded = topo.bonded_ports(&label);
        let by_port = topo.vlans.get(&label).cloned().unwrap_or_default();
        for port in by_port.keys().filter(|p| !bonded.contains(*p)) {
            steps.run(format!("clear port {port}"), |sw| {
                sw.allowed_vlans_on_port(port.as_str(), AllowOp::None, &VlanSet::default())
            });
        }
        if let Some(mtus) = topo.mtus.get(&label) {
            for port in mtus.keys().filter(|p| !bonded.contains(*p)) {
                steps.run(format!("default mtu on port {port}"), |sw| {
                    sw.set_mtu_for_port(port.as_str(), 0)
                });
            }
        }

        let all_vlans: BTreeSet<u16> = by_port.values().flatten().copied().collect();
        for vlan in all_vlans {
            steps.run(format!("delete vlan {vlan}"), |sw| sw.delete_vlan(vlan));
        }

        if mlag_approved.contains(&label) {
            if let Some(mlag) = topo.mlag_pair(&label).and_then(|p| p.config_for(&label)) {
                steps.run("deconfigure mlag", |sw| sw.deconfigure_mlag(&mlag));
            }
        }
    }

    /// Put the IPMI and PXE ports of each management switch in access mode
    /// on their client-network VLAN.
    pub fn configure_mgmt_switches(&self) -> ProvisionReport {
        let aggregator = TopologyAggregator::new(self.config);
        let plans: Vec<(u16, BTreeMap<String, Vec<PortRef>>)> =
            [NetworkKind::Ipmi, NetworkKind::Pxe]
                .into_iter()
                .filter_map(|kind| {
                    let network = self.config.client_network(kind)?;
                    Some((network.vlan, aggregator.network_ports(kind)))
                })
                .collect();

        self.per_switch("configure mgmt switches", self.catalog.mgmt(), |steps| {
            let label = steps.switch.label().to_string();
            for (vlan, ports) in &plans {
                let Some(ports) = ports.get(&label) else {
                    continue;
                };
                let vlan = *vlan;
                steps.run(format!("create vlan {vlan}"), |sw| sw.create_vlan(vlan));
                for port in ports {
                    steps.run(format!("access vlan {vlan} on port {port}"), |sw| {
                        sw.set_switchport_mode(port.as_str(), PortMode::Access, Some(vlan))
                    });
                }
            }
        })
    }

    /// Check switch reachability, discover BMCs, verify their credentials
    /// and watch the nodes PXE boot.
    pub fn validate_hardware(
        &self,
        operator: &mut dyn Operator,
        runner: Arc<dyn CommandRunner>,
        bmc: &dyn BmcClient,
        discovery: DiscoverySettings,
        resolver: ResolverSettings,
    ) -> Result<ValidationReport> {
        let unreachable: Vec<String> = self
            .catalog
            .mgmt()
            .chain(self.catalog.data())
            .filter(|sw| sw.is_pingable() == Some(false))
            .map(|sw| sw.label().to_string())
            .collect();
        for label in &unreachable {
            warn!("{}", ClusterError::UserVisible(format!("switch {label} does not answer ping")));
        }

        let access_path = bmc_access_path(self.config);
        let stale = load_bmc_access(&access_path)?;
        let engine = DiscoveryEngine::new(self.config, self.catalog, runner, bmc, discovery);
        let ipmi = engine.discover_ipmi(operator, &stale)?;
        save_ipmi_table(&ipmi_table_path(self.config), &ipmi.table)?;

        let ips: Vec<Ipv4Addr> = ipmi.table.nodes().filter_map(|n| n.ip).collect();
        let resolution: Resolution = BmcCredentialResolver::new(bmc, resolver)
            .resolve(&ips, candidates_from(self.config))?;
        if !resolution.is_complete() {
            warn!(shortfall = resolution.shortfall(), "proceeding with partial bmc access");
        }
        save_bmc_access(&access_path, &resolution.access)?;

        let pxe = if self.config.client_network(NetworkKind::Pxe).is_some() {
            Some(engine.discover_pxe(operator, &ipmi.table, &resolution.access)?)
        } else {
            info!("no pxe network configured; skipping pxe validation");
            None
        };

        Ok(ValidationReport {
            unreachable,
            verified_bmcs: resolution
                .access
                .iter()
                .map(|(ip, creds)| (*ip, creds.userid.clone()))
                .collect(),
            unverified_bmcs: resolution.unresolved,
            ipmi,
            pxe,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::{load_bmc_access, save_bmc_access};
    use crate::config::BmcCredentials;
    use crate::discovery::BmcAccess;

    #[test]
    fn bmc_access_survives_a_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state").join("bmc-access.json");
        assert!(load_bmc_access(&path).expect("missing is empty").is_empty());

        let mut access = BmcAccess::new();
        access.insert(
            Ipv4Addr::new(192, 168, 10, 4),
            BmcCredentials {
                userid: "admin".to_string(),
                password: "pw".to_string(),
                bmc_type: "openbmc".to_string(),
            },
        );
        save_bmc_access(&path, &access).expect("save");
        assert_eq!(load_bmc_access(&path).expect("load"), access);
    }
}
