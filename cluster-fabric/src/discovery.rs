//! Finding unprovisioned nodes on the client networks.
//!
//! A scan round reads what the probe's DHCP server (IPMI) or packet capture
//! (PXE) has seen, then looks each candidate MAC up in the MAC tables of the
//! switches the nodes are cabled to. Only configured ports count. Rounds
//! repeat until every expected node is found or the operator decides.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switch_core::{MacFormat, MacTable};
use tracing::{debug, info, warn};

use crate::argv;
use crate::bmc::{BmcClient, BootDevice};
use crate::capture::read_pxe_requesters;
use crate::catalog::SwitchCatalog;
use crate::config::{BmcCredentials, ClientNetwork, ClusterConfig, NetworkKind, PortRef};
use crate::error::{ClusterError, Result};
use crate::exec::CommandRunner;
use crate::leases::read_leases;
use crate::netns::{dhcp_pool, DhcpPool, NamespaceProbe};
use crate::operator::{Operator, OperatorChoice};
use crate::topology::{NodeSlot, TopologyAggregator};

/// What to do after a scan round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanDecision {
    /// Scan again.
    Continue,
    /// Stop scanning and go on with the nodes found so far.
    ContinueWithSubset,
    /// Give up.
    Terminate,
}

/// Decide from progress alone. Complete scans proceed, incomplete ones keep
/// scanning while rounds remain, and exhausted scans proceed only if they
/// found something.
pub fn decide(current: usize, expected: usize, rounds_remaining: u32) -> ScanDecision {
    if current >= expected {
        ScanDecision::ContinueWithSubset
    } else if rounds_remaining > 0 {
        ScanDecision::Continue
    } else if current > 0 {
        ScanDecision::ContinueWithSubset
    } else {
        ScanDecision::Terminate
    }
}

/// Progress handed to the operator after a round that fell short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStatus {
    pub network: NetworkKind,
    pub found: usize,
    pub expected: usize,
    pub rounds: u32,
    pub remaining: u32,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} discovery: {} of {} found after {} round(s), {} left",
            self.network, self.found, self.expected, self.rounds, self.remaining
        )
    }
}

impl ScanStatus {
    pub fn timeout(&self) -> ClusterError {
        ClusterError::TimeoutExceeded {
            rounds: self.rounds,
            found: self.found,
            expected: self.expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredNode {
    pub switch: String,
    pub port: PortRef,
    pub mac: String,
    pub ip: Option<Ipv4Addr>,
}

/// Nodes found so far, per switch, in configured port order.
///
/// Entries are only ever added: once a (switch, port) pair is recorded it
/// stays as it is for the rest of the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryTable {
    ports: BTreeMap<String, Vec<PortRef>>,
    nodes: BTreeMap<String, BTreeMap<String, DiscoveredNode>>,
}

impl DiscoveryTable {
    /// A table accepting nodes on `ports` only.
    pub fn new(ports: BTreeMap<String, Vec<PortRef>>) -> Self {
        Self {
            ports,
            nodes: BTreeMap::new(),
        }
    }

    /// Record `node` unless its port is unknown or already taken.
    pub fn record(&mut self, node: DiscoveredNode) -> bool {
        let configured = self
            .ports
            .get(&node.switch)
            .is_some_and(|ports| ports.contains(&node.port));
        if !configured {
            return false;
        }
        let by_port = self.nodes.entry(node.switch.clone()).or_default();
        let key = node.port.canonical();
        if by_port.contains_key(&key) {
            return false;
        }
        debug!(switch = %node.switch, port = %node.port, mac = %node.mac, "node discovered");
        by_port.insert(key, node);
        true
    }

    pub fn get(&self, switch: &str, port: &PortRef) -> Option<&DiscoveredNode> {
        self.nodes.get(switch)?.get(&port.canonical())
    }

    pub fn len(&self) -> usize {
        self.nodes.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn expected(&self) -> usize {
        self.ports.values().map(Vec::len).sum()
    }

    pub fn switches(&self) -> impl Iterator<Item = &str> {
        self.ports.keys().map(String::as_str)
    }

    /// Configured ports of `switch` with whatever was found on each.
    pub fn rows<'a>(
        &'a self,
        switch: &'a str,
    ) -> impl Iterator<Item = (&'a PortRef, Option<&'a DiscoveredNode>)> + 'a {
        self.ports
            .get(switch)
            .into_iter()
            .flatten()
            .map(move |port| (port, self.get(switch, port)))
    }

    /// Found nodes across all switches, in configured order.
    pub fn nodes(&self) -> impl Iterator<Item = &DiscoveredNode> {
        self.ports
            .iter()
            .flat_map(move |(switch, ports)| ports.iter().filter_map(move |p| self.get(switch, p)))
    }
}

/// Candidate MACs with the address each holds, if known.
pub type Candidates = BTreeMap<String, Option<Ipv4Addr>>;

/// Match candidates against one switch's MAC table. Returns how many nodes
/// were newly recorded.
pub fn correlate(
    table: &mut DiscoveryTable,
    switch: &str,
    mac_table: &MacTable,
    candidates: &Candidates,
) -> usize {
    let ports: Vec<PortRef> = table.ports.get(switch).cloned().unwrap_or_default();
    let mut added = 0;
    for port in ports {
        let Some(macs) = mac_table.get(&port.canonical()) else {
            continue;
        };
        let Some((mac, ip)) = macs
            .iter()
            .find_map(|mac| candidates.get(mac).map(|ip| (mac.clone(), *ip)))
        else {
            continue;
        };
        let node = DiscoveredNode {
            switch: switch.to_string(),
            port,
            mac,
            ip,
        };
        if table.record(node) {
            added += 1;
        }
    }
    added
}

/// Node slots whose `kind` port has not been found.
pub fn missing_slots<'a>(
    slots: &'a [NodeSlot],
    kind: NetworkKind,
    table: &DiscoveryTable,
) -> Vec<&'a NodeSlot> {
    slots
        .iter()
        .filter(|slot| {
            let binding = match kind {
                NetworkKind::Ipmi => &slot.ipmi,
                NetworkKind::Pxe => &slot.pxe,
            };
            binding
                .as_ref()
                .is_some_and(|(switch, port)| table.get(switch, port).is_none())
        })
        .collect()
}

/// BMC addresses of missing slots whose IPMI port was found.
pub fn bmcs_of_missing(missing: &[&NodeSlot], ipmi: &DiscoveryTable) -> Vec<Ipv4Addr> {
    missing
        .iter()
        .filter_map(|slot| slot.ipmi.as_ref())
        .filter_map(|(switch, port)| ipmi.get(switch, port)?.ip)
        .collect()
}

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub rounds: u32,
    pub interval: Duration,
    /// Wait after resetting BMCs left over from an earlier run.
    pub stale_bmc_wait: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            rounds: 25,
            interval: Duration::from_secs(5),
            stale_bmc_wait: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryOutcome {
    pub network: NetworkKind,
    pub table: DiscoveryTable,
    pub complete: bool,
}

/// Verified BMC access, by address.
pub type BmcAccess = BTreeMap<Ipv4Addr, BmcCredentials>;

/// Scan until every expected node is found or the operator stops it. The
/// operator is consulted after each round that falls short, with the
/// recommendation from [`decide`].
pub fn scan_rounds(
    kind: NetworkKind,
    table: &mut DiscoveryTable,
    operator: &mut dyn Operator,
    settings: &DiscoverySettings,
    slots: &[NodeSlot],
    mut cycle: impl FnMut(&[&NodeSlot], &DiscoveryTable),
    mut scan: impl FnMut(&mut DiscoveryTable) -> Result<usize>,
) -> Result<()> {
    let expected = table.expected();
    let mut remaining = settings.rounds;
    let mut rounds = 0;
    info!(network = %kind, expected, "discovery started");

    loop {
        rounds += 1;
        remaining = remaining.saturating_sub(1);
        let added = scan(table)?;
        operator.progress(kind, rounds, table);
        debug!(network = %kind, round = rounds, added, found = table.len(), "scan round");

        if table.len() >= expected {
            info!(network = %kind, found = table.len(), "discovery complete");
            return Ok(());
        }

        let recommended = decide(table.len(), expected, remaining);
        let status = ScanStatus {
            network: kind,
            found: table.len(),
            expected,
            rounds,
            remaining,
        };
        if recommended != ScanDecision::Continue {
            warn!("{}", status.timeout());
        }
        match operator.on_incomplete(&status, recommended)? {
            OperatorChoice::Continue => {}
            OperatorChoice::CyclePowerToMissing => {
                let missing = missing_slots(slots, kind, table);
                cycle(&missing, table);
                remaining = settings.rounds;
            }
            OperatorChoice::ContinueWithSubset => {
                warn!(network = %kind, found = table.len(), expected, "continuing with a subset");
                return Ok(());
            }
            OperatorChoice::Terminate => return Err(ClusterError::Terminated),
        }
        if remaining == 0 {
            remaining = settings.rounds;
        }
        thread::sleep(settings.interval);
    }
}

pub struct DiscoveryEngine<'a> {
    config: &'a ClusterConfig,
    catalog: &'a SwitchCatalog,
    runner: Arc<dyn CommandRunner>,
    bmc: &'a dyn BmcClient,
    settings: DiscoverySettings,
}

impl<'a> DiscoveryEngine<'a> {
    pub fn new(
        config: &'a ClusterConfig,
        catalog: &'a SwitchCatalog,
        runner: Arc<dyn CommandRunner>,
        bmc: &'a dyn BmcClient,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            config,
            catalog,
            runner,
            bmc,
            settings,
        }
    }

    fn client_network(&self, kind: NetworkKind) -> Result<(&'a ClientNetwork, DhcpPool)> {
        let network = self.config.client_network(kind).ok_or_else(|| {
            ClusterError::UserCritical(format!("no {kind} client network configured"))
        })?;
        Ok((network, dhcp_pool(network)?))
    }

    fn empty_table(&self, kind: NetworkKind) -> DiscoveryTable {
        DiscoveryTable::new(TopologyAggregator::new(self.config).network_ports(kind))
    }

    /// Find BMCs on the IPMI network. `stale` holds BMCs known from an
    /// earlier run; they are reset first so they re-request addresses.
    pub fn discover_ipmi(
        &self,
        operator: &mut dyn Operator,
        stale: &BmcAccess,
    ) -> Result<DiscoveryOutcome> {
        let (network, pool) = self.client_network(NetworkKind::Ipmi)?;
        self.reset_stale_bmcs(stale);

        let mut probe = NamespaceProbe::create(
            Arc::clone(&self.runner),
            network,
            &self.config.deployer.state_dir,
        )?;
        let leases = probe.start_dnsmasq(&pool)?;
        let mut table = self.empty_table(NetworkKind::Ipmi);
        self.clear_mac_tables(&table);

        scan_rounds(
            NetworkKind::Ipmi,
            &mut table,
            operator,
            &self.settings,
            &self.node_slots(),
            |_, table| {
                let found: BTreeSet<Ipv4Addr> = table.nodes().filter_map(|n| n.ip).collect();
                let unseen: Vec<Ipv4Addr> =
                    stale.keys().filter(|ip| !found.contains(ip)).copied().collect();
                self.cycle_power(&unseen, stale)
            },
            |table| {
                self.ping_sweep(&probe, &pool);
                let candidates = lease_candidates(&leases)?;
                Ok(self.correlate_all(table, &candidates))
            },
        )?;
        Ok(DiscoveryOutcome {
            network: NetworkKind::Ipmi,
            complete: table.len() >= table.expected(),
            table,
        })
    }

    /// Find PXE-booting nodes. Every BMC in `access` is pointed at PXE and
    /// power-cycled once the capture is running.
    pub fn discover_pxe(
        &self,
        operator: &mut dyn Operator,
        ipmi: &DiscoveryTable,
        access: &BmcAccess,
    ) -> Result<DiscoveryOutcome> {
        let (network, pool) = self.client_network(NetworkKind::Pxe)?;
        let mut probe = NamespaceProbe::create(
            Arc::clone(&self.runner),
            network,
            &self.config.deployer.state_dir,
        )?;
        let leases = probe.start_dnsmasq(&pool)?;
        let capture = probe.start_tcpdump()?;
        let mut table = self.empty_table(NetworkKind::Pxe);
        self.clear_mac_tables(&table);

        for (ip, creds) in access {
            if let Err(err) = self.bmc.set_boot_device(*ip, creds, BootDevice::Pxe) {
                warn!(%ip, %err, "failed to set pxe boot");
                continue;
            }
            if let Err(err) = self.bmc.power_cycle(*ip, creds) {
                warn!(%ip, %err, "failed to power cycle");
            }
        }

        scan_rounds(
            NetworkKind::Pxe,
            &mut table,
            operator,
            &self.settings,
            &self.node_slots(),
            |missing, _| self.cycle_power(&bmcs_of_missing(missing, ipmi), access),
            |table| {
                let leased = lease_candidates(&leases)?;
                let requesters = read_pxe_requesters(&capture).map_err(|err| {
                    ClusterError::UserVisible(format!(
                        "failed to read capture {}: {err}",
                        capture.display()
                    ))
                })?;
                let candidates: Candidates = requesters
                    .into_iter()
                    .map(|mac| {
                        let ip = leased.get(&mac).copied().flatten();
                        (mac, ip)
                    })
                    .collect();
                Ok(self.correlate_all(table, &candidates))
            },
        )?;
        Ok(DiscoveryOutcome {
            network: NetworkKind::Pxe,
            complete: table.len() >= table.expected(),
            table,
        })
    }

    fn node_slots(&self) -> Vec<NodeSlot> {
        TopologyAggregator::new(self.config).node_slots()
    }

    fn reset_stale_bmcs(&self, stale: &BmcAccess) {
        if stale.is_empty() {
            return;
        }
        for (ip, creds) in stale {
            match self.bmc.reset(*ip, creds) {
                Ok(()) => info!(%ip, "reset stale bmc"),
                Err(err) => warn!(%ip, %err, "failed to reset stale bmc"),
            }
        }
        info!(wait = ?self.settings.stale_bmc_wait, "waiting for reset bmcs");
        thread::sleep(self.settings.stale_bmc_wait);
    }

    fn cycle_power(&self, ips: &[Ipv4Addr], access: &BmcAccess) {
        if ips.is_empty() {
            info!("no missing node has a known bmc");
            return;
        }
        for ip in ips {
            let Some(creds) = access.get(ip) else {
                warn!(%ip, "no verified credentials; not cycling");
                continue;
            };
            match self.bmc.power_cycle(*ip, creds) {
                Ok(()) => info!(%ip, "power cycled missing node"),
                Err(err) => warn!(%ip, %err, "power cycle failed"),
            }
        }
    }

    fn ping_sweep(&self, probe: &NamespaceProbe, pool: &DhcpPool) {
        let command = argv![
            "fping", "-q", "-r0", "-t100", "-g", pool.start, pool.end
        ];
        if let Err(err) = probe.exec_in_namespace(&command) {
            warn!(%err, "ping sweep failed");
        }
    }

    fn clear_mac_tables(&self, table: &DiscoveryTable) {
        for label in table.switches() {
            let Some(switch) = self.catalog.get(label) else {
                continue;
            };
            if let Err(err) = switch.clear_mac_address_table() {
                warn!(switch = label, %err, "failed to clear mac table");
            }
        }
    }

    fn correlate_all(&self, table: &mut DiscoveryTable, candidates: &Candidates) -> usize {
        let labels: Vec<String> = table.switches().map(str::to_string).collect();
        let mut added = 0;
        for label in labels {
            let Some(switch) = self.catalog.get(&label) else {
                warn!(switch = %label, "switch not in catalog");
                continue;
            };
            match switch.show_mac_address_table(MacFormat::Std) {
                Ok(mac_table) => added += correlate(table, &label, &mac_table, candidates),
                Err(err) => warn!(switch = %label, %err, "failed to read mac table"),
            }
        }
        added
    }
}

fn lease_candidates(path: &Path) -> Result<Candidates> {
    let leases = read_leases(path).map_err(|err| {
        ClusterError::UserVisible(format!("failed to read leases {}: {err}", path.display()))
    })?;
    Ok(leases.into_iter().map(|(mac, ip)| (mac, Some(ip))).collect())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use switch_core::MacTable;

    use super::{
        bmcs_of_missing, correlate, decide, missing_slots, scan_rounds, Candidates,
        DiscoveredNode, DiscoverySettings, DiscoveryTable, ScanDecision, ScanStatus,
    };
    use crate::config::{NetworkKind, PortRef};
    use crate::error::{ClusterError, Result};
    use crate::operator::{Operator, OperatorChoice};
    use crate::provision::{load_ipmi_table, save_ipmi_table};
    use crate::topology::NodeSlot;

    /// Answers from a script and remembers what it was asked.
    struct Scripted {
        answers: Vec<OperatorChoice>,
        asked: Vec<(u32, ScanDecision)>,
    }

    impl Scripted {
        fn new(answers: &[OperatorChoice]) -> Self {
            Self {
                answers: answers.iter().rev().copied().collect(),
                asked: Vec::new(),
            }
        }
    }

    impl Operator for Scripted {
        fn confirm(&mut self, _question: &str) -> Result<bool> {
            Ok(false)
        }

        fn progress(&mut self, _network: NetworkKind, _round: u32, _table: &DiscoveryTable) {}

        fn on_incomplete(
            &mut self,
            status: &ScanStatus,
            recommended: ScanDecision,
        ) -> Result<OperatorChoice> {
            self.asked.push((status.rounds, recommended));
            Ok(self.answers.pop().unwrap_or(OperatorChoice::Terminate))
        }
    }

    fn quick(rounds: u32) -> DiscoverySettings {
        DiscoverySettings {
            rounds,
            interval: Duration::ZERO,
            ..DiscoverySettings::default()
        }
    }

    fn node(switch: &str, port: &str, mac: &str, ip: Option<Ipv4Addr>) -> DiscoveredNode {
        DiscoveredNode {
            switch: switch.to_string(),
            port: PortRef::new(port),
            mac: mac.to_string(),
            ip,
        }
    }

    fn slots() -> Vec<NodeSlot> {
        vec![
            NodeSlot {
                template: "compute".to_string(),
                index: 0,
                ipmi: Some(("mgmt1".to_string(), PortRef::new("1"))),
                pxe: Some(("mgmt1".to_string(), PortRef::new("11"))),
            },
            NodeSlot {
                template: "compute".to_string(),
                index: 1,
                ipmi: Some(("mgmt1".to_string(), PortRef::new("2"))),
                pxe: Some(("mgmt1".to_string(), PortRef::new("12"))),
            },
        ]
    }

    fn pxe_table() -> DiscoveryTable {
        DiscoveryTable::new(
            [(
                "mgmt1".to_string(),
                vec![PortRef::new("11"), PortRef::new("12")],
            )]
            .into_iter()
            .collect(),
        )
    }

    fn table() -> DiscoveryTable {
        let ports: BTreeMap<String, Vec<PortRef>> = [(
            "mgmt1".to_string(),
            vec![PortRef::new("3"), PortRef::new("1"), PortRef::new("2")],
        )]
        .into_iter()
        .collect();
        DiscoveryTable::new(ports)
    }

    fn mac_table(rows: &[(&str, &str)]) -> MacTable {
        let mut out = MacTable::new();
        for (port, mac) in rows {
            out.entry(port.to_string()).or_default().push(mac.to_string());
        }
        out
    }

    #[test]
    fn decisions_follow_progress() {
        assert_eq!(decide(4, 4, 10), ScanDecision::ContinueWithSubset);
        assert_eq!(decide(2, 4, 10), ScanDecision::Continue);
        assert_eq!(decide(2, 4, 0), ScanDecision::ContinueWithSubset);
        assert_eq!(decide(0, 4, 0), ScanDecision::Terminate);
    }

    #[test]
    fn correlation_uses_configured_ports_only() {
        let mut table = table();
        let macs = mac_table(&[
            ("1", "AA:00:00:00:00:01"),
            ("2", "AA:00:00:00:00:02"),
            ("9", "AA:00:00:00:00:09"),
        ]);
        let candidates: Candidates = [
            ("AA:00:00:00:00:01".to_string(), Some(Ipv4Addr::new(10, 0, 0, 4))),
            ("AA:00:00:00:00:09".to_string(), Some(Ipv4Addr::new(10, 0, 0, 5))),
        ]
        .into_iter()
        .collect();

        assert_eq!(correlate(&mut table, "mgmt1", &macs, &candidates), 1);
        let found: Vec<&str> = table.nodes().map(|n| n.port.as_str()).collect();
        assert_eq!(found, vec!["1"]);
        assert_eq!(table.expected(), 3);
    }

    #[test]
    fn recorded_ports_never_change() {
        let mut table = table();
        let first = DiscoveredNode {
            switch: "mgmt1".to_string(),
            port: PortRef::new("2"),
            mac: "AA:00:00:00:00:02".to_string(),
            ip: None,
        };
        assert!(table.record(first.clone()));
        let mut second = first.clone();
        second.mac = "BB:00:00:00:00:02".to_string();
        assert!(!table.record(second));
        assert_eq!(table.get("mgmt1", &PortRef::new("2")), Some(&first));
    }

    #[test]
    fn rows_keep_configured_order() {
        let mut table = table();
        table.record(DiscoveredNode {
            switch: "mgmt1".to_string(),
            port: PortRef::new("1"),
            mac: "AA:00:00:00:00:01".to_string(),
            ip: None,
        });
        let rows: Vec<(&str, bool)> = table
            .rows("mgmt1")
            .map(|(port, node)| (port.as_str(), node.is_some()))
            .collect();
        assert_eq!(rows, vec![("3", false), ("1", true), ("2", false)]);
    }

    #[test]
    fn missing_pxe_nodes_map_to_their_bmcs() {
        let slots = vec![
            NodeSlot {
                template: "compute".to_string(),
                index: 0,
                ipmi: Some(("mgmt1".to_string(), PortRef::new("1"))),
                pxe: Some(("mgmt1".to_string(), PortRef::new("11"))),
            },
            NodeSlot {
                template: "compute".to_string(),
                index: 1,
                ipmi: Some(("mgmt1".to_string(), PortRef::new("2"))),
                pxe: Some(("mgmt1".to_string(), PortRef::new("12"))),
            },
        ];
        let mut ipmi = table();
        for (port, last) in [("1", 4), ("2", 5)] {
            ipmi.record(DiscoveredNode {
                switch: "mgmt1".to_string(),
                port: PortRef::new(port),
                mac: format!("AA:00:00:00:00:0{last}"),
                ip: Some(Ipv4Addr::new(10, 0, 0, last)),
            });
        }
        let mut pxe = DiscoveryTable::new(
            [(
                "mgmt1".to_string(),
                vec![PortRef::new("11"), PortRef::new("12")],
            )]
            .into_iter()
            .collect(),
        );
        pxe.record(DiscoveredNode {
            switch: "mgmt1".to_string(),
            port: PortRef::new("11"),
            mac: "CC:00:00:00:00:01".to_string(),
            ip: None,
        });

        let missing = missing_slots(&slots, NetworkKind::Pxe, &pxe);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].index, 1);
        assert_eq!(bmcs_of_missing(&missing, &ipmi), vec![Ipv4Addr::new(10, 0, 0, 5)]);
    }

    #[test]
    fn operator_is_asked_after_the_first_short_round() {
        let mut table = pxe_table();
        let mut operator = Scripted::new(&[OperatorChoice::ContinueWithSubset]);
        let mut scans = 0;
        scan_rounds(
            NetworkKind::Pxe,
            &mut table,
            &mut operator,
            &quick(25),
            &slots(),
            |_, _| panic!("nothing to cycle"),
            |table| {
                scans += 1;
                table.record(node("mgmt1", "11", "CC:00:00:00:00:01", None));
                Ok(1)
            },
        )
        .expect("subset accepted");
        assert_eq!(scans, 1);
        assert_eq!(operator.asked, vec![(1, ScanDecision::Continue)]);
    }

    #[test]
    fn terminate_stops_scanning() {
        let mut table = pxe_table();
        let mut operator = Scripted::new(&[OperatorChoice::Continue, OperatorChoice::Terminate]);
        let err = scan_rounds(
            NetworkKind::Pxe,
            &mut table,
            &mut operator,
            &quick(2),
            &slots(),
            |_, _| {},
            |_| Ok(0),
        )
        .expect_err("terminated");
        assert!(matches!(err, ClusterError::Terminated));
        assert_eq!(
            operator.asked,
            vec![(1, ScanDecision::Continue), (2, ScanDecision::Terminate)]
        );
    }

    #[test]
    fn saved_ipmi_scan_finds_the_bmc_of_a_missing_pxe_node() {
        let mut ipmi = table();
        ipmi.record(node("mgmt1", "1", "AA:00:00:00:00:04", Some(Ipv4Addr::new(10, 0, 0, 4))));
        ipmi.record(node("mgmt1", "2", "AA:00:00:00:00:05", Some(Ipv4Addr::new(10, 0, 0, 5))));
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ipmi-nodes.json");
        save_ipmi_table(&path, &ipmi).expect("save");
        let saved = load_ipmi_table(&path).expect("load");

        let mut table = pxe_table();
        let mut operator = Scripted::new(&[OperatorChoice::CyclePowerToMissing]);
        let mut cycled = Vec::new();
        let mut round = 0;
        scan_rounds(
            NetworkKind::Pxe,
            &mut table,
            &mut operator,
            &quick(25),
            &slots(),
            |missing, _| cycled.extend(bmcs_of_missing(missing, &saved)),
            |table| {
                round += 1;
                table.record(node("mgmt1", "11", "CC:00:00:00:00:01", None));
                if round == 2 {
                    table.record(node("mgmt1", "12", "CC:00:00:00:00:02", None));
                }
                Ok(1)
            },
        )
        .expect("complete after the power cycle");
        assert_eq!(cycled, vec![Ipv4Addr::new(10, 0, 0, 5)]);
        assert_eq!(table.len(), 2);
        assert_eq!(operator.asked.len(), 1);
    }

    #[test]
    fn no_saved_ipmi_scan_is_an_empty_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = load_ipmi_table(&dir.path().join("ipmi-nodes.json")).expect("load");
        assert!(table.is_empty());
    }
}
