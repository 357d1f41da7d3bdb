//! Isolated discovery sandboxes.
//!
//! A [`NamespaceProbe`] owns a network namespace joined to a client-network
//! bridge through a veth pair. dnsmasq and tcpdump run inside it so the
//! deployer's own addressing is never touched. Dropping the probe tears
//! everything down.

use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::argv;
use crate::config::ClientNetwork;
use crate::exec::{command_line, CommandOutput, CommandRunner, ExecutionError, ProcessHandle};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("bridge {0} not found; is the deployer network up?")]
    BridgeMissing(String),
    #[error("namespace {namespace}: [{command}] failed: {stderr}")]
    Setup {
        namespace: String,
        command: String,
        stderr: String,
    },
    #[error("client network {network}: {message}")]
    Network { network: String, message: String },
    #[error("failed to prepare {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Exec(#[from] ExecutionError),
}

/// Address range handed out by the probe's DHCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpPool {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl DhcpPool {
    /// Every address in the pool, for ping sweeps.
    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> {
        (u32::from(self.start)..=u32::from(self.end)).map(Ipv4Addr::from)
    }

    pub fn len(&self) -> usize {
        (u32::from(self.end) - u32::from(self.start)) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn network_of(network: &ClientNetwork) -> Result<Ipv4Network, ProbeError> {
    network.network().map_err(|err| ProbeError::Network {
        network: network.bridge_name(),
        message: err.to_string(),
    })
}

/// `bridge_ip + offset`, or `None` past the end of the address space.
fn after_bridge(network: &ClientNetwork, offset: u32) -> Option<u32> {
    u32::from(network.bridge_ip).checked_add(offset)
}

/// The namespace side of the veth takes the address after the bridge.
pub fn namespace_address(network: &ClientNetwork) -> Result<Ipv4Network, ProbeError> {
    let net = network_of(network)?;
    let addr = after_bridge(network, 1).map(Ipv4Addr::from);
    let Some(addr) = addr.filter(|a| net.contains(*a) && *a != net.broadcast()) else {
        return Err(ProbeError::Network {
            network: network.bridge_name(),
            message: format!("no room for a probe address after {}", network.bridge_ip),
        });
    };
    Ipv4Network::new(addr, network.prefix).map_err(|err| ProbeError::Network {
        network: network.bridge_name(),
        message: err.to_string(),
    })
}

/// Pool starting two past the bridge address, `pool_size` long, clipped
/// below the broadcast address.
pub fn dhcp_pool(network: &ClientNetwork) -> Result<DhcpPool, ProbeError> {
    let net = network_of(network)?;
    let last_usable = u32::from(net.broadcast()).saturating_sub(1);
    let range = after_bridge(network, 2).map(|start| {
        let wanted_end = start.saturating_add(network.pool_size.saturating_sub(1));
        (start, wanted_end.min(last_usable))
    });
    let Some((start, end)) = range.filter(|(start, end)| network.pool_size > 0 && start <= end)
    else {
        return Err(ProbeError::Network {
            network: network.bridge_name(),
            message: format!(
                "no DHCP pool fits after {} in /{}",
                network.bridge_ip, network.prefix
            ),
        });
    };
    Ok(DhcpPool {
        start: Ipv4Addr::from(start),
        end: Ipv4Addr::from(end),
        netmask: net.mask(),
    })
}

/// Names and addressing of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSession {
    pub name: String,
    pub bridge: String,
    pub vlan: u16,
    pub veth_host: String,
    pub veth_ns: String,
    pub address: Ipv4Network,
}

impl NamespaceSession {
    pub fn for_network(network: &ClientNetwork) -> Result<Self, ProbeError> {
        let short = format!("{}{}", network.kind, network.vlan);
        Ok(Self {
            name: format!("{}-ns-{}", network.kind, network.vlan),
            bridge: network.bridge_name(),
            vlan: network.vlan,
            veth_host: format!("{short}-br"),
            veth_ns: format!("{short}-ns"),
            address: namespace_address(network)?,
        })
    }
}

/// Conditions the kernel reports when an object is already in place.
fn is_benign(stderr: &str) -> bool {
    stderr.contains("File exists")
}

/// Interface names from `ip -o link show master <bridge> type veth`.
fn parse_link_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| field.trim_end_matches(':'))
        .map(|field| field.split('@').next().unwrap_or(field).to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

pub struct NamespaceProbe {
    runner: Arc<dyn CommandRunner>,
    session: NamespaceSession,
    state_dir: PathBuf,
    disconnected: Vec<String>,
    processes: Vec<ProcessHandle>,
    active: bool,
}

impl NamespaceProbe {
    /// Build the sandbox for `network`. Re-running against leftovers of an
    /// earlier probe is fine; a missing bridge is not.
    pub fn create(
        runner: Arc<dyn CommandRunner>,
        network: &ClientNetwork,
        state_dir: &Path,
    ) -> Result<Self, ProbeError> {
        let session = NamespaceSession::for_network(network)?;
        fs::create_dir_all(state_dir).map_err(|source| ProbeError::Io {
            path: state_dir.to_path_buf(),
            source,
        })?;

        let bridge_up = runner.run(&argv!["ip", "link", "show", session.bridge])?;
        if !bridge_up.success() {
            return Err(ProbeError::BridgeMissing(session.bridge.clone()));
        }

        let mut probe = Self {
            runner,
            session,
            state_dir: state_dir.to_path_buf(),
            disconnected: Vec::new(),
            processes: Vec::new(),
            active: true,
        };
        probe.build()?;
        info!(
            namespace = %probe.session.name,
            bridge = %probe.session.bridge,
            "namespace probe up"
        );
        Ok(probe)
    }

    fn build(&mut self) -> Result<(), ProbeError> {
        let s = self.session.clone();
        self.step(&argv!["ip", "netns", "add", s.name])?;
        self.disconnect_bridge_ports()?;
        self.step(&argv![
            "ip", "link", "add", s.veth_host, "type", "veth", "peer", "name", s.veth_ns
        ])?;
        self.move_peer_into_namespace()?;
        self.step(&self.in_namespace(&argv!["ip", "link", "set", "lo", "up"]))?;
        self.step(&self.in_namespace(&argv!["ip", "link", "set", s.veth_ns, "up"]))?;
        self.step(&self.in_namespace(&argv![
            "ip", "addr", "add", s.address, "dev", s.veth_ns
        ]))?;
        self.step(&argv!["ip", "link", "set", s.veth_host, "master", s.bridge])?;
        self.step(&argv!["ip", "link", "set", s.veth_host, "up"])?;
        Ok(())
    }

    /// Run one setup command; already-present objects are not failures.
    fn step(&self, command: &[String]) -> Result<CommandOutput, ProbeError> {
        let output = self.runner.run(command)?;
        if output.success() {
            return Ok(output);
        }
        if is_benign(&output.stderr) {
            debug!(command = %command_line(command), "already present");
            return Ok(output);
        }
        Err(ProbeError::Setup {
            namespace: self.session.name.clone(),
            command: command_line(command),
            stderr: output.stderr.trim().to_string(),
        })
    }

    /// On re-creation the peer already lives in the namespace.
    fn move_peer_into_namespace(&self) -> Result<(), ProbeError> {
        let s = &self.session;
        let present = self
            .runner
            .run(&self.in_namespace(&argv!["ip", "link", "show", s.veth_ns]))?;
        if present.success() {
            debug!(link = %s.veth_ns, "peer already in namespace");
            return Ok(());
        }
        self.step(&argv!["ip", "link", "set", s.veth_ns, "netns", s.name])?;
        Ok(())
    }

    /// Take down foreign veths on the bridge so the probe owns it. The
    /// bridge uplink is left alone.
    fn disconnect_bridge_ports(&mut self) -> Result<(), ProbeError> {
        let s = self.session.clone();
        let listing = self.runner.run(&argv![
            "ip", "-o", "link", "show", "master", s.bridge, "type", "veth"
        ])?;
        for link in parse_link_names(&listing.stdout) {
            if link == s.veth_host || self.disconnected.contains(&link) {
                continue;
            }
            self.step(&argv!["ip", "link", "set", link, "down"])?;
            info!(%link, bridge = %s.bridge, "disconnected from bridge for discovery");
            self.disconnected.push(link);
        }
        Ok(())
    }

    pub fn session(&self) -> &NamespaceSession {
        &self.session
    }

    /// Links taken off the bridge, reconnected on teardown.
    pub fn disconnected(&self) -> &[String] {
        &self.disconnected
    }

    fn in_namespace(&self, command: &[String]) -> Vec<String> {
        let mut full = argv!["ip", "netns", "exec", self.session.name];
        full.extend(command.iter().cloned());
        full
    }

    /// Run `command` inside the namespace and wait for it.
    pub fn exec_in_namespace(&self, command: &[String]) -> Result<CommandOutput, ExecutionError> {
        self.runner.run(&self.in_namespace(command))
    }

    /// Start `command` inside the namespace without waiting.
    pub fn launch_in_namespace(
        &mut self,
        command: &[String],
        stdout: Option<&Path>,
    ) -> Result<&ProcessHandle, ExecutionError> {
        let handle = self.runner.spawn(&self.in_namespace(command), stdout)?;
        debug!(pid = handle.pid, command = %handle.command, "launched in namespace");
        self.processes.push(handle);
        Ok(&self.processes[self.processes.len() - 1])
    }

    fn state_file(&self, extension: &str) -> Result<PathBuf, ProbeError> {
        let path = self
            .state_dir
            .join(format!("{}.{extension}", self.session.name));
        match fs::remove_file(&path) {
            Ok(()) => Ok(path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(path),
            Err(source) => Err(ProbeError::Io { path, source }),
        }
    }

    /// Serve `pool` from inside the namespace. Returns the lease file.
    pub fn start_dnsmasq(&mut self, pool: &DhcpPool) -> Result<PathBuf, ProbeError> {
        let leases = self.state_file("leases")?;
        let pid_file = self.state_file("pid")?;
        let command = argv![
            "dnsmasq",
            "--keep-in-foreground",
            "--port=0",
            "--bind-interfaces",
            format!("--interface={}", self.session.veth_ns),
            "--except-interface=lo",
            format!("--dhcp-range={},{},{},3600", pool.start, pool.end, pool.netmask),
            format!("--dhcp-leasefile={}", leases.display()),
            format!("--pid-file={}", pid_file.display()),
        ];
        self.launch_in_namespace(&command, None)?;
        info!(
            namespace = %self.session.name,
            start = %pool.start,
            end = %pool.end,
            "dhcp server started"
        );
        Ok(leases)
    }

    /// Capture DHCP traffic as hex dumps. Returns the capture file.
    pub fn start_tcpdump(&mut self) -> Result<PathBuf, ProbeError> {
        let capture = self.state_file("dump")?;
        let command = argv![
            "tcpdump", "-l", "-n", "-e", "-xx", "-i", self.session.veth_ns, "port", "67", "or",
            "port", "68"
        ];
        self.launch_in_namespace(&command, Some(&capture))?;
        info!(
            namespace = %self.session.name,
            capture = %capture.display(),
            "packet capture started"
        );
        Ok(capture)
    }

    /// Kill everything in the namespace, remove it, and give the bridge
    /// back. Best effort: failures are logged.
    pub fn teardown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let s = self.session.clone();

        let mut pids: Vec<i32> = self.processes.drain(..).map(|p| p.pid).collect();
        match self.runner.run(&argv!["ip", "netns", "pids", s.name]) {
            Ok(out) => pids.extend(out.stdout.lines().filter_map(|l| l.trim().parse::<i32>().ok())),
            Err(err) => warn!(namespace = %s.name, %err, "could not list namespace processes"),
        }
        pids.sort_unstable();
        pids.dedup();
        for pid in pids {
            if let Err(err) = self.runner.terminate(pid) {
                warn!(pid, %err, "failed to stop namespace process");
            }
        }

        self.best_effort(&argv!["ip", "link", "set", s.veth_host, "down"]);
        self.best_effort(&argv!["ip", "link", "delete", s.veth_host]);
        self.best_effort(&argv!["ip", "netns", "delete", s.name]);

        for link in std::mem::take(&mut self.disconnected) {
            self.best_effort(&argv!["ip", "link", "set", link, "master", s.bridge]);
            self.best_effort(&argv!["ip", "link", "set", link, "up"]);
            info!(%link, bridge = %s.bridge, "reconnected to bridge");
        }
        info!(namespace = %s.name, "namespace probe removed");
    }

    fn best_effort(&self, command: &[String]) {
        match self.runner.run(command) {
            Ok(out) if out.success() => {}
            Ok(out) => warn!(
                command = %command_line(command),
                stderr = %out.stderr.trim(),
                "teardown step failed"
            ),
            Err(err) => warn!(command = %command_line(command), %err, "teardown step failed"),
        }
    }
}

impl Drop for NamespaceProbe {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::{dhcp_pool, namespace_address, parse_link_names, NamespaceSession, ProbeError};
    use crate::config::{ClientNetwork, NetworkKind};

    fn network(bridge_ip: [u8; 4], prefix: u8, pool_size: u32) -> ClientNetwork {
        ClientNetwork {
            kind: NetworkKind::Ipmi,
            vlan: 10,
            bridge_ip: Ipv4Addr::from(bridge_ip),
            prefix,
            pool_size,
            bridge: None,
        }
    }

    #[test]
    fn pool_follows_the_probe_address() {
        let net = network([192, 168, 10, 2], 24, 250);
        assert_eq!(
            namespace_address(&net).expect("address").to_string(),
            "192.168.10.3/24"
        );
        let pool = dhcp_pool(&net).expect("pool");
        assert_eq!(pool.start, Ipv4Addr::new(192, 168, 10, 4));
        assert_eq!(pool.end, Ipv4Addr::new(192, 168, 10, 253));
        assert_eq!(pool.netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(pool.len(), 250);
    }

    #[test]
    fn pool_is_clipped_below_broadcast() {
        let pool = dhcp_pool(&network([10, 0, 0, 1], 28, 250)).expect("pool");
        assert_eq!(pool.start, Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(pool.end, Ipv4Addr::new(10, 0, 0, 14));
        assert_eq!(pool.addresses().count(), 12);
    }

    #[test]
    fn full_network_has_no_pool() {
        assert!(dhcp_pool(&network([10, 0, 0, 13], 28, 250)).is_err());
    }

    #[test]
    fn top_of_address_space_is_an_error() {
        let net = network([255, 255, 255, 254], 31, 10);
        assert!(matches!(namespace_address(&net), Err(ProbeError::Network { .. })));
        assert!(matches!(dhcp_pool(&net), Err(ProbeError::Network { .. })));
        let last = network([255, 255, 255, 255], 32, 10);
        assert!(matches!(namespace_address(&last), Err(ProbeError::Network { .. })));
        assert!(matches!(dhcp_pool(&last), Err(ProbeError::Network { .. })));
    }

    #[test]
    fn session_names_fit_interface_limits() {
        let session = NamespaceSession::for_network(&network([192, 168, 10, 2], 24, 10))
            .expect("session");
        assert_eq!(session.name, "ipmi-ns-10");
        assert_eq!(session.bridge, "br-ipmi-10");
        assert_eq!(session.veth_host, "ipmi10-br");
        assert_eq!(session.veth_ns, "ipmi10-ns");
        assert!(session.veth_host.len() <= 15);
    }

    #[test]
    fn bridge_member_names_are_extracted() {
        let out = "7: veth1c2@if6: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 master br-pxe-20 state UP\n\
                   9: vnet3@vnet4: <BROADCAST> mtu 1500 master br-pxe-20 state DOWN\n";
        assert_eq!(parse_link_names(out), vec!["veth1c2", "vnet3"]);
    }
}
