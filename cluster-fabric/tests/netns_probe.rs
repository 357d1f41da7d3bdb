use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use cluster_fabric::config::{ClientNetwork, NetworkKind};
use cluster_fabric::exec::{CommandOutput, CommandRunner, ExecutionError, ProcessHandle};
use cluster_fabric::netns::{dhcp_pool, NamespaceProbe, ProbeError};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

const BRIDGE: &str = "br-ipmi-10";

#[derive(Debug, Clone, Default)]
struct Link {
    veth: bool,
    namespace: Option<String>,
    master: Option<String>,
    up: bool,
    peer: Option<String>,
    addresses: Vec<String>,
}

/// Just enough of `ip` to follow a probe's life.
#[derive(Debug, Default)]
struct Kernel {
    bridges: BTreeSet<String>,
    links: BTreeMap<String, Link>,
    namespaces: BTreeSet<String>,
    pids: BTreeMap<i32, String>,
    next_pid: i32,
    log: Vec<String>,
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        stdout: stdout.into(),
        stderr: String::new(),
        status: 0,
    }
}

fn fail(stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        status: 2,
    }
}

impl Kernel {
    fn with_bridge() -> Self {
        let mut kernel = Kernel {
            next_pid: 4000,
            ..Kernel::default()
        };
        kernel.bridges.insert(BRIDGE.to_string());
        kernel
    }

    /// A container veth already plugged into the bridge.
    fn attach(&mut self, name: &str) {
        self.plug(name, true);
    }

    /// The bridge's own uplink, e.g. a VLAN interface.
    fn attach_uplink(&mut self, name: &str) {
        self.plug(name, false);
    }

    fn plug(&mut self, name: &str, veth: bool) {
        self.links.insert(
            name.to_string(),
            Link {
                veth,
                master: Some(BRIDGE.to_string()),
                up: true,
                ..Link::default()
            },
        );
    }

    fn visible(&self, name: &str, ns: Option<&str>) -> bool {
        self.links
            .get(name)
            .is_some_and(|l| l.namespace.as_deref() == ns)
            || (ns.is_none() && self.bridges.contains(name))
    }

    fn ip(&mut self, args: &[&str], ns: Option<&str>) -> CommandOutput {
        match args {
            ["link", "show", name] => {
                if self.visible(name, ns) {
                    ok(format!("7: {name}: <BROADCAST,MULTICAST,UP> mtu 1500"))
                } else {
                    fail(&format!("Device \"{name}\" does not exist."))
                }
            }
            ["-o", "link", "show", "master", bridge, "type", "veth"] => {
                let lines: Vec<String> = self
                    .links
                    .iter()
                    .filter(|(_, l)| l.veth && l.namespace.is_none())
                    .filter(|(_, l)| l.master.as_deref() == Some(*bridge))
                    .enumerate()
                    .map(|(i, (name, _))| {
                        let (index, peer) = (i + 10, i + 3);
                        format!("{index}: {name}@if{peer}: <BROADCAST,UP> mtu 1500 master {bridge}")
                    })
                    .collect();
                ok(lines.join("\n"))
            }
            ["link", "set", name, state @ ("up" | "down")] => {
                if *name == "lo" {
                    return ok("");
                }
                if !self.visible(name, ns) {
                    return fail("Cannot find device");
                }
                if let Some(link) = self.links.get_mut(*name) {
                    link.up = *state == "up";
                }
                ok("")
            }
            ["link", "add", host, "type", "veth", "peer", "name", peer] => {
                if self.links.contains_key(*host) {
                    return fail("RTNETLINK answers: File exists");
                }
                for (name, other) in [(host, peer), (peer, host)] {
                    self.links.insert(
                        name.to_string(),
                        Link {
                            veth: true,
                            peer: Some(other.to_string()),
                            ..Link::default()
                        },
                    );
                }
                ok("")
            }
            ["link", "set", name, "netns", target] => match self.links.get_mut(*name) {
                Some(link) if self.namespaces.contains(*target) => {
                    link.namespace = Some(target.to_string());
                    ok("")
                }
                _ => fail("Cannot find device"),
            },
            ["link", "set", name, "master", bridge] => match self.links.get_mut(*name) {
                Some(link) => {
                    link.master = Some(bridge.to_string());
                    ok("")
                }
                None => fail("Cannot find device"),
            },
            ["link", "delete", name] => match self.links.remove(*name) {
                Some(link) => {
                    if let Some(peer) = link.peer {
                        self.links.remove(&peer);
                    }
                    ok("")
                }
                None => fail("Cannot find device"),
            },
            ["addr", "add", address, "dev", name] => {
                let Some(link) = self.links.get_mut(*name) else {
                    return fail("Cannot find device");
                };
                if link.addresses.iter().any(|a| a == address) {
                    return fail("RTNETLINK answers: File exists");
                }
                link.addresses.push(address.to_string());
                ok("")
            }
            ["netns", "add", name] => {
                if !self.namespaces.insert(name.to_string()) {
                    return fail(&format!(
                        "Cannot create namespace file \"/run/netns/{name}\": File exists"
                    ));
                }
                ok("")
            }
            ["netns", "delete", name] => {
                if !self.namespaces.remove(*name) {
                    return fail("No such file or directory");
                }
                self.links
                    .retain(|_, l| l.namespace.as_deref() != Some(*name));
                ok("")
            }
            ["netns", "pids", name] => {
                let pids: Vec<String> = self
                    .pids
                    .iter()
                    .filter(|(_, n)| n.as_str() == *name)
                    .map(|(pid, _)| pid.to_string())
                    .collect();
                ok(pids.join("\n"))
            }
            ["netns", "exec", name, "ip", rest @ ..] => {
                if !self.namespaces.contains(*name) {
                    return fail("Cannot open network namespace");
                }
                let name = name.to_string();
                self.ip(rest, Some(name.as_str()))
            }
            other => fail(&format!("unsupported: ip {}", other.join(" "))),
        }
    }
}

#[derive(Debug, Default)]
struct FakeHost {
    kernel: Mutex<Kernel>,
}

impl FakeHost {
    fn new(kernel: Kernel) -> Arc<Self> {
        Arc::new(Self {
            kernel: Mutex::new(kernel),
        })
    }

    fn with<T>(&self, f: impl FnOnce(&mut Kernel) -> T) -> T {
        f(&mut self.kernel.lock().expect("kernel lock"))
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, argv: &[String]) -> Result<CommandOutput, ExecutionError> {
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        self.with(|k| {
            k.log.push(args.join(" "));
            Ok(match args.as_slice() {
                ["ip", rest @ ..] => k.ip(rest, None),
                other => fail(&format!("unsupported: {}", other.join(" "))),
            })
        })
    }

    fn spawn(
        &self,
        argv: &[String],
        stdout: Option<&Path>,
    ) -> Result<ProcessHandle, ExecutionError> {
        if let Some(path) = stdout {
            fs::write(path, "").expect("create capture file");
        }
        self.with(|k| {
            let command = argv.join(" ");
            k.log.push(command.clone());
            let namespace = match argv {
                [ip, netns, exec, name, ..] if ip == "ip" && netns == "netns" && exec == "exec" => {
                    name.clone()
                }
                _ => String::new(),
            };
            k.next_pid += 1;
            let pid = k.next_pid;
            k.pids.insert(pid, namespace);
            Ok(ProcessHandle { pid, command })
        })
    }

    fn terminate(&self, pid: i32) -> Result<(), ExecutionError> {
        self.with(|k| {
            k.pids.remove(&pid);
            Ok(())
        })
    }
}

fn ipmi_network() -> ClientNetwork {
    ClientNetwork {
        kind: NetworkKind::Ipmi,
        vlan: 10,
        bridge_ip: Ipv4Addr::new(192, 168, 10, 2),
        prefix: 24,
        pool_size: 250,
        bridge: None,
    }
}

#[test]
fn probe_lifecycle_leaves_nothing_behind() {
    let mut kernel = Kernel::with_bridge();
    kernel.attach("vnet3");
    let host = FakeHost::new(kernel);
    let state = tempdir().expect("tempdir");
    let network = ipmi_network();

    let mut probe =
        NamespaceProbe::create(host.clone(), &network, state.path()).expect("probe up");
    assert_eq!(probe.disconnected(), &["vnet3".to_string()]);
    let leases = probe
        .start_dnsmasq(&dhcp_pool(&network).expect("pool"))
        .expect("dnsmasq");
    let capture = probe.start_tcpdump().expect("tcpdump");
    assert_eq!(leases, state.path().join("ipmi-ns-10.leases"));
    assert!(capture.exists());

    host.with(|k| {
        assert!(k.namespaces.contains("ipmi-ns-10"));
        let ns_side = &k.links["ipmi10-ns"];
        assert_eq!(ns_side.namespace.as_deref(), Some("ipmi-ns-10"));
        assert_eq!(ns_side.addresses, vec!["192.168.10.3/24".to_string()]);
        assert_eq!(k.links["ipmi10-br"].master.as_deref(), Some(BRIDGE));
        assert!(!k.links["vnet3"].up);
        assert_eq!(k.pids.len(), 2);
        let range = "--dhcp-range=192.168.10.4,192.168.10.253,255.255.255.0,3600";
        assert!(k
            .log
            .iter()
            .any(|c| c.contains("dnsmasq") && c.contains(range)));
    });

    drop(probe);

    host.with(|k| {
        assert!(k.namespaces.is_empty());
        assert!(k.pids.is_empty());
        assert_eq!(k.links.keys().collect::<Vec<_>>(), vec!["vnet3"]);
        assert!(k.links["vnet3"].up);
        assert_eq!(k.links["vnet3"].master.as_deref(), Some(BRIDGE));
    });
}

#[test]
fn bridge_uplink_stays_up_during_discovery() {
    let mut kernel = Kernel::with_bridge();
    kernel.attach_uplink("eth1.10");
    kernel.attach("vnet3");
    let host = FakeHost::new(kernel);
    let state = tempdir().expect("tempdir");

    let probe =
        NamespaceProbe::create(host.clone(), &ipmi_network(), state.path()).expect("probe up");
    assert_eq!(probe.disconnected(), &["vnet3".to_string()]);
    host.with(|k| {
        assert!(k.links["eth1.10"].up);
        assert!(!k.links["vnet3"].up);
    });

    drop(probe);
    host.with(|k| {
        assert!(k.links["eth1.10"].up);
        assert!(k.links["vnet3"].up);
        assert!(!k.log.iter().any(|c| c.contains("eth1.10")));
    });
}

#[test]
fn missing_bridge_is_reported_before_anything_is_created() {
    let host = FakeHost::new(Kernel::default());
    let state = tempdir().expect("tempdir");

    let err = NamespaceProbe::create(host.clone(), &ipmi_network(), state.path())
        .err()
        .expect("no bridge");
    assert!(matches!(err, ProbeError::BridgeMissing(ref bridge) if bridge == BRIDGE));
    host.with(|k| {
        assert!(k.namespaces.is_empty());
        assert_eq!(k.log, vec![format!("ip link show {BRIDGE}")]);
    });
}

#[test]
fn leftovers_of_an_earlier_probe_are_reused() {
    let host = FakeHost::new(Kernel::with_bridge());
    let state = tempdir().expect("tempdir");
    let network = ipmi_network();

    let first = NamespaceProbe::create(host.clone(), &network, state.path()).expect("first");
    // Simulate a crash: nothing is torn down.
    std::mem::forget(first);

    let second = NamespaceProbe::create(host.clone(), &network, state.path()).expect("second");
    host.with(|k| {
        assert_eq!(k.namespaces.len(), 1);
        assert_eq!(k.links["ipmi10-ns"].addresses.len(), 1);
    });
    drop(second);
    host.with(|k| {
        assert!(k.namespaces.is_empty());
        assert!(k.links.is_empty());
    });
}

#[test]
fn teardown_runs_once() {
    let host = FakeHost::new(Kernel::with_bridge());
    let state = tempdir().expect("tempdir");

    let mut probe =
        NamespaceProbe::create(host.clone(), &ipmi_network(), state.path()).expect("probe");
    probe.teardown();
    probe.teardown();
    drop(probe);

    let deletes = host.with(|k| {
        k.log
            .iter()
            .filter(|c| c.as_str() == "ip netns delete ipmi-ns-10")
            .count()
    });
    assert_eq!(deletes, 1);
}
