use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

/// A passive run against the fixture cluster, transcripts under `dir`.
fn passive(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cluster-fabric"));
    cmd.env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(fixture("fixtures/cluster.toml"))
        .arg("--passive")
        .arg("--non-interactive")
        .arg("--transcript-dir")
        .arg(dir);
    cmd
}

fn transcript(dir: &Path, label: &str) -> String {
    fs::read_to_string(dir.join(format!("{label}.cmds"))).expect("read transcript")
}

#[test]
fn config_data_switches_writes_mlag_vlans_and_channels() {
    let dir = tempdir().expect("tempdir");
    passive(dir.path())
        .arg("config-data-switches")
        .assert()
        .success()
        .stdout(predicate::str::contains("- data-a: ok"))
        .stdout(predicate::str::contains("- data-b: ok"));

    let a = transcript(dir.path(), "data-a");
    assert!(a.contains("protocol mlag"), "{a}");
    assert!(a.contains("\"vlan 20\""), "{a}");
    assert!(a.contains("\"vlan 40\""), "{a}");
    assert!(a.contains("interface ethernet 1/7"), "{a}");
    assert!(a.contains("mtu 9000 force"), "{a}");
    assert!(a.contains("mlag-channel-group 5 mode active"), "{a}");
    assert!(a.contains("mlag-channel-group 6 mode active"), "{a}");

    let b = transcript(dir.path(), "data-b");
    assert!(b.contains("mlag-vip data-a-data-b ip 192.168.5.30 /24 force"), "{b}");
    assert!(!b.contains("\"vlan 40\""), "{b}");

    assert!(!dir.path().join("mgmt1.cmds").exists());
}

#[test]
fn config_mgmt_switches_puts_bmc_and_pxe_ports_in_access_mode() {
    let dir = tempdir().expect("tempdir");
    passive(dir.path())
        .arg("config-mgmt-switches")
        .assert()
        .success()
        .stdout(predicate::str::contains("- mgmt1: ok"));

    let mgmt = transcript(dir.path(), "mgmt1");
    assert!(mgmt.contains("vlan 10"), "{mgmt}");
    assert!(mgmt.contains("vlan 11"), "{mgmt}");
    assert!(mgmt.contains("interface Ethernet1/3"), "{mgmt}");
    assert!(mgmt.contains("interface Ethernet1/13"), "{mgmt}");
    assert!(mgmt.contains("switchport access vlan 10"), "{mgmt}");
    assert!(mgmt.contains("switchport access vlan 11"), "{mgmt}");
    assert!(!dir.path().join("data-a.cmds").exists());
}

#[test]
fn deconfig_keeps_mlag_unless_confirmed() {
    let dir = tempdir().expect("tempdir");
    passive(dir.path())
        .arg("deconfig-data-switches")
        .assert()
        .success();
    let a = transcript(dir.path(), "data-a");
    assert!(a.contains("\"no vlan 20\""), "{a}");
    assert!(a.contains("no interface mlag-port-channel 5"), "{a}");
    assert!(!a.contains("mlag shutdown"), "{a}");
}

#[test]
fn deconfig_with_yes_tears_down_mlag() {
    let dir = tempdir().expect("tempdir");
    passive(dir.path())
        .arg("deconfig-data-switches")
        .arg("--yes")
        .assert()
        .success();
    for label in ["data-a", "data-b"] {
        let text = transcript(dir.path(), label);
        assert!(text.contains("mlag shutdown"), "{text}");
        assert!(text.contains("no interface port-channel 29"), "{text}");
    }
}

#[test]
fn mac_table_rejects_unknown_switch() {
    let dir = tempdir().expect("tempdir");
    passive(dir.path())
        .arg("mac-table")
        .arg("core9")
        .assert()
        .failure()
        .stderr(predicate::str::contains("switch 'core9' is not configured"));
}
