use colored::Colorize;
use switch_core::MacTable;

use crate::config::NetworkKind;
use crate::discovery::{DiscoveryOutcome, DiscoveryTable};
use crate::provision::{ProvisionReport, ValidationReport};
use crate::topology::Topology;

/// Render per-switch discovery state after a scan round.
pub fn render_discovery(network: NetworkKind, round: u32, table: &DiscoveryTable) -> String {
    let header = format!(
        "{network} discovery round {round}: {} of {} found",
        table.len(),
        table.expected()
    );
    render_table(header.cyan().to_string(), table)
}

/// Render the final table of a discovery run.
pub fn render_outcome(outcome: &DiscoveryOutcome) -> String {
    let header = format!(
        "{} discovery: {} of {} found",
        outcome.network,
        outcome.table.len(),
        outcome.table.expected()
    );
    let header = if outcome.complete {
        header.green().to_string()
    } else {
        header.yellow().to_string()
    };
    render_table(header, &outcome.table)
}

fn render_table(header: String, table: &DiscoveryTable) -> String {
    let mut out = vec![header];
    for switch in table.switches() {
        out.push(format!("switch {switch}"));
        out.push(format!("  {:<10} {:<19} {}", "port", "mac", "ip"));
        for (port, node) in table.rows(switch) {
            let line = match node {
                Some(node) => format!(
                    "  {:<10} {:<19} {}",
                    port.as_str(),
                    node.mac,
                    node.ip.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string())
                )
                .green()
                .to_string(),
                None => format!("  {:<10} {:<19} -", port.as_str(), "-")
                    .dimmed()
                    .to_string(),
            };
            out.push(line);
        }
    }
    out.join("\n")
}

/// Render per-switch outcome of a provisioning run.
pub fn render_provision(report: &ProvisionReport) -> String {
    let mut out = Vec::new();
    out.push(report.action.to_string());
    for switch in &report.switches {
        if switch.is_clean() {
            out.push(
                format!("- {}: ok ({} steps)", switch.switch, switch.steps)
                    .green()
                    .to_string(),
            );
            continue;
        }
        out.push(
            format!(
                "- {}: {} of {} steps failed",
                switch.switch,
                switch.failures.len(),
                switch.steps
            )
            .red()
            .to_string(),
        );
        for failure in &switch.failures {
            out.push(format!("  {}: {}", failure.step, failure.error));
        }
    }
    if report.switches.is_empty() {
        out.push("- no switches".yellow().to_string());
    }
    out.join("\n")
}

/// Render the aggregated topology.
pub fn render_topology(topology: &Topology) -> String {
    let mut out = Vec::new();

    out.push("vlans".to_string());
    for (switch, ports) in &topology.vlans {
        for (port, vlans) in ports {
            let list: Vec<String> = vlans.iter().map(u16::to_string).collect();
            out.push(format!("- {switch} port {port}: {}", list.join(",")));
        }
    }

    out.push(String::new());
    out.push("mtu".to_string());
    for (switch, ports) in &topology.mtus {
        for (port, mtu) in ports {
            out.push(format!("- {switch} port {port}: {mtu}"));
        }
    }

    out.push(String::new());
    out.push("mlag".to_string());
    for pair in &topology.mlag_pairs {
        out.push(format!("- {} master={}", pair.domain(), pair.master).cyan().to_string());
        for side in &pair.sides {
            out.push(format!(
                "  {} vlan={} cidr={} peer_ip={} vip={}",
                side.switch,
                side.vlan,
                side.cidr.as_deref().unwrap_or("-"),
                side.peer_ip
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                side.vip
                    .map(|(ip, prefix)| format!("{ip}/{prefix}"))
                    .unwrap_or_else(|| "-".to_string())
            ));
        }
    }

    out.push(String::new());
    out.push("channel_groups".to_string());
    for group in &topology.channel_groups {
        let kind = if group.is_mlag() { "mlag" } else { "lag" };
        out.push(format!(
            "- bond={} template={} master={} ({kind})",
            group.bond, group.node_template, group.master_switch
        ));
        for port_group in group.port_groups() {
            let members: Vec<String> = port_group
                .members
                .iter()
                .map(|(switch, ports)| {
                    let ports: Vec<&str> = ports.iter().map(|p| p.as_str()).collect();
                    format!("{switch}[{}]", ports.join(","))
                })
                .collect();
            out.push(format!("  channel {}: {}", port_group.channel, members.join(" ")));
        }
    }
    out.join("\n")
}

/// Render the result of hardware validation.
pub fn render_validation(report: &ValidationReport) -> String {
    let mut out = Vec::new();
    for switch in &report.unreachable {
        out.push(format!("switch {switch} does not answer ping").yellow().to_string());
    }
    out.push(render_outcome(&report.ipmi));
    out.push(format!("verified bmcs: {}", report.verified_bmcs.len()));
    for (ip, userid) in &report.verified_bmcs {
        out.push(format!("- {ip} user={userid}").green().to_string());
    }
    for ip in &report.unverified_bmcs {
        out.push(format!("- {ip} unverified").red().to_string());
    }
    if let Some(pxe) = &report.pxe {
        out.push(render_outcome(pxe));
    }
    out.join("\n")
}

/// Render a MAC address table as `port mac` lines.
pub fn render_mac_table(table: &MacTable) -> String {
    let mut out = Vec::new();
    for (port, macs) in table {
        for mac in macs {
            out.push(format!("{port:<10} {mac}"));
        }
    }
    out.join("\n")
}
