use anyhow::{bail, Context, Result};
use cluster_fabric::provision::{ClusterProvisioner, ProvisionReport};
use cluster_fabric::report::{render_mac_table, render_provision};
use switch_core::MacFormat;

use crate::cli::{DeconfigArgs, GlobalArgs, MacTableArgs};

pub fn run_config_data(global: &GlobalArgs) -> Result<()> {
    let config = global.load()?;
    let catalog = global.catalog(&config)?;
    let provisioner = ClusterProvisioner::new(&config, &catalog)?;
    finish(&provisioner.configure_data_switches())
}

pub fn run_deconfig_data(global: &GlobalArgs, args: DeconfigArgs) -> Result<()> {
    let config = global.load()?;
    let catalog = global.catalog(&config)?;
    let provisioner = ClusterProvisioner::new(&config, &catalog)?;
    let mut operator = global.operator(args.yes);
    let report = provisioner.deconfigure_data_switches(operator.as_mut())?;
    finish(&report)
}

pub fn run_config_mgmt(global: &GlobalArgs) -> Result<()> {
    let config = global.load()?;
    let catalog = global.catalog(&config)?;
    let provisioner = ClusterProvisioner::new(&config, &catalog)?;
    finish(&provisioner.configure_mgmt_switches())
}

pub fn run_mac_table(global: &GlobalArgs, args: MacTableArgs) -> Result<()> {
    let config = global.load()?;
    let catalog = global.catalog(&config)?;
    let switch = catalog
        .get(&args.switch)
        .with_context(|| format!("switch '{}' is not configured", args.switch))?;
    let format = if args.raw { MacFormat::Raw } else { MacFormat::Std };
    let table = switch
        .show_mac_address_table(format)
        .with_context(|| format!("failed to read mac table of {}", args.switch))?;
    println!("{}", render_mac_table(&table));
    Ok(())
}

fn finish(report: &ProvisionReport) -> Result<()> {
    println!("{}", render_provision(report));
    if !report.is_clean() {
        bail!("{}: {} step(s) failed", report.action, report.failures());
    }
    Ok(())
}
