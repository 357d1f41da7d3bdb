use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cluster_fabric::bmc::{IpmiTool, ResolverSettings};
use cluster_fabric::discovery::{DiscoveryEngine, DiscoverySettings};
use cluster_fabric::exec::{CommandRunner, HostRunner};
use cluster_fabric::provision::{
    bmc_access_path, ipmi_table_path, load_bmc_access, load_ipmi_table, save_ipmi_table,
    ClusterProvisioner,
};
use cluster_fabric::report::{render_outcome, render_validation};

use crate::cli::{DiscoverArgs, GlobalArgs, NetworkArg, OutputFormat, ScanArgs, ValidateArgs};

fn discovery_settings(args: &ScanArgs) -> DiscoverySettings {
    DiscoverySettings {
        rounds: args.rounds,
        interval: Duration::from_secs(args.interval),
        ..DiscoverySettings::default()
    }
}

/// A standalone PXE pass power-cycles the BMCs saved by the last validation
/// and finds missing nodes' BMCs through the last IPMI scan.
pub fn run_discover(global: &GlobalArgs, args: DiscoverArgs) -> Result<()> {
    let config = global.load()?;
    let catalog = global.catalog(&config)?;
    let runner: Arc<dyn CommandRunner> = Arc::new(HostRunner);
    let bmc = IpmiTool::new(runner.clone());
    let mut operator = global.operator(false);
    let access = load_bmc_access(&bmc_access_path(&config))?;

    let engine = DiscoveryEngine::new(
        &config,
        &catalog,
        runner,
        &bmc,
        discovery_settings(&args.scan),
    );
    let outcome = match args.network {
        NetworkArg::Ipmi => {
            let outcome = engine.discover_ipmi(operator.as_mut(), &access)?;
            save_ipmi_table(&ipmi_table_path(&config), &outcome.table)?;
            outcome
        }
        NetworkArg::Pxe => {
            let ipmi = load_ipmi_table(&ipmi_table_path(&config))?;
            engine.discover_pxe(operator.as_mut(), &ipmi, &access)?
        }
    };

    match args.format {
        OutputFormat::Text => println!("{}", render_outcome(&outcome)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
    }
    Ok(())
}

pub fn run_validate(global: &GlobalArgs, args: ValidateArgs) -> Result<()> {
    let config = global.load()?;
    let catalog = global.catalog(&config)?;
    let provisioner = ClusterProvisioner::new(&config, &catalog)?;
    let runner: Arc<dyn CommandRunner> = Arc::new(HostRunner);
    let bmc = IpmiTool::new(runner.clone());
    let mut operator = global.operator(false);

    let resolver = ResolverSettings {
        rounds: args.bmc_rounds,
        ..ResolverSettings::default()
    };
    let report = provisioner.validate_hardware(
        operator.as_mut(),
        runner,
        &bmc,
        discovery_settings(&args.scan),
        resolver,
    )?;

    match args.format {
        OutputFormat::Text => println!("{}", render_validation(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
