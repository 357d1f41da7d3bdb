use anyhow::{Context, Result};
use clap::Parser;
use cluster_fabric::catalog::SwitchCatalog;
use cluster_fabric::config::{load_config, ClusterConfig};
use cluster_fabric::operator::{AutoOperator, Operator, TerminalOperator};
use switch_core::{switch_classes, SwitchMode};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

mod cli;
mod discover_cmd;
mod switch_cmd;
mod topology_cmd;

use cli::{Cli, Command, GlobalArgs};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    match cli.command {
        Command::Topology(args) => topology_cmd::run_topology(&cli.global, args),
        Command::ConfigDataSwitches => switch_cmd::run_config_data(&cli.global),
        Command::DeconfigDataSwitches(args) => switch_cmd::run_deconfig_data(&cli.global, args),
        Command::ConfigMgmtSwitches => switch_cmd::run_config_mgmt(&cli.global),
        Command::Discover(args) => discover_cmd::run_discover(&cli.global, args),
        Command::Validate(args) => discover_cmd::run_validate(&cli.global, args),
        Command::MacTable(args) => switch_cmd::run_mac_table(&cli.global, args),
        Command::SwitchClasses => {
            for class in switch_classes() {
                println!("{class}");
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

impl GlobalArgs {
    /// The configuration with command-line overrides applied.
    pub fn load(&self) -> Result<ClusterConfig> {
        let mut config = load_config(&self.config)?;
        if let Some(dir) = &self.transcript_dir {
            config.deployer.transcript_dir = dir.clone();
        }
        if let Some(dir) = &self.state_dir {
            config.deployer.state_dir = dir.clone();
        }
        if self.passive {
            for switch in &mut config.switches {
                switch.mode = SwitchMode::Passive;
            }
        }
        Ok(config)
    }

    pub fn catalog(&self, config: &ClusterConfig) -> Result<SwitchCatalog> {
        SwitchCatalog::from_config(config).context("failed to open switch sessions")
    }

    pub fn operator(&self, assume_yes: bool) -> Box<dyn Operator> {
        if self.non_interactive {
            Box::new(AutoOperator { assume_yes })
        } else {
            Box::new(TerminalOperator::stdio())
        }
    }
}
