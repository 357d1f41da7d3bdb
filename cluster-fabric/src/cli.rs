use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "cluster-fabric")]
#[command(about = "Discover bare-metal nodes and configure the switch fabric")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
pub struct GlobalArgs {
    /// Cluster configuration file.
    #[arg(short, long, global = true, default_value = "cluster.toml")]
    pub config: PathBuf,
    /// More log output; repeat for debug and trace. RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    /// Never prompt; destructive steps need --yes.
    #[arg(long, global = true)]
    pub non_interactive: bool,
    /// Write switch commands to transcripts instead of connecting.
    #[arg(long, global = true)]
    pub passive: bool,
    /// Override `deployer.transcript_dir`.
    #[arg(long, global = true)]
    pub transcript_dir: Option<PathBuf>,
    /// Override `deployer.state_dir`.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Show the VLAN, MTU, MLAG and channel-group plan derived from the config.
    Topology(TopologyArgs),
    /// Apply MLAG, VLANs, MTUs and channel groups to the data switches.
    ConfigDataSwitches,
    /// Remove what config-data-switches applied.
    DeconfigDataSwitches(DeconfigArgs),
    /// Put IPMI and PXE ports of the management switches on their VLANs.
    ConfigMgmtSwitches,
    /// Run one discovery pass on a client network.
    Discover(DiscoverArgs),
    /// Ping switches, find BMCs, verify credentials and watch nodes PXE boot.
    Validate(ValidateArgs),
    /// Print the MAC address table of one switch.
    MacTable(MacTableArgs),
    /// List the switch classes this build understands.
    SwitchClasses,
}

#[derive(Parser, Debug)]
pub struct TopologyArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct DeconfigArgs {
    /// Answer yes to MLAG teardown prompts.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Debug)]
pub struct ScanArgs {
    /// Scan rounds before asking how to proceed.
    #[arg(long, default_value_t = 25)]
    pub rounds: u32,
    /// Seconds between rounds.
    #[arg(long, default_value_t = 5)]
    pub interval: u64,
}

#[derive(Parser, Debug)]
pub struct DiscoverArgs {
    #[arg(long, value_enum)]
    pub network: NetworkArg,
    #[command(flatten)]
    pub scan: ScanArgs,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub scan: ScanArgs,
    /// Credential rounds per BMC.
    #[arg(long, default_value_t = 5)]
    pub bmc_rounds: u32,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct MacTableArgs {
    /// Switch label.
    pub switch: String,
    /// Keep MACs as the switch printed them.
    #[arg(long)]
    pub raw: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum NetworkArg {
    Ipmi,
    Pxe,
}
