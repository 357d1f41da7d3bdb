use anyhow::{Context, Result};
use cluster_fabric::report::render_topology;
use cluster_fabric::topology::TopologyAggregator;

use crate::cli::{GlobalArgs, OutputFormat, TopologyArgs};

pub fn run_topology(global: &GlobalArgs, args: TopologyArgs) -> Result<()> {
    let config = global.load()?;
    let topology = TopologyAggregator::new(&config)
        .aggregate()
        .with_context(|| format!("failed to aggregate topology of {}", global.config.display()))?;

    match args.format {
        OutputFormat::Text => println!("{}", render_topology(&topology)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&topology)?),
    }
    Ok(())
}
