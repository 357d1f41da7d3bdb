//! Bare-metal discovery and switch-fabric configuration for cluster bring-up.
//!
//! A deployer host sits on the management network of a rack. From a single
//! TOML description of the cluster it works out how every node is cabled,
//! configures the data and management switches to match, then finds the
//! nodes themselves: their BMCs on the IPMI network and their boot NICs on
//! the PXE network.
//!
//! # Architecture
//!
//! ## Configuration & Planning
//!
//! - [`config`]: Typed cluster configuration and cross-reference checks
//! - [`topology`]: Per-switch VLANs and MTUs, bonded channel groups, MLAG pairs
//! - [`catalog`]: One [`switch_core::Switch`] handle per configured switch
//!
//! ## Provisioning
//!
//! - [`provision`]: Concurrent per-switch configuration and hardware validation
//! - [`operator`]: Prompts and automatic answers for decisions mid-run
//!
//! ## Discovery
//!
//! - [`netns`]: Isolated network namespace probe with dnsmasq and tcpdump
//! - [`leases`]: dnsmasq lease file parsing
//! - [`capture`]: PXE requester detection from packet captures
//! - [`discovery`]: Scan rounds correlating MAC tables with leases and captures
//! - [`bmc`]: IPMI power control and credential resolution
//!
//! ## Utilities
//!
//! - [`exec`]: Host command execution behind a replaceable runner
//! - [`report`]: Terminal-friendly colored output
//! - [`error`]: Cluster-level error type
//!
//! # Flow
//!
//! ```text
//! cluster.toml ──► config ──► topology ──► provision ──► switches
//!                                │
//!                                └──► discovery ◄── netns, leases, capture
//!                                        │
//!                                        └──► bmc (credentials, power)
//! ```
//!
//! Switch dialects, sessions and command verification live in the
//! `switch-core` crate.

pub mod bmc;
pub mod capture;
pub mod catalog;
pub mod config;
pub mod discovery;
pub mod error;
pub mod exec;
pub mod leases;
pub mod netns;
pub mod operator;
pub mod provision;
pub mod report;
pub mod topology;

pub use catalog::SwitchCatalog;
pub use config::{load_config, parse_config, ClusterConfig, NetworkKind, PortRef};
pub use discovery::{DiscoveryEngine, DiscoveryOutcome, DiscoveryTable, ScanDecision};
pub use error::{ClusterError, Result};
pub use provision::{ClusterProvisioner, ProvisionReport, ValidationReport};
pub use topology::{Topology, TopologyAggregator};
