//! BMC access: power control over IPMI and credential resolution.

pub mod ipmitool;
pub mod resolver;

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;

use crate::config::BmcCredentials;

pub use ipmitool::IpmiTool;
pub use resolver::{BmcCredentialResolver, Candidate, Resolution, ResolverSettings};

#[derive(Debug, Error)]
pub enum BmcError {
    #[error("connection to {0} failed: {1}")]
    ConnectionFailed(Ipv4Addr, String),
    #[error("authentication to {0} failed")]
    AuthenticationFailed(Ipv4Addr),
    #[error("command on {0} failed: {1}")]
    CommandFailed(Ipv4Addr, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    Unknown,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
            PowerState::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDevice {
    Pxe,
    Disk,
}

impl fmt::Display for BootDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootDevice::Pxe => write!(f, "pxe"),
            BootDevice::Disk => write!(f, "disk"),
        }
    }
}

/// Out-of-band operations on one BMC.
pub trait BmcClient: Send + Sync {
    fn power_status(
        &self,
        ip: Ipv4Addr,
        creds: &BmcCredentials,
        timeout: Duration,
    ) -> Result<PowerState, BmcError>;

    fn power_cycle(&self, ip: Ipv4Addr, creds: &BmcCredentials) -> Result<(), BmcError>;

    /// Cold-reset the management controller itself.
    fn reset(&self, ip: Ipv4Addr, creds: &BmcCredentials) -> Result<(), BmcError>;

    fn set_boot_device(
        &self,
        ip: Ipv4Addr,
        creds: &BmcCredentials,
        device: BootDevice,
    ) -> Result<(), BmcError>;
}
