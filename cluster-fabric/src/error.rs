use switch_core::SwitchError;
use thiserror::Error;

use crate::config::ConfigLoadError;
use crate::exec::ExecutionError;
use crate::netns::ProbeError;
use crate::topology::TopologyError;

/// Errors surfaced by the cluster-level drivers.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The operation failed but the run can continue.
    #[error("{0}")]
    UserVisible(String),
    /// The run cannot continue.
    #[error("{0}")]
    UserCritical(String),
    /// Discovery ran out of rounds before the expected count was reached.
    #[error("timed out after {rounds} rounds with {found} of {expected} found")]
    TimeoutExceeded {
        rounds: u32,
        found: usize,
        expected: usize,
    },
    /// The operator chose to stop.
    #[error("terminated by operator")]
    Terminated,
    #[error(transparent)]
    Switch(#[from] SwitchError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Config(#[from] ConfigLoadError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

pub type Result<T, E = ClusterError> = std::result::Result<T, E>;
