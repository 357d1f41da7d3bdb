//! Serialized, verified command sessions for data-center switches.

pub mod channel;
pub mod dialect;
pub mod error;
pub mod lock;
pub mod parse;
pub mod port;
pub mod session;
pub mod switch;
pub mod vlan;

pub use channel::{CommandChannel, SshChannel, SshTimeouts, TranscriptChannel};
pub use dialect::{build_switch, switch_classes, SwitchClass};
pub use error::{Result, SwitchError};
pub use lock::{DeviceLock, LockGuard, LockPolicy};
pub use parse::PortState;
pub use port::{canonical_port, port_suffix, slot_port};
pub use session::{SwitchMode, SwitchSession};
pub use switch::{
    AllowOp, CommandSet, Interface, LacpMode, MacFormat, MacTable, MlagConfig, MlagVip, PortMode,
    Switch,
};
pub use vlan::{ParseVlanError, VlanSet};
