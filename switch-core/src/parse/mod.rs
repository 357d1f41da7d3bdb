//! Parsers for switch-rendered CLI tables.

pub mod mac_table;
pub mod port_channel;
pub mod switchport;
pub mod vlans;

pub use mac_table::{normalize_mac, parse_mac_table};
pub use port_channel::parse_channel_summary;
pub use switchport::{parse_switchport_blocks, parse_switchport_table, PortState};
pub use vlans::parse_vlan_ids;
