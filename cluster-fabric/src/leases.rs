//! dnsmasq lease files.
//!
//! One lease per line: `<expiry> <mac> <ip> <hostname> <client-id>`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;

use switch_core::parse::normalize_mac;
use tracing::trace;

/// Normalized MAC to leased address.
pub type LeaseMap = BTreeMap<String, Ipv4Addr>;

pub fn parse_leases(text: &str) -> LeaseMap {
    let mut leases = LeaseMap::new();
    for line in text.lines() {
        let mut fields = line.split_whitespace().skip(1);
        let (Some(mac), Some(ip)) = (fields.next(), fields.next()) else {
            continue;
        };
        match (normalize_mac(mac), ip.parse::<Ipv4Addr>()) {
            (Some(mac), Ok(ip)) => {
                leases.insert(mac, ip);
            }
            _ => trace!(line, "skipping lease line"),
        }
    }
    leases
}

/// A lease file that does not exist yet holds no leases.
pub fn read_leases(path: &Path) -> io::Result<LeaseMap> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(parse_leases(&text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(LeaseMap::new()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::{parse_leases, read_leases};

    #[test]
    fn leases_are_keyed_by_normalized_mac() {
        let text = "1700000000 aa:bb:cc:dd:ee:01 192.168.10.4 * 01:aa:bb:cc:dd:ee:01\n\
                    1700000050 AA-BB-CC-DD-EE-02 192.168.10.5 bmc2 *\n\
                    garbage\n";
        let leases = parse_leases(text);
        assert_eq!(leases.len(), 2);
        assert_eq!(leases["AA:BB:CC:DD:EE:01"], Ipv4Addr::new(192, 168, 10, 4));
        assert_eq!(leases["AA:BB:CC:DD:EE:02"], Ipv4Addr::new(192, 168, 10, 5));
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let leases = read_leases(&dir.path().join("none.leases")).expect("read");
        assert!(leases.is_empty());
    }
}
