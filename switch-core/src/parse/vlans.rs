use std::collections::BTreeSet;

/// VLAN IDs listed in the first column of a `show vlan` table.
pub fn parse_vlan_ids(text: &str) -> BTreeSet<u16> {
    text.lines()
        .filter_map(|line| {
            let first = line.split_whitespace().next()?;
            first.parse::<u16>().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::parse_vlan_ids;

    #[test]
    fn reads_leading_ids_only() {
        let text = "\
VLAN    Name        Ports
----    ----------  -----------------
1       default     Eth1/1, Eth1/2
20                  Eth1/5
1000    storage     Eth1/20
";
        let ids = parse_vlan_ids(text);
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1, 20, 1000]);
    }
}
