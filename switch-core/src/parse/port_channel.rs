use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::port::canonical_port;

fn group_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s+M?Po\d+").expect("valid group regex"))
}

fn member_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(Eth[\w/]+?)\(").expect("valid member regex"))
}

/// Parse a port-channel (or MLAG port-channel) summary into
/// `channel -> [member port]`.
///
/// Member lists that wrap onto continuation lines are attached to the
/// preceding group.
pub fn parse_channel_summary(text: &str) -> BTreeMap<u32, Vec<String>> {
    let mut channels: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    let mut last: Option<u32> = None;

    for line in text.lines() {
        if let Some(caps) = group_regex().captures(line) {
            last = caps[1].parse().ok();
            if let Some(group) = last {
                channels.entry(group).or_default();
            }
        } else if !line.starts_with(char::is_whitespace) {
            last = None;
        }
        let Some(group) = last else {
            continue;
        };
        let members = channels.entry(group).or_default();
        for caps in member_regex().captures_iter(line) {
            members.push(canonical_port(&caps[1]));
        }
    }
    channels
}

#[cfg(test)]
mod tests {
    use super::parse_channel_summary;

    #[test]
    fn groups_members_including_wrapped_lines() {
        let text = "\
Flags: D - Down, U - Up, P - Up in port-channel (members)
Group Port-Channel        Type      Member Ports
------------------------------------------------------------------
1     Po1(U)              LACP      Eth1/1(P)    Eth1/2(P)
5     Po5(SU)             LACP      Eth1/5(P)    Eth1/6(D)
                                    Eth1/7(P)
12    Mpo12(U)            LACP      Eth1/12(P)
";
        let channels = parse_channel_summary(text);
        assert_eq!(channels[&1], vec!["1", "2"]);
        assert_eq!(channels[&5], vec!["5", "6", "7"]);
        assert_eq!(channels[&12], vec!["12"]);
    }
}
