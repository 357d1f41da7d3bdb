//! PXE requester detection from `tcpdump -xx` output.
//!
//! Each captured frame is printed as a header line followed by indented
//! `0xOFFS:  hhhh hhhh ...` rows. The BOOTP message inside a frame is found
//! through the DHCP magic cookie, which sits 236 bytes into the message, and
//! is then decoded as a real DHCP packet.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use dhcproto::v4::{DhcpOption, Message, Opcode, OptionCode};
use dhcproto::Decodable;
use tracing::trace;

const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
const COOKIE_OFFSET: usize = 236;
const BOOTFILE_NAME: u8 = 0x43;
const PXE_CONFIG_FILE: u8 = 0xd1;

/// Frames of a hex dump, in capture order.
pub fn parse_hex_dump(text: &str) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    for line in text.lines() {
        let indented = line.starts_with(char::is_whitespace);
        let row = line.trim_start().strip_prefix("0x").and_then(|r| r.split_once(':'));
        match row {
            Some((_, data)) if indented => {
                for group in data.split_whitespace().take(8) {
                    if group.len() % 2 != 0 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
                        break;
                    }
                    current.extend(
                        (0..group.len())
                            .step_by(2)
                            .filter_map(|i| u8::from_str_radix(&group[i..i + 2], 16).ok()),
                    );
                }
            }
            _ => {
                if !current.is_empty() {
                    frames.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        frames.push(current);
    }
    frames
}

/// The DHCP message carried by `frame`, if any.
pub fn bootp_message(frame: &[u8]) -> Option<Message> {
    let cookie_at = frame
        .windows(MAGIC_COOKIE.len())
        .position(|w| w == MAGIC_COOKIE)?;
    let start = cookie_at.checked_sub(COOKIE_OFFSET)?;
    match Message::from_bytes(&frame[start..]) {
        Ok(message) => Some(message),
        Err(err) => {
            trace!(%err, "undecodable BOOTP payload");
            None
        }
    }
}

/// A client request asking for a parameter list and naming a boot file or
/// PXE config file, either in that list or as an option.
pub fn is_pxe_request(message: &Message) -> bool {
    if message.opcode() != Opcode::BootRequest {
        return false;
    }
    let Some(DhcpOption::ParameterRequestList(requested)) =
        message.opts().get(OptionCode::ParameterRequestList)
    else {
        return false;
    };
    [BOOTFILE_NAME, PXE_CONFIG_FILE].into_iter().any(|code| {
        let code = OptionCode::from(code);
        requested.contains(&code) || message.opts().get(code).is_some()
    })
}

fn client_mac(message: &Message) -> Option<String> {
    let bytes = message.chaddr().get(..6)?;
    Some(
        bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// MACs of PXE-booting clients in order of their first qualifying request.
pub fn pxe_requesters(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    parse_hex_dump(text)
        .iter()
        .filter_map(|frame| bootp_message(frame))
        .filter(is_pxe_request)
        .filter_map(|message| client_mac(&message))
        .filter(|mac| seen.insert(mac.clone()))
        .collect()
}

/// A capture file that tcpdump has not created yet holds nothing.
pub fn read_pxe_requesters(path: &Path) -> io::Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(pxe_requesters(&text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Write;
    use std::net::Ipv4Addr;

    use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, OptionCode};
    use dhcproto::Encodable;
    use pretty_assertions::assert_eq;

    use super::{parse_hex_dump, pxe_requesters};

    const MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

    fn request(requested: Vec<OptionCode>, opcode: Opcode) -> Vec<u8> {
        let unspecified = Ipv4Addr::UNSPECIFIED;
        let mut msg = Message::new(unspecified, unspecified, unspecified, unspecified, &MAC);
        msg.set_opcode(opcode);
        msg.opts_mut()
            .insert(DhcpOption::MessageType(MessageType::Discover));
        msg.opts_mut()
            .insert(DhcpOption::ParameterRequestList(requested));
        let payload = msg.to_vec().expect("encode");

        // Ethernet, IPv4 and UDP headers.
        let mut frame = vec![0xff; 6];
        frame.extend_from_slice(&MAC);
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend(std::iter::repeat(0).take(28));
        frame.extend(payload);
        frame
    }

    fn dump(frames: &[Vec<u8>]) -> String {
        let mut out = String::new();
        for frame in frames {
            writeln!(
                out,
                "12:00:00.000000 aa:bb:cc:dd:ee:ff > ff:ff:ff:ff:ff:ff, ethertype IPv4 (0x0800), length {}:",
                frame.len()
            )
            .expect("write");
            for (row, chunk) in frame.chunks(16).enumerate() {
                let groups: Vec<String> = chunk
                    .chunks(2)
                    .map(|pair| pair.iter().map(|b| format!("{b:02x}")).collect())
                    .collect();
                writeln!(out, "\t0x{:04x}:  {}", row * 16, groups.join(" ")).expect("write");
            }
        }
        out
    }

    #[test]
    fn hex_rows_are_grouped_into_frames() {
        let text = "hdr one\n\t0x0000:  0102 0304\n\t0x0010:  05\nhdr two\n\t0x0000:  ff\n";
        assert_eq!(
            parse_hex_dump(text),
            vec![vec![1, 2, 3, 4, 5], vec![0xff]]
        );
    }

    #[test]
    fn boot_file_request_marks_a_pxe_client() {
        let frame = request(
            vec![OptionCode::SubnetMask, OptionCode::Router, OptionCode::BootfileName],
            Opcode::BootRequest,
        );
        assert_eq!(pxe_requesters(&dump(&[frame])), vec!["AA:BB:CC:DD:EE:FF"]);
    }

    #[test]
    fn plain_dhcp_client_is_not_pxe() {
        let frame = request(
            vec![OptionCode::SubnetMask, OptionCode::Router],
            Opcode::BootRequest,
        );
        assert!(pxe_requesters(&dump(&[frame])).is_empty());
    }

    #[test]
    fn pxe_config_file_option_counts() {
        let frame = request(
            vec![OptionCode::SubnetMask, OptionCode::from(0xd1)],
            Opcode::BootRequest,
        );
        assert_eq!(pxe_requesters(&dump(&[frame])).len(), 1);
    }

    #[test]
    fn replies_and_repeats_are_ignored() {
        let pxe = vec![OptionCode::SubnetMask, OptionCode::BootfileName];
        let frames = [
            request(pxe.clone(), Opcode::BootReply),
            request(pxe.clone(), Opcode::BootRequest),
            request(pxe, Opcode::BootRequest),
        ];
        assert_eq!(pxe_requesters(&dump(&frames)), vec!["AA:BB:CC:DD:EE:FF"]);
    }
}
