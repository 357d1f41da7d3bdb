//! MAC address table parsing.
//!
//! Vendors lay the table out differently but always print a header row with
//! a `Port`/`Ports` column and a dashed separator row underneath. The port
//! column's extent is taken from the dash run under the header label, and
//! each data row's port is read from that extent. MAC tokens are found
//! anywhere in the row, in either IEEE 802 (`00:1a:2b:3c:4d:5e`,
//! `00-1A-...`) or Cisco dotted-quad (`001a.2b3c.4d5e`) form.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::port::canonical_port;

fn mac_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:[0-9a-f]{2}[:.\-]){5}[0-9a-f]{2}\b|\b(?:[0-9a-f]{4}\.){2}[0-9a-f]{4}\b",
        )
        .expect("valid MAC regex")
    })
}

fn port_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bports?\b").expect("valid header regex"))
}

/// Normalize a MAC token to colon-delimited uppercase hex pairs.
///
/// Returns `None` when the token does not hold exactly 12 hex digits.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    let separators_ok = raw
        .chars()
        .all(|c| c.is_ascii_hexdigit() || matches!(c, ':' | '.' | '-'));
    if hex.len() != 12 || !separators_ok {
        return None;
    }
    let upper = hex.to_ascii_uppercase();
    let pairs: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
    Some(pairs.join(":"))
}

/// Parse a rendered MAC address table into `port -> [mac]`.
///
/// Ports are canonicalized with [`canonical_port`]. With `normalize` set,
/// MACs are rewritten by [`normalize_mac`]; otherwise they are kept exactly
/// as printed.
pub fn parse_mac_table(text: &str, normalize: bool) -> BTreeMap<String, Vec<String>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut table: BTreeMap<String, Vec<String>> = BTreeMap::new();

    let Some((header_idx, label_at)) = lines.iter().enumerate().find_map(|(idx, line)| {
        port_header_regex()
            .find(line)
            .filter(|_| !mac_regex().is_match(line))
            .map(|m| (idx, m.start()))
    }) else {
        return table;
    };

    let mut data_start = header_idx + 1;
    let mut column: Option<Range<usize>> = None;
    if let Some((sep_idx, sep)) = lines
        .iter()
        .enumerate()
        .skip(header_idx + 1)
        .find(|(_, line)| is_separator(line))
    {
        column = column_for(&dash_runs(sep), label_at);
        data_start = sep_idx + 1;
    }

    for line in &lines[data_start..] {
        let Some(mac) = mac_regex().find(line) else {
            continue;
        };
        let Some(port) = port_cell(line, column.as_ref(), label_at) else {
            continue;
        };
        let mac = if normalize {
            match normalize_mac(mac.as_str()) {
                Some(mac) => mac,
                None => continue,
            }
        } else {
            mac.as_str().to_string()
        };
        table.entry(canonical_port(&port)).or_default().push(mac);
    }

    table
}

fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.matches('-').count() >= 3 && trimmed.chars().all(|c| matches!(c, '-' | '+' | ' '))
}

fn dash_runs(line: &str) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = None;
    for (idx, ch) in line.char_indices() {
        match (ch == '-', start) {
            (true, None) => start = Some(idx),
            (false, Some(s)) => {
                runs.push(s..idx);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push(s..line.len());
    }
    runs
}

fn column_for(runs: &[Range<usize>], label_at: usize) -> Option<Range<usize>> {
    runs.iter()
        .find(|r| r.contains(&label_at))
        .or_else(|| runs.iter().find(|r| r.start >= label_at))
        .or_else(|| runs.last())
        .cloned()
}

fn port_cell(line: &str, column: Option<&Range<usize>>, label_at: usize) -> Option<String> {
    let start = column.map_or(label_at, |c| c.start);
    if start >= line.len() {
        return None;
    }
    let end = column.map_or(line.len(), |c| c.end.min(line.len()));
    let cell = line
        .get(start..end)
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .or_else(|| line.get(start..))?;
    cell.split_whitespace().next().map(str::to_string)
}
