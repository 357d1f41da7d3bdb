//! Port identifier helpers.
//!
//! Configuration files name ports as bare numbers (`12`) or with an
//! interface prefix (`eth1/12`); switch output prints them as `Eth1/12`.
//! [`canonical_port`] folds all of these to one key.

/// Fold an ethernet port identifier to its canonical key.
///
/// Strips an `Ethernet`/`Eth`/`E` prefix and a leading `1/` chassis slot.
/// Non-ethernet names such as `Po5` or `Mpo5` are returned unchanged.
pub fn canonical_port(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    let mut rest = trimmed;
    for prefix in ["ethernet", "eth", "e"] {
        if lower.starts_with(prefix)
            && lower[prefix.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit() || c == ' ')
        {
            rest = trimmed[prefix.len()..].trim_start();
            break;
        }
    }

    match rest.strip_prefix("1/") {
        Some(tail) if !tail.contains('/') && !tail.is_empty() => tail.to_string(),
        _ => rest.to_string(),
    }
}

/// Integer after the last `/` of a port identifier (`eth1/12` → 12, `7` → 7).
pub fn port_suffix(port: &str) -> Option<u32> {
    let tail = port.rsplit('/').next().unwrap_or(port);
    let digits: String = tail
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// The `slot/port` form dialects use inside `interface ethernet ...`.
pub fn slot_port(port: &str) -> String {
    let canonical = canonical_port(port);
    if canonical.contains('/') {
        canonical
    } else {
        format!("1/{canonical}")
    }
}
