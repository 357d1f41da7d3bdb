//! Range-aware VLAN lists as printed by switches (`1, 10-20, 25`).

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use thiserror::Error;

pub const MAX_VLAN: u16 = 4094;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid VLAN list entry '{0}'")]
pub struct ParseVlanError(pub String);

/// A set of VLAN IDs held as inclusive ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VlanSet {
    ranges: Vec<RangeInclusive<u16>>,
}

impl VlanSet {
    pub fn from_ids(ids: impl IntoIterator<Item = u16>) -> Self {
        let mut ids: Vec<u16> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();

        let mut ranges: Vec<RangeInclusive<u16>> = Vec::new();
        for id in ids {
            match ranges.last_mut() {
                Some(last) if *last.end() + 1 == id => *last = *last.start()..=id,
                _ => ranges.push(id..=id),
            }
        }
        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, vlan: u16) -> bool {
        self.ranges.iter().any(|r| r.contains(&vlan))
    }

    /// True when every VLAN of `other` is in `self`.
    pub fn contains_all(&self, other: &VlanSet) -> bool {
        other.iter().all(|v| self.contains(v))
    }

    /// True when no VLAN of `other` is in `self`.
    pub fn contains_none(&self, other: &VlanSet) -> bool {
        other.iter().all(|v| !self.contains(v))
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ranges.iter().flat_map(|r| r.clone())
    }
}

impl FromStr for VlanSet {
    type Err = ParseVlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "none" | "n/a" => return Ok(VlanSet::default()),
            "all" => {
                return Ok(VlanSet {
                    ranges: vec![1..=MAX_VLAN],
                })
            }
            _ => {}
        }

        let mut ids = Vec::new();
        for token in trimmed.split([',', ' ']).map(str::trim).filter(|t| !t.is_empty()) {
            let bad = || ParseVlanError(token.to_string());
            let (lo, hi) = match token.split_once('-') {
                Some((lo, hi)) => (lo.trim(), hi.trim()),
                None => (token, token),
            };
            let lo: u16 = lo.parse().map_err(|_| bad())?;
            let hi: u16 = hi.parse().map_err(|_| bad())?;
            if lo > hi {
                return Err(bad());
            }
            ids.extend(lo..=hi);
        }
        Ok(VlanSet::from_ids(ids))
    }
}

impl fmt::Display for VlanSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|r| {
                if r.start() == r.end() {
                    r.start().to_string()
                } else {
                    format!("{}-{}", r.start(), r.end())
                }
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}
