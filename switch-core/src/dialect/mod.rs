//! Vendor dialect registry.
//!
//! Each dialect registers a [`SwitchClass`] with `inventory::submit!`; a
//! configured class string is matched case-insensitively against the
//! registered names and aliases.

pub mod cisco;
pub mod mellanox;

use crate::error::{Result, SwitchError};
use crate::session::SwitchSession;
use crate::switch::Switch;

/// A constructible switch class.
pub struct SwitchClass {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub build: fn(SwitchSession) -> Box<dyn Switch>,
}

impl SwitchClass {
    fn matches(&self, class: &str) -> bool {
        self.name.eq_ignore_ascii_case(class)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(class))
    }
}

inventory::collect!(SwitchClass);

/// Construct the dialect registered for `class` around `session`.
pub fn build_switch(class: &str, session: SwitchSession) -> Result<Box<dyn Switch>> {
    let class = class.trim();
    inventory::iter::<SwitchClass>
        .into_iter()
        .find(|c| c.matches(class))
        .map(|c| (c.build)(session))
        .ok_or_else(|| SwitchError::UnknownClass(class.to_string()))
}

/// Registered class names, sorted.
pub fn switch_classes() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = inventory::iter::<SwitchClass>
        .into_iter()
        .map(|c| c.name)
        .collect();
    names.sort_unstable();
    names
}
