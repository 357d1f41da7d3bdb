//! One switch handle per configured switch.

use std::collections::BTreeMap;

use switch_core::{build_switch, LockPolicy, Switch, SwitchError, SwitchMode, SwitchSession};
use tracing::debug;

use crate::config::{ClusterConfig, SwitchRole};

pub struct CatalogEntry {
    pub role: SwitchRole,
    pub switch: Box<dyn Switch>,
}

/// Switches keyed by label.
#[derive(Default)]
pub struct SwitchCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl SwitchCatalog {
    /// Open a session for every configured switch. Passive switches write to
    /// `<transcript_dir>/<label>.cmds`.
    pub fn from_config(config: &ClusterConfig) -> Result<Self, SwitchError> {
        let policy = LockPolicy {
            dir: config.deployer.lock_dir.clone(),
            ..LockPolicy::default()
        };
        Self::with_policy(config, policy)
    }

    pub fn with_policy(config: &ClusterConfig, policy: LockPolicy) -> Result<Self, SwitchError> {
        let mut catalog = Self::default();
        for def in &config.switches {
            let session = match def.mode {
                SwitchMode::Active => SwitchSession::active(
                    &def.label,
                    &def.ip,
                    &def.userid,
                    &def.password,
                    policy.clone(),
                )?,
                SwitchMode::Passive => SwitchSession::passive(
                    &def.label,
                    &def.ip,
                    config
                        .deployer
                        .transcript_dir
                        .join(format!("{}.cmds", def.label)),
                ),
            };
            debug!(
                switch = %def.label,
                class = %def.class,
                mode = %def.mode,
                "switch session opened"
            );
            catalog.insert(def.role, build_switch(&def.class, session)?);
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, role: SwitchRole, switch: Box<dyn Switch>) {
        self.entries
            .insert(switch.label().to_string(), CatalogEntry { role, switch });
    }

    pub fn get(&self, label: &str) -> Option<&dyn Switch> {
        self.entries.get(label).map(|e| e.switch.as_ref())
    }

    pub fn with_role(&self, role: SwitchRole) -> impl Iterator<Item = &dyn Switch> {
        self.entries
            .values()
            .filter(move |e| e.role == role)
            .map(|e| e.switch.as_ref())
    }

    pub fn data(&self) -> impl Iterator<Item = &dyn Switch> {
        self.with_role(SwitchRole::Data)
    }

    pub fn mgmt(&self) -> impl Iterator<Item = &dyn Switch> {
        self.with_role(SwitchRole::Mgmt)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
