//! Matching discovered BMCs to configured credential sets.
//!
//! How many nodes use each credential set is known from template
//! cardinality; which address uses which is not. Each round tries every
//! unmatched BMC against the sets in descending order of remaining count, so
//! the likeliest set is tried first. A login only counts once the BMC also
//! reports a power state.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{BmcClient, PowerState};
use crate::config::{BmcCredentials, ClusterConfig};
use crate::error::{ClusterError, Result};

/// A credential set and how many more BMCs are expected to accept it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub creds: BmcCredentials,
    pub remaining: usize,
}

/// Candidate sets from the node templates. Templates sharing credentials
/// share one candidate.
pub fn candidates_from(config: &ClusterConfig) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::new();
    for template in &config.node_templates {
        let Some(creds) = &template.ipmi else {
            continue;
        };
        match out.iter_mut().find(|c| &c.creds == creds) {
            Some(existing) => existing.remaining += template.node_count(),
            None => out.push(Candidate {
                creds: creds.clone(),
                remaining: template.node_count(),
            }),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub rounds: u32,
    /// Per-attempt timeout in the first round.
    pub base_timeout: Duration,
    /// Added to the per-attempt timeout each round.
    pub timeout_step: Duration,
    /// Pause between rounds.
    pub round_delay: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            rounds: 5,
            base_timeout: Duration::from_secs(2),
            timeout_step: Duration::from_secs(2),
            round_delay: Duration::from_secs(5),
        }
    }
}

/// Verified access info plus whatever could not be matched.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub access: BTreeMap<Ipv4Addr, BmcCredentials>,
    pub unresolved: Vec<Ipv4Addr>,
}

impl Resolution {
    pub fn shortfall(&self) -> usize {
        self.unresolved.len()
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

pub struct BmcCredentialResolver<'a> {
    client: &'a dyn BmcClient,
    settings: ResolverSettings,
}

impl<'a> BmcCredentialResolver<'a> {
    pub fn new(client: &'a dyn BmcClient, settings: ResolverSettings) -> Self {
        Self { client, settings }
    }

    /// Match each address in `ips` to one of `candidates`.
    ///
    /// Incomplete coverage is returned in [`Resolution::unresolved`]. Having
    /// no candidates, or no BMC accepting any of them, is critical.
    pub fn resolve(&self, ips: &[Ipv4Addr], mut candidates: Vec<Candidate>) -> Result<Resolution> {
        if candidates.is_empty() {
            return Err(ClusterError::UserCritical(
                "no BMC credential sets configured".to_string(),
            ));
        }

        let mut resolution = Resolution::default();
        let mut pending: Vec<Ipv4Addr> = ips.to_vec();
        pending.sort_unstable();
        pending.dedup();

        for round in 0..self.settings.rounds {
            if pending.is_empty() {
                break;
            }
            candidates.sort_by(|a, b| b.remaining.cmp(&a.remaining));
            let timeout = self.settings.base_timeout + self.settings.timeout_step * round;
            debug!(round, ?timeout, pending = pending.len(), "bmc credential round");

            pending.retain(|&ip| match self.try_candidates(ip, &mut candidates, timeout) {
                Some(creds) => {
                    resolution.access.insert(ip, creds);
                    false
                }
                None => true,
            });

            if !pending.is_empty() && round + 1 < self.settings.rounds {
                thread::sleep(self.settings.round_delay);
            }
        }

        if resolution.access.is_empty() && !pending.is_empty() {
            return Err(ClusterError::UserCritical(format!(
                "none of {} BMCs accepted any configured credentials",
                pending.len()
            )));
        }
        if !pending.is_empty() {
            warn!(missing = pending.len(), "some BMCs could not be verified");
        }
        info!(verified = resolution.access.len(), "bmc credentials resolved");
        resolution.unresolved = pending;
        Ok(resolution)
    }

    fn try_candidates(
        &self,
        ip: Ipv4Addr,
        candidates: &mut [Candidate],
        timeout: Duration,
    ) -> Option<BmcCredentials> {
        for candidate in candidates.iter_mut() {
            match self.client.power_status(ip, &candidate.creds, timeout) {
                Ok(PowerState::On | PowerState::Off) => {
                    candidate.remaining = candidate.remaining.saturating_sub(1);
                    debug!(%ip, userid = %candidate.creds.userid, "bmc verified");
                    return Some(candidate.creds.clone());
                }
                Ok(PowerState::Unknown) => {
                    debug!(
                        %ip,
                        userid = %candidate.creds.userid,
                        "login accepted without power status"
                    );
                }
                Err(err) => debug!(%ip, %err, "bmc attempt failed"),
            }
        }
        None
    }
}
