use std::fmt;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::channel::{CommandChannel, SshChannel, TranscriptChannel};
use crate::error::Result;
use crate::lock::{DeviceLock, LockPolicy};

/// How a switch is driven during a provisioning run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchMode {
    /// Commands are sent over SSH and their effect is verified.
    #[default]
    Active,
    /// Commands are written to a transcript for out-of-band application.
    Passive,
}

impl fmt::Display for SwitchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchMode::Active => f.write_str("active"),
            SwitchMode::Passive => f.write_str("passive"),
        }
    }
}

/// One command session per physical switch.
///
/// Owns its connection parameters and lock handle. All I/O to the device
/// goes through [`SwitchSession::send_batch`], which holds the device lock
/// for the whole batch plus a short random settle delay.
pub struct SwitchSession {
    label: String,
    host: String,
    mode: SwitchMode,
    channel: Box<dyn CommandChannel>,
    lock: Option<DeviceLock>,
    policy: LockPolicy,
}

impl fmt::Debug for SwitchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchSession")
            .field("label", &self.label)
            .field("host", &self.host)
            .field("mode", &self.mode)
            .finish()
    }
}

impl SwitchSession {
    /// Active session over SSH.
    pub fn active(
        label: &str,
        host: &str,
        userid: &str,
        password: &str,
        policy: LockPolicy,
    ) -> Result<Self> {
        let channel = SshChannel::new(host, userid, password);
        Self::with_channel(label, host, SwitchMode::Active, Box::new(channel), policy)
    }

    /// Passive session writing commands to `transcript`.
    pub fn passive(label: &str, host: &str, transcript: impl Into<PathBuf>) -> Self {
        Self {
            label: label.to_string(),
            host: host.to_string(),
            mode: SwitchMode::Passive,
            channel: Box::new(TranscriptChannel::new(transcript)),
            lock: None,
            policy: LockPolicy::default(),
        }
    }

    /// Session over an arbitrary channel. Active sessions resolve `host`
    /// to locate their device lock.
    pub fn with_channel(
        label: &str,
        host: &str,
        mode: SwitchMode,
        channel: Box<dyn CommandChannel>,
        policy: LockPolicy,
    ) -> Result<Self> {
        let lock = match mode {
            SwitchMode::Active => Some(DeviceLock::for_host(host, &policy.dir)?),
            SwitchMode::Passive => None,
        };
        Ok(Self {
            label: label.to_string(),
            host: host.to_string(),
            mode,
            channel,
            lock,
            policy,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn mode(&self) -> SwitchMode {
        self.mode
    }

    /// True when reads come back from a live device and can be used to
    /// verify a mutation.
    pub fn verifies(&self) -> bool {
        self.mode == SwitchMode::Active && self.channel.is_live()
    }

    /// Send one command and return its raw output.
    pub fn send(&self, command: &str) -> Result<String> {
        let mut out = self.send_batch(&[command.to_string()])?;
        Ok(out.pop().unwrap_or_default())
    }

    /// Send commands back to back under a single acquisition of the device
    /// lock. No other session on the same device can interleave.
    pub fn send_batch(&self, commands: &[String]) -> Result<Vec<String>> {
        let Some(lock) = &self.lock else {
            return commands.iter().map(|c| self.channel.exec(c)).collect();
        };

        let _guard = lock.acquire(self.policy.attempts, self.policy.retry_delay)?;
        let mut outputs = Vec::with_capacity(commands.len());
        for command in commands {
            trace!(switch = %self.label, %command, "send");
            outputs.push(self.channel.exec(command)?);
        }

        let settle = settle_delay(self.policy.settle_max);
        if !settle.is_zero() {
            debug!(switch = %self.label, ?settle, "holding lock to settle");
            thread::sleep(settle);
        }
        Ok(outputs)
    }
}

fn settle_delay(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{settle_delay, SwitchMode, SwitchSession};

    #[test]
    fn settle_delay_stays_within_bound() {
        for _ in 0..50 {
            assert!(settle_delay(Duration::from_millis(20)) <= Duration::from_millis(20));
        }
        assert_eq!(settle_delay(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn passive_session_never_verifies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = SwitchSession::passive("sw1", "192.0.2.1", dir.path().join("sw1.cmds"));
        assert_eq!(session.mode(), SwitchMode::Passive);
        assert!(!session.verifies());
        assert_eq!(session.send("show vlan").expect("send"), "");
    }
}
