//! Cross-process device lock.
//!
//! Every configuration session against one physical switch takes an
//! exclusive `flock(2)` on `<dir>/switch<ip>.lock`, where `<ip>` is the
//! resolved management address. Two labels pointing at the same device
//! therefore share a lock, and independent processes driving the same
//! cluster serialize against each other. The lock is released when the
//! [`LockGuard`] is dropped, on every exit path.

use std::fs::{self, File, OpenOptions};
use std::net::{IpAddr, ToSocketAddrs};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, trace};

use crate::error::{Result, SwitchError};

/// Retry and settle behaviour for device locks.
#[derive(Debug, Clone)]
pub struct LockPolicy {
    /// Directory holding the lock files.
    pub dir: PathBuf,
    /// Acquisition attempts before giving up with [`SwitchError::LockTimeout`].
    pub attempts: u32,
    /// Sleep between failed attempts.
    pub retry_delay: Duration,
    /// Upper bound of the random delay the lock is held for after a batch.
    pub settle_max: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("switch-locks"),
            attempts: 5,
            retry_delay: Duration::from_millis(200),
            settle_max: Duration::from_millis(500),
        }
    }
}

/// A named lock for one switch, keyed by its resolved address.
#[derive(Debug, Clone)]
pub struct DeviceLock {
    host: String,
    path: PathBuf,
}

impl DeviceLock {
    /// Resolve `host` and derive the lock file path under `dir`.
    pub fn for_host(host: &str, dir: &Path) -> Result<Self> {
        let addr = resolve_host(host)?;
        Ok(Self {
            host: host.to_string(),
            path: dir.join(format!("switch{addr}.lock")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock, retrying up to `attempts` times.
    pub fn acquire(&self, attempts: u32, retry_delay: Duration) -> Result<LockGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .mode(0o666)
            .open(&self.path)?;

        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => {
                    trace!(path = %self.path.display(), attempt, "device lock acquired");
                    return Ok(LockGuard {
                        _flock: flock,
                        path: self.path.clone(),
                    });
                }
                Err((returned, Errno::EWOULDBLOCK)) => {
                    file = returned;
                    debug!(host = %self.host, attempt, "device lock busy");
                    if attempt < attempts {
                        thread::sleep(retry_delay);
                    }
                }
                Err((_, errno)) => return Err(SwitchError::Io(errno.into())),
            }
        }

        Err(SwitchError::LockTimeout {
            host: self.host.clone(),
            attempts,
        })
    }
}

/// Held device lock. Dropping it releases the `flock`.
#[derive(Debug)]
pub struct LockGuard {
    _flock: Flock<File>,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        trace!(path = %self.path.display(), "device lock released");
    }
}

/// Resolve a management host name, preferring IPv4.
pub fn resolve_host(host: &str) -> Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs: Vec<IpAddr> = (host, 0)
        .to_socket_addrs()
        .map_err(|_| SwitchError::Resolve(host.to_string()))?
        .map(|sa| sa.ip())
        .collect();
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| SwitchError::Resolve(host.to_string()))
}
