//! Transports that carry CLI text to a switch.

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::Session;
use tracing::debug;

use crate::error::{Result, SwitchError};
use crate::lock::resolve_host;

/// Something that can execute one CLI string on a switch and return its output.
pub trait CommandChannel: Send + Sync {
    fn exec(&self, command: &str) -> Result<String>;

    /// Whether commands reach a live device. Verification is skipped when false.
    fn is_live(&self) -> bool {
        true
    }
}

/// Timeouts applied to SSH connections.
#[derive(Debug, Clone)]
pub struct SshTimeouts {
    pub connect: Duration,
    pub io: Duration,
}

impl Default for SshTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            io: Duration::from_secs(30),
        }
    }
}

/// Password-authenticated SSH exec channel. One connection per command.
#[derive(Debug, Clone)]
pub struct SshChannel {
    host: String,
    port: u16,
    userid: String,
    password: String,
    timeouts: SshTimeouts,
}

impl SshChannel {
    pub fn new(host: &str, userid: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port: 22,
            userid: userid.to_string(),
            password: password.to_string(),
            timeouts: SshTimeouts::default(),
        }
    }

    fn ssh_err(&self, source: ssh2::Error) -> SwitchError {
        SwitchError::Ssh {
            host: self.host.clone(),
            source,
        }
    }

    fn connect(&self) -> Result<Session> {
        let addr = SocketAddr::new(resolve_host(&self.host)?, self.port);
        let tcp = TcpStream::connect_timeout(&addr, self.timeouts.connect)?;
        tcp.set_read_timeout(Some(self.timeouts.io))?;
        tcp.set_write_timeout(Some(self.timeouts.io))?;

        let mut session = Session::new().map_err(|e| self.ssh_err(e))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| self.ssh_err(e))?;
        session.set_timeout(self.timeouts.io.as_millis() as u32);
        session
            .userauth_password(&self.userid, &self.password)
            .map_err(|e| self.ssh_err(e))?;
        if !session.authenticated() {
            return Err(SwitchError::CommandFailed {
                host: self.host.clone(),
                status: -1,
                output: "authentication failed".to_string(),
            });
        }
        Ok(session)
    }
}

impl CommandChannel for SshChannel {
    fn exec(&self, command: &str) -> Result<String> {
        let session = self.connect()?;
        let mut channel = session.channel_session().map_err(|e| self.ssh_err(e))?;
        channel.exec(command).map_err(|e| self.ssh_err(e))?;

        let mut output = String::new();
        channel.read_to_string(&mut output)?;
        channel.send_eof().map_err(|e| self.ssh_err(e))?;
        channel.wait_close().map_err(|e| self.ssh_err(e))?;
        let status = channel.exit_status().map_err(|e| self.ssh_err(e))?;
        session
            .disconnect(None, "done", None)
            .map_err(|e| self.ssh_err(e))?;

        debug!(host = %self.host, status, "ssh command complete");
        if status != 0 {
            return Err(SwitchError::CommandFailed {
                host: self.host.clone(),
                status,
                output,
            });
        }
        Ok(output)
    }
}

/// Passive-mode channel: commands are appended to a file for an operator to
/// apply out of band. Nothing is sent anywhere and every read returns empty.
#[derive(Debug, Clone)]
pub struct TranscriptChannel {
    path: PathBuf,
}

impl TranscriptChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CommandChannel for TranscriptChannel {
    fn exec(&self, command: &str) -> Result<String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{command}")?;
        Ok(String::new())
    }

    fn is_live(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{CommandChannel, TranscriptChannel};

    #[test]
    fn transcript_appends_each_command_on_its_own_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let channel = TranscriptChannel::new(dir.path().join("sw1.cmds"));
        assert_eq!(channel.exec("vlan 10").expect("exec"), "");
        channel.exec("no vlan 10").expect("exec");

        let written = fs::read_to_string(channel.path()).expect("read transcript");
        assert_eq!(written, "vlan 10\nno vlan 10\n");
        assert!(!channel.is_live());
    }
}
