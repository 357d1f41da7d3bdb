//! Host command execution.
//!
//! Everything that shells out (namespace plumbing, dnsmasq, tcpdump,
//! ipmitool, ping) goes through a [`CommandRunner`].

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{trace, warn};

/// How long a child gets to exit after SIGTERM before SIGKILL.
const REAP_POLLS: u32 = 40;
const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[derive(Debug)]
pub struct CommandFailureInfo {
    pub command: String,
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for CommandFailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command [{}] failed with status {}",
            self.command, self.status
        )?;
        write!(f, "  stdout: {}", self.stdout.trim_end())?;
        write!(f, "  stderr: {}", self.stderr.trim_end())
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to start [{command}]: {err}")]
    ExecutionStart { command: String, err: std::io::Error },
    #[error("{0}")]
    CommandFailure(Box<CommandFailureInfo>),
    #[error("failed to signal pid {pid}: {errno}")]
    Signal { pid: i32, errno: Errno },
    #[error("failed to wait for pid {pid}: {errno}")]
    Wait { pid: i32, errno: Errno },
}

/// A background process started by [`CommandRunner::spawn`].
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: i32,
    pub command: String,
}

pub fn command_line(argv: &[String]) -> String {
    argv.join(" ")
}

/// Runs commands on the host.
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit status is returned, not raised.
    fn run(&self, argv: &[String]) -> Result<CommandOutput, ExecutionError>;

    /// Start without waiting, optionally sending stdout to `stdout`.
    fn spawn(&self, argv: &[String], stdout: Option<&Path>)
        -> Result<ProcessHandle, ExecutionError>;

    /// Send SIGTERM to `pid` and reap it if it is our child.
    fn terminate(&self, pid: i32) -> Result<(), ExecutionError>;

    /// Run to completion and fail on a non-zero exit status.
    fn run_checked(&self, argv: &[String]) -> Result<CommandOutput, ExecutionError> {
        let output = self.run(argv)?;
        if !output.success() {
            return Err(ExecutionError::CommandFailure(Box::new(
                CommandFailureInfo {
                    command: command_line(argv),
                    status: output.status,
                    stdout: output.stdout,
                    stderr: output.stderr,
                },
            )));
        }
        Ok(output)
    }
}

/// [`CommandRunner`] backed by `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

fn split(argv: &[String]) -> Result<(&String, &[String]), ExecutionError> {
    argv.split_first()
        .ok_or_else(|| ExecutionError::ExecutionStart {
            command: String::new(),
            err: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })
}

impl CommandRunner for HostRunner {
    fn run(&self, argv: &[String]) -> Result<CommandOutput, ExecutionError> {
        let (program, args) = split(argv)?;
        trace!(command = %command_line(argv), "run");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| ExecutionError::ExecutionStart {
                command: command_line(argv),
                err,
            })?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status.code().unwrap_or(-1),
        })
    }

    fn spawn(
        &self,
        argv: &[String],
        stdout: Option<&Path>,
    ) -> Result<ProcessHandle, ExecutionError> {
        let (program, args) = split(argv)?;
        let start_err = |err| ExecutionError::ExecutionStart {
            command: command_line(argv),
            err,
        };
        let out = match stdout {
            Some(path) => Stdio::from(File::create(path).map_err(start_err)?),
            None => Stdio::null(),
        };
        trace!(command = %command_line(argv), "spawn");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(out)
            .stderr(Stdio::null())
            .spawn()
            .map_err(start_err)?;
        Ok(ProcessHandle {
            pid: child.id() as i32,
            command: command_line(argv),
        })
    }

    fn terminate(&self, pid: i32) -> Result<(), ExecutionError> {
        signal(pid, Signal::SIGTERM)?;
        reap(pid)
    }
}

fn signal(pid: i32, sig: Signal) -> Result<(), ExecutionError> {
    match kill(Pid::from_raw(pid), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(ExecutionError::Signal { pid, errno }),
    }
}

/// Collect a signalled child so it does not linger as a zombie. Processes
/// that are not our children (ECHILD) are left to their own parent.
fn reap(pid: i32) -> Result<(), ExecutionError> {
    let target = Pid::from_raw(pid);
    for _ in 0..REAP_POLLS {
        match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => thread::sleep(REAP_INTERVAL),
            Ok(_) | Err(Errno::ECHILD) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(ExecutionError::Wait { pid, errno }),
        }
    }
    warn!(pid, "still running after SIGTERM; killing");
    signal(pid, Signal::SIGKILL)?;
    match waitpid(target, None) {
        Ok(_) | Err(Errno::ECHILD) => Ok(()),
        Err(errno) => Err(ExecutionError::Wait { pid, errno }),
    }
}

/// Build an argv from string literals.
#[macro_export]
macro_rules! argv {
    ($($arg:expr),* $(,)?) => {
        vec![$($arg.to_string()),*]
    };
}
