use thiserror::Error;

/// Errors raised by switch sessions and the verified primitives built on them.
#[derive(Debug, Error)]
pub enum SwitchError {
    /// Another session (possibly in another process) held the device lock
    /// for every acquisition attempt.
    #[error("timed out acquiring lock for switch {host} after {attempts} attempts")]
    LockTimeout { host: String, attempts: u32 },
    /// A mutating command was sent but the switch state read back afterwards
    /// does not reflect it.
    #[error("switch {switch}: {message}")]
    Config { switch: String, message: String },
    /// No dialect is registered under the requested class string.
    #[error("no switch class registered for '{0}'")]
    UnknownClass(String),
    /// The dialect has no command for this operation.
    #[error("switch class '{class}' does not support {operation}")]
    Unsupported {
        class: &'static str,
        operation: &'static str,
    },
    /// The management host name did not resolve to an address.
    #[error("failed to resolve switch host {0}")]
    Resolve(String),
    #[error("ssh error talking to {host}: {source}")]
    Ssh { host: String, source: ssh2::Error },
    #[error("command failed on {host} (exit {status}): {output}")]
    CommandFailed {
        host: String,
        status: i32,
        output: String,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwitchError {
    pub(crate) fn config(switch: &str, message: impl Into<String>) -> Self {
        SwitchError::Config {
            switch: switch.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = SwitchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::SwitchError;

    #[test]
    fn lock_timeout_names_host_and_attempts() {
        let err = SwitchError::LockTimeout {
            host: "10.0.0.4".to_string(),
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "timed out acquiring lock for switch 10.0.0.4 after 5 attempts"
        );
    }
}
