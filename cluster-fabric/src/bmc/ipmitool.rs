//! [`BmcClient`] that shells out to `ipmitool -I lanplus`.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{BmcClient, BmcError, BootDevice, PowerState};
use crate::config::BmcCredentials;
use crate::exec::CommandRunner;

pub struct IpmiTool {
    runner: Arc<dyn CommandRunner>,
    default_timeout: Duration,
}

impl IpmiTool {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            default_timeout: Duration::from_secs(5),
        }
    }

    fn base_args(ip: Ipv4Addr, creds: &BmcCredentials, timeout: Duration) -> Vec<String> {
        vec![
            "ipmitool".to_string(),
            "-I".to_string(),
            "lanplus".to_string(),
            "-H".to_string(),
            ip.to_string(),
            "-U".to_string(),
            creds.userid.clone(),
            "-P".to_string(),
            creds.password.clone(),
            "-N".to_string(),
            timeout.as_secs().max(1).to_string(),
            "-R".to_string(),
            "1".to_string(),
        ]
    }

    fn execute(
        &self,
        ip: Ipv4Addr,
        creds: &BmcCredentials,
        timeout: Duration,
        command: &[&str],
    ) -> Result<String, BmcError> {
        let mut argv = Self::base_args(ip, creds, timeout);
        argv.extend(command.iter().map(|s| s.to_string()));
        let output = self
            .runner
            .run(&argv)
            .map_err(|e| BmcError::ConnectionFailed(ip, e.to_string()))?;
        if output.success() {
            return Ok(output.stdout);
        }
        debug!(%ip, status = output.status, stderr = %output.stderr.trim(), "ipmitool failed");
        let stderr = output.stderr.to_ascii_lowercase();
        if stderr.contains("unauthorized") || stderr.contains("password") {
            Err(BmcError::AuthenticationFailed(ip))
        } else if stderr.contains("unable to establish") || stderr.contains("timeout") {
            Err(BmcError::ConnectionFailed(ip, output.stderr.trim().to_string()))
        } else {
            Err(BmcError::CommandFailed(ip, output.stderr.trim().to_string()))
        }
    }
}

pub fn parse_power_status(output: &str) -> PowerState {
    if output.contains("is on") {
        PowerState::On
    } else if output.contains("is off") {
        PowerState::Off
    } else {
        PowerState::Unknown
    }
}

impl BmcClient for IpmiTool {
    fn power_status(
        &self,
        ip: Ipv4Addr,
        creds: &BmcCredentials,
        timeout: Duration,
    ) -> Result<PowerState, BmcError> {
        let output = self.execute(ip, creds, timeout, &["chassis", "power", "status"])?;
        Ok(parse_power_status(&output))
    }

    fn power_cycle(&self, ip: Ipv4Addr, creds: &BmcCredentials) -> Result<(), BmcError> {
        // `cycle` is refused when the chassis is off.
        let action = match self.power_status(ip, creds, self.default_timeout)? {
            PowerState::Off => "on",
            PowerState::On | PowerState::Unknown => "cycle",
        };
        self.execute(ip, creds, self.default_timeout, &["chassis", "power", action])?;
        Ok(())
    }

    fn reset(&self, ip: Ipv4Addr, creds: &BmcCredentials) -> Result<(), BmcError> {
        self.execute(ip, creds, self.default_timeout, &["mc", "reset", "cold"])?;
        Ok(())
    }

    fn set_boot_device(
        &self,
        ip: Ipv4Addr,
        creds: &BmcCredentials,
        device: BootDevice,
    ) -> Result<(), BmcError> {
        let device = device.to_string();
        self.execute(ip, creds, self.default_timeout, &["chassis", "bootdev", &device])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::{parse_power_status, IpmiTool};
    use crate::bmc::PowerState;
    use crate::config::BmcCredentials;

    #[test]
    fn power_status_text_maps_to_state() {
        assert_eq!(parse_power_status("Chassis Power is on\n"), PowerState::On);
        assert_eq!(parse_power_status("Chassis Power is off\n"), PowerState::Off);
        assert_eq!(parse_power_status(""), PowerState::Unknown);
    }

    #[test]
    fn base_args_use_lanplus_and_timeout() {
        let creds = BmcCredentials {
            userid: "ADMIN".to_string(),
            password: "secret".to_string(),
            bmc_type: "openbmc".to_string(),
        };
        let args =
            IpmiTool::base_args(Ipv4Addr::new(192, 168, 10, 3), &creds, Duration::from_secs(7));
        assert_eq!(&args[..5], &["ipmitool", "-I", "lanplus", "-H", "192.168.10.3"]);
        assert!(args.windows(2).any(|w| w == ["-N", "7"]));
    }
}
