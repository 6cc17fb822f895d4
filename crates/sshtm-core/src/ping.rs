//! # Ping Module
//!
//! Reachability check through the system `ping` binary.
//!
//! Unprivileged ICMP sockets are not available everywhere, the `ping`
//! binary is. The process gets one second more than the ping timeout
//! before it is killed.

use crate::SshtmError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Pings one host with a fixed timeout.
#[derive(Debug, Clone)]
pub struct Ping {
    host: String,
    timeout: Duration,
}

impl Ping {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Arguments passed to `ping` for this platform.
    pub fn args(&self) -> Vec<String> {
        let secs = self.timeout.as_secs().max(1);
        if cfg!(windows) {
            vec![
                "-n".into(),
                "1".into(),
                "-w".into(),
                (secs * 1000).to_string(),
                self.host.clone(),
            ]
        } else {
            vec![
                "-q".into(),
                "-c1".into(),
                format!("-W{secs}"),
                self.host.clone(),
            ]
        }
    }

    /// Ping once.
    ///
    /// Exit code 0 is online; 1 or a deadline miss is offline; anything
    /// else is reported as an offline error with the reason.
    pub async fn ping(&self) -> Result<(), SshtmError> {
        let child = Command::new("ping")
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.offline(Some(e.to_string())))?;

        let deadline = self.timeout + Duration::from_secs(1);
        let status = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => output.status,
            Ok(Err(e)) => return Err(self.offline(Some(e.to_string()))),
            Err(_) => {
                tracing::debug!("{}: ping deadline exceeded", self.host);
                return Err(self.offline(None));
            }
        };

        match status.code() {
            Some(0) => Ok(()),
            Some(1) => Err(self.offline(None)),
            Some(code) => Err(self.offline(Some(format!("Exit code: {code}")))),
            None => Err(self.offline(Some("Terminated by signal".to_string()))),
        }
    }

    fn offline(&self, reason: Option<String>) -> SshtmError {
        SshtmError::Offline {
            host: self.host.clone(),
            reason,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn unix_args() {
        let ping = Ping::new("10.0.0.2", Duration::from_secs(4));
        assert_eq!(ping.args(), vec!["-q", "-c1", "-W4", "10.0.0.2"]);
    }

    #[test]
    #[cfg(unix)]
    fn sub_second_timeout_rounds_up() {
        let ping = Ping::new("h", Duration::from_millis(200));
        assert_eq!(ping.args()[2], "-W1");
    }
}
