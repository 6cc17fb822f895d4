//! # Core Type Definitions
//!
//! This module contains the types shared by every part of sshtm:
//! - Command results (`CommandOutput`)
//! - Sensor readings (`SensorValue`)
//! - Power requests (`Request`)
//! - Error types (`SshtmError`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

// =============================================================================
// COMMAND OUTPUT
// =============================================================================

/// Result of a command executed on the remote host.
///
/// Lines never contain carriage returns or newlines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// The command string that produced this output.
    pub command: String,
    /// Unix timestamp (seconds) of when the output was collected.
    pub timestamp: u64,
    /// Standard output, one entry per line.
    pub stdout: Vec<String>,
    /// Standard error, one entry per line.
    pub stderr: Vec<String>,
    /// Exit code reported by the remote side.
    pub code: i32,
}

impl CommandOutput {
    /// Create an output stamped with the current time.
    pub fn new(
        command: impl Into<String>,
        stdout: Vec<String>,
        stderr: Vec<String>,
        code: i32,
    ) -> Self {
        Self {
            command: command.into(),
            timestamp: unix_now(),
            stdout,
            stderr,
            code,
        }
    }

    /// Build an output from raw stream bytes, splitting them into lines.
    pub fn from_streams(
        command: impl Into<String>,
        stdout: &[u8],
        stderr: &[u8],
        code: i32,
    ) -> Self {
        Self::new(command, split_lines(stdout), split_lines(stderr), code)
    }

    /// True when the command exited with code 0.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Split raw bytes into lines, dropping line terminators.
pub fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|line| line.replace('\r', ""))
        .collect()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// SENSOR VALUES
// =============================================================================

/// A parsed sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SensorValue {
    /// Borrow the value as text, if it is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a boolean, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The value as a number, if it is one.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

// =============================================================================
// POWER REQUESTS
// =============================================================================

/// A pending power or connection request.
///
/// Requests expire after [`Request::timeout`] if the host never reaches the
/// expected state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    TurnOn,
    TurnOff,
    Restart,
    Connect,
}

impl Request {
    /// How long the request stays pending.
    #[must_use]
    pub const fn timeout(self) -> Duration {
        match self {
            Self::TurnOn => Duration::from_secs(60),
            Self::TurnOff | Self::Restart | Self::Connect => Duration::from_secs(30),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
            Self::Restart => "restart",
            Self::Connect => "connect",
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while managing a host.
///
/// - No silent failures
/// - Use `Result<T, SshtmError>` for fallible operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SshtmError {
    /// The host did not answer the ping, or the ping could not be run.
    #[error(
        "Host {host} is offline{}",
        .reason.as_ref().map(|r| format!(" ({r})")).unwrap_or_default()
    )]
    Offline { host: String, reason: Option<String> },

    /// The server key is not known and learning keys is disabled.
    #[error("SSH host key of {host} is unknown")]
    HostKeyUnknown { host: String },

    /// The server key does not match the stored one.
    #[error("SSH host key of {host} has changed")]
    HostKeyChanged { host: String },

    /// Credentials were rejected or could not be loaded.
    #[error("SSH authentication failed: {0}")]
    Authentication(String),

    /// The SSH connection could not be established.
    #[error("SSH connection failed: {0}")]
    Connect(String),

    /// A command could not be executed or its output could not be read.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// A command did not finish in time.
    #[error("Timeout during command ({}s)", .0.as_secs())]
    Timeout(Duration),

    /// `turn_off` was called but is not allowed for this host.
    #[error("Turning off is not allowed")]
    TurnOffNotAllowed,

    /// The collection has no action with this key.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// A command template references a variable with no value.
    #[error("Missing variable: {0}")]
    MissingVariable(String),

    /// Wake-on-LAN requested without a MAC address.
    #[error("No MAC address set")]
    MissingMacAddress,

    /// The MAC address could not be parsed.
    #[error("Invalid MAC address: {0}")]
    InvalidMacAddress(String),

    /// The configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl SshtmError {
    /// True for errors raised while executing a command (including timeouts).
    #[must_use]
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_) | Self::Timeout(_))
    }

    /// True for errors that need user action on credentials or host keys.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::HostKeyUnknown { .. } | Self::HostKeyChanged { .. } | Self::Authentication(_)
        )
    }
}

impl From<std::io::Error> for SshtmError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_from_streams_strips_terminators() {
        let output = CommandOutput::from_streams("ls", b"a\r\nb\n", b"", 0);
        assert_eq!(output.stdout, vec!["a", "b"]);
        assert!(output.stderr.is_empty());
        assert!(output.is_success());
    }

    #[test]
    fn request_timeouts() {
        assert_eq!(Request::TurnOn.timeout(), Duration::from_secs(60));
        assert_eq!(Request::TurnOff.timeout(), Duration::from_secs(30));
        assert_eq!(Request::Restart.timeout(), Duration::from_secs(30));
        assert_eq!(Request::Connect.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn offline_message_includes_reason() {
        let plain = SshtmError::Offline {
            host: "nas".to_string(),
            reason: None,
        };
        assert_eq!(plain.to_string(), "Host nas is offline");

        let with_reason = SshtmError::Offline {
            host: "nas".to_string(),
            reason: Some("Exit code: 2".to_string()),
        };
        assert_eq!(with_reason.to_string(), "Host nas is offline (Exit code: 2)");
    }

    #[test]
    fn error_classification() {
        assert!(SshtmError::Timeout(Duration::from_secs(5)).is_execution());
        assert!(SshtmError::Execution("x".into()).is_execution());
        assert!(!SshtmError::Connect("x".into()).is_execution());
        assert!(SshtmError::Authentication("x".into()).is_auth());
        assert!(
            SshtmError::HostKeyUnknown {
                host: "h".into()
            }
            .is_auth()
        );
    }

    #[test]
    fn sensor_value_display_and_accessors() {
        assert_eq!(SensorValue::Number(1.5).to_string(), "1.5");
        assert_eq!(SensorValue::Bool(true).to_string(), "true");
        assert_eq!(SensorValue::Text("eth0".into()).as_text(), Some("eth0"));
        assert_eq!(SensorValue::Text("eth0".into()).as_bool(), None);
        assert_eq!(SensorValue::Number(2.0).as_number(), Some(2.0));
    }
}
