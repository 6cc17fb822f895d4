//! # Terminal Trait
//!
//! The boundary between the manager's state machine and the transport.
//!
//! The manager never talks to the network directly; it drives a `Terminal`.
//! [`SshTerminal`](crate::SshTerminal) is the production implementation.

use crate::{CommandOutput, SshtmError};
use async_trait::async_trait;
use std::time::Duration;

/// Transport used by a [`Manager`](crate::Manager).
#[async_trait]
pub trait Terminal: Send {
    /// Address of the remote host.
    fn host(&self) -> &str;

    /// Check reachability. Returns `SshtmError::Offline` when the host is down.
    async fn ping(&mut self) -> Result<(), SshtmError>;

    /// Open a session.
    ///
    /// Errors: `HostKeyUnknown`, `HostKeyChanged`, `Authentication`, `Connect`.
    async fn connect(&mut self) -> Result<(), SshtmError>;

    /// Close the session. Never fails.
    async fn disconnect(&mut self);

    /// Run a command string.
    ///
    /// Errors: `Execution`, `Timeout`.
    async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SshtmError>;

    /// (Re)load known host keys from disk.
    async fn load_host_keys(&mut self) -> Result<(), SshtmError>;
}
