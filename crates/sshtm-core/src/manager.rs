//! # Manager Module
//!
//! The manager owns a [`Terminal`], a [`Collection`] and the host [`State`],
//! and keeps them consistent:
//!
//! ```text
//!   update()
//!     │
//!     ├─ connected? ──► run due sensor commands ──► ok: done
//!     │                                         └─► execution error: fall through
//!     ├─ ping ──────────► offline: reset sensors, drop session
//!     ├─ connect ───────► auth error: latch state.error
//!     └─ run due sensor commands
//! ```
//!
//! In disconnect mode the manager holds no session between commands: every
//! command connects first and disconnects afterwards.

use crate::collection::{ActionKey, Collection, SensorKey};
use crate::command::{Command, Variables};
use crate::state::{State, StateSnapshot};
use crate::terminal::Terminal;
use crate::{CommandOutput, Request, Sensor, SensorValue, SshTerminal, SshtmError, wol};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// Command used to probe a connection when no sensor command is due.
const TEST_COMMAND: &str = "echo ''";

const SENSOR_CHANNEL_CAPACITY: usize = 64;

/// Manager driving a real SSH session.
pub type SshManager = Manager<SshTerminal>;

// =============================================================================
// OPTIONS
// =============================================================================

/// Behavior options of a [`Manager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Display name, defaults to the host.
    pub name: Option<String>,
    pub command_timeout: Duration,
    pub allow_turn_off: bool,
    pub disconnect_mode: bool,
    /// MAC address for Wake-on-LAN, overrides the `mac_address` sensor.
    pub mac_address: Option<String>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            name: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            allow_turn_off: false,
            disconnect_mode: false,
            mac_address: None,
        }
    }
}

/// Flags for [`Manager::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Run every sensor command, due or not.
    pub force: bool,
    /// Run only sensor commands that never ran.
    pub once: bool,
    /// Run a test command when no sensor command is due.
    pub test: bool,
    /// Return offline / connect / execution errors instead of swallowing them.
    pub raise_errors: bool,
}

/// A sensor value change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorUpdate {
    pub key: String,
    pub value: Option<SensorValue>,
}

// =============================================================================
// MANAGER
// =============================================================================

/// Keeps host state, sensors and the terminal session in sync.
pub struct Manager<T: Terminal> {
    name: String,
    terminal: T,
    collection: Collection,
    state: State,
    command_timeout: Duration,
    allow_turn_off: bool,
    disconnect_mode: bool,
    mac_address: Option<String>,
    sensor_tx: broadcast::Sender<SensorUpdate>,
}

impl<T: Terminal> Manager<T> {
    pub fn new(terminal: T, options: ManagerOptions, collection: Collection) -> Self {
        let name = options.name.unwrap_or_else(|| terminal.host().to_string());
        let (sensor_tx, _rx) = broadcast::channel(SENSOR_CHANNEL_CAPACITY);

        Self {
            state: State::new(name.clone()),
            name,
            terminal,
            collection,
            command_timeout: options.command_timeout,
            allow_turn_off: options.allow_turn_off,
            disconnect_mode: options.disconnect_mode,
            mac_address: options.mac_address,
            sensor_tx,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        self.terminal.host()
    }

    pub fn state(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut T {
        &mut self.terminal
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn allow_turn_off(&self) -> bool {
        self.allow_turn_off
    }

    pub fn disconnect_mode(&self) -> bool {
        self.disconnect_mode
    }

    /// Receive a snapshot on every state change.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.state.subscribe()
    }

    /// Receive every sensor value change.
    pub fn subscribe_sensors(&self) -> broadcast::Receiver<SensorUpdate> {
        self.sensor_tx.subscribe()
    }

    /// The host is usable: connected, or in disconnect mode online and not
    /// waiting for a connection after power-on.
    pub fn is_up(&self) -> bool {
        if self.disconnect_mode {
            return self.state.online() && self.state.request() != Some(Request::Connect);
        }
        self.state.connected()
    }

    pub fn is_down(&self) -> bool {
        !self.state.online()
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self.state.request(), Some(Request::TurnOff | Request::Restart))
    }

    pub fn sensor(&self, key: &str) -> Option<&Sensor> {
        self.collection.sensor(key)
    }

    fn last_known_text(&self, key: &str) -> Option<String> {
        self.sensor(key)
            .and_then(Sensor::last_known_value)
            .and_then(SensorValue::as_text)
            .map(str::to_string)
    }

    pub fn hostname(&self) -> Option<String> {
        self.last_known_text(SensorKey::HOSTNAME)
    }

    /// Explicit MAC address, else the last one reported by the host.
    pub fn mac_address(&self) -> Option<String> {
        self.mac_address
            .clone()
            .or_else(|| self.last_known_text(SensorKey::MAC_ADDRESS))
    }

    pub fn set_mac_address(&mut self, mac_address: Option<String>) {
        self.mac_address = mac_address;
    }

    pub fn wol_support(&self) -> Option<bool> {
        self.sensor(SensorKey::WOL_SUPPORT)
            .and_then(Sensor::last_known_value)
            .and_then(SensorValue::as_bool)
    }

    pub fn os_name(&self) -> Option<String> {
        self.last_known_text(SensorKey::OS_NAME)
    }

    pub fn os_version(&self) -> Option<String> {
        self.last_known_text(SensorKey::OS_VERSION)
    }

    pub fn machine_type(&self) -> Option<String> {
        self.last_known_text(SensorKey::MACHINE_TYPE)
    }

    // =========================================================================
    // CONNECTION
    // =========================================================================

    /// Ping the host and update `online`.
    ///
    /// Errors: `Offline`.
    pub async fn ping(&mut self) -> Result<(), SshtmError> {
        match self.terminal.ping().await {
            Ok(()) => {
                if self.state.request() == Some(Request::TurnOn) {
                    self.state.set_request(Some(Request::Connect));
                }
                self.state.set_online(true);
                Ok(())
            }
            Err(e) => {
                tracing::debug!("{}: ping failed: {}", self.name, e);
                if self.state.connected() {
                    self.disconnect().await;
                }
                if self.state.online() {
                    self.reset_commands();
                }
                match self.state.request() {
                    Some(Request::TurnOff) => self.state.set_request(None),
                    Some(Request::Restart) => self.state.set_request(Some(Request::TurnOn)),
                    _ => {}
                }
                self.state.set_online(false);

                Err(match e {
                    SshtmError::Offline { .. } => e,
                    other => SshtmError::Offline {
                        host: self.host().to_string(),
                        reason: Some(other.to_string()),
                    },
                })
            }
        }
    }

    /// Open the session. Does nothing when already connected.
    ///
    /// Errors: `HostKeyUnknown`, `HostKeyChanged`, `Authentication`, `Connect`.
    pub async fn connect(&mut self) -> Result<(), SshtmError> {
        if self.state.connected() {
            return Ok(());
        }
        if !self.state.online() {
            return Err(SshtmError::Connect("Host is offline".to_string()));
        }
        if self.is_shutting_down() {
            return Err(SshtmError::Connect("Host is shutting down".to_string()));
        }

        match self.terminal.connect().await {
            Ok(()) => {
                if self.state.request() == Some(Request::Connect) {
                    self.state.set_request(None);
                }
                self.state.set_connected(true);
                self.state.set_error(false);
                Ok(())
            }
            Err(e) if e.is_auth() => {
                tracing::warn!("{}: {}", self.name, e);
                self.reset_commands();
                self.state.set_error(true);
                Err(e)
            }
            Err(e) => {
                tracing::debug!("{}: {}", self.name, e);
                self.reset_commands();
                Err(match e {
                    SshtmError::Connect(_) => e,
                    other => SshtmError::Connect(other.to_string()),
                })
            }
        }
    }

    /// Close the session. Does nothing when not connected.
    pub async fn disconnect(&mut self) {
        if !self.state.connected() {
            return;
        }
        self.terminal.disconnect().await;
        self.state.set_connected(false);
    }

    /// Disconnect and forget that the host was online.
    pub async fn close(&mut self) {
        self.disconnect().await;
        self.state.set_online(false);
    }

    pub async fn load_host_keys(&mut self) -> Result<(), SshtmError> {
        self.terminal.load_host_keys().await
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Execute a raw command string.
    ///
    /// Execution errors (other than timeouts) drop the session and reset all
    /// sensors. Errors: `Execution`, `Timeout`.
    pub async fn execute_command_string(
        &mut self,
        string: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, SshtmError> {
        if self.disconnect_mode {
            if let Err(e) = self.connect().await {
                return Err(SshtmError::Execution(format!("Failed to connect: {e}")));
            }
        }
        if !self.state.connected() {
            return Err(SshtmError::Execution("Not connected".to_string()));
        }

        let timeout = timeout.unwrap_or(self.command_timeout);
        tracing::debug!("{}: execute {:?}", self.name, string);
        let result = self.terminal.execute(string, timeout).await;

        match result {
            Ok(output) => {
                if self.disconnect_mode {
                    self.disconnect().await;
                }
                Ok(output)
            }
            Err(e @ SshtmError::Timeout(_)) => {
                tracing::debug!("{}: {}", self.name, e);
                if self.disconnect_mode {
                    self.disconnect().await;
                }
                Err(e)
            }
            Err(e) => {
                tracing::debug!("{}: {}", self.name, e);
                self.disconnect().await;
                self.reset_commands();
                Err(match e {
                    SshtmError::Execution(_) => e,
                    other => SshtmError::Execution(other.to_string()),
                })
            }
        }
    }

    /// Render a command template and execute it.
    ///
    /// Placeholders are filled from `variables`, then from the last known
    /// sensor values (keyed by sensor key).
    pub async fn execute_command(
        &mut self,
        command: &Command,
        variables: &Variables,
    ) -> Result<CommandOutput, SshtmError> {
        let mut all = self.sensor_variables();
        all.extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        let string = command.render(&all)?;
        self.execute_command_string(&string, command.timeout).await
    }

    /// Execute the sensor command at `index` and feed its sensors.
    pub async fn execute_sensor_command(
        &mut self,
        index: usize,
    ) -> Result<CommandOutput, SshtmError> {
        let command = self
            .collection
            .sensor_commands
            .get(index)
            .map(|c| c.command.clone())
            .ok_or_else(|| SshtmError::Execution(format!("No sensor command at index {index}")))?;

        let output = self.execute_command(&command, &Variables::new()).await?;

        if let Some(sensor_command) = self.collection.sensor_commands.get_mut(index) {
            let changed = sensor_command.apply(&output, Instant::now());
            self.publish(&changed);
        }
        Ok(output)
    }

    /// Mark every sensor unknown so that all sensor commands run again.
    pub fn reset_commands(&mut self) {
        let changed: Vec<String> = self
            .collection
            .sensor_commands
            .iter_mut()
            .flat_map(|c| c.reset())
            .collect();
        self.publish(&changed);
    }

    fn sensor_variables(&self) -> Variables {
        self.collection
            .sensors()
            .filter_map(|s| s.last_known_value().map(|v| (s.key.clone(), v.to_string())))
            .collect()
    }

    fn publish(&self, keys: &[String]) {
        for key in keys {
            let value = self.sensor(key).and_then(|s| s.value().cloned());
            // No receivers is fine.
            let _ = self.sensor_tx.send(SensorUpdate {
                key: key.clone(),
                value,
            });
        }
    }

    // =========================================================================
    // UPDATE
    // =========================================================================

    /// Refresh state and run due sensor commands.
    ///
    /// Auth errors are always returned; offline, connect and execution errors
    /// only with `raise_errors`.
    pub async fn update(&mut self, options: UpdateOptions) -> Result<(), SshtmError> {
        self.state.expire_request();

        if self.state.connected() && !self.disconnect_mode {
            match self
                .update_commands(options.force, options.once, options.test, true)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_execution() => {}
                Err(e) => return Err(e),
            }
        }

        if let Err(e) = self.ping().await {
            return if options.raise_errors { Err(e) } else { Ok(()) };
        }

        if !self.disconnect_mode {
            match self.connect().await {
                Ok(()) => {}
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => return if options.raise_errors { Err(e) } else { Ok(()) },
            }
        }

        self.update_commands(
            options.force,
            options.once,
            options.test && !self.disconnect_mode,
            options.raise_errors,
        )
        .await
    }

    async fn update_commands(
        &mut self,
        force: bool,
        once: bool,
        test: bool,
        raise_errors: bool,
    ) -> Result<(), SshtmError> {
        let now = Instant::now();
        let due: Vec<usize> = self
            .collection
            .sensor_commands
            .iter()
            .enumerate()
            .filter(|(_, c)| c.should_update(force, once, now))
            .map(|(i, _)| i)
            .collect();

        let mut error = None;

        for &index in &due {
            match self.execute_sensor_command(index).await {
                Ok(_) => {}
                Err(e) if e.is_execution() => {
                    error = Some(e);
                    break;
                }
                Err(e) => tracing::warn!("{}: sensor command skipped: {}", self.name, e),
            }
        }

        if due.is_empty() && test {
            if let Err(e) = self.execute_command_string(TEST_COMMAND, None).await {
                error = Some(e);
            }
        }

        match error {
            Some(e) if raise_errors => Err(e),
            Some(e) => {
                tracing::debug!("{}: update failed: {}", self.name, e);
                Ok(())
            }
            None => Ok(()),
        }
    }

    // =========================================================================
    // ACTIONS & POWER
    // =========================================================================

    /// Run an action command by key.
    ///
    /// Errors: `UnknownAction`, `MissingVariable`, `Execution` (also for a
    /// non-zero exit code), `Timeout`.
    pub async fn run_action(
        &mut self,
        key: &str,
        variables: &Variables,
    ) -> Result<CommandOutput, SshtmError> {
        let action = self
            .collection
            .action(key)
            .cloned()
            .ok_or_else(|| SshtmError::UnknownAction(key.to_string()))?;

        let output = self.execute_command(&action.command, variables).await?;
        if !output.is_success() {
            return Err(SshtmError::Execution(format!(
                "Action {key} exited with code {}",
                output.code
            )));
        }
        Ok(output)
    }

    /// Wake the host with a magic packet. Does nothing when online.
    ///
    /// Errors: `MissingMacAddress`, `InvalidMacAddress`, `Io`.
    pub async fn turn_on(&mut self) -> Result<(), SshtmError> {
        if self.state.online() {
            return Ok(());
        }
        let mac = self.mac_address().ok_or(SshtmError::MissingMacAddress)?;
        wol::send_magic_packet(&mac).await?;
        tracing::debug!("{}: Magic packet sent to {}", self.name, mac);
        self.state.set_request(Some(Request::TurnOn));
        Ok(())
    }

    /// Run the `turn_off` action.
    ///
    /// Errors: `TurnOffNotAllowed`, plus those of [`Self::run_action`].
    pub async fn turn_off(&mut self) -> Result<CommandOutput, SshtmError> {
        if !self.allow_turn_off {
            return Err(SshtmError::TurnOffNotAllowed);
        }
        let output = self.run_action(ActionKey::TURN_OFF, &Variables::new()).await?;
        self.disconnect().await;
        self.state.set_request(Some(Request::TurnOff));
        Ok(output)
    }

    /// Run the `restart` action.
    pub async fn restart(&mut self) -> Result<CommandOutput, SshtmError> {
        let output = self.run_action(ActionKey::RESTART, &Variables::new()).await?;
        self.disconnect().await;
        self.state.set_request(Some(Request::Restart));
        Ok(output)
    }
}

impl SshManager {
    /// Manager for `host` with password login and the Linux collection.
    pub fn with_password(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut options = crate::SshOptions::new(host);
        options.username = Some(username.into());
        options.password = Some(password.into());
        Self::new(
            SshTerminal::new(options),
            ManagerOptions::default(),
            Collection::linux(),
        )
    }
}
