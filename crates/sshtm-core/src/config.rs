//! # Configuration
//!
//! Hosts and custom collections are read from a TOML file:
//!
//! ```toml
//! [[hosts]]
//! host = "nas.local"
//! username = "admin"
//! key_filename = "/home/me/.ssh/id_ed25519"
//! allow_turn_off = true
//! collection = "nas"
//!
//! [[collections]]
//! name = "nas"
//!
//! [[collections.sensors]]
//! string = "hostname"
//! sensors = [{ key = "hostname" }]
//! ```
//!
//! Durations are written in seconds.

use crate::collection::Collection;
use crate::manager::{DEFAULT_COMMAND_TIMEOUT, Manager, ManagerOptions, SshManager};
use crate::ssh::{DEFAULT_PING_TIMEOUT, DEFAULT_PORT, DEFAULT_SSH_TIMEOUT, SshOptions, SshTerminal};
use crate::SshtmError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_COLLECTION: &str = "linux";

// =============================================================================
// SERDE HELPERS
// =============================================================================

/// `Duration` as whole seconds.
pub mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// `Option<Duration>` as whole seconds.
pub mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_secs))
    }
}

// =============================================================================
// HOST CONFIG
// =============================================================================

/// One managed host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub host: String,
    pub name: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub key_filename: Option<PathBuf>,
    pub host_keys_filename: Option<PathBuf>,
    pub add_host_keys: bool,
    pub load_system_host_keys: bool,
    pub invoke_shell: bool,
    #[serde(with = "secs")]
    pub ssh_timeout: Duration,
    #[serde(with = "secs")]
    pub ping_timeout: Duration,
    #[serde(with = "secs")]
    pub command_timeout: Duration,
    pub allow_turn_off: bool,
    pub disconnect_mode: bool,
    pub mac_address: Option<String>,
    /// Name of a custom collection or a built-in one (`linux`, `windows`).
    pub collection: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            name: None,
            port: DEFAULT_PORT,
            username: None,
            password: None,
            key_filename: None,
            host_keys_filename: None,
            add_host_keys: false,
            load_system_host_keys: false,
            invoke_shell: false,
            ssh_timeout: DEFAULT_SSH_TIMEOUT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            allow_turn_off: false,
            disconnect_mode: false,
            mac_address: None,
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

impl HostConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Name used for logs and lookups, defaults to the host.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.host)
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            key_filename: self.key_filename.clone(),
            host_keys_filename: self.host_keys_filename.clone(),
            add_host_keys: self.add_host_keys,
            load_system_host_keys: self.load_system_host_keys,
            invoke_shell: self.invoke_shell,
            ssh_timeout: self.ssh_timeout,
            ping_timeout: self.ping_timeout,
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            name: self.name.clone(),
            command_timeout: self.command_timeout,
            allow_turn_off: self.allow_turn_off,
            disconnect_mode: self.disconnect_mode,
            mac_address: self.mac_address.clone(),
        }
    }

    /// Build an SSH-backed manager with this host's collection.
    pub fn build_manager(&self, config: &SshtmConfig) -> Result<SshManager, SshtmError> {
        let collection = config.collection(&self.collection)?;
        Ok(Manager::new(
            SshTerminal::new(self.ssh_options()),
            self.manager_options(),
            collection,
        ))
    }
}

// =============================================================================
// CONFIG FILE
// =============================================================================

/// Contents of a configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SshtmConfig {
    pub hosts: Vec<HostConfig>,
    pub collections: Vec<Collection>,
}

impl SshtmConfig {
    /// `<config dir>/sshtm/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("sshtm").join("config.toml"))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SshtmError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SshtmError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(
            "loaded {} host(s) from {}",
            config.hosts.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse and validate a configuration.
    pub fn from_toml_str(content: &str) -> Result<Self, SshtmError> {
        let config: Self = toml::from_str(content).map_err(|e| SshtmError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), SshtmError> {
        for (i, host) in self.hosts.iter().enumerate() {
            if host.host.trim().is_empty() {
                return Err(SshtmError::Config(format!("hosts[{i}]: missing host")));
            }
            self.collection(&host.collection)
                .map_err(|e| SshtmError::Config(format!("{}: {e}", host.display_name())))?;
        }

        for (i, collection) in self.collections.iter().enumerate() {
            if self.collections[..i].iter().any(|c| c.name == collection.name) {
                return Err(SshtmError::Config(format!(
                    "duplicate collection: {}",
                    collection.name
                )));
            }
        }
        Ok(())
    }

    /// Custom collection by name, else a built-in one.
    pub fn collection(&self, name: &str) -> Result<Collection, SshtmError> {
        match self.collections.iter().find(|c| c.name == name) {
            Some(collection) => Ok(collection.clone()),
            None => Collection::builtin(name),
        }
    }

    /// Host by name or address.
    pub fn host(&self, key: &str) -> Option<&HostConfig> {
        self.hosts
            .iter()
            .find(|h| h.name.as_deref() == Some(key))
            .or_else(|| self.hosts.iter().find(|h| h.host == key))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::SensorKey;
    use std::io::Write;

    #[test]
    fn host_defaults() {
        let config =
            SshtmConfig::from_toml_str("[[hosts]]\nhost = \"nas.local\"\n").expect("parse");
        let host = &config.hosts[0];

        assert_eq!(host.port, 22);
        assert_eq!(host.ssh_timeout, Duration::from_secs(4));
        assert_eq!(host.ping_timeout, Duration::from_secs(4));
        assert_eq!(host.command_timeout, Duration::from_secs(15));
        assert_eq!(host.collection, "linux");
        assert!(!host.allow_turn_off);
        assert!(!host.disconnect_mode);
        assert_eq!(host.display_name(), "nas.local");
    }

    #[test]
    fn host_options_are_mapped() {
        let toml = r#"
            [[hosts]]
            host = "10.0.0.2"
            name = "pi"
            port = 2222
            username = "pi"
            ssh_timeout = 10
            command_timeout = 60
            allow_turn_off = true
            disconnect_mode = true
            invoke_shell = true
            mac_address = "00:11:22:33:44:55"
        "#;
        let config = SshtmConfig::from_toml_str(toml).expect("parse");
        let host = config.host("pi").expect("by name");

        let ssh = host.ssh_options();
        assert_eq!(ssh.port, 2222);
        assert_eq!(ssh.ssh_timeout, Duration::from_secs(10));
        assert!(ssh.invoke_shell);

        let manager = host.manager_options();
        assert_eq!(manager.command_timeout, Duration::from_secs(60));
        assert!(manager.allow_turn_off);
        assert!(manager.disconnect_mode);
        assert_eq!(manager.mac_address.as_deref(), Some("00:11:22:33:44:55"));
        assert!(config.host("10.0.0.2").is_some());
    }

    #[test]
    fn custom_collection() {
        let toml = r#"
            [[hosts]]
            host = "nas.local"
            collection = "nas"

            [[collections]]
            name = "nas"

            [[collections.actions]]
            key = "turn_off"
            string = "poweroff"

            [[collections.sensors]]
            string = "hostname"
            interval = 300
            sensors = [{ key = "hostname" }]
        "#;
        let config = SshtmConfig::from_toml_str(toml).expect("parse");
        let collection = config.collection("nas").expect("collection");

        assert_eq!(
            collection.action("turn_off").map(|a| a.command.string.as_str()),
            Some("poweroff")
        );
        assert_eq!(collection.sensor_commands[0].interval, Some(Duration::from_secs(300)));
        assert!(collection.sensor(SensorKey::HOSTNAME).is_some());
    }

    #[test]
    fn unknown_collection_is_rejected() {
        let toml = "[[hosts]]\nhost = \"nas\"\ncollection = \"bsd\"\n";
        assert!(matches!(
            SshtmConfig::from_toml_str(toml),
            Err(SshtmError::Config(_))
        ));
    }

    #[test]
    fn missing_host_is_rejected() {
        let err = SshtmConfig::from_toml_str("[[hosts]]\nport = 22\n").expect_err("invalid");
        assert_eq!(err, SshtmError::Config("hosts[0]: missing host".into()));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[[hosts]]\nhost = \"nas.local\"\ncollection = \"windows\"").expect("write");

        let config = SshtmConfig::load(file.path()).expect("load");
        let manager = config.hosts[0].build_manager(&config).expect("manager");
        assert_eq!(manager.name(), "nas.local");
        assert_eq!(manager.collection().name, "windows");
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = SshtmConfig::load(dir.path().join("nope.toml")).expect_err("missing");
        assert!(matches!(err, SshtmError::Config(_)));
    }
}
