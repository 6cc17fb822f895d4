//! # Collection Module
//!
//! A collection bundles the sensor and action commands used for one kind of
//! host. Two collections are built in (`linux`, `windows`); custom ones can
//! be loaded from the configuration file.

use crate::command::{ActionCommand, Command, SensorCommand};
use crate::{Sensor, SshtmError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// =============================================================================
// WELL-KNOWN KEYS
// =============================================================================

/// Sensor keys the manager understands.
pub struct SensorKey;

impl SensorKey {
    pub const HOSTNAME: &'static str = "hostname";
    pub const MAC_ADDRESS: &'static str = "mac_address";
    pub const WOL_SUPPORT: &'static str = "wake_on_lan";
    pub const OS_NAME: &'static str = "os_name";
    pub const OS_VERSION: &'static str = "os_version";
    pub const MACHINE_TYPE: &'static str = "machine_type";
    pub const CPU_LOAD: &'static str = "cpu_load";
    pub const TOTAL_MEMORY: &'static str = "total_memory";
    pub const FREE_MEMORY: &'static str = "free_memory";
}

/// Action keys the manager understands.
pub struct ActionKey;

impl ActionKey {
    pub const TURN_OFF: &'static str = "turn_off";
    pub const RESTART: &'static str = "restart";
}

// =============================================================================
// COLLECTION
// =============================================================================

/// Sensor and action commands for one kind of host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    #[serde(default, rename = "actions", with = "action_list")]
    pub action_commands: BTreeMap<String, ActionCommand>,
    #[serde(default, rename = "sensors")]
    pub sensor_commands: Vec<SensorCommand>,
}

impl Collection {
    /// An empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action_commands: BTreeMap::new(),
            sensor_commands: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: ActionCommand) -> Self {
        self.action_commands.insert(action.key.clone(), action);
        self
    }

    #[must_use]
    pub fn with_sensor_command(mut self, command: SensorCommand) -> Self {
        self.sensor_commands.push(command);
        self
    }

    pub fn action(&self, key: &str) -> Option<&ActionCommand> {
        self.action_commands.get(key)
    }

    /// Find a sensor by key across all sensor commands.
    pub fn sensor(&self, key: &str) -> Option<&Sensor> {
        self.sensors().find(|s| s.key == key)
    }

    pub fn sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.sensor_commands.iter().flat_map(|c| c.sensors.iter())
    }

    /// Built-in collection for Linux hosts.
    pub fn linux() -> Self {
        const IFACE: &str = "$(ip route show default | awk '/default/ {print $5}')";

        Self::new("linux")
            .with_sensor_command(SensorCommand::new(
                Command::new("hostname"),
                vec![Sensor::text(SensorKey::HOSTNAME).named("Hostname")],
            ))
            .with_sensor_command(SensorCommand::new(
                Command::new(format!("cat /sys/class/net/{IFACE}/address")),
                vec![Sensor::text(SensorKey::MAC_ADDRESS).named("MAC address")],
            ))
            .with_sensor_command(SensorCommand::new(
                Command::new(format!("cat /sys/class/net/{IFACE}/device/power/wakeup")),
                vec![
                    Sensor::binary(SensorKey::WOL_SUPPORT, Some("enabled"), None)
                        .named("Wake on LAN"),
                ],
            ))
            .with_sensor_command(SensorCommand::new(
                Command::new("uname -s && uname -r && uname -m"),
                vec![
                    Sensor::text(SensorKey::OS_NAME).named("OS name"),
                    Sensor::text(SensorKey::OS_VERSION).named("OS version"),
                    Sensor::text(SensorKey::MACHINE_TYPE).named("Machine type"),
                ],
            ))
            .with_sensor_command(
                SensorCommand::new(
                    Command::new("top -bn1 | awk '/Cpu\\(s\\)/ {print 100 - $8}'"),
                    vec![Sensor::number(SensorKey::CPU_LOAD, Some("%")).named("CPU load")],
                )
                .with_interval(Duration::from_secs(30)),
            )
            .with_sensor_command(
                SensorCommand::new(
                    Command::new("free -m | awk '/Mem:/ {print $2 \",\" $7}'"),
                    vec![
                        Sensor::number(SensorKey::TOTAL_MEMORY, Some("MB")).named("Total memory"),
                        Sensor::number(SensorKey::FREE_MEMORY, Some("MB")).named("Free memory"),
                    ],
                )
                .with_separator(",")
                .with_interval(Duration::from_secs(30)),
            )
            .with_action(ActionCommand::new(
                ActionKey::TURN_OFF,
                Command::new("sudo /sbin/shutdown -h now"),
            ))
            .with_action(ActionCommand::new(
                ActionKey::RESTART,
                Command::new("sudo /sbin/shutdown -r now"),
            ))
    }

    /// Built-in collection for Windows hosts (OpenSSH server, PowerShell).
    pub fn windows() -> Self {
        const PS: &str = "powershell -NoProfile -Command";

        Self::new("windows")
            .with_sensor_command(SensorCommand::new(
                Command::new("hostname"),
                vec![Sensor::text(SensorKey::HOSTNAME).named("Hostname")],
            ))
            .with_sensor_command(SensorCommand::new(
                Command::new(format!(
                    "{PS} \"(Get-NetAdapter | Where-Object Status -eq 'Up' | \
                     Select-Object -First 1).MacAddress\""
                )),
                vec![Sensor::text(SensorKey::MAC_ADDRESS).named("MAC address")],
            ))
            .with_sensor_command(SensorCommand::new(
                Command::new(format!(
                    "{PS} \"$o = Get-CimInstance Win32_OperatingSystem; \
                     $o.Caption; $o.Version; $o.OSArchitecture\""
                )),
                vec![
                    Sensor::text(SensorKey::OS_NAME).named("OS name"),
                    Sensor::text(SensorKey::OS_VERSION).named("OS version"),
                    Sensor::text(SensorKey::MACHINE_TYPE).named("Machine type"),
                ],
            ))
            .with_sensor_command(
                SensorCommand::new(
                    Command::new(format!(
                        "{PS} \"(Get-CimInstance Win32_Processor | \
                         Measure-Object -Property LoadPercentage -Average).Average\""
                    )),
                    vec![Sensor::number(SensorKey::CPU_LOAD, Some("%")).named("CPU load")],
                )
                .with_interval(Duration::from_secs(30)),
            )
            .with_action(ActionCommand::new(
                ActionKey::TURN_OFF,
                Command::new("shutdown /s /t 0"),
            ))
            .with_action(ActionCommand::new(
                ActionKey::RESTART,
                Command::new("shutdown /r /t 0"),
            ))
    }

    /// Look up a built-in collection by name.
    pub fn builtin(name: &str) -> Result<Self, SshtmError> {
        match name {
            "linux" => Ok(Self::linux()),
            "windows" => Ok(Self::windows()),
            other => Err(SshtmError::Config(format!("Unknown collection: {other}"))),
        }
    }
}

/// Actions are written as a list in configuration files and keyed in memory.
mod action_list {
    use super::ActionCommand;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, ActionCommand>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let list: Vec<&ActionCommand> = map.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, ActionCommand>, D::Error> {
        let list = Vec::<ActionCommand>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|a| (a.key.clone(), a)).collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_collection_has_power_actions() {
        let linux = Collection::linux();
        assert!(linux.action(ActionKey::TURN_OFF).is_some());
        assert!(linux.action(ActionKey::RESTART).is_some());
        assert!(linux.sensor(SensorKey::MAC_ADDRESS).is_some());
        assert!(linux.sensor(SensorKey::FREE_MEMORY).is_some());
    }

    #[test]
    fn windows_collection_has_power_actions() {
        let windows = Collection::windows();
        assert_eq!(
            windows.action(ActionKey::TURN_OFF).map(|a| a.command.string.as_str()),
            Some("shutdown /s /t 0")
        );
        assert!(windows.sensor(SensorKey::OS_NAME).is_some());
    }

    #[test]
    fn builtin_lookup() {
        assert_eq!(Collection::builtin("linux").expect("linux").name, "linux");
        assert!(matches!(
            Collection::builtin("beos"),
            Err(SshtmError::Config(_))
        ));
    }

    #[test]
    fn sensor_keys_are_unique_in_builtins() {
        for collection in [Collection::linux(), Collection::windows()] {
            let mut keys: Vec<&str> = collection.sensors().map(|s| s.key.as_str()).collect();
            let total = keys.len();
            keys.sort_unstable();
            keys.dedup();
            assert_eq!(keys.len(), total, "duplicate sensor key in {}", collection.name);
        }
    }
}
