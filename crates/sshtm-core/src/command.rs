//! # Command Module
//!
//! Command templates plus the two kinds of commands a collection holds:
//! - `ActionCommand`: run on demand (turn off, restart, ...)
//! - `SensorCommand`: run periodically, output parsed into sensors
//!
//! Templates use `@{name}` placeholders that are filled from variables
//! before execution.

use crate::{CommandOutput, Sensor, SshtmError};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;

/// Variables available to a command template.
pub type Variables = BTreeMap<String, String>;

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"@\{([A-Za-z0-9_]+)\}").ok());

// =============================================================================
// COMMAND
// =============================================================================

/// A command string with an optional timeout override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub string: String,
    #[serde(default, with = "crate::config::opt_secs")]
    pub timeout: Option<Duration>,
}

impl Command {
    pub fn new(string: impl Into<String>) -> Self {
        Self {
            string: string.into(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Names of all placeholders in the template, in order of appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let Some(re) = PLACEHOLDER.as_ref() else {
            return Vec::new();
        };
        re.captures_iter(&self.string)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    /// Fill every `@{name}` placeholder from `variables`.
    pub fn render(&self, variables: &Variables) -> Result<String, SshtmError> {
        let Some(re) = PLACEHOLDER.as_ref() else {
            return Ok(self.string.clone());
        };

        if let Some(missing) = self
            .placeholders()
            .into_iter()
            .find(|name| !variables.contains_key(name))
        {
            return Err(SshtmError::MissingVariable(missing));
        }

        Ok(re
            .replace_all(&self.string, |caps: &Captures<'_>| {
                variables.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned())
    }
}

// =============================================================================
// ACTION COMMAND
// =============================================================================

/// A command run on demand, identified by its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCommand {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub command: Command,
}

impl ActionCommand {
    pub fn new(key: impl Into<String>, command: Command) -> Self {
        Self {
            key: key.into(),
            name: None,
            command,
        }
    }
}

// =============================================================================
// SENSOR COMMAND
// =============================================================================

/// A command whose output feeds one or more sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorCommand {
    #[serde(flatten)]
    pub command: Command,
    /// Minimum time between two runs. `None` runs once per connection.
    #[serde(default, with = "crate::config::opt_secs")]
    pub interval: Option<Duration>,
    /// Split the first output line on this separator instead of using one
    /// line per sensor.
    #[serde(default)]
    pub separator: Option<String>,
    pub sensors: Vec<Sensor>,
    #[serde(skip)]
    last_update: Option<Instant>,
}

impl SensorCommand {
    pub fn new(command: Command, sensors: Vec<Sensor>) -> Self {
        Self {
            command,
            interval: None,
            separator: None,
            sensors,
            last_update: None,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    /// Whether the command is due.
    ///
    /// - `force`: always
    /// - `once`: only if it never ran
    /// - otherwise: never ran, or `interval` elapsed since the last run
    pub fn should_update(&self, force: bool, once: bool, now: Instant) -> bool {
        if force {
            return true;
        }
        let Some(last) = self.last_update else {
            return true;
        };
        if once {
            return false;
        }
        match self.interval {
            Some(interval) => now.saturating_duration_since(last) >= interval,
            None => false,
        }
    }

    /// Feed an output into the sensors.
    ///
    /// Returns the keys of sensors whose value changed.
    pub fn apply(&mut self, output: &CommandOutput, now: Instant) -> Vec<String> {
        self.last_update = Some(now);

        if output.code != 0 {
            return self.clear_sensors();
        }

        let lines: Vec<&str> = match &self.separator {
            Some(sep) => output
                .stdout
                .first()
                .map(|line| line.split(sep.as_str()).collect())
                .unwrap_or_default(),
            None => output.stdout.iter().map(String::as_str).collect(),
        };

        let mut changed = Vec::new();
        for (i, sensor) in self.sensors.iter_mut().enumerate() {
            if sensor.update_from_line(lines.get(i).copied()) {
                changed.push(sensor.key.clone());
            }
        }
        changed
    }

    /// Mark every sensor unknown and forget the last run.
    ///
    /// Returns the keys of sensors whose value changed.
    pub fn reset(&mut self) -> Vec<String> {
        self.last_update = None;
        self.clear_sensors()
    }

    fn clear_sensors(&mut self) -> Vec<String> {
        self.sensors
            .iter_mut()
            .filter_map(|s| s.update(None).then(|| s.key.clone()))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SensorValue;

    #[test]
    fn placeholder_pattern_compiles() {
        assert!(PLACEHOLDER.is_some());
    }

    fn output(stdout: &[&str], code: i32) -> CommandOutput {
        CommandOutput::new(
            "cmd",
            stdout.iter().map(|s| s.to_string()).collect(),
            Vec::new(),
            code,
        )
    }

    #[test]
    fn render_without_placeholders_is_identity() {
        let cmd = Command::new("uname -a");
        assert_eq!(cmd.render(&Variables::new()).expect("render"), "uname -a");
    }

    #[test]
    fn render_fills_placeholders() {
        let cmd = Command::new("systemctl restart @{service} && echo @{service}");
        let mut vars = Variables::new();
        vars.insert("service".into(), "nginx".into());

        assert_eq!(
            cmd.render(&vars).expect("render"),
            "systemctl restart nginx && echo nginx"
        );
    }

    #[test]
    fn render_reports_missing_variable() {
        let cmd = Command::new("kill @{pid}");
        let err = cmd.render(&Variables::new()).expect_err("missing");
        assert_eq!(err, SshtmError::MissingVariable("pid".into()));
    }

    #[test]
    fn apply_maps_lines_to_sensors() {
        let mut cmd = SensorCommand::new(
            Command::new("uname -s && uname -r"),
            vec![Sensor::text("os_name"), Sensor::text("os_version")],
        );
        let changed = cmd.apply(&output(&["Linux", "6.1.0"], 0), Instant::now());

        assert_eq!(changed, vec!["os_name", "os_version"]);
        assert_eq!(cmd.sensors[1].value(), Some(&SensorValue::Text("6.1.0".into())));
    }

    #[test]
    fn apply_with_separator() {
        let mut cmd = SensorCommand::new(
            Command::new("free"),
            vec![Sensor::number("total", None), Sensor::number("free", None)],
        )
        .with_separator(",");
        cmd.apply(&output(&["2048,1024"], 0), Instant::now());

        assert_eq!(cmd.sensors[0].value(), Some(&SensorValue::Number(2048.0)));
        assert_eq!(cmd.sensors[1].value(), Some(&SensorValue::Number(1024.0)));
    }

    #[test]
    fn apply_missing_line_clears_sensor() {
        let mut cmd = SensorCommand::new(
            Command::new("x"),
            vec![Sensor::text("a"), Sensor::text("b")],
        );
        cmd.apply(&output(&["1", "2"], 0), Instant::now());
        cmd.apply(&output(&["1"], 0), Instant::now());

        assert_eq!(cmd.sensors[1].value(), None);
        assert_eq!(cmd.sensors[1].last_known_value(), Some(&SensorValue::Text("2".into())));
    }

    #[test]
    fn apply_error_code_clears_all() {
        let mut cmd = SensorCommand::new(Command::new("x"), vec![Sensor::text("a")]);
        cmd.apply(&output(&["1"], 0), Instant::now());
        let changed = cmd.apply(&output(&["1"], 127), Instant::now());

        assert_eq!(changed, vec!["a"]);
        assert_eq!(cmd.sensors[0].value(), None);
        assert!(cmd.last_update().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn should_update_respects_interval() {
        let mut cmd = SensorCommand::new(Command::new("x"), vec![Sensor::text("a")])
            .with_interval(Duration::from_secs(30));
        assert!(cmd.should_update(false, false, Instant::now()));

        cmd.apply(&output(&["1"], 0), Instant::now());
        assert!(!cmd.should_update(false, false, Instant::now()));
        assert!(cmd.should_update(true, false, Instant::now()));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cmd.should_update(false, false, Instant::now()));
        assert!(!cmd.should_update(false, true, Instant::now()));
    }

    #[test]
    fn command_without_interval_runs_once() {
        let mut cmd = SensorCommand::new(Command::new("hostname"), vec![Sensor::text("hostname")]);
        cmd.apply(&output(&["nas"], 0), Instant::now());
        assert!(!cmd.should_update(false, false, Instant::now()));

        cmd.reset();
        assert!(cmd.should_update(false, false, Instant::now()));
        assert_eq!(cmd.sensors[0].value(), None);
    }
}
