//! # Sensor Module
//!
//! A sensor turns one line of command output into a typed value.
//!
//! Sensors keep two readings:
//! - `value`: the current reading, `None` when unknown (error, disconnect, reset)
//! - `last_known_value`: the most recent non-`None` reading, never cleared

use crate::SensorValue;
use serde::{Deserialize, Serialize};

// =============================================================================
// SENSOR KIND
// =============================================================================

/// How a sensor interprets its output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorKind {
    /// Trimmed text; empty lines are unknown.
    #[default]
    Text,
    /// Floating point number with an optional unit.
    Number {
        #[serde(default)]
        unit: Option<String>,
    },
    /// On/off state.
    Binary {
        #[serde(default)]
        payload_on: Option<String>,
        #[serde(default)]
        payload_off: Option<String>,
    },
}

// =============================================================================
// SENSOR
// =============================================================================

/// A typed reading fed by a sensor command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: SensorKind,
    #[serde(skip)]
    value: Option<SensorValue>,
    #[serde(skip)]
    last_known_value: Option<SensorValue>,
}

impl Sensor {
    /// Create a text sensor.
    pub fn text(key: impl Into<String>) -> Self {
        Self::with_kind(key, SensorKind::Text)
    }

    /// Create a number sensor.
    pub fn number(key: impl Into<String>, unit: Option<&str>) -> Self {
        Self::with_kind(
            key,
            SensorKind::Number {
                unit: unit.map(str::to_string),
            },
        )
    }

    /// Create a binary sensor.
    pub fn binary(
        key: impl Into<String>,
        payload_on: Option<&str>,
        payload_off: Option<&str>,
    ) -> Self {
        Self::with_kind(
            key,
            SensorKind::Binary {
                payload_on: payload_on.map(str::to_string),
                payload_off: payload_off.map(str::to_string),
            },
        )
    }

    pub fn with_kind(key: impl Into<String>, kind: SensorKind) -> Self {
        Self {
            key: key.into(),
            name: None,
            kind,
            value: None,
            last_known_value: None,
        }
    }

    /// Set a display name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Display name, falling back to the key.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.key)
    }

    pub fn value(&self) -> Option<&SensorValue> {
        self.value.as_ref()
    }

    pub fn last_known_value(&self) -> Option<&SensorValue> {
        self.last_known_value.as_ref()
    }

    /// Unit of a number sensor.
    pub fn unit(&self) -> Option<&str> {
        match &self.kind {
            SensorKind::Number { unit } => unit.as_deref(),
            _ => None,
        }
    }

    /// Parse one output line according to the sensor kind.
    ///
    /// Returns `None` when the line cannot be interpreted.
    pub fn parse(&self, line: &str) -> Option<SensorValue> {
        let line = line.trim();

        match &self.kind {
            SensorKind::Text => (!line.is_empty()).then(|| SensorValue::Text(line.to_string())),
            SensorKind::Number { .. } => match line.parse::<f64>() {
                Ok(n) if n.is_finite() => Some(SensorValue::Number(n)),
                _ => {
                    tracing::warn!("Sensor {}: cannot parse {:?} as a number", self.key, line);
                    None
                }
            },
            SensorKind::Binary {
                payload_on,
                payload_off,
            } => {
                let parsed = parse_binary(line, payload_on.as_deref(), payload_off.as_deref());
                if parsed.is_none() {
                    tracing::warn!(
                        "Sensor {}: cannot parse {:?} as a binary state",
                        self.key,
                        line
                    );
                }
                parsed.map(SensorValue::Bool)
            }
        }
    }

    /// Store a new reading and return whether `value` changed.
    ///
    /// `None` clears the current value but keeps the last known one.
    pub fn update(&mut self, value: Option<SensorValue>) -> bool {
        if let Some(v) = &value {
            self.last_known_value = Some(v.clone());
        }
        if self.value == value {
            return false;
        }
        self.value = value;
        true
    }

    /// Parse a line (or its absence) and store the result.
    pub fn update_from_line(&mut self, line: Option<&str>) -> bool {
        let value = line.and_then(|l| self.parse(l));
        self.update(value)
    }
}

fn parse_binary(line: &str, payload_on: Option<&str>, payload_off: Option<&str>) -> Option<bool> {
    match (payload_on, payload_off) {
        (Some(on), Some(off)) => {
            if line == on {
                Some(true)
            } else {
                (line == off).then_some(false)
            }
        }
        (Some(on), None) => Some(line == on),
        (None, Some(off)) => Some(line != off),
        (None, None) => match line.to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => Some(true),
            "false" | "off" | "no" | "0" => Some(false),
            _ => None,
        },
    }
}

// =============================================================================
// TESTS
// =============================================================================
