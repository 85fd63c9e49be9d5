use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Value held by a capability slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityValue::Bool(v) => write!(f, "{}", v),
            CapabilityValue::Number(v) => write!(f, "{}", v),
            CapabilityValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for CapabilityValue {
    fn from(v: f64) -> Self {
        CapabilityValue::Number(v)
    }
}

impl From<u64> for CapabilityValue {
    fn from(v: u64) -> Self {
        CapabilityValue::Number(v as f64)
    }
}

impl From<bool> for CapabilityValue {
    fn from(v: bool) -> Self {
        CapabilityValue::Bool(v)
    }
}

impl From<String> for CapabilityValue {
    fn from(v: String) -> Self {
        CapabilityValue::Text(v)
    }
}

impl From<&str> for CapabilityValue {
    fn from(v: &str) -> Self {
        CapabilityValue::Text(v.to_string())
    }
}

impl CapabilityValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CapabilityValue::Number(v) => Some(*v),
            _ => None,
        }
    }
}

/// Options of a numeric capability (allowed range).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl CapabilityOptions {
    pub fn range(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }
}

/// Result of a command relayed to a device without waiting for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Human-readable command, e.g. "set_temperature 21.5"
    pub command: String,

    /// Error text when the device call failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Platform-side view of one device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceState {
    pub id: String,
    pub name: String,

    /// Name of the integration that owns the device
    pub integration: String,

    pub available: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,

    /// Registered capabilities, in registration order
    pub capabilities: Vec<String>,

    pub values: BTreeMap<String, CapabilityValue>,

    pub options: BTreeMap<String, CapabilityOptions>,

    pub settings: serde_json::Value,

    /// Outcome of the most recent fire-and-forget command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_command: Option<CommandOutcome>,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub devices: BTreeMap<String, DeviceState>,
}
