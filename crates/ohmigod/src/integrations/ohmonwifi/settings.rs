use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::error::Error;
use super::error::Result;
use super::protocol::SensorType;

fn default_interval() -> u64 {
    10
}

fn default_min_temp() -> f64 {
    0.0
}

fn default_max_temp() -> f64 {
    100.0
}

/// User-editable settings of a paired device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Host (optionally with port) the device answers on
    pub address: String,

    /// Poll interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Lower bound configured on the device, in °C
    #[serde(default = "default_min_temp")]
    pub min_temp: f64,

    /// Upper bound configured on the device, in °C
    #[serde(default = "default_max_temp")]
    pub max_temp: f64,

    /// Sensor type to emulate; 99 when not explicitly chosen
    #[serde(rename = "type", default)]
    pub sensor_type: SensorType,

    #[serde(default)]
    pub firmware: String,

    #[serde(default)]
    pub serial: String,
}

/// Names of the settings, as used in patches and change notifications
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SettingKey {
    Address,
    Interval,
    Type,
    MinTemp,
    MaxTemp,
    Firmware,
    Serial,
}

impl DeviceSettings {
    pub fn new(address: impl Into<String>, interval: u64) -> Self {
        Self {
            address: address.into(),
            interval,
            min_temp: default_min_temp(),
            max_temp: default_max_temp(),
            sensor_type: SensorType::UNSET,
            firmware: String::new(),
            serial: String::new(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Keys whose value differs between `self` and `new`
    pub fn changed_keys(&self, new: &Self) -> Vec<SettingKey> {
        use strum::IntoEnumIterator;

        SettingKey::iter()
            .filter(|key| match key {
                SettingKey::Address => self.address != new.address,
                SettingKey::Interval => self.interval != new.interval,
                SettingKey::Type => self.sensor_type != new.sensor_type,
                SettingKey::MinTemp => self.min_temp != new.min_temp,
                SettingKey::MaxTemp => self.max_temp != new.max_temp,
                SettingKey::Firmware => self.firmware != new.firmware,
                SettingKey::Serial => self.serial != new.serial,
            })
            .collect()
    }

    /// Apply a partial JSON object of settings, returning the result and the changed keys.
    pub fn with_patch(&self, patch: &serde_json::Value) -> Result<(Self, Vec<SettingKey>)> {
        let patch = patch
            .as_object()
            .ok_or_else(|| Error::Validation("settings patch must be a JSON object".to_string()))?;

        for key in patch.keys() {
            SettingKey::from_str(key)
                .map_err(|_| Error::Validation(format!("unknown setting: {}", key)))?;
        }

        let mut merged = serde_json::to_value(self)
            .map_err(|e| Error::Validation(e.to_string()))?;
        if let Some(fields) = merged.as_object_mut() {
            for (key, value) in patch {
                fields.insert(key.clone(), value.clone());
            }
        }

        let new: DeviceSettings = serde_json::from_value(merged)
            .map_err(|e| Error::Validation(format!("invalid settings: {}", e)))?;

        if new.interval == 0 {
            return Err(Error::Validation(
                "interval must be at least 1 second".to_string(),
            ));
        }

        let changed = self.changed_keys(&new);
        Ok((new, changed))
    }
}
