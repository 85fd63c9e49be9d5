use std::time::Duration;

use serde::Deserialize;

use super::settings::DeviceSettings;

fn default_protocol() -> String {
    "http".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_write_delay_ms() -> u64 {
    10
}

fn default_interval() -> u64 {
    10
}

/// Configuration for the OhmOnWifi integration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// URL scheme used to reach devices (default: "http")
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Timeout of a single device request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Pause between capability removals and additions, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Pause before each capability value write, in milliseconds
    #[serde(default = "default_write_delay_ms")]
    pub write_delay_ms: u64,

    /// Poll interval for newly paired devices, in seconds
    #[serde(default = "default_interval")]
    pub default_interval: u64,

    /// Devices paired at startup
    #[serde(default)]
    pub devices: Vec<PairedDevice>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            request_timeout_secs: default_request_timeout_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            write_delay_ms: default_write_delay_ms(),
            default_interval: default_interval(),
            devices: Vec::new(),
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn write_delay(&self) -> Duration {
        Duration::from_millis(self.write_delay_ms)
    }
}

/// A device that was paired before startup
#[derive(Debug, Clone, Deserialize)]
pub struct PairedDevice {
    pub id: String,

    pub name: String,

    #[serde(flatten)]
    pub settings: DeviceSettings,

    /// Capabilities currently registered on the platform; the declared set when absent
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::ohmonwifi::protocol::SensorType;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.protocol, "http");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.settle_delay(), Duration::from_millis(2000));
        assert_eq!(config.write_delay(), Duration::from_millis(10));
        assert_eq!(config.default_interval, 10);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_paired_device() {
        let config: Config = toml::from_str(
            r#"
            settle_delay_ms = 0

            [[devices]]
            id = "ohm-1"
            name = "Boiler sensor"
            address = "192.0.2.5"
            interval = 30
            min_temp = 5
            max_temp = 35
            type = "2"
            capabilities = ["target_temperature", "measure_temperature"]
            "#,
        )
        .unwrap();

        let device = &config.devices[0];
        assert_eq!(device.id, "ohm-1");
        assert_eq!(device.settings.address, "192.0.2.5");
        assert_eq!(device.settings.interval, 30);
        assert_eq!(device.settings.min_temp, 5.0);
        assert_eq!(device.settings.sensor_type, SensorType::new(2));
        assert_eq!(device.capabilities.as_ref().map(Vec::len), Some(2));
        assert_eq!(config.settle_delay(), Duration::ZERO);
    }
}
