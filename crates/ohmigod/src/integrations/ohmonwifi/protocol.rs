//! Wire types for the OhmOnWifi HTTP protocol.
//!
//! The device firmware is loose about JSON types: numeric readings show up
//! either as numbers or as numeric strings depending on the firmware version,
//! so most fields go through the lenient deserializers below.

use std::fmt;
use std::str::FromStr;

use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

use super::error::Error;
use super::error::Result;

/// Deserialize a number that may also be sent as a numeric string.
fn deserialize_lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct LenientF64;

    impl<'de> de::Visitor<'de> for LenientF64 {
        type Value = Option<f64>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("number, numeric string, or null")
        }

        fn visit_none<E>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_f64<E>(self, v: f64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v as f64))
        }

        fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v as f64))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
            v.trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
        }
    }

    deserializer.deserialize_any(LenientF64)
}

/// Deserialize an unsigned counter (uptime) that may also be sent as a string.
fn deserialize_lenient_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_lenient_f64(deserializer)?
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64))
}

/// Deserialize any scalar into its string form.
///
/// Device ids and firmware versions are strings on newer firmware and bare
/// numbers on older units.
fn deserialize_string_or_scalar<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrScalar;

    impl<'de> de::Visitor<'de> for StringOrScalar {
        type Value = Option<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("string, boolean, number, or null")
        }

        fn visit_none<E>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_bool<E>(self, v: bool) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E>(self, v: String) -> std::result::Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E>(self, v: f64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
    }

    deserializer.deserialize_any(StringOrScalar)
}

/// Sensor type code understood by the device (PT100, NTC, ...).
///
/// Code 99 is the "no explicit type" sentinel stored in settings when the user
/// never picked a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorType(u16);

impl SensorType {
    pub const UNSET: SensorType = SensorType(99);

    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn code(self) -> u16 {
        self.0
    }

    pub fn is_unset(self) -> bool {
        self == Self::UNSET
    }

    /// The type to send to the device, or `None` for the sentinel.
    pub fn explicit(self) -> Option<Self> {
        if self.is_unset() {
            None
        } else {
            Some(self)
        }
    }
}

impl Default for SensorType {
    fn default() -> Self {
        Self::UNSET
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SensorType {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(SensorType)
    }
}

impl Serialize for SensorType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SensorType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SensorTypeVisitor;

        impl<'de> de::Visitor<'de> for SensorTypeVisitor {
            type Value = SensorType;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("sensor type code as integer or string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                u16::try_from(v)
                    .map(SensorType)
                    .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(v), &self))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
                u16::try_from(v)
                    .map(SensorType)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                v.parse()
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(SensorTypeVisitor)
    }
}

/// Response of `GET /info`.
///
/// When the device sits behind a proxy that reports connection failures in
/// the body, the `errno`/`code`/`address`/`port` envelope is filled instead of
/// the readings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct InfoSnapshot {
    #[serde(rename = "deviceName", default)]
    pub device_name: Option<String>,

    #[serde(rename = "deviceID", default, deserialize_with = "deserialize_string_or_scalar")]
    pub device_id: Option<String>,

    #[serde(rename = "deviceIP", default)]
    pub device_ip: Option<String>,

    #[serde(default, deserialize_with = "deserialize_string_or_scalar")]
    pub firmware: Option<String>,

    /// Seconds since boot
    #[serde(default, deserialize_with = "deserialize_lenient_u64")]
    pub uptime: Option<u64>,

    /// Temperature currently emulated on the output, in °C
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub temperature: Option<f64>,

    /// Resistance currently emulated on the output, in ohms
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub resistance: Option<f64>,

    #[serde(rename = "type", default)]
    pub sensor_type: Option<SensorType>,

    #[serde(default)]
    pub type_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_string_or_scalar")]
    pub port: Option<String>,
}

impl InfoSnapshot {
    /// Reject error envelopes and snapshots without an uptime.
    pub fn validate(self) -> Result<Self> {
        if self.errno.is_some() {
            return Err(Error::Transport(format!(
                "{} {}:{}",
                self.code.as_deref().unwrap_or("EUNKNOWN"),
                self.address.as_deref().unwrap_or("?"),
                self.port.as_deref().unwrap_or("?"),
            )));
        }
        if self.uptime.is_none() {
            return Err(Error::MalformedResponse(
                "Couldn't get uptime from device, check device.".to_string(),
            ));
        }
        Ok(self)
    }
}

/// Response of `GET /getconfig`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub device_name: Option<String>,

    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub min_temp: Option<f64>,

    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub max_temp: Option<f64>,

    /// Sensor types supported by the firmware, passed through untouched
    #[serde(default)]
    pub types: Option<serde_json::Value>,
}

/// Info and config of one poll, merged for a single reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDeviceState {
    pub temperature: f64,
    pub resistance: f64,
    pub uptime: u64,
    pub sensor_type: Option<SensorType>,
    pub type_name: String,
    pub firmware: Option<String>,
    pub device_name: Option<String>,
    pub min_temp: f64,
    pub max_temp: f64,
}

impl MergedDeviceState {
    pub fn merge(info: InfoSnapshot, config: ConfigSnapshot) -> Result<Self> {
        fn required<T>(value: Option<T>, field: &str) -> Result<T> {
            value.ok_or_else(|| Error::MalformedResponse(format!("device did not report {}", field)))
        }

        Ok(Self {
            temperature: required(info.temperature, "temperature")?,
            resistance: required(info.resistance, "resistance")?,
            uptime: required(info.uptime, "uptime")?,
            sensor_type: info.sensor_type,
            type_name: info.type_name.unwrap_or_default(),
            firmware: info.firmware,
            device_name: config.device_name.or(info.device_name),
            min_temp: required(config.min_temp, "min_temp")?,
            max_temp: required(config.max_temp, "max_temp")?,
        })
    }
}

/// Acknowledgement returned by command endpoints.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Ack {
    #[serde(default, deserialize_with = "deserialize_string_or_scalar")]
    pub ack: Option<String>,

    /// Anything else the firmware put in the body
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Ack {
    /// Parse a command response body.
    ///
    /// JSON objects are read as-is, a JSON string or a non-JSON body is taken
    /// as the bare acknowledgement text.
    pub fn parse(body: &str) -> Result<Self> {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => {
                serde_json::from_value(serde_json::Value::Object(map))
                    .map_err(|e| Error::MalformedResponse(e.to_string()))
            }
            Ok(serde_json::Value::String(text)) => Ok(Self::bare(text)),
            _ => Ok(Self::bare(body.to_string())),
        }
    }

    fn bare(text: String) -> Self {
        Self {
            ack: Some(text),
            fields: serde_json::Map::new(),
        }
    }

    /// Check the acknowledgement, normalizing line endings.
    ///
    /// When `required` is false a body without an `ack` field is accepted.
    pub fn check(mut self, required: bool) -> Result<Self> {
        match self.ack.take() {
            Some(raw) => {
                let ack = normalize_ack(&raw);
                if ack == "ok" {
                    self.ack = Some(ack.to_string());
                    Ok(self)
                } else {
                    Err(Error::Device(ack.to_string()))
                }
            }
            None if required => Err(Error::Device("no acknowledgement in response".to_string())),
            None => Ok(self),
        }
    }
}

/// Strip the trailing line endings the firmware appends to acknowledgements.
pub fn normalize_ack(raw: &str) -> &str {
    raw.trim_end_matches(|c| c == '\r' || c == '\n')
}
