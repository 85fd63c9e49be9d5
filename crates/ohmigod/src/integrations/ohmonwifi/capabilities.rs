use std::time::Duration;

use strum::IntoEnumIterator;
use tracing::info;
use tracing::warn;

use super::handle::DeviceHandle;

/// Capabilities an OhmOnWifi device exposes, in declaration order
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    TargetTemperature,
    OutputTemperature,
    OutputResistance,
    MeasureType,
    MeasureUptime,
}

pub fn declared_capabilities() -> Vec<String> {
    Capability::iter().map(|c| c.to_string()).collect()
}

/// Plan to bring a device's capability set in line with the declared one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityDiff {
    /// Declared but not registered
    pub to_add: Vec<String>,

    /// Registered but no longer declared
    pub to_remove: Vec<String>,
}

impl CapabilityDiff {
    pub fn between(declared: &[String], actual: &[String]) -> Self {
        Self {
            to_add: declared
                .iter()
                .filter(|c| !actual.contains(c))
                .cloned()
                .collect(),
            to_remove: actual
                .iter()
                .filter(|c| !declared.contains(c))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Remove, settle, add, settle.
    ///
    /// Failures of single capabilities are logged and skipped.
    pub async fn apply(&self, handle: &mut dyn DeviceHandle, settle: Duration) {
        if self.is_empty() {
            return;
        }

        let name = handle.name().to_string();
        info!("[{}] Got old capabilities => {:?}", name, self.to_remove);
        info!("[{}] Got new capabilities => {:?}", name, self.to_add);

        for capability in &self.to_remove {
            info!("[{}] Removing capability {}", name, capability);
            if let Err(e) = handle.remove_capability(capability).await {
                warn!("[{}] Failed to remove capability: {}", name, e);
            }
        }
        tokio::time::sleep(settle).await;

        for capability in &self.to_add {
            info!("[{}] Adding capability {}", name, capability);
            if let Err(e) = handle.add_capability(capability).await {
                warn!("[{}] Failed to add capability: {}", name, e);
            }
        }
        tokio::time::sleep(settle).await;
    }
}

/// Bring the handle's capabilities in line with the declared set
pub async fn check_capabilities(handle: &mut dyn DeviceHandle, settle: Duration) -> CapabilityDiff {
    let diff = CapabilityDiff::between(&declared_capabilities(), &handle.capabilities());
    diff.apply(handle, settle).await;
    diff
}
