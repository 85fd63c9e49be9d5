//! Platform-side device store.
//!
//! `DeviceHandle` is the only surface the device logic sees of the platform:
//! capability slots, their options, the settings store and availability.
//! `PlatformDevice` keeps that state in memory and mirrors every change into
//! the engine's state snapshot.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::warn;

use super::settings::DeviceSettings;
use crate::engine::CapabilityOptions;
use crate::engine::CapabilityValue;
use crate::engine::DeviceState;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandleError {
    #[error("capability {0} is not registered")]
    UnknownCapability(String),

    #[error("capability {0} is already registered")]
    DuplicateCapability(String),
}

#[async_trait]
pub trait DeviceHandle: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    async fn set_name(&mut self, name: &str);

    /// Registered capabilities, in registration order
    fn capabilities(&self) -> Vec<String>;

    fn has_capability(&self, capability: &str) -> bool;

    async fn add_capability(&mut self, capability: &str) -> Result<(), HandleError>;

    async fn remove_capability(&mut self, capability: &str) -> Result<(), HandleError>;

    fn capability_value(&self, capability: &str) -> Option<CapabilityValue>;

    async fn set_capability_value(
        &mut self,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<(), HandleError>;

    fn capability_options(&self, capability: &str) -> CapabilityOptions;

    async fn set_capability_options(
        &mut self,
        capability: &str,
        options: CapabilityOptions,
    ) -> Result<(), HandleError>;

    fn settings(&self) -> &DeviceSettings;

    async fn set_settings(&mut self, settings: DeviceSettings);

    fn is_available(&self) -> bool;

    async fn set_available(&mut self);

    async fn set_unavailable(&mut self, reason: &str);
}

/// In-memory device store reporting to the engine
pub struct PlatformDevice {
    id: String,
    name: String,
    integration: String,
    capabilities: Vec<String>,
    values: BTreeMap<String, CapabilityValue>,
    options: BTreeMap<String, CapabilityOptions>,
    settings: DeviceSettings,
    available: bool,
    unavailable_reason: Option<String>,
    to_engine: FromIntegrationSender,
}

impl PlatformDevice {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        integration: impl Into<String>,
        capabilities: Vec<String>,
        settings: DeviceSettings,
        to_engine: FromIntegrationSender,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            integration: integration.into(),
            capabilities,
            values: BTreeMap::new(),
            options: BTreeMap::new(),
            settings,
            available: true,
            unavailable_reason: None,
            to_engine,
        }
    }

    /// Register the device with the engine and publish its initial state
    pub async fn register(&self) {
        let msg = FromIntegrationMessage::DeviceDiscovered {
            device_id: self.id.clone(),
            integration_name: self.integration.clone(),
        };
        if let Err(e) = self.to_engine.send(msg).await {
            warn!("Failed to send DeviceDiscovered message: {}", e);
        }
        self.publish().await;
    }

    pub fn snapshot(&self) -> DeviceState {
        DeviceState {
            id: self.id.clone(),
            name: self.name.clone(),
            integration: self.integration.clone(),
            available: self.available,
            unavailable_reason: self.unavailable_reason.clone(),
            capabilities: self.capabilities.clone(),
            values: self.values.clone(),
            options: self.options.clone(),
            settings: serde_json::to_value(&self.settings).unwrap_or_default(),
            last_command: None,
        }
    }

    async fn publish(&self) {
        let msg = FromIntegrationMessage::DeviceStateChanged {
            state: self.snapshot(),
        };
        if let Err(e) = self.to_engine.send(msg).await {
            warn!("[{}] Failed to send DeviceStateChanged message: {}", self.name, e);
        }
    }

    fn ensure_registered(&self, capability: &str) -> Result<(), HandleError> {
        if self.has_capability(capability) {
            Ok(())
        } else {
            Err(HandleError::UnknownCapability(capability.to_string()))
        }
    }
}

#[async_trait]
impl DeviceHandle for PlatformDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.publish().await;
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    async fn add_capability(&mut self, capability: &str) -> Result<(), HandleError> {
        if self.has_capability(capability) {
            return Err(HandleError::DuplicateCapability(capability.to_string()));
        }
        self.capabilities.push(capability.to_string());
        self.publish().await;
        Ok(())
    }

    async fn remove_capability(&mut self, capability: &str) -> Result<(), HandleError> {
        self.ensure_registered(capability)?;
        self.capabilities.retain(|c| c != capability);
        self.values.remove(capability);
        self.options.remove(capability);
        self.publish().await;
        Ok(())
    }

    fn capability_value(&self, capability: &str) -> Option<CapabilityValue> {
        self.values.get(capability).cloned()
    }

    async fn set_capability_value(
        &mut self,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<(), HandleError> {
        self.ensure_registered(capability)?;
        self.values.insert(capability.to_string(), value);
        self.publish().await;
        Ok(())
    }

    fn capability_options(&self, capability: &str) -> CapabilityOptions {
        self.options.get(capability).copied().unwrap_or_default()
    }

    async fn set_capability_options(
        &mut self,
        capability: &str,
        options: CapabilityOptions,
    ) -> Result<(), HandleError> {
        self.ensure_registered(capability)?;
        self.options.insert(capability.to_string(), options);
        self.publish().await;
        Ok(())
    }

    fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    async fn set_settings(&mut self, settings: DeviceSettings) {
        self.settings = settings;
        self.publish().await;
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn set_available(&mut self) {
        self.available = true;
        self.unavailable_reason = None;
        self.publish().await;
    }

    async fn set_unavailable(&mut self, reason: &str) {
        self.available = false;
        self.unavailable_reason = Some(reason.to_string());
        self.publish().await;
    }
}
