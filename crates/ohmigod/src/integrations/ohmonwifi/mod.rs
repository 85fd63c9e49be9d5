mod capabilities;
mod client;
mod config;
mod device;
mod discovery;
mod driver;
mod error;
mod handle;
// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod ohmonwifi;
mod protocol;
mod scheduler;
mod settings;

use anyhow::Context;
pub use capabilities::Capability;
pub use capabilities::CapabilityDiff;
pub use client::DeviceApi;
pub use client::HttpDeviceClient;
pub use config::Config as OhmOnWifiConfig;
pub use config::PairedDevice;
pub use device::DeviceCommand;
pub use device::OhmDevice;
pub use device::Timing;
pub use discovery::DiscoveryEvent;
pub use discovery::DiscoveryResult;
pub use discovery::DiscoveryTxt;
pub use driver::PairingCandidate;
pub use driver::list_devices;
pub use driver::manual_pairing;
pub use error::Error;
pub use handle::DeviceHandle;
pub use handle::HandleError;
pub use handle::PlatformDevice;
use linkme::distributed_slice;
pub use ohmonwifi::INTEGRATION_NAME;
pub use ohmonwifi::OhmOnWifiIntegration;
pub use protocol::Ack;
pub use protocol::ConfigSnapshot;
pub use protocol::InfoSnapshot;
pub use protocol::SensorType;
pub use scheduler::SchedulerError;
pub use scheduler::SchedulerHandle;
pub use settings::DeviceSettings;
pub use settings::SettingKey;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_ohmonwifi(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let config = if let Some(c) = &ctx.config.integrations.ohmonwifi {
        c
    } else {
        return Ok(None);
    };

    // Hosts are filled in per device
    let client = HttpDeviceClient::new(&config.protocol, "", config.request_timeout())
        .context("Failed to create OhmOnWifi HTTP client")?;
    Ok(Some(Box::new(OhmOnWifiIntegration::new(client, config))))
}
