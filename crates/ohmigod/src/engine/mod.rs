// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod engine;
mod integration;
mod message;
pub mod state;

pub use engine::Engine;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::CommandError;
pub use message::FlowAction;
pub use message::FromIntegrationMessage;
pub use message::Reply;
pub use message::ToIntegrationMessage;
pub use state::CapabilityOptions;
pub use state::CapabilityValue;
pub use state::CommandOutcome;
pub use state::DeviceState;
pub use state::State;
