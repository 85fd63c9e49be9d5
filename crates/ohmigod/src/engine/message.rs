//! Type-safe message system for ohmigod
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use tokio::sync::oneshot;

use super::state::CommandOutcome;
use super::state::DeviceState;
use crate::integrations::ohmonwifi::DiscoveryEvent;
use crate::integrations::ohmonwifi::PairingCandidate;

/// Errors returned to whoever sent a command through the engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unknown integration: {0}")]
    UnknownIntegration(String),

    /// The command was refused before reaching the device
    #[error("{0}")]
    Rejected(String),

    #[error("device error: {0}")]
    Device(String),

    /// The integration or device task is gone
    #[error("integration is not running")]
    Unavailable,
}

pub type Reply<T> = oneshot::Sender<Result<T, CommandError>>;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug)]
pub enum FromIntegrationMessage {
    /// A device was registered by an integration
    DeviceDiscovered {
        device_id: String,
        integration_name: String,
    },

    /// Full snapshot of a device after any platform-side change
    DeviceStateChanged { state: DeviceState },

    /// A device was deleted
    DeviceRemoved { device_id: String },

    /// A fire-and-forget command finished
    CommandOutcome {
        device_id: String,
        outcome: CommandOutcome,
    },
}

/// Flow actions that can be run against a device
#[derive(Debug, Clone, PartialEq)]
pub enum FlowAction {
    SetTargetTemperature { temperature: f64 },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug)]
pub enum ToIntegrationMessage {
    /// Run a flow action; validation failures are reported through `reply`
    RunFlowAction {
        device_id: String,
        action: FlowAction,
        reply: Reply<()>,
    },

    /// Merge a partial settings object; replies with the changed keys
    UpdateSettings {
        device_id: String,
        patch: serde_json::Value,
        reply: Reply<Vec<String>>,
    },

    RenameDevice {
        device_id: String,
        name: String,
        reply: Reply<()>,
    },

    DeleteDevice {
        device_id: String,
        reply: Reply<()>,
    },

    /// Discovery result from the network
    Discovery(DiscoveryEvent),

    /// Pairing: devices found by discovery
    ListPairingCandidates { reply: Reply<Vec<PairingCandidate>> },

    /// Pairing: identify a device by address
    ManualPairing {
        address: String,
        reply: Reply<PairingCandidate>,
    },

    /// Pairing: add a device; replies with its id
    AddDevice {
        candidate: PairingCandidate,
        reply: Reply<String>,
    },
}

impl ToIntegrationMessage {
    /// Device the message is addressed to, if any
    pub fn device_id(&self) -> Option<&str> {
        match self {
            ToIntegrationMessage::RunFlowAction { device_id, .. }
            | ToIntegrationMessage::UpdateSettings { device_id, .. }
            | ToIntegrationMessage::RenameDevice { device_id, .. }
            | ToIntegrationMessage::DeleteDevice { device_id, .. } => Some(device_id),
            ToIntegrationMessage::Discovery(_)
            | ToIntegrationMessage::ListPairingCandidates { .. }
            | ToIntegrationMessage::ManualPairing { .. }
            | ToIntegrationMessage::AddDevice { .. } => None,
        }
    }
}
