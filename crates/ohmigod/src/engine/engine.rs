use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::ToIntegrationSender;
use super::message::CommandError;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::DeviceState;
use super::state::State;
use crate::engine::IntegrationContext;

/// ohmigod engine
///
/// This structure handles the flow of events from integrations, routes commands to the
/// integration owning a device, and maintains a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of device_id -> integration name for routing messages
    device_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Communication channels to integrations (for commands)
    integration_channels: std::sync::Mutex<HashMap<String, ToIntegrationSender>>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Handles for integration tasks
    integration_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// How long shutdown waits for each integration task to finish
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            device_integration_map: std::sync::Mutex::new(HashMap::new()),
            integration_channels: std::sync::Mutex::new(HashMap::new()),
            message_rx: Mutex::new(message_rx),
            message_tx,
            integration_handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register integrations from configuration
    ///
    /// Runs every factory in the integration registry and registers the ones
    /// that are configured.
    pub fn register_integrations_from_config(&mut self, cfg: &crate::config::Config) {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integration = match constr(&ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        if let Ok(mut channels) = self.integration_channels.lock() {
            channels.insert(name.clone(), to_integration_tx);
        }

        // Spawn integration task
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        if let Ok(mut handles) = self.integration_handles.lock() {
            handles.push(handle);
        }
    }

    /// Send a command to the integration owning the addressed device
    pub fn send_command(&self, msg: ToIntegrationMessage) -> Result<(), CommandError> {
        let device_id = msg
            .device_id()
            .ok_or_else(|| CommandError::Rejected("command is not addressed to a device".into()))?
            .to_string();

        let integration_name = self
            .device_integration_map
            .lock()
            .map_err(|_| CommandError::Unavailable)?
            .get(&device_id)
            .cloned()
            .ok_or(CommandError::UnknownDevice(device_id))?;

        self.send_to_integration(&integration_name, msg)
    }

    /// Send a command to an integration by name
    pub fn send_to_integration(
        &self,
        integration_name: &str,
        msg: ToIntegrationMessage,
    ) -> Result<(), CommandError> {
        let channels = self
            .integration_channels
            .lock()
            .map_err(|_| CommandError::Unavailable)?;

        let tx = channels
            .get(integration_name)
            .ok_or_else(|| CommandError::UnknownIntegration(integration_name.to_string()))?;

        tx.send(msg).map_err(|_| CommandError::Unavailable)
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) {
        info!("Engine starting");

        // Main event loop - only receives FromIntegration messages
        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
    }

    /// Close all integration channels and wait for the integrations to shut down
    pub async fn shutdown(&self) {
        if let Ok(mut channels) = self.integration_channels.lock() {
            channels.clear();
        }

        let handles = match self.integration_handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => Vec::new(),
        };

        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Integration task failed: {}", e),
                Err(_) => warn!("Integration task did not stop within {:?}", SHUTDOWN_TIMEOUT),
            }
        }
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Current state of a single device
    pub fn device(&self, device_id: &str) -> Option<DeviceState> {
        self.state.load().devices.get(device_id).cloned()
    }

    fn update_state(&self, f: impl FnOnce(&mut State)) {
        let mut state = State::clone(&self.state.load());
        f(&mut state);
        self.state.store(Arc::new(state));
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::DeviceDiscovered {
                device_id,
                integration_name,
            } => {
                info!("Device registered: {} (from {})", device_id, integration_name);

                // Record which integration owns this device for command routing.
                if let Ok(mut map) = self.device_integration_map.lock() {
                    map.insert(device_id, integration_name);
                }
            }
            FromIntegrationMessage::DeviceStateChanged { mut state } => {
                self.update_state(|s| {
                    if let Some(previous) = s.devices.get(&state.id) {
                        state.last_command = previous.last_command.clone();
                    }
                    s.devices.insert(state.id.clone(), state);
                });
            }
            FromIntegrationMessage::DeviceRemoved { device_id } => {
                info!("Device removed: {}", device_id);

                self.update_state(|s| {
                    s.devices.remove(&device_id);
                });

                if let Ok(mut map) = self.device_integration_map.lock() {
                    map.remove(&device_id);
                }
            }
            FromIntegrationMessage::CommandOutcome { device_id, outcome } => {
                match &outcome.error {
                    Some(e) => warn!("Command '{}' on {} failed: {}", outcome.command, device_id, e),
                    None => info!("Command '{}' on {} succeeded", outcome.command, device_id),
                }

                self.update_state(|s| {
                    if let Some(device) = s.devices.get_mut(&device_id) {
                        device.last_command = Some(outcome);
                    }
                });
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
