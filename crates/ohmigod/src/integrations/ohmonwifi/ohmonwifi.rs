use std::collections::BTreeMap;
use std::collections::HashMap;
use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::OhmOnWifiConfig;
use super::capabilities::declared_capabilities;
use super::client::DeviceApi;
use super::device::DeviceCommand;
use super::device::OhmDevice;
use super::device::Timing;
use super::discovery::DiscoveryEvent;
use super::discovery::DiscoveryResult;
use super::driver::PairingCandidate;
use super::driver::list_devices;
use super::driver::manual_pairing;
use super::handle::PlatformDevice;
use super::scheduler::SchedulerHandle;
use super::settings::DeviceSettings;
use crate::engine::CommandError;
use crate::engine::FlowAction;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;

pub const INTEGRATION_NAME: &str = "ohmonwifi";

/// Capacity of each device actor's command inbox
const DEVICE_INBOX_SIZE: usize = 32;

/// How long shutdown waits for a device actor to finish its current step
const DEVICE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

struct DeviceEntry {
    inbox: mpsc::Sender<DeviceCommand>,
    task: JoinHandle<()>,
}

/// OhmOnWifi integration for ohmigod
///
/// Runs one actor per paired device and keeps the discovery results that
/// pairing offers as candidates.
pub struct OhmOnWifiIntegration<C: DeviceApi> {
    /// Client template; each device gets a clone pointed at its own host
    client: C,
    config: OhmOnWifiConfig,
    devices: HashMap<String, DeviceEntry>,
    discovered: BTreeMap<String, DiscoveryResult>,
    to_engine: Option<FromIntegrationSender>,
}

impl<C: DeviceApi> OhmOnWifiIntegration<C> {
    pub fn new(client: C, config: &OhmOnWifiConfig) -> Self {
        Self {
            client,
            config: config.clone(),
            devices: HashMap::new(),
            discovered: BTreeMap::new(),
            to_engine: None,
        }
    }

    fn timing(&self) -> Timing {
        Timing {
            settle_delay: self.config.settle_delay(),
            write_delay: self.config.write_delay(),
        }
    }

    fn client_for(&self, host: &str) -> C {
        let mut client = self.client.clone();
        client.set_host(host);
        client
    }

    /// Register a device with the engine and start its actor
    async fn spawn_device(
        &mut self,
        id: String,
        name: String,
        settings: DeviceSettings,
        capabilities: Option<Vec<String>>,
        added: bool,
    ) -> Result<(), Box<dyn Error + Send>> {
        let to_engine = self.to_engine.clone().ok_or_else(not_set_up)?;

        let handle = PlatformDevice::new(
            id.clone(),
            name.clone(),
            INTEGRATION_NAME,
            capabilities.unwrap_or_else(declared_capabilities),
            settings.clone(),
            to_engine.clone(),
        );
        handle.register().await;

        let (tick_tx, ticks) = mpsc::channel(1);
        let (inbox_tx, inbox) = mpsc::channel(DEVICE_INBOX_SIZE);
        let device = OhmDevice::new(
            Box::new(handle),
            self.client_for(&settings.address),
            SchedulerHandle::new(tick_tx),
            self.timing(),
            to_engine,
        );

        info!("Starting device {} ({}) at {}", name, id, settings.address);
        let task = tokio::spawn(device.run(inbox, ticks, added));
        self.devices.insert(
            id,
            DeviceEntry {
                inbox: inbox_tx,
                task,
            },
        );
        Ok(())
    }

    /// Hand a command to a device actor, failing it when the device is gone
    async fn forward(&self, device_id: &str, command: DeviceCommand) {
        let Some(entry) = self.devices.get(device_id) else {
            command.fail(CommandError::UnknownDevice(device_id.to_string()));
            return;
        };

        if let Err(mpsc::error::SendError(command)) = entry.inbox.send(command).await {
            warn!("Device {} is not running", device_id);
            command.fail(CommandError::Unavailable);
        }
    }

    async fn delete_device(&mut self, device_id: String, reply: crate::engine::Reply<()>) {
        let Some(entry) = self.devices.remove(&device_id) else {
            let _ = reply.send(Err(CommandError::UnknownDevice(device_id)));
            return;
        };
        let Some(to_engine) = self.to_engine.clone() else {
            let _ = reply.send(Err(CommandError::Unavailable));
            return;
        };

        let (done_tx, done_rx) = oneshot::channel();
        if entry
            .inbox
            .send(DeviceCommand::Delete { reply: done_tx })
            .await
            .is_err()
        {
            warn!("Device {} stopped before it was deleted", device_id);
        }

        // The actor may be mid-poll; finish the removal without blocking the integration
        tokio::spawn(async move {
            let _ = done_rx.await;
            if let Err(e) = entry.task.await {
                warn!("Device {} task failed: {}", device_id, e);
            }

            let msg = FromIntegrationMessage::DeviceRemoved {
                device_id: device_id.clone(),
            };
            if let Err(e) = to_engine.send(msg).await {
                warn!("Failed to send DeviceRemoved message: {}", e);
            }
            info!("Deleted device {}", device_id);
            let _ = reply.send(Ok(()));
        });
    }

    async fn handle_discovery(&mut self, event: DiscoveryEvent) {
        let result = event.result().clone();
        debug!("Discovery {:?} for {}", event, result.id);

        match &event {
            DiscoveryEvent::Found(_) | DiscoveryEvent::AddressChanged(_) => {
                self.discovered.insert(result.id.clone(), result);
            }
            DiscoveryEvent::Lost(_) => {
                self.discovered.remove(&result.id);
            }
        }

        // Every device decides for itself whether the result is about it
        for (device_id, entry) in &self.devices {
            if entry
                .inbox
                .send(DeviceCommand::Discovery(event.clone()))
                .await
                .is_err()
            {
                warn!("Device {} is not running", device_id);
            }
        }
    }

    async fn add_device(&mut self, candidate: PairingCandidate) -> Result<String, CommandError> {
        let id = candidate.data.id.clone();
        if id.is_empty() {
            return Err(CommandError::Rejected("pairing candidate has no id".to_string()));
        }
        if self.devices.contains_key(&id) {
            return Err(CommandError::Rejected(format!("device {} is already paired", id)));
        }

        let settings = candidate.device_settings(self.config.default_interval);
        self.spawn_device(id.clone(), candidate.name, settings, None, true)
            .await
            .map_err(|_| CommandError::Unavailable)?;
        Ok(id)
    }
}

fn not_set_up() -> Box<dyn Error + Send> {
    Box::new(std::io::Error::other("ohmonwifi integration is not set up"))
}

#[async_trait]
impl<C: DeviceApi> Integration for OhmOnWifiIntegration<C> {
    fn name(&self) -> &str {
        INTEGRATION_NAME
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        self.to_engine = Some(tx);

        info!(
            "OhmOnWifi integration starting with {} paired device(s)",
            self.config.devices.len()
        );
        for device in self.config.devices.clone() {
            self.spawn_device(
                device.id,
                device.name,
                device.settings,
                device.capabilities,
                false,
            )
            .await?;
        }

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::RunFlowAction {
                device_id,
                action: FlowAction::SetTargetTemperature { temperature },
                reply,
            } => {
                self.forward(
                    &device_id,
                    DeviceCommand::SetTargetTemperature { temperature, reply },
                )
                .await;
            }
            ToIntegrationMessage::UpdateSettings {
                device_id,
                patch,
                reply,
            } => {
                self.forward(&device_id, DeviceCommand::UpdateSettings { patch, reply })
                    .await;
            }
            ToIntegrationMessage::RenameDevice {
                device_id,
                name,
                reply,
            } => {
                self.forward(&device_id, DeviceCommand::Rename { name, reply })
                    .await;
            }
            ToIntegrationMessage::DeleteDevice { device_id, reply } => {
                self.delete_device(device_id, reply).await;
            }
            ToIntegrationMessage::Discovery(event) => {
                self.handle_discovery(event).await;
            }
            ToIntegrationMessage::ListPairingCandidates { reply } => {
                let candidates = list_devices(self.discovered.values());
                info!("Pairing: {} discovered device(s)", candidates.len());
                let _ = reply.send(Ok(candidates));
            }
            ToIntegrationMessage::ManualPairing { address, reply } => {
                let client = self.client_for(&address);
                tokio::spawn(async move {
                    let result = manual_pairing(&client).await.map_err(|e| {
                        warn!("Manual pairing with {} failed: {}", address, e);
                        CommandError::from(e)
                    });
                    let _ = reply.send(result);
                });
            }
            ToIntegrationMessage::AddDevice { candidate, reply } => {
                let result = self.add_device(candidate).await;
                let _ = reply.send(result);
            }
        }

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("OhmOnWifi integration shutting down");

        // Dropping the inboxes ends each actor after its current step
        for (device_id, entry) in self.devices.drain() {
            let DeviceEntry { inbox, mut task } = entry;
            drop(inbox);
            if tokio::time::timeout(DEVICE_SHUTDOWN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!("Device {} did not stop in time, aborting", device_id);
                task.abort();
            }
        }

        Ok(())
    }
}
