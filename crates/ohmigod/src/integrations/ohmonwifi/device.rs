//! One paired OhmOnWifi device.
//!
//! `OhmDevice` owns the platform handle, the device client and the polling
//! timer of a single device. It runs as an actor (`OhmDevice::run`) that
//! serializes polls, settings changes, discovery callbacks and flow actions.
//! Commands towards the device are fire-and-forget: they run on their own
//! task and report a `CommandOutcome` to the engine when they finish.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::capabilities::Capability;
use super::capabilities::check_capabilities;
use super::client::DeviceApi;
use super::discovery::DiscoveryEvent;
use super::discovery::DiscoveryResult;
use super::error::Error;
use super::error::Result;
use super::handle::DeviceHandle;
use super::protocol::Ack;
use super::protocol::MergedDeviceState;
use super::scheduler::SchedulerHandle;
use super::scheduler::Tick;
use super::settings::DeviceSettings;
use super::settings::SettingKey;
use crate::engine::CapabilityOptions;
use crate::engine::CapabilityValue;
use crate::engine::CommandError;
use crate::engine::CommandOutcome;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Reply;

/// Delays applied while reconciling platform state
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Between capability removals and additions
    pub settle_delay: Duration,

    /// Before each capability value write
    pub write_delay: Duration,
}

/// Requests handled by a device actor
#[derive(Debug)]
pub enum DeviceCommand {
    SetTargetTemperature { temperature: f64, reply: Reply<()> },
    UpdateSettings {
        patch: serde_json::Value,
        reply: Reply<Vec<String>>,
    },
    Rename { name: String, reply: Reply<()> },
    Discovery(DiscoveryEvent),
    Delete { reply: Reply<()> },
}

impl DeviceCommand {
    /// Answer the command with an error without running it
    pub fn fail(self, error: CommandError) {
        match self {
            DeviceCommand::SetTargetTemperature { reply, .. }
            | DeviceCommand::Rename { reply, .. }
            | DeviceCommand::Delete { reply } => {
                let _ = reply.send(Err(error));
            }
            DeviceCommand::UpdateSettings { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            DeviceCommand::Discovery(_) => {}
        }
    }
}

pub struct OhmDevice<C: DeviceApi> {
    handle: Box<dyn DeviceHandle>,
    client: C,
    scheduler: SchedulerHandle,
    timing: Timing,
    to_engine: FromIntegrationSender,
    /// Uptime is only written on every other successful poll
    uptime_update: bool,
}

impl<C: DeviceApi> OhmDevice<C> {
    pub fn new(
        handle: Box<dyn DeviceHandle>,
        client: C,
        scheduler: SchedulerHandle,
        timing: Timing,
        to_engine: FromIntegrationSender,
    ) -> Self {
        Self {
            handle,
            client,
            scheduler,
            timing,
            to_engine,
            uptime_update: true,
        }
    }

    pub fn handle(&self) -> &dyn DeviceHandle {
        self.handle.as_ref()
    }

    fn name(&self) -> String {
        self.handle.name().to_string()
    }

    /// Drive the device until it is deleted or its inbox closes
    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<DeviceCommand>,
        mut ticks: mpsc::Receiver<Tick>,
        added: bool,
    ) {
        if added {
            self.on_added().await;
        }
        self.init().await;

        loop {
            tokio::select! {
                Some(tick) = ticks.recv() => {
                    if self.scheduler.is_current(tick) {
                        self.refresh(false).await;
                    } else {
                        debug!("[{}] Ignoring tick from a stopped timer", self.name());
                    }
                }
                command = inbox.recv() => match command {
                    Some(DeviceCommand::Delete { reply }) => {
                        self.on_deleted();
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.scheduler.stop();
                        break;
                    }
                },
            }
        }

        debug!("[{}] Device task stopped", self.name());
    }

    async fn handle_command(&mut self, command: DeviceCommand) {
        match command {
            DeviceCommand::SetTargetTemperature { temperature, reply } => {
                let result = self
                    .on_set_target_temperature(temperature)
                    .map_err(CommandError::from);
                let _ = reply.send(result);
            }
            DeviceCommand::UpdateSettings { patch, reply } => {
                let result = self
                    .update_settings(&patch)
                    .await
                    .map(|keys| keys.iter().map(ToString::to_string).collect())
                    .map_err(CommandError::from);
                let _ = reply.send(result);
            }
            DeviceCommand::Rename { name, reply } => {
                self.on_renamed(&name).await;
                let _ = reply.send(Ok(()));
            }
            DeviceCommand::Discovery(event) => self.on_discovery(event).await,
            DeviceCommand::Delete { reply } => {
                self.on_deleted();
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Bring the device up: repair capabilities, poll once and arm the timer
    pub async fn init(&mut self) {
        let name = self.name();
        info!("[{}] Initializing", name);
        self.handle
            .set_unavailable(&format!("Initializing {}", name))
            .await;

        check_capabilities(self.handle.as_mut(), self.timing.settle_delay).await;

        let settings = self.handle.settings().clone();
        if let Err(e) = self
            .handle
            .set_capability_options(
                Capability::TargetTemperature.as_ref(),
                CapabilityOptions::range(settings.min_temp, settings.max_temp),
            )
            .await
        {
            warn!("[{}] Failed to set target temperature range: {}", name, e);
        }

        self.refresh(true).await;

        // Wait a full interval before the first timed poll
        let interval = settings.poll_interval();
        if let Err(e) = self.scheduler.start_after(interval, interval) {
            warn!("[{}] Failed to start polling: {}", name, e);
        }

        info!("[{}] Initialized, polling every {:?}", name, interval);
    }

    /// Seed sensor type and firmware right after pairing
    pub async fn on_added(&mut self) {
        let name = self.name();
        info!("[{}] Added", name);

        match self.client.get_info().await.and_then(|info| info.validate()) {
            Ok(info) => {
                debug!("[{}] Added device info: {:?}", name, info);
                let mut settings = self.handle.settings().clone();
                if let Some(sensor_type) = info.sensor_type {
                    settings.sensor_type = sensor_type;
                }
                if let Some(firmware) = info.firmware {
                    settings.firmware = firmware;
                }
                self.handle.set_settings(settings).await;
            }
            Err(e) => {
                warn!("[{}] Failed to read device after pairing: {}", name, e);
                self.handle
                    .set_unavailable(&format!("Device offline - {}", e))
                    .await;
            }
        }
    }

    /// Poll the device; failures only change availability
    pub async fn refresh(&mut self, first_run: bool) {
        if let Err(e) = self.try_refresh(first_run).await {
            warn!("[{}] Device offline: {}", self.name(), e);
            self.handle
                .set_unavailable(&format!("Device offline - {}", e))
                .await;
        }
    }

    async fn try_refresh(&mut self, first_run: bool) -> Result<()> {
        let info = self.client.get_info().await?.validate()?;
        let config = self.client.get_config().await?;
        debug!("[{}] info: {:?} config: {:?}", self.name(), info, config);

        let device = MergedDeviceState::merge(info, config)?;

        if !self.handle.is_available() {
            self.handle.set_available().await;
        }

        let settings = self.handle.settings().clone();

        self.update_capability_options(
            Capability::TargetTemperature,
            CapabilityOptions::range(device.min_temp, device.max_temp),
        )
        .await;
        self.set_value(Capability::TargetTemperature, device.temperature.into(), first_run)
            .await;
        self.set_value(Capability::OutputTemperature, device.temperature.into(), first_run)
            .await;
        self.set_value(Capability::OutputResistance, device.resistance.into(), first_run)
            .await;
        self.set_value(
            Capability::MeasureType,
            format!("{} - {}", settings.sensor_type, device.type_name).into(),
            first_run,
        )
        .await;

        if self.uptime_update {
            self.set_value(Capability::MeasureUptime, device.uptime.into(), first_run)
                .await;
        }
        self.uptime_update = !self.uptime_update;

        let mut updated = settings.clone();
        if let Some(sensor_type) = device.sensor_type {
            updated.sensor_type = sensor_type;
        }
        if let Some(firmware) = device.firmware {
            updated.firmware = firmware;
        }
        if updated != settings {
            debug!(
                "[{}] Device reports type={} firmware={}",
                self.name(),
                updated.sensor_type,
                updated.firmware
            );
            self.handle.set_settings(updated).await;
        }

        Ok(())
    }

    /// Write a capability value after the write delay.
    ///
    /// Capabilities that are not registered are skipped.
    async fn set_value(&mut self, key: Capability, value: CapabilityValue, first_run: bool) {
        if !self.handle.has_capability(key.as_ref()) {
            return;
        }

        let old = self.handle.capability_value(key.as_ref());
        if old.as_ref() != Some(&value) {
            let old = old.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string());
            if first_run {
                debug!("[{}] oldValue={}, newValue={} => {}", self.name(), old, value, key);
            } else {
                info!("[{}] oldValue={}, newValue={} => {}", self.name(), old, value, key);
            }
        }

        if !self.timing.write_delay.is_zero() {
            tokio::time::sleep(self.timing.write_delay).await;
        }

        if let Err(e) = self.handle.set_capability_value(key.as_ref(), value).await {
            warn!("[{}] Failed to set {}: {}", self.name(), key, e);
        }
    }

    /// Replace a capability's options when any of them differs
    async fn update_capability_options(&mut self, key: Capability, options: CapabilityOptions) {
        if !self.handle.has_capability(key.as_ref()) {
            return;
        }

        let old = self.handle.capability_options(key.as_ref());
        if old == options {
            return;
        }

        info!(
            "[{}] updateCapabilityOptions - {} - old={:?}, new={:?}",
            self.name(),
            key,
            old,
            options
        );
        if let Err(e) = self.handle.set_capability_options(key.as_ref(), options).await {
            warn!("[{}] Failed to update options of {}: {}", self.name(), key, e);
        }
    }

    /// Flow action: validate against the current range, then relay
    pub fn on_set_target_temperature(&self, temperature: f64) -> Result<()> {
        let options = self.handle.capability_options(Capability::TargetTemperature.as_ref());
        let below = options.min.is_some_and(|min| temperature < min);
        let above = options.max.is_some_and(|max| temperature > max);

        if below || above || temperature.is_nan() {
            return Err(Error::Validation(format!(
                "Temperature must be between {} and {}",
                bound(options.min),
                bound(options.max)
            )));
        }

        self.on_capability_target_temperature(temperature);
        Ok(())
    }

    /// Relay a target temperature with the configured sensor type
    pub fn on_capability_target_temperature(&self, temperature: f64) {
        info!("[{}] Setting target temperature: {}", self.name(), temperature);
        let sensor_type = self.handle.settings().sensor_type.explicit();
        self.dispatch(format!("set_temperature {}", temperature), move |client| async move {
            client.set_temperature(temperature, sensor_type).await
        });
    }

    /// Validate and store a settings patch, then relay the changes
    pub async fn update_settings(&mut self, patch: &serde_json::Value) -> Result<Vec<SettingKey>> {
        let old = self.handle.settings().clone();
        let (new, changed) = old.with_patch(patch)?;
        if changed.is_empty() {
            return Ok(changed);
        }

        self.handle.set_settings(new.clone()).await;
        self.on_settings(&old, &new, &changed);
        Ok(changed)
    }

    /// Push changed settings to the client, the timer and the device
    pub fn on_settings(&mut self, _old: &DeviceSettings, new: &DeviceSettings, changed: &[SettingKey]) {
        let name = self.name();
        info!("[{}] onSettings: {:?}", name, changed);

        if changed.contains(&SettingKey::Address) {
            self.client.set_host(&new.address);
        }

        if changed.contains(&SettingKey::Interval) {
            self.scheduler.stop();
            if let Err(e) = self.scheduler.start(new.poll_interval()) {
                warn!("[{}] Failed to restart polling: {}", name, e);
            }
        }

        if changed.contains(&SettingKey::Type) {
            if let Some(sensor_type) = new.sensor_type.explicit() {
                let target = self
                    .handle
                    .capability_value(Capability::TargetTemperature.as_ref())
                    .and_then(|v| v.as_f64());
                match target {
                    Some(temperature) => {
                        info!("[{}] onSettings - type: {}", name, sensor_type);
                        self.dispatch(format!("set_type {}", sensor_type), move |client| async move {
                            client.set_temperature(temperature, Some(sensor_type)).await
                        });
                    }
                    None => warn!(
                        "[{}] Not sending sensor type {}, no target temperature known yet",
                        name, sensor_type
                    ),
                }
            }
        }

        if changed.contains(&SettingKey::MinTemp) {
            let min_temp = new.min_temp;
            info!("[{}] onSettings - min_temp: {}", name, min_temp);
            self.dispatch(format!("set_min_temp {}", min_temp), move |client| async move {
                client.set_config_min_temp(min_temp).await
            });
        }

        if changed.contains(&SettingKey::MaxTemp) {
            let max_temp = new.max_temp;
            info!("[{}] onSettings - max_temp: {}", name, max_temp);
            self.dispatch(format!("set_max_temp {}", max_temp), move |client| async move {
                client.set_config_max_temp(max_temp).await
            });
        }
    }

    pub async fn on_renamed(&mut self, name: &str) {
        info!("[{}] Renamed to {}", self.name(), name);
        self.handle.set_name(name).await;

        let name = name.to_string();
        self.dispatch(format!("set_name {}", name), move |client| async move {
            client.set_config_name(&name).await
        });
    }

    pub fn on_deleted(&mut self) {
        info!("[{}] Deleted", self.name());
        self.scheduler.stop();
    }

    /// Whether a discovery result describes this device
    pub fn matches(&self, result: &DiscoveryResult) -> bool {
        result.id == self.handle.id()
    }

    pub async fn on_discovery(&mut self, event: DiscoveryEvent) {
        if !self.matches(event.result()) {
            return;
        }

        match event {
            DiscoveryEvent::Found(result) => self.on_discovery_available(&result).await,
            DiscoveryEvent::AddressChanged(result) => {
                self.on_discovery_address_changed(&result).await
            }
            DiscoveryEvent::Lost(result) => self.on_discovery_last_seen_changed(&result).await,
        }
    }

    pub async fn on_discovery_available(&mut self, result: &DiscoveryResult) {
        info!(
            "[{}] Discovered at {} (type: {})",
            self.name(),
            result.address,
            result.txt.devicetype
        );
        self.handle.set_available().await;
    }

    pub async fn on_discovery_address_changed(&mut self, result: &DiscoveryResult) {
        let host = result.host();
        info!("[{}] Address changed to {}", self.name(), host);

        self.client.set_host(&host);
        let mut settings = self.handle.settings().clone();
        settings.address = host;
        self.handle.set_settings(settings).await;
        self.handle.set_available().await;
    }

    pub async fn on_discovery_last_seen_changed(&mut self, result: &DiscoveryResult) {
        info!("[{}] Lost at {}", self.name(), result.address);
        self.handle.set_unavailable("Discovery device offline.").await;
    }

    /// Run a device request on its own task and report how it went
    fn dispatch<F, Fut>(&self, command: String, request: F)
    where
        F: FnOnce(C) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Ack>> + Send + 'static,
    {
        let client = self.client.clone();
        let to_engine = self.to_engine.clone();
        let device_id = self.handle.id().to_string();
        let name = self.name();

        tokio::spawn(async move {
            let error = match request(client).await {
                Ok(_) => {
                    debug!("[{}] {} acknowledged", name, command);
                    None
                }
                Err(e) => {
                    warn!("[{}] {} failed: {}", name, command, e);
                    Some(e.to_string())
                }
            };

            let msg = FromIntegrationMessage::CommandOutcome {
                device_id,
                outcome: CommandOutcome { command, error },
            };
            if let Err(e) = to_engine.send(msg).await {
                warn!("[{}] Failed to send CommandOutcome message: {}", name, e);
            }
        });
    }
}

fn bound(value: Option<f64>) -> String {
    value.map_or_else(|| "unset".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DeviceState;
    use crate::integrations::ohmonwifi::capabilities::declared_capabilities;
    use crate::integrations::ohmonwifi::client::MockDeviceApi;
    use crate::integrations::ohmonwifi::discovery::DiscoveryTxt;
    use crate::integrations::ohmonwifi::handle::PlatformDevice;
    use crate::integrations::ohmonwifi::protocol::ConfigSnapshot;
    use crate::integrations::ohmonwifi::protocol::InfoSnapshot;
    use crate::integrations::ohmonwifi::protocol::SensorType;
    use tokio::sync::oneshot;

    fn info() -> InfoSnapshot {
        InfoSnapshot {
            device_name: Some("Boiler".to_string()),
            device_id: Some("ohm-1".to_string()),
            firmware: Some("1.4.2".to_string()),
            uptime: Some(86400),
            temperature: Some(21.4),
            resistance: Some(10234.0),
            sensor_type: Some(SensorType::new(2)),
            type_name: Some("PT100".to_string()),
            ..Default::default()
        }
    }

    fn config() -> ConfigSnapshot {
        ConfigSnapshot {
            device_name: Some("Boiler".to_string()),
            min_temp: Some(5.0),
            max_temp: Some(35.0),
            types: None,
        }
    }

    fn settings(sensor_type: SensorType) -> DeviceSettings {
        DeviceSettings {
            sensor_type,
            firmware: "1.4.2".to_string(),
            ..DeviceSettings::new("192.0.2.5", 10)
        }
    }

    struct Harness {
        device: OhmDevice<MockDeviceApi>,
        client: MockDeviceApi,
        rx: mpsc::Receiver<FromIntegrationMessage>,
        ticks: mpsc::Receiver<Tick>,
    }

    fn harness(settings: DeviceSettings) -> Harness {
        let (tx, rx) = mpsc::channel(1024);
        let (tick_tx, ticks) = mpsc::channel(1);
        let client = MockDeviceApi::new(info(), config());
        let handle = PlatformDevice::new(
            "ohm-1",
            "Boiler",
            "ohmonwifi",
            declared_capabilities(),
            settings,
            tx.clone(),
        );
        let device = OhmDevice::new(
            Box::new(handle),
            client.clone(),
            SchedulerHandle::new(tick_tx),
            Timing {
                settle_delay: Duration::from_millis(2000),
                write_delay: Duration::from_millis(10),
            },
            tx,
        );
        Harness {
            device,
            client,
            rx,
            ticks,
        }
    }

    fn value(device: &OhmDevice<MockDeviceApi>, capability: Capability) -> Option<CapabilityValue> {
        device.handle().capability_value(capability.as_ref())
    }

    async fn next_outcome(rx: &mut mpsc::Receiver<FromIntegrationMessage>) -> CommandOutcome {
        loop {
            match rx.recv().await {
                Some(FromIntegrationMessage::CommandOutcome { outcome, .. }) => return outcome,
                Some(_) => continue,
                None => panic!("engine channel closed"),
            }
        }
    }

    fn last_state(rx: &mut mpsc::Receiver<FromIntegrationMessage>) -> Option<DeviceState> {
        let mut last = None;
        while let Ok(msg) = rx.try_recv() {
            if let FromIntegrationMessage::DeviceStateChanged { state } = msg {
                last = Some(state);
            }
        }
        last
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_maps_device_state() {
        let mut h = harness(settings(SensorType::new(2)));

        h.device.refresh(true).await;

        let device = &h.device;
        assert!(device.handle().is_available());
        assert_eq!(
            device.handle().capability_options("target_temperature"),
            CapabilityOptions::range(5.0, 35.0)
        );
        assert_eq!(value(device, Capability::TargetTemperature), Some(21.4f64.into()));
        assert_eq!(value(device, Capability::OutputTemperature), Some(21.4f64.into()));
        assert_eq!(value(device, Capability::OutputResistance), Some(10234.0f64.into()));
        assert_eq!(value(device, Capability::MeasureType), Some("2 - PT100".into()));
        assert_eq!(value(device, Capability::MeasureUptime), Some(86400u64.into()));
        assert_eq!(h.client.requests(), vec!["/info", "/getconfig"]);

        let state = last_state(&mut h.rx).unwrap();
        assert_eq!(state.values.get("measure_type"), Some(&"2 - PT100".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_availability_follows_polls() {
        let mut h = harness(settings(SensorType::new(2)));

        h.device.refresh(true).await;
        assert!(h.device.handle().is_available());

        h.client.set_offline(true);
        h.device.refresh(false).await;
        let state = last_state(&mut h.rx).unwrap();
        assert!(!state.available);
        let reason = state.unavailable_reason.unwrap();
        assert!(reason.starts_with("Device offline - "), "{}", reason);
        assert!(reason.contains("connection refused"), "{}", reason);

        h.client.set_offline(false);
        h.device.refresh(false).await;
        assert!(h.device.handle().is_available());
        assert!(last_state(&mut h.rx).unwrap().unavailable_reason.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_uptime_marks_unavailable() {
        let mut h = harness(settings(SensorType::new(2)));
        h.client.update(|state| state.info.uptime = None);

        h.device.refresh(true).await;

        let state = last_state(&mut h.rx).unwrap();
        assert!(!state.available);
        assert_eq!(
            state.unavailable_reason.as_deref(),
            Some("Device offline - Couldn't get uptime from device, check device.")
        );
        // Config is never fetched for a rejected snapshot
        assert_eq!(h.client.requests(), vec!["/info"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_envelope_marks_unavailable() {
        let mut h = harness(settings(SensorType::new(2)));
        h.client.update(|state| {
            state.info = InfoSnapshot {
                errno: Some(serde_json::json!(-111)),
                code: Some("ECONNREFUSED".to_string()),
                address: Some("192.0.2.5".to_string()),
                port: Some("80".to_string()),
                ..Default::default()
            }
        });

        h.device.refresh(false).await;

        let reason = unavailable_reason(&mut h.rx);
        assert!(reason.contains("ECONNREFUSED 192.0.2.5:80"), "{}", reason);
    }

    fn unavailable_reason(rx: &mut mpsc::Receiver<FromIntegrationMessage>) -> String {
        last_state(rx)
            .and_then(|s| s.unavailable_reason)
            .unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime_written_every_other_poll() {
        let mut h = harness(settings(SensorType::new(2)));

        let mut seen = Vec::new();
        for uptime in 1..=5u64 {
            h.client.update(|state| state.info.uptime = Some(uptime));
            h.device.refresh(uptime == 1).await;
            seen.push(value(&h.device, Capability::MeasureUptime));
        }

        assert_eq!(
            seen,
            vec![
                Some(1u64.into()),
                Some(1u64.into()),
                Some(3u64.into()),
                Some(3u64.into()),
                Some(5u64.into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_options_updated_only_on_change() {
        let mut h = harness(settings(SensorType::new(2)));

        h.device.refresh(true).await;
        while h.rx.try_recv().is_ok() {}

        // Same bounds again: no options write, values are rewritten
        h.device.refresh(false).await;
        let mut option_changes = 0;
        let mut previous = CapabilityOptions::range(5.0, 35.0);
        while let Ok(FromIntegrationMessage::DeviceStateChanged { state }) = h.rx.try_recv() {
            let options = state.options.get("target_temperature").copied().unwrap_or_default();
            if options != previous {
                option_changes += 1;
                previous = options;
            }
        }
        assert_eq!(option_changes, 0);

        h.client.update(|state| state.config.max_temp = Some(40.0));
        h.device.refresh(false).await;
        assert_eq!(
            h.device.handle().capability_options("target_temperature"),
            CapabilityOptions::range(5.0, 40.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_action_rejects_out_of_range() {
        let mut h = harness(settings(SensorType::new(2)));
        h.device.refresh(true).await;
        h.client.update(|state| state.requests.clear());

        let err = h.device.on_set_target_temperature(40.0).unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(err.to_string(), "Temperature must be between 5 and 35");
        tokio::task::yield_now().await;
        assert!(h.client.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_action_relays_with_sensor_type() {
        let mut h = harness(settings(SensorType::new(2)));
        h.device.refresh(true).await;
        h.client.update(|state| state.requests.clear());

        h.device.on_set_target_temperature(21.0).unwrap();

        let outcome = next_outcome(&mut h.rx).await;
        assert_eq!(outcome.command, "set_temperature 21");
        assert_eq!(outcome.error, None);
        assert_eq!(
            h.client.requests(),
            vec!["/copydefault/?TYPE=2", "/AT/?T=21&TYPE=2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unset_sensor_type_sends_no_type() {
        let mut h = harness(settings(SensorType::UNSET));
        h.device
            .handle
            .set_capability_options("target_temperature", CapabilityOptions::range(0.0, 100.0))
            .await
            .unwrap();

        h.device.on_set_target_temperature(55.5).unwrap();

        next_outcome(&mut h.rx).await;
        assert_eq!(h.client.requests(), vec!["/AT/?T=55.5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_failure_is_reported() {
        let mut h = harness(settings(SensorType::UNSET));
        h.client.reject("/AT/");

        h.device.on_capability_target_temperature(20.0);

        let outcome = next_outcome(&mut h.rx).await;
        assert_eq!(
            outcome.error.as_deref(),
            Some("device rejected command: out of range")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_are_relayed() {
        let mut h = harness(settings(SensorType::new(2)));
        h.device.refresh(true).await;
        h.client.update(|state| state.requests.clear());

        let patch = serde_json::json!({
            "min_temp": 1,
            "max_temp": 50,
            "type": "4",
            "interval": 30,
        });
        let changed = h.device.update_settings(&patch).await.unwrap();

        assert_eq!(
            changed,
            vec![
                SettingKey::Interval,
                SettingKey::Type,
                SettingKey::MinTemp,
                SettingKey::MaxTemp
            ]
        );
        assert_eq!(h.device.scheduler.interval(), Some(Duration::from_secs(30)));

        let mut commands = Vec::new();
        for _ in 0..3 {
            commands.push(next_outcome(&mut h.rx).await.command);
        }
        commands.sort();
        assert_eq!(commands, vec!["set_max_temp 50", "set_min_temp 1", "set_type 4"]);

        let requests = h.client.requests();
        assert!(requests.contains(&"/setconfig/?min_temp=1".to_string()));
        assert!(requests.contains(&"/setconfig/?max_temp=50".to_string()));
        let copy = requests.iter().position(|r| r == "/copydefault/?TYPE=4").unwrap();
        let set = requests.iter().position(|r| r == "/AT/?T=21.4&TYPE=4").unwrap();
        assert!(copy < set);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unset_type_setting_is_not_pushed() {
        let mut h = harness(settings(SensorType::new(2)));

        let changed = h
            .device
            .update_settings(&serde_json::json!({ "type": "99" }))
            .await
            .unwrap();

        assert_eq!(changed, vec![SettingKey::Type]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.client.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_address_change_from_discovery() {
        let mut h = harness(settings(SensorType::new(2)));
        h.device.handle.set_unavailable("Discovery device offline.").await;

        let moved = DiscoveryResult {
            id: "ohm-1".to_string(),
            address: "192.0.2.9".to_string(),
            port: None,
            txt: DiscoveryTxt::default(),
        };
        h.device
            .on_discovery(DiscoveryEvent::AddressChanged(DiscoveryResult {
                id: "someone-else".to_string(),
                ..moved.clone()
            }))
            .await;
        assert_eq!(h.device.handle().settings().address, "192.0.2.5");

        h.device
            .on_discovery(DiscoveryEvent::AddressChanged(moved))
            .await;
        assert_eq!(h.device.handle().settings().address, "192.0.2.9");
        assert!(h.device.handle().is_available());

        h.device.refresh(false).await;
        assert_eq!(h.client.requests_with_host()[0], "192.0.2.9 /info");
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_lost() {
        let mut h = harness(settings(SensorType::new(2)));

        h.device
            .on_discovery(DiscoveryEvent::Lost(DiscoveryResult {
                id: "ohm-1".to_string(),
                address: "192.0.2.5".to_string(),
                ..Default::default()
            }))
            .await;

        assert_eq!(unavailable_reason(&mut h.rx), "Discovery device offline.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rename_is_pushed() {
        let mut h = harness(settings(SensorType::new(2)));

        h.device.on_renamed("Kitchen").await;

        assert_eq!(h.device.handle().name(), "Kitchen");
        assert_eq!(next_outcome(&mut h.rx).await.command, "set_name Kitchen");
        assert_eq!(h.client.requests(), vec!["/setconfig/?device_name=Kitchen"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_added_seeds_settings() {
        let mut h = harness(DeviceSettings::new("192.0.2.5", 10));

        h.device.on_added().await;

        assert_eq!(h.device.handle().settings().sensor_type, SensorType::new(2));
        assert_eq!(h.device.handle().settings().firmware, "1.4.2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_repairs_capabilities_and_polls() {
        let (tx, mut rx) = mpsc::channel(1024);
        let (tick_tx, _ticks) = mpsc::channel(1);
        let client = MockDeviceApi::new(info(), config());
        let handle = PlatformDevice::new(
            "ohm-1",
            "Boiler",
            "ohmonwifi",
            vec!["target_temperature".to_string(), "measure_temperature".to_string()],
            settings(SensorType::new(2)),
            tx.clone(),
        );
        let mut device = OhmDevice::new(
            Box::new(handle),
            client.clone(),
            SchedulerHandle::new(tick_tx),
            Timing {
                settle_delay: Duration::from_millis(2000),
                write_delay: Duration::from_millis(10),
            },
            tx,
        );

        device.init().await;

        let Some(FromIntegrationMessage::DeviceStateChanged { state }) = rx.recv().await else {
            panic!("expected a state change");
        };
        assert_eq!(state.unavailable_reason.as_deref(), Some("Initializing Boiler"));

        assert_eq!(device.handle().capabilities(), declared_capabilities());
        assert!(device.handle().is_available());
        assert_eq!(value(&device, Capability::OutputResistance), Some(10234.0f64.into()));
        assert!(device.scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_actor_polls_and_answers_commands() {
        let h = harness(settings(SensorType::new(2)));
        let client = h.client.clone();
        let (inbox_tx, inbox) = mpsc::channel(8);
        let start = tokio::time::Instant::now();
        let task = tokio::spawn(h.device.run(inbox, h.ticks, false));
        let _rx = h.rx;

        let (reply, rx) = oneshot::channel();
        inbox_tx
            .send(DeviceCommand::SetTargetTemperature {
                temperature: 80.0,
                reply,
            })
            .await
            .unwrap();
        assert_eq!(
            rx.await.unwrap(),
            Err(CommandError::Rejected(
                "Temperature must be between 5 and 35".to_string()
            ))
        );

        // Initial poll, then the first timed poll two intervals later
        tokio::time::sleep_until(start + Duration::from_secs(25)).await;
        let polls = client.requests().iter().filter(|r| *r == "/info").count();
        assert_eq!(polls, 2);

        let (reply, rx) = oneshot::channel();
        inbox_tx.send(DeviceCommand::Delete { reply }).await.unwrap();
        assert_eq!(rx.await.unwrap(), Ok(()));
        task.await.unwrap();
    }
}
