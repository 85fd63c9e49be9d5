use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::error::Error;
use super::error::Result;
use super::protocol::Ack;
use super::protocol::ConfigSnapshot;
use super::protocol::InfoSnapshot;
use super::protocol::SensorType;

/// Operations offered by an OhmOnWifi device.
///
/// Every call is a single GET against the current host; the client keeps no
/// per-request state, so changing the host takes effect on the next call.
/// The trait exists so the device logic can be driven by a mock in tests.
#[async_trait]
pub trait DeviceApi: Clone + Send + Sync + 'static {
    /// Host (and optional port) requests are sent to
    fn host(&self) -> &str;

    /// Point subsequent requests at a different host
    fn set_host(&mut self, host: &str);

    /// `GET /info`
    async fn get_info(&self) -> Result<InfoSnapshot>;

    /// `GET /getconfig`
    async fn get_config(&self) -> Result<ConfigSnapshot>;

    /// Sensor types listed by `GET /getconfig`
    async fn get_sensor_types(&self) -> Result<serde_json::Value> {
        self.get_config()
            .await?
            .types
            .ok_or_else(|| Error::MalformedResponse("device did not report sensor types".to_string()))
    }

    /// `GET /setconfig/?device_name=X`
    async fn set_config_name(&self, name: &str) -> Result<Ack>;

    /// `GET /setconfig/?min_temp=X`
    async fn set_config_min_temp(&self, min_temp: f64) -> Result<Ack>;

    /// `GET /setconfig/?max_temp=X`
    async fn set_config_max_temp(&self, max_temp: f64) -> Result<Ack>;

    /// `GET /AT/?R=X`
    async fn set_rout_resistance(&self, ohms: f64) -> Result<Ack>;

    /// `GET /copydefault/?TYPE=Y`, loads the default curve of a sensor type
    async fn copy_default_curve(&self, sensor_type: SensorType) -> Result<Ack>;

    /// `GET /AT/?T=X[&TYPE=Y]` without any priming
    async fn send_temperature(&self, celsius: f64, sensor_type: Option<SensorType>) -> Result<Ack>;

    /// Set the output temperature, optionally switching the sensor type.
    ///
    /// With an explicit type the default curve is copied first and the
    /// temperature is only sent once that succeeded. The unset sentinel is
    /// never sent.
    async fn set_temperature(&self, celsius: f64, sensor_type: Option<SensorType>) -> Result<Ack> {
        let sensor_type = sensor_type.and_then(SensorType::explicit);
        if let Some(sensor_type) = sensor_type {
            self.copy_default_curve(sensor_type).await?;
        }
        self.send_temperature(celsius, sensor_type).await
    }
}

/// reqwest-backed client for a single device
#[derive(Debug, Clone)]
pub struct HttpDeviceClient {
    http: reqwest::Client,
    protocol: String,
    host: String,
}

impl HttpDeviceClient {
    /// Create a client with its own connection pool and request timeout
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, protocol, host))
    }

    /// Create a client sharing an existing reqwest client
    pub fn with_client(
        http: reqwest::Client,
        protocol: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            http,
            protocol: protocol.into(),
            host: host.into(),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    fn url(&self, path: &str) -> String {
        format!("{}://{}{}", self.protocol, self.host, path)
    }

    async fn get_text(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let url = self.url(path);
        debug!("GET {} {:?}", url, query);

        let mut request = self.http.get(&url);
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self.get_text(path, &[]).await?;
        serde_json::from_str(&body).map_err(|e| Error::MalformedResponse(format!("{}: {}", path, e)))
    }

    async fn get_ack(&self, path: &str, query: &[(&str, String)], required: bool) -> Result<Ack> {
        let body = self.get_text(path, query).await?;
        Ack::parse(&body)?.check(required)
    }
}

#[async_trait]
impl DeviceApi for HttpDeviceClient {
    fn host(&self) -> &str {
        &self.host
    }

    fn set_host(&mut self, host: &str) {
        self.host = host.to_string();
    }

    async fn get_info(&self) -> Result<InfoSnapshot> {
        self.get_json("/info").await
    }

    async fn get_config(&self) -> Result<ConfigSnapshot> {
        self.get_json("/getconfig").await
    }

    async fn set_config_name(&self, name: &str) -> Result<Ack> {
        self.get_ack("/setconfig/", &[("device_name", name.to_string())], false)
            .await
    }

    async fn set_config_min_temp(&self, min_temp: f64) -> Result<Ack> {
        self.get_ack("/setconfig/", &[("min_temp", min_temp.to_string())], false)
            .await
    }

    async fn set_config_max_temp(&self, max_temp: f64) -> Result<Ack> {
        self.get_ack("/setconfig/", &[("max_temp", max_temp.to_string())], false)
            .await
    }

    async fn set_rout_resistance(&self, ohms: f64) -> Result<Ack> {
        self.get_ack("/AT/", &[("R", ohms.to_string())], true).await
    }

    async fn copy_default_curve(&self, sensor_type: SensorType) -> Result<Ack> {
        self.get_ack("/copydefault/", &[("TYPE", sensor_type.to_string())], false)
            .await
    }

    async fn send_temperature(&self, celsius: f64, sensor_type: Option<SensorType>) -> Result<Ack> {
        let mut query = vec![("T", celsius.to_string())];
        if let Some(sensor_type) = sensor_type {
            query.push(("TYPE", sensor_type.to_string()));
        }
        self.get_ack("/AT/", &query, true).await
    }
}

/// Mock device for testing
///
/// Clones share the same recorded requests and scripted state, so a test can
/// keep one copy while the device logic owns another.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MockDeviceApi {
    host: String,
    state: std::sync::Arc<std::sync::Mutex<MockDeviceState>>,
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockDeviceState {
    pub info: InfoSnapshot,
    pub config: ConfigSnapshot,
    /// Refuse every request with a transport error
    pub offline: bool,
    /// Paths answered with a non-"ok" acknowledgement
    pub rejected_paths: Vec<&'static str>,
    /// Requests in the order they were issued, as `host path?query`
    pub requests: Vec<String>,
}

#[cfg(test)]
impl MockDeviceApi {
    pub fn new(info: InfoSnapshot, config: ConfigSnapshot) -> Self {
        let mock = Self {
            host: "192.0.2.5".to_string(),
            ..Default::default()
        };
        mock.update(|state| {
            state.info = info;
            state.config = config;
        });
        mock
    }

    /// Mutate the scripted device state
    pub fn update(&self, f: impl FnOnce(&mut MockDeviceState)) {
        let mut state = self.state.lock().unwrap();
        f(&mut state);
    }

    pub fn set_offline(&self, offline: bool) {
        self.update(|state| state.offline = offline);
    }

    pub fn reject(&self, path: &'static str) {
        self.update(|state| state.rejected_paths.push(path));
    }

    /// Requests issued so far, without the host prefix
    pub fn requests(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .map(|r| r.split_once(' ').map(|(_, p)| p.to_string()).unwrap_or_default())
            .collect()
    }

    /// Requests issued so far, including the host they were sent to
    pub fn requests_with_host(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    fn record(&self, path: &'static str, query: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(format!("{} {}{}", self.host, path, query));
        if state.offline {
            return Err(Error::Transport(format!(
                "error sending request for url (http://{}{}): connection refused",
                self.host, path
            )));
        }
        if state.rejected_paths.contains(&path) {
            return Err(Error::Device("out of range".to_string()));
        }
        Ok(())
    }

    fn ok() -> Ack {
        Ack {
            ack: Some("ok".to_string()),
            fields: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl DeviceApi for MockDeviceApi {
    fn host(&self) -> &str {
        &self.host
    }

    fn set_host(&mut self, host: &str) {
        self.host = host.to_string();
    }

    async fn get_info(&self) -> Result<InfoSnapshot> {
        self.record("/info", "")?;
        Ok(self.state.lock().unwrap().info.clone())
    }

    async fn get_config(&self) -> Result<ConfigSnapshot> {
        self.record("/getconfig", "")?;
        Ok(self.state.lock().unwrap().config.clone())
    }

    async fn set_config_name(&self, name: &str) -> Result<Ack> {
        self.record("/setconfig/", &format!("?device_name={}", name))?;
        self.update(|state| state.config.device_name = Some(name.to_string()));
        Ok(Self::ok())
    }

    async fn set_config_min_temp(&self, min_temp: f64) -> Result<Ack> {
        self.record("/setconfig/", &format!("?min_temp={}", min_temp))?;
        self.update(|state| state.config.min_temp = Some(min_temp));
        Ok(Self::ok())
    }

    async fn set_config_max_temp(&self, max_temp: f64) -> Result<Ack> {
        self.record("/setconfig/", &format!("?max_temp={}", max_temp))?;
        self.update(|state| state.config.max_temp = Some(max_temp));
        Ok(Self::ok())
    }

    async fn set_rout_resistance(&self, ohms: f64) -> Result<Ack> {
        self.record("/AT/", &format!("?R={}", ohms))?;
        Ok(Self::ok())
    }

    async fn copy_default_curve(&self, sensor_type: SensorType) -> Result<Ack> {
        self.record("/copydefault/", &format!("?TYPE={}", sensor_type))?;
        Ok(Self::ok())
    }

    async fn send_temperature(&self, celsius: f64, sensor_type: Option<SensorType>) -> Result<Ack> {
        let query = match sensor_type {
            Some(t) => format!("?T={}&TYPE={}", celsius, t),
            None => format!("?T={}", celsius),
        };
        self.record("/AT/", &query)?;
        Ok(Self::ok())
    }
}
