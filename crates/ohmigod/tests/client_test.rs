// Tests for `HttpDeviceClient` against a wiremock device.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;
use wiremock::matchers::query_param_is_missing;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::Request;
use wiremock::Respond;
use wiremock::ResponseTemplate;

use ohmigod::integrations::ohmonwifi::DeviceApi;
use ohmigod::integrations::ohmonwifi::Error;
use ohmigod::integrations::ohmonwifi::HttpDeviceClient;
use ohmigod::integrations::ohmonwifi::SensorType;
use ohmigod::integrations::ohmonwifi::manual_pairing;

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HttpDeviceClient) {
    let server = MockServer::start().await;
    let client = HttpDeviceClient::with_client(
        reqwest::Client::new(),
        "http",
        server.address().to_string(),
    );
    (server, client)
}

fn ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "ack": "ok" }))
}

/// Device keeping its temperature bounds between requests
#[derive(Clone)]
struct FakeDevice {
    bounds: Arc<Mutex<(f64, f64)>>,
}

impl Respond for FakeDevice {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut bounds = self.bounds.lock().unwrap();
        match request.url.path() {
            "/setconfig/" => {
                for (key, value) in request.url.query_pairs() {
                    let Ok(value) = value.parse::<f64>() else {
                        return ResponseTemplate::new(200).set_body_string("ERR value");
                    };
                    match key.as_ref() {
                        "min_temp" => bounds.0 = value,
                        "max_temp" => bounds.1 = value,
                        _ => {}
                    }
                }
                ok()
            }
            "/getconfig" => ResponseTemplate::new(200).set_body_json(json!({
                "device_name": "Boiler",
                // Firmware reports bounds as strings
                "min_temp": bounds.0.to_string(),
                "max_temp": bounds.1.to_string(),
            })),
            _ => ResponseTemplate::new(404),
        }
    }
}

// ── Reading ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_info() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "deviceName": "Boiler",
            "deviceID": "A1B2C3",
            "deviceIP": "192.0.2.5",
            "firmware": "1.4.2",
            "uptime": 86400,
            "temperature": "21.4",
            "resistance": 10234,
            "type": 2,
            "type_name": "PT100"
        })))
        .mount(&server)
        .await;

    let info = client.get_info().await.unwrap().validate().unwrap();

    assert_eq!(info.device_name.as_deref(), Some("Boiler"));
    assert_eq!(info.uptime, Some(86400));
    assert_eq!(info.temperature, Some(21.4));
    assert_eq!(info.resistance, Some(10234.0));
    assert_eq!(info.sensor_type, Some(SensorType::new(2)));
}

#[tokio::test]
async fn test_get_info_error_envelope() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errno": -111,
            "code": "ECONNREFUSED",
            "address": "192.0.2.5",
            "port": 80
        })))
        .mount(&server)
        .await;

    let result = client.get_info().await.unwrap().validate();

    assert!(
        matches!(result, Err(Error::Transport(ref e)) if e == "ECONNREFUSED 192.0.2.5:80"),
        "expected Transport error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_get_sensor_types() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/getconfig"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "min_temp": 0,
            "max_temp": 100,
            "types": { "1": "PT100", "2": "PT1000" }
        })))
        .mount(&server)
        .await;

    let types = client.get_sensor_types().await.unwrap();
    assert_eq!(types["2"], "PT1000");
}

#[tokio::test]
async fn test_server_error_is_transport() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/getconfig"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = client.get_config().await;
    assert!(
        matches!(result, Err(Error::Transport(_))),
        "expected Transport error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_unparseable_body_is_malformed() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let result = client.get_info().await;
    assert!(
        matches!(result, Err(Error::MalformedResponse(_))),
        "expected MalformedResponse error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_timeout_is_transport() {
    let server = MockServer::start().await;
    let client = HttpDeviceClient::new(
        "http",
        server.address().to_string(),
        Duration::from_millis(100),
    )
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ok().set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    assert!(matches!(client.get_info().await, Err(Error::Transport(_))));
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ack_with_line_ending() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/AT/"))
        .and(query_param("R", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ack": "ok\r\n" })))
        .expect(1)
        .mount(&server)
        .await;

    client.set_rout_resistance(1000.0).await.unwrap();
}

#[tokio::test]
async fn test_ack_is_case_sensitive() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/AT/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ack": "OK" })))
        .mount(&server)
        .await;

    let result = client.set_rout_resistance(1000.0).await;
    assert!(
        matches!(result, Err(Error::Device(ref ack)) if ack == "OK"),
        "expected Device error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_bare_text_ack() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/AT/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok\n"))
        .mount(&server)
        .await;

    client.send_temperature(20.0, None).await.unwrap();
}

#[tokio::test]
async fn test_typed_temperature_primes_curve() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/copydefault/"))
        .and(query_param("TYPE", "3"))
        .respond_with(ok())
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/AT/"))
        .and(query_param("T", "21.5"))
        .and(query_param("TYPE", "3"))
        .respond_with(ok())
        .expect(1)
        .mount(&server)
        .await;

    client
        .set_temperature(21.5, Some(SensorType::new(3)))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
    assert_eq!(paths, vec!["/copydefault/", "/AT/"]);
}

#[tokio::test]
async fn test_failed_priming_skips_temperature() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/copydefault/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/AT/"))
        .respond_with(ok())
        .expect(0)
        .mount(&server)
        .await;

    let result = client.set_temperature(21.5, Some(SensorType::new(3))).await;
    assert!(matches!(result, Err(Error::Transport(_))));
}

#[tokio::test]
async fn test_unset_sensor_type_sends_no_type() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/copydefault/"))
        .respond_with(ok())
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/AT/"))
        .and(query_param("T", "40"))
        .and(query_param_is_missing("TYPE"))
        .respond_with(ok())
        .expect(1)
        .mount(&server)
        .await;

    client
        .set_temperature(40.0, Some(SensorType::UNSET))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_set_config_name() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/setconfig/"))
        .and(query_param("device_name", "Kitchen boiler"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "device_name": "Kitchen boiler" })))
        .expect(1)
        .mount(&server)
        .await;

    // No ack field: accepted for setconfig
    client.set_config_name("Kitchen boiler").await.unwrap();
}

#[tokio::test]
async fn test_bounds_round_trip() {
    let (server, client) = setup().await;

    let device = FakeDevice {
        bounds: Arc::new(Mutex::new((0.0, 100.0))),
    };
    Mock::given(method("GET"))
        .respond_with(device)
        .mount(&server)
        .await;

    client.set_config_min_temp(5.0).await.unwrap();
    client.set_config_max_temp(35.5).await.unwrap();
    let config = client.get_config().await.unwrap();

    assert_eq!(config.min_temp, Some(5.0));
    assert_eq!(config.max_temp, Some(35.5));
}

// ── Pairing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_manual_pairing() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "deviceName": "Boiler",
            "deviceID": "A1B2C3",
            "deviceIP": "192.0.2.5",
            "firmware": "1.4.2",
            "uptime": 12
        })))
        .mount(&server)
        .await;

    let candidate = manual_pairing(&client).await.unwrap();

    assert_eq!(candidate.name, "Boiler");
    assert_eq!(candidate.data.id, "A1B2C3");
    assert_eq!(candidate.settings.address, "192.0.2.5");
    assert_eq!(candidate.settings.serial, "A1B2C3");
    assert_eq!(candidate.settings.firmware, "1.4.2");
}
