use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::engine::CommandError;
use crate::engine::DeviceState;
use crate::engine::Engine;
use crate::engine::FlowAction;
use crate::engine::ToIntegrationMessage;
use crate::integrations::ohmonwifi::DiscoveryEvent;
use crate::integrations::ohmonwifi::PairingCandidate;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TargetTemperatureRequest {
    pub temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManualPairingRequest {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangedSettingsResponse {
    pub changed: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddedDeviceResponse {
    pub id: String,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            engine,
        }
    }
}

/// Engine errors mapped onto HTTP statuses
struct ApiError(CommandError);

impl From<CommandError> for ApiError {
    fn from(e: CommandError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CommandError::UnknownDevice(_) | CommandError::UnknownIntegration(_) => {
                StatusCode::NOT_FOUND
            }
            CommandError::Rejected(_) => StatusCode::BAD_REQUEST,
            CommandError::Device(_) => StatusCode::BAD_GATEWAY,
            CommandError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        tracing::debug!("Request failed with {}: {}", status, self.0);
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Send a command and wait for the integration's reply
async fn request<T>(
    send: impl FnOnce(oneshot::Sender<Result<T, CommandError>>) -> Result<(), CommandError>,
) -> Result<T, ApiError> {
    let (reply, rx) = oneshot::channel();
    send(reply)?;
    // A dropped reply means the integration went away mid-request
    Ok(rx.await.map_err(|_| CommandError::Unavailable)??)
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /v1/devices
async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceState>> {
    Json(
        state
            .engine
            .state_snapshot()
            .devices
            .values()
            .cloned()
            .collect(),
    )
}

/// Handler for GET /v1/devices/{id}
async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeviceState>, ApiError> {
    state
        .engine
        .device(&id)
        .map(Json)
        .ok_or(ApiError(CommandError::UnknownDevice(id)))
}

/// Handler for POST /v1/devices/{id}/target_temperature
#[tracing::instrument(skip(state))]
async fn set_target_temperature(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TargetTemperatureRequest>,
) -> Result<StatusCode, ApiError> {
    request(|reply| {
        state.engine.send_command(ToIntegrationMessage::RunFlowAction {
            device_id: id,
            action: FlowAction::SetTargetTemperature {
                temperature: body.temperature,
            },
            reply,
        })
    })
    .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Handler for PATCH /v1/devices/{id}/settings
#[tracing::instrument(skip(state))]
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<ChangedSettingsResponse>, ApiError> {
    let changed = request(|reply| {
        state.engine.send_command(ToIntegrationMessage::UpdateSettings {
            device_id: id,
            patch,
            reply,
        })
    })
    .await?;
    Ok(Json(ChangedSettingsResponse { changed }))
}

/// Handler for POST /v1/devices/{id}/name
#[tracing::instrument(skip(state))]
async fn rename_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RenameRequest>,
) -> Result<StatusCode, ApiError> {
    request(|reply| {
        state.engine.send_command(ToIntegrationMessage::RenameDevice {
            device_id: id,
            name: body.name,
            reply,
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for DELETE /v1/devices/{id}
#[tracing::instrument(skip(state))]
async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    request(|reply| {
        state
            .engine
            .send_command(ToIntegrationMessage::DeleteDevice { device_id: id, reply })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /v1/integrations/{name}/discovery
#[tracing::instrument(skip(state))]
async fn discovery(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(event): Json<DiscoveryEvent>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .send_to_integration(&name, ToIntegrationMessage::Discovery(event))?;
    Ok(StatusCode::ACCEPTED)
}

/// Handler for GET /v1/integrations/{name}/pairing
async fn pairing_candidates(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<PairingCandidate>>, ApiError> {
    let candidates = request(|reply| {
        state
            .engine
            .send_to_integration(&name, ToIntegrationMessage::ListPairingCandidates { reply })
    })
    .await?;
    Ok(Json(candidates))
}

/// Handler for POST /v1/integrations/{name}/pairing/manual
#[tracing::instrument(skip(state))]
async fn manual_pairing(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<ManualPairingRequest>,
) -> Result<Json<PairingCandidate>, ApiError> {
    let candidate = request(|reply| {
        state.engine.send_to_integration(
            &name,
            ToIntegrationMessage::ManualPairing {
                address: body.address,
                reply,
            },
        )
    })
    .await?;
    Ok(Json(candidate))
}

/// Handler for POST /v1/integrations/{name}/pairing/add
#[tracing::instrument(skip(state))]
async fn add_device(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(candidate): Json<PairingCandidate>,
) -> Result<(StatusCode, Json<AddedDeviceResponse>), ApiError> {
    let id = request(|reply| {
        state
            .engine
            .send_to_integration(&name, ToIntegrationMessage::AddDevice { candidate, reply })
    })
    .await?;
    Ok((StatusCode::CREATED, Json(AddedDeviceResponse { id })))
}

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/devices", get(list_devices))
        .route("/v1/devices/:id", get(get_device).delete(delete_device))
        .route(
            "/v1/devices/:id/target_temperature",
            post(set_target_temperature),
        )
        .route(
            "/v1/devices/:id/settings",
            axum::routing::patch(update_settings),
        )
        .route("/v1/devices/:id/name", post(rename_device))
        .route("/v1/integrations/:name/discovery", post(discovery))
        .route("/v1/integrations/:name/pairing", get(pairing_candidates))
        .route(
            "/v1/integrations/:name/pairing/manual",
            post(manual_pairing),
        )
        .route("/v1/integrations/:name/pairing/add", post(add_device))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// This function will bind to the specified address and serve the API endpoints.
/// It will run until the provided shutdown signal is triggered.
///
/// # Arguments
/// * `listen` - The IP address to listen on (e.g., "127.0.0.1")
/// * `port` - The port to listen on (e.g., 8565)
/// * `engine` - The engine whose devices are exposed
/// * `shutdown_rx` - A oneshot receiver that will trigger graceful shutdown
pub async fn serve(
    listen: String,
    port: u16,
    engine: Arc<Engine>,
    shutdown_rx: oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(Arc::new(AppState::new(engine)));

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
