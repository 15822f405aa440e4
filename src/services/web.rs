//! Axum-based HTTP server for the train queue API.
//!
//! Provides REST endpoints for:
//! - POST `/queue/join`, POST `/queue/leave`, GET `/queue/status` - Turn queue
//! - GET/POST `/config` - Control timeout
//! - POST `/train/{speed,direction,horn,bell,lights,emergency-stop}` - Direct commands
//! - GET `/train/status` - Gateway status and current controller
//! - GET/POST `/jobs`, GET/PUT/DELETE `/jobs/:id`, POST `/jobs/:id/run` - Scheduled jobs
//! - POST `/scripts/validate` - Script syntax check
//!
//! Errors use the same [`ApiResponse`] envelope with a status code per
//! category: admission 403/404/409, validation 400, device 502.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::commands::DirectCommand;
use crate::config::WebConfig;
use crate::error::{JobError, QueueError};
use crate::queue::{JoinOutcome, LeaveOutcome, QueueStatus};
use crate::scheduler::{JobRunOutcome, JobUpdate, NewJob, ScheduledJob};
use crate::script::parse_script;
use crate::store::JobStore;
use crate::traits::{ActuatorGateway, DirectionCommand, MAX_SPEED_STEP};

use super::api::{
    ApiResponse, CommandResponse, ConfigResponse, ConfigUpdateRequest, DirectionRequest,
    JoinRequest, SpeedRequest, SwitchRequest, TrainStatusResponse, UserRequest, ValidateRequest,
    ValidateResponse,
};
use super::shared::AppState;

type ApiError = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Error Mapping
// ============================================================================

fn reject(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::err(code, message)))
}

fn queue_error(e: QueueError) -> ApiError {
    let status = match e {
        QueueError::AlreadyQueued { .. } => StatusCode::CONFLICT,
        QueueError::NotQueued => StatusCode::NOT_FOUND,
        QueueError::NotController => StatusCode::FORBIDDEN,
        QueueError::Device(_) => StatusCode::BAD_GATEWAY,
        QueueError::InvalidTimeout { .. } => StatusCode::BAD_REQUEST,
    };
    reject(status, e.code(), e.to_string())
}

fn job_error(e: JobError) -> ApiError {
    let status = match e {
        JobError::NotFound(_) => StatusCode::NOT_FOUND,
        JobError::InvalidCron { .. } | JobError::InvalidScript(_) => StatusCode::BAD_REQUEST,
        JobError::AlreadyRunning(_) | JobError::Cancelled(_) => StatusCode::CONFLICT,
    };
    reject(status, e.code(), e.to_string())
}

fn ok<T>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::ok(data))
}

// ============================================================================
// Queue Handlers
// ============================================================================

/// POST /queue/join
async fn join_queue<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Json(req): Json<JoinRequest>,
) -> ApiResult<JoinOutcome> {
    state
        .queue
        .join(&req.user_id, &req.username)
        .await
        .map(ok)
        .map_err(queue_error)
}

/// POST /queue/leave
async fn leave_queue<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Json(req): Json<UserRequest>,
) -> ApiResult<LeaveOutcome> {
    state
        .queue
        .leave(&req.user_id)
        .await
        .map(ok)
        .map_err(queue_error)
}

/// GET /queue/status
async fn queue_status<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
) -> Json<ApiResponse<QueueStatus>> {
    ok(state.queue.status().await)
}

/// GET /config
async fn get_config<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
) -> Json<ApiResponse<ConfigResponse>> {
    ok(ConfigResponse {
        queue_timeout: state.queue.status().await.control_timeout,
    })
}

/// POST /config
///
/// Accepts JSON: `{"queue_timeout": 120}`
async fn update_config<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Json(req): Json<ConfigUpdateRequest>,
) -> ApiResult<ConfigResponse> {
    if let Some(timeout) = req.queue_timeout {
        state
            .queue
            .update_timeout(timeout)
            .await
            .map_err(queue_error)?;
    }
    Ok(ok(ConfigResponse {
        queue_timeout: state.queue.status().await.control_timeout,
    }))
}

// ============================================================================
// Train Handlers
// ============================================================================

async fn send<G: ActuatorGateway, S: JobStore>(
    state: &AppState<G, S>,
    user_id: &str,
    command: DirectCommand,
) -> ApiResult<CommandResponse> {
    state
        .queue
        .command(user_id, command)
        .await
        .map(|result| ok(result.into()))
        .map_err(queue_error)
}

/// POST /train/speed
///
/// Accepts JSON: `{"user_id": "abc", "speed": 12}`
async fn train_speed<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Json(req): Json<SpeedRequest>,
) -> ApiResult<CommandResponse> {
    if req.speed > MAX_SPEED_STEP {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "invalid_speed",
            format!("Speed must be between 0 and {MAX_SPEED_STEP}"),
        ));
    }
    send(&state, &req.user_id, DirectCommand::SetSpeed(req.speed)).await
}

/// POST /train/direction
///
/// Accepts JSON: `{"user_id": "abc", "direction": "toggle"}`
async fn train_direction<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Json(req): Json<DirectionRequest>,
) -> ApiResult<CommandResponse> {
    let Some(direction) = DirectionCommand::from_text(&req.direction) else {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "invalid_direction",
            "Direction must be 'forward', 'reverse' or 'toggle'",
        ));
    };
    send(&state, &req.user_id, DirectCommand::SetDirection(direction)).await
}

/// POST /train/horn
async fn train_horn<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Json(req): Json<UserRequest>,
) -> ApiResult<CommandResponse> {
    send(&state, &req.user_id, DirectCommand::Horn).await
}

/// POST /train/bell
async fn train_bell<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Json(req): Json<SwitchRequest>,
) -> ApiResult<CommandResponse> {
    send(&state, &req.user_id, DirectCommand::Bell(req.state)).await
}

/// POST /train/lights
async fn train_lights<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Json(req): Json<SwitchRequest>,
) -> ApiResult<CommandResponse> {
    send(&state, &req.user_id, DirectCommand::Lights(req.state)).await
}

/// POST /train/emergency-stop
async fn train_emergency_stop<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Json(req): Json<UserRequest>,
) -> ApiResult<CommandResponse> {
    send(&state, &req.user_id, DirectCommand::EmergencyStop).await
}

/// GET /train/status
async fn train_status<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
) -> Json<ApiResponse<TrainStatusResponse>> {
    let train = state.gateway.status().await;
    let controller = state.queue.status().await.current_controller;
    ok(TrainStatusResponse { train, controller })
}

// ============================================================================
// Job Handlers
// ============================================================================

/// GET /jobs
async fn list_jobs<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
) -> Json<ApiResponse<Vec<ScheduledJob>>> {
    ok(state.scheduler.list().await)
}

/// POST /jobs
async fn create_job<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Json(req): Json<NewJob>,
) -> ApiResult<ScheduledJob> {
    state.scheduler.create(req).await.map(ok).map_err(job_error)
}

/// GET /jobs/:id
async fn get_job<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Path(id): Path<String>,
) -> ApiResult<ScheduledJob> {
    state.scheduler.get(&id).await.map(ok).map_err(job_error)
}

/// PUT /jobs/:id
async fn update_job<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Path(id): Path<String>,
    Json(req): Json<JobUpdate>,
) -> ApiResult<ScheduledJob> {
    state
        .scheduler
        .update(&id, req)
        .await
        .map(ok)
        .map_err(job_error)
}

/// DELETE /jobs/:id
async fn delete_job<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Path(id): Path<String>,
) -> ApiResult<String> {
    state
        .scheduler
        .delete(&id)
        .await
        .map(|()| ok(id))
        .map_err(job_error)
}

/// POST /jobs/:id/run
async fn run_job<G: ActuatorGateway, S: JobStore>(
    State(state): State<AppState<G, S>>,
    Path(id): Path<String>,
) -> ApiResult<JobRunOutcome> {
    state
        .scheduler
        .run_now(&id)
        .await
        .map(ok)
        .map_err(job_error)
}

/// POST /scripts/validate
async fn validate_script(Json(req): Json<ValidateRequest>) -> ApiResult<ValidateResponse> {
    match parse_script(&req.script) {
        Ok(script) => Ok(ok(ValidateResponse {
            commands: script.len(),
        })),
        Err(e) => Err(reject(StatusCode::BAD_REQUEST, e.code(), e.to_string())),
    }
}

/// Fallback handler for 404
async fn not_found() -> impl IntoResponse {
    reject(StatusCode::NOT_FOUND, "not_found", "Not found")
}

// ============================================================================
// Server Builder
// ============================================================================

/// Configuration for the web server
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    /// Address to bind to
    pub addr: SocketAddr,
    /// Whether to enable CORS for all origins
    pub cors_permissive: bool,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self::from_config(&WebConfig::default())
    }
}

impl WebServerConfig {
    /// Create a new config with the given address
    pub fn new(addr: impl Into<SocketAddr>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// Set whether CORS should be permissive
    pub fn cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    /// Create from shared WebConfig
    ///
    /// A host that is not an IP address binds to all interfaces.
    pub fn from_config(config: &WebConfig) -> Self {
        let ip = config.host.parse::<IpAddr>().unwrap_or_else(|_| {
            tracing::warn!(host = %config.host, "host is not an IP address, binding 0.0.0.0");
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        });
        Self {
            addr: SocketAddr::new(ip, config.port),
            cors_permissive: config.cors_permissive,
        }
    }
}

/// Build the Axum router with all routes
pub fn build_router<G: ActuatorGateway, S: JobStore>(
    state: AppState<G, S>,
    config: &WebServerConfig,
) -> Router {
    let mut router = Router::new()
        // Queue
        .route("/queue/join", post(join_queue::<G, S>))
        .route("/queue/leave", post(leave_queue::<G, S>))
        .route("/queue/status", get(queue_status::<G, S>))
        .route("/config", get(get_config::<G, S>).post(update_config::<G, S>))
        // Train
        .route("/train/speed", post(train_speed::<G, S>))
        .route("/train/direction", post(train_direction::<G, S>))
        .route("/train/horn", post(train_horn::<G, S>))
        .route("/train/bell", post(train_bell::<G, S>))
        .route("/train/lights", post(train_lights::<G, S>))
        .route("/train/emergency-stop", post(train_emergency_stop::<G, S>))
        .route("/train/status", get(train_status::<G, S>))
        // Jobs
        .route("/jobs", get(list_jobs::<G, S>).post(create_job::<G, S>))
        .route(
            "/jobs/:id",
            get(get_job::<G, S>)
                .put(update_job::<G, S>)
                .delete(delete_job::<G, S>),
        )
        .route("/jobs/:id/run", post(run_job::<G, S>))
        .route("/scripts/validate", post(validate_script))
        // Fallback
        .fallback(not_found)
        .with_state(state);

    // Add CORS if requested
    if config.cors_permissive {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Serve the API until `shutdown` resolves.
pub async fn run_server<G, S, F>(
    state: AppState<G, S>,
    config: WebServerConfig,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    G: ActuatorGateway,
    S: JobStore,
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!(addr = %config.addr, "web server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
