//! Integration tests for the web API.
//!
//! These tests verify the HTTP API endpoints work correctly.

#![cfg(feature = "web")]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde::de::DeserializeOwned;
use tower::ServiceExt;

use train_queue::gateway::DeviceGateway;
use train_queue::hal::{DeviceCall, MockDevice};
use train_queue::queue::QueueStatus;
use train_queue::services::{
    build_router, ApiResponse, AppState, CommandResponse, ConfigResponse, TrainStatusResponse,
    ValidateResponse, WebServerConfig,
};
use train_queue::store::MemoryStore;
use train_queue::traits::ActuatorGateway;
use train_queue::{Config, JobRunOutcome, JoinOutcome, ScheduledJob};

type TestState = AppState<DeviceGateway<MockDevice>, MemoryStore>;

fn create_test_app() -> (axum::Router, TestState) {
    let gateway = Arc::new(DeviceGateway::new(MockDevice::connected()));
    let state = AppState::new(gateway, MemoryStore::new(), &Config::default());
    let router = build_router(state.clone(), &WebServerConfig::default());
    (router, state)
}

async fn call<T: DeserializeOwned>(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, ApiResponse<T>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("Content-Type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn join(app: &axum::Router, user: &str) -> (StatusCode, ApiResponse<JoinOutcome>) {
    let body = format!(r#"{{"user_id": "{user}", "username": "{user}"}}"#);
    call(app, "POST", "/queue/join", Some(&body)).await
}

// ============================================================================
// Queue
// ============================================================================

#[tokio::test]
async fn test_join_and_status() {
    let (app, state) = create_test_app();

    let (status, json) = join(&app, "alice").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.success);
    assert_eq!(json.data.unwrap().position, 1);

    let (_, json) = join(&app, "bob").await;
    assert_eq!(json.data.unwrap().position, 2);

    let (status, json) = call::<QueueStatus>(&app, "GET", "/queue/status", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = json.data.unwrap();
    assert_eq!(data.queue_length, 2);
    assert_eq!(data.current_controller.as_deref(), Some("alice"));
    assert_eq!(data.control_timeout, 300);
    assert_eq!(data.queue[0].time_remaining, Some(300));
    assert_eq!(data.queue[1].time_remaining, None);

    state.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_join_conflicts() {
    let (app, state) = create_test_app();
    join(&app, "alice").await;

    let (status, json) = join(&app, "alice").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(!json.success);
    assert_eq!(json.code.as_deref(), Some("already_queued"));
    assert_eq!(json.error.as_deref(), Some("User already in queue (position 1)"));

    state.shutdown().await;
}

#[tokio::test]
async fn test_leave_unknown_user() {
    let (app, _state) = create_test_app();

    let (status, json) =
        call::<()>(&app, "POST", "/queue/leave", Some(r#"{"user_id": "ghost"}"#)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json.code.as_deref(), Some("not_queued"));
}

#[tokio::test]
async fn test_update_config() {
    let (app, state) = create_test_app();

    let (status, json) =
        call::<ConfigResponse>(&app, "POST", "/config", Some(r#"{"queue_timeout": 5}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json.code.as_deref(), Some("invalid_timeout"));
    assert_eq!(
        json.error.as_deref(),
        Some("Queue timeout must be between 10 and 3600 seconds, got 5")
    );

    let (status, json) =
        call::<ConfigResponse>(&app, "POST", "/config", Some(r#"{"queue_timeout": 120}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.data.unwrap().queue_timeout, 120);

    let (_, json) = call::<ConfigResponse>(&app, "GET", "/config", None).await;
    assert_eq!(json.data.unwrap().queue_timeout, 120);
    assert_eq!(state.queue.status().await.control_timeout, 120);
}

// ============================================================================
// Train
// ============================================================================

#[tokio::test]
async fn test_only_controller_can_drive() {
    let (app, state) = create_test_app();
    join(&app, "alice").await;
    join(&app, "bob").await;

    let (status, json) = call::<CommandResponse>(
        &app,
        "POST",
        "/train/speed",
        Some(r#"{"user_id": "bob", "speed": 10}"#),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json.code.as_deref(), Some("not_controller"));

    let (status, json) = call::<CommandResponse>(
        &app,
        "POST",
        "/train/speed",
        Some(r#"{"user_id": "alice", "speed": 10}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.data.unwrap().message, "Speed set to 10");
    assert_eq!(state.gateway.status().await.speed, 10);

    state.shutdown().await;
}

#[tokio::test]
async fn test_speed_validation() {
    let (app, state) = create_test_app();
    join(&app, "alice").await;

    let (status, json) = call::<CommandResponse>(
        &app,
        "POST",
        "/train/speed",
        Some(r#"{"user_id": "alice", "speed": 40}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json.error.as_deref(), Some("Speed must be between 0 and 31"));
    assert!(state.gateway.with_device(|d| d.calls.is_empty()).await);

    state.shutdown().await;
}

#[tokio::test]
async fn test_direction_bell_lights_horn() {
    let (app, state) = create_test_app();
    join(&app, "alice").await;

    for (uri, body) in [
        ("/train/direction", r#"{"user_id": "alice", "direction": "toggle"}"#),
        ("/train/bell", r#"{"user_id": "alice", "state": true}"#),
        ("/train/lights", r#"{"user_id": "alice", "state": false}"#),
        ("/train/horn", r#"{"user_id": "alice"}"#),
    ] {
        let (status, _) = call::<CommandResponse>(&app, "POST", uri, Some(body)).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
    }

    let calls = state.gateway.with_device(|d| d.calls.clone()).await;
    assert_eq!(
        calls,
        [
            DeviceCall::Toggle,
            DeviceCall::Bell(true),
            DeviceCall::Lights(false),
            DeviceCall::Horn
        ]
    );

    let (status, json) = call::<CommandResponse>(
        &app,
        "POST",
        "/train/direction",
        Some(r#"{"user_id": "alice", "direction": "sideways"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json.code.as_deref(), Some("invalid_direction"));

    state.shutdown().await;
}

#[tokio::test]
async fn test_emergency_stop_from_waiting_user() {
    let (app, state) = create_test_app();
    join(&app, "alice").await;
    join(&app, "bob").await;

    let (status, json) = call::<CommandResponse>(
        &app,
        "POST",
        "/train/emergency-stop",
        Some(r#"{"user_id": "bob"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.data.unwrap().message, "Emergency stop activated");

    state.shutdown().await;
}

#[tokio::test]
async fn test_device_error_is_bad_gateway() {
    let (app, state) = create_test_app();
    join(&app, "alice").await;
    state.gateway.disconnect().await;

    let (status, json) = call::<CommandResponse>(
        &app,
        "POST",
        "/train/horn",
        Some(r#"{"user_id": "alice"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json.error.as_deref(), Some("Train not connected"));

    state.shutdown().await;
}

#[tokio::test]
async fn test_train_status() {
    let (app, state) = create_test_app();
    join(&app, "alice").await;

    let (status, json) = call::<TrainStatusResponse>(&app, "GET", "/train/status", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = json.data.unwrap();
    assert!(data.train.connected);
    assert!(data.train.mock_mode);
    assert_eq!(data.controller.as_deref(), Some("alice"));

    state.shutdown().await;
}

// ============================================================================
// Jobs
// ============================================================================

#[tokio::test]
async fn test_job_lifecycle() {
    let (app, _state) = create_test_app();

    let (status, json) = call::<ScheduledJob>(
        &app,
        "POST",
        "/jobs",
        Some(r#"{"name": "toot", "script": "horn", "cron_expression": "0 8 * * *"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let job = json.data.unwrap();
    assert!(job.enabled);

    let (_, json) = call::<Vec<ScheduledJob>>(&app, "GET", "/jobs", None).await;
    assert_eq!(json.data.unwrap().len(), 1);

    let (status, json) = call::<ScheduledJob>(
        &app,
        "PUT",
        &format!("/jobs/{}", job.id),
        Some(r#"{"enabled": false}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!json.data.unwrap().enabled);

    let (status, json) =
        call::<JobRunOutcome>(&app, "POST", &format!("/jobs/{}/run", job.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.data.unwrap().success);

    let (_, json) = call::<ScheduledJob>(&app, "GET", &format!("/jobs/{}", job.id), None).await;
    assert_eq!(json.data.unwrap().run_count, 1);

    let (status, _) = call::<String>(&app, "DELETE", &format!("/jobs/{}", job.id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = call::<ScheduledJob>(&app, "GET", &format!("/jobs/{}", job.id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json.code.as_deref(), Some("job_not_found"));
}

#[tokio::test]
async fn test_invalid_job_is_bad_request() {
    let (app, state) = create_test_app();

    let (status, json) = call::<ScheduledJob>(
        &app,
        "POST",
        "/jobs",
        Some(r#"{"name": "x", "script": "horn", "cron_expression": "whenever"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json.code.as_deref(), Some("invalid_cron"));

    let (status, json) = call::<ScheduledJob>(
        &app,
        "POST",
        "/jobs",
        Some(r#"{"name": "x", "script": "fly away", "cron_expression": "0 8 * * *"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json.code.as_deref(), Some("invalid_script"));
    assert!(state.scheduler.list().await.is_empty());
}

#[tokio::test]
async fn test_validate_script() {
    let (app, _state) = create_test_app();

    let (status, json) = call::<ValidateResponse>(
        &app,
        "POST",
        "/scripts/validate",
        Some(r#"{"script": "repeat 2 times\nhorn\nend"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.data.unwrap().commands, 3);

    let (status, json) = call::<ValidateResponse>(
        &app,
        "POST",
        "/scripts/validate",
        Some(r#"{"script": "horn\nend"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json.code.as_deref(), Some("syntax_error"));
    assert_eq!(
        json.error.as_deref(),
        Some("Line 2: 'end' without matching 'repeat'")
    );
}

#[tokio::test]
async fn test_not_found() {
    let (app, _state) = create_test_app();

    let (status, json) = call::<()>(&app, "GET", "/nonexistent", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!json.success);
}
