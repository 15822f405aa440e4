//! HTTP host surface for the queue, train commands and scheduled jobs.
//!
//! Enabled with the `web` feature:
//! - `api`: JSON request/response types and the `ApiResponse` envelope
//! - `shared`: `AppState`, the bundle of services every handler sees
//! - `web`: Axum router and server runner
//!
//! # Shared State Pattern
//!
//! The turn queue and the job scheduler are built around one gateway, so
//! direct commands and scheduled scripts funnel through the same device lock:
//!
//! ```ignore
//! use std::sync::Arc;
//! use train_queue::services::{build_router, AppState, WebServerConfig};
//!
//! let gateway = Arc::new(DeviceGateway::new(device));
//! let state = AppState::new(gateway, JsonFileStore::new(path), &config);
//! let router = build_router(state.clone(), &WebServerConfig::from_config(&config.web));
//! ```

pub mod api;
pub mod shared;
pub mod web;

pub use api::*;
pub use shared::*;
pub use web::*;
