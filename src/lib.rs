//! # train-queue
//!
//! Shared control of a single model train by many remote users, with
//! scripted command sequences and cron-scheduled jobs on top.
//!
//! ## Features
//!
//! - **Turn queue**: FIFO admission, one controller at a time, timed
//!   hand-off, lights off when the layout sits idle
//! - **Command scripts**: a small line-oriented language (`speed`, `horn`,
//!   `wait`, `repeat ... end`, ...) with cooperative stop
//! - **Scheduled jobs**: scripts triggered by cron expressions, persisted to
//!   a JSON file, never overlapping with themselves
//! - **Gateway**: one serialized command path to the locomotive, with a mock
//!   device for tests and mock mode
//!
//! ## Architecture
//!
//! - `traits` - Device driver, gateway and analytics seams
//! - `gateway` - Serialized gateway over a device, with reconnect backoff
//! - `hal` - Mock device
//! - `commands` - Direct commands sent by the controller
//! - `queue` - Turn queue
//! - `script` - Script parser and interpreter
//! - `scheduler` / `store` - Scheduled jobs and their persistence
//! - `services` - HTTP host (feature `web`)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use train_queue::{
//!     config::QueueConfig, gateway::DeviceGateway, hal::MockDevice, DirectCommand,
//!     ScriptInterpreter, TurnQueue,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let gateway = Arc::new(DeviceGateway::new(MockDevice::connected()));
//!
//! // Users take turns driving
//! let queue = TurnQueue::new(Arc::clone(&gateway), &QueueConfig::default());
//! queue.join("alice", "Alice").await.unwrap();
//! queue.command("alice", DirectCommand::SetSpeed(10)).await.unwrap();
//!
//! // Scripts drive the same train
//! let interpreter = ScriptInterpreter::new(gateway);
//! let report = interpreter.execute("horn\nbell on\nwait 0").await.unwrap();
//! assert_eq!(report.commands_executed, 3);
//! # queue.shutdown().await;
//! # });
//! ```

#![warn(missing_docs)]

/// Direct commands issued by the current controller.
pub mod commands;
/// Shared configuration with environment overrides.
pub mod config;
/// Error types with stable codes.
pub mod error;
/// Serialized actuator gateway and reconnect backoff.
pub mod gateway;
/// Mock device implementation.
pub mod hal;
/// Turn queue with timed control hand-off.
pub mod queue;
/// Cron-triggered script jobs.
pub mod scheduler;
/// Script parser and interpreter.
pub mod script;
/// Job registry persistence.
pub mod store;
/// Device, gateway and analytics traits.
pub mod traits;

/// HTTP host (feature-gated).
#[cfg(feature = "web")]
pub mod services;

// Re-exports for convenience
pub use commands::DirectCommand;
pub use config::{Config, GatewayConfig, QueueConfig, SchedulerConfig, ScriptConfig, WebConfig};
pub use error::{ConfigError, JobError, QueueError, ScriptError, StoreError};
pub use gateway::{Backoff, DeviceGateway};
pub use queue::{JoinOutcome, LeaveOutcome, QueueEntrant, QueueStatus, TurnQueue};
pub use scheduler::{JobRunOutcome, JobScheduler, JobUpdate, NewJob, ScheduledJob};
pub use script::{parse_script, ExecutionReport, Script, ScriptCommand, ScriptInterpreter};
pub use store::{JobStore, JsonFileStore, MemoryStore};
pub use traits::{
    ActuatorDevice, ActuatorGateway, CommandResult, Direction, DirectionCommand, GatewayStatus,
    NoAnalytics, SessionAnalytics,
};
