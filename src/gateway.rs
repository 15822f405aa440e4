//! The concrete actuator gateway.
//!
//! [`DeviceGateway`] wraps one [`ActuatorDevice`] and turns it into the
//! [`ActuatorGateway`] command surface used by the rest of the crate:
//!
//! - All commands go through a single async lock, so the queue's direct
//!   commands and scheduled scripts never interleave on the device.
//! - Driver errors and a dropped link become failed [`CommandResult`]s.
//! - Speed and direction are tracked for [`GatewayStatus`].
//! - [`DeviceGateway::spawn_reconnect`] keeps the link alive in the
//!   background with exponential [`Backoff`].
//!
//! # Example
//!
//! ```rust
//! use train_queue::gateway::DeviceGateway;
//! use train_queue::hal::MockDevice;
//! use train_queue::traits::{ActuatorGateway, Direction};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let gateway = DeviceGateway::new(MockDevice::connected());
//! gateway.set_speed(20).await;
//!
//! let status = gateway.status().await;
//! assert!(status.connected);
//! assert!(status.mock_mode);
//! assert_eq!(status.speed, 20);
//! assert_eq!(status.direction, Direction::Forward);
//! # });
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::traits::{
    ActuatorDevice, ActuatorGateway, CommandResult, Direction, DirectionCommand, GatewayStatus,
    MAX_SPEED_STEP,
};

/// Message returned for every command while the link is down.
pub const NOT_CONNECTED: &str = "Train not connected";

// ============================================================================
// Backoff
// ============================================================================

/// Exponential reconnect delay.
///
/// Starts at `base`, multiplies by `factor` after every failure, never
/// exceeds `max`, and returns to `base` on success.
///
/// ```rust
/// use std::time::Duration;
/// use train_queue::gateway::Backoff;
///
/// let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5), 2);
/// assert_eq!(backoff.fail(), Duration::from_secs(1));
/// assert_eq!(backoff.fail(), Duration::from_secs(2));
/// assert_eq!(backoff.fail(), Duration::from_secs(4));
/// assert_eq!(backoff.fail(), Duration::from_secs(5));
/// backoff.reset();
/// assert_eq!(backoff.current(), Duration::from_secs(1));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: u32,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `base`.
    pub fn new(base: Duration, max: Duration, factor: u32) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            factor: factor.max(1),
            current: base,
        }
    }

    /// Creates a backoff from the gateway configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_base_ms),
            Duration::from_millis(config.reconnect_max_ms),
            config.reconnect_factor,
        )
    }

    /// Delay that would be used right now.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failure: returns the delay to wait, then grows it.
    pub fn fail(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(self.factor).min(self.max);
        delay
    }

    /// Record a success.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

// ============================================================================
// Device Gateway
// ============================================================================

struct GatewayState<D> {
    device: D,
    speed: u8,
    direction: Direction,
}

/// Serialized gateway over a single [`ActuatorDevice`].
///
/// Share it between services with `Arc<DeviceGateway<D>>`.
pub struct DeviceGateway<D: ActuatorDevice> {
    state: Mutex<GatewayState<D>>,
}

impl<D: ActuatorDevice> DeviceGateway<D> {
    /// Wrap a device. The link is not opened; call [`connect`](Self::connect).
    pub fn new(device: D) -> Self {
        Self {
            state: Mutex::new(GatewayState {
                device,
                speed: 0,
                direction: Direction::Forward,
            }),
        }
    }

    /// Open the device link.
    pub async fn connect(&self) -> CommandResult {
        let mut state = self.state.lock().await;
        match state.device.connect() {
            Ok(()) => {
                tracing::info!(mock = state.device.is_mock(), "train connected");
                CommandResult::ok("Train connected")
            }
            Err(e) => {
                tracing::warn!(error = %e, "train connection failed");
                CommandResult::failed(e.to_string())
            }
        }
    }

    /// Close the device link.
    pub async fn disconnect(&self) -> CommandResult {
        let mut state = self.state.lock().await;
        if !state.device.is_connected() {
            return CommandResult::ok("Train already disconnected");
        }
        match state.device.disconnect() {
            Ok(()) => {
                tracing::info!("train disconnected");
                CommandResult::ok("Train disconnected")
            }
            Err(e) => {
                tracing::warn!(error = %e, "error disconnecting from train");
                CommandResult::failed(e.to_string())
            }
        }
    }

    /// Run `f` against the device under the gateway lock.
    ///
    /// Mostly useful for inspecting a mock from tests.
    pub async fn with_device<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut D) -> R,
    {
        let mut state = self.state.lock().await;
        f(&mut state.device)
    }

    /// Keep the link alive in the background.
    ///
    /// While connected the link is re-checked every `backoff.current()` (the
    /// base delay). After a failed attempt the delay grows until it reaches
    /// the cap. The task ends once the gateway is dropped.
    pub fn spawn_reconnect(self: &Arc<Self>, mut backoff: Backoff) -> JoinHandle<()> {
        let gateway = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let Some(strong) = gateway.upgrade() else {
                    break;
                };
                let delay = strong.reconnect_step(&mut backoff).await;
                drop(strong);
                tokio::time::sleep(delay).await;
            }
        })
    }

    async fn reconnect_step(&self, backoff: &mut Backoff) -> Duration {
        let mut state = self.state.lock().await;
        if state.device.is_connected() {
            backoff.reset();
            return backoff.current();
        }
        match state.device.connect() {
            Ok(()) => {
                tracing::info!("train reconnected");
                backoff.reset();
                backoff.current()
            }
            Err(e) => {
                let delay = backoff.fail();
                tracing::warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "train reconnect failed");
                delay
            }
        }
    }

    async fn run<F>(&self, action: &'static str, f: F) -> CommandResult
    where
        F: FnOnce(&mut GatewayState<D>) -> Result<String, D::Error> + Send,
    {
        let mut state = self.state.lock().await;
        if !state.device.is_connected() {
            tracing::debug!(action, "command refused, train not connected");
            return CommandResult::failed(NOT_CONNECTED);
        }
        match f(&mut state) {
            Ok(message) => {
                tracing::debug!(action, %message, "train command ok");
                CommandResult::ok(message)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(action, error = %message, "train command failed");
                CommandResult::failed(message)
            }
        }
    }
}

impl<D: ActuatorDevice> ActuatorGateway for DeviceGateway<D> {
    async fn set_speed(&self, speed: u8) -> CommandResult {
        if speed > MAX_SPEED_STEP {
            return CommandResult::failed(format!(
                "Speed must be between 0 and {MAX_SPEED_STEP}"
            ));
        }
        self.run("speed", move |state| {
            state.device.set_speed(speed)?;
            state.speed = speed;
            Ok(format!("Speed set to {speed}"))
        })
        .await
    }

    async fn set_direction(&self, direction: DirectionCommand) -> CommandResult {
        self.run("direction", move |state| {
            match direction {
                DirectionCommand::Forward => state.device.set_forward()?,
                DirectionCommand::Reverse => state.device.set_reverse()?,
                DirectionCommand::Toggle => state.device.toggle_direction()?,
            }
            state.direction = direction.resolve(state.direction);
            Ok(format!("Direction set to {}", state.direction))
        })
        .await
    }

    async fn blow_horn(&self) -> CommandResult {
        self.run("horn", |state| {
            state.device.blow_horn()?;
            Ok("Horn blown".to_string())
        })
        .await
    }

    async fn ring_bell(&self, on: bool) -> CommandResult {
        self.run("bell", move |state| {
            state.device.set_bell(on)?;
            Ok(format!("Bell {}", on_off(on)))
        })
        .await
    }

    async fn set_lights(&self, on: bool) -> CommandResult {
        self.run("lights", move |state| {
            state.device.set_lights(on)?;
            Ok(format!("Lights {}", on_off(on)))
        })
        .await
    }

    async fn emergency_stop(&self) -> CommandResult {
        self.run("emergency_stop", |state| {
            state.device.set_speed(0)?;
            state.speed = 0;
            Ok("Emergency stop activated".to_string())
        })
        .await
    }

    async fn end_session_cleanup(&self) -> CommandResult {
        self.run("session_cleanup", |state| {
            state.device.set_speed(0)?;
            state.speed = 0;
            state.device.set_bell(false)?;
            state.device.set_forward()?;
            state.direction = Direction::Forward;
            Ok("Session cleanup complete".to_string())
        })
        .await
    }

    async fn status(&self) -> GatewayStatus {
        let state = self.state.lock().await;
        GatewayStatus {
            connected: state.device.is_connected(),
            speed: state.speed,
            direction: state.direction,
            mock_mode: state.device.is_mock(),
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
