//! Actuator abstraction traits for the shared train.
//!
//! Two layers live here:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`ActuatorDevice`] | Low-level driver for one physical locomotive |
//! | [`ActuatorGateway`] | Serialized, result-reporting command surface used by the queue, scripts and jobs |
//!
//! The queue, the script interpreter and the job scheduler only ever talk to
//! an [`ActuatorGateway`]. The crate ships one concrete gateway,
//! [`DeviceGateway`](crate::gateway::DeviceGateway), which wraps any
//! [`ActuatorDevice`]. Mock mode is just `DeviceGateway<MockDevice>`.
//!
//! # Example
//!
//! ```rust
//! use train_queue::gateway::DeviceGateway;
//! use train_queue::hal::MockDevice;
//! use train_queue::traits::{ActuatorGateway, DirectionCommand};
//!
//! # tokio_test_block_on(async {
//! let gateway = DeviceGateway::new(MockDevice::new());
//! gateway.connect().await;
//!
//! assert!(gateway.set_direction(DirectionCommand::Reverse).await.success);
//! assert!(gateway.set_speed(12).await.success);
//! assert!(!gateway.set_speed(40).await.success);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use core::fmt;
use core::future::Future;

/// Highest speed step accepted by the locomotive.
pub const MAX_SPEED_STEP: u8 = 31;

/// Direction of train travel as reported by the gateway.
///
/// Defaults to [`Forward`](Self::Forward), which is what the locomotive
/// assumes after power-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Moving forward.
    #[default]
    Forward,
    /// Moving in reverse.
    Reverse,
}

impl Direction {
    /// Returns the direction as a lowercase string.
    ///
    /// ```
    /// use train_queue::Direction;
    ///
    /// assert_eq!(Direction::Forward.as_str(), "forward");
    /// assert_eq!(Direction::Reverse.as_str(), "reverse");
    /// ```
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }

    /// The opposite direction.
    #[inline]
    pub const fn flipped(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A direction request: set forward, set reverse, or flip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionCommand {
    /// Set direction forward.
    Forward,
    /// Set direction reverse.
    Reverse,
    /// Flip the current direction.
    Toggle,
}

impl DirectionCommand {
    /// Parse a direction request from text.
    ///
    /// Input is trimmed and case-insensitive.
    ///
    /// ```
    /// use train_queue::traits::DirectionCommand;
    ///
    /// assert_eq!(DirectionCommand::from_text("forward"), Some(DirectionCommand::Forward));
    /// assert_eq!(DirectionCommand::from_text(" REVERSE "), Some(DirectionCommand::Reverse));
    /// assert_eq!(DirectionCommand::from_text("toggle"), Some(DirectionCommand::Toggle));
    /// assert_eq!(DirectionCommand::from_text("sideways"), None);
    /// ```
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Some(DirectionCommand::Forward),
            "reverse" => Some(DirectionCommand::Reverse),
            "toggle" => Some(DirectionCommand::Toggle),
            _ => None,
        }
    }

    /// Resolve this request against the current direction.
    pub const fn resolve(self, current: Direction) -> Direction {
        match self {
            DirectionCommand::Forward => Direction::Forward,
            DirectionCommand::Reverse => Direction::Reverse,
            DirectionCommand::Toggle => current.flipped(),
        }
    }
}

/// Outcome of a single gateway command.
///
/// `success == false` is the only failure signal; `message` is shown to the
/// caller verbatim in both cases.
#[derive(Clone, Debug, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CommandResult {
    /// Whether the device accepted the command.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
}

impl CommandResult {
    /// A successful result.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// A failed result.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Snapshot of the gateway's view of the train.
#[derive(Clone, Debug, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct GatewayStatus {
    /// Whether the device link is up.
    pub connected: bool,
    /// Last commanded speed step (0..=31).
    pub speed: u8,
    /// Last commanded direction.
    pub direction: Direction,
    /// Whether the gateway is driving a mock device.
    pub mock_mode: bool,
}

/// Low-level locomotive driver.
///
/// Implement this for a concrete radio binding. Calls are synchronous and
/// take `&mut self`; the gateway guarantees they never interleave.
///
/// # Example Implementation
///
/// ```rust,ignore
/// use train_queue::traits::ActuatorDevice;
///
/// struct BleEngine { /* link handle */ }
///
/// impl ActuatorDevice for BleEngine {
///     type Error = BleError;
///
///     fn connect(&mut self) -> Result<(), BleError> { /* ... */ }
///     fn set_speed(&mut self, step: u8) -> Result<(), BleError> { /* ... */ }
///     // ...
/// }
/// ```
pub trait ActuatorDevice: Send + 'static {
    /// Error type for driver operations.
    type Error: fmt::Display;

    /// Open the link to the locomotive.
    fn connect(&mut self) -> Result<(), Self::Error>;

    /// Close the link.
    fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool;

    /// Set speed step, 0..=31.
    fn set_speed(&mut self, step: u8) -> Result<(), Self::Error>;

    /// Select forward travel.
    fn set_forward(&mut self) -> Result<(), Self::Error>;

    /// Select reverse travel.
    fn set_reverse(&mut self) -> Result<(), Self::Error>;

    /// Flip direction.
    fn toggle_direction(&mut self) -> Result<(), Self::Error>;

    /// Sound a single horn pulse.
    fn blow_horn(&mut self) -> Result<(), Self::Error>;

    /// Start or stop the bell.
    fn set_bell(&mut self, on: bool) -> Result<(), Self::Error>;

    /// Switch the headlights.
    fn set_lights(&mut self, on: bool) -> Result<(), Self::Error>;

    /// Whether this driver only simulates a locomotive.
    fn is_mock(&self) -> bool {
        false
    }
}

/// Command surface over the single shared actuator.
///
/// Every method is idempotent from the caller's point of view and reports a
/// [`CommandResult`] instead of an error type. Implementations must
/// serialize all commands so concurrent callers never race on the device.
pub trait ActuatorGateway: Send + Sync + 'static {
    /// Set speed step, 0..=31.
    fn set_speed(&self, speed: u8) -> impl Future<Output = CommandResult> + Send;

    /// Set or flip direction.
    fn set_direction(&self, direction: DirectionCommand)
        -> impl Future<Output = CommandResult> + Send;

    /// Momentary horn pulse.
    fn blow_horn(&self) -> impl Future<Output = CommandResult> + Send;

    /// Bell on or off.
    fn ring_bell(&self, on: bool) -> impl Future<Output = CommandResult> + Send;

    /// Lights on or off.
    fn set_lights(&self, on: bool) -> impl Future<Output = CommandResult> + Send;

    /// Stop the train immediately.
    fn emergency_stop(&self) -> impl Future<Output = CommandResult> + Send;

    /// Reset the train between two controllers.
    fn end_session_cleanup(&self) -> impl Future<Output = CommandResult> + Send;

    /// Current view of the train.
    fn status(&self) -> impl Future<Output = GatewayStatus> + Send;
}
