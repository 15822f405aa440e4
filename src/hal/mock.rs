//! Mock locomotive for mock mode and tests.
//!
//! [`MockDevice`] implements [`ActuatorDevice`] without any radio. It keeps
//! the simulated train state, records every driver call in order, and can be
//! told to fail commands or drop its link so error paths can be exercised.
//!
//! # Example
//!
//! ```rust
//! use train_queue::hal::{DeviceCall, MockDevice};
//! use train_queue::traits::ActuatorDevice;
//!
//! let mut device = MockDevice::new();
//! device.connect().unwrap();
//! device.set_speed(10).unwrap();
//! device.blow_horn().unwrap();
//!
//! assert_eq!(device.speed, 10);
//! assert_eq!(device.calls, vec![DeviceCall::Connect, DeviceCall::Speed(10), DeviceCall::Horn]);
//! ```
//!
//! [`ActuatorDevice`]: crate::traits::ActuatorDevice

use core::fmt;

use crate::traits::{ActuatorDevice, Direction};

/// One recorded driver call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceCall {
    /// `connect()`
    Connect,
    /// `disconnect()`
    Disconnect,
    /// `set_speed(step)`
    Speed(u8),
    /// `set_forward()`
    Forward,
    /// `set_reverse()`
    Reverse,
    /// `toggle_direction()`
    Toggle,
    /// `blow_horn()`
    Horn,
    /// `set_bell(on)`
    Bell(bool),
    /// `set_lights(on)`
    Lights(bool),
}

/// Error raised by [`MockDevice`] when told to fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockError(pub String);

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Simulated locomotive.
///
/// Public fields are meant for inspection from tests.
#[derive(Debug, Default)]
pub struct MockDevice {
    /// Link state.
    pub connected: bool,
    /// Current speed step.
    pub speed: u8,
    /// Current direction.
    pub direction: Direction,
    /// Bell state.
    pub bell: bool,
    /// Lights state.
    pub lights: bool,
    /// Every successful call, in order.
    pub calls: Vec<DeviceCall>,
    /// When set, every command (not connect) fails with this message.
    pub fail_with: Option<String>,
    /// Number of upcoming `connect()` calls that should fail.
    pub connect_failures: u32,
}

impl MockDevice {
    /// Creates a disconnected mock with default state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock whose link is already up.
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    /// Creates a mock whose commands always fail with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    /// Make the next `count` connection attempts fail.
    pub fn with_connect_failures(mut self, count: u32) -> Self {
        self.connect_failures = count;
        self
    }

    /// Simulate the radio link dropping.
    pub fn drop_link(&mut self) {
        self.connected = false;
    }

    /// Number of recorded calls equal to `call`.
    pub fn count(&self, call: &DeviceCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    fn command(&mut self, call: DeviceCall) -> Result<(), MockError> {
        if let Some(message) = &self.fail_with {
            return Err(MockError(message.clone()));
        }
        match &call {
            DeviceCall::Speed(step) => self.speed = *step,
            DeviceCall::Forward => self.direction = Direction::Forward,
            DeviceCall::Reverse => self.direction = Direction::Reverse,
            DeviceCall::Toggle => self.direction = self.direction.flipped(),
            DeviceCall::Bell(on) => self.bell = *on,
            DeviceCall::Lights(on) => self.lights = *on,
            DeviceCall::Horn | DeviceCall::Connect | DeviceCall::Disconnect => {}
        }
        self.calls.push(call);
        Ok(())
    }
}

impl ActuatorDevice for MockDevice {
    type Error = MockError;

    fn connect(&mut self) -> Result<(), MockError> {
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(MockError("mock link refused".into()));
        }
        self.connected = true;
        self.calls.push(DeviceCall::Connect);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), MockError> {
        self.connected = false;
        self.calls.push(DeviceCall::Disconnect);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn set_speed(&mut self, step: u8) -> Result<(), MockError> {
        self.command(DeviceCall::Speed(step))
    }

    fn set_forward(&mut self) -> Result<(), MockError> {
        self.command(DeviceCall::Forward)
    }

    fn set_reverse(&mut self) -> Result<(), MockError> {
        self.command(DeviceCall::Reverse)
    }

    fn toggle_direction(&mut self) -> Result<(), MockError> {
        self.command(DeviceCall::Toggle)
    }

    fn blow_horn(&mut self) -> Result<(), MockError> {
        self.command(DeviceCall::Horn)
    }

    fn set_bell(&mut self, on: bool) -> Result<(), MockError> {
        self.command(DeviceCall::Bell(on))
    }

    fn set_lights(&mut self, on: bool) -> Result<(), MockError> {
        self.command(DeviceCall::Lights(on))
    }

    fn is_mock(&self) -> bool {
        true
    }
}
