//! Direct train commands issued by the current controller.
//!
//! A [`DirectCommand`] is what a queued user sends through
//! [`TurnQueue::command`](crate::queue::TurnQueue::command). The queue
//! checks who is allowed to send it; the command itself only knows how to
//! drive the gateway.
//!
//! # Authorization
//!
//! | Command | Who may send it |
//! |---------|-----------------|
//! | [`EmergencyStop`](DirectCommand::EmergencyStop) | Anyone in the queue |
//! | everything else | The current controller only |
//!
//! # Example
//!
//! ```rust
//! use train_queue::DirectCommand;
//! use train_queue::traits::DirectionCommand;
//!
//! let cmd = DirectCommand::SetDirection(DirectionCommand::Toggle);
//! assert_eq!(cmd.name(), "direction");
//! assert!(!cmd.is_emergency());
//! assert!(DirectCommand::EmergencyStop.is_emergency());
//! ```

use crate::traits::{ActuatorGateway, CommandResult, DirectionCommand};

/// A single command against the shared train.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "command", content = "value", rename_all = "snake_case")]
pub enum DirectCommand {
    /// Set speed step (0..=31).
    SetSpeed(u8),
    /// Set or flip direction.
    SetDirection(DirectionCommand),
    /// Horn pulse.
    Horn,
    /// Bell on/off.
    Bell(bool),
    /// Lights on/off.
    Lights(bool),
    /// Stop the train now.
    EmergencyStop,
}

impl DirectCommand {
    /// Short name used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            DirectCommand::SetSpeed(_) => "speed",
            DirectCommand::SetDirection(_) => "direction",
            DirectCommand::Horn => "horn",
            DirectCommand::Bell(_) => "bell",
            DirectCommand::Lights(_) => "lights",
            DirectCommand::EmergencyStop => "emergency_stop",
        }
    }

    /// Whether any queued entrant may send this command.
    pub const fn is_emergency(&self) -> bool {
        matches!(self, DirectCommand::EmergencyStop)
    }

    /// Send the command to the gateway.
    pub async fn apply<G: ActuatorGateway>(self, gateway: &G) -> CommandResult {
        match self {
            DirectCommand::SetSpeed(speed) => gateway.set_speed(speed).await,
            DirectCommand::SetDirection(direction) => gateway.set_direction(direction).await,
            DirectCommand::Horn => gateway.blow_horn().await,
            DirectCommand::Bell(on) => gateway.ring_bell(on).await,
            DirectCommand::Lights(on) => gateway.set_lights(on).await,
            DirectCommand::EmergencyStop => gateway.emergency_stop().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::DeviceGateway;
    use crate::hal::{DeviceCall, MockDevice};

    #[test]
    fn names_are_stable() {
        assert_eq!(DirectCommand::SetSpeed(3).name(), "speed");
        assert_eq!(DirectCommand::Horn.name(), "horn");
        assert_eq!(DirectCommand::Bell(true).name(), "bell");
        assert_eq!(DirectCommand::Lights(false).name(), "lights");
        assert_eq!(DirectCommand::EmergencyStop.name(), "emergency_stop");
    }

    #[test]
    fn serde_shape() {
        let json = serde_json::to_string(&DirectCommand::SetSpeed(12)).unwrap();
        assert_eq!(json, r#"{"command":"set_speed","value":12}"#);
        let cmd: DirectCommand = serde_json::from_str(r#"{"command":"horn"}"#).unwrap();
        assert_eq!(cmd, DirectCommand::Horn);
    }

    #[tokio::test]
    async fn apply_routes_to_gateway() {
        let gateway = DeviceGateway::new(MockDevice::connected());

        assert!(DirectCommand::SetSpeed(9).apply(&gateway).await.success);
        assert!(DirectCommand::SetDirection(DirectionCommand::Reverse)
            .apply(&gateway)
            .await
            .success);
        assert!(DirectCommand::Lights(true).apply(&gateway).await.success);
        assert!(!DirectCommand::SetSpeed(99).apply(&gateway).await.success);

        let calls = gateway.with_device(|d| d.calls.clone()).await;
        assert_eq!(
            calls,
            vec![
                DeviceCall::Speed(9),
                DeviceCall::Reverse,
                DeviceCall::Lights(true)
            ]
        );
    }
}
