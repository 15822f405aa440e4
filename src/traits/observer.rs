//! Session analytics hooks.
//!
//! The turn queue reports when a control session starts and ends. Hooks are
//! best-effort: an `Err` is logged by the queue and otherwise ignored, so a
//! broken analytics backend can never block a hand-off.

use crate::queue::QueueEntrant;

/// Receives control-session boundaries from the turn queue.
///
/// Calls happen while the queue lock is held; keep them fast or hand the work
/// off to another task.
pub trait SessionAnalytics: Send + Sync + 'static {
    /// `entrant` was just promoted to controller.
    fn session_started(&self, entrant: &QueueEntrant) -> anyhow::Result<()>;

    /// The controller `id` lost control (left or expired).
    fn session_ended(&self, id: &str) -> anyhow::Result<()>;
}

/// Analytics sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAnalytics;

impl SessionAnalytics for NoAnalytics {
    fn session_started(&self, _entrant: &QueueEntrant) -> anyhow::Result<()> {
        Ok(())
    }

    fn session_ended(&self, _id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
