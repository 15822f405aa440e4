//! Turn queue: exclusive, time-sliced control of the train.
//!
//! Users join a FIFO queue. The head of the queue is the controller and is
//! the only entrant allowed to drive the train. Control lasts for the
//! configured control timeout; when it runs out the controller is evicted
//! (not moved to the back) and the next entrant is promoted.
//!
//! ```text
//!   join ──► Waiting ──(reaches head)──► Controlling ──► leave / expiry ──► removed
//!              ▲                              │
//!              └─ first entrant into an empty queue skips Waiting
//! ```
//!
//! # Side effects
//!
//! Every hand-off stops the train through
//! [`ActuatorGateway::end_session_cleanup`], reports session boundaries to
//! [`SessionAnalytics`], and calls the registered change listeners with a
//! fresh [`QueueStatus`]. Side-effect failures are logged and never undo the
//! queue mutation.
//!
//! When the queue has been empty for the idle timeout the lights are
//! switched off once; the next join or leave switches them back on.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use train_queue::config::QueueConfig;
//! use train_queue::gateway::DeviceGateway;
//! use train_queue::hal::MockDevice;
//! use train_queue::queue::TurnQueue;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let gateway = Arc::new(DeviceGateway::new(MockDevice::connected()));
//! let queue = TurnQueue::new(gateway, &QueueConfig::default());
//!
//! let alice = queue.join("alice", "Alice").await.unwrap();
//! assert_eq!(alice.position, 1);
//! let bob = queue.join("bob", "Bob").await.unwrap();
//! assert_eq!(bob.position, 2);
//!
//! assert!(queue.has_control("alice").await);
//! queue.leave("alice").await.unwrap();
//! assert!(queue.has_control("bob").await);
//! # queue.shutdown().await;
//! # });
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::commands::DirectCommand;
use crate::config::{QueueConfig, CONTROL_TIMEOUT_RANGE};
use crate::error::QueueError;
use crate::traits::{ActuatorGateway, CommandResult, NoAnalytics, SessionAnalytics};

/// Change listener called with the new status after every mutation.
pub type QueueListener = Box<dyn Fn(&QueueStatus) -> anyhow::Result<()> + Send + Sync>;

// ============================================================================
// Types
// ============================================================================

/// One user waiting for, or holding, control.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueueEntrant {
    /// Client-supplied id, unique within the queue.
    pub id: String,
    /// Name shown to other users.
    pub display_name: String,
    /// When the entrant joined.
    pub joined_at: DateTime<Utc>,
    /// When the entrant was promoted, if it has been.
    pub control_started_at: Option<DateTime<Utc>>,
    /// Whether the entrant is the controller.
    pub is_active: bool,
    #[serde(skip)]
    deadline: Option<Instant>,
}

impl QueueEntrant {
    fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            joined_at: Utc::now(),
            control_started_at: None,
            is_active: false,
            deadline: None,
        }
    }
}

/// One row of [`QueueStatus`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntryStatus {
    /// Entrant id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// 1-based position; the controller is position 1.
    pub position: usize,
    /// Whether this entrant is the controller.
    pub is_active: bool,
    /// Whole seconds of control left, for the controller only.
    pub time_remaining: Option<u64>,
    /// When the entrant joined.
    pub joined_at: DateTime<Utc>,
}

/// Snapshot of the whole queue.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Entrants in queue order.
    pub queue: Vec<QueueEntryStatus>,
    /// Number of entrants.
    pub queue_length: usize,
    /// Id of the controller, if any.
    pub current_controller: Option<String>,
    /// Control timeout in seconds.
    pub control_timeout: u64,
}

/// Result of a successful [`TurnQueue::join`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOutcome {
    /// 1-based position of the new entrant.
    pub position: usize,
    /// Queue length after the join.
    pub queue_length: usize,
}

/// Result of a successful [`TurnQueue::leave`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveOutcome {
    /// Whether the leaving entrant held control.
    pub was_controller: bool,
    /// Controller after the leave.
    pub next_controller: Option<String>,
    /// Queue length after the leave.
    pub queue_length: usize,
}

// ============================================================================
// Turn Queue
// ============================================================================

struct QueueState {
    entrants: Vec<QueueEntrant>,
    controller: Option<String>,
    control_timeout: Duration,
    timer: Option<JoinHandle<()>>,
    // bumped on every arm/cancel; a firing timer with an older value is stale
    generation: u64,
    last_activity: Instant,
    lights_auto_off: bool,
    listeners: Vec<QueueListener>,
}

impl QueueState {
    fn position(&self, id: &str) -> Option<usize> {
        self.entrants.iter().position(|e| e.id == id)
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
    }

    fn snapshot(&self) -> QueueStatus {
        let now = Instant::now();
        let timeout = self.control_timeout.as_secs();
        let queue = self
            .entrants
            .iter()
            .enumerate()
            .map(|(i, e)| QueueEntryStatus {
                id: e.id.clone(),
                display_name: e.display_name.clone(),
                position: i + 1,
                is_active: e.is_active,
                time_remaining: e.is_active.then(|| {
                    e.deadline
                        .map(|d| d.saturating_duration_since(now).as_secs())
                        .unwrap_or(timeout)
                        .min(timeout)
                }),
                joined_at: e.joined_at,
            })
            .collect();

        QueueStatus {
            queue,
            queue_length: self.entrants.len(),
            current_controller: self.controller.clone(),
            control_timeout: timeout,
        }
    }
}

struct Inner<G> {
    gateway: Arc<G>,
    analytics: Arc<dyn SessionAnalytics>,
    idle_timeout: Duration,
    idle_poll: Duration,
    state: Mutex<QueueState>,
}

/// Shared handle to the turn queue. Clones refer to the same queue.
pub struct TurnQueue<G> {
    inner: Arc<Inner<G>>,
}

impl<G> Clone for TurnQueue<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: ActuatorGateway> TurnQueue<G> {
    /// Creates an empty queue without analytics.
    pub fn new(gateway: Arc<G>, config: &QueueConfig) -> Self {
        Self::with_analytics(gateway, config, NoAnalytics)
    }

    /// Creates an empty queue that reports sessions to `analytics`.
    pub fn with_analytics(
        gateway: Arc<G>,
        config: &QueueConfig,
        analytics: impl SessionAnalytics,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                analytics: Arc::new(analytics),
                idle_timeout: config.idle_timeout(),
                idle_poll: config.idle_poll_interval(),
                state: Mutex::new(QueueState {
                    entrants: Vec::new(),
                    controller: None,
                    control_timeout: config.control_timeout(),
                    timer: None,
                    generation: 0,
                    last_activity: Instant::now(),
                    lights_auto_off: false,
                    listeners: Vec::new(),
                }),
            }),
        }
    }

    /// The gateway this queue drives.
    pub fn gateway(&self) -> &Arc<G> {
        &self.inner.gateway
    }

    /// Register a change listener. Listeners run in registration order.
    pub async fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&QueueStatus) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.state.lock().await.listeners.push(Box::new(listener));
    }

    /// Add `id` to the back of the queue.
    ///
    /// The first entrant into an empty queue gets control immediately.
    pub async fn join(&self, id: &str, display_name: &str) -> Result<JoinOutcome, QueueError> {
        let mut state = self.inner.state.lock().await;

        if let Some(index) = state.position(id) {
            return Err(QueueError::AlreadyQueued { position: index + 1 });
        }

        state.entrants.push(QueueEntrant::new(id, display_name));
        let position = state.entrants.len();
        tracing::info!(user = id, position, "user joined queue");

        if state.controller.is_none() {
            self.promote_head(&mut state);
        }

        self.record_activity(&mut state).await;
        self.notify(&state);

        Ok(JoinOutcome {
            position,
            queue_length: state.entrants.len(),
        })
    }

    /// Remove `id` from the queue, handing control on if it was the controller.
    pub async fn leave(&self, id: &str) -> Result<LeaveOutcome, QueueError> {
        let mut state = self.inner.state.lock().await;

        let index = state.position(id).ok_or(QueueError::NotQueued)?;
        let was_controller = state.controller.as_deref() == Some(id);
        state.entrants.remove(index);
        tracing::info!(user = id, was_controller, "user left queue");

        if was_controller {
            state.cancel_timer();
            state.controller = None;
            self.end_session(id).await;
            self.promote_head(&mut state);
        }

        self.record_activity(&mut state).await;
        self.notify(&state);

        Ok(LeaveOutcome {
            was_controller,
            next_controller: state.controller.clone(),
            queue_length: state.entrants.len(),
        })
    }

    /// Whether `id` is the controller.
    pub async fn has_control(&self, id: &str) -> bool {
        self.inner.state.lock().await.controller.as_deref() == Some(id)
    }

    /// Current queue snapshot.
    pub async fn status(&self) -> QueueStatus {
        self.inner.state.lock().await.snapshot()
    }

    /// Change the control timeout.
    ///
    /// Future promotions use the new value. If someone is waiting behind the
    /// controller, the controller's timer restarts with the full new timeout.
    /// Values outside [`CONTROL_TIMEOUT_RANGE`] are rejected and change
    /// nothing.
    pub async fn update_timeout(&self, seconds: u64) -> Result<(), QueueError> {
        if !CONTROL_TIMEOUT_RANGE.contains(&seconds) {
            return Err(QueueError::InvalidTimeout {
                seconds,
                min: *CONTROL_TIMEOUT_RANGE.start(),
                max: *CONTROL_TIMEOUT_RANGE.end(),
            });
        }

        let mut state = self.inner.state.lock().await;
        state.control_timeout = Duration::from_secs(seconds);
        tracing::info!(seconds, "control timeout updated");

        if state.controller.is_some() && state.entrants.len() > 1 {
            self.arm_timer(&mut state);
        }

        self.notify(&state);
        Ok(())
    }

    /// Send a direct command on behalf of `id`.
    ///
    /// Only the controller may drive the train; an emergency stop is accepted
    /// from anyone in the queue.
    pub async fn command(
        &self,
        id: &str,
        command: DirectCommand,
    ) -> Result<CommandResult, QueueError> {
        {
            let state = self.inner.state.lock().await;
            if command.is_emergency() {
                if state.position(id).is_none() {
                    return Err(QueueError::NotQueued);
                }
                tracing::warn!(user = id, "emergency stop requested");
            } else if state.controller.as_deref() != Some(id) {
                tracing::debug!(
                    user = id,
                    command = command.name(),
                    "command from non-controller"
                );
                return Err(QueueError::NotController);
            }
        }

        let result = command.apply(&*self.inner.gateway).await;
        if result.success {
            tracing::info!(user = id, command = command.name(), "command sent");
            Ok(result)
        } else {
            tracing::warn!(
                user = id,
                command = command.name(),
                error = %result.message,
                "command failed"
            );
            Err(QueueError::Device(result.message))
        }
    }

    /// One idle check. Returns `true` if the lights were just switched off.
    pub async fn check_idle(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        if !state.entrants.is_empty() || state.lights_auto_off {
            return false;
        }
        if state.last_activity.elapsed() < self.inner.idle_timeout {
            return false;
        }

        let result = self.inner.gateway.set_lights(false).await;
        if result.success {
            tracing::info!(
                idle_secs = self.inner.idle_timeout.as_secs(),
                "queue idle, lights switched off"
            );
        } else {
            tracing::warn!(error = %result.message, "failed to switch lights off");
        }
        state.lights_auto_off = true;
        true
    }

    /// Run [`check_idle`](Self::check_idle) every poll interval in the background.
    ///
    /// The task ends once every queue handle is dropped.
    pub fn spawn_idle_monitor(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let poll = self.inner.idle_poll;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                TurnQueue { inner }.check_idle().await;
            }
        })
    }

    /// Cancel the control timer.
    pub async fn shutdown(&self) {
        self.inner.state.lock().await.cancel_timer();
        tracing::debug!("turn queue shut down");
    }

    fn promote_head(&self, state: &mut QueueState) {
        let Some(head) = state.entrants.first_mut() else {
            return;
        };
        head.is_active = true;
        head.control_started_at = Some(Utc::now());
        let id = head.id.clone();
        state.controller = Some(id.clone());
        self.arm_timer(state);

        tracing::info!(
            user = %id,
            timeout_secs = state.control_timeout.as_secs(),
            "user granted control"
        );
        if let Err(e) = self.inner.analytics.session_started(&state.entrants[0]) {
            tracing::warn!(user = %id, error = %e, "analytics session start failed");
        }
    }

    fn arm_timer(&self, state: &mut QueueState) {
        state.cancel_timer();
        let generation = state.generation;
        let Some(deadline) = Instant::now().checked_add(state.control_timeout) else {
            tracing::warn!(
                timeout_secs = state.control_timeout.as_secs(),
                "control timeout overflows the clock, timer not armed"
            );
            return;
        };
        if let Some(head) = state.entrants.first_mut() {
            head.deadline = Some(deadline);
        }

        let weak = Arc::downgrade(&self.inner);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                TurnQueue { inner }.expire(generation).await;
            }
        }));
    }

    async fn expire(&self, generation: u64) {
        let mut state = self.inner.state.lock().await;
        if state.generation != generation {
            tracing::debug!(generation, "stale control timer ignored");
            return;
        }
        let Some(id) = state.controller.take() else {
            return;
        };
        // this task is the timer; detach it so promotion cannot abort it
        state.timer = None;

        tracing::info!(user = %id, "control time expired");
        self.end_session(&id).await;
        state.entrants.retain(|e| e.id != id);
        self.promote_head(&mut state);

        self.record_activity(&mut state).await;
        self.notify(&state);
    }

    async fn end_session(&self, id: &str) {
        if let Err(e) = self.inner.analytics.session_ended(id) {
            tracing::warn!(user = id, error = %e, "analytics session end failed");
        }
        let result = self.inner.gateway.end_session_cleanup().await;
        if !result.success {
            tracing::warn!(user = id, error = %result.message, "session cleanup failed");
        }
    }

    async fn record_activity(&self, state: &mut QueueState) {
        state.last_activity = Instant::now();
        if state.lights_auto_off {
            state.lights_auto_off = false;
            let result = self.inner.gateway.set_lights(true).await;
            if result.success {
                tracing::info!("activity resumed, lights switched on");
            } else {
                tracing::warn!(error = %result.message, "failed to switch lights on");
            }
        }
    }

    fn notify(&self, state: &QueueState) {
        if state.listeners.is_empty() {
            return;
        }
        let status = state.snapshot();
        for listener in &state.listeners {
            if let Err(e) = listener(&status) {
                tracing::warn!(error = %e, "queue listener failed");
            }
        }
    }
}
