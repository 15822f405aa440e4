//! Shared application state for the HTTP host.
//!
//! `AppState` bundles the turn queue, the job scheduler and the gateway they
//! both drive. Every field is a cheap `Arc`-backed handle, so the state is
//! cloned into each request.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use train_queue::config::Config;
//! use train_queue::gateway::DeviceGateway;
//! use train_queue::hal::MockDevice;
//! use train_queue::services::AppState;
//! use train_queue::store::MemoryStore;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let gateway = Arc::new(DeviceGateway::new(MockDevice::connected()));
//! let state = AppState::new(gateway, MemoryStore::new(), &Config::default());
//!
//! let idle_monitor = state.start();
//! // ... serve requests ...
//! state.shutdown().await;
//! idle_monitor.abort();
//! # });
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::queue::TurnQueue;
use crate::scheduler::JobScheduler;
use crate::store::JobStore;
use crate::traits::ActuatorGateway;

// ============================================================================
// App State
// ============================================================================

/// Services shared by all HTTP handlers.
pub struct AppState<G, S> {
    /// Turn queue.
    pub queue: TurnQueue<G>,
    /// Job scheduler.
    pub scheduler: JobScheduler<G, S>,
    /// Gateway shared by the queue and the scheduler.
    pub gateway: Arc<G>,
}

impl<G, S> Clone for AppState<G, S> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            scheduler: self.scheduler.clone(),
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl<G: ActuatorGateway, S: JobStore> AppState<G, S> {
    /// Build the queue and scheduler around one gateway.
    pub fn new(gateway: Arc<G>, store: S, config: &Config) -> Self {
        Self::from_parts(
            TurnQueue::new(Arc::clone(&gateway), &config.queue),
            JobScheduler::new(Arc::clone(&gateway), store, config),
            gateway,
        )
    }

    /// Assemble state from services that were built separately.
    pub fn from_parts(queue: TurnQueue<G>, scheduler: JobScheduler<G, S>, gateway: Arc<G>) -> Self {
        Self {
            queue,
            scheduler,
            gateway,
        }
    }

    /// Start the scheduler poll loop and the idle monitor.
    ///
    /// Returns the idle monitor task.
    pub fn start(&self) -> JoinHandle<()> {
        self.scheduler.start();
        self.queue.spawn_idle_monitor()
    }

    /// Stop the scheduler and cancel the control timer.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.queue.shutdown().await;
    }
}
