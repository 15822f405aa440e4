//! Cron-triggered script jobs.
//!
//! A [`ScheduledJob`] pairs a script with a cron expression. The scheduler
//! polls on a fixed interval; on every poll ([`JobScheduler::tick`]) each
//! enabled job that is not already running is checked for due-ness and, if
//! due, executed in its own task on a fresh [`ScriptInterpreter`] bound to
//! the shared gateway.
//!
//! A job is due when it has never run, or when a cron firing happened after
//! its last run and at or before now. Missed firings collapse into one run.
//!
//! Cron expressions use the standard five fields (`min hour dom month dow`)
//! or the six/seven-field form with a leading seconds field.
//!
//! Every mutation writes the complete registry through the [`JobStore`].
//! Store failures are logged and do not undo the change in memory.
//!
//! Scheduled jobs act as the system itself: they do not go through the turn
//! queue's control check, only through the gateway lock.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use train_queue::config::Config;
//! use train_queue::gateway::DeviceGateway;
//! use train_queue::hal::MockDevice;
//! use train_queue::scheduler::{JobScheduler, NewJob};
//! use train_queue::store::MemoryStore;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let gateway = Arc::new(DeviceGateway::new(MockDevice::connected()));
//! let scheduler = JobScheduler::new(gateway, MemoryStore::new(), &Config::default());
//!
//! let job = scheduler
//!     .create(NewJob::new("Hourly horn", "horn", "0 * * * *"))
//!     .await
//!     .unwrap();
//!
//! let outcome = scheduler.run_now(&job.id).await.unwrap();
//! assert!(outcome.success);
//! assert_eq!(scheduler.get(&job.id).await.unwrap().run_count, 1);
//! # });
//! ```

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::{Config, ScriptConfig};
use crate::error::JobError;
use crate::script::{parse_script, ExecutionReport, ScriptInterpreter};
use crate::store::{JobMap, JobStore};
use crate::traits::ActuatorGateway;

/// `last_result` of a run that finished without error.
pub const RESULT_SUCCESS: &str = "Success";

// ============================================================================
// Jobs
// ============================================================================

/// A persisted scheduled job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// UUID v7, so id order is creation order.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub description: String,
    /// Script source, re-parsed on every run.
    pub script: String,
    /// Cron expression as supplied.
    pub cron_expression: String,
    /// Disabled jobs are never triggered by the poll loop.
    pub enabled: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start time of the most recent run.
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    /// `"Success"` or `"Error: <message>"` for the most recent finished run.
    #[serde(default)]
    pub last_result: Option<String>,
    /// Number of runs started.
    #[serde(default)]
    pub run_count: u64,
}

fn default_enabled() -> bool {
    true
}

/// Fields for [`JobScheduler::create`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    /// Human-readable name.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub description: String,
    /// Script source.
    pub script: String,
    /// Cron expression.
    pub cron_expression: String,
    /// Defaults to `true`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl NewJob {
    /// Enabled job with no description.
    pub fn new(name: &str, script: &str, cron_expression: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            script: script.to_string(),
            cron_expression: cron_expression.to_string(),
            enabled: true,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Partial update for [`JobScheduler::update`]. `None` leaves a field alone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New script; validated before it is stored.
    pub script: Option<String>,
    /// New cron expression; validated before it is stored.
    pub cron_expression: Option<String>,
    /// New enabled flag.
    pub enabled: Option<bool>,
}

/// What happened during one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRunOutcome {
    /// Job that ran.
    pub job_id: String,
    /// When the run started.
    pub ran_at: DateTime<Utc>,
    /// Whether the script finished without error.
    pub success: bool,
    /// Value stored as the job's `last_result`.
    pub result: String,
    /// Interpreter report for successful runs.
    pub report: Option<ExecutionReport>,
}

/// Parse a cron expression, accepting the five-field form.
pub fn parse_cron(expression: &str) -> Result<Schedule, JobError> {
    let trimmed = expression.trim();
    let normalized = match trimmed.split_whitespace().count() {
        5 => format!("0 {trimmed}"),
        _ => trimmed.to_string(),
    };
    Schedule::from_str(&normalized).map_err(|e| JobError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Whether a job last started at `last_run` is due at `now`.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use train_queue::scheduler::{is_due, parse_cron};
///
/// let hourly = parse_cron("0 * * * *").unwrap();
/// let last = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
/// assert!(!is_due(&hourly, Some(last), last + chrono::Duration::minutes(59)));
/// assert!(is_due(&hourly, Some(last), last + chrono::Duration::minutes(60)));
/// ```
pub fn is_due(schedule: &Schedule, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_run {
        None => true,
        Some(last) => schedule
            .after(&last)
            .next()
            .is_some_and(|firing| firing <= now),
    }
}

// ============================================================================
// Scheduler
// ============================================================================

type RunResult = Result<JobRunOutcome, JobError>;

struct InFlight<G> {
    run: u64,
    interpreter: Arc<ScriptInterpreter<G>>,
    handle: JoinHandle<()>,
}

struct SchedulerState<G> {
    jobs: JobMap,
    in_flight: HashMap<String, InFlight<G>>,
    next_run: u64,
}

impl<G> SchedulerState<G> {
    /// Drop entries whose task ended without clearing them (panic).
    fn reap(&mut self) {
        self.in_flight.retain(|_, f| !f.handle.is_finished());
    }

    /// Clear `id` only if it still belongs to execution `run`.
    fn finish(&mut self, id: &str, run: u64) {
        if self.in_flight.get(id).is_some_and(|f| f.run == run) {
            self.in_flight.remove(id);
        }
    }
}

struct Inner<G, S> {
    gateway: Arc<G>,
    store: S,
    script_config: ScriptConfig,
    poll: Duration,
    state: Mutex<SchedulerState<G>>,
    poll_loop: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Shared handle to the job scheduler. Clones refer to the same registry.
pub struct JobScheduler<G, S> {
    inner: Arc<Inner<G, S>>,
}

impl<G, S> Clone for JobScheduler<G, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: ActuatorGateway, S: JobStore> JobScheduler<G, S> {
    /// Creates a scheduler and loads the stored registry.
    ///
    /// A store that cannot be read yields an empty registry.
    pub fn new(gateway: Arc<G>, store: S, config: &Config) -> Self {
        let jobs = match store.load() {
            Ok(jobs) => {
                tracing::info!(count = jobs.len(), "loaded scheduled jobs");
                jobs
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load scheduled jobs, starting empty");
                JobMap::new()
            }
        };

        Self {
            inner: Arc::new(Inner {
                gateway,
                store,
                script_config: config.script.clone(),
                poll: config.scheduler.poll_interval(),
                state: Mutex::new(SchedulerState {
                    jobs,
                    in_flight: HashMap::new(),
                    next_run: 0,
                }),
                poll_loop: std::sync::Mutex::new(None),
            }),
        }
    }

    /// The job store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Validate and add a job.
    pub async fn create(&self, new: NewJob) -> Result<ScheduledJob, JobError> {
        parse_cron(&new.cron_expression)?;
        parse_script(&new.script).map_err(JobError::InvalidScript)?;

        let job = ScheduledJob {
            id: uuid::Uuid::now_v7().to_string(),
            name: new.name,
            description: new.description,
            script: new.script,
            cron_expression: new.cron_expression,
            enabled: new.enabled,
            created_at: Utc::now(),
            last_run: None,
            last_result: None,
            run_count: 0,
        };

        let mut state = self.inner.state.lock().await;
        state.jobs.insert(job.id.clone(), job.clone());
        self.persist(&state.jobs);
        tracing::info!(job = %job.id, name = %job.name, cron = %job.cron_expression, "job created");
        Ok(job)
    }

    /// Apply a partial update. Nothing changes if any supplied field is invalid.
    pub async fn update(&self, id: &str, update: JobUpdate) -> Result<ScheduledJob, JobError> {
        if let Some(cron) = &update.cron_expression {
            parse_cron(cron)?;
        }
        if let Some(script) = &update.script {
            parse_script(script).map_err(JobError::InvalidScript)?;
        }

        let mut state = self.inner.state.lock().await;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if let Some(name) = update.name {
            job.name = name;
        }
        if let Some(description) = update.description {
            job.description = description;
        }
        if let Some(script) = update.script {
            job.script = script;
        }
        if let Some(cron) = update.cron_expression {
            job.cron_expression = cron;
        }
        if let Some(enabled) = update.enabled {
            job.enabled = enabled;
        }
        let updated = job.clone();

        self.persist(&state.jobs);
        tracing::info!(job = id, "job updated");
        Ok(updated)
    }

    /// Remove a job, stopping it first if it is running.
    pub async fn delete(&self, id: &str) -> Result<(), JobError> {
        let mut state = self.inner.state.lock().await;
        if state.jobs.remove(id).is_none() {
            return Err(JobError::NotFound(id.to_string()));
        }
        if let Some(running) = state.in_flight.remove(id) {
            cancel(running);
            tracing::info!(job = id, "cancelled running job");
        }
        self.persist(&state.jobs);
        tracing::info!(job = id, "job deleted");
        Ok(())
    }

    /// One job by id.
    pub async fn get(&self, id: &str) -> Result<ScheduledJob, JobError> {
        self.inner
            .state
            .lock()
            .await
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// All jobs in creation order.
    pub async fn list(&self) -> Vec<ScheduledJob> {
        self.inner.state.lock().await.jobs.values().cloned().collect()
    }

    /// Whether `id` has an execution in flight.
    pub async fn is_job_running(&self, id: &str) -> bool {
        self.inner.state.lock().await.in_flight.contains_key(id)
    }

    /// Run a job immediately and wait for it to finish.
    ///
    /// Disabled jobs can still be run this way. The run lives in its own
    /// task: dropping the returned future does not stop it, and the job is
    /// released once it completes. A run cut short by
    /// [`delete`](Self::delete) or [`stop`](Self::stop) yields
    /// [`JobError::Cancelled`].
    pub async fn run_now(&self, id: &str) -> Result<JobRunOutcome, JobError> {
        let outcome = {
            let mut state = self.inner.state.lock().await;
            state.reap();
            if !state.jobs.contains_key(id) {
                return Err(JobError::NotFound(id.to_string()));
            }
            if state.in_flight.contains_key(id) {
                return Err(JobError::AlreadyRunning(id.to_string()));
            }
            self.dispatch(&mut state, id)
        };

        tracing::info!(job = id, "manual job run");
        outcome
            .await
            .unwrap_or_else(|_| Err(JobError::Cancelled(id.to_string())))
    }

    /// One poll iteration: start every due job. Returns the ids started.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        state.reap();

        let mut due = Vec::new();
        for job in state.jobs.values() {
            if !job.enabled || state.in_flight.contains_key(&job.id) {
                continue;
            }
            match parse_cron(&job.cron_expression) {
                Ok(schedule) => {
                    if is_due(&schedule, job.last_run, now) {
                        due.push(job.id.clone());
                    }
                }
                Err(e) => tracing::warn!(job = %job.id, error = %e, "skipping job with bad schedule"),
            }
        }

        for id in &due {
            // nobody waits on a scheduled run; execute records the result
            drop(self.dispatch(state, id));
            tracing::info!(job = %id, "job due, started");
        }

        due
    }

    /// Start the poll loop. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut poll_loop = self
            .inner
            .poll_loop
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if poll_loop.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::warn!("scheduler already running");
            return false;
        }

        let weak = Arc::downgrade(&self.inner);
        let poll = self.inner.poll;
        *poll_loop = Some(tokio::spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                JobScheduler { inner }.tick(Utc::now()).await;
                tokio::time::sleep(poll).await;
            }
        }));
        tracing::info!(poll_secs = poll.as_secs(), "scheduler started");
        true
    }

    /// Whether the poll loop is running.
    pub fn is_running(&self) -> bool {
        self.inner
            .poll_loop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the poll loop and cancel every execution in flight.
    pub async fn stop(&self) {
        let poll_loop = self
            .inner
            .poll_loop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = poll_loop {
            handle.abort();
        }

        let mut state = self.inner.state.lock().await;
        for (id, running) in state.in_flight.drain() {
            tracing::info!(job = %id, "cancelling running job");
            cancel(running);
        }
        tracing::info!("scheduler stopped");
    }

    fn interpreter(&self) -> Arc<ScriptInterpreter<G>> {
        Arc::new(ScriptInterpreter::with_config(
            Arc::clone(&self.inner.gateway),
            &self.inner.script_config,
        ))
    }

    /// Spawn an execution of `id` and register it as in flight.
    ///
    /// Must be called with the state lock held, so the task cannot finish
    /// before its entry exists.
    fn dispatch(&self, state: &mut SchedulerState<G>, id: &str) -> oneshot::Receiver<RunResult> {
        let run = state.next_run;
        state.next_run += 1;

        let interpreter = self.interpreter();
        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        let job_id = id.to_string();
        let running = Arc::clone(&interpreter);
        let handle = tokio::spawn(async move {
            let outcome = this.execute(&job_id, run, running).await;
            if let Err(e) = &outcome {
                tracing::debug!(job = %job_id, error = %e, "job run skipped");
            }
            let _ = tx.send(outcome);
        });

        state.in_flight.insert(
            id.to_string(),
            InFlight {
                run,
                interpreter,
                handle,
            },
        );
        rx
    }

    async fn execute(
        &self,
        id: &str,
        run: u64,
        interpreter: Arc<ScriptInterpreter<G>>,
    ) -> RunResult {
        let ran_at = Utc::now();
        let script = {
            let mut state = self.inner.state.lock().await;
            let Some(job) = state.jobs.get_mut(id) else {
                state.finish(id, run);
                return Err(JobError::NotFound(id.to_string()));
            };
            job.last_run = Some(ran_at);
            job.run_count += 1;
            let script = job.script.clone();
            self.persist(&state.jobs);
            script
        };

        tracing::info!(job = id, "executing job");
        let (success, result, report) = match interpreter.execute(&script).await {
            Ok(report) => {
                tracing::info!(job = id, commands = report.commands_executed, "job finished");
                (true, RESULT_SUCCESS.to_string(), Some(report))
            }
            Err(e) => {
                tracing::warn!(job = id, error = %e, "job failed");
                (false, format!("Error: {e}"), None)
            }
        };

        let mut state = self.inner.state.lock().await;
        state.finish(id, run);
        match state.jobs.get_mut(id) {
            Some(job) => {
                job.last_result = Some(result.clone());
                self.persist(&state.jobs);
            }
            None => tracing::debug!(job = id, "job deleted while running"),
        }

        Ok(JobRunOutcome {
            job_id: id.to_string(),
            ran_at,
            success,
            result,
            report,
        })
    }

    fn persist(&self, jobs: &JobMap) {
        if let Err(e) = self.inner.store.save(jobs) {
            tracing::warn!(error = %e, "failed to save scheduled jobs");
        }
    }
}

fn cancel<G: ActuatorGateway>(running: InFlight<G>) {
    running.interpreter.stop();
    running.handle.abort();
}
