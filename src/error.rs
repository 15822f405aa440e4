//! Error types for the queue, script interpreter, scheduler and job store.
//!
//! Every error that reaches a caller carries a stable machine-readable
//! [`code`](QueueError::code) next to its human-readable `Display` text.

use thiserror::Error;

/// Turn queue admission and command errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The id is already waiting or controlling.
    #[error("User already in queue (position {position})")]
    AlreadyQueued {
        /// Current 1-based position of the existing entry.
        position: usize,
    },

    /// The id is not in the queue.
    #[error("User not in queue")]
    NotQueued,

    /// The id is queued but does not hold control.
    #[error("You do not have control")]
    NotController,

    /// The gateway rejected the command.
    #[error("{0}")]
    Device(String),

    /// A control timeout outside the accepted range.
    #[error("Queue timeout must be between {min} and {max} seconds, got {seconds}")]
    InvalidTimeout {
        /// Rejected value.
        seconds: u64,
        /// Smallest accepted value.
        min: u64,
        /// Largest accepted value.
        max: u64,
    },
}

impl QueueError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::AlreadyQueued { .. } => "already_queued",
            QueueError::NotQueued => "not_queued",
            QueueError::NotController => "not_controller",
            QueueError::Device(_) => "device_error",
            QueueError::InvalidTimeout { .. } => "invalid_timeout",
        }
    }
}

/// Script parse and execution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The script text is malformed.
    #[error("Line {line}: {reason}")]
    Syntax {
        /// 1-based source line.
        line: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// Another script is running on this interpreter.
    #[error("Script is already running")]
    AlreadyRunning,

    /// The gateway rejected a command; the rest of the script was skipped.
    #[error("Line {line}: Error executing '{opcode}': {message}")]
    Device {
        /// 1-based source line of the failing command.
        line: usize,
        /// Opcode of the failing command.
        opcode: String,
        /// Gateway message, verbatim.
        message: String,
    },
}

impl ScriptError {
    pub(crate) fn syntax(line: usize, reason: impl Into<String>) -> Self {
        ScriptError::Syntax {
            line,
            reason: reason.into(),
        }
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ScriptError::Syntax { .. } => "syntax_error",
            ScriptError::AlreadyRunning => "already_running",
            ScriptError::Device { .. } => "device_error",
        }
    }

    /// Source line the error refers to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            ScriptError::Syntax { line, .. } | ScriptError::Device { line, .. } => Some(*line),
            ScriptError::AlreadyRunning => None,
        }
    }
}

/// Job scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// No job with this id.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The cron expression does not parse.
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron {
        /// Expression as supplied.
        expression: String,
        /// Parser message.
        reason: String,
    },

    /// The script does not parse.
    #[error("Script validation failed: {0}")]
    InvalidScript(#[source] ScriptError),

    /// The job already has an execution in flight.
    #[error("Job is already running: {0}")]
    AlreadyRunning(String),

    /// The run was cancelled by a delete or a scheduler stop.
    #[error("Job run was cancelled: {0}")]
    Cancelled(String),
}

impl JobError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::NotFound(_) => "job_not_found",
            JobError::InvalidCron { .. } => "invalid_cron",
            JobError::InvalidScript(_) => "invalid_script",
            JobError::AlreadyRunning(_) => "already_running",
            JobError::Cancelled(_) => "job_cancelled",
        }
    }
}

/// Job store I/O errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the registry file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The registry file is not valid JSON for a job map.
    #[error("Invalid job file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable is set but does not parse.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidVar {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },
}
