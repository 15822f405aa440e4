//! Shared configuration for the queue, scripts, scheduler, gateway and host.
//!
//! Every section has sensible defaults and builder-style setters. Hosts
//! usually start from [`Config::from_env`], which overlays the `TRAIN_*`
//! environment variables on top of the defaults.
//!
//! # Example
//!
//! ```rust
//! use train_queue::config::{Config, QueueConfig, WebConfig};
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.queue.control_timeout_secs, 300);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_queue(QueueConfig::default().with_control_timeout_secs(120))
//!     .with_web(WebConfig::default().with_port(3000));
//! ```

use core::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable for the control timeout in seconds.
pub const ENV_QUEUE_TIMEOUT: &str = "TRAIN_QUEUE_TIMEOUT";
/// Environment variable for the idle timeout in seconds.
pub const ENV_IDLE_TIMEOUT: &str = "TRAIN_IDLE_TIMEOUT";
/// Environment variable for the locomotive radio address.
pub const ENV_TRAIN_ADDRESS: &str = "TRAIN_ADDRESS";
/// Environment variable for the HTTP bind host.
pub const ENV_SERVER_HOST: &str = "TRAIN_SERVER_HOST";
/// Environment variable for the HTTP port.
pub const ENV_SERVER_PORT: &str = "TRAIN_SERVER_PORT";
/// Environment variable for the job registry file.
pub const ENV_JOBS_FILE: &str = "TRAIN_JOBS_FILE";

// ============================================================================
// Main Config
// ============================================================================

/// Complete application configuration
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// Turn queue configuration
    pub queue: QueueConfig,
    /// Script interpreter configuration
    pub script: ScriptConfig,
    /// Job scheduler configuration
    pub scheduler: SchedulerConfig,
    /// Actuator gateway configuration
    pub gateway: GatewayConfig,
    /// HTTP host configuration
    pub web: WebConfig,
}

impl Config {
    /// Defaults overlaid with the `TRAIN_*` process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from an arbitrary lookup.
    ///
    /// Unset variables keep their defaults; set but unparsable ones are an
    /// error rather than being silently ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_QUEUE_TIMEOUT)? {
            if !CONTROL_TIMEOUT_RANGE.contains(&secs) {
                return Err(ConfigError::InvalidVar {
                    name: ENV_QUEUE_TIMEOUT,
                    value: secs.to_string(),
                });
            }
            config.queue.control_timeout_secs = secs;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_IDLE_TIMEOUT)? {
            config.queue.idle_timeout_secs = secs;
        }
        if let Some(address) = lookup(ENV_TRAIN_ADDRESS).filter(|a| !a.trim().is_empty()) {
            config.gateway.device_address = Some(address.trim().to_string());
        }
        if let Some(host) = lookup(ENV_SERVER_HOST).filter(|h| !h.trim().is_empty()) {
            config.web.host = host.trim().to_string();
        }
        if let Some(port) = parse_var::<u16, _>(&lookup, ENV_SERVER_PORT)? {
            config.web.port = port;
        }
        if let Some(path) = lookup(ENV_JOBS_FILE).filter(|p| !p.trim().is_empty()) {
            config.scheduler.jobs_path = PathBuf::from(path.trim());
        }

        Ok(config)
    }

    /// Set queue configuration
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set script configuration
    pub fn with_script(mut self, script: ScriptConfig) -> Self {
        self.script = script;
        self
    }

    /// Set scheduler configuration
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Set gateway configuration
    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = gateway;
        self
    }

    /// Set web configuration
    pub fn with_web(mut self, web: WebConfig) -> Self {
        self.web = web;
        self
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: core::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { name, value: raw }),
    }
}

// ============================================================================
// Queue Config
// ============================================================================

/// Accepted control timeouts, in seconds.
pub const CONTROL_TIMEOUT_RANGE: RangeInclusive<u64> = 10..=3600;

/// Turn queue configuration
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct QueueConfig {
    /// How long one controller keeps the train, in seconds
    pub control_timeout_secs: u64,
    /// Idle time with an empty queue before the lights are switched off
    pub idle_timeout_secs: u64,
    /// How often the idle monitor checks, in seconds
    pub idle_poll_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            control_timeout_secs: 300,
            idle_timeout_secs: 600,
            idle_poll_secs: 30,
        }
    }
}

impl QueueConfig {
    /// Set the control timeout
    pub fn with_control_timeout_secs(mut self, secs: u64) -> Self {
        self.control_timeout_secs = secs;
        self
    }

    /// Set the idle timeout
    pub fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    /// Set the idle monitor poll interval
    pub fn with_idle_poll_secs(mut self, secs: u64) -> Self {
        self.idle_poll_secs = secs.max(1);
        self
    }

    /// Idle timeout as a `Duration`
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Control timeout as a `Duration`, clamped to [`CONTROL_TIMEOUT_RANGE`]
    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(
            self.control_timeout_secs
                .clamp(*CONTROL_TIMEOUT_RANGE.start(), *CONTROL_TIMEOUT_RANGE.end()),
        )
    }

    /// Idle poll interval as a `Duration`
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs.max(1))
    }
}

// ============================================================================
// Script Config
// ============================================================================

/// Script interpreter configuration
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ScriptConfig {
    /// Granularity of `wait` in milliseconds; a stop request is seen within one slice
    pub wait_slice_ms: u64,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self { wait_slice_ms: 100 }
    }
}

impl ScriptConfig {
    /// Set the wait slice
    pub fn with_wait_slice_ms(mut self, ms: u64) -> Self {
        self.wait_slice_ms = ms.max(1);
        self
    }

    /// Wait slice as a `Duration`
    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_ms.max(1))
    }
}

// ============================================================================
// Scheduler Config
// ============================================================================

/// Job scheduler configuration
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SchedulerConfig {
    /// How often due jobs are checked, in seconds
    pub poll_secs: u64,
    /// Where the job registry is persisted
    pub jobs_path: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_secs: 30,
            jobs_path: PathBuf::from("scheduled_jobs.json"),
        }
    }
}

impl SchedulerConfig {
    /// Set the poll interval
    pub fn with_poll_secs(mut self, secs: u64) -> Self {
        self.poll_secs = secs.max(1);
        self
    }

    /// Set the registry path
    pub fn with_jobs_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.jobs_path = path.into();
        self
    }

    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs.max(1))
    }
}

// ============================================================================
// Gateway Config
// ============================================================================

/// Actuator gateway configuration
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GatewayConfig {
    /// Radio address of the locomotive (`None` = mock mode)
    pub device_address: Option<String>,
    /// First reconnect delay in milliseconds
    pub reconnect_base_ms: u64,
    /// Upper bound on the reconnect delay in milliseconds
    pub reconnect_max_ms: u64,
    /// Growth factor applied after each failed reconnect
    pub reconnect_factor: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            device_address: None,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 60_000,
            reconnect_factor: 2,
        }
    }
}

impl GatewayConfig {
    /// Set the device address
    pub fn with_device_address(mut self, address: &str) -> Self {
        self.device_address = Some(address.to_string());
        self
    }

    /// Set reconnect backoff parameters
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64, factor: u32) -> Self {
        self.reconnect_base_ms = base_ms.max(1);
        self.reconnect_max_ms = max_ms.max(self.reconnect_base_ms);
        self.reconnect_factor = factor.max(1);
        self
    }

    /// Whether no real device is configured
    pub fn is_mock(&self) -> bool {
        self.device_address.is_none()
    }
}

// ============================================================================
// Web Config
// ============================================================================

/// HTTP host configuration
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct WebConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Whether to enable CORS for all origins
    pub cors_permissive: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_permissive: true,
        }
    }
}

impl WebConfig {
    /// Set the host
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set CORS mode
    pub fn with_cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.queue.control_timeout_secs, 300);
        assert_eq!(config.queue.idle_timeout_secs, 600);
        assert_eq!(config.queue.idle_poll_secs, 30);
        assert_eq!(config.script.wait_slice_ms, 100);
        assert_eq!(config.scheduler.poll_secs, 30);
        assert_eq!(config.web.port, 8000);
        assert!(config.gateway.is_mock());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::default()
            .with_queue(QueueConfig::default().with_control_timeout_secs(60))
            .with_script(ScriptConfig::default().with_wait_slice_ms(20))
            .with_scheduler(SchedulerConfig::default().with_jobs_path("/tmp/jobs.json"))
            .with_gateway(GatewayConfig::default().with_device_address("AA:BB"))
            .with_web(WebConfig::default().with_port(9000).with_cors(false));

        assert_eq!(config.queue.control_timeout_secs, 60);
        assert_eq!(config.script.wait_slice(), Duration::from_millis(20));
        assert_eq!(config.scheduler.jobs_path, PathBuf::from("/tmp/jobs.json"));
        assert!(!config.gateway.is_mock());
        assert_eq!(config.web.port, 9000);
        assert!(!config.web.cors_permissive);
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let queue = QueueConfig::default().with_idle_poll_secs(0);
        assert_eq!(queue.idle_poll_interval(), Duration::from_secs(1));
        let script = ScriptConfig::default().with_wait_slice_ms(0);
        assert_eq!(script.wait_slice(), Duration::from_millis(1));
    }

    #[test]
    fn control_timeout_is_clamped() {
        let queue = QueueConfig::default().with_control_timeout_secs(0);
        assert_eq!(queue.control_timeout(), Duration::from_secs(10));
        let queue = QueueConfig::default().with_control_timeout_secs(u64::MAX);
        assert_eq!(queue.control_timeout(), Duration::from_secs(3600));
        let queue = QueueConfig::default().with_control_timeout_secs(90);
        assert_eq!(queue.control_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn backoff_builder_keeps_max_above_base() {
        let gateway = GatewayConfig::default().with_backoff(5_000, 10, 0);
        assert_eq!(gateway.reconnect_base_ms, 5_000);
        assert_eq!(gateway.reconnect_max_ms, 5_000);
        assert_eq!(gateway.reconnect_factor, 1);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = Config::from_lookup(lookup(&[
            (ENV_QUEUE_TIMEOUT, "120"),
            (ENV_IDLE_TIMEOUT, " 900 "),
            (ENV_TRAIN_ADDRESS, "44:A6:E5:00:11:22"),
            (ENV_SERVER_HOST, "127.0.0.1"),
            (ENV_SERVER_PORT, "8123"),
            (ENV_JOBS_FILE, "jobs/train.json"),
        ]))
        .unwrap();

        assert_eq!(config.queue.control_timeout_secs, 120);
        assert_eq!(config.queue.idle_timeout_secs, 900);
        assert_eq!(
            config.gateway.device_address.as_deref(),
            Some("44:A6:E5:00:11:22")
        );
        assert_eq!(config.web.host, "127.0.0.1");
        assert_eq!(config.web.port, 8123);
        assert_eq!(config.scheduler.jobs_path, PathBuf::from("jobs/train.json"));
    }

    #[test]
    fn out_of_range_queue_timeout_is_an_error() {
        for raw in ["0", "9", "3601", "18446744073709551615"] {
            let err = Config::from_lookup(lookup(&[(ENV_QUEUE_TIMEOUT, raw)])).unwrap_err();
            assert_eq!(
                err,
                ConfigError::InvalidVar {
                    name: ENV_QUEUE_TIMEOUT,
                    value: raw.to_string()
                }
            );
        }
        let config = Config::from_lookup(lookup(&[(ENV_QUEUE_TIMEOUT, "3600")])).unwrap();
        assert_eq!(config.queue.control_timeout_secs, 3600);
    }

    #[test]
    fn empty_address_stays_mock() {
        let config = Config::from_lookup(lookup(&[(ENV_TRAIN_ADDRESS, "  ")])).unwrap();
        assert!(config.gateway.is_mock());
    }

    #[test]
    fn invalid_env_value_is_an_error() {
        let err = Config::from_lookup(lookup(&[(ENV_SERVER_PORT, "eighty")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidVar {
                name: ENV_SERVER_PORT,
                value: "eighty".to_string()
            }
        );
    }
}
