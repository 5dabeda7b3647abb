use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_f64(profile: &str, key: &str, default: f64) -> f64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `FLEET_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("FLEET_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            scheduler: SchedulerConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.scheduler.validate()?;
        self.storage.validate()?;
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  scheduler:   max_jobs={}, client_req_timeout={}s, poll_interval={}s",
            self.scheduler.max_jobs,
            self.scheduler.client_req_timeout_secs,
            self.scheduler.poll_interval_secs
        );
        tracing::info!(
            "  topics:      check={}, cancel={}",
            self.scheduler.check_resource_topic,
            self.scheduler.cancel_resource_topic
        );
        tracing::info!(
            "  storage:     root_dir={}, jobs_dir={}",
            self.storage.root_dir.display(),
            self.storage.jobs_dir
        );
    }
}

// ── Scheduler ─────────────────────────────────────────────────

/// Admission scheduler configuration.
///
/// Deserializable from TOML/JSON with per-field defaults, or built from the
/// environment via [`Config::from_env`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Per-site request timeout for one negotiation round, in seconds.
    #[serde(default = "default_client_req_timeout")]
    pub client_req_timeout_secs: f64,
    /// Maximum number of concurrently admitted jobs.
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
    /// Topic carrying resource-check requests.
    #[serde(default = "default_check_resource_topic")]
    pub check_resource_topic: String,
    /// Topic carrying resource-cancel requests.
    #[serde(default = "default_cancel_resource_topic")]
    pub cancel_resource_topic: String,
    /// Interval between driver-loop scheduling passes, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_client_req_timeout() -> f64 { 1.0 }
fn default_max_jobs() -> usize { 10 }
fn default_check_resource_topic() -> String { "eisenbahn.resource.check".into() }
fn default_cancel_resource_topic() -> String { "eisenbahn.resource.cancel".into() }
fn default_poll_interval() -> u64 { 5 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            client_req_timeout_secs: default_client_req_timeout(),
            max_jobs: default_max_jobs(),
            check_resource_topic: default_check_resource_topic(),
            cancel_resource_topic: default_cancel_resource_topic(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            client_req_timeout_secs: profiled_env_f64(
                p,
                "FLEET_CLIENT_REQ_TIMEOUT",
                default_client_req_timeout(),
            ),
            max_jobs: profiled_env_usize(p, "FLEET_MAX_JOBS", default_max_jobs()),
            check_resource_topic: profiled_env_or(
                p,
                "FLEET_CHECK_RESOURCE_TOPIC",
                &default_check_resource_topic(),
            ),
            cancel_resource_topic: profiled_env_or(
                p,
                "FLEET_CANCEL_RESOURCE_TOPIC",
                &default_cancel_resource_topic(),
            ),
            poll_interval_secs: profiled_env_u64(p, "FLEET_POLL_INTERVAL", default_poll_interval()),
        }
    }

    /// Per-site request timeout as a [`Duration`].
    ///
    /// Out-of-range values saturate: NaN and non-positive become zero,
    /// anything too large for a `Duration` becomes `Duration::MAX`.
    pub fn client_req_timeout(&self) -> Duration {
        let secs = self.client_req_timeout_secs;
        Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
            Duration::MAX
        } else {
            Duration::ZERO
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.client_req_timeout_secs.is_finite() || self.client_req_timeout_secs <= 0.0 {
            return Err(CoreError::Config(format!(
                "client_req_timeout_secs must be a positive number, got {}",
                self.client_req_timeout_secs
            )));
        }
        if Duration::try_from_secs_f64(self.client_req_timeout_secs).is_err() {
            return Err(CoreError::Config(format!(
                "client_req_timeout_secs is too large, got {}",
                self.client_req_timeout_secs
            )));
        }
        if self.max_jobs == 0 {
            return Err(CoreError::Config("max_jobs must be at least 1".into()));
        }
        if self.check_resource_topic.is_empty() || self.cancel_resource_topic.is_empty() {
            return Err(CoreError::Config("resource topics must not be empty".into()));
        }
        if self.check_resource_topic == self.cancel_resource_topic {
            return Err(CoreError::Config(format!(
                "check and cancel topics must differ (both '{}')",
                self.check_resource_topic
            )));
        }
        Ok(())
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Absolute root directory of the artifact store.
    pub root_dir: PathBuf,
    /// Directory (store URI) holding submitted job objects.
    pub jobs_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/tmp/fleet/storage"),
            jobs_dir: "/jobs".into(),
        }
    }
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        Self {
            root_dir: profiled_env_opt(p, "FLEET_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.root_dir),
            jobs_dir: profiled_env_or(p, "FLEET_JOBS_DIR", &defaults.jobs_dir),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.root_dir.is_absolute() {
            return Err(CoreError::Config(format!(
                "storage root_dir must be absolute, got {}",
                self.root_dir.display()
            )));
        }
        Ok(())
    }
}
