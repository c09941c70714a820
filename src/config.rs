//! # Engine Configuration
//!
//! Engine-level settings loaded from environment variables.

use std::time::Duration;

/// Replacement engine configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Timeout (seconds) for finding an existing replacement during `replace`
    pub find_replaced_timeout_secs: u64,
    /// Timeout (seconds) for finding an existing replacement during `revert`
    /// Revert is deliberate and less latency sensitive, so it waits longer
    pub revert_find_timeout_secs: u64,
    /// Timeout (seconds) for selecting a fresh target pod
    pub select_timeout_secs: u64,
    /// Timeout (seconds) for a pod to terminate after delete or scale down
    pub termination_timeout_secs: u64,
    /// Poll interval (milliseconds) while waiting for a deleted replacement to vanish
    pub delete_poll_interval_ms: u64,
    /// Poll interval (milliseconds) while waiting for the original pod to terminate
    pub termination_poll_interval_ms: u64,
    /// Poll interval (milliseconds) of the selector's "until not terminating" strategy
    pub select_poll_interval_ms: u64,
    /// Namespace used when the replacement spec does not name one
    pub default_namespace: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            find_replaced_timeout_secs: DEFAULT_FIND_REPLACED_TIMEOUT_SECS,
            revert_find_timeout_secs: DEFAULT_REVERT_FIND_TIMEOUT_SECS,
            select_timeout_secs: DEFAULT_SELECT_TIMEOUT_SECS,
            termination_timeout_secs: DEFAULT_TERMINATION_TIMEOUT_SECS,
            delete_poll_interval_ms: DEFAULT_DELETE_POLL_INTERVAL_MS,
            termination_poll_interval_ms: DEFAULT_TERMINATION_POLL_INTERVAL_MS,
            select_poll_interval_ms: DEFAULT_SELECT_POLL_INTERVAL_MS,
            default_namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            find_replaced_timeout_secs: env_var_or_default(
                "PODREPLACE_FIND_REPLACED_TIMEOUT_SECS",
                DEFAULT_FIND_REPLACED_TIMEOUT_SECS,
            ),
            revert_find_timeout_secs: env_var_or_default(
                "PODREPLACE_REVERT_FIND_TIMEOUT_SECS",
                DEFAULT_REVERT_FIND_TIMEOUT_SECS,
            ),
            select_timeout_secs: env_var_or_default(
                "PODREPLACE_SELECT_TIMEOUT_SECS",
                DEFAULT_SELECT_TIMEOUT_SECS,
            ),
            termination_timeout_secs: env_var_or_default(
                "PODREPLACE_TERMINATION_TIMEOUT_SECS",
                DEFAULT_TERMINATION_TIMEOUT_SECS,
            ),
            delete_poll_interval_ms: env_var_or_default(
                "PODREPLACE_DELETE_POLL_INTERVAL_MS",
                DEFAULT_DELETE_POLL_INTERVAL_MS,
            ),
            termination_poll_interval_ms: env_var_or_default(
                "PODREPLACE_TERMINATION_POLL_INTERVAL_MS",
                DEFAULT_TERMINATION_POLL_INTERVAL_MS,
            ),
            select_poll_interval_ms: env_var_or_default(
                "PODREPLACE_SELECT_POLL_INTERVAL_MS",
                DEFAULT_SELECT_POLL_INTERVAL_MS,
            ),
            default_namespace: env_var_or_default_str(
                "PODREPLACE_DEFAULT_NAMESPACE",
                DEFAULT_NAMESPACE,
            ),
        }
    }

    /// Get the replaced pod lookup timeout used by `replace`
    pub fn find_replaced_timeout(&self) -> Duration {
        Duration::from_secs(self.find_replaced_timeout_secs)
    }

    /// Get the replaced pod lookup timeout used by `revert`
    pub fn revert_find_timeout(&self) -> Duration {
        Duration::from_secs(self.revert_find_timeout_secs)
    }

    /// Get the target selection timeout
    pub fn select_timeout(&self) -> Duration {
        Duration::from_secs(self.select_timeout_secs)
    }

    /// Get the termination timeout
    pub fn termination_timeout(&self) -> Duration {
        Duration::from_secs(self.termination_timeout_secs)
    }

    /// Get the delete poll interval
    pub fn delete_poll_interval(&self) -> Duration {
        Duration::from_millis(self.delete_poll_interval_ms)
    }

    /// Get the termination poll interval
    pub fn termination_poll_interval(&self) -> Duration {
        Duration::from_millis(self.termination_poll_interval_ms)
    }

    /// Get the selector poll interval
    pub fn select_poll_interval(&self) -> Duration {
        Duration::from_millis(self.select_poll_interval_ms)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
