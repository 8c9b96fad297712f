use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_FETCH_TIMEOUT_MS: &str = "SESSION_SYNC_FETCH_TIMEOUT_MS";
pub const ENV_MERGE_POLICY: &str = "SESSION_SYNC_MERGE_POLICY";
pub const ENV_REDISPATCH_ON_SWITCH: &str = "SESSION_SYNC_REDISPATCH_ON_SWITCH";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: expected a non-negative integer, got '{value}'")]
    InvalidNumber { key: String, value: String },
    #[error("{key}: expected true/false, got '{value}'")]
    InvalidBool { key: String, value: String },
    #[error("fetch_timeout_ms must be positive; use None to wait indefinitely")]
    ZeroTimeout,
    #[error("{key}: unknown merge policy '{value}' (expected last_writer_wins or push_authoritative)")]
    InvalidMergePolicy { key: String, value: String },
}

/// How a completion is reconciled against the current value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Every completion overwrites the value. A stale fetch may replace a newer push.
    #[default]
    LastWriterWins,
    /// Once any push has been applied, a fetch result arriving later is discarded.
    PushAuthoritative,
}

impl FromStr for MergePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "last_writer_wins" | "lww" => Ok(MergePolicy::LastWriterWins),
            "push_authoritative" | "push" => Ok(MergePolicy::PushAuthoritative),
            _ => Err(()),
        }
    }
}

/// Session store settings. Unspecified values fall back to `Default`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionStoreConfig {
    /// Upper bound on the initial fetch; exceeding it resolves the store to Absent.
    /// `None` waits for the source indefinitely.
    pub fetch_timeout_ms: Option<u64>,
    pub merge_policy: MergePolicy,
    /// Re-associate when one present identity is replaced by another with a different id.
    pub redispatch_on_identity_switch: bool,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: Some(10_000),
            merge_policy: MergePolicy::LastWriterWins,
            redispatch_on_identity_switch: false,
        }
    }
}

impl SessionStoreConfig {
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    /// Reject settings the store cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Build from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup. Missing or empty keys keep their defaults.
    /// A timeout of 0 disables the fetch timeout.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get(ENV_FETCH_TIMEOUT_MS) {
            let ms: u64 = v.parse().map_err(|_| ConfigError::InvalidNumber { key: ENV_FETCH_TIMEOUT_MS.into(), value: v.clone() })?;
            cfg.fetch_timeout_ms = if ms == 0 { None } else { Some(ms) };
        }
        if let Some(v) = get(ENV_MERGE_POLICY) {
            cfg.merge_policy = v.parse().map_err(|_| ConfigError::InvalidMergePolicy { key: ENV_MERGE_POLICY.into(), value: v.clone() })?;
        }
        if let Some(v) = get(ENV_REDISPATCH_ON_SWITCH) {
            cfg.redispatch_on_identity_switch = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::InvalidBool { key: ENV_REDISPATCH_ON_SWITCH.into(), value: v }),
            };
        }
        Ok(cfg)
    }
}
