//! Unified error model for session synchronization.
//! Source, subscription and sink errors are recovered by the store and only logged;
//! config and runtime errors are returned from `SessionStore::start` and nowhere else.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::{debug, error, info, warn, Level};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionError {
    SourceFetch { code: String, message: String },
    Subscribe { code: String, message: String },
    Sink { code: String, message: String },
    Config { code: String, message: String },
    Runtime { code: String, message: String },
}

impl SessionError {
    pub fn code_str(&self) -> &str {
        match self {
            SessionError::SourceFetch { code, .. }
            | SessionError::Subscribe { code, .. }
            | SessionError::Sink { code, .. }
            | SessionError::Config { code, .. }
            | SessionError::Runtime { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SessionError::SourceFetch { message, .. }
            | SessionError::Subscribe { message, .. }
            | SessionError::Sink { message, .. }
            | SessionError::Config { message, .. }
            | SessionError::Runtime { message, .. } => message.as_str(),
        }
    }

    pub fn source_fetch<S: Into<String>>(code: S, msg: S) -> Self { SessionError::SourceFetch { code: code.into(), message: msg.into() } }
    pub fn subscribe<S: Into<String>>(code: S, msg: S) -> Self { SessionError::Subscribe { code: code.into(), message: msg.into() } }
    pub fn sink<S: Into<String>>(code: S, msg: S) -> Self { SessionError::Sink { code: code.into(), message: msg.into() } }
    pub fn config<S: Into<String>>(code: S, msg: S) -> Self { SessionError::Config { code: code.into(), message: msg.into() } }
    pub fn runtime<S: Into<String>>(code: S, msg: S) -> Self { SessionError::Runtime { code: code.into(), message: msg.into() } }

    /// Level at which the store reports this error.
    pub fn severity(&self) -> Level {
        match self {
            SessionError::SourceFetch { .. } | SessionError::Subscribe { .. } | SessionError::Sink { .. } => Level::WARN,
            SessionError::Config { .. } | SessionError::Runtime { .. } => Level::ERROR,
        }
    }

    /// Log this error under the `session` target at its [`severity`](Self::severity).
    pub fn report(&self, context: &str) {
        let level = self.severity();
        if level == Level::ERROR {
            error!(target: "session", code = self.code_str(), error = %self, "{}", context);
        } else if level == Level::WARN {
            warn!(target: "session", code = self.code_str(), error = %self, "{}", context);
        } else if level == Level::INFO {
            info!(target: "session", code = self.code_str(), error = %self, "{}", context);
        } else {
            debug!(target: "session", code = self.code_str(), error = %self, "{}", context);
        }
    }

    /// True when the store keeps running after this error (possibly degraded).
    /// Only start-up errors abort construction of a store.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SessionError::Config { .. } | SessionError::Runtime { .. })
    }
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for SessionError {}

pub type SessionResult<T> = Result<T, SessionError>;

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        // Collaborator errors arrive as anyhow; without more context they are runtime failures
        SessionError::Runtime { code: "runtime_error".into(), message: format!("{:#}", err) }
    }
}

impl From<crate::config::ConfigError> for SessionError {
    fn from(err: crate::config::ConfigError) -> Self {
        SessionError::Config { code: "invalid_config".into(), message: err.to_string() }
    }
}
