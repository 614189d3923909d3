//! Error kinds raised by the harness.
//!
//! Library code returns [`HarnessError`]; scenarios and the runner binary wrap
//! it in `anyhow` with context.

use crate::events::Event;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// No event matched the predicate before the deadline.
    #[error("instance {instance} never produced the awaited event after {after:?} (waited {waited:?}, {} events seen)", events.len())]
    Timeout {
        instance: String,
        after: Option<f64>,
        waited: Duration,
        /// Every event the source returned on the final fetch.
        events: Vec<Event>,
    },

    /// The shell prompt never showed up after a console command.
    #[error("shell prompt not seen within {waited:?} after `{command}`")]
    PromptTimeout {
        command: String,
        waited: Duration,
        output: String,
    },

    #[error("failed to connect to console at {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("console transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("console only accepts ASCII, got {0:?}")]
    Encoding(String),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("API returned {status} for {method} {path}: {body}")]
    Api {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed API payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` exited with {code:?}\nstderr: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }

    /// True for the deadline-expiry kinds.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::PromptTimeout { .. })
    }
}
