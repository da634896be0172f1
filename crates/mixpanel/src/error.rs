//! Error types for the Mixpanel client.

use crate::types::Properties;

/// Errors that can occur when using the Mixpanel client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP client could not be created.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Client has been shutdown.
    #[error("Client has been shutdown")]
    Shutdown,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A message was rejected before it reached the queue.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The persistence substrate failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A message that could not be built. Nothing was enqueued.
///
/// Every variant carries the event name or profile action together with the
/// caller's properties, so the rejection can be logged or retried upstream.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The account token is empty.
    #[error("token is empty, rejected {target:?}")]
    EmptyToken { target: String, properties: Properties },

    /// The event name is empty.
    #[error("event name is empty")]
    EmptyName { properties: Properties },

    /// The profile action is empty.
    #[error("profile action is empty")]
    EmptyAction { properties: Properties },

    /// An increment was requested for an empty property name.
    #[error("increment property name is empty")]
    InvalidIncrement { properties: Properties },

    /// The payload could not be serialized.
    #[error("failed to encode {target:?}: {source}")]
    Encoding {
        target: String,
        properties: Properties,
        #[source]
        source: serde_json::Error,
    },
}

impl BuildError {
    /// The event name or profile action the rejected call targeted.
    pub fn target(&self) -> &str {
        match self {
            BuildError::EmptyToken { target, .. } | BuildError::Encoding { target, .. } => target,
            BuildError::EmptyName { .. } | BuildError::EmptyAction { .. } => "",
            BuildError::InvalidIncrement { .. } => "$add",
        }
    }

    /// The properties supplied with the rejected call.
    pub fn properties(&self) -> &Properties {
        match self {
            BuildError::EmptyToken { properties, .. }
            | BuildError::EmptyName { properties }
            | BuildError::EmptyAction { properties }
            | BuildError::InvalidIncrement { properties }
            | BuildError::Encoding { properties, .. } => properties,
        }
    }
}

/// Errors raised by a [`SettingsStore`](crate::SettingsStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The settings could not be encoded.
    #[error("settings serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Transport-level failure delivering a single request.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request never produced a response (DNS, connect, timeout, reset).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The endpoint answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}
