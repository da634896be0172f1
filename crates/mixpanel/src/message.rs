//! Outgoing analytics messages.

use crate::config::Config;
use crate::Error;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Endpoint family a message is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Profile update, sent to the engage endpoint.
    #[default]
    Profile,
    /// Event, sent to the track endpoint.
    Event,
}

/// One serialized payload waiting for delivery.
///
/// Messages are immutable; cloning copies the payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    kind: MessageKind,
    payload: Vec<u8>,
}

/// Persistable form of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(with = "base64_content")]
    pub content: Vec<u8>,
}

mod base64_content {
    use super::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(content: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(content))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

impl Message {
    pub fn new(kind: MessageKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Create an event message.
    pub fn event(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Event, payload)
    }

    /// Create a profile update message.
    pub fn profile(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Profile, payload)
    }

    /// Rebuild a message from a persisted record.
    ///
    /// A malformed record yields an empty default message; callers drop
    /// messages whose payload is empty.
    pub fn from_record(record: &Value) -> Self {
        match MessageRecord::deserialize(record) {
            Ok(record) => Self::from(record),
            Err(e) => {
                warn!(error = %e, "malformed message record");
                Self::default()
            }
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Persistable record for this message.
    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            kind: self.kind,
            content: self.payload.clone(),
        }
    }

    /// Request URL delivering this message: the endpoint for its kind with
    /// the base64 payload in the `data` query parameter.
    pub fn to_request(&self, config: &Config) -> Result<Url, Error> {
        let endpoint = match self.kind {
            MessageKind::Event => config.track_endpoint(),
            MessageKind::Profile => config.engage_endpoint(),
        };

        let data = STANDARD.encode(&self.payload);
        Url::parse_with_params(&endpoint, &[("data", data)])
            .map_err(|e| Error::Config(format!("invalid endpoint {endpoint}: {e}")))
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            kind: record.kind,
            payload: record.content,
        }
    }
}
