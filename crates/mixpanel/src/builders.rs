//! Event and profile message builders.

use crate::error::BuildError;
use crate::identity::Identity;
use crate::message::Message;
use crate::types::{EventPayload, ProfileAction, ProfilePayload, Properties};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Format a date the way the analytics service expects date properties.
pub fn format_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Build the serialized payload for an event.
///
/// Properties merge with later sources overwriting earlier ones: caller
/// properties, referrer properties, super properties, then `token`,
/// `distinct_id` (when set) and `time` in seconds.
pub fn build_event_message(
    name: &str,
    properties: Properties,
    identity: &Identity,
) -> Result<Vec<u8>, BuildError> {
    build_event_message_at(name, properties, identity, Utc::now())
}

pub(crate) fn build_event_message_at(
    name: &str,
    properties: Properties,
    identity: &Identity,
    now: DateTime<Utc>,
) -> Result<Vec<u8>, BuildError> {
    if identity.token().is_empty() {
        return Err(BuildError::EmptyToken {
            target: name.to_string(),
            properties,
        });
    }
    if name.is_empty() {
        return Err(BuildError::EmptyName { properties });
    }

    let mut merged = properties.clone();
    merge(&mut merged, identity.referrer_properties());
    merge(&mut merged, identity.super_properties());
    merged.insert("token".into(), Value::from(identity.token()));
    if !identity.event_distinct_id().is_empty() {
        merged.insert(
            "distinct_id".into(),
            Value::from(identity.event_distinct_id()),
        );
    }
    merged.insert("time".into(), Value::from(now.timestamp()));

    let payload = EventPayload {
        event: name,
        properties: &merged,
    };
    serde_json::to_vec(&payload).map_err(|source| BuildError::Encoding {
        target: name.to_string(),
        properties,
        source,
    })
}

/// Build the serialized payload for a profile update.
///
/// The properties are wrapped under the action verb. `$set` also carries the
/// referrer properties.
pub fn build_profile_message(
    action: &ProfileAction,
    properties: Properties,
    identity: &Identity,
) -> Result<Vec<u8>, BuildError> {
    build_profile_message_at(action, properties, identity, Utc::now())
}

pub(crate) fn build_profile_message_at(
    action: &ProfileAction,
    properties: Properties,
    identity: &Identity,
    now: DateTime<Utc>,
) -> Result<Vec<u8>, BuildError> {
    if identity.token().is_empty() {
        return Err(BuildError::EmptyToken {
            target: action.to_string(),
            properties,
        });
    }
    if action.as_str().is_empty() {
        return Err(BuildError::EmptyAction { properties });
    }
    if *action == ProfileAction::Add && properties.keys().any(String::is_empty) {
        return Err(BuildError::InvalidIncrement { properties });
    }

    let mut wrapped = properties.clone();
    if *action == ProfileAction::Set {
        merge(&mut wrapped, identity.referrer_properties());
    }

    let payload = ProfilePayload {
        action,
        properties: &wrapped,
        token: identity.token(),
        distinct_id: identity.people_distinct_id(),
        time: now.timestamp_millis(),
    };
    serde_json::to_vec(&payload).map_err(|source| BuildError::Encoding {
        target: action.to_string(),
        properties,
        source,
    })
}

fn merge(into: &mut Properties, from: &Properties) {
    for (key, value) in from {
        into.insert(key.clone(), value.clone());
    }
}

// ============================================
// TRACK BUILDER
// ============================================

/// Builder for event messages.
#[derive(Debug)]
pub struct TrackBuilder {
    event_name: String,
    properties: Properties,
}

impl TrackBuilder {
    pub(crate) fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            properties: Properties::new(),
        }
    }

    /// Add a property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add several properties at once.
    pub fn properties(mut self, properties: Properties) -> Self {
        merge(&mut self.properties, &properties);
        self
    }

    /// Build the event message.
    pub(crate) fn build(self, identity: &Identity) -> Result<Message, BuildError> {
        build_event_message(&self.event_name, self.properties, identity).map(Message::event)
    }
}

// ============================================
// PROFILE BUILDER
// ============================================

/// Builder for profile update messages.
#[derive(Debug)]
pub struct ProfileBuilder {
    action: ProfileAction,
    properties: Properties,
}

impl ProfileBuilder {
    pub(crate) fn new(action: impl Into<ProfileAction>, properties: Properties) -> Self {
        Self {
            action: action.into(),
            properties,
        }
    }

    /// An `$add` update adding `by` to `property`.
    pub(crate) fn increment(property: impl Into<String>, by: f64) -> Self {
        let mut properties = Properties::new();
        properties.insert(property.into(), Value::from(by));
        Self::new(ProfileAction::Add, properties)
    }

    /// Build the profile message.
    pub(crate) fn build(self, identity: &Identity) -> Result<Message, BuildError> {
        build_profile_message(&self.action, self.properties, identity).map(Message::profile)
    }
}
