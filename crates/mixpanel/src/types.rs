//! Wire payload types and serialization.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// Property bag attached to events and profile updates.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Profile update verbs understood by the engage endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileAction {
    /// Overwrite properties on the profile.
    Set,
    /// Set properties only where the profile has none yet.
    SetOnce,
    /// Add a numeric amount to properties.
    Add,
    /// Delete the profile.
    Delete,
    /// Any other engage verb, e.g. `$append` or `$union`.
    Custom(String),
}

impl ProfileAction {
    pub fn as_str(&self) -> &str {
        match self {
            ProfileAction::Set => "$set",
            ProfileAction::SetOnce => "$set_once",
            ProfileAction::Add => "$add",
            ProfileAction::Delete => "$delete",
            ProfileAction::Custom(action) => action,
        }
    }
}

impl fmt::Display for ProfileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ProfileAction {
    fn from(action: &str) -> Self {
        match action {
            "$set" => ProfileAction::Set,
            "$set_once" => ProfileAction::SetOnce,
            "$add" => ProfileAction::Add,
            "$delete" => ProfileAction::Delete,
            other => ProfileAction::Custom(other.to_string()),
        }
    }
}

impl From<String> for ProfileAction {
    fn from(action: String) -> Self {
        ProfileAction::from(action.as_str())
    }
}

/// Payload sent to the track endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EventPayload<'a> {
    pub event: &'a str,
    pub properties: &'a Properties,
}

/// Payload sent to the engage endpoint.
///
/// The action verb is the key wrapping the properties, so the map is written
/// by hand rather than derived.
#[derive(Debug, Clone)]
pub struct ProfilePayload<'a> {
    pub action: &'a ProfileAction,
    pub properties: &'a Properties,
    pub token: &'a str,
    pub distinct_id: &'a str,
    /// Milliseconds since the Unix epoch.
    pub time: i64,
}

impl Serialize for ProfilePayload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry(self.action.as_str(), self.properties)?;
        map.serialize_entry("$token", self.token)?;
        map.serialize_entry("$distinct_id", self.distinct_id)?;
        map.serialize_entry("$time", &self.time)?;
        map.end()
    }
}
