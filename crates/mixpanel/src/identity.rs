//! Account token, distinct ids and super properties.

use crate::device::DeviceInfo;
use crate::store::{
    SettingsStore, DEVICE_ID_KEY, PEOPLE_DISTINCT_ID_KEY, SUPER_PROPERTIES_KEY,
};
use crate::types::Properties;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identity state read by the message builders.
///
/// Super properties and the people distinct id are written through to the
/// settings store on every change. None of the operations fail: storage
/// errors are logged and the in-memory state stays authoritative.
#[derive(Debug)]
pub struct Identity {
    store: Arc<dyn SettingsStore>,
    token: String,
    event_distinct_id: String,
    people_distinct_id: String,
    referrer_properties: Properties,
    referrer_collected: bool,
    super_properties: Properties,
}

impl Identity {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            token: String::new(),
            event_distinct_id: String::new(),
            people_distinct_id: String::new(),
            referrer_properties: Properties::new(),
            referrer_collected: false,
            super_properties: Properties::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn event_distinct_id(&self) -> &str {
        &self.event_distinct_id
    }

    pub fn people_distinct_id(&self) -> &str {
        &self.people_distinct_id
    }

    pub fn referrer_properties(&self) -> &Properties {
        &self.referrer_properties
    }

    pub fn super_properties(&self) -> &Properties {
        &self.super_properties
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
    }

    pub fn set_event_distinct_id(&mut self, distinct_id: impl Into<String>) {
        self.event_distinct_id = distinct_id.into();
    }

    /// Set the profile distinct id and persist it immediately. An empty id
    /// keeps the current one.
    pub fn set_people_distinct_id(&mut self, distinct_id: impl Into<String>) {
        let distinct_id = distinct_id.into();
        if !distinct_id.is_empty() {
            self.people_distinct_id = distinct_id;
        }

        self.persist(
            PEOPLE_DISTINCT_ID_KEY,
            Value::String(self.people_distinct_id.clone()),
        );
    }

    /// Register super properties, overwriting existing keys.
    pub fn register_super_properties(&mut self, properties: Properties) {
        for (key, value) in properties {
            self.super_properties.insert(key, value);
        }
        self.save_super_properties();
    }

    /// Register super properties whose keys are not registered yet.
    pub fn register_super_properties_once(&mut self, properties: Properties) {
        for (key, value) in properties {
            self.super_properties.entry(key).or_insert(value);
        }
        self.save_super_properties();
    }

    /// Remove a single super property.
    pub fn unregister_super_property(&mut self, name: &str) {
        if self.super_properties.remove(name).is_some() {
            self.save_super_properties();
        }
    }

    /// Remove every super property, in memory and in the settings store.
    pub fn clear_super_properties(&mut self) {
        self.super_properties.clear();
        if let Err(e) = self.store.remove(SUPER_PROPERTIES_KEY) {
            warn!(error = %e, "failed to clear persisted super properties");
        }
    }

    /// Load super properties and the people distinct id saved by a previous
    /// run. Missing or malformed values leave the defaults in place.
    pub fn load_persistent_data(&mut self) {
        self.super_properties = match self.store.get(SUPER_PROPERTIES_KEY) {
            Some(Value::Object(properties)) => properties,
            Some(_) => {
                warn!("ignoring malformed persisted super properties");
                Properties::new()
            }
            None => Properties::new(),
        };

        if let Some(Value::String(distinct_id)) = self.store.get(PEOPLE_DISTINCT_ID_KEY) {
            self.people_distinct_id = distinct_id;
        }

        debug!(
            super_properties = self.super_properties.len(),
            has_people_distinct_id = !self.people_distinct_id.is_empty(),
            "loaded persistent identity"
        );
    }

    /// Collect the device metadata merged into outgoing messages.
    ///
    /// Only the first call has an effect. Distinct ids still unset afterwards
    /// default to the device identifier.
    pub fn collect_referrer_properties(&mut self, device: &DeviceInfo) {
        if self.referrer_collected {
            return;
        }

        let device_id = self.resolve_device_id(device);
        self.referrer_properties = device.referrer_properties(&device_id);
        self.referrer_collected = true;

        if self.event_distinct_id.is_empty() {
            self.set_event_distinct_id(device_id.clone());
        }
        if self.people_distinct_id.is_empty() {
            self.set_people_distinct_id(device_id);
        }
    }

    fn resolve_device_id(&self, device: &DeviceInfo) -> String {
        if let Some(id) = device.device_id.as_ref().filter(|id| !id.is_empty()) {
            return id.clone();
        }

        if let Some(Value::String(id)) = self.store.get(DEVICE_ID_KEY) {
            if !id.is_empty() {
                return id;
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        debug!(device_id = %id, "generated device identifier");
        self.persist(DEVICE_ID_KEY, Value::String(id.clone()));
        id
    }

    fn save_super_properties(&self) {
        self.persist(
            SUPER_PROPERTIES_KEY,
            Value::Object(self.super_properties.clone()),
        );
    }

    fn persist(&self, key: &str, value: Value) {
        if let Err(e) = self.store.set(key, value) {
            warn!(key, error = %e, "failed to persist identity value");
        }
    }
}
