//! Mixpanel client implementation.

use crate::builders::{ProfileBuilder, TrackBuilder};
use crate::config::{Config, MixpanelBuilder};
use crate::device::DeviceInfo;
use crate::dispatcher::{self, QueueHandle};
use crate::error::BuildError;
use crate::identity::Identity;
use crate::message::Message;
use crate::queue::Delivery;
use crate::store::{lock, FileStore, MemoryStore, SettingsStore, DEFAULT_ORGANIZATION};
use crate::transport::{HttpTransport, Transport};
use crate::types::{ProfileAction, Properties};
use crate::Error;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

/// Mixpanel analytics client.
///
/// Messages are built against the client's identity when they are sent and
/// handed to a background task that delivers them one at a time. Messages
/// still pending at shutdown are saved to the settings store and delivered
/// by the next client opened on the same store.
///
/// # Example
///
/// ```rust,no_run
/// use mixpanel::{FlushMechanism, Mixpanel};
///
/// #[tokio::main]
/// async fn main() -> Result<(), mixpanel::Error> {
///     let client = Mixpanel::builder("YOUR_TOKEN")
///         .flush_mechanism(FlushMechanism::Manual)
///         .build()?;
///
///     client.identify("13793")?;
///     client.track("Level Complete")
///         .property("Level Number", 9)
///         .send()?;
///     client.set_property("Plan", "Premium")?;
///
///     client.flush()?;
///     client.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct Mixpanel {
    config: Mutex<Config>,
    identity: Mutex<Identity>,
    queue: QueueHandle,
    deliveries: Mutex<Option<mpsc::Receiver<Delivery>>>,
    is_shutdown: AtomicBool,
}

impl Mixpanel {
    /// Create a new builder with the given project token.
    pub fn builder(token: impl Into<String>) -> MixpanelBuilder {
        MixpanelBuilder::new(token)
    }

    /// Create a new client from a builder. Must be called within a tokio
    /// runtime.
    pub(crate) fn from_builder(builder: MixpanelBuilder) -> Result<Self, Error> {
        let config = builder.build_config()?;
        let store = builder.store.unwrap_or_else(default_store);
        let transport: Arc<dyn Transport> = match builder.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config)?),
        };
        let device = builder.device.unwrap_or_else(DeviceInfo::current);

        let mut identity = Identity::new(store.clone());
        identity.load_persistent_data();
        identity.set_token(config.token());
        identity.collect_referrer_properties(&device);

        let (queue, deliveries) = dispatcher::spawn(config.clone(), transport, store);

        Ok(Self {
            config: Mutex::new(config),
            identity: Mutex::new(identity),
            queue,
            deliveries: Mutex::new(Some(deliveries)),
            is_shutdown: AtomicBool::new(false),
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> Config {
        lock(&self.config).clone()
    }

    /// Replace the flush configuration of the running client.
    ///
    /// Only the flush mechanism, interval, thumbnail flush and threshold are
    /// taken from `config`. The token, API host and timeout stay as built.
    /// The timer restarts with the new interval and the thresholds are
    /// re-evaluated immediately.
    pub fn set_configuration(&self, config: Config) -> Result<(), Error> {
        self.ensure_not_shutdown()?;
        let mut current = lock(&self.config);
        let updated = current.with_flush_settings(&config);
        self.queue.reconfigure(updated.clone())?;
        *current = updated;
        Ok(())
    }

    /// Take the delivery notification receiver.
    ///
    /// Returns `None` after the first call. Notifications are dropped while
    /// nobody holds the receiver or when it falls behind.
    pub fn deliveries(&self) -> Option<mpsc::Receiver<Delivery>> {
        lock(&self.deliveries).take()
    }

    /// Get the number of messages waiting for delivery.
    pub async fn pending_message_count(&self) -> Result<usize, Error> {
        self.queue.pending_count().await
    }

    // ============================================
    // IDENTITY
    // ============================================

    /// Replace the project token used for new messages.
    pub fn set_token(&self, token: impl Into<String>) {
        lock(&self.identity).set_token(token);
    }

    /// Set the distinct id attached to events.
    pub fn set_event_distinct_id(&self, distinct_id: impl Into<String>) {
        lock(&self.identity).set_event_distinct_id(distinct_id);
    }

    /// Get the distinct id attached to events.
    pub fn event_distinct_id(&self) -> String {
        lock(&self.identity).event_distinct_id().to_string()
    }

    /// Get the distinct id attached to profile updates.
    pub fn people_distinct_id(&self) -> String {
        lock(&self.identity).people_distinct_id().to_string()
    }

    /// Identify the profile to update and register it with an empty `$set`.
    pub fn identify(&self, distinct_id: impl Into<String>) -> Result<(), Error> {
        self.ensure_not_shutdown()?;
        lock(&self.identity).set_people_distinct_id(distinct_id);
        self.enqueue(ProfileBuilder::new(ProfileAction::Set, Properties::new()))
    }

    // ============================================
    // TRACK
    // ============================================

    /// Track an event.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use mixpanel::Mixpanel;
    /// # fn example(client: &Mixpanel) -> Result<(), mixpanel::Error> {
    /// client.track("Level Complete")
    ///     .property("Level Number", 9)
    ///     .send()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn track(&self, event_name: impl Into<String>) -> SendableTrack<'_> {
        SendableTrack {
            builder: TrackBuilder::new(event_name),
            client: self,
        }
    }

    // ============================================
    // PEOPLE
    // ============================================

    /// Set profile properties, overwriting existing values.
    pub fn set(&self, properties: Properties) -> Result<(), Error> {
        self.enqueue(ProfileBuilder::new(ProfileAction::Set, properties))
    }

    /// Set a single profile property.
    pub fn set_property(&self, name: impl Into<String>, value: impl Into<Value>) -> Result<(), Error> {
        self.set(single(name, value))
    }

    /// Set profile properties that are not set yet.
    pub fn set_once(&self, properties: Properties) -> Result<(), Error> {
        self.enqueue(ProfileBuilder::new(ProfileAction::SetOnce, properties))
    }

    /// Set a single profile property if it is not set yet.
    pub fn set_once_property(
        &self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), Error> {
        self.set_once(single(name, value))
    }

    /// Add `by` to a numeric profile property.
    pub fn increment(&self, name: impl Into<String>, by: f64) -> Result<(), Error> {
        self.enqueue(ProfileBuilder::increment(name, by))
    }

    /// Delete the current profile.
    pub fn delete_user(&self) -> Result<(), Error> {
        self.enqueue(ProfileBuilder::new(ProfileAction::Delete, Properties::new()))
    }

    /// Send a profile update with an arbitrary action verb.
    pub fn custom_action(
        &self,
        action: impl Into<ProfileAction>,
        properties: Properties,
    ) -> Result<(), Error> {
        self.enqueue(ProfileBuilder::new(action, properties))
    }

    // ============================================
    // SUPER PROPERTIES
    // ============================================

    /// Register properties sent with every event, overwriting existing keys.
    pub fn register_super_properties(&self, properties: Properties) {
        lock(&self.identity).register_super_properties(properties);
    }

    /// Register properties sent with every event, keeping existing keys.
    pub fn register_super_properties_once(&self, properties: Properties) {
        lock(&self.identity).register_super_properties_once(properties);
    }

    /// Stop sending a super property.
    pub fn unregister_super_property(&self, name: &str) {
        lock(&self.identity).unregister_super_property(name);
    }

    /// Remove every super property.
    pub fn clear_super_properties(&self) {
        lock(&self.identity).clear_super_properties();
    }

    /// Get the registered super properties.
    pub fn super_properties(&self) -> Properties {
        lock(&self.identity).super_properties().clone()
    }

    // ============================================
    // LIFECYCLE
    // ============================================

    /// Start delivering pending messages now, whatever the flush mechanism.
    ///
    /// Returns once the request is scheduled. Outcomes are reported through
    /// [`deliveries`](Self::deliveries).
    #[instrument(skip(self))]
    pub fn flush(&self) -> Result<(), Error> {
        self.ensure_not_shutdown()?;
        self.queue.flush()
    }

    /// Report that the application moved to the background.
    ///
    /// Flushes when the client uses automatic flushing with thumbnail flush
    /// enabled.
    pub fn app_backgrounded(&self) -> Result<(), Error> {
        self.ensure_not_shutdown()?;
        self.queue.app_backgrounded()
    }

    /// Shutdown the client.
    ///
    /// Stops the flush timer and saves every undelivered message to the
    /// settings store. Nothing is sent; the next client on the same store
    /// picks the messages up.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), Error> {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("shutting down client");
        self.queue.shutdown().await
    }

    // ============================================
    // INTERNAL
    // ============================================

    fn ensure_not_shutdown(&self) -> Result<(), Error> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    fn enqueue(&self, builder: impl BuildMessage) -> Result<(), Error> {
        self.ensure_not_shutdown()?;

        let message = builder.build(&lock(&self.identity));
        let message = message.map_err(|e| {
            warn!(subject = e.target(), error = %e, "message not recorded");
            e
        })?;
        self.queue.enqueue(message)
    }
}

impl MixpanelBuilder {
    /// Build the Mixpanel client. Must be called within a tokio runtime.
    pub fn build(self) -> Result<Mixpanel, Error> {
        Mixpanel::from_builder(self)
    }
}

fn default_store() -> Arc<dyn SettingsStore> {
    match FileStore::for_organization(DEFAULT_ORGANIZATION) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "settings directory unavailable, pending messages will not be saved");
            Arc::new(MemoryStore::new())
        }
    }
}

fn single(name: impl Into<String>, value: impl Into<Value>) -> Properties {
    let mut properties = Properties::new();
    properties.insert(name.into(), value.into());
    properties
}

// ============================================
// SENDABLE WRAPPERS
// ============================================

trait BuildMessage {
    fn build(self, identity: &Identity) -> Result<Message, BuildError>;
}

impl BuildMessage for TrackBuilder {
    fn build(self, identity: &Identity) -> Result<Message, BuildError> {
        self.build(identity)
    }
}

impl BuildMessage for ProfileBuilder {
    fn build(self, identity: &Identity) -> Result<Message, BuildError> {
        self.build(identity)
    }
}

/// Sendable track event builder.
pub struct SendableTrack<'a> {
    builder: TrackBuilder,
    client: &'a Mixpanel,
}

impl<'a> SendableTrack<'a> {
    /// Add a property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.builder = self.builder.property(key, value);
        self
    }

    /// Add several properties at once.
    pub fn properties(mut self, properties: Properties) -> Self {
        self.builder = self.builder.properties(properties);
        self
    }

    /// Queue the event.
    pub fn send(self) -> Result<(), Error> {
        self.client.enqueue(self.builder)
    }
}
