//! Mixpanel event and profile tracking for Rust.
//!
//! Events and profile updates are queued in memory and delivered one
//! request at a time, oldest first. Delivery starts when the queue reaches
//! its threshold, on the flush timer, when the application is backgrounded
//! or on an explicit [`Mixpanel::flush`]. Messages still queued at shutdown
//! are saved and delivered by the next run.
//!
//! # Example
//!
//! ```rust,ignore
//! use mixpanel::Mixpanel;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mixpanel::Error> {
//!     let client = Mixpanel::builder("YOUR_TOKEN")
//!         .flush_interval(Duration::from_secs(60))
//!         .build()?;
//!
//!     let mut deliveries = client.deliveries().expect("taken once");
//!     tokio::spawn(async move {
//!         while let Some(delivery) = deliveries.recv().await {
//!             println!("{:?}", delivery.outcome);
//!         }
//!     });
//!
//!     client.track("signup")
//!         .property("plan", "pro")
//!         .send()?;
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod builders;
mod client;
mod config;
mod device;
mod dispatcher;
mod error;
mod identity;
mod message;
mod queue;
mod store;
mod transport;
mod types;

pub use builders::{build_event_message, build_profile_message, format_date, TrackBuilder};
pub use client::{Mixpanel, SendableTrack};
pub use config::{
    Config, FlushMechanism, MixpanelBuilder, DEFAULT_API_HOST, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_MESSAGES_TO_FLUSH, DEFAULT_TIMEOUT, MAX_QUEUE_SIZE,
};
pub use device::DeviceInfo;
pub use dispatcher::{spawn as spawn_dispatcher, QueueHandle, DELIVERY_CHANNEL_CAPACITY};
pub use error::{BuildError, Error, StoreError, TransportError};
pub use identity::Identity;
pub use message::{Message, MessageKind, MessageRecord};
pub use queue::{Delivery, DeliveryOutcome, DeliveryQueue, QueueState};
pub use store::{
    FileStore, MemoryStore, SettingsStore, ANALYTICS_MESSAGES_KEY, DEFAULT_ORGANIZATION,
    DEVICE_ID_KEY, PEOPLE_DISTINCT_ID_KEY, SUPER_PROPERTIES_KEY,
};
pub use transport::{HttpTransport, Transport};
pub use types::{ProfileAction, Properties};
