//! Client configuration.

use crate::device::DeviceInfo;
use crate::store::SettingsStore;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;

/// Default API host.
pub const DEFAULT_API_HOST: &str = "https://api.mixpanel.com";

/// Default flush interval (30 minutes).
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Hard bound on the queue length. Reaching it forces a flush attempt in
/// every flush mode.
pub const MAX_QUEUE_SIZE: usize = 20;

/// Default number of queued messages that triggers an automatic flush.
pub const DEFAULT_MESSAGES_TO_FLUSH: usize = MAX_QUEUE_SIZE;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the queue decides to flush on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMechanism {
    /// Flush on a timer, on the message threshold and (optionally) when the
    /// application is backgrounded.
    #[default]
    Automatic,
    /// Flush only on explicit calls, or when the hard bound is reached.
    Manual,
}

/// Mixpanel client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) token: String,
    pub(crate) api_host: String,
    pub(crate) flush_mechanism: FlushMechanism,
    pub(crate) flush_interval: Duration,
    pub(crate) thumbnail_flush: bool,
    pub(crate) messages_to_flush: usize,
    pub(crate) timeout: Duration,
}

impl Config {
    /// Get the account token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Get the API host.
    pub fn api_host(&self) -> &str {
        &self.api_host
    }

    /// Get the flush mechanism.
    pub fn flush_mechanism(&self) -> FlushMechanism {
        self.flush_mechanism
    }

    /// Get the flush interval.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Whether backgrounding the application triggers a flush.
    pub fn thumbnail_flush(&self) -> bool {
        self.thumbnail_flush
    }

    /// Get the queue length that triggers an automatic flush.
    pub fn messages_to_flush(&self) -> usize {
        self.messages_to_flush
    }

    /// Get the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// This configuration with the flush settings taken from `other`.
    pub(crate) fn with_flush_settings(&self, other: &Config) -> Config {
        Config {
            flush_mechanism: other.flush_mechanism,
            flush_interval: other.flush_interval,
            thumbnail_flush: other.thumbnail_flush,
            messages_to_flush: other.messages_to_flush,
            ..self.clone()
        }
    }

    /// Endpoint receiving event messages.
    pub fn track_endpoint(&self) -> String {
        format!("{}/track/", self.api_host.trim_end_matches('/'))
    }

    /// Endpoint receiving profile updates.
    pub fn engage_endpoint(&self) -> String {
        format!("{}/engage/", self.api_host.trim_end_matches('/'))
    }
}

/// Builder for the Mixpanel client.
#[derive(Debug)]
pub struct MixpanelBuilder {
    token: String,
    api_host: Option<String>,
    flush_mechanism: Option<FlushMechanism>,
    flush_interval: Option<Duration>,
    thumbnail_flush: Option<bool>,
    messages_to_flush: Option<usize>,
    timeout: Option<Duration>,
    pub(crate) store: Option<Arc<dyn SettingsStore>>,
    pub(crate) device: Option<DeviceInfo>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
}

impl MixpanelBuilder {
    /// Create a new builder with the given account token.
    ///
    /// An empty token is accepted here; every message built while the token
    /// is empty is rejected with [`BuildError::EmptyToken`](crate::BuildError).
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_host: None,
            flush_mechanism: None,
            flush_interval: None,
            thumbnail_flush: None,
            messages_to_flush: None,
            timeout: None,
            store: None,
            device: None,
            transport: None,
        }
    }

    /// Set the API host.
    pub fn api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = Some(host.into());
        self
    }

    /// Set the flush mechanism.
    pub fn flush_mechanism(mut self, mechanism: FlushMechanism) -> Self {
        self.flush_mechanism = Some(mechanism);
        self
    }

    /// Set the flush interval used in automatic mode.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Flush when the application is backgrounded (automatic mode only).
    pub fn thumbnail_flush(mut self, enabled: bool) -> Self {
        self.thumbnail_flush = Some(enabled);
        self
    }

    /// Set the queue length that triggers an automatic flush.
    pub fn messages_to_flush(mut self, count: usize) -> Self {
        self.messages_to_flush = Some(count);
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use the given persistence substrate instead of the default file store.
    pub fn store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the device metadata merged into outgoing messages.
    pub fn device(mut self, device: DeviceInfo) -> Self {
        self.device = Some(device);
        self
    }

    /// Deliver requests through a custom transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build and validate the configuration without creating a client.
    ///
    /// Use this with [`Mixpanel::set_configuration`](crate::Mixpanel::set_configuration)
    /// to change the flush behaviour of a running client.
    pub fn build_config(&self) -> Result<Config, crate::Error> {
        let api_host = self
            .api_host
            .clone()
            .unwrap_or_else(|| DEFAULT_API_HOST.into());
        match reqwest::Url::parse(&api_host) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(crate::Error::Config(format!(
                    "api_host is not an http(s) URL: {api_host}"
                )))
            }
        }

        let flush_interval = self.flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL);
        if flush_interval.is_zero() {
            return Err(crate::Error::Config(
                "flush_interval must be greater than zero".into(),
            ));
        }

        let messages_to_flush = self.messages_to_flush.unwrap_or(DEFAULT_MESSAGES_TO_FLUSH);
        if messages_to_flush == 0 {
            return Err(crate::Error::Config(
                "messages_to_flush must be greater than zero".into(),
            ));
        }

        Ok(Config {
            token: self.token.clone(),
            api_host,
            flush_mechanism: self.flush_mechanism.unwrap_or_default(),
            flush_interval,
            thumbnail_flush: self.thumbnail_flush.unwrap_or(true),
            messages_to_flush,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        })
    }
}
