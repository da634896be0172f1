//! HTTP transport for delivering messages.

use crate::config::Config;
use crate::error::TransportError;
use crate::queue::DeliveryOutcome;
use crate::Error;
use reqwest::Url;
use std::fmt::Debug;
use tracing::{debug, warn};

/// Delivers a single request to the analytics endpoint.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Issue a GET request and return the response body.
    async fn get(&self, url: &Url) -> Result<String, TransportError>;
}

/// HTTP transport for sending messages to the Mixpanel API.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<String, TransportError> {
        debug!(endpoint = %url.path(), "sending message");

        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = %status, body = %body, "API request failed");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

impl DeliveryOutcome {
    /// Classify a transport result.
    ///
    /// Transport failures and retryable statuses (408, 429, 5xx) keep the
    /// message for another attempt. Other error statuses, and a success body
    /// of `0`, mean the endpoint refused the message.
    pub fn classify(result: &Result<String, TransportError>) -> Self {
        match result {
            Ok(body) => match body.trim().parse::<i64>() {
                Ok(0) => DeliveryOutcome::RemoteRejected,
                _ => DeliveryOutcome::Accepted,
            },
            Err(TransportError::Network(_)) => DeliveryOutcome::NetworkError,
            Err(TransportError::Status { status, .. }) => {
                if matches!(*status, 408 | 429 | 500..=599) {
                    DeliveryOutcome::NetworkError
                } else {
                    DeliveryOutcome::RemoteRejected
                }
            }
        }
    }
}
