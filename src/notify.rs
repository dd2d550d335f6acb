//! Notification sinks for the delta report.

use thiserror::Error;
use tracing::{debug, info};

use crate::http_client;

/// Errors surfaced by a notification sink.
///
/// These are always treated as best-effort failures by callers; no sink
/// implements retries (the external scheduler owns those).
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The endpoint answered with a non-success status.
    #[error("Notification endpoint rejected the message with status {status}")]
    Rejected { status: u16 },
    /// The request never completed (DNS, connect, timeout, TLS).
    #[error("Notification request failed: {0}")]
    Transport(Box<ureq::Error>),
}

/// Outbound sink for rendered report text.
pub trait Notify {
    /// Deliver one message. Implementations must not retry.
    fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Sink that POSTs the message as a JSON payload to a webhook URL.
pub struct WebhookNotifier {
    url: String,
}

impl WebhookNotifier {
    /// Create a notifier for the given webhook endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Notify for WebhookNotifier {
    fn send(&self, text: &str) -> Result<(), NotifyError> {
        let response = http_client::agent()
            .post(&self.url)
            .send_json(serde_json::json!({ "text": text }))
            .map_err(|err| match err {
                ureq::Error::Status(status, _) => NotifyError::Rejected { status },
                other => NotifyError::Transport(Box::new(other)),
            })?;
        debug!(status = response.status(), "Notification delivered");
        Ok(())
    }
}

/// Sink that logs the message instead of sending it (dry runs, no webhook
/// configured).
pub struct NullNotifier;

impl Notify for NullNotifier {
    fn send(&self, text: &str) -> Result<(), NotifyError> {
        info!("Notification sink disabled; message not sent:\n{text}");
        Ok(())
    }
}
