//! Contract consumed from the external WhatsApp protocol library.
//!
//! The gateway never touches the wire itself. It requires a client that can
//! pair a device over a QR channel, reattach with a stored device binding,
//! emit lifecycle events, and send text plus the five media categories.
//! Implementations wrap the real library; tests use the scripted mock.

#[cfg(test)]
pub(crate) mod mock;
pub mod stub;

use crate::error::ProtocolError;
use crate::media::ProcessedMedia;
use crate::types::MessageKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::Digest;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events on the pairing channel while a QR scan is awaited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QrEvent {
    /// A fresh QR code string to render. Codes rotate until scanned.
    Code(String),
    /// The channel expired without a scan.
    Timeout,
    /// Scanned; a `PairSuccess` event follows on the event stream.
    Success,
}

/// Lifecycle and traffic events emitted by a live client.
#[derive(Clone, Debug)]
pub enum ProtocolEvent {
    /// Connected and authenticated.
    Connected,
    /// Pairing completed; the binding must be persisted before the session
    /// is observable as connected.
    PairSuccess { device_binding: String },
    /// Credential revoked from the primary device.
    LoggedOut { reason: String },
    /// Another client connected with the same keys.
    StreamReplaced,
    /// Transient disconnect.
    Disconnected { reason: String },
    /// Decrypted inbound message.
    Message(InboundMessage),
    /// Delivery/read receipt for a previously sent message.
    Receipt(ReceiptUpdate),
}

#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub wire_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub caption: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct ReceiptUpdate {
    pub wire_id: String,
    pub chat_id: String,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement returned by a send.
#[derive(Clone, Debug)]
pub struct WireReceipt {
    pub wire_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Registered event callback. The gateway bridges these into a bounded
/// per-session channel; callbacks must not block.
pub type EventHandler = Box<dyn Fn(ProtocolEvent) + Send + Sync>;

/// Identifier for a registered handler, allowing detachment.
pub type SubscriptionId = u64;

/// One live connection to the WhatsApp network.
///
/// Only the send methods are assumed thread-safe; the owning worker
/// serializes everything else.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open the pairing channel. Called before [`connect`](Self::connect)
    /// when the device has never paired.
    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>, ProtocolError>;

    /// Start the login flow. On an unpaired device this drives the QR
    /// channel; events report the outcome.
    async fn connect(&self) -> Result<(), ProtocolError>;

    /// Reconnect reusing a stored device binding, without QR.
    async fn reattach(&self, device_binding: &str) -> Result<(), ProtocolError>;

    async fn disconnect(&self) -> Result<(), ProtocolError>;

    /// Register an event callback; returns an id for detachment.
    async fn add_event_handler(&self, handler: EventHandler) -> SubscriptionId;

    async fn remove_event_handler(&self, id: SubscriptionId);

    async fn send_text(
        &self,
        to: &str,
        body: &str,
        reply_to: Option<&str>,
    ) -> Result<WireReceipt, ProtocolError>;

    async fn send_media(
        &self,
        to: &str,
        media: &ProcessedMedia,
        caption: Option<&str>,
        reply_to: Option<&str>,
    ) -> Result<WireReceipt, ProtocolError>;

    /// Generate a wire message id (3EB0 + hex digest prefix).
    fn generate_wire_id(&self) -> String {
        generate_wire_id()
    }
}

/// Factory establishing a client for one session.
#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    async fn establish(
        &self,
        session_id: Uuid,
        device_binding: Option<&str>,
        proxy_url: Option<&str>,
    ) -> Result<Arc<dyn ProtocolClient>, ProtocolError>;
}

/// Alias for the shared connector (common usage).
pub type Connector = Arc<dyn ProtocolConnector>;

/// Wire message id: `3EB0` + 18 hex chars of a salted time hash.
pub fn generate_wire_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let mut data = Vec::with_capacity(8 + 5 + 16);
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    data.extend_from_slice(&t.to_be_bytes());
    data.extend_from_slice(b"@c.us");
    data.extend_from_slice(&rand::random::<[u8; 16]>());
    let hash = sha2::Sha256::digest(&data);
    format!("3EB0{}", hex::encode(&hash[..9]).to_uppercase())
}
