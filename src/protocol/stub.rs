//! Stand-in protocol client for runs without a wire library linked.
//!
//! Pairing emits a placeholder QR code and times out unscanned; reattach
//! and sends succeed locally. Swap in a real [`ProtocolConnector`]
//! implementation to talk to the WhatsApp network.

use super::{
    EventHandler, ProtocolClient, ProtocolConnector, QrEvent, SubscriptionId, WireReceipt,
};
use crate::error::ProtocolError;
use crate::media::ProcessedMedia;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// How long the placeholder QR stays pending before expiring.
const QR_LIFETIME: Duration = Duration::from_secs(60);

pub struct StubClient {
    handlers: RwLock<HashMap<SubscriptionId, EventHandler>>,
    next_sub: AtomicU64,
}

impl StubClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            next_sub: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl ProtocolClient for StubClient {
    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>, ProtocolError> {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            if tx.send(QrEvent::Code("STUB_QR_CODE".into())).await.is_err() {
                return;
            }
            tokio::time::sleep(QR_LIFETIME).await;
            let _ = tx.send(QrEvent::Timeout).await;
        });
        Ok(rx)
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn reattach(&self, _device_binding: &str) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn add_event_handler(&self, handler: EventHandler) -> SubscriptionId {
        let id = self.next_sub.fetch_add(1, Ordering::SeqCst);
        self.handlers.write().await.insert(id, handler);
        id
    }

    async fn remove_event_handler(&self, id: SubscriptionId) {
        self.handlers.write().await.remove(&id);
    }

    async fn send_text(
        &self,
        _to: &str,
        _body: &str,
        _reply_to: Option<&str>,
    ) -> Result<WireReceipt, ProtocolError> {
        Ok(WireReceipt {
            wire_id: super::generate_wire_id(),
            timestamp: Utc::now(),
        })
    }

    async fn send_media(
        &self,
        _to: &str,
        _media: &ProcessedMedia,
        _caption: Option<&str>,
        _reply_to: Option<&str>,
    ) -> Result<WireReceipt, ProtocolError> {
        Ok(WireReceipt {
            wire_id: super::generate_wire_id(),
            timestamp: Utc::now(),
        })
    }
}

/// Connector handing out [`StubClient`]s.
#[derive(Default)]
pub struct StubConnector;

impl StubConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl ProtocolConnector for StubConnector {
    async fn establish(
        &self,
        _session_id: Uuid,
        _device_binding: Option<&str>,
        _proxy_url: Option<&str>,
    ) -> Result<Arc<dyn ProtocolClient>, ProtocolError> {
        Ok(StubClient::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_pairs_nothing_but_emits_a_code() {
        let client = StubClient::new();
        let mut rx = client.qr_channel().await.unwrap();
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, QrEvent::Code(code) if code == "STUB_QR_CODE"));
    }

    #[tokio::test]
    async fn stub_send_returns_wire_receipt() {
        let client = StubClient::new();
        let receipt = client.send_text("x", "hello", None).await.unwrap();
        assert!(receipt.wire_id.starts_with("3EB0"));
    }
}
