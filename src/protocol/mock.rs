//! Scripted protocol client for tests. Tests drive the QR channel and the
//! event stream by hand; sends are recorded instead of hitting the network.

use super::{
    EventHandler, ProtocolClient, ProtocolConnector, ProtocolEvent, QrEvent, SubscriptionId,
    WireReceipt,
};
use crate::error::ProtocolError;
use crate::media::ProcessedMedia;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Record of one outbound send.
#[derive(Clone, Debug)]
pub(crate) struct SentMessage {
    pub to: String,
    pub body: Option<String>,
    pub mime_type: Option<String>,
}

pub(crate) struct MockClient {
    pub session_id: Uuid,
    qr_tx: StdMutex<Option<mpsc::Sender<QrEvent>>>,
    handlers: RwLock<HashMap<SubscriptionId, EventHandler>>,
    next_sub: AtomicU64,
    pub fail_connect: AtomicBool,
    pub fail_reattach: AtomicBool,
    pub fail_send: AtomicBool,
    pub sent: StdMutex<Vec<SentMessage>>,
    pub disconnected: AtomicBool,
}

impl MockClient {
    pub fn new(session_id: Uuid) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            qr_tx: StdMutex::new(None),
            handlers: RwLock::new(HashMap::new()),
            next_sub: AtomicU64::new(1),
            fail_connect: AtomicBool::new(false),
            fail_reattach: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            sent: StdMutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        })
    }

    /// Dispatch an event to every registered handler.
    pub async fn emit(&self, event: ProtocolEvent) {
        let handlers = self.handlers.read().await;
        for handler in handlers.values() {
            handler(event.clone());
        }
    }

    /// Push a QR event; false if no channel is open.
    pub async fn push_qr(&self, event: QrEvent) -> bool {
        let tx = self.qr_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Wait until the worker has opened the QR channel.
    pub async fn wait_qr_open(&self) {
        for _ in 0..200 {
            if self.qr_tx.lock().unwrap().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("qr channel never opened");
    }

    /// Wait until at least one event handler is registered.
    pub async fn wait_subscribed(&self) {
        for _ in 0..200 {
            if !self.handlers.read().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no event handler registered");
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>, ProtocolError> {
        let (tx, rx) = mpsc::channel(8);
        *self.qr_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ProtocolError::Transport("connect refused".into()));
        }
        Ok(())
    }

    async fn reattach(&self, _device_binding: &str) -> Result<(), ProtocolError> {
        if self.fail_reattach.load(Ordering::SeqCst) {
            return Err(ProtocolError::LoggedOut);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        self.disconnected.store(true, Ordering::SeqCst);
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
        to: &str,
        body: &str,
        _reply_to: Option<&str>,
    ) -> Result<WireReceipt, ProtocolError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ProtocolError::Rejected("send refused".into()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            body: Some(body.to_string()),
            mime_type: None,
        });
        Ok(WireReceipt {
            wire_id: super::generate_wire_id(),
            timestamp: Utc::now(),
        })
    }

    async fn send_media(
        &self,
        to: &str,
        media: &ProcessedMedia,
        _caption: Option<&str>,
        _reply_to: Option<&str>,
    ) -> Result<WireReceipt, ProtocolError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ProtocolError::Rejected("send refused".into()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            body: None,
            mime_type: Some(media.mime_type.clone()),
        });
        Ok(WireReceipt {
            wire_id: super::generate_wire_id(),
            timestamp: Utc::now(),
        })
    }
}

/// Connector handing out one [`MockClient`] per session, retrievable by the
/// test to drive events.
pub(crate) struct MockConnector {
    clients: StdMutex<HashMap<Uuid, Arc<MockClient>>>,
    pub fail_establish: AtomicBool,
    pub fail_reattach: AtomicBool,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: StdMutex::new(HashMap::new()),
            fail_establish: AtomicBool::new(false),
            fail_reattach: AtomicBool::new(false),
        })
    }

    pub fn client(&self, session_id: Uuid) -> Option<Arc<MockClient>> {
        self.clients.lock().unwrap().get(&session_id).cloned()
    }

    /// Wait for `establish` to have been called for the session.
    pub async fn wait_client(&self, session_id: Uuid) -> Arc<MockClient> {
        for _ in 0..200 {
            if let Some(c) = self.client(session_id) {
                return c;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("client never established for {session_id}");
    }
}

#[async_trait]
impl ProtocolConnector for MockConnector {
    async fn establish(
        &self,
        session_id: Uuid,
        _device_binding: Option<&str>,
        _proxy_url: Option<&str>,
    ) -> Result<Arc<dyn ProtocolClient>, ProtocolError> {
        if self.fail_establish.load(Ordering::SeqCst) {
            return Err(ProtocolError::Transport("establish refused".into()));
        }
        let client = MockClient::new(session_id);
        client
            .fail_reattach
            .store(self.fail_reattach.load(Ordering::SeqCst), Ordering::SeqCst);
        self.clients
            .lock()
            .unwrap()
            .insert(session_id, Arc::clone(&client));
        Ok(client)
    }
}
