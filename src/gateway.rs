//! Request orchestration: validates, resolves, admits and dispatches every
//! operation, and owns shutdown.
//!
//! The gateway is an explicit runtime value threaded through construction;
//! there is no module-level state. Collaborators (store, connector) come in
//! as capability traits.

use crate::config::Config;
use crate::error::{
    ConflictError, Error, ProtocolError, Result, UpstreamError, ValidationError,
};
use crate::media::{MediaPipeline, MediaRequest, ProcessedMedia, DEFAULT_FETCH_TIMEOUT};
use crate::protocol::Connector;
use crate::registry::{ClientHandle, ClientRegistry};
use crate::resolver::{SessionResolver, DEFAULT_TTL};
use crate::session::SessionWorker;
use crate::store::Store;
use crate::types::{
    valid_session_name, MediaFile, MessageDirection, MessageRecord, MessageStatus, Session,
    SessionFilters, SessionStatus,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Longest accepted text message, in characters.
pub const TEXT_MAX_CHARS: usize = 4096;

/// How long `connect` waits for the first QR artefact before returning.
const QR_WAIT: Duration = Duration::from_secs(2);

/// Outcome of a connect call.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectOutcome {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_payload: Option<String>,
}

/// Outcome of a send.
#[derive(Clone, Debug, Serialize)]
pub struct SendOutcome {
    pub wire_id: String,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
}

pub struct Gateway {
    store: Store,
    registry: Arc<ClientRegistry>,
    resolver: SessionResolver,
    media: MediaPipeline,
    connector: Connector,
    root: CancellationToken,
    accepting: AtomicBool,
    shutdown_grace: Duration,
    verbose_qr: bool,
    media_store_enabled: bool,
    media_ttl: ChronoDuration,
}

impl Gateway {
    pub fn new(store: Store, connector: Connector, config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            resolver: SessionResolver::new(Arc::clone(&store), DEFAULT_TTL),
            media: MediaPipeline::new(DEFAULT_FETCH_TIMEOUT)?,
            registry: Arc::new(ClientRegistry::new()),
            root: CancellationToken::new(),
            accepting: AtomicBool::new(true),
            shutdown_grace: config.timeout.shutdown(),
            verbose_qr: config.server.is_development(),
            media_store_enabled: config.media_store.enabled,
            media_ttl: ChronoDuration::days(i64::from(config.media_store.ttl_days)),
            store,
            connector,
        })
    }

    /// Root cancellation token; child tokens gate every worker.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.root
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn admit(&self) -> Result<()> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    // ---- session lifecycle -------------------------------------------------

    pub async fn create_session(
        &self,
        name: &str,
        webhook_url: Option<String>,
    ) -> Result<Session> {
        self.admit()?;
        if !valid_session_name(name) {
            return Err(ValidationError::InvalidName.into());
        }
        let session = Session::new(name, webhook_url);
        self.store.create(&session).await?;
        info!(session_id = %session.id, name, "session created");
        Ok(session)
    }

    pub async fn list_sessions(
        &self,
        filters: &SessionFilters,
    ) -> Result<(Vec<Session>, u64)> {
        self.admit()?;
        Ok(self.store.list(filters).await?)
    }

    pub async fn get_session(&self, identifier: &str) -> Result<Session> {
        self.admit()?;
        let id = self.resolver.resolve(identifier).await?;
        Ok(self.store.get_by_id(id).await?)
    }

    /// Connect a session. No-op success when already connecting/connected.
    /// Returns the current status plus the QR artefact when one is ready.
    pub async fn connect(&self, identifier: &str) -> Result<ConnectOutcome> {
        self.admit()?;
        let id = self.resolver.resolve(identifier).await?;
        let session = self.store.get_by_id(id).await?;
        if !session.active {
            return Err(ConflictError::NotActive.into());
        }
        if self.registry.get(id).is_some() {
            return self.connect_outcome(id).await;
        }
        self.spawn_session(&session).await?;
        self.await_first_artifact(id).await;
        self.connect_outcome(id).await
    }

    /// Establish a client, register the handle and start the worker.
    /// Shared by `connect` and the startup reconciler.
    pub(crate) async fn spawn_session(&self, session: &Session) -> Result<()> {
        // Status write precedes registry insertion.
        self.store
            .set_status(session.id, SessionStatus::Connecting)
            .await?;

        let binding = (!session.device_binding.is_empty()).then(|| session.device_binding.clone());
        let client = match self
            .connector
            .establish(session.id, binding.as_deref(), session.proxy_url.as_deref())
            .await
        {
            Ok(client) => client,
            Err(e) => {
                let _ = self
                    .store
                    .set_status(session.id, SessionStatus::Disconnected)
                    .await;
                return Err(establish_failed(e));
            }
        };

        let handle = ClientHandle::new(session.id, client, self.root.child_token());
        if !self.registry.put_if_absent(Arc::clone(&handle)) {
            // Lost the race; the winner's worker owns the session.
            return Ok(());
        }

        let worker = SessionWorker::new(
            session.id,
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            handle,
            self.verbose_qr,
        );
        tokio::spawn(worker.run(binding));
        Ok(())
    }

    /// Wait briefly for the session to surface a QR artefact or settle
    /// connected, so the connect response can carry something useful.
    async fn await_first_artifact(&self, id: Uuid) {
        let _ = tokio::time::timeout(QR_WAIT, async {
            loop {
                match self.store.get_by_id(id).await {
                    Ok(s)
                        if s.status == SessionStatus::Connected
                            || s.status == SessionStatus::Disconnected
                            || !s.qr_payload.is_empty() =>
                    {
                        break;
                    }
                    Ok(_) => tokio::time::sleep(Duration::from_millis(25)).await,
                    Err(_) => break,
                }
            }
        })
        .await;
    }

    async fn connect_outcome(&self, id: Uuid) -> Result<ConnectOutcome> {
        let session = self.store.get_by_id(id).await?;
        Ok(ConnectOutcome {
            status: session.status,
            qr_payload: (!session.qr_payload.is_empty()).then_some(session.qr_payload),
        })
    }

    /// Disconnect a session. No-op success when already disconnected.
    pub async fn disconnect(&self, identifier: &str) -> Result<SessionStatus> {
        self.admit()?;
        let id = self.resolver.resolve(identifier).await?;
        let session = self.store.get_by_id(id).await?;
        if let Some(handle) = self.registry.remove(id) {
            handle.cancel();
            // Removal is always followed by a disconnected write; the
            // worker repeats it but must not be waited on.
            let _ = self.store.set_qr_payload(id, "").await;
            let _ = self
                .store
                .set_status(id, SessionStatus::Disconnected)
                .await;
        } else if session.status != SessionStatus::Disconnected {
            // Stale row without a live client (e.g. prior crash).
            let _ = self
                .store
                .set_status(id, SessionStatus::Disconnected)
                .await;
        }
        Ok(SessionStatus::Disconnected)
    }

    /// Tombstone a session, removing its handle if present.
    pub async fn delete_session(&self, identifier: &str) -> Result<()> {
        self.admit()?;
        let id = self.resolver.resolve(identifier).await?;
        self.store.get_by_id(id).await?;
        if let Some(handle) = self.registry.remove(id) {
            handle.cancel();
            let _ = self
                .store
                .set_status(id, SessionStatus::Disconnected)
                .await;
        }
        self.store.set_active(id, false).await?;
        info!(session_id = %id, "session deleted");
        Ok(())
    }

    // ---- sends -------------------------------------------------------------

    pub async fn send_text(
        &self,
        identifier: &str,
        to: &str,
        text: &str,
        reply_to: Option<String>,
    ) -> Result<SendOutcome> {
        self.admit()?;
        if to.is_empty() {
            return Err(ValidationError::MissingRecipient.into());
        }
        let chars = text.chars().count();
        if chars > TEXT_MAX_CHARS {
            return Err(ValidationError::TextTooLong {
                len: chars,
                limit: TEXT_MAX_CHARS,
            }
            .into());
        }
        let (id, handle) = self.connected_handle(identifier).await?;
        let client = handle.client();
        let receipt = match client.send_text(to, text, reply_to.as_deref()).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.record_outbound(
                    id,
                    to,
                    crate::types::MessageKind::Text,
                    MessageStatus::Failed,
                    client.generate_wire_id(),
                    Some(text.to_string()),
                    None,
                    None,
                    reply_to,
                )
                .await;
                return Err(send_failed(e));
            }
        };
        self.record_outbound(
            id,
            to,
            crate::types::MessageKind::Text,
            MessageStatus::Sent,
            receipt.wire_id.clone(),
            Some(text.to_string()),
            None,
            None,
            reply_to,
        )
        .await;
        Ok(SendOutcome {
            wire_id: receipt.wire_id,
            status: MessageStatus::Sent,
            timestamp: receipt.timestamp,
        })
    }

    pub async fn send_media(
        &self,
        identifier: &str,
        to: &str,
        request: MediaRequest,
        caption: Option<String>,
        reply_to: Option<String>,
    ) -> Result<SendOutcome> {
        self.admit()?;
        if to.is_empty() {
            return Err(ValidationError::MissingRecipient.into());
        }
        let (id, handle) = self.connected_handle(identifier).await?;
        let media = self.media.process(request, &self.root).await?;
        let client = handle.client();
        let receipt = match client
            .send_media(to, &media, caption.as_deref(), reply_to.as_deref())
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                self.record_outbound(
                    id,
                    to,
                    media.category.message_kind(),
                    MessageStatus::Failed,
                    client.generate_wire_id(),
                    None,
                    None,
                    caption,
                    reply_to,
                )
                .await;
                return Err(send_failed(e));
            }
        };
        let media_ref = self.persist_media(id, &media).await;
        self.record_outbound(
            id,
            to,
            media.category.message_kind(),
            MessageStatus::Sent,
            receipt.wire_id.clone(),
            None,
            media_ref,
            caption,
            reply_to,
        )
        .await;
        Ok(SendOutcome {
            wire_id: receipt.wire_id,
            status: MessageStatus::Sent,
            timestamp: receipt.timestamp,
        })
    }

    /// Resolve, require a live handle and a settled `connected` status.
    async fn connected_handle(&self, identifier: &str) -> Result<(Uuid, Arc<ClientHandle>)> {
        let id = self.resolver.resolve(identifier).await?;
        let handle = self
            .registry
            .get(id)
            .ok_or(Error::Conflict(ConflictError::NotConnected))?;
        // Wait for any in-flight transition, then check the settled state.
        drop(handle.settle().await);
        let session = self.store.get_by_id(id).await?;
        if session.status != SessionStatus::Connected {
            return Err(ConflictError::NotConnected.into());
        }
        Ok((id, handle))
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_outbound(
        &self,
        session_id: Uuid,
        to: &str,
        kind: crate::types::MessageKind,
        status: MessageStatus,
        wire_id: String,
        content: Option<String>,
        media_ref: Option<Uuid>,
        caption: Option<String>,
        reply_to: Option<String>,
    ) {
        let now = Utc::now();
        let record = MessageRecord {
            id: Uuid::new_v4(),
            session_id,
            wire_id,
            kind,
            direction: MessageDirection::Outbound,
            status,
            chat_id: to.to_string(),
            sender_id: "me".to_string(),
            content,
            media_ref,
            caption,
            reply_to,
            timestamp: now,
        };
        if let Err(e) = self.store.record_message(&record).await {
            warn!(session_id = %session_id, error = %e, "outbound record failed");
        }
        let _ = self.store.upsert_chat(session_id, to, now).await;
    }

    async fn persist_media(&self, session_id: Uuid, media: &ProcessedMedia) -> Option<Uuid> {
        if !self.media_store_enabled {
            return None;
        }
        let now = Utc::now();
        let file = MediaFile {
            id: Uuid::new_v4(),
            session_id,
            mime_type: media.mime_type.clone(),
            size: media.size,
            key: format!("{session_id}/{}", Uuid::new_v4()),
            created_at: now,
            expires_at: now + self.media_ttl,
        };
        match self.store.put_media_file(&file).await {
            Ok(()) => Some(file.id),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "media file record failed");
                None
            }
        }
    }

    // ---- shutdown ----------------------------------------------------------

    /// Stop intake, signal every handle and wait out the grace period.
    /// Stores are closed by the caller afterwards.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.root.cancel();
        let handles = self.registry.snapshot();
        info!(sessions = handles.len(), "shutting down");
        for handle in &handles {
            handle.cancel();
        }
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while !self.registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = self.registry.len(),
                "shutdown grace elapsed with sessions still draining"
            );
        }
    }
}

fn establish_failed(e: ProtocolError) -> Error {
    Error::Internal(anyhow::anyhow!("protocol client establish failed: {e}"))
}

fn send_failed(e: ProtocolError) -> Error {
    Error::Upstream(UpstreamError::SendFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::{MockClient, MockConnector};
    use crate::protocol::{ProtocolEvent, QrEvent};
    use crate::store::MemoryStore;
    use bytes::Bytes;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.auth.api_key = "secret".into();
        config.timeout.shutdown_secs = 1;
        config
    }

    fn gateway_with(connector: Arc<MockConnector>) -> (Arc<Gateway>, Store) {
        let store: Store = Arc::new(MemoryStore::new());
        let gateway =
            Gateway::new(Arc::clone(&store), connector, &test_config()).unwrap();
        (Arc::new(gateway), store)
    }

    async fn wait_for<F, Fut>(what: &str, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..400 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    /// Drive the full QR pairing flow for one session and return its client.
    async fn pair(
        gateway: &Arc<Gateway>,
        connector: &Arc<MockConnector>,
        store: &Store,
        name: &str,
    ) -> (Uuid, Arc<MockClient>) {
        let session = gateway.create_session(name, None).await.unwrap();
        let id = session.id;

        let driver = tokio::spawn({
            let connector = Arc::clone(connector);
            async move {
                let client = connector.wait_client(id).await;
                client.wait_qr_open().await;
                client.push_qr(QrEvent::Code("2@pair-me".into())).await;
            }
        });
        let outcome = gateway.connect(name).await.unwrap();
        driver.await.unwrap();
        assert_eq!(outcome.status, SessionStatus::Connecting);
        let qr = outcome.qr_payload.expect("qr artefact in connect response");
        assert!(qr.starts_with("data:image/png;base64,"));

        let client = connector.wait_client(id).await;
        client.push_qr(QrEvent::Success).await;
        client
            .emit(ProtocolEvent::PairSuccess {
                device_binding: "1234@s.whatsapp.net".into(),
            })
            .await;
        wait_for("pairing to settle", || async {
            store
                .get_by_id(id)
                .await
                .map(|s| s.status == SessionStatus::Connected)
                .unwrap_or(false)
        })
        .await;
        (id, client)
    }

    #[tokio::test]
    async fn create_rejects_bad_and_duplicate_names() {
        let (gateway, _store) = gateway_with(MockConnector::new());
        gateway.create_session("alpha", None).await.unwrap();

        let dup = gateway.create_session("alpha", None).await.unwrap_err();
        assert_eq!(dup.code(), "SESSION_EXISTS");

        for bad in ["ab", "bad name", &"x".repeat(51)] {
            let err = gateway.create_session(bad, None).await.unwrap_err();
            assert_eq!(err.code(), "INVALID_NAME");
        }
    }

    #[tokio::test]
    async fn qr_pairing_flow_reaches_connected_with_cleared_qr() {
        let connector = MockConnector::new();
        let (gateway, store) = gateway_with(Arc::clone(&connector));
        let (id, _client) = pair(&gateway, &connector, &store, "alpha").await;

        let session = gateway.get_session("alpha").await.unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.status, SessionStatus::Connected);
        assert_eq!(session.device_binding, "1234@s.whatsapp.net");
        assert!(session.qr_payload.is_empty());
        assert!(gateway.registry().get(id).is_some());
    }

    #[tokio::test]
    async fn connect_is_noop_when_already_live() {
        let connector = MockConnector::new();
        let (gateway, store) = gateway_with(Arc::clone(&connector));
        let (id, _client) = pair(&gateway, &connector, &store, "alpha").await;

        let again = gateway.connect(&id.to_string()).await.unwrap();
        assert_eq!(again.status, SessionStatus::Connected);
        assert!(again.qr_payload.is_none());
        assert_eq!(gateway.registry().len(), 1);
    }

    #[tokio::test]
    async fn connect_rejects_tombstoned_session() {
        let connector = MockConnector::new();
        let (gateway, _store) = gateway_with(connector);
        let session = gateway.create_session("alpha", None).await.unwrap();
        gateway.delete_session(&session.id.to_string()).await.unwrap();

        let err = gateway.connect(&session.id.to_string()).await.unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_ACTIVE");
    }

    #[tokio::test]
    async fn disconnect_clears_registry_and_status() {
        let connector = MockConnector::new();
        let (gateway, store) = gateway_with(Arc::clone(&connector));
        let (id, _client) = pair(&gateway, &connector, &store, "alpha").await;

        let status = gateway.disconnect("alpha").await.unwrap();
        assert_eq!(status, SessionStatus::Disconnected);
        assert!(gateway.registry().get(id).is_none());
        let session = store.get_by_id(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Disconnected);

        // Idempotent.
        let status = gateway.disconnect("alpha").await.unwrap();
        assert_eq!(status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn delete_tombstones_and_is_not_found_after() {
        let connector = MockConnector::new();
        let (gateway, store) = gateway_with(Arc::clone(&connector));
        let (id, _client) = pair(&gateway, &connector, &store, "alpha").await;

        gateway.delete_session("alpha").await.unwrap();
        assert!(gateway.registry().get(id).is_none());
        let row = store.get_by_id(id).await.unwrap();
        assert!(!row.active);

        let err = gateway.delete_session(&Uuid::new_v4().to_string()).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn send_text_requires_connected_session() {
        let connector = MockConnector::new();
        let (gateway, _store) = gateway_with(connector);
        gateway.create_session("alpha", None).await.unwrap();

        let err = gateway
            .send_text("alpha", "+15551234567", "hi", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_CONNECTED");
    }

    #[tokio::test]
    async fn send_text_records_and_returns_receipt() {
        let connector = MockConnector::new();
        let (gateway, store) = gateway_with(Arc::clone(&connector));
        let (_id, client) = pair(&gateway, &connector, &store, "alpha").await;

        let outcome = gateway
            .send_text("alpha", "+15551234567", "hello there", None)
            .await
            .unwrap();
        assert_eq!(outcome.status, MessageStatus::Sent);
        assert!(outcome.wire_id.starts_with("3EB0"));

        let sent = client.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "+15551234567");
        assert_eq!(sent[0].body.as_deref(), Some("hello there"));
    }

    #[tokio::test]
    async fn send_text_validation() {
        let connector = MockConnector::new();
        let (gateway, store) = gateway_with(Arc::clone(&connector));
        pair(&gateway, &connector, &store, "alpha").await;

        let err = gateway
            .send_text("alpha", "", "hi", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MISSING_RECIPIENT");

        let long = "x".repeat(TEXT_MAX_CHARS + 1);
        let err = gateway
            .send_text("alpha", "+15551234567", &long, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TEXT_TOO_LONG");

        let exactly = "x".repeat(TEXT_MAX_CHARS);
        gateway
            .send_text("alpha", "+15551234567", &exactly, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_failure_surfaces_upstream_error() {
        let connector = MockConnector::new();
        let (gateway, store) = gateway_with(Arc::clone(&connector));
        let (_, client) = pair(&gateway, &connector, &store, "alpha").await;

        client.fail_send.store(true, Ordering::SeqCst);
        let err = gateway
            .send_text("alpha", "+15551234567", "hi", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SEND_FAILED");
    }

    #[tokio::test]
    async fn send_media_via_upload() {
        let connector = MockConnector::new();
        let (gateway, store) = gateway_with(Arc::clone(&connector));
        let (_, client) = pair(&gateway, &connector, &store, "alpha").await;

        let mut png = vec![0u8; 64];
        png[..8].copy_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        let request = MediaRequest {
            upload: Some(crate::media::MediaSource::Upload {
                bytes: Bytes::from(png),
                filename: Some("photo.png".into()),
            }),
            ..Default::default()
        };
        let outcome = gateway
            .send_media("alpha", "+15551234567", request, Some("cap".into()), None)
            .await
            .unwrap();
        assert_eq!(outcome.status, MessageStatus::Sent);
        let sent = client.sent.lock().unwrap();
        assert_eq!(sent[0].mime_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn logged_out_event_tombstones_session() {
        let connector = MockConnector::new();
        let (gateway, store) = gateway_with(Arc::clone(&connector));
        let (id, client) = pair(&gateway, &connector, &store, "alpha").await;

        client
            .emit(ProtocolEvent::LoggedOut {
                reason: "revoked from phone".into(),
            })
            .await;
        wait_for("logout teardown", || async {
            gateway.registry().get(id).is_none()
        })
        .await;
        wait_for("tombstone write", || async {
            store
                .get_by_id(id)
                .await
                .map(|s| !s.active && s.status == SessionStatus::Disconnected)
                .unwrap_or(false)
        })
        .await;
    }

    #[tokio::test]
    async fn qr_timeout_returns_to_disconnected() {
        let connector = MockConnector::new();
        let (gateway, store) = gateway_with(Arc::clone(&connector));
        let session = gateway.create_session("alpha", None).await.unwrap();
        let id = session.id;

        let driver = tokio::spawn({
            let connector = Arc::clone(&connector);
            async move {
                let client = connector.wait_client(id).await;
                client.wait_qr_open().await;
                client.push_qr(QrEvent::Code("2@pair-me".into())).await;
            }
        });
        gateway.connect("alpha").await.unwrap();
        driver.await.unwrap();

        let client = connector.wait_client(id).await;
        client.push_qr(QrEvent::Timeout).await;
        wait_for("qr timeout teardown", || async {
            store
                .get_by_id(id)
                .await
                .map(|s| {
                    s.status == SessionStatus::Disconnected && s.qr_payload.is_empty()
                })
                .unwrap_or(false)
        })
        .await;
        assert!(gateway.registry().get(id).is_none());
        // Still active: the caller may retry.
        assert!(store.get_by_id(id).await.unwrap().active);
    }

    #[tokio::test]
    async fn shutdown_drains_registry_and_refuses_new_work() {
        let connector = MockConnector::new();
        let (gateway, store) = gateway_with(Arc::clone(&connector));
        pair(&gateway, &connector, &store, "alpha").await;

        gateway.shutdown().await;
        assert!(gateway.registry().is_empty());
        let err = gateway.create_session("beta", None).await.unwrap_err();
        assert_eq!(err.code(), "SHUTTING_DOWN");
    }
}
