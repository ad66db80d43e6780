//! Durable session store and the message/chat/contact/media rows the
//! gateway writes as a side effect of traffic.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::error::StoreError;
use crate::types::{
    MediaFile, MessageRecord, MessageStatus, Session, SessionFilters, SessionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Store trait: one durable row per session plus the traffic tables.
///
/// All operations are row-level transactional. Callers never hold in-memory
/// locks across these calls.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Fails with `DuplicateName` when another active
    /// session holds the name.
    async fn create(&self, session: &Session) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Session, StoreError>;

    /// Look up the active session with the given name.
    async fn get_by_name(&self, name: &str) -> Result<Session, StoreError>;

    /// Filtered listing plus the total matching count (pre-pagination).
    async fn list(&self, filters: &SessionFilters) -> Result<(Vec<Session>, u64), StoreError>;

    /// Full-row update; refreshes `updated_at`.
    async fn update(&self, session: &Session) -> Result<(), StoreError>;

    async fn set_status(&self, id: Uuid, status: SessionStatus) -> Result<(), StoreError>;

    async fn set_device_binding(&self, id: Uuid, binding: &str) -> Result<(), StoreError>;

    async fn set_qr_payload(&self, id: Uuid, qr: &str) -> Result<(), StoreError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError>;

    async fn touch_last_seen(&self, id: Uuid) -> Result<(), StoreError>;

    /// All active sessions whose device binding is non-empty; the startup
    /// reconciler reattaches exactly these.
    async fn list_paired(&self) -> Result<Vec<Session>, StoreError>;

    async fn record_message(&self, message: &MessageRecord) -> Result<(), StoreError>;

    async fn update_message_status(
        &self,
        session_id: Uuid,
        wire_id: &str,
        status: MessageStatus,
    ) -> Result<(), StoreError>;

    async fn upsert_chat(
        &self,
        session_id: Uuid,
        chat_id: &str,
        last_message_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn upsert_contact(
        &self,
        session_id: Uuid,
        contact_id: &str,
        name: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn put_media_file(&self, file: &MediaFile) -> Result<(), StoreError>;

    /// Delete media-file rows whose TTL elapsed; returns how many went.
    async fn sweep_expired_media(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Release backend resources. Default is a no-op.
    async fn close(&self) {}
}

/// Alias for the shared store (common usage).
pub type Store = Arc<dyn SessionStore>;
