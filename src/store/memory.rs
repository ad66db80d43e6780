use super::SessionStore;
use crate::error::StoreError;
use crate::types::{
    Chat, Contact, MediaFile, MessageRecord, MessageStatus, Session, SessionFilters, SessionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory store (for testing or single-run; not persistent).
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    messages: RwLock<Vec<MessageRecord>>,
    chats: RwLock<HashMap<(Uuid, String), Chat>>,
    contacts: RwLock<HashMap<(Uuid, String), Contact>>,
    media: RwLock<HashMap<Uuid, MediaFile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_session<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
        let out = f(session);
        session.updated_at = Utc::now();
        Ok(out)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if sessions
            .values()
            .any(|s| s.active && s.name == session.name)
        {
            return Err(StoreError::DuplicateName(session.name.clone()));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Session, StoreError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        sessions.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_by_name(&self, name: &str) -> Result<Session, StoreError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        sessions
            .values()
            .find(|s| s.active && s.name == name)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self, filters: &SessionFilters) -> Result<(Vec<Session>, u64), StoreError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut matched: Vec<Session> = sessions
            .values()
            .filter(|s| filters.status.is_none_or(|st| s.status == st))
            .filter(|s| filters.active.is_none_or(|a| s.active == a))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matched.len() as u64;
        let offset = filters.offset.unwrap_or(0) as usize;
        let mut page: Vec<Session> = matched.into_iter().skip(offset).collect();
        if let Some(limit) = filters.limit {
            page.truncate(limit as usize);
        }
        Ok((page, total))
    }

    async fn update(&self, session: &Session) -> Result<(), StoreError> {
        self.with_session(session.id, |row| {
            let mut next = session.clone();
            next.created_at = row.created_at;
            *row = next;
        })
    }

    async fn set_status(&self, id: Uuid, status: SessionStatus) -> Result<(), StoreError> {
        self.with_session(id, |s| s.status = status)
    }

    async fn set_device_binding(&self, id: Uuid, binding: &str) -> Result<(), StoreError> {
        self.with_session(id, |s| s.device_binding = binding.to_string())
    }

    async fn set_qr_payload(&self, id: Uuid, qr: &str) -> Result<(), StoreError> {
        self.with_session(id, |s| s.qr_payload = qr.to_string())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        self.with_session(id, |s| s.active = active)
    }

    async fn touch_last_seen(&self, id: Uuid) -> Result<(), StoreError> {
        self.with_session(id, |s| s.last_seen = Some(Utc::now()))
    }

    async fn list_paired(&self) -> Result<Vec<Session>, StoreError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(sessions
            .values()
            .filter(|s| s.active && s.is_paired())
            .cloned()
            .collect())
    }

    async fn record_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        self.messages
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .push(message.clone());
        Ok(())
    }

    async fn update_message_status(
        &self,
        session_id: Uuid,
        wire_id: &str,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        let mut messages = self
            .messages
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let msg = messages
            .iter_mut()
            .find(|m| m.session_id == session_id && m.wire_id == wire_id)
            .ok_or(StoreError::NotFound)?;
        msg.status = status;
        Ok(())
    }

    async fn upsert_chat(
        &self,
        session_id: Uuid,
        chat_id: &str,
        last_message_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut chats = self
            .chats
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        chats
            .entry((session_id, chat_id.to_string()))
            .and_modify(|c| c.last_message_at = Some(last_message_at))
            .or_insert_with(|| Chat {
                id: Uuid::new_v4(),
                session_id,
                chat_id: chat_id.to_string(),
                name: None,
                last_message_at: Some(last_message_at),
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn upsert_contact(
        &self,
        session_id: Uuid,
        contact_id: &str,
        name: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut contacts = self
            .contacts
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        contacts
            .entry((session_id, contact_id.to_string()))
            .and_modify(|c| {
                if let Some(n) = name {
                    c.name = Some(n.to_string());
                }
            })
            .or_insert_with(|| Contact {
                id: Uuid::new_v4(),
                session_id,
                contact_id: contact_id.to_string(),
                name: name.map(str::to_string),
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn put_media_file(&self, file: &MediaFile) -> Result<(), StoreError> {
        self.media
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .insert(file.id, file.clone());
        Ok(())
    }

    async fn sweep_expired_media(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut media = self
            .media
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let before = media.len();
        media.retain(|_, f| f.expires_at > now);
        Ok((before - media.len()) as u64)
    }
}
