use super::SessionStore;
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::types::{
    MediaFile, MessageRecord, MessageStatus, Session, SessionFilters, SessionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{QueryBuilder, Row};
use uuid::Uuid;

/// PostgreSQL-backed store. The schema is created on boot; all statements
/// are single-row and rely on the backend for transactionality.
pub struct PostgresStore {
    pool: PgPool,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    device_binding TEXT NOT NULL DEFAULT '',
    qr_payload TEXT NOT NULL DEFAULT '',
    active BOOLEAN NOT NULL DEFAULT TRUE,
    last_seen TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    proxy_url TEXT,
    webhook_url TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS sessions_active_name
    ON sessions (name) WHERE active;
CREATE TABLE IF NOT EXISTS messages (
    id UUID PRIMARY KEY,
    session_id UUID NOT NULL,
    wire_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    direction TEXT NOT NULL,
    status TEXT NOT NULL,
    chat_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    content TEXT,
    media_ref UUID,
    caption TEXT,
    reply_to TEXT,
    timestamp TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_session_wire
    ON messages (session_id, wire_id);
CREATE TABLE IF NOT EXISTS chats (
    id UUID PRIMARY KEY,
    session_id UUID NOT NULL,
    chat_id TEXT NOT NULL,
    name TEXT,
    last_message_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    UNIQUE (session_id, chat_id)
);
CREATE TABLE IF NOT EXISTS contacts (
    id UUID PRIMARY KEY,
    session_id UUID NOT NULL,
    contact_id TEXT NOT NULL,
    name TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    UNIQUE (session_id, contact_id)
);
CREATE TABLE IF NOT EXISTS media_files (
    id UUID PRIMARY KEY,
    session_id UUID NOT NULL,
    mime_type TEXT NOT NULL,
    size BIGINT NOT NULL,
    object_key TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL
);
"#;

const SESSION_COLUMNS: &str = "id, name, status, device_binding, qr_payload, active, \
     last_seen, created_at, updated_at, proxy_url, webhook_url";

impl PostgresStore {
    /// Connect a pool with the configured sizing and create the schema.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_open_conns)
            .min_connections(cfg.max_idle_conns.min(cfg.max_open_conns))
            .max_lifetime(cfg.conn_max_lifetime())
            .connect(&cfg.dsn())
            .await
            .map_err(unavailable)?;
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(unavailable)?;
        }
        Ok(Self { pool })
    }

    fn session_from_row(row: &PgRow) -> Result<Session, StoreError> {
        let status: String = row.try_get("status").map_err(unavailable)?;
        Ok(Session {
            id: row.try_get("id").map_err(unavailable)?,
            name: row.try_get("name").map_err(unavailable)?,
            status: SessionStatus::parse(&status)
                .ok_or_else(|| StoreError::Unavailable(format!("corrupt status: {status}")))?,
            device_binding: row.try_get("device_binding").map_err(unavailable)?,
            qr_payload: row.try_get("qr_payload").map_err(unavailable)?,
            active: row.try_get("active").map_err(unavailable)?,
            last_seen: row.try_get("last_seen").map_err(unavailable)?,
            created_at: row.try_get("created_at").map_err(unavailable)?,
            updated_at: row.try_get("updated_at").map_err(unavailable)?,
            proxy_url: row.try_get("proxy_url").map_err(unavailable)?,
            webhook_url: row.try_get("webhook_url").map_err(unavailable)?,
        })
    }

    async fn touch_column(
        &self,
        id: Uuid,
        sql: &str,
        bind: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let result = query.bind(id).execute(&self.pool).await.map_err(unavailable)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (id, name, status, device_binding, qr_payload, active, \
             last_seen, created_at, updated_at, proxy_url, webhook_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(session.id)
        .bind(&session.name)
        .bind(session.status.as_str())
        .bind(&session.device_binding)
        .bind(&session.qr_payload)
        .bind(session.active)
        .bind(session.last_seen)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(&session.proxy_url)
        .bind(&session.webhook_url)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateName(session.name.clone())
            } else {
                unavailable(e)
            }
        })?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Session, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .ok_or(StoreError::NotFound)?;
        Self::session_from_row(&row)
    }

    async fn get_by_name(&self, name: &str) -> Result<Session, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE name = $1 AND active"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .ok_or(StoreError::NotFound)?;
        Self::session_from_row(&row)
    }

    async fn list(&self, filters: &SessionFilters) -> Result<(Vec<Session>, u64), StoreError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM sessions WHERE TRUE");
        let mut select =
            QueryBuilder::new(format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE TRUE"));
        for qb in [&mut count, &mut select] {
            if let Some(status) = filters.status {
                qb.push(" AND status = ").push_bind(status.as_str());
            }
            if let Some(active) = filters.active {
                qb.push(" AND active = ").push_bind(active);
            }
        }
        select.push(" ORDER BY created_at DESC");
        if let Some(limit) = filters.limit {
            select.push(" LIMIT ").push_bind(limit as i64);
        }
        if let Some(offset) = filters.offset {
            select.push(" OFFSET ").push_bind(offset as i64);
        }

        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?
            .try_get(0)
            .map_err(unavailable)?;
        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;
        let sessions = rows
            .iter()
            .map(Self::session_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((sessions, total as u64))
    }

    async fn update(&self, session: &Session) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET name = $1, status = $2, device_binding = $3, \
             qr_payload = $4, active = $5, last_seen = $6, updated_at = NOW(), \
             proxy_url = $7, webhook_url = $8 WHERE id = $9",
        )
        .bind(&session.name)
        .bind(session.status.as_str())
        .bind(&session.device_binding)
        .bind(&session.qr_payload)
        .bind(session.active)
        .bind(session.last_seen)
        .bind(&session.proxy_url)
        .bind(&session.webhook_url)
        .bind(session.id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: SessionStatus) -> Result<(), StoreError> {
        self.touch_column(
            id,
            "UPDATE sessions SET status = $1, updated_at = NOW() WHERE id = $2",
            Some(status.as_str()),
        )
        .await
    }

    async fn set_device_binding(&self, id: Uuid, binding: &str) -> Result<(), StoreError> {
        self.touch_column(
            id,
            "UPDATE sessions SET device_binding = $1, updated_at = NOW() WHERE id = $2",
            Some(binding),
        )
        .await
    }

    async fn set_qr_payload(&self, id: Uuid, qr: &str) -> Result<(), StoreError> {
        self.touch_column(
            id,
            "UPDATE sessions SET qr_payload = $1, updated_at = NOW() WHERE id = $2",
            Some(qr),
        )
        .await
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET active = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(active)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn touch_last_seen(&self, id: Uuid) -> Result<(), StoreError> {
        self.touch_column(
            id,
            "UPDATE sessions SET last_seen = NOW(), updated_at = NOW() WHERE id = $1",
            None,
        )
        .await
    }

    async fn list_paired(&self) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE active AND device_binding <> ''"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;
        rows.iter().map(Self::session_from_row).collect()
    }

    async fn record_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (id, session_id, wire_id, kind, direction, status, \
             chat_id, sender_id, content, media_ref, caption, reply_to, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(&message.wire_id)
        .bind(message.kind.as_str())
        .bind(message.direction.as_str())
        .bind(message.status.as_str())
        .bind(&message.chat_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(message.media_ref)
        .bind(&message.caption)
        .bind(&message.reply_to)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn update_message_status(
        &self,
        session_id: Uuid,
        wire_id: &str,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET status = $1 WHERE session_id = $2 AND wire_id = $3",
        )
        .bind(status.as_str())
        .bind(session_id)
        .bind(wire_id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn upsert_chat(
        &self,
        session_id: Uuid,
        chat_id: &str,
        last_message_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO chats (id, session_id, chat_id, last_message_at, created_at) \
             VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (session_id, chat_id) DO UPDATE SET last_message_at = $4",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(chat_id)
        .bind(last_message_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn upsert_contact(
        &self,
        session_id: Uuid,
        contact_id: &str,
        name: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO contacts (id, session_id, contact_id, name, created_at) \
             VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (session_id, contact_id) \
             DO UPDATE SET name = COALESCE($4, contacts.name)",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(contact_id)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn put_media_file(&self, file: &MediaFile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO media_files (id, session_id, mime_type, size, object_key, \
             created_at, expires_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(file.id)
        .bind(file.session_id)
        .bind(&file.mime_type)
        .bind(file.size as i64)
        .bind(&file.key)
        .bind(file.created_at)
        .bind(file.expires_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn sweep_expired_media(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM media_files WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
