use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bounds for caller-chosen session names.
pub const NAME_MIN_LEN: usize = 3;
pub const NAME_MAX_LEN: usize = 50;

/// Persisted session status. Transient sub-phases live in [`SubPhase`]
/// and are never written to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disconnected" => Some(Self::Disconnected),
            "connecting" => Some(Self::Connecting),
            "connected" => Some(Self::Connected),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory sub-phase of a connecting session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubPhase {
    #[default]
    None,
    /// A QR code has been emitted and awaits a scan.
    QrPending,
    /// QR scanned, pairing handshake in flight.
    Pairing,
}

/// Durable session record. One live protocol connection at most.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub status: SessionStatus,
    /// Opaque credential from the protocol library; empty means never paired.
    #[serde(default)]
    pub device_binding: String,
    /// Most recent QR artefact (base64 PNG data URL); cleared on pair,
    /// timeout or disconnect.
    #[serde(default)]
    pub qr_payload: String,
    pub active: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Session {
    pub fn new(name: impl Into<String>, webhook_url: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: SessionStatus::Disconnected,
            device_binding: String::new(),
            qr_payload: String::new(),
            active: true,
            last_seen: None,
            created_at: now,
            updated_at: now,
            proxy_url: None,
            webhook_url,
        }
    }

    /// Whether the session has ever completed pairing.
    pub fn is_paired(&self) -> bool {
        !self.device_binding.is_empty()
    }
}

/// Name grammar: 3-50 characters of `[A-Za-z0-9_-]`.
pub fn valid_session_name(name: &str) -> bool {
    (NAME_MIN_LEN..=NAME_MAX_LEN).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Filters for session listing. Ordering is `created_at` descending.
#[derive(Clone, Debug, Default)]
pub struct SessionFilters {
    pub status: Option<SessionStatus>,
    pub active: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
