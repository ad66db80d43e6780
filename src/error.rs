use thiserror::Error;

/// Gateway result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by gateway operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("media: {0}")]
    Media(#[from] MediaError),

    #[error("upstream: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("rate limited")]
    RateLimited,

    #[error("store: {0}")]
    Store(StoreError),

    #[error("shutting down")]
    ShuttingDown,

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

/// Input that failed validation before any state was touched.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("identifier is neither a UUID nor a session name")]
    InvalidIdentifier,

    #[error("session name must be 3-50 characters of [A-Za-z0-9_-]")]
    InvalidName,

    #[error("recipient must be non-empty")]
    MissingRecipient,

    #[error("text exceeds {limit} characters (got {len})")]
    TextTooLong { len: usize, limit: usize },

    #[error("unknown media kind: {0}")]
    UnknownMediaKind(String),

    #[error("{0}")]
    BadRequest(String),
}

/// Operation conflicts with the session's current state.
#[derive(Error, Debug)]
pub enum ConflictError {
    #[error("session name already in use: {0}")]
    DuplicateName(String),

    #[error("session is not active")]
    NotActive,

    #[error("session is not connected")]
    NotConnected,
}

/// Entity kind for not-found reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Session,
    Message,
    Media,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Session => "session",
            Self::Message => "message",
            Self::Media => "media",
        })
    }
}

/// Media ingress failures.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("no media source provided")]
    Required,

    #[error("more than one media source provided")]
    Conflict,

    #[error("invalid base64 payload")]
    InvalidBase64,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unsupported mime type: {0}")]
    UnsupportedMime(String),

    #[error("{category} payload of {size} bytes exceeds limit {limit}")]
    FileTooLarge {
        category: &'static str,
        size: u64,
        limit: u64,
    },

    #[error("empty payload")]
    EmptyPayload,
}

/// Failures of collaborators the gateway calls out to.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("url unreachable: {0}")]
    Unreachable(String),

    #[error("download failed with status {status}")]
    DownloadFailed { status: u16 },

    #[error("protocol send failed: {0}")]
    SendFailed(String),
}

/// Session store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    #[error("duplicate session name: {0}")]
    DuplicateName(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Error::NotFound(Resource::Session),
            StoreError::DuplicateName(name) => Error::Conflict(ConflictError::DuplicateName(name)),
            other => Error::Store(other),
        }
    }
}

/// Errors reported by the protocol library.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("not connected")]
    NotConnected,

    #[error("authentication revoked")]
    LoggedOut,

    #[error("stream replaced by another client")]
    StreamReplaced,

    #[error("timeout")]
    Timeout,

    #[error("transport: {0}")]
    Transport(String),

    #[error("rejected by server: {0}")]
    Rejected(String),
}

impl ProtocolError {
    /// Whether re-initiating the connection cannot help (credential is dead).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::StreamReplaced)
    }
}

impl Error {
    /// Stable machine-readable code used in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(v) => match v {
                ValidationError::InvalidIdentifier => "INVALID_IDENTIFIER",
                ValidationError::InvalidName => "INVALID_NAME",
                ValidationError::MissingRecipient => "MISSING_RECIPIENT",
                ValidationError::TextTooLong { .. } => "TEXT_TOO_LONG",
                ValidationError::UnknownMediaKind(_) => "UNKNOWN_MEDIA_KIND",
                ValidationError::BadRequest(_) => "BAD_REQUEST",
            },
            Self::Conflict(c) => match c {
                ConflictError::DuplicateName(_) => "SESSION_EXISTS",
                ConflictError::NotActive => "SESSION_NOT_ACTIVE",
                ConflictError::NotConnected => "SESSION_NOT_CONNECTED",
            },
            Self::NotFound(_) => "NOT_FOUND",
            Self::Media(m) => match m {
                MediaError::Required => "MEDIA_REQUIRED",
                MediaError::Conflict => "MEDIA_CONFLICT",
                MediaError::InvalidBase64 => "INVALID_BASE64",
                MediaError::InvalidUrl(_) => "INVALID_URL",
                MediaError::UnsupportedMime(_) => "UNSUPPORTED_MIME",
                MediaError::FileTooLarge { .. } => "FILE_TOO_LARGE",
                MediaError::EmptyPayload => "EMPTY_PAYLOAD",
            },
            Self::Upstream(u) => match u {
                UpstreamError::Unreachable(_) => "URL_UNREACHABLE",
                UpstreamError::DownloadFailed { .. } => "DOWNLOAD_FAILED",
                UpstreamError::SendFailed(_) => "SEND_FAILED",
            },
            Self::RateLimited => "RATE_LIMITED",
            Self::Store(_) => "STORE_UNAVAILABLE",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err: Error = StoreError::NotFound.into();
        assert!(matches!(err, Error::NotFound(Resource::Session)));
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn store_duplicate_maps_to_conflict() {
        let err: Error = StoreError::DuplicateName("alpha".into()).into();
        assert_eq!(err.code(), "SESSION_EXISTS");
    }

    #[test]
    fn fatal_protocol_errors() {
        assert!(ProtocolError::LoggedOut.is_fatal());
        assert!(ProtocolError::StreamReplaced.is_fatal());
        assert!(!ProtocolError::Timeout.is_fatal());
        assert!(!ProtocolError::Transport("reset".into()).is_fatal());
    }
}
