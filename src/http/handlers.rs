//! Request handlers for the session and message routes.

use super::error::ApiError;
use super::AppState;
use crate::error::{Error, ValidationError};
use crate::gateway::{ConnectOutcome, SendOutcome};
use crate::media::{MediaCategory, MediaRequest, MediaSource};
use crate::types::{Session, SessionFilters, SessionStatus};
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

// ---- public probes ---------------------------------------------------------

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn ready() -> Json<serde_json::Value> {
    Json(json!({ "status": "ready" }))
}

pub async fn live() -> Json<serde_json::Value> {
    Json(json!({ "status": "alive" }))
}

// ---- sessions --------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .gateway
        .create_session(&body.name, body.webhook_url)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Default, Deserialize)]
pub struct ListSessionsRequest {
    pub status: Option<SessionStatus>,
    pub active: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<Session>,
    pub total: u64,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    body: Option<Json<ListSessionsRequest>>,
) -> Result<Json<ListSessionsResponse>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let filters = SessionFilters {
        status: body.status,
        active: body.active,
        limit: body.limit,
        offset: body.offset,
    };
    let (sessions, total) = state.gateway.list_sessions(&filters).await?;
    Ok(Json(ListSessionsResponse { sessions, total }))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.gateway.get_session(&identifier).await?))
}

pub async fn connect_session(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<ConnectOutcome>, ApiError> {
    Ok(Json(state.gateway.connect(&identifier).await?))
}

#[derive(Serialize)]
pub struct DisconnectResponse {
    pub status: SessionStatus,
}

pub async fn disconnect_session(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let status = state.gateway.disconnect(&identifier).await?;
    Ok(Json(DisconnectResponse { status }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.gateway.delete_session(&identifier).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- messages --------------------------------------------------------------

#[derive(Default, Deserialize)]
pub struct SendMessageBody {
    #[serde(default)]
    pub to: String,
    pub text: Option<String>,
    /// Inline `data:` URL source.
    pub base64: Option<String>,
    /// Remote http(s) source.
    pub url: Option<String>,
    pub caption: Option<String>,
    pub filename: Option<String>,
    pub reply_to: Option<String>,
}

struct SendPayload {
    body: SendMessageBody,
    upload: Option<MediaSource>,
}

pub async fn send_message(
    State(state): State<AppState>,
    Path((identifier, kind)): Path<(String, String)>,
    request: Request,
) -> Result<Json<SendOutcome>, ApiError> {
    let payload = read_payload(request).await?;
    let outcome = if kind == "text" {
        let text = payload
            .body
            .text
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| bad_request("text is required"))?;
        state
            .gateway
            .send_text(&identifier, &payload.body.to, text, payload.body.reply_to)
            .await?
    } else {
        let category = MediaCategory::parse(&kind)
            .ok_or_else(|| Error::Validation(ValidationError::UnknownMediaKind(kind.clone())))?;
        let media = MediaRequest {
            data_url: payload.body.base64,
            http_url: payload.body.url,
            upload: payload.upload,
            category: Some(category),
            filename: payload.body.filename,
        };
        state
            .gateway
            .send_media(
                &identifier,
                &payload.body.to,
                media,
                payload.body.caption,
                payload.body.reply_to,
            )
            .await?
    };
    Ok(Json(outcome))
}

/// Accept either a JSON body or `multipart/form-data` with a `file` part.
async fn read_payload(request: Request) -> Result<SendPayload, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| bad_request(e.to_string()))?;
        let mut body = SendMessageBody::default();
        let mut upload = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| bad_request(e.to_string()))?
        {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "file" => {
                    let filename = field.file_name().map(str::to_string);
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| bad_request(e.to_string()))?;
                    upload = Some(MediaSource::Upload { bytes, filename });
                }
                "to" => body.to = text_field(field).await?,
                "text" => body.text = Some(text_field(field).await?),
                "base64" => body.base64 = Some(text_field(field).await?),
                "url" => body.url = Some(text_field(field).await?),
                "caption" => body.caption = Some(text_field(field).await?),
                "filename" => body.filename = Some(text_field(field).await?),
                "reply_to" => body.reply_to = Some(text_field(field).await?),
                _ => {}
            }
        }
        Ok(SendPayload { body, upload })
    } else {
        let Json(body) = Json::<SendMessageBody>::from_request(request, &())
            .await
            .map_err(|e| bad_request(e.body_text()))?;
        Ok(SendPayload { body, upload: None })
    }
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field.text().await.map_err(|e| bad_request(e.to_string()))
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(Error::Validation(ValidationError::BadRequest(
        message.into(),
    )))
}
