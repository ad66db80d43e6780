//! Media ingress: normalizes the three media sources into a validated byte
//! stream with a detected MIME type and message category.
//!
//! One tagged union, one pipeline function. The same bytes and filename
//! always yield the same `{mime, category, size}`.

mod mime;

pub use mime::{category_for_mime, detect_mime, MediaCategory, SIZE_CEILING};

use crate::error::{Error, MediaError, Result, UpstreamError};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use bytes::Bytes;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Promotion threshold for small webp images.
const STICKER_PROMOTION_MAX: u64 = 100 * 1024;

/// Maximum accepted URL length.
const URL_MAX_LEN: usize = 2048;

/// Default ceiling for one URL fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the payload came from.
#[derive(Clone, Debug)]
pub enum MediaSource {
    /// `data:<mime>;base64,<payload>` envelope.
    DataUrl(String),
    /// http(s) URL to fetch.
    HttpUrl(String),
    /// Raw bytes from a binary upload.
    Upload {
        bytes: Bytes,
        filename: Option<String>,
    },
}

impl MediaSource {
    fn tag(&self) -> &'static str {
        match self {
            Self::DataUrl(_) => "base64",
            Self::HttpUrl(_) => "url",
            Self::Upload { .. } => "upload",
        }
    }
}

/// Raw caller input before exclusivity is checked.
#[derive(Clone, Debug, Default)]
pub struct MediaRequest {
    pub data_url: Option<String>,
    pub http_url: Option<String>,
    pub upload: Option<MediaSource>,
    /// Explicit category; must agree with the detected MIME.
    pub category: Option<MediaCategory>,
    pub filename: Option<String>,
}

/// Validated, categorized byte buffer ready to hand to the protocol library.
#[derive(Clone, Debug)]
pub struct ProcessedMedia {
    pub bytes: Bytes,
    pub mime_type: String,
    pub category: MediaCategory,
    pub size: u64,
    pub filename: Option<String>,
    pub source_tag: &'static str,
    pub processing_latency: Duration,
}

pub struct MediaPipeline {
    http: reqwest::Client,
}

impl MediaPipeline {
    pub fn new(fetch_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()?;
        Ok(Self { http })
    }

    /// Run the full ingress pipeline on one request.
    pub async fn process(
        &self,
        request: MediaRequest,
        cancel: &CancellationToken,
    ) -> Result<ProcessedMedia> {
        let started = Instant::now();
        let source = select_source(&request)?;
        let source_tag = source.tag();

        let (bytes, source_filename, transport_mime) = match source {
            MediaSource::DataUrl(raw) => {
                let decoded = decode_data_url(&raw)?;
                (Bytes::from(decoded), None, None)
            }
            MediaSource::HttpUrl(url) => {
                let (bytes, name, mime) = self.fetch(&url, cancel).await?;
                (bytes, name, mime)
            }
            MediaSource::Upload { bytes, filename } => {
                if bytes.len() as u64 > SIZE_CEILING {
                    return Err(oversize(bytes.len() as u64));
                }
                (bytes, filename, None)
            }
        };
        if bytes.is_empty() {
            return Err(MediaError::EmptyPayload.into());
        }

        let filename = request.filename.or(source_filename);
        let mime_type = detect_mime(&bytes, filename.as_deref(), transport_mime.as_deref());
        let size = bytes.len() as u64;

        let category = match request.category {
            Some(explicit) => {
                if !explicit.accepts(&mime_type) {
                    return Err(MediaError::UnsupportedMime(mime_type).into());
                }
                explicit
            }
            None => {
                let derived = category_for_mime(&mime_type)
                    .ok_or_else(|| MediaError::UnsupportedMime(mime_type.clone()))?;
                promote_sticker(derived, &mime_type, size, filename.as_deref())
            }
        };

        let limit = category.max_size();
        if size > limit {
            return Err(MediaError::FileTooLarge {
                category: category.as_str(),
                size,
                limit,
            }
            .into());
        }

        Ok(ProcessedMedia {
            bytes,
            mime_type,
            category,
            size,
            filename,
            source_tag,
            processing_latency: started.elapsed(),
        })
    }

    async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(Bytes, Option<String>, Option<String>)> {
        if url.len() > URL_MAX_LEN
            || !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(MediaError::InvalidUrl(truncate(url)).into());
        }
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::DownloadFailed {
                status: status.as_u16(),
            }
            .into());
        }
        let transport_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let filename = filename_from_url(url);

        let mut buf: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::ShuttingDown),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(part)) => {
                    if (buf.len() + part.len()) as u64 > SIZE_CEILING {
                        return Err(oversize((buf.len() + part.len()) as u64));
                    }
                    buf.extend_from_slice(&part);
                }
                Some(Err(e)) => {
                    return Err(UpstreamError::Unreachable(e.to_string()).into());
                }
                None => break,
            }
        }
        Ok((Bytes::from(buf), filename, transport_mime))
    }
}

fn select_source(request: &MediaRequest) -> Result<MediaSource> {
    let mut selected = None;
    let mut count = 0usize;
    if let Some(raw) = &request.data_url {
        selected = Some(MediaSource::DataUrl(raw.clone()));
        count += 1;
    }
    if let Some(url) = &request.http_url {
        selected = Some(MediaSource::HttpUrl(url.clone()));
        count += 1;
    }
    if let Some(upload) = &request.upload {
        selected = Some(upload.clone());
        count += 1;
    }
    if count > 1 {
        return Err(MediaError::Conflict.into());
    }
    selected.ok_or_else(|| MediaError::Required.into())
}

fn decode_data_url(raw: &str) -> Result<Vec<u8>> {
    let rest = raw.strip_prefix("data:").ok_or(MediaError::InvalidBase64)?;
    let (meta, payload) = rest.split_once(',').ok_or(MediaError::InvalidBase64)?;
    if !meta.ends_with(";base64") {
        return Err(MediaError::InvalidBase64.into());
    }
    // 4 base64 chars decode to at most 3 bytes; bound before decoding.
    let estimated = payload.len() as u64 / 4 * 3;
    if estimated > SIZE_CEILING {
        return Err(oversize(estimated));
    }
    BASE64_STANDARD
        .decode(payload)
        .map_err(|_| MediaError::InvalidBase64.into())
}

fn promote_sticker(
    derived: MediaCategory,
    mime: &str,
    size: u64,
    filename: Option<&str>,
) -> MediaCategory {
    if derived == MediaCategory::Image
        && mime == "image/webp"
        && (size < STICKER_PROMOTION_MAX
            || filename.is_some_and(|n| n.to_ascii_lowercase().contains("sticker")))
    {
        return MediaCategory::Sticker;
    }
    derived
}

fn oversize(size: u64) -> Error {
    MediaError::FileTooLarge {
        category: "media",
        size,
        limit: SIZE_CEILING,
    }
    .into()
}

fn filename_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next()?;
    let after_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    let (_, path) = after_scheme.split_once('/')?;
    let segment = path.rsplit('/').next()?;
    (!segment.is_empty() && segment.contains('.')).then(|| segment.to_string())
}

fn truncate(url: &str) -> String {
    let mut s: String = url.chars().take(120).collect();
    if s.len() < url.len() {
        s.push_str("...");
    }
    s
}
