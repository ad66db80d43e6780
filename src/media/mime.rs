//! MIME detection and the closed category tables.

use crate::types::MessageKind;
use serde::{Deserialize, Serialize};

/// WhatsApp message category for media payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Audio,
    Video,
    Document,
    Sticker,
}

impl MediaCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
            Self::Sticker => "sticker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            "document" => Some(Self::Document),
            "sticker" => Some(Self::Sticker),
            _ => None,
        }
    }

    pub fn message_kind(&self) -> MessageKind {
        match self {
            Self::Image => MessageKind::Image,
            Self::Audio => MessageKind::Audio,
            Self::Video => MessageKind::Video,
            Self::Document => MessageKind::Document,
            Self::Sticker => MessageKind::Sticker,
        }
    }

    /// Hard per-category size limit in bytes.
    pub fn max_size(&self) -> u64 {
        match self {
            Self::Image => 16 * MIB,
            Self::Audio => 16 * MIB,
            Self::Video => 64 * MIB,
            Self::Document => 100 * MIB,
            Self::Sticker => 500 * KIB,
        }
    }

    /// Whether `mime` belongs to this category's closed set.
    pub fn accepts(&self, mime: &str) -> bool {
        let table: &[&str] = match self {
            Self::Image => IMAGE_MIMES,
            Self::Audio => AUDIO_MIMES,
            Self::Video => VIDEO_MIMES,
            Self::Document => DOCUMENT_MIMES,
            Self::Sticker => STICKER_MIMES,
        };
        table.contains(&mime)
    }
}

impl std::fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

/// Largest per-category limit; the materialization ceiling.
pub const SIZE_CEILING: u64 = 100 * MIB;

const IMAGE_MIMES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

const AUDIO_MIMES: &[&str] = &[
    "audio/aac",
    "audio/mp4",
    "audio/mpeg",
    "audio/amr",
    "audio/ogg",
    "application/ogg",
];

const VIDEO_MIMES: &[&str] = &["video/mp4", "video/3gpp"];

const DOCUMENT_MIMES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/plain",
];

const STICKER_MIMES: &[&str] = &["image/webp"];

/// Derive the default category for a detected MIME.
pub fn category_for_mime(mime: &str) -> Option<MediaCategory> {
    if IMAGE_MIMES.contains(&mime) {
        Some(MediaCategory::Image)
    } else if AUDIO_MIMES.contains(&mime) {
        Some(MediaCategory::Audio)
    } else if VIDEO_MIMES.contains(&mime) {
        Some(MediaCategory::Video)
    } else if DOCUMENT_MIMES.contains(&mime) {
        Some(MediaCategory::Document)
    } else {
        None
    }
}

/// Sniffing bytes considered by the detector.
const SNIFF_LEN: usize = 512;

/// Detect the payload MIME. Primary: content sniffing. Secondary: filename
/// extension when sniffing is inconclusive. Tertiary: transport-supplied
/// content type (URL source only).
pub fn detect_mime(bytes: &[u8], filename: Option<&str>, transport: Option<&str>) -> String {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    let sniffed = infer::get(head)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    if sniffed != "application/octet-stream" && sniffed != "text/plain" {
        return sniffed;
    }
    if let Some(name) = filename {
        if let Some(guessed) = mime_guess::from_path(name).first_raw() {
            return guessed.to_string();
        }
    }
    if let Some(ct) = transport {
        // Strip any charset parameter.
        let bare = ct.split(';').next().unwrap_or(ct).trim();
        if !bare.is_empty() {
            return bare.to_ascii_lowercase();
        }
    }
    sniffed
}
