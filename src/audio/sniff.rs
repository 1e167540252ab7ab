//! # Content Validation
//!
//! Classifies payloads by their actual bytes (magic numbers), never by filename,
//! extension or a declared `Content-Type` header. Each ingestion channel has its own
//! allow-list; anything outside it is rejected before it can be stored.

use crate::session::{SessionError, SessionResult};

/// Audio types the clip pipeline accepts (mpeg / wav / ogg / aac family).
pub const AUDIO_ALLOW_LIST: &[&str] = &[
    "audio/mpeg",
    "audio/x-wav",
    "audio/wav",
    "audio/ogg",
    "audio/aac",
    "audio/m4a",
    "audio/mp4",
];

/// Image types. No ingestion channel accepts images yet, so this list only backs the
/// validator's own checks.
#[cfg(test)]
pub const IMAGE_ALLOW_LIST: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Which allow-list a payload is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Audio,
    #[cfg(test)]
    Image,
}

impl PayloadKind {
    pub fn allow_list(self) -> &'static [&'static str] {
        match self {
            PayloadKind::Audio => AUDIO_ALLOW_LIST,
            #[cfg(test)]
            PayloadKind::Image => IMAGE_ALLOW_LIST,
        }
    }

    pub fn permits(self, content_type: &str) -> bool {
        self.allow_list().contains(&content_type)
    }
}

/// Sniff the MIME type of `bytes`, `None` if the content is not recognised.
pub fn detect(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).map(|kind| kind.mime_type())
}

/// Sniff `bytes` and require the result to be on the allow-list for `kind`.
///
/// ## Returns:
/// - **Ok(content_type)**: the detected MIME type
/// - **Err(Validation)**: names the detected type and the allowed set
pub fn validate(bytes: &[u8], kind: PayloadKind) -> SessionResult<&'static str> {
    if bytes.is_empty() {
        return Err(SessionError::Validation("payload is empty".to_string()));
    }
    match detect(bytes) {
        Some(content_type) if kind.permits(content_type) => Ok(content_type),
        detected => Err(SessionError::unsupported_content(detected, kind.allow_list())),
    }
}

/// Preferred file extension for a detected content type.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "audio/mpeg" => Some("mp3"),
        "audio/x-wav" | "audio/wav" => Some("wav"),
        "audio/ogg" => Some("ogg"),
        "audio/aac" => Some("aac"),
        "audio/m4a" | "audio/mp4" => Some("m4a"),
        _ => None,
    }
}
