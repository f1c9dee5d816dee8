//! Flat form input and its translation into a [`SwapRequest`].
//!
//! Callers submit faces as comma separated lists. Each entry is classified
//! by shape: an `http(s)://` URL, a timestamp (frame of the target video),
//! or otherwise the name of an uploaded file.

use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::request::{
    FaceSource, FaceSwap, FileRef, MediaKind, RequestError, SwapRequest, TargetMedia, TargetSource,
};
use crate::timestamp::{is_timestamp, Timestamp};

/// Default limit on the combined size of uploaded files.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10_000_000;

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^http(s)?://").expect("url regex is valid"))
}

/// Returns true if `text` looks like a remote URL.
pub fn is_url(text: &str) -> bool {
    url_pattern().is_match(text)
}

/// Form fields for a swap submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SwapForm {
    /// URL of the target media, or the name of an uploaded file.
    pub target_media: Option<String>,
    /// Comma separated source faces.
    pub source_faces: Option<String>,
    /// Comma separated target faces, paired with source faces by position.
    #[serde(default)]
    pub target_faces: Option<String>,
    /// Trim start (video only), `[H:][M:]S[.fff]`.
    #[serde(default)]
    pub target_start_time: Option<String>,
    /// Trim end (video only), `[H:][M:]S[.fff]`.
    #[serde(default)]
    pub target_end_time: Option<String>,
    #[serde(default)]
    pub super_resolution: bool,
}

impl SwapForm {
    /// Validate the form and build a request with a fresh ID.
    ///
    /// `upload_bytes` is the combined size of the files submitted with the form.
    pub fn into_request(
        self,
        kind: MediaKind,
        upload_bytes: u64,
        max_upload_bytes: u64,
    ) -> Result<SwapRequest, RequestError> {
        let target_media = non_empty(self.target_media).ok_or(RequestError::MissingField("target media"))?;
        let start = parse_time("start", self.target_start_time)?;
        let end = parse_time("end", self.target_end_time)?;
        let source_faces = non_empty(self.source_faces).ok_or(RequestError::MissingField("source faces"))?;

        if upload_bytes > max_upload_bytes {
            return Err(RequestError::UploadTooLarge {
                actual: upload_bytes,
                max: max_upload_bytes,
            });
        }

        let source = if is_url(&target_media) {
            TargetSource::Url(target_media)
        } else {
            TargetSource::Upload(FileRef::Name(target_media))
        };

        let target_ids: Vec<&str> = self
            .target_faces
            .as_deref()
            .map(|t| t.split(',').map(str::trim).collect())
            .unwrap_or_default();

        // An empty target entry skips that position; an empty source is an error.
        let swaps = source_faces
            .split(',')
            .map(str::trim)
            .enumerate()
            .map(|(i, id)| {
                if id.is_empty() {
                    return Err(RequestError::EmptySourceFace { position: i });
                }
                let target = target_ids
                    .get(i)
                    .filter(|t| !t.is_empty())
                    .map(|t| classify_face(t));
                Ok(FaceSwap {
                    source: classify_face(id),
                    target,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let request = SwapRequest::new(
            TargetMedia {
                kind,
                source,
                start,
                end,
            },
            swaps,
            self.super_resolution,
        );
        request.validate()?;
        Ok(request)
    }
}

/// Classify one face identifier.
pub fn classify_face(id: &str) -> FaceSource {
    if is_url(id) {
        return FaceSource::Url(id.to_string());
    }
    if is_timestamp(id) {
        if let Ok(ts) = Timestamp::parse(id) {
            return FaceSource::FrameAt(ts);
        }
    }
    FaceSource::Upload(FileRef::Name(id.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_time(field: &'static str, value: Option<String>) -> Result<Option<Timestamp>, RequestError> {
    match non_empty(value) {
        None => Ok(None),
        Some(text) => Timestamp::parse(&text)
            .map(Some)
            .map_err(|source| RequestError::InvalidTime { field, source }),
    }
}
