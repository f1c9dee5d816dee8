//! Swap request definitions.

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::timestamp::{Timestamp, OPEN_END};

/// Unique identifier for a swap request.
///
/// Eight lowercase hex characters. It doubles as the staging directory name
/// and the public download handle, so parsing is strict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new random request ID.
    pub fn new() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(simple[..8].to_string())
    }

    /// Parse an externally supplied request ID.
    pub fn parse(s: &str) -> Result<Self, RequestError> {
        let valid = s.len() == 8
            && s
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(RequestError::InvalidRequestId(s.to_string()))
        }
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl JsonSchema for RequestId {
    fn schema_name() -> String {
        "RequestId".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

impl TryFrom<String> for RequestId {
    type Error = RequestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RequestId> for String {
    fn from(value: RequestId) -> Self {
        value.0
    }
}

/// Kind of target media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }

    /// Extension used when nothing better is known.
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Video => "mp4",
            MediaKind::Image => "jpg",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a file in the upload set that accompanies a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FileRef {
    /// Matched case-insensitively against uploaded file names.
    Name(String),
    /// Position in the upload set.
    Index(usize),
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileRef::Name(name) => write!(f, "file '{}'", name),
            FileRef::Index(index) => write!(f, "file #{}", index),
        }
    }
}

/// Where the target media comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TargetSource {
    /// Remote video page or direct image URL.
    Url(String),
    /// Uploaded alongside the request.
    Upload(FileRef),
}

/// The media whose faces are replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TargetMedia {
    pub kind: MediaKind,
    pub source: TargetSource,
    /// Trim start (video only). Missing means start of media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Timestamp>,
    /// Trim end (video only). Missing means open-ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl TargetMedia {
    /// Trim range to apply, if any. Images are never trimmed.
    pub fn trim_range(&self) -> Option<(Timestamp, Timestamp)> {
        if self.kind != MediaKind::Video || (self.start.is_none() && self.end.is_none()) {
            return None;
        }
        let start = self
            .start
            .clone()
            .unwrap_or_else(|| Timestamp::from_seconds(0.0));
        let end = self.end.clone().unwrap_or_else(open_end);
        Some((start, end))
    }
}

fn open_end() -> Timestamp {
    Timestamp::parse(OPEN_END).unwrap_or_else(|_| Timestamp::from_seconds(3600.0))
}

/// Where a face image comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FaceSource {
    /// Image downloaded from a URL.
    Url(String),
    /// Image uploaded alongside the request.
    Upload(FileRef),
    /// Still sampled from the (untrimmed) target video.
    FrameAt(Timestamp),
}

impl FaceSource {
    pub fn is_frame(&self) -> bool {
        matches!(self, FaceSource::FrameAt(_))
    }
}

/// One face replacement: a source face and an optional face to replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FaceSwap {
    pub source: FaceSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<FaceSource>,
}

/// A request to replace faces on a target media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SwapRequest {
    pub id: RequestId,
    pub target: TargetMedia,
    pub swaps: Vec<FaceSwap>,
    #[serde(default)]
    pub super_resolution: bool,
}

impl SwapRequest {
    /// Create a request with a fresh ID.
    pub fn new(target: TargetMedia, swaps: Vec<FaceSwap>, super_resolution: bool) -> Self {
        Self {
            id: RequestId::new(),
            target,
            swaps,
            super_resolution,
        }
    }

    /// Check the structural rules that do not need any I/O.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.swaps.is_empty() {
            return Err(RequestError::MissingField("source faces"));
        }
        if self.target.kind == MediaKind::Image {
            let uses_frames = self
                .swaps
                .iter()
                .any(|s| s.source.is_frame() || s.target.as_ref().is_some_and(FaceSource::is_frame));
            if uses_frames {
                return Err(RequestError::FrameFromImage);
            }
        }
        Ok(())
    }
}

/// Errors raised while shaping or validating a request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("Missing {0}")]
    MissingField(&'static str),

    #[error("Invalid target {field} time: {source}")]
    InvalidTime {
        field: &'static str,
        #[source]
        source: crate::timestamp::TimestampError,
    },

    #[error("Invalid request ID: {0}")]
    InvalidRequestId(String),

    #[error("Maximum upload size reached ({actual} > {max} bytes)")]
    UploadTooLarge { actual: u64, max: u64 },

    #[error("Frame-at-time faces require a video target")]
    FrameFromImage,

    #[error("Source face {position} is empty")]
    EmptySourceFace { position: usize },
}
