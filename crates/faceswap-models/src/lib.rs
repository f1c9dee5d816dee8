//! Shared data models for the face swap pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Swap requests, target media and face sources
//! - Request IDs and the timestamp grammar
//! - Form input shaping and validation
//! - The outward-facing response

pub mod form;
pub mod request;
pub mod response;
pub mod timestamp;

// Re-export common types
pub use form::{classify_face, is_url, SwapForm, DEFAULT_MAX_UPLOAD_BYTES};
pub use request::{
    FaceSource, FaceSwap, FileRef, MediaKind, RequestError, RequestId, SwapRequest, TargetMedia,
    TargetSource,
};
pub use response::{tail_chars, SwapResponse};
pub use timestamp::{parse_timestamp, Timestamp, TimestampError};
