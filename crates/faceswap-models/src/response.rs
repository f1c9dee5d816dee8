//! Outward-facing response for a processed request.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::request::RequestId;

/// Maximum number of trailing characters of error output returned to callers.
pub const MAX_ERROR_OUTPUT_CHARS: usize = 4096;

/// Response for a request that went through the pipeline.
///
/// `success == false` means "processed but unsuccessful"; rejected requests
/// never produce one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SwapResponse {
    pub request_id: RequestId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub error_output: String,
}

impl SwapResponse {
    pub fn new(request_id: RequestId, success: bool, file_name: Option<String>, stderr: &str) -> Self {
        Self {
            request_id,
            success,
            file_name: if success { file_name } else { None },
            error_output: tail_chars(stderr, MAX_ERROR_OUTPUT_CHARS).to_string(),
        }
    }
}

/// Last `max` characters of `text`.
pub fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    let offset = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[offset..]
}
