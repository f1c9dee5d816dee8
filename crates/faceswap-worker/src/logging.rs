//! Structured request logging utilities.

use std::fmt;
use std::sync::Mutex;

use faceswap_models::{MediaKind, RequestId};
use tracing::{error, info, warn, Span};

/// Pipeline stage a request is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    ResolveTarget,
    Trim,
    CheckTarget,
    SourceFaces,
    TargetFaces,
    Inference,
    PostProcess,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::ResolveTarget => "resolve_target",
            Stage::Trim => "trim",
            Stage::CheckTarget => "check_target",
            Stage::SourceFaces => "source_faces",
            Stage::TargetFaces => "target_faces",
            Stage::Inference => "inference",
            Stage::PostProcess => "post_process",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request logger tagging every event with the request ID, the target kind
/// and the stage the request last entered.
#[derive(Debug)]
pub struct RequestLogger {
    request_id: String,
    kind: &'static str,
    stage: Mutex<Stage>,
}

impl RequestLogger {
    pub fn new(request_id: &RequestId, kind: MediaKind) -> Self {
        Self {
            request_id: request_id.to_string(),
            kind: kind.as_str(),
            stage: Mutex::new(Stage::Validate),
        }
    }

    fn current(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that the request moved on to `stage`.
    pub fn enter(&self, stage: Stage) {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner()) = stage;
        info!(
            request_id = %self.request_id,
            kind = self.kind,
            stage = %stage,
            "Stage started"
        );
    }

    pub fn log_start(&self, message: &str) {
        info!(
            request_id = %self.request_id,
            kind = self.kind,
            "Request started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            request_id = %self.request_id,
            kind = self.kind,
            stage = %self.current(),
            "Request progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            request_id = %self.request_id,
            kind = self.kind,
            stage = %self.current(),
            "Request warning: {}", message
        );
    }

    /// Logs against the stage the request was in when it failed.
    pub fn log_error(&self, message: &str) {
        error!(
            request_id = %self.request_id,
            kind = self.kind,
            stage = %self.current(),
            "Request error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            request_id = %self.request_id,
            kind = self.kind,
            "Request completed: {}", message
        );
    }

    /// Span carrying the request context, for instrumenting futures.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("request", request_id = %self.request_id, kind = self.kind)
    }
}
