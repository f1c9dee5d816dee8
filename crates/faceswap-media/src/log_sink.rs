//! Best-effort audit log collaborator.
//!
//! Every external invocation is written here before it runs. Sinks must not
//! fail the caller: implementations swallow their own errors.

use std::sync::Arc;

use tracing::info;

/// Destination for free-form audit lines.
pub trait LogSink: Send + Sync {
    fn log(&self, text: &str);
}

/// Default sink: emits on the `faceswap::audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, text: &str) {
        info!(target: "faceswap::audit", "{}", text);
    }
}

/// Shared handle to the default sink.
pub fn default_sink() -> Arc<dyn LogSink> {
    Arc::new(TracingLogSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_sink_never_panics_without_subscriber() {
        let sink = default_sink();
        sink.log("Will execute: ffprobe -version");
    }
}
