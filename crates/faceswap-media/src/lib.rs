//! External tool plumbing for the face-swap worker.
//!
//! This crate provides:
//! - A shell process runner with streaming output, timeouts and tree kill
//! - FFmpeg/FFprobe transforms and probes
//! - A yt-dlp video fetcher with injected caches
//! - An HTTP image fetcher

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod image;
pub mod log_sink;
pub mod shell;
pub mod transform;
pub mod ytdlp;

pub use command::{check_tools, command_line, FfmpegCommand, ToolStatus};
pub use error::{MediaError, MediaResult};
pub use image::ImageFetcher;
pub use log_sink::{default_sink, LogSink, TracingLogSink};
pub use shell::{
    quote, sanitize_file_name, OutputObserver, OutputStream, ProcessOutcome, ProcessRunner, Shell,
    ShellRunner, Silent,
};
pub use transform::{MediaToolkit, ProbedKind};
pub use ytdlp::{DownloadLocks, VideoFetcher, VideoInfo, VideoInfoCache};
