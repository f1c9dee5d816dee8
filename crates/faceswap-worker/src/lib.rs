//! Face-swap worker.
//!
//! This crate provides:
//! - The request pipeline driving yt-dlp, ffmpeg and the inference tool
//! - Per-request staging layout, download lookup and retention purge
//! - Environment configuration and structured request logging

pub mod config;
pub mod error;
pub mod inference;
pub mod logging;
pub mod pipeline;
pub mod staging;
pub mod uploads;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use inference::InferenceJob;
pub use logging::{RequestLogger, Stage};
pub use pipeline::{PipelineResult, SwapPipeline};
pub use staging::{FaceRole, PurgeReport, StagingLayout};
pub use uploads::{UploadSet, UploadedFile};
