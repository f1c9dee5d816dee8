//! Media transform adapter over ffmpeg/ffprobe.
//!
//! Every operation is one fixed command line run through a [`ProcessRunner`].
//! A nonzero exit fails the operation with the captured stderr attached.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::command::{command_line, FfmpegCommand};
use crate::error::{MediaError, MediaResult};
use crate::shell::{ProcessOutcome, ProcessRunner, Silent};

/// What a probed file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbedKind {
    Video,
    Image,
    Unknown,
}

/// FFprobe JSON output for kind detection.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
}

/// Wraps the media toolkit binaries.
#[derive(Clone)]
pub struct MediaToolkit {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg: String,
    ffprobe: String,
}

impl MediaToolkit {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }

    /// Override the binary names (or absolute paths).
    pub fn with_binaries(mut self, ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    /// Save the frame at `timestamp` as a still image.
    pub async fn extract_frame(&self, video: &Path, timestamp: &str, out: &Path) -> MediaResult<()> {
        debug!(video = %video.display(), timestamp, "Extracting frame");
        let cmd = FfmpegCommand::new(video, out).seek(timestamp).single_frame();
        self.ffmpeg(cmd).await
    }

    /// Cut `[start, end]` out of `video` without re-encoding.
    pub async fn trim(&self, video: &Path, start: &str, end: &str, out: &Path) -> MediaResult<()> {
        info!(video = %video.display(), start, end, "Trimming video");
        let cmd = FfmpegCommand::new(video, out)
            .seek(start)
            .until(end)
            .stream_copy();
        self.ffmpeg(cmd).await
    }

    /// Mux the first video stream of `video` with the audio of `audio_source`.
    ///
    /// The audio map is optional so sources without sound still succeed.
    pub async fn merge_audio(&self, video: &Path, audio_source: &Path, out: &Path) -> MediaResult<()> {
        info!(video = %video.display(), audio = %audio_source.display(), "Merging audio");
        let cmd = FfmpegCommand::new(video, out)
            .input(audio_source)
            .output_args(["-c:v", "copy"])
            .map("0:v:0")
            .map("1:a:0?");
        self.ffmpeg(cmd).await
    }

    /// Re-encode the video stream with `codec`, copying audio.
    pub async fn change_codec(&self, video: &Path, codec: &str, out: &Path) -> MediaResult<()> {
        info!(video = %video.display(), codec, "Changing video codec");
        let cmd = FfmpegCommand::new(video, out)
            .video_codec(codec)
            .audio_codec("copy");
        self.ffmpeg(cmd).await
    }

    /// Duration in seconds, or 0 when ffprobe reports nothing parsable.
    pub async fn probe_duration(&self, video: &Path) -> MediaResult<f64> {
        let outcome = self
            .ffprobe([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ], video)
            .await?;
        Ok(outcome.stdout.trim().parse::<f64>().unwrap_or(0.0))
    }

    /// Classify a file as video, still image, or neither.
    pub async fn probe_media_kind(&self, path: &Path) -> MediaResult<ProbedKind> {
        let outcome = self
            .ffprobe([
                "-v",
                "error",
                "-show_entries",
                "stream=codec_name,codec_type:format=format_name",
                "-of",
                "json",
            ], path)
            .await?;
        let parsed: FfprobeOutput = serde_json::from_str(&outcome.stdout)?;
        Ok(classify(&parsed))
    }

    /// Codec name of the first video stream.
    pub async fn probe_video_codec(&self, video: &Path) -> MediaResult<String> {
        let outcome = self
            .ffprobe([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=codec_name",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ], video)
            .await?;
        Ok(outcome.stdout.trim().to_string())
    }

    /// Re-encode into `out` only if the current codec differs from `desired`.
    ///
    /// Returns true if `out` was written.
    pub async fn ensure_video_codec(&self, video: &Path, desired: &str, out: &Path) -> MediaResult<bool> {
        let current = self.probe_video_codec(video).await?;
        if current.eq_ignore_ascii_case(desired) {
            debug!(codec = %current, "Video codec already matches");
            return Ok(false);
        }
        self.change_codec(video, desired, out).await?;
        Ok(true)
    }

    async fn ffmpeg(&self, cmd: FfmpegCommand) -> MediaResult<()> {
        let line = cmd.to_command_line(&self.ffmpeg);
        let outcome = self.runner.run(&line, None, &Silent).await?;
        if !outcome.success() {
            return Err(MediaError::ffmpeg_failed(
                format!("'{}' exited with {:?}", line, outcome.exit_code),
                Some(outcome.combined_output()),
                outcome.exit_code,
            ));
        }
        Ok(())
    }

    async fn ffprobe<const N: usize>(&self, args: [&str; N], path: &Path) -> MediaResult<ProcessOutcome> {
        let path = path.to_string_lossy();
        let line = command_line(&self.ffprobe, args.iter().copied().chain([&*path]));
        let outcome = self.runner.run(&line, None, &Silent).await?;
        if !outcome.success() {
            return Err(MediaError::ffprobe_failed(
                format!("'{}' exited with {:?}", line, outcome.exit_code),
                Some(outcome.combined_output()),
            ));
        }
        Ok(outcome)
    }
}

fn classify(output: &FfprobeOutput) -> ProbedKind {
    let format = output
        .format
        .as_ref()
        .and_then(|f| f.format_name.as_deref())
        .unwrap_or_default();
    if format == "image2" || format.ends_with("_pipe") {
        return ProbedKind::Image;
    }
    let has_video = output
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("video"));
    if has_video {
        ProbedKind::Video
    } else {
        ProbedKind::Unknown
    }
}
