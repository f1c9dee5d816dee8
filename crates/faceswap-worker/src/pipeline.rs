//! The request pipeline.
//!
//! Stages run strictly in order:
//!
//! 1. resolve the target media (fetch, reuse the cache, or stage an upload)
//! 2. trim it (video only)
//! 3. validate it (exists, kind, duration ceiling)
//! 4. resolve source faces (`FS_nn`)
//! 5. resolve target faces (`FT_nn`)
//! 6. run the inference session
//! 7. re-merge audio and transcode (video only)
//! 8. record the delivered file
//!
//! Stages 1 to 5 fail with `Err`. Stages 6 to 8 report failure through
//! [`PipelineResult`] so callers get the tool diagnostics.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use faceswap_media::fs_utils::{is_nonempty_file, remove_quietly};
use faceswap_media::{
    DownloadLocks, ImageFetcher, LogSink, MediaResult, MediaToolkit, OutputStream, ProbedKind,
    ProcessOutcome, ProcessRunner, ShellRunner, VideoFetcher, VideoInfoCache,
};
use faceswap_models::{FaceSource, MediaKind, RequestId, SwapRequest, SwapResponse, TargetSource};
use serde::Serialize;
use tokio::fs;
use tracing::Instrument;
use url::Url;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::inference::InferenceJob;
use crate::logging::{RequestLogger, Stage};
use crate::staging::{derived_path, FaceRole, StagingLayout};
use crate::uploads::UploadSet;

/// Outcome of a request that reached the inference stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    /// Delivered file; `None` on failure.
    pub output_path: Option<PathBuf>,
    pub stdout: String,
    pub stderr: String,
}

impl PipelineResult {
    pub fn file_name(&self) -> Option<String> {
        self.output_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    pub fn to_response(&self, request_id: &RequestId) -> SwapResponse {
        SwapResponse::new(request_id.clone(), self.success, self.file_name(), &self.stderr)
    }
}

/// Orchestrates the external tools for one request at a time.
///
/// Cheap to clone; clones share the fetcher caches.
#[derive(Clone)]
pub struct SwapPipeline {
    config: WorkerConfig,
    layout: StagingLayout,
    runner: Arc<dyn ProcessRunner>,
    toolkit: MediaToolkit,
    videos: VideoFetcher,
    images: ImageFetcher,
    log: Arc<dyn LogSink>,
}

impl SwapPipeline {
    pub fn new(
        config: WorkerConfig,
        runner: Arc<dyn ProcessRunner>,
        images: ImageFetcher,
        info_cache: VideoInfoCache,
        locks: DownloadLocks,
        log: Arc<dyn LogSink>,
    ) -> Self {
        let layout = StagingLayout::new(&config.root_path);
        let toolkit = MediaToolkit::new(runner.clone());
        let videos = VideoFetcher::new(runner.clone(), layout.video_cache_root(), info_cache, locks)
            .with_tool(&config.ytdlp_tool)
            .with_max_filesize(&config.download_max_filesize);
        Self {
            config,
            layout,
            runner,
            toolkit,
            videos,
            images,
            log,
        }
    }

    /// Pipeline over the host shell with fresh caches.
    pub fn from_config(config: WorkerConfig, log: Arc<dyn LogSink>) -> WorkerResult<Self> {
        let runner = Arc::new(ShellRunner::new(log.clone()));
        let images = ImageFetcher::new()?;
        Ok(Self::new(
            config,
            runner,
            images,
            VideoInfoCache::new(),
            DownloadLocks::new(),
            log,
        ))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    /// Resolve a delivered file; see [`StagingLayout::path_for_download`].
    pub async fn path_for_download(&self, request_id: &str, file_name: &str) -> Option<PathBuf> {
        self.layout.path_for_download(request_id, file_name).await
    }

    /// Run every stage for `request`.
    pub async fn process(&self, request: &SwapRequest, uploads: &UploadSet) -> WorkerResult<PipelineResult> {
        let logger = RequestLogger::new(&request.id, request.target.kind);
        let span = logger.create_span();

        let outcome = self
            .run_stages(request, uploads, &logger)
            .instrument(span)
            .await;

        let label = match &outcome {
            Ok(result) if result.success => "success",
            Ok(_) => "failure",
            Err(_) => "rejected",
        };
        metrics::counter!("faceswap_requests_total", "outcome" => label).increment(1);

        match &outcome {
            Ok(result) => {
                if let Ok(json) = serde_json::to_string(&result.to_response(&request.id)) {
                    self.log.log(&format!("Result: {}", json));
                }
                if result.success {
                    logger.log_completion(&result.file_name().unwrap_or_default());
                } else {
                    logger.log_warning("request processed without a deliverable output");
                }
            }
            Err(e) => logger.log_error(&e.to_string()),
        }
        outcome
    }

    async fn run_stages(
        &self,
        request: &SwapRequest,
        uploads: &UploadSet,
        logger: &RequestLogger,
    ) -> WorkerResult<PipelineResult> {
        logger.enter(Stage::Validate);
        request.validate()?;
        if let Ok(json) = serde_json::to_string(request) {
            self.log.log(&format!("Request: {}", json));
        }
        logger.log_start(&format!("{} swap unit(s)", request.swaps.len()));

        let id = &request.id;
        let kind = request.target.kind;
        fs::create_dir_all(self.layout.request_dir(id)).await?;

        logger.enter(Stage::ResolveTarget);
        let original = self.resolve_target(request, uploads).await?;
        logger.log_progress(&format!("target at {}", original.display()));

        let target = match request.target.trim_range() {
            Some((start, end)) => {
                logger.enter(Stage::Trim);
                let ext = original
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| kind.default_extension().to_string());
                let out = self.layout.trimmed(id, &ext);
                self.toolkit
                    .trim(&original, start.as_str(), end.as_str(), &out)
                    .await?;
                out
            }
            None => original.clone(),
        };

        logger.enter(Stage::CheckTarget);
        self.validate_target(&target, kind).await?;

        logger.enter(Stage::SourceFaces);
        let mut source_faces = Vec::with_capacity(request.swaps.len());
        for (index, swap) in request.swaps.iter().enumerate() {
            let path = self
                .resolve_face(id, &swap.source, FaceRole::Source, index, &original, uploads)
                .await?;
            source_faces.push(path);
        }

        logger.enter(Stage::TargetFaces);
        let mut target_faces = Vec::new();
        for (index, swap) in request.swaps.iter().enumerate() {
            if let Some(face) = &swap.target {
                let path = self
                    .resolve_face(id, face, FaceRole::Target, index, &original, uploads)
                    .await?;
                target_faces.push(path);
            }
        }
        logger.log_progress(&format!(
            "{} source face(s), {} target face(s) staged",
            source_faces.len(),
            target_faces.len()
        ));

        let job = InferenceJob {
            kind,
            target: target.clone(),
            source_faces,
            target_faces,
            super_resolution: request.super_resolution,
            output: self.layout.output(id, kind, request.super_resolution),
        };
        logger.enter(Stage::Inference);
        let (mut result, outcome) = self.run_inference(&job).await;
        if outcome.as_ref().is_some_and(|o| o.timed_out) {
            // A killed session may have left a truncated file behind.
            remove_quietly(&job.output).await;
            append_line(
                &mut result.stderr,
                &format!(
                    "inference timed out after {}s and was killed",
                    self.config.process_timeout.as_secs()
                ),
            );
            logger.log_error("inference session timed out");
            return Ok(result);
        }

        let mut output = job.output.clone();
        if kind == MediaKind::Video && output.exists() {
            logger.enter(Stage::PostProcess);
            match self.post_process(&output, &target).await {
                Ok(delivered) => output = delivered,
                Err(e) => {
                    logger.log_error(&format!("post-processing failed: {}", e));
                    append_line(&mut result.stderr, &e.to_string());
                    if let Some(captured) = e.captured_output() {
                        append_line(&mut result.stderr, captured);
                    }
                    return Ok(result);
                }
            }
        }

        logger.enter(Stage::Finalize);
        if is_nonempty_file(&output).await {
            match self.layout.write_pointer(id, &output).await {
                Ok(()) => {
                    result.success = true;
                    result.output_path = Some(output);
                }
                Err(e) => append_line(&mut result.stderr, &e.to_string()),
            }
        }
        Ok(result)
    }

    async fn resolve_target(&self, request: &SwapRequest, uploads: &UploadSet) -> WorkerResult<PathBuf> {
        let kind = request.target.kind;
        let stem = self.layout.target_stem(&request.id);
        match &request.target.source {
            TargetSource::Url(raw) => {
                let url = parse_url(raw)?;
                match kind {
                    MediaKind::Video => self.fetch_video(&url).await,
                    MediaKind::Image => Ok(self.images.download(&url, &stem).await?),
                }
            }
            TargetSource::Upload(file) => {
                let upload = uploads.require(file)?;
                upload.stage(&stem, kind.default_extension()).await
            }
        }
    }

    /// Reuse the cached download, or check the remote duration before
    /// fetching it.
    async fn fetch_video(&self, url: &Url) -> WorkerResult<PathBuf> {
        if !self.videos.local_path(url).exists() {
            let info = self.videos.get_video_info(url).await?;
            self.check_duration(info.duration_secs)?;
        }
        Ok(self.videos.download(url).await?)
    }

    fn check_duration(&self, actual: u64) -> WorkerResult<()> {
        if actual > self.config.max_duration_secs {
            return Err(WorkerError::DurationExceeded {
                actual,
                max: self.config.max_duration_secs,
            });
        }
        Ok(())
    }

    async fn validate_target(&self, path: &Path, kind: MediaKind) -> WorkerResult<()> {
        if !is_nonempty_file(path).await {
            return Err(WorkerError::MissingStagedFile(path.to_path_buf()));
        }

        let probed = discard_on_error(path, self.toolkit.probe_media_kind(path).await).await?;

        if kind == MediaKind::Video {
            let duration = discard_on_error(path, self.toolkit.probe_duration(path).await).await?;
            if let Err(e) = self.check_duration(duration.ceil() as u64) {
                remove_quietly(path).await;
                return Err(e);
            }
        }

        let matches = matches!(
            (kind, probed),
            (MediaKind::Video, ProbedKind::Video) | (MediaKind::Image, ProbedKind::Image)
        );
        if !matches {
            remove_quietly(path).await;
            return Err(WorkerError::MediaKindMismatch { expected: kind });
        }
        Ok(())
    }

    async fn resolve_face(
        &self,
        id: &RequestId,
        face: &FaceSource,
        role: FaceRole,
        index: usize,
        original_target: &Path,
        uploads: &UploadSet,
    ) -> WorkerResult<PathBuf> {
        let stem = self.layout.face_stem(id, role, index);
        let path = match face {
            FaceSource::Url(raw) => self.images.download(&parse_url(raw)?, &stem).await?,
            FaceSource::Upload(file) => uploads.require(file)?.stage(&stem, "jpg").await?,
            FaceSource::FrameAt(at) => {
                let out = self.layout.face(id, role, index, "jpg");
                self.toolkit
                    .extract_frame(original_target, at.as_str(), &out)
                    .await?;
                out
            }
        };
        if !is_nonempty_file(&path).await {
            return Err(WorkerError::MissingStagedFile(path));
        }
        Ok(path)
    }

    /// Never fails: launch errors become a failed result with no outcome.
    async fn run_inference(&self, job: &InferenceJob) -> (PipelineResult, Option<ProcessOutcome>) {
        let session = job.session(&self.config);
        self.log
            .log(&format!("Inference Command: {}", job.command(&self.config)));

        let log = self.log.clone();
        let observer = move |stream: OutputStream, line: &str| match stream {
            OutputStream::Stdout => log.log(&format!("STDOUT: {}", line)),
            OutputStream::Stderr => log.log(&format!("STDERR: {}", line)),
        };

        match self
            .runner
            .run_session(
                &session,
                Some(self.config.inference_dir.as_path()),
                self.config.process_timeout,
                &observer,
            )
            .await
        {
            Ok(outcome) => {
                let result = PipelineResult {
                    success: false,
                    output_path: None,
                    stdout: outcome.stdout.clone(),
                    stderr: outcome.stderr.clone(),
                };
                (result, Some(outcome))
            }
            Err(e) => {
                let result = PipelineResult {
                    stderr: e.to_string(),
                    ..Default::default()
                };
                (result, None)
            }
        }
    }

    /// Merge the target's audio over `output`, then transcode to the delivery
    /// codec if needed. Returns the delivered file.
    async fn post_process(&self, output: &Path, target: &Path) -> MediaResult<PathBuf> {
        let merged = derived_path(output, "_audio");
        self.toolkit.merge_audio(output, target, &merged).await?;
        remove_quietly(output).await;

        let transcoded = derived_path(&merged, "_h264");
        if self
            .toolkit
            .ensure_video_codec(&merged, &self.config.delivery_codec, &transcoded)
            .await?
        {
            remove_quietly(&merged).await;
            return Ok(transcoded);
        }
        Ok(merged)
    }
}

/// Delete a staged file the toolkit could not read, then fail.
async fn discard_on_error<T>(path: &Path, probed: MediaResult<T>) -> WorkerResult<T> {
    match probed {
        Ok(value) => Ok(value),
        Err(e) => {
            remove_quietly(path).await;
            Err(e.into())
        }
    }
}

fn parse_url(raw: &str) -> WorkerResult<Url> {
    Url::parse(raw).map_err(|_| WorkerError::InvalidUrl(raw.to_string()))
}

fn append_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(line);
}
