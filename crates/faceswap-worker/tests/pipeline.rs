//! End-to-end pipeline tests over a scripted toolchain.
//!
//! `FakeToolchain` stands in for ffmpeg, ffprobe, yt-dlp and the inference
//! session: it records every command and materializes the files each
//! command would have produced.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use faceswap_media::{
    default_sink, DownloadLocks, ImageFetcher, MediaResult, OutputObserver, OutputStream,
    ProcessOutcome, ProcessRunner, VideoInfoCache,
};
use faceswap_models::{MediaKind, SwapForm, SwapRequest, DEFAULT_MAX_UPLOAD_BYTES};
use faceswap_worker::{SwapPipeline, UploadSet, UploadedFile, WorkerConfig, WorkerError};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FakeToolchain {
    commands: Mutex<Vec<String>>,
    sessions: Mutex<Vec<Vec<String>>>,
    remote_duration: String,
    local_duration: String,
    codec: String,
    produce_output: bool,
    session_times_out: bool,
    unreadable_media: bool,
    failing_merge: bool,
}

impl FakeToolchain {
    fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            remote_duration: "2:05".to_string(),
            local_duration: "125.0".to_string(),
            codec: "hevc".to_string(),
            produce_output: true,
            session_times_out: false,
            unreadable_media: false,
            failing_merge: false,
        }
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn answer(&self, command: &str) -> ProcessOutcome {
        let args = tokens(command);
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exit_code = 0;

        match args[0].as_str() {
            "yt-dlp" if args.iter().any(|a| a == "-s") => {
                stdout = format!("Some Video [abc].mp4\n{}\n", self.remote_duration);
            }
            "yt-dlp" => {
                let at = args.iter().position(|a| a == "-o").unwrap();
                touch(&args[at + 1]);
            }
            "ffprobe" if command.contains("format=duration") => {
                stdout = format!("{}\n", self.local_duration);
            }
            "ffprobe" if self.unreadable_media => {
                stderr = "Invalid data found when processing input\n".to_string();
                exit_code = 1;
            }
            "ffprobe" if command.contains("-of json") => {
                let file = args.last().unwrap();
                stdout = if file.ends_with(".jpg") || file.ends_with(".png") {
                    r#"{"streams":[{"codec_name":"mjpeg","codec_type":"video"}],"format":{"format_name":"image2"}}"#
                } else {
                    r#"{"streams":[{"codec_name":"h264","codec_type":"video"}],"format":{"format_name":"mov,mp4,m4a,3gp,3g2,mj2"}}"#
                }
                .to_string();
            }
            "ffprobe" => {
                stdout = format!("{}\n", self.codec);
            }
            "ffmpeg" if self.failing_merge && command.contains("-map") => {
                stderr = "Conversion failed!\n".to_string();
                exit_code = 1;
            }
            "ffmpeg" => touch(args.last().unwrap()),
            other => panic!("unexpected tool {other}"),
        }

        ProcessOutcome {
            exit_code: Some(exit_code),
            stdout,
            stderr,
            timed_out: false,
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeToolchain {
    async fn run(
        &self,
        command: &str,
        _working_dir: Option<&Path>,
        _observer: &dyn OutputObserver,
    ) -> MediaResult<ProcessOutcome> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(self.answer(command))
    }

    async fn run_session(
        &self,
        commands: &[String],
        _working_dir: Option<&Path>,
        _timeout: Duration,
        observer: &dyn OutputObserver,
    ) -> MediaResult<ProcessOutcome> {
        self.sessions.lock().unwrap().push(commands.to_vec());
        let inference = tokens(&commands[2]);
        let out = inference
            .iter()
            .position(|a| a == "--out_video_name" || a == "--out_image_name")
            .map(|at| inference[at + 1].clone())
            .unwrap();

        if self.session_times_out {
            // Killed mid-write: a truncated file and no exit code.
            std::fs::write(&out, b"partial").unwrap();
            observer.on_line(OutputStream::Stdout, "Processing frame 12/300");
            Ok(ProcessOutcome {
                exit_code: None,
                stdout: "Processing frame 12/300\n".to_string(),
                timed_out: true,
                ..Default::default()
            })
        } else if self.produce_output {
            touch(&out);
            observer.on_line(OutputStream::Stdout, "Swapped faces");
            Ok(ProcessOutcome {
                exit_code: Some(0),
                stdout: "Swapped faces\n".to_string(),
                ..Default::default()
            })
        } else {
            observer.on_line(OutputStream::Stderr, "No faces detected");
            Ok(ProcessOutcome {
                exit_code: Some(1),
                stderr: "No faces detected\n".to_string(),
                ..Default::default()
            })
        }
    }
}

/// Split a command line the way bash would for double-quoted arguments.
fn tokens(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                started = true;
            }
            '\\' if quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !quoted => {
                if started || !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => current.push(c),
        }
    }
    if started || !current.is_empty() {
        out.push(current);
    }
    out
}

fn touch(path: &str) {
    let path = Path::new(path);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"media").unwrap();
}

struct Harness {
    _root: TempDir,
    tools: Arc<FakeToolchain>,
    pipeline: SwapPipeline,
}

fn harness(tools: FakeToolchain) -> Harness {
    let root = TempDir::new().unwrap();
    let config = WorkerConfig {
        root_path: root.path().to_path_buf(),
        inference_dir: root.path().join("tool"),
        ..WorkerConfig::default()
    };
    let tools = Arc::new(tools);
    let pipeline = SwapPipeline::new(
        config,
        tools.clone(),
        ImageFetcher::new().unwrap(),
        VideoInfoCache::new(),
        DownloadLocks::new(),
        default_sink(),
    );
    Harness {
        _root: root,
        tools,
        pipeline,
    }
}

fn form(target: &str, sources: &str) -> SwapForm {
    SwapForm {
        target_media: Some(target.to_string()),
        source_faces: Some(sources.to_string()),
        ..Default::default()
    }
}

trait FormExt {
    fn build(self, kind: MediaKind, uploads: &UploadSet) -> SwapRequest;
}

impl FormExt for SwapForm {
    fn build(self, kind: MediaKind, uploads: &UploadSet) -> SwapRequest {
        self.into_request(kind, uploads.total_bytes(), DEFAULT_MAX_UPLOAD_BYTES)
            .unwrap()
    }
}

async fn face_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/faces/me.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
        .mount(&server)
        .await;
    server
}

fn pointer_of(h: &Harness, request: &SwapRequest) -> PathBuf {
    h.pipeline.layout().pointer(&request.id)
}

#[tokio::test]
async fn test_video_url_with_image_url_source_succeeds() {
    let server = face_server().await;
    let h = harness(FakeToolchain::new());
    let uploads = UploadSet::default();
    let req = form("https://youtu.be/NMvMR-jNSKg",
        &format!("{}/faces/me.png", server.uri()),
    )
    .build(MediaKind::Video, &uploads);

    let result = h.pipeline.process(&req, &uploads).await.unwrap();

    assert!(result.success, "stderr: {}", result.stderr);
    let output = result.output_path.clone().unwrap();
    assert!(output.starts_with(h.pipeline.layout().request_dir(&req.id)));
    assert_eq!(result.file_name().as_deref(), Some("processed_audio_h264.mp4"));
    assert_eq!(result.stdout, "Swapped faces\n");

    let request_dir = h.pipeline.layout().request_dir(&req.id);
    assert!(request_dir.join("FS_00.png").exists());
    assert!(!request_dir.join("processed.mp4").exists());
    assert!(!request_dir.join("processed_audio.mp4").exists());
    assert_eq!(
        std::fs::read_to_string(pointer_of(&h, &req)).unwrap(),
        "processed_audio_h264.mp4"
    );

    let session = h.tools.sessions.lock().unwrap()[0].clone();
    assert!(!session[2].contains("--target_faces_paths"));
    assert!(session[2].contains("--out_video_name"));
    assert_eq!(h.tools.count("yt-dlp -s"), 1);
    assert_eq!(h.tools.count("yt-dlp -f"), 1);
    assert_eq!(h.tools.count("ffmpeg -y -v error -ss"), 0);
}

#[tokio::test]
async fn test_missing_upload_rejects_without_pointer() {
    let h = harness(FakeToolchain::new());
    let uploads = UploadSet::new(vec![UploadedFile::new("face.jpg", b"img".to_vec())]);
    let req = form("absent.mp4", "face.jpg").build(MediaKind::Video, &uploads);

    let err = h.pipeline.process(&req, &uploads).await.unwrap_err();

    assert!(matches!(err, WorkerError::UploadNotFound(_)));
    assert!(!pointer_of(&h, &req).exists());
    assert!(h.tools.sessions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_frame_outside_trim_range_uses_untrimmed_target() {
    let h = harness(FakeToolchain::new());
    let uploads = UploadSet::new(vec![UploadedFile::new("Clip.MP4", b"video".to_vec())]);
    let mut f = form("clip.mp4", "00:00:30");
    f.target_faces = Some("00:00:31".to_string());
    f.target_start_time = Some("00:00:01".to_string());
    f.target_end_time = Some("00:00:05".to_string());
    let req = f.build(MediaKind::Video, &uploads);

    let result = h.pipeline.process(&req, &uploads).await.unwrap();
    assert!(result.success, "stderr: {}", result.stderr);

    let commands = h.tools.commands();
    let trim = commands
        .iter()
        .find(|c| c.contains("-to 00:00:05"))
        .expect("trim command");
    assert!(trim.ends_with("target_trim.MP4"));

    let frames: Vec<&String> = commands.iter().filter(|c| c.contains("-frames:v 1")).collect();
    assert_eq!(frames.len(), 2);
    for frame in frames {
        assert!(frame.contains("target.MP4 "), "frame taken from {frame}");
        assert!(!frame.contains("target_trim"));
    }

    let session = h.tools.sessions.lock().unwrap()[0].clone();
    assert!(session[2].contains("target_trim.MP4"));
    assert!(session[2].contains("FT_00.jpg"));
}

#[tokio::test]
async fn test_remote_duration_over_ceiling_rejects_before_download() {
    let mut tools = FakeToolchain::new();
    tools.remote_duration = "6:01".to_string();
    let h = harness(tools);
    let uploads = UploadSet::default();
    let req = form("https://youtu.be/long", "https://x.io/a.jpg")
        .build(MediaKind::Video, &uploads);

    let err = h.pipeline.process(&req, &uploads).await.unwrap_err();

    assert!(matches!(err, WorkerError::DurationExceeded { actual: 361, max: 360 }));
    assert_eq!(h.tools.count("yt-dlp -f"), 0);
}

#[tokio::test]
async fn test_local_duration_over_ceiling_rejects_and_deletes() {
    let mut tools = FakeToolchain::new();
    tools.local_duration = "400.5".to_string();
    let h = harness(tools);
    let uploads = UploadSet::new(vec![
        UploadedFile::new("clip.mp4", b"video".to_vec()),
        UploadedFile::new("face.jpg", b"img".to_vec()),
    ]);
    let req = form("clip.mp4", "face.jpg").build(MediaKind::Video, &uploads);

    let err = h.pipeline.process(&req, &uploads).await.unwrap_err();

    assert!(matches!(err, WorkerError::DurationExceeded { actual: 401, max: 360 }));
    assert!(!h.pipeline.layout().target(&req.id, "mp4").exists());
}

#[tokio::test]
async fn test_declared_kind_must_match_probe() {
    let h = harness(FakeToolchain::new());
    let uploads = UploadSet::new(vec![
        UploadedFile::new("clip.mp4", b"video".to_vec()),
        UploadedFile::new("face.jpg", b"img".to_vec()),
    ]);
    let req = form("clip.mp4", "face.jpg").build(MediaKind::Image, &uploads);

    let err = h.pipeline.process(&req, &uploads).await.unwrap_err();
    assert!(matches!(err, WorkerError::MediaKindMismatch { expected: MediaKind::Image }));
}

#[tokio::test]
async fn test_inference_without_output_reports_failure() {
    let mut tools = FakeToolchain::new();
    tools.produce_output = false;
    let h = harness(tools);
    let uploads = UploadSet::new(vec![
        UploadedFile::new("clip.mp4", b"video".to_vec()),
        UploadedFile::new("face.jpg", b"img".to_vec()),
    ]);
    let req = form("clip.mp4", "face.jpg").build(MediaKind::Video, &uploads);

    let result = h.pipeline.process(&req, &uploads).await.unwrap();

    assert!(!result.success);
    assert!(result.output_path.is_none());
    assert_eq!(result.stderr, "No faces detected\n");
    assert!(!pointer_of(&h, &req).exists());

    let response = result.to_response(&req.id);
    assert!(!response.success);
    assert!(response.file_name.is_none());
}

#[tokio::test]
async fn test_image_target_uses_itself_as_target_face() {
    let mut tools = FakeToolchain::new();
    tools.codec = "mjpeg".to_string();
    let h = harness(tools);
    let uploads = UploadSet::new(vec![
        UploadedFile::new("photo.jpg", b"img".to_vec()),
        UploadedFile::new("face.png", b"img".to_vec()),
    ]);
    let mut f = form("photo.jpg", "face.png");
    f.super_resolution = true;
    let req = f.build(MediaKind::Image, &uploads);

    let result = h.pipeline.process(&req, &uploads).await.unwrap();

    assert!(result.success, "stderr: {}", result.stderr);
    assert_eq!(result.file_name().as_deref(), Some("processed_sr.jpg"));
    let session = h.tools.sessions.lock().unwrap()[0].clone();
    assert!(session[2].contains("--image_to_image True"));
    assert!(session[2].contains("--use_sr True"));
    let target = h.pipeline.layout().target(&req.id, "jpg");
    assert!(session[2].contains(&format!(
        "--target_faces_paths \"{}\"",
        target.display()
    )));
    assert_eq!(h.tools.count("ffmpeg"), 0);
}

#[tokio::test]
async fn test_cached_video_is_not_fetched_again() {
    let h = harness(FakeToolchain::new());
    let uploads = UploadSet::new(vec![UploadedFile::new("face.jpg", b"img".to_vec())]);

    for _ in 0..2 {
        let req = form("https://youtu.be/NMvMR-jNSKg", "face.jpg")
            .build(MediaKind::Video, &uploads);
        let result = h.pipeline.process(&req, &uploads).await.unwrap();
        assert!(result.success);
    }

    assert_eq!(h.tools.count("yt-dlp -f"), 1);
    assert_eq!(h.tools.count("yt-dlp -s"), 1);
}

#[tokio::test]
async fn test_download_round_trip() {
    let h = harness(FakeToolchain::new());
    let uploads = UploadSet::new(vec![
        UploadedFile::new("clip.mp4", b"video".to_vec()),
        UploadedFile::new("face.jpg", b"img".to_vec()),
    ]);
    let req = form("clip.mp4", "face.jpg").build(MediaKind::Video, &uploads);
    let result = h.pipeline.process(&req, &uploads).await.unwrap();
    let name = result.file_name().unwrap();

    let found = h.pipeline.path_for_download(req.id.as_str(), &name).await;
    assert_eq!(found, result.output_path);

    for other in ["target.mp4", "FS_00.jpg", ".id", "../.id", "processed.mp4"] {
        assert!(
            h.pipeline.path_for_download(req.id.as_str(), other).await.is_none(),
            "{other} should not be downloadable"
        );
    }
}

fn video_and_face_uploads() -> UploadSet {
    UploadSet::new(vec![
        UploadedFile::new("clip.mp4", b"video".to_vec()),
        UploadedFile::new("face.jpg", b"img".to_vec()),
    ])
}

#[tokio::test]
async fn test_inference_timeout_reports_failure_and_discards_output() {
    let mut tools = FakeToolchain::new();
    tools.session_times_out = true;
    let h = harness(tools);
    let uploads = video_and_face_uploads();
    let req = form("clip.mp4", "face.jpg").build(MediaKind::Video, &uploads);

    let result = h.pipeline.process(&req, &uploads).await.unwrap();

    assert!(!result.success);
    assert!(result.output_path.is_none());
    assert_eq!(result.stdout, "Processing frame 12/300\n");
    assert!(result.stderr.contains("timed out"), "stderr: {}", result.stderr);
    assert!(!pointer_of(&h, &req).exists());

    let request_dir = h.pipeline.layout().request_dir(&req.id);
    assert!(!request_dir.join("processed.mp4").exists());
    assert!(!request_dir.join("processed_audio.mp4").exists());
    assert!(!h.tools.commands().iter().any(|c| c.contains("-map")));
}

#[tokio::test]
async fn test_unreadable_target_is_deleted() {
    let mut tools = FakeToolchain::new();
    tools.unreadable_media = true;
    let h = harness(tools);
    let uploads = UploadSet::new(vec![
        UploadedFile::new("clip.mp4", b"not a video".to_vec()),
        UploadedFile::new("face.jpg", b"img".to_vec()),
    ]);
    let req = form("clip.mp4", "face.jpg").build(MediaKind::Video, &uploads);

    let err = h.pipeline.process(&req, &uploads).await.unwrap_err();

    assert!(matches!(err, WorkerError::Media(_)), "got {err:?}");
    assert!(!h.pipeline.layout().target(&req.id, "mp4").exists());
    assert!(h.tools.sessions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_audio_merge_is_reported_not_raised() {
    let mut tools = FakeToolchain::new();
    tools.failing_merge = true;
    let h = harness(tools);
    let uploads = video_and_face_uploads();
    let req = form("clip.mp4", "face.jpg").build(MediaKind::Video, &uploads);

    let result = h.pipeline.process(&req, &uploads).await.unwrap();

    assert!(!result.success);
    assert!(result.output_path.is_none());
    assert_eq!(result.stdout, "Swapped faces\n");
    assert!(result.stderr.contains("FFmpeg command failed"), "stderr: {}", result.stderr);
    assert!(result.stderr.contains("Conversion failed!"));
    assert!(!pointer_of(&h, &req).exists());
}

#[tokio::test]
async fn test_image_url_target_is_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/group.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    let mut tools = FakeToolchain::new();
    tools.codec = "mjpeg".to_string();
    let h = harness(tools);
    let uploads = UploadSet::new(vec![UploadedFile::new("face.png", b"img".to_vec())]);
    let req = form(&format!("{}/media/group.jpg", server.uri()), "face.png")
        .build(MediaKind::Image, &uploads);

    let result = h.pipeline.process(&req, &uploads).await.unwrap();

    assert!(result.success, "stderr: {}", result.stderr);
    assert_eq!(result.file_name().as_deref(), Some("processed.jpg"));
    let target = h.pipeline.layout().target(&req.id, "jpg");
    assert_eq!(std::fs::read(&target).unwrap(), b"jpeg-bytes");
    assert_eq!(h.tools.count("yt-dlp"), 0);
    let session = h.tools.sessions.lock().unwrap()[0].clone();
    assert!(session[2].contains("--out_image_name"));
}
