//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use faceswap_models::DEFAULT_MAX_UPLOAD_BYTES;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root for per-request staging and the video cache
    pub root_path: PathBuf,
    /// First session line: activates the inference runtime
    pub activate_script: String,
    /// Last session line: deactivates the inference runtime
    pub deactivate_script: String,
    /// Working directory of the inference tool
    pub inference_dir: PathBuf,
    /// Inference entry point, without arguments
    pub inference_command: String,
    /// Appended verbatim to every inference command
    pub inference_extra_args: String,
    /// Video fetcher binary
    pub ytdlp_tool: String,
    /// Longest accepted target video, in seconds
    pub max_duration_secs: u64,
    /// Wall-clock bound on the inference session
    pub process_timeout: Duration,
    /// Codec every delivered video is transcoded to
    pub delivery_codec: String,
    /// Combined size limit of uploaded files
    pub max_upload_bytes: u64,
    /// Age after which staged requests and cached videos are purged
    pub retention: Duration,
    /// `--max-filesize` passed to the video fetcher
    pub download_max_filesize: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/var/lib/faceswap"),
            activate_script: "source /opt/conda/bin/activate sber".to_string(),
            deactivate_script: "conda deactivate".to_string(),
            inference_dir: PathBuf::from("/opt/sber-swap"),
            inference_command: "python inference.py".to_string(),
            inference_extra_args: "--ignore_audio True".to_string(),
            ytdlp_tool: "yt-dlp".to_string(),
            max_duration_secs: 360,
            process_timeout: Duration::from_secs(15 * 60),
            delivery_codec: "h264".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            retention: Duration::from_secs(72 * 3600),
            download_max_filesize: "50M".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparsable keys keep
    /// their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            root_path: get("FACESWAP_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.root_path),
            activate_script: get("FACESWAP_ACTIVATE_SCRIPT").unwrap_or(defaults.activate_script),
            deactivate_script: get("FACESWAP_DEACTIVATE_SCRIPT")
                .unwrap_or(defaults.deactivate_script),
            inference_dir: get("FACESWAP_INFERENCE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.inference_dir),
            inference_command: get("FACESWAP_INFERENCE_COMMAND")
                .unwrap_or(defaults.inference_command),
            inference_extra_args: get("FACESWAP_INFERENCE_EXTRA_ARGS")
                .unwrap_or(defaults.inference_extra_args),
            ytdlp_tool: get("FACESWAP_YTDLP").unwrap_or(defaults.ytdlp_tool),
            max_duration_secs: get("FACESWAP_MAX_DURATION_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_duration_secs),
            process_timeout: get("FACESWAP_PROCESS_TIMEOUT_MINS")
                .and_then(|s| s.parse::<u64>().ok())
                .map(|mins| Duration::from_secs(mins * 60))
                .unwrap_or(defaults.process_timeout),
            delivery_codec: get("FACESWAP_DELIVERY_CODEC").unwrap_or(defaults.delivery_codec),
            max_upload_bytes: get("FACESWAP_MAX_UPLOAD_BYTES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_upload_bytes),
            retention: get("FACESWAP_RETENTION_HOURS")
                .and_then(|s| s.parse::<u64>().ok())
                .map(|hours| Duration::from_secs(hours * 3600))
                .unwrap_or(defaults.retention),
            download_max_filesize: get("FACESWAP_DOWNLOAD_MAX_FILESIZE")
                .unwrap_or(defaults.download_max_filesize),
        }
    }
}
