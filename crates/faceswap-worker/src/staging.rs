//! On-disk layout of requests and the shared video cache.
//!
//! ```text
//! {root}/requests/{id}/target.{ext}
//! {root}/requests/{id}/target_trim.{ext}
//! {root}/requests/{id}/FS_00.{ext} FT_00.{ext} ...
//! {root}/requests/{id}/processed[_sr].{mp4|jpg}
//! {root}/requests/{id}/.id            name of the delivered file
//! {root}/yt-cache/{sanitized url}.mp4
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use faceswap_media::fs_utils::is_older_than;
use faceswap_media::sanitize_file_name;
use faceswap_models::{MediaKind, RequestId};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::WorkerResult;

const REQUESTS_DIR: &str = "requests";
const VIDEO_CACHE_DIR: &str = "yt-cache";
const POINTER_FILE: &str = ".id";

/// Role of a staged face image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceRole {
    /// Face to paste in (`FS_nn`).
    Source,
    /// Face to replace (`FT_nn`).
    Target,
}

impl FaceRole {
    fn prefix(&self) -> &'static str {
        match self {
            FaceRole::Source => "FS",
            FaceRole::Target => "FT",
        }
    }
}

impl fmt::Display for FaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceRole::Source => f.write_str("source"),
            FaceRole::Target => f.write_str("target"),
        }
    }
}

/// What a purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub requests: usize,
    pub cached_videos: usize,
}

/// Path builder over a staging root.
#[derive(Debug, Clone)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn requests_root(&self) -> PathBuf {
        self.root.join(REQUESTS_DIR)
    }

    pub fn video_cache_root(&self) -> PathBuf {
        self.root.join(VIDEO_CACHE_DIR)
    }

    pub fn request_dir(&self, id: &RequestId) -> PathBuf {
        self.requests_root().join(id.as_str())
    }

    /// Staged target, without extension.
    pub fn target_stem(&self, id: &RequestId) -> PathBuf {
        self.request_dir(id).join("target")
    }

    pub fn target(&self, id: &RequestId, ext: &str) -> PathBuf {
        with_ext(self.target_stem(id), ext)
    }

    /// Trimmed copy of the target. Always inside the request directory, even
    /// when the untrimmed target lives in the video cache.
    pub fn trimmed(&self, id: &RequestId, ext: &str) -> PathBuf {
        derived_path(&self.target(id, ext), "_trim")
    }

    /// Face image, without extension (`FS_00`, `FT_03`).
    pub fn face_stem(&self, id: &RequestId, role: FaceRole, index: usize) -> PathBuf {
        self.request_dir(id)
            .join(format!("{}_{:02}", role.prefix(), index))
    }

    pub fn face(&self, id: &RequestId, role: FaceRole, index: usize, ext: &str) -> PathBuf {
        with_ext(self.face_stem(id, role, index), ext)
    }

    /// Where the inference tool writes its result.
    pub fn output(&self, id: &RequestId, kind: MediaKind, super_resolution: bool) -> PathBuf {
        let name = if super_resolution { "processed_sr" } else { "processed" };
        with_ext(self.request_dir(id).join(name), kind.default_extension())
    }

    pub fn pointer(&self, id: &RequestId) -> PathBuf {
        self.request_dir(id).join(POINTER_FILE)
    }

    /// Record `output` as the delivered file of the request.
    pub async fn write_pointer(&self, id: &RequestId, output: &Path) -> WorkerResult<()> {
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        fs::create_dir_all(self.request_dir(id)).await?;
        fs::write(self.pointer(id), name).await?;
        Ok(())
    }

    /// Name recorded by [`Self::write_pointer`], if any.
    pub async fn read_pointer(&self, id: &RequestId) -> Option<String> {
        fs::read_to_string(self.pointer(id))
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Resolve a delivered file for download.
    ///
    /// `file_name` must be its own sanitized form and match the pointer of
    /// the request; anything else yields `None`.
    pub async fn path_for_download(&self, request_id: &str, file_name: &str) -> Option<PathBuf> {
        let id = RequestId::parse(request_id).ok()?;
        if file_name.is_empty() || sanitize_file_name(file_name) != file_name {
            warn!(request_id, file_name, "Rejected unsanitized download name");
            return None;
        }
        if self.read_pointer(&id).await.as_deref() != Some(file_name) {
            return None;
        }
        let path = self.request_dir(&id).join(file_name);
        path.is_file().then_some(path)
    }

    /// Remove request directories and cached videos last modified more than
    /// `age` ago.
    pub async fn purge_older_than(&self, age: Duration) -> WorkerResult<PurgeReport> {
        let mut report = PurgeReport::default();

        for entry in list_dir(&self.requests_root()).await? {
            if entry.is_dir() && is_older_than(&entry, age).await {
                fs::remove_dir_all(&entry).await?;
                debug!(path = %entry.display(), "Purged request directory");
                report.requests += 1;
            }
        }

        for entry in list_dir(&self.video_cache_root()).await? {
            if entry.is_file() && is_older_than(&entry, age).await {
                fs::remove_file(&entry).await?;
                debug!(path = %entry.display(), "Purged cached video");
                report.cached_videos += 1;
            }
        }

        info!(
            requests = report.requests,
            cached_videos = report.cached_videos,
            "Purge complete"
        );
        Ok(report)
    }
}

/// `path` with `suffix` appended to its stem (`a.mp4` -> `a_trim.mp4`).
pub fn derived_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    path.with_file_name(name)
}

fn with_ext(stem: PathBuf, ext: &str) -> PathBuf {
    let mut path = stem.into_os_string();
    path.push(".");
    path.push(ext);
    PathBuf::from(path)
}

async fn list_dir(dir: &Path) -> WorkerResult<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    Ok(paths)
}
