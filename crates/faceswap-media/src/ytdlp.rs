//! Remote video fetcher over yt-dlp.
//!
//! Metadata probes are cached in memory per normalized URL and downloads are
//! cached on disk under a deterministic path. Both caches are explicit
//! handles injected into [`VideoFetcher`], so several fetchers (or tests) can
//! share or isolate them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::command::command_line;
use crate::error::{MediaError, MediaResult};
use crate::shell::{sanitize_file_name, ProcessRunner, Silent};

/// Format selector: up to 720p mp4 with m4a audio, else any mp4.
const FORMAT_SELECTOR: &str = "bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/[ext=mp4]";

/// Default `--max-filesize` bound.
pub const DEFAULT_MAX_FILESIZE: &str = "50M";

/// Metadata reported by a remote probe.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    /// Display name without extension, sanitized.
    pub file_name: String,
    /// Duration exactly as reported.
    pub duration: String,
    pub duration_secs: u64,
}

/// Process-wide cache of remote probes, keyed by normalized URL.
///
/// Entries are never evicted. The first writer wins; a concurrent duplicate
/// probe for the same URL is harmless.
#[derive(Debug, Clone, Default)]
pub struct VideoInfoCache {
    inner: Arc<RwLock<HashMap<String, VideoInfo>>>,
}

impl VideoInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<VideoInfo> {
        self.inner.read().await.get(key).cloned()
    }

    /// Insert unless present; returns the stored entry.
    pub async fn insert_if_absent(&self, key: String, info: VideoInfo) -> VideoInfo {
        let mut map = self.inner.write().await;
        map.entry(key).or_insert(info).clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Per-key async locks serializing downloads of the same cache entry.
#[derive(Debug, Clone, Default)]
pub struct DownloadLocks {
    inner: Arc<StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl DownloadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for `path`. Callers hold its guard for the whole download.
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        // A poisoned map only means another thread panicked while inserting.
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(path.to_path_buf()).or_default().clone()
    }

    /// Forget the lock for `path` once no caller holds a handle to it.
    pub fn release(&self, path: &Path) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map.get(path).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(path);
        }
    }

    /// Number of paths with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fetches remote videos with yt-dlp.
#[derive(Clone)]
pub struct VideoFetcher {
    runner: Arc<dyn ProcessRunner>,
    cache_root: PathBuf,
    tool: String,
    max_filesize: String,
    info_cache: VideoInfoCache,
    locks: DownloadLocks,
}

impl VideoFetcher {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        cache_root: impl Into<PathBuf>,
        info_cache: VideoInfoCache,
        locks: DownloadLocks,
    ) -> Self {
        Self {
            runner,
            cache_root: cache_root.into(),
            tool: "yt-dlp".to_string(),
            max_filesize: DEFAULT_MAX_FILESIZE.to_string(),
            info_cache,
            locks,
        }
    }

    /// Override the tool binary.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    /// Override the `--max-filesize` bound.
    pub fn with_max_filesize(mut self, max_filesize: impl Into<String>) -> Self {
        self.max_filesize = max_filesize.into();
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Deterministic cache path for `url`.
    pub fn local_path(&self, url: &Url) -> PathBuf {
        let mut key = url.host_str().unwrap_or_default().to_string();
        key.push_str(url.path());
        if let Some(query) = url.query() {
            key.push('?');
            key.push_str(query);
        }
        self.cache_root
            .join(format!("{}.mp4", sanitize_file_name(&key)))
    }

    /// Probe metadata without downloading, consulting the cache first.
    pub async fn get_video_info(&self, url: &Url) -> MediaResult<VideoInfo> {
        let key = cache_key(url);
        if let Some(info) = self.info_cache.get(&key).await {
            debug!(url = %url, "Video info cache hit");
            return Ok(info);
        }

        let line = command_line(
            &self.tool,
            ["-s", "--get-filename", "--get-duration", "--no-check-certificate", url.as_str()],
        );
        let outcome = self.runner.run(&line, None, &Silent).await?;
        if !outcome.success() {
            return Err(MediaError::download_failed(format!(
                "{} -s exited with {:?}\n{}",
                self.tool,
                outcome.exit_code,
                outcome.combined_output()
            )));
        }

        let info = parse_video_info(&outcome.stdout)?;
        info!(url = %url, name = %info.file_name, duration_secs = info.duration_secs, "Probed remote video");
        Ok(self.info_cache.insert_if_absent(key, info).await)
    }

    /// Download `url` into the cache, or return the cached file.
    pub async fn download(&self, url: &Url) -> MediaResult<PathBuf> {
        let path = self.local_path(url);
        if path.exists() {
            metrics::counter!("faceswap_video_cache_hits_total").increment(1);
            debug!(path = %path.display(), "Using cached video");
            return Ok(path);
        }

        let lock = self.locks.lock_for(&path);
        let result = {
            let _guard = lock.lock().await;
            self.download_locked(url, &path).await
        };
        drop(lock);
        self.locks.release(&path);
        result.map(|()| path)
    }

    async fn download_locked(&self, url: &Url, path: &Path) -> MediaResult<()> {
        // Another task may have finished the same download while we waited.
        if path.exists() {
            metrics::counter!("faceswap_video_cache_hits_total").increment(1);
            return Ok(());
        }
        metrics::counter!("faceswap_video_cache_misses_total").increment(1);

        tokio::fs::create_dir_all(&self.cache_root).await?;
        let path_str = path.to_string_lossy();
        let line = command_line(
            &self.tool,
            [
                "-f",
                FORMAT_SELECTOR,
                "--max-filesize",
                self.max_filesize.as_str(),
                "-o",
                &*path_str,
                "--no-check-certificate",
                url.as_str(),
            ],
        );

        info!(url = %url, output = %path.display(), "Downloading video");
        let outcome = self.runner.run(&line, None, &Silent).await?;
        if !outcome.success() {
            let output = outcome.combined_output();
            if output.contains("429") || output.contains("Too Many Requests") {
                warn!(url = %url, "Remote rate limit detected");
            }
            return Err(MediaError::download_failed(format!(
                "{} exited with {:?}\n{}",
                self.tool, outcome.exit_code, output
            )));
        }

        if !path.exists() {
            return Err(MediaError::download_failed(format!(
                "{} not found after {}",
                path.display(),
                self.tool
            )));
        }
        Ok(())
    }
}

/// Case-insensitive cache key for a URL.
pub fn cache_key(url: &Url) -> String {
    url.as_str().to_lowercase()
}

/// Parse `--get-filename --get-duration` output: the file name line, then
/// the duration line (missing means 0).
pub fn parse_video_info(output: &str) -> MediaResult<VideoInfo> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let raw_name = lines
        .next()
        .ok_or_else(|| MediaError::download_failed(format!("unformatted probe output: {output:?}")))?;
    let duration = lines.next().unwrap_or("0").to_string();

    let stem = match raw_name.rfind('.') {
        Some(dot) => &raw_name[..dot],
        None => raw_name,
    };

    Ok(VideoInfo {
        file_name: sanitize_file_name(stem),
        duration_secs: parse_duration(&duration)?,
        duration,
    })
}

/// Seconds from `S`, `M:S` or `H:M:S`.
pub fn parse_duration(text: &str) -> MediaResult<u64> {
    let parts = text
        .split(':')
        .map(|p| p.trim().parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| MediaError::InvalidDuration(text.to_string()))?;
    let (h, m, s) = match parts.as_slice() {
        [s] => (0, 0, *s),
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(MediaError::InvalidDuration(text.to_string())),
    };
    h.checked_mul(3600)
        .and_then(|secs| m.checked_mul(60).and_then(|mins| secs.checked_add(mins)))
        .and_then(|secs| secs.checked_add(s))
        .ok_or_else(|| MediaError::InvalidDuration(text.to_string()))
}
