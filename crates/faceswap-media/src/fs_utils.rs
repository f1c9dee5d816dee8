//! Filesystem helpers shared by the fetchers and the pipeline.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::fs;

/// True if `path` is a regular file with at least one byte.
pub async fn is_nonempty_file(path: impl AsRef<Path>) -> bool {
    match fs::metadata(path.as_ref()).await {
        Ok(metadata) => metadata.is_file() && metadata.len() > 0,
        Err(_) => false,
    }
}

/// Delete a file, logging instead of failing.
pub async fn remove_quietly(path: impl AsRef<Path>) {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// True if `path` was last modified more than `age` ago.
///
/// Entries whose metadata cannot be read are treated as fresh.
pub async fn is_older_than(path: impl AsRef<Path>, age: Duration) -> bool {
    let modified = match fs::metadata(path.as_ref()).await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|elapsed| elapsed > age)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_is_nonempty_file() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.mp4");
        let full = dir.path().join("full.mp4");
        fs::write(&empty, b"").await.unwrap();
        fs::write(&full, b"data").await.unwrap();

        assert!(!is_nonempty_file(&empty).await);
        assert!(is_nonempty_file(&full).await);
        assert!(!is_nonempty_file(dir.path()).await);
        assert!(!is_nonempty_file(dir.path().join("missing")).await);
    }

    #[tokio::test]
    async fn test_remove_quietly_ignores_missing() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"x").await.unwrap();

        remove_quietly(&file).await;
        remove_quietly(&file).await;
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_is_older_than() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"x").await.unwrap();

        assert!(!is_older_than(&file, Duration::from_secs(3600)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(is_older_than(&file, Duration::from_millis(1)).await);
        assert!(!is_older_than(dir.path().join("missing"), Duration::ZERO).await);
    }
}
