//! Remote image fetcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::MediaResult;

const DEFAULT_EXTENSION: &str = "jpg";

/// Downloads single images over HTTP.
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: Client,
}

impl ImageFetcher {
    pub fn new() -> MediaResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Fetch `url` into `path_without_ext` plus the URL's extension.
    pub async fn download(&self, url: &Url, path_without_ext: &Path) -> MediaResult<PathBuf> {
        let ext = extension_of(url);
        let mut path = path_without_ext.as_os_str().to_owned();
        path.push(".");
        path.push(ext);
        let path = PathBuf::from(path);

        let bytes = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        debug!(url = %url, path = %path.display(), size = bytes.len(), "Downloaded image");
        Ok(path)
    }
}

/// Extension of the URL path (query ignored), or `jpg`.
pub fn extension_of(url: &Url) -> &str {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(DEFAULT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extension_of() {
        let ext = |s: &str| extension_of(&Url::parse(s).unwrap()).to_string();
        assert_eq!(ext("https://i.imgur.com/a.png?size=2.gif"), "png");
        assert_eq!(ext("https://x.io/faces/me"), "jpg");
        assert_eq!(ext("https://x.io/dir.v2/"), "jpg");
        assert_eq!(ext("https://x.io/a.j%20g"), "jpg");
        assert_eq!(ext("https://x.io/a.jpeg"), "jpeg");
    }

    #[tokio::test]
    async fn test_download_writes_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/faces/me.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = ImageFetcher::new().unwrap();
        let url = Url::parse(&format!("{}/faces/me.png", server.uri())).unwrap();
        let out = fetcher
            .download(&url, &dir.path().join("nested/FS_00"))
            .await
            .unwrap();

        assert_eq!(out, dir.path().join("nested/FS_00.png"));
        assert_eq!(std::fs::read(&out).unwrap(), vec![1u8, 2, 3]);
    }

    #[tokio::test]
    async fn test_download_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = ImageFetcher::new().unwrap();
        let url = Url::parse(&format!("{}/missing.jpg", server.uri())).unwrap();
        let result = fetcher.download(&url, &dir.path().join("FS_00")).await;

        assert!(result.is_err());
        assert!(!dir.path().join("FS_00.jpg").exists());
    }
}
