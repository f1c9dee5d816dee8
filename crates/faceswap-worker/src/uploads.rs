//! Files submitted alongside a request.

use std::path::{Path, PathBuf};

use faceswap_models::FileRef;
use tokio::fs;

use crate::error::{WorkerError, WorkerResult};

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a local file, keeping only its file name.
    pub async fn from_path(path: &Path) -> WorkerResult<Self> {
        let bytes = fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { file_name, bytes })
    }

    /// Extension of the uploaded name if it is plain alphanumeric.
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
    }

    /// Write to `stem` plus this file's extension (or `default_ext`).
    pub async fn stage(&self, stem: &Path, default_ext: &str) -> WorkerResult<PathBuf> {
        let ext = self.extension().unwrap_or(default_ext);
        let mut path = stem.as_os_str().to_owned();
        path.push(".");
        path.push(ext);
        let path = PathBuf::from(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &self.bytes).await?;
        Ok(path)
    }
}

/// The upload set of one request.
#[derive(Debug, Clone, Default)]
pub struct UploadSet {
    files: Vec<UploadedFile>,
}

impl UploadSet {
    pub fn new(files: Vec<UploadedFile>) -> Self {
        Self { files }
    }

    /// Resolve a reference; names match case-insensitively.
    pub fn find(&self, file: &FileRef) -> Option<&UploadedFile> {
        match file {
            FileRef::Name(name) => self
                .files
                .iter()
                .find(|f| f.file_name.eq_ignore_ascii_case(name)),
            FileRef::Index(index) => self.files.get(*index),
        }
    }

    pub fn require(&self, file: &FileRef) -> WorkerResult<&UploadedFile> {
        self.find(file)
            .ok_or_else(|| WorkerError::UploadNotFound(file.clone()))
    }

    /// Combined size in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes.len() as u64).sum()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
