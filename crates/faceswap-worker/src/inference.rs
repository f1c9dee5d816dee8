//! Inference command line and session script.

use std::path::{Path, PathBuf};

use faceswap_media::quote;
use faceswap_models::MediaKind;

use crate::config::WorkerConfig;

/// Everything the inference tool needs for one run.
#[derive(Debug, Clone)]
pub struct InferenceJob {
    pub kind: MediaKind,
    pub target: PathBuf,
    pub source_faces: Vec<PathBuf>,
    pub target_faces: Vec<PathBuf>,
    pub super_resolution: bool,
    pub output: PathBuf,
}

impl InferenceJob {
    /// Render the inference command line.
    ///
    /// Image targets without target faces name the target image itself as the
    /// face to replace; the tool refuses image-to-image runs otherwise.
    pub fn command(&self, config: &WorkerConfig) -> String {
        let mut parts = vec![config.inference_command.clone()];

        parts.push("--source_paths".to_string());
        parts.extend(self.source_faces.iter().map(quote_path));

        let target_faces: Vec<&Path> = if self.target_faces.is_empty() && self.kind == MediaKind::Image {
            vec![self.target.as_path()]
        } else {
            self.target_faces.iter().map(PathBuf::as_path).collect()
        };
        if !target_faces.is_empty() {
            parts.push("--target_faces_paths".to_string());
            parts.extend(target_faces.into_iter().map(quote_path));
        }

        match self.kind {
            MediaKind::Image => parts.push(format!("--target_image {}", quote_path(&self.target))),
            MediaKind::Video => parts.push(format!("--target_video {}", quote_path(&self.target))),
        }

        if self.super_resolution {
            parts.push("--use_sr True".to_string());
        }
        if !config.inference_extra_args.trim().is_empty() {
            parts.push(config.inference_extra_args.trim().to_string());
        }

        match self.kind {
            MediaKind::Image => {
                parts.push("--image_to_image True".to_string());
                parts.push(format!("--out_image_name {}", quote_path(&self.output)));
            }
            MediaKind::Video => {
                parts.push(format!("--out_video_name {}", quote_path(&self.output)));
            }
        }

        parts.join(" ")
    }

    /// Session lines: activate runtime, enter the tool directory, run,
    /// deactivate.
    pub fn session(&self, config: &WorkerConfig) -> Vec<String> {
        vec![
            config.activate_script.clone(),
            format!("cd {}", quote_path(&config.inference_dir)),
            self.command(config),
            config.deactivate_script.clone(),
        ]
    }
}

fn quote_path(path: impl AsRef<Path>) -> String {
    quote(path.as_ref().to_string_lossy())
}
