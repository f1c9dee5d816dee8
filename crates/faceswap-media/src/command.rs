//! FFmpeg command builder and tool discovery.

use std::path::{Path, PathBuf};

use crate::shell::quote;

/// Builder for FFmpeg command lines.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file paths, in order
    inputs: Vec<PathBuf>,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before the first -i)
    input_args: Vec<String>,
    /// Output arguments (after the last -i)
    output_args: Vec<String>,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![input.as_ref().to_path_buf()],
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
        }
    }

    /// Add another input file.
    pub fn input(mut self, input: impl AsRef<Path>) -> Self {
        self.inputs.push(input.as_ref().to_path_buf());
        self
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set seek position (before input), in toolkit time syntax.
    pub fn seek(self, at: impl Into<String>) -> Self {
        self.input_arg("-ss").input_arg(at)
    }

    /// Stop reading input at the given position.
    pub fn until(self, at: impl Into<String>) -> Self {
        self.input_arg("-to").input_arg(at)
    }

    /// Copy all streams without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Select a stream for the output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Extract single frame at high JPEG quality.
    pub fn single_frame(self) -> Self {
        self.output_args(["-frames:v", "1", "-q:v", "2"])
    }

    /// Build the command arguments. Output is always overwritten and only
    /// errors are logged.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];

        args.extend(self.input_args.clone());

        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Render as one shell command line for `program`.
    pub fn to_command_line(&self, program: &str) -> String {
        command_line(program, self.build_args())
    }
}

/// Join a program and its arguments, quoting any argument the shell could
/// reinterpret.
pub fn command_line<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = program.to_string();
    for arg in args {
        let arg = arg.as_ref();
        line.push(' ');
        if is_plain_arg(arg) {
            line.push_str(arg);
        } else {
            line.push_str(&quote(arg));
        }
    }
    line
}

fn is_plain_arg(arg: &str) -> bool {
    !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.:/=,+@%".contains(c))
}

/// Availability of one external tool.
#[derive(Debug, Clone)]
pub struct ToolStatus {
    pub name: String,
    pub path: Option<PathBuf>,
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }
}

/// Resolve each tool on PATH.
pub fn check_tools<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<ToolStatus> {
    names
        .into_iter()
        .map(|name| ToolStatus {
            name: name.to_string(),
            path: which::which(name).ok(),
        })
        .collect()
}
