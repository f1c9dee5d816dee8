//! Managed external-process execution.
//!
//! Commands run through the host shell with stdout/stderr streamed line by
//! line to an [`OutputObserver`] while the full text is accumulated. A
//! session feeds several command lines into one persistent shell (so a
//! runtime activated by the first line is visible to the following ones) and
//! is bounded by a wall-clock timeout that kills the whole process tree.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::log_sink::LogSink;

/// Characters that are never valid inside a file name on any supported host.
const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '|', '?', '*'];

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives output lines as they are produced. Empty lines are never delivered.
pub trait OutputObserver: Send + Sync {
    fn on_line(&self, stream: OutputStream, line: &str);
}

impl<F> OutputObserver for F
where
    F: Fn(OutputStream, &str) + Send + Sync,
{
    fn on_line(&self, stream: OutputStream, line: &str) {
        self(stream, line)
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl OutputObserver for Silent {
    fn on_line(&self, _stream: OutputStream, _line: &str) {}
}

/// Result of one external invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was killed by a signal or after a timeout.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Both streams, for error messages.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}{}", self.stdout, self.stderr),
        }
    }
}

/// Executes shell commands.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run one command line through the host shell and wait for it to exit.
    ///
    /// A nonzero exit is not an error here; only a launch failure is.
    async fn run(
        &self,
        command: &str,
        working_dir: Option<&Path>,
        observer: &dyn OutputObserver,
    ) -> MediaResult<ProcessOutcome>;

    /// Feed `commands` line by line into one persistent shell.
    ///
    /// On timeout the process tree is killed and whatever output was captured
    /// so far is returned with `timed_out` set; a timeout is never an `Err`.
    async fn run_session(
        &self,
        commands: &[String],
        working_dir: Option<&Path>,
        timeout: Duration,
        observer: &dyn OutputObserver,
    ) -> MediaResult<ProcessOutcome>;
}

/// Host shell used to interpret command lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    /// `cmd.exe /C`
    Cmd,
    /// `/bin/bash -c`
    Bash,
}

impl Shell {
    /// The shell for the current host OS.
    pub fn for_host() -> Self {
        if cfg!(windows) {
            Shell::Cmd
        } else {
            Shell::Bash
        }
    }

    fn program(&self) -> &'static str {
        match self {
            Shell::Cmd => "cmd.exe",
            Shell::Bash => "/bin/bash",
        }
    }

    fn command_flag(&self) -> &'static str {
        match self {
            Shell::Cmd => "/C",
            Shell::Bash => "-c",
        }
    }

    fn line_ending(&self) -> &'static str {
        match self {
            Shell::Cmd => "\r\n",
            Shell::Bash => "\n",
        }
    }

    /// Quote one argument for this shell.
    pub fn quote(&self, arg: &str) -> String {
        match self {
            Shell::Cmd => format!("\"{}\"", arg.replace('"', "")),
            Shell::Bash => {
                let mut quoted = String::with_capacity(arg.len() + 2);
                quoted.push('"');
                for c in arg.chars() {
                    if matches!(c, '"' | '\\' | '$' | '`') {
                        quoted.push('\\');
                    }
                    quoted.push(c);
                }
                quoted.push('"');
                quoted
            }
        }
    }
}

/// Quote one argument for the host shell.
pub fn quote(arg: impl AsRef<str>) -> String {
    Shell::for_host().quote(arg.as_ref())
}

/// Strip path separators and quotes, collapse doubled separators and drop
/// characters that are invalid in a file name.
///
/// Idempotent. Names made only of dots map to `_` so they can never
/// address a parent directory.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_control() || INVALID_FILE_NAME_CHARS.contains(&c) {
            continue;
        }
        if matches!(c, '/' | '\\' | '"' | '\'') {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    if !out.is_empty() && out.chars().all(|c| c == '.') {
        return "_".to_string();
    }
    out
}

/// [`ProcessRunner`] backed by the host shell.
#[derive(Clone)]
pub struct ShellRunner {
    shell: Shell,
    log: Arc<dyn LogSink>,
}

impl ShellRunner {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self {
            shell: Shell::for_host(),
            log,
        }
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = shell;
        self
    }

    fn spawn(
        &self,
        mut cmd: Command,
        working_dir: Option<&Path>,
        display: &str,
        with_stdin: bool,
    ) -> MediaResult<Child> {
        cmd.stdin(if with_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        // Own process group so a timeout can take down grandchildren too.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|source| MediaError::SpawnFailed {
            command: display.to_string(),
            source,
        })
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(
        &self,
        command: &str,
        working_dir: Option<&Path>,
        observer: &dyn OutputObserver,
    ) -> MediaResult<ProcessOutcome> {
        self.log.log(&format!("Will execute: {}", command));
        debug!(shell = ?self.shell, "Running: {}", command);

        let mut cmd = Command::new(self.shell.program());
        cmd.arg(self.shell.command_flag());
        #[cfg(windows)]
        cmd.raw_arg(command);
        #[cfg(not(windows))]
        cmd.arg(command);

        let mut child = self.spawn(cmd, working_dir, command, false)?;
        let mut captured = Captured::default();
        let status = pump(&mut child, &mut captured, observer).await?;

        Ok(captured.finish(status.code(), false))
    }

    async fn run_session(
        &self,
        commands: &[String],
        working_dir: Option<&Path>,
        timeout: Duration,
        observer: &dyn OutputObserver,
    ) -> MediaResult<ProcessOutcome> {
        let display = commands.join(self.shell.line_ending());
        self.log.log(&format!("Will execute commands: {}", display));

        let cmd = Command::new(self.shell.program());
        let mut child = self.spawn(cmd, working_dir, &display, true)?;

        if let Some(mut stdin) = child.stdin.take() {
            let script: String = commands
                .iter()
                .map(|c| format!("{}{}", c, self.shell.line_ending()))
                .collect();
            // Written from a separate task so a chatty first command cannot
            // block on a full stdout pipe while we are still writing.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(script.as_bytes()).await {
                    debug!("Session stdin closed early: {}", e);
                }
            });
        }

        let mut captured = Captured::default();
        let waited = tokio::time::timeout(timeout, pump(&mut child, &mut captured, observer)).await;

        match waited {
            Ok(status) => Ok(captured.finish(status?.code(), false)),
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Process exceeded timeout, killing process tree"
                );
                self.log
                    .log("Process exceeded timeout. Killing process tree.");
                metrics::counter!("faceswap_session_timeouts_total").increment(1);
                kill_tree(&mut child).await;
                Ok(captured.finish(None, true))
            }
        }
    }
}

#[derive(Default)]
struct Captured {
    stdout: String,
    stderr: String,
}

impl Captured {
    fn push(&mut self, stream: OutputStream, line: String, observer: &dyn OutputObserver) {
        if line.trim().is_empty() {
            return;
        }
        observer.on_line(stream, &line);
        let buf = match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        };
        buf.push_str(&line);
        buf.push('\n');
    }

    fn finish(self, exit_code: Option<i32>, timed_out: bool) -> ProcessOutcome {
        ProcessOutcome {
            exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            timed_out,
        }
    }
}

/// Drain both output streams until EOF, then reap the child.
async fn pump(
    child: &mut Child,
    captured: &mut Captured,
    observer: &dyn OutputObserver,
) -> std::io::Result<ExitStatus> {
    let mut out = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut err = child.stderr.take().map(|s| BufReader::new(s).lines());

    loop {
        tokio::select! {
            line = next_line(&mut out), if out.is_some() => match line {
                Some(line) => captured.push(OutputStream::Stdout, line, observer),
                None => out = None,
            },
            line = next_line(&mut err), if err.is_some() => match line {
                Some(line) => captured.push(OutputStream::Stderr, line, observer),
                None => err = None,
            },
            else => break,
        }
    }

    child.wait().await
}

async fn next_line<R>(lines: &mut Option<Lines<R>>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => match lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                debug!("Stopped reading process output: {}", e);
                None
            }
        },
        None => None,
    }
}

/// Kill the child and its descendants, falling back to the leaf process.
async fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) => {
                    let _ = child.wait().await;
                    return;
                }
                Err(e) => warn!(pid, "Process group kill failed: {}", e),
            }
        }
        #[cfg(windows)]
        {
            let tree_kill = Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/T", "/F"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match tree_kill {
                Ok(status) if status.success() => {
                    let _ = child.wait().await;
                    return;
                }
                Ok(status) => warn!(pid, "taskkill exited with {}", status),
                Err(e) => warn!(pid, "taskkill failed: {}", e),
            }
        }
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill process: {}", e);
    }
}
