//! External program execution.
//!
//! Checks never spawn processes directly. They describe what to run with a
//! [`CommandInvocation`] and hand it to a [`ProcessRunner`], which keeps the
//! detection logic testable without a real host.
//!
//! Standard error of every child is inherited from this process so that
//! diagnostic noise stays visible to the operator. No timeout is applied.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::ExecError;

/// Where the child's stdin comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdinMode {
    /// Share this process's stdin.
    #[default]
    Inherit,
    /// Give the child an empty stdin.
    Null,
}

/// Where the child's stdout goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdoutMode {
    /// Collect it into [`CommandOutput::stdout`].
    #[default]
    Capture,
    /// Write it straight to this process's stdout.
    Inherit,
    /// Drop it.
    Discard,
}

/// One program call. Built per call and dropped afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    pub stdin: StdinMode,
    pub stdout: StdoutMode,
}

impl CommandInvocation {
    /// Capture stdout, inherit stdin, run in the current directory.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            dir: None,
            stdin: StdinMode::Inherit,
            stdout: StdoutMode::Capture,
        }
    }

    #[must_use]
    pub fn with_stdin(mut self, stdin: StdinMode) -> Self {
        self.stdin = stdin;
        self
    }

    #[must_use]
    pub fn with_stdout(mut self, stdout: StdoutMode) -> Self {
        self.stdout = stdout;
        self
    }

    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Stdout is discarded.
    #[must_use]
    pub fn silent(self) -> Self {
        self.with_stdout(StdoutMode::Discard)
    }

    /// Program and arguments joined by spaces, for logs and messages.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stderr(Stdio::inherit());
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(match self.stdin {
            StdinMode::Inherit => Stdio::inherit(),
            StdinMode::Null => Stdio::null(),
        });
        cmd.stdout(match self.stdout {
            StdoutMode::Capture => Stdio::piped(),
            StdoutMode::Inherit => Stdio::inherit(),
            StdoutMode::Discard => Stdio::null(),
        });
        cmd
    }
}

/// Result of a program that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured stdout, empty unless [`StdoutMode::Capture`] was requested.
    pub stdout: String,
}

/// Handle to a background process. The child is killed when the guard drops.
#[derive(Debug, Default)]
pub struct ProcessGuard {
    child: Option<Child>,
}

impl ProcessGuard {
    /// A guard that owns no process.
    #[must_use]
    pub fn detached() -> Self {
        Self { child: None }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Background process already gone");
            }
        }
    }
}

/// Capability to run external programs.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the program to completion.
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, ExecError>;

    /// Run the program and hand each stdout line to `visit` as it is produced.
    ///
    /// The invocation's stdout mode is ignored, output is always piped.
    async fn scan_lines(
        &self,
        invocation: &CommandInvocation,
        visit: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), ExecError>;

    /// Start a long-running program and return once it prints its first line.
    async fn spawn(&self, invocation: &CommandInvocation) -> Result<ProcessGuard, ExecError>;

    /// Whether `program` resolves on `PATH`. Does not spawn anything.
    fn program_exists(&self, program: &str) -> bool;
}

/// [`ProcessRunner`] backed by real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, ExecError> {
        debug!(command = %invocation.display(), "Running command");

        let mut child = invocation
            .command()
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let mut stdout = String::new();
        if let Some(pipe) = child.stdout.take() {
            read_to_string_lossy(pipe, &mut stdout)
                .await
                .map_err(|source| ExecError::Io {
                    program: invocation.program.clone(),
                    source,
                })?;
        }

        let status = child.wait().await.map_err(|source| ExecError::Io {
            program: invocation.program.clone(),
            source,
        })?;

        if status.success() {
            Ok(CommandOutput { stdout })
        } else {
            Err(ExecError::Exit {
                program: invocation.program.clone(),
                code: status.code(),
                stdout,
            })
        }
    }

    async fn scan_lines(
        &self,
        invocation: &CommandInvocation,
        visit: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), ExecError> {
        debug!(command = %invocation.display(), "Streaming command output");

        let io_err = |source| ExecError::Io {
            program: invocation.program.clone(),
            source,
        };

        let mut child = invocation
            .clone()
            .with_stdout(StdoutMode::Capture)
            .command()
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let mut scanned = Ok(());
        if let Some(pipe) = child.stdout.take() {
            let mut reader = BufReader::new(pipe);
            let mut line = String::new();
            loop {
                match read_line_lossy(&mut reader, &mut line).await {
                    Ok(true) => visit(&line),
                    Ok(false) => break,
                    Err(e) => {
                        scanned = Err(io_err(e));
                        break;
                    }
                }
            }
        }

        // Always reap the child, even when reading failed.
        let status = child.wait().await.map_err(io_err)?;
        scanned?;
        if status.success() {
            Ok(())
        } else {
            Err(ExecError::Exit {
                program: invocation.program.clone(),
                code: status.code(),
                stdout: String::new(),
            })
        }
    }

    async fn spawn(&self, invocation: &CommandInvocation) -> Result<ProcessGuard, ExecError> {
        debug!(command = %invocation.display(), "Starting background command");

        let mut child = invocation
            .clone()
            .with_stdout(StdoutMode::Capture)
            .command()
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let Some(pipe) = child.stdout.take() else {
            return Ok(ProcessGuard { child: Some(child) });
        };

        let mut reader = BufReader::new(pipe);
        let mut first = String::new();
        match read_line_lossy(&mut reader, &mut first).await {
            Ok(true) => {
                debug!(command = %invocation.display(), line = %first, "Background command ready");
                // Keep draining so the child never blocks on a full pipe.
                tokio::spawn(async move {
                    let mut line = String::new();
                    while let Ok(true) = read_line_lossy(&mut reader, &mut line).await {}
                });
                Ok(ProcessGuard { child: Some(child) })
            }
            Ok(false) => Err(ExecError::NotReady {
                program: invocation.program.clone(),
            }),
            Err(source) => Err(ExecError::Io {
                program: invocation.program.clone(),
                source,
            }),
        }
    }

    fn program_exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

async fn read_to_string_lossy(
    mut pipe: impl AsyncRead + Unpin,
    out: &mut String,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf).await?;
    out.push_str(&String::from_utf8_lossy(&buf));
    Ok(())
}

/// Read one line into `line` without its terminator, replacing invalid UTF-8.
///
/// Returns `false` at end of stream.
async fn read_line_lossy<R>(reader: &mut R, line: &mut String) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(false);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    line.clear();
    line.push_str(&String::from_utf8_lossy(&buf));
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_defaults_capture_stdout() {
        let inv = CommandInvocation::new("crictl", ["ps"]);
        assert_eq!(inv.stdout, StdoutMode::Capture);
        assert_eq!(inv.stdin, StdinMode::Inherit);
        assert!(inv.dir.is_none());
        assert_eq!(inv.display(), "crictl ps");
    }

    #[test]
    fn silent_discards_stdout() {
        let inv = CommandInvocation::new("systemctl", ["daemon-reload"])
            .silent()
            .with_stdin(StdinMode::Null);
        assert_eq!(inv.stdout, StdoutMode::Discard);
        assert_eq!(inv.stdin, StdinMode::Null);
    }

    fn sh(script: &str) -> CommandInvocation {
        CommandInvocation::new("sh", ["-c", script]).with_stdin(StdinMode::Null)
    }

    #[tokio::test]
    async fn run_captures_stdout() {
        let output = SystemRunner::new().run(&sh("echo is healthy")).await.unwrap();
        assert_eq!(output.stdout, "is healthy\n");
    }

    #[tokio::test]
    async fn failed_run_keeps_partial_stdout() {
        let err = SystemRunner::new()
            .run(&sh("echo inactive; exit 3"))
            .await
            .unwrap_err();
        match &err {
            ExecError::Exit { code, .. } => assert_eq!(*code, Some(3)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.captured_stdout(), "inactive\n");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let inv = CommandInvocation::new("definitely-not-a-real-binary-xyz", Vec::<String>::new());
        let err = SystemRunner::new().run(&inv).await.unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn scan_lines_visits_each_line_in_order() {
        let mut seen = Vec::new();
        SystemRunner::new()
            .scan_lines(&sh("printf 'one\\ntwo\\r\\nthree'"), &mut |line| {
                seen.push(line.to_string());
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn scan_lines_survives_invalid_utf8() {
        let mut seen = Vec::new();
        SystemRunner::new()
            .scan_lines(
                &sh("printf 'level=error one\\n\\377\\377 bad\\nlevel=ERROR two\\n'"),
                &mut |line| seen.push(line.to_string()),
            )
            .await
            .unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], "level=error one");
        assert!(seen[1].ends_with(" bad"));
        assert_eq!(seen[2], "level=ERROR two");
    }

    #[tokio::test]
    async fn scan_lines_reports_exit_after_lines() {
        let mut seen = Vec::new();
        let err = SystemRunner::new()
            .scan_lines(&sh("echo error: disk; exit 1"), &mut |line| {
                seen.push(line.to_string());
            })
            .await
            .unwrap_err();
        assert_eq!(seen, vec!["error: disk"]);
        assert!(matches!(err, ExecError::Exit { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn spawn_returns_after_first_line() {
        let guard = SystemRunner::new()
            .spawn(&sh("echo Forwarding from 127.0.0.1:9090; sleep 30"))
            .await
            .unwrap();
        assert!(guard.child.is_some());
    }

    #[tokio::test]
    async fn spawn_of_silent_exit_is_not_ready() {
        let err = SystemRunner::new().spawn(&sh("exit 0")).await.unwrap_err();
        assert!(matches!(err, ExecError::NotReady { .. }));
    }

    #[test]
    fn detached_guard_owns_nothing() {
        assert!(ProcessGuard::detached().child.is_none());
    }
}
