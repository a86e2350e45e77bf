//! Command runners.
//!
//! Stateless helpers that turn a [`Command`] into a child process with its
//! working directory under the tracking root and its output wired into the
//! owning build node's streams. Exec commands are spawned argv-style; shell
//! commands are fed to a POSIX shell on stdin.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tracing::trace;

use crate::package::Command;

/// Shell used for [`Command::Shell`] sources.
const SHELL: &str = "/bin/sh";

/// Run a single command to completion.
///
/// Bytes the process produces are copied into `stdout`/`stderr`; draining
/// those streams after the node completes yields everything it wrote. A
/// non-zero exit is reported through the returned [`ExitStatus`], not as an
/// error.
pub async fn run_command<O, E>(
  command: &Command,
  work_dir: &Path,
  stdout: &mut O,
  stderr: &mut E,
) -> io::Result<ExitStatus>
where
  O: AsyncWrite + Unpin,
  E: AsyncWrite + Unpin,
{
  match command {
    Command::Exec { args } => {
      let Some((program, rest)) = args.split_first() else {
        return Err(io::Error::new(
          io::ErrorKind::InvalidInput,
          "exec command requires a program name",
        ));
      };

      trace!(program = %program, "spawning exec command");
      let child = tokio::process::Command::new(program)
        .args(rest)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

      wire(child, None, stdout, stderr).await
    }
    Command::Shell { source } => {
      trace!(shell = SHELL, "spawning shell command");
      let child = tokio::process::Command::new(SHELL)
        .current_dir(work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

      wire(child, Some(source), stdout, stderr).await
    }
  }
}

/// Feed stdin (for shell sources), drain the output pipes, and wait.
async fn wire<O, E>(
  mut child: Child,
  source: Option<&str>,
  stdout: &mut O,
  stderr: &mut E,
) -> io::Result<ExitStatus>
where
  O: AsyncWrite + Unpin,
  E: AsyncWrite + Unpin,
{
  let mut child_stdout = child
    .stdout
    .take()
    .ok_or_else(|| io::Error::other("child stdout not captured"))?;
  let mut child_stderr = child
    .stderr
    .take()
    .ok_or_else(|| io::Error::other("child stderr not captured"))?;
  let child_stdin = child.stdin.take();

  let feed = async {
    if let (Some(mut stdin), Some(source)) = (child_stdin, source) {
      // The shell may exit without reading everything; that's its call.
      let _ = stdin.write_all(source.as_bytes()).await;
      let _ = stdin.shutdown().await;
    }
  };

  let (status, _, _, _) = tokio::join!(
    child.wait(),
    feed,
    drain(&mut child_stdout, stdout),
    drain(&mut child_stderr, stderr),
  );

  status
}

/// Copy everything from `reader` into `writer`, tolerating a closed
/// reader side on the destination.
async fn drain<R, W>(reader: &mut R, writer: &mut W)
where
  R: AsyncRead + Unpin,
  W: AsyncWrite + Unpin,
{
  let _ = tokio::io::copy(reader, writer).await;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{exec, shell};
  use tempfile::TempDir;

  async fn run_collect(command: &Command, work_dir: &Path) -> (ExitStatus, String, String) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let status = run_command(command, work_dir, &mut stdout, &mut stderr)
      .await
      .unwrap();
    (
      status,
      String::from_utf8_lossy(&stdout).into_owned(),
      String::from_utf8_lossy(&stderr).into_owned(),
    )
  }

  #[tokio::test]
  async fn exec_runs_argv() {
    let temp = TempDir::new().unwrap();
    let (status, stdout, _) = run_collect(&exec(&["/bin/echo", "hello"]), temp.path()).await;
    assert!(status.success());
    assert_eq!(stdout, "hello\n");
  }

  #[tokio::test]
  async fn exec_args_are_literal() {
    let temp = TempDir::new().unwrap();
    let (status, stdout, _) = run_collect(&exec(&["/bin/echo", "$HOME", "a b"]), temp.path()).await;
    assert!(status.success());
    assert_eq!(stdout, "$HOME a b\n");
  }

  #[tokio::test]
  async fn shell_source_is_fed_on_stdin() {
    let temp = TempDir::new().unwrap();
    let source = "x=1\ny=2\necho $((x + y))";
    let (status, stdout, _) = run_collect(&shell(source), temp.path()).await;
    assert!(status.success());
    assert_eq!(stdout, "3\n");
  }

  #[tokio::test]
  async fn nonzero_exit_is_reported_in_status() {
    let temp = TempDir::new().unwrap();
    let (status, _, _) = run_collect(&shell("exit 7"), temp.path()).await;
    assert_eq!(status.code(), Some(7));
  }

  #[tokio::test]
  async fn stderr_is_wired_separately() {
    let temp = TempDir::new().unwrap();
    let (status, stdout, stderr) = run_collect(&shell("echo out; echo err >&2"), temp.path()).await;
    assert!(status.success());
    assert_eq!(stdout, "out\n");
    assert_eq!(stderr, "err\n");
  }

  #[tokio::test]
  async fn commands_run_in_work_dir() {
    let temp = TempDir::new().unwrap();
    let (status, stdout, _) = run_collect(&shell("pwd"), temp.path()).await;
    assert!(status.success());
    let canonical = temp.path().canonicalize().unwrap();
    assert_eq!(stdout.trim(), canonical.to_string_lossy());
  }

  #[tokio::test]
  async fn empty_exec_is_invalid_input() {
    let temp = TempDir::new().unwrap();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let err = run_command(
      &Command::Exec { args: Vec::new() },
      temp.path(),
      &mut stdout,
      &mut stderr,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
  }

  #[tokio::test]
  async fn missing_program_is_a_spawn_error() {
    let temp = TempDir::new().unwrap();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let result = run_command(
      &exec(&["/nonexistent/kiln-no-such-binary"]),
      temp.path(),
      &mut stdout,
      &mut stderr,
    )
    .await;
    assert!(result.is_err());
  }
}
