//! Implementation of the `kiln build` command.
//!
//! Evaluates the build script, plans the out-of-date targets, executes the
//! plan over a tracking filesystem, and records signatures for everything
//! that succeeded. Exit status is 0 on success or nothing-to-do, 1 on any
//! build or configuration error; the error printed is the causal one, not
//! "dependency error".

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use owo_colors::OwoColorize;
use tracing::info;

use kiln_lib::build::Build;
use kiln_lib::builder::Builder;
use kiln_lib::fs::{FileSystemOptions, new_filesystem};
use kiln_lib::planner::Planner;

use super::{ProjectOpts, load_project, patterns_or_all};

/// Execute the build command.
pub fn cmd_build(project: &ProjectOpts, targets: &[String], force: bool, fs_type: &str) -> Result<()> {
  let project = load_project(project)?;
  let patterns = patterns_or_all(&project.package, targets);

  // Only consult the snapshot when not force-building; the builder still
  // records fresh signatures either way.
  let mut planner = Planner::new(&project.package);
  if !force {
    planner.snapshot = Some(&project.snapshot);
  }

  let Some(build) = planner.plan(&patterns)? else {
    println!("{}", "nothing to build".yellow());
    return Ok(());
  };

  // Host paths for tracking roots live in a per-run temp directory.
  let mount = tempfile::tempdir().context("failed to create mount directory")?;
  let filesystem = new_filesystem(
    fs_type,
    FileSystemOptions {
      path: project.root.clone(),
      mount_path: mount.path().to_path_buf(),
    },
  )?;
  filesystem.open().context("failed to open filesystem")?;

  info!(root = %project.root.display(), backend = fs_type, "starting build");

  let runtime = tokio::runtime::Runtime::new().context("failed to create async runtime")?;
  let result = runtime.block_on(async {
    let mut pipes = Vec::new();
    pipe_readers(&build, &mut HashSet::new(), &mut pipes);

    let builder = Arc::new(Builder::new(filesystem.clone(), Some(Arc::new(project.snapshot))));
    builder.build(&build).await;

    // The pipes hit EOF once every node has completed; drain them fully
    // before reporting so no command output is lost.
    for pipe in pipes {
      let _ = pipe.await;
    }

    build.root_err()
  });

  // Release any reader sides the piping did not claim.
  build.close();
  filesystem.close().context("failed to close filesystem")?;

  if let Some(err) = result {
    return Err(anyhow!(err));
  }

  println!("{}", "build complete".green().bold());
  Ok(())
}

/// Attach every node's output streams to our own stdout/stderr. Shared
/// nodes are attached once.
fn pipe_readers(
  build: &Arc<Build>,
  seen: &mut HashSet<usize>,
  pipes: &mut Vec<tokio::task::JoinHandle<()>>,
) {
  use tokio::io::AsyncWriteExt;

  if !seen.insert(Arc::as_ptr(build) as usize) {
    return;
  }

  if let Some(mut reader) = build.take_stdout() {
    pipes.push(tokio::spawn(async move {
      let mut stdout = tokio::io::stdout();
      let _ = tokio::io::copy(&mut reader, &mut stdout).await;
      let _ = stdout.flush().await;
    }));
  }
  if let Some(mut reader) = build.take_stderr() {
    pipes.push(tokio::spawn(async move {
      let mut stderr = tokio::io::stderr();
      let _ = tokio::io::copy(&mut reader, &mut stderr).await;
      let _ = stderr.flush().await;
    }));
  }

  for dependency in build.dependencies() {
    pipe_readers(dependency, seen, pipes);
  }
}
