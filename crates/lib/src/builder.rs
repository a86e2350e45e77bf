//! Concurrent execution of a build graph.
//!
//! Every node gets an independent worker task. A mutex-guarded reservation
//! set makes sure a node shared by several parents executes exactly once;
//! the losers simply await the shared node's completion latch. Failures
//! propagate upward as [`BuildError::Dependency`]; a broadcast closing
//! channel winds down sibling branches still waiting at a rendezvous point.
//! Cancellation is cooperative: a child process already running is never
//! killed, and a fully committed peer still records its snapshot.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::build::Build;
use crate::fs::{FileSystem, TrackingError};
use crate::runner;
use crate::snapshot::{Snapshot, SnapshotError};

/// Errors attached to build nodes during execution.
///
/// Cloneable so every parent of a shared node can observe the same outcome;
/// non-clonable sources are wrapped in `Arc`.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
  /// A dependency of this node failed.
  #[error("dependency error")]
  Dependency,

  /// The node was still pending when the build was canceled.
  #[error("build canceled")]
  Canceled,

  /// A command exited with a non-zero status.
  #[error("target {target}: command `{command}` exited with status {status:?}")]
  CommandFailed {
    target: String,
    index: usize,
    command: String,
    status: Option<i32>,
  },

  /// Recording the target's signature failed.
  #[error("snapshot error: {0}")]
  Snapshot(Arc<SnapshotError>),

  /// The tracking filesystem failed.
  #[error("tracking filesystem error: {0}")]
  Tracking(Arc<TrackingError>),

  /// Spawning or wiring a command failed.
  #[error("i/o error: {0}")]
  Io(Arc<io::Error>),
}

/// Executes a build graph. One builder drives one build.
pub struct Builder {
  /// Nodes currently reserved by a worker, keyed by node identity.
  running: Mutex<HashSet<usize>>,

  closing_tx: watch::Sender<bool>,
  closing_rx: watch::Receiver<bool>,

  /// Tracks what commands read and write during execution.
  filesystem: Arc<dyn FileSystem>,

  /// Records signatures after successful targets. `None` disables
  /// persistence (useful in tests).
  snapshot: Option<Arc<Snapshot>>,
}

impl Builder {
  /// Create a builder over a tracking filesystem and snapshot store.
  pub fn new(filesystem: Arc<dyn FileSystem>, snapshot: Option<Arc<Snapshot>>) -> Self {
    let (closing_tx, closing_rx) = watch::channel(false);
    Self {
      running: Mutex::new(HashSet::new()),
      closing_tx,
      closing_rx,
      filesystem,
      snapshot,
    }
  }

  /// Recursively execute `root` and everything beneath it.
  ///
  /// Returns once the root has completed, the closing signal has been
  /// broadcast, and every outstanding worker has wound down. Inspect
  /// [`Build::root_err`] for the outcome.
  pub async fn build(self: &Arc<Self>, root: &Arc<Build>) {
    // Worker guard: every spawned worker holds a sender clone; recv()
    // yields None once the last one is dropped.
    let (guard_tx, mut guard_rx) = mpsc::channel::<()>(1);

    self.clone().build_node(root.clone(), guard_tx).await;

    // Notify remaining workers to wind down. Open branches can still be
    // running if an error bubbled up past them.
    let _ = self.closing_tx.send(true);
    let _ = guard_rx.recv().await;
  }

  /// Process a single node: reserve it, build its dependencies, then run
  /// its commands.
  ///
  /// Returns an explicitly boxed future so the mutual recursion with
  /// [`Builder::build_dependencies`] has a concrete, `Send`-checkable type
  /// instead of an opaque self-referential one.
  fn build_node(
    self: Arc<Self>,
    build: Arc<Build>,
    workers: mpsc::Sender<()>,
  ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
      // Only one worker executes a shared node; everyone else awaits it.
      if !self.reserve(&build) {
        build.wait().await;
        return;
      }

      if let Err(err) = self.build_dependencies(&build, &workers).await {
        build.done(Some(err));
        return;
      }

      let result = self.execute(&build).await;
      build.done(result.err());
    })
  }

  /// Spawn a worker per dependency and rendezvous on their completions.
  ///
  /// The first failed dependency fails this node with
  /// [`BuildError::Dependency`]; the closing broadcast fails it with
  /// [`BuildError::Canceled`]. Workers left behind keep running and are
  /// awaited by [`Builder::build`].
  async fn build_dependencies(
    self: &Arc<Self>,
    build: &Arc<Build>,
    workers: &mpsc::Sender<()>,
  ) -> Result<(), BuildError> {
    let dependencies = build.dependencies();
    if dependencies.is_empty() {
      return Ok(());
    }

    let (done_tx, mut done_rx) = mpsc::channel::<Arc<Build>>(dependencies.len());
    for dependency in dependencies {
      let builder = self.clone();
      let dependency = dependency.clone();
      let done_tx = done_tx.clone();
      let workers = workers.clone();
      tokio::spawn(async move {
        builder.build_node(dependency.clone(), workers).await;
        let _ = done_tx.send(dependency).await;
      });
    }
    drop(done_tx);

    let mut closing = self.closing_rx.clone();
    let mut remaining = dependencies.len();
    while remaining > 0 {
      if *closing.borrow() {
        return Err(BuildError::Canceled);
      }

      tokio::select! {
        completed = done_rx.recv() => {
          match completed {
            Some(dependency) => {
              if dependency.err().is_some() {
                return Err(BuildError::Dependency);
              }
              remaining -= 1;
            }
            None => break,
          }
        }
        changed = closing.changed() => {
          if changed.is_err() {
            return Err(BuildError::Canceled);
          }
          // Loop around; the borrow check above observes the signal.
        }
      }
    }

    Ok(())
  }

  /// Run the node's commands in order and record its signature.
  async fn execute(&self, build: &Arc<Build>) -> Result<(), BuildError> {
    let Some(target) = build.target() else {
      // Synthetic root: nothing to run.
      return Ok(());
    };

    let root = self
      .filesystem
      .create_root()
      .map_err(|e| BuildError::Tracking(Arc::new(e)))?;
    let work_dir = root.path().join(&target.work_dir);

    let Some(mut stdout) = build.take_stdout_writer() else {
      return Err(BuildError::Io(Arc::new(io::Error::other(
        "output stream already taken",
      ))));
    };
    let Some(mut stderr) = build.take_stderr_writer() else {
      return Err(BuildError::Io(Arc::new(io::Error::other(
        "output stream already taken",
      ))));
    };

    info!(name = %target.name, "building target");
    for (index, command) in target.commands.iter().enumerate() {
      match &target.title {
        Some(title) => info!(name = %target.name, "{title}"),
        None => info!(name = %target.name, command = %command, "running command"),
      }

      let status = runner::run_command(command, &work_dir, &mut stdout, &mut stderr)
        .await
        .map_err(|e| BuildError::Io(Arc::new(e)))?;

      if !status.success() {
        warn!(name = %target.name, status = ?status.code(), "command failed");
        return Err(BuildError::CommandFailed {
          target: target.name.clone(),
          index,
          command: command.to_string(),
          status: status.code(),
        });
      }
    }

    if let Some(snapshot) = &self.snapshot {
      // The observed read-set plus the declared inputs; names that do not
      // exist on disk (target names, temporaries) are dropped by the store.
      let mut inputs: BTreeSet<String> = root.readset();
      inputs.extend(target.inputs.iter().cloned());

      snapshot
        .add_target(target, &inputs)
        .map_err(|e| BuildError::Snapshot(Arc::new(e)))?;
      debug!(name = %target.name, "signature recorded");
    }

    Ok(())
  }

  /// Obtain the exclusive right to execute a node. Returns false if
  /// another worker already holds it.
  fn reserve(&self, build: &Arc<Build>) -> bool {
    self.running.lock().unwrap().insert(Arc::as_ptr(build) as usize)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fs::{FileSystemOptions, new_filesystem};
  use crate::package::Target;
  use crate::planner::Planner;
  use crate::util::testutil::{package, shell, target};
  use std::path::Path;
  use tempfile::TempDir;

  fn direct_fs(root: &Path) -> Arc<dyn FileSystem> {
    new_filesystem(
      "direct",
      FileSystemOptions {
        path: root.to_path_buf(),
        mount_path: root.to_path_buf(),
      },
    )
    .unwrap()
  }

  async fn run(root_dir: &Path, build: &Arc<Build>, snapshot: Option<Arc<Snapshot>>) {
    let builder = Arc::new(Builder::new(direct_fs(root_dir), snapshot));
    builder.build(build).await;
  }

  fn append_line(log: &str, line: &str) -> crate::package::Command {
    shell(&format!("echo {line} >> {log}"))
  }

  #[tokio::test]
  async fn linear_chain_runs_in_dependency_order() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("x.txt"), "input").unwrap();

    let pkg = package(vec![
      target("a", &["b"], vec![append_line("order.log", "a")]),
      target("b", &["x.txt"], vec![append_line("order.log", "b")]),
    ]);

    let build = Planner::new(&pkg)
      .plan(&["a".to_string()])
      .unwrap()
      .expect("expected a plan");
    run(temp.path(), &build, None).await;

    assert!(build.root_err().is_none());
    let log = std::fs::read_to_string(temp.path().join("order.log")).unwrap();
    assert_eq!(log, "b\na\n");
  }

  #[tokio::test]
  async fn diamond_dependency_executes_once() {
    let temp = TempDir::new().unwrap();

    let pkg = package(vec![
      target("a", &["b", "c"], vec![append_line("runs.log", "a")]),
      target("b", &["d"], vec![append_line("runs.log", "b")]),
      target("c", &["d"], vec![append_line("runs.log", "c")]),
      target("d", &[], vec![append_line("runs.log", "d")]),
    ]);

    let build = Planner::new(&pkg)
      .plan(&["a".to_string()])
      .unwrap()
      .expect("expected a plan");
    run(temp.path(), &build, None).await;

    assert!(build.root_err().is_none());
    let log = std::fs::read_to_string(temp.path().join("runs.log")).unwrap();
    let d_runs = log.lines().filter(|l| *l == "d").count();
    assert_eq!(d_runs, 1, "shared node must execute exactly once: {log:?}");
  }

  #[tokio::test]
  async fn failure_propagates_as_dependency_error() {
    let temp = TempDir::new().unwrap();

    let pkg = package(vec![
      target("a", &["b", "c"], vec![shell("true")]),
      target("b", &[], vec![shell("exit 3")]),
      target("c", &[], vec![shell("true")]),
    ]);

    let build = Planner::new(&pkg)
      .plan(&["a".to_string()])
      .unwrap()
      .expect("expected a plan");
    run(temp.path(), &build, None).await;

    let node_a = build.dependencies()[0].clone();
    let (node_b, node_c) = {
      let deps = node_a.dependencies();
      if deps[0].name() == "b" {
        (deps[0].clone(), deps[1].clone())
      } else {
        (deps[1].clone(), deps[0].clone())
      }
    };

    assert!(matches!(
      node_b.err(),
      Some(BuildError::CommandFailed { status: Some(3), .. })
    ));
    assert!(matches!(node_a.err(), Some(BuildError::Dependency)));
    // The peer either finished before the closing broadcast or was canceled
    // at a rendezvous point.
    assert!(matches!(node_c.err(), None | Some(BuildError::Canceled)));

    let err = build.root_err().unwrap();
    assert!(matches!(err, BuildError::CommandFailed { status: Some(3), .. }));
  }

  #[tokio::test]
  async fn first_command_failure_aborts_remaining_commands() {
    let temp = TempDir::new().unwrap();

    let pkg = package(vec![Target {
      name: "a".to_string(),
      commands: vec![shell("exit 1"), append_line("never.log", "ran")],
      ..Target::default()
    }]);

    let build = Planner::new(&pkg)
      .plan(&["a".to_string()])
      .unwrap()
      .expect("expected a plan");
    run(temp.path(), &build, None).await;

    assert!(build.root_err().is_some());
    assert!(!temp.path().join("never.log").exists());
  }

  #[tokio::test]
  async fn successful_build_records_signatures() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("x.txt"), "input").unwrap();
    let snapshot = Arc::new(Snapshot::new(temp.path().join("snap"), temp.path()));

    let pkg = package(vec![
      target("a", &["b"], vec![shell("true")]),
      target("b", &["x.txt"], vec![shell("true")]),
    ]);

    let build = Planner::new(&pkg)
      .plan(&["a".to_string()])
      .unwrap()
      .expect("expected a plan");
    run(temp.path(), &build, Some(snapshot.clone())).await;
    assert!(build.root_err().is_none());

    // Both targets are now clean; a fresh plan has nothing to do.
    let mut planner = Planner::new(&pkg);
    planner.snapshot = Some(&snapshot);
    assert!(planner.plan(&["a".to_string()]).unwrap().is_none());
  }

  #[tokio::test]
  async fn failed_target_records_no_signature() {
    let temp = TempDir::new().unwrap();
    let snapshot = Arc::new(Snapshot::new(temp.path().join("snap"), temp.path()));

    let pkg = package(vec![target("a", &[], vec![shell("exit 1")])]);

    let build = Planner::new(&pkg)
      .plan(&["a".to_string()])
      .unwrap()
      .expect("expected a plan");
    run(temp.path(), &build, Some(snapshot.clone())).await;
    assert!(build.root_err().is_some());

    let mut planner = Planner::new(&pkg);
    planner.snapshot = Some(&snapshot);
    assert!(planner.plan(&["a".to_string()]).unwrap().is_some());
  }

  #[tokio::test]
  async fn command_output_streams_to_readers() {
    use tokio::io::AsyncReadExt;

    let temp = TempDir::new().unwrap();
    let pkg = package(vec![target("a", &[], vec![shell("echo hello-stream")])]);

    let build = Planner::new(&pkg)
      .plan(&["a".to_string()])
      .unwrap()
      .expect("expected a plan");
    let node_a = build.dependencies()[0].clone();
    let mut stdout = node_a.take_stdout().unwrap();

    let reader = tokio::spawn(async move {
      let mut buf = String::new();
      stdout.read_to_string(&mut buf).await.unwrap();
      buf
    });

    run(temp.path(), &build, None).await;
    assert_eq!(reader.await.unwrap(), "hello-stream\n");
  }

  #[tokio::test]
  async fn closed_node_does_not_crash_flushing_workers() {
    // Closing the plan drops every reader side; commands that still write
    // hit a broken pipe, which the runner tolerates.
    let temp = TempDir::new().unwrap();
    let pkg = package(vec![target("a", &[], vec![shell("echo into-the-void")])]);

    let build = Planner::new(&pkg)
      .plan(&["a".to_string()])
      .unwrap()
      .expect("expected a plan");
    build.close();
    run(temp.path(), &build, None).await;

    assert!(build.root_err().is_none());
  }

  #[tokio::test]
  async fn exec_commands_run_with_argv() {
    let temp = TempDir::new().unwrap();
    let pkg = package(vec![Target {
      name: "a".to_string(),
      commands: vec![crate::util::testutil::exec(&["/usr/bin/touch", "made.txt"])],
      ..Target::default()
    }]);

    let build = Planner::new(&pkg)
      .plan(&["a".to_string()])
      .unwrap()
      .expect("expected a plan");
    run(temp.path(), &build, None).await;

    assert!(build.root_err().is_none());
    assert!(temp.path().join("made.txt").exists());
  }

  #[tokio::test]
  async fn work_dir_is_joined_to_root() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("sub")).unwrap();

    let pkg = package(vec![Target {
      name: "a".to_string(),
      work_dir: "sub".to_string(),
      commands: vec![shell("touch here.txt")],
      ..Target::default()
    }]);

    let build = Planner::new(&pkg)
      .plan(&["a".to_string()])
      .unwrap()
      .expect("expected a plan");
    run(temp.path(), &build, None).await;

    assert!(build.root_err().is_none());
    assert!(temp.path().join("sub/here.txt").exists());
  }
}
