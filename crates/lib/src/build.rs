//! Runtime build nodes.
//!
//! A [`Build`] is the planned, mutable run-state of a single target: its
//! dependency nodes, its output streams, and a one-shot completion latch.
//! The planner constructs the graph; the builder drives it; the front-end
//! drains the streams and inspects [`Build::root_err`] when everything is
//! done.

use std::sync::{Arc, Mutex};

use tokio::io::DuplexStream;
use tokio::sync::watch;

use crate::builder::BuildError;
use crate::package::Target;

/// Capacity of each output pipe. Writers block once the reader falls this
/// far behind, mirroring pipe semantics.
const STREAM_CAPACITY: usize = 256 * 1024;

/// A planned build step for one target, or the synthetic root.
#[derive(Debug)]
pub struct Build {
  /// The target being built. `None` for the synthetic root node.
  target: Option<Arc<Target>>,

  /// Dependency nodes, deduplicated by identity, frozen at plan time.
  dependencies: Vec<Arc<Build>>,

  stdout: Stream,
  stderr: Stream,

  state: Mutex<NodeState>,
  done_tx: watch::Sender<bool>,
  done_rx: watch::Receiver<bool>,
}

#[derive(Debug, Default)]
struct NodeState {
  finished: bool,
  err: Option<BuildError>,
}

#[derive(Debug)]
struct Stream {
  reader: Mutex<Option<DuplexStream>>,
  writer: Mutex<Option<DuplexStream>>,
}

impl Stream {
  fn new() -> Self {
    let (writer, reader) = tokio::io::duplex(STREAM_CAPACITY);
    Self {
      reader: Mutex::new(Some(reader)),
      writer: Mutex::new(Some(writer)),
    }
  }

  fn take_reader(&self) -> Option<DuplexStream> {
    self.reader.lock().unwrap().take()
  }

  fn take_writer(&self) -> Option<DuplexStream> {
    self.writer.lock().unwrap().take()
  }
}

impl Build {
  /// Create a node for `target` with the given dependency nodes.
  pub fn new(target: Option<Arc<Target>>, dependencies: Vec<Arc<Build>>) -> Arc<Self> {
    let (done_tx, done_rx) = watch::channel(false);
    Arc::new(Self {
      target,
      dependencies,
      stdout: Stream::new(),
      stderr: Stream::new(),
      state: Mutex::new(NodeState::default()),
      done_tx,
      done_rx,
    })
  }

  /// The target's name, or the empty string for the root node.
  pub fn name(&self) -> &str {
    self.target.as_ref().map(|t| t.name.as_str()).unwrap_or("")
  }

  /// The target being built, if any.
  pub fn target(&self) -> Option<&Arc<Target>> {
    self.target.as_ref()
  }

  /// The frozen dependency list.
  pub fn dependencies(&self) -> &[Arc<Build>] {
    &self.dependencies
  }

  /// Take the standard output stream. Bytes are produced while the
  /// target's commands run and end with EOF once the node completes.
  /// Returns `None` if the stream was already taken.
  pub fn take_stdout(&self) -> Option<DuplexStream> {
    self.stdout.take_reader()
  }

  /// Take the standard error stream.
  pub fn take_stderr(&self) -> Option<DuplexStream> {
    self.stderr.take_reader()
  }

  pub(crate) fn take_stdout_writer(&self) -> Option<DuplexStream> {
    self.stdout.take_writer()
  }

  pub(crate) fn take_stderr_writer(&self) -> Option<DuplexStream> {
    self.stderr.take_writer()
  }

  /// Block until the node has finished.
  pub async fn wait(&self) {
    let mut done = self.done_rx.clone();
    loop {
      if *done.borrow() {
        return;
      }
      if done.changed().await.is_err() {
        return;
      }
    }
  }

  /// The node's completion status. Valid once [`Build::wait`] has
  /// returned; stable thereafter.
  pub fn err(&self) -> Option<BuildError> {
    self.state.lock().unwrap().err.clone()
  }

  /// Walk the graph and return the first causal error, skipping the
  /// dependency-error and cancellation markers so the user sees the
  /// original failure.
  pub fn root_err(&self) -> Option<BuildError> {
    if let Some(err) = self.err()
      && !matches!(err, BuildError::Dependency | BuildError::Canceled)
    {
      return Some(err);
    }

    self.dependencies.iter().find_map(|dep| dep.root_err())
  }

  /// Mark the node complete, storing its outcome and firing the latch.
  ///
  /// # Panics
  ///
  /// Panics if called twice; a node completes exactly once.
  pub fn done(&self, err: Option<BuildError>) {
    {
      let mut state = self.state.lock().unwrap();
      if state.finished {
        panic!("done fired twice on build node {:?}", self.name());
      }
      state.finished = true;
      state.err = err;
    }

    // Dropping any unused writer halves delivers EOF to the readers.
    drop(self.stdout.take_writer());
    drop(self.stderr.take_writer());

    let _ = self.done_tx.send(true);
  }

  /// Close the reader sides of this node's streams and, recursively, its
  /// dependencies'. Writers still flushing observe a broken pipe, which
  /// the runner tolerates.
  pub fn close(&self) {
    drop(self.stdout.take_reader());
    drop(self.stderr.take_reader());

    for dependency in &self.dependencies {
      dependency.close();
    }
  }
}

/// Deduplicate a list of nodes by identity, preserving first-seen order.
pub(crate) fn dedupe(builds: Vec<Arc<Build>>) -> Vec<Arc<Build>> {
  let mut seen = std::collections::HashSet::new();
  builds
    .into_iter()
    .filter(|b| seen.insert(Arc::as_ptr(b) as usize))
    .collect()
}
