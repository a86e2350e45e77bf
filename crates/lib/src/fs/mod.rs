//! The tracking filesystem contract.
//!
//! Build commands do their I/O through a filesystem backend so the builder
//! can feed the snapshotter the read-set that was actually observed at
//! runtime rather than a declared one. Each build node gets an isolated
//! [`Root`]: a short identifier, a host path commands use as their working
//! directory base, and independently tracked read/write sets.
//!
//! Backends are registered by name; the protocol a backend speaks (9P,
//! FUSE, nothing at all) is its own business as long as the read/write-set
//! semantics hold.

pub mod direct;
pub mod track;

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use thiserror::Error;

/// Errors raised by filesystem backends.
#[derive(Debug, Error)]
pub enum TrackingError {
  /// No backend is registered under the requested name.
  #[error("unregistered filesystem backend: {0}")]
  Unregistered(String),

  /// A path does not belong to the tracked tree.
  #[error("path is outside the tracked tree: {0}")]
  OutsideTree(PathBuf),

  /// Backend I/O failed.
  #[error("filesystem i/o error: {0}")]
  Io(#[from] io::Error),
}

/// Options passed to a backend constructor.
#[derive(Debug, Clone)]
pub struct FileSystemOptions {
  /// The on-disk project tree being mediated.
  pub path: PathBuf,

  /// Directory root host paths are allocated under.
  pub mount_path: PathBuf,
}

/// A way to mediate build command I/O and track reads and writes.
pub trait FileSystem: Send + Sync + std::fmt::Debug {
  /// Start serving. Called once before the build.
  fn open(&self) -> Result<(), TrackingError>;

  /// Stop serving. Called once after the build.
  fn close(&self) -> Result<(), TrackingError>;

  /// The underlying on-disk path being mediated.
  fn path(&self) -> &Path;

  /// Allocate an isolated view whose I/O is tracked independently of
  /// other roots.
  fn create_root(&self) -> Result<Arc<Root>, TrackingError>;
}

/// An isolated view of the project tree for one build node.
///
/// Roots are shared between the serving side (which records accesses) and
/// the builder (which collects the sets after commands complete), so the
/// sets live behind mutexes.
#[derive(Debug)]
pub struct Root {
  id: String,
  path: PathBuf,
  readset: Mutex<BTreeSet<String>>,
  writeset: Mutex<BTreeSet<String>>,
}

impl Root {
  /// Create a root identified by `id`, with commands operating at `path`.
  pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Arc<Self> {
    Arc::new(Self {
      id: id.into(),
      path: path.into(),
      readset: Mutex::new(BTreeSet::new()),
      writeset: Mutex::new(BTreeSet::new()),
    })
  }

  /// Short identifier for this root.
  pub fn id(&self) -> &str {
    &self.id
  }

  /// Absolute path commands operate at.
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Project-relative paths observed as reads since the root was created.
  pub fn readset(&self) -> BTreeSet<String> {
    self.readset.lock().unwrap().clone()
  }

  /// Project-relative paths observed as writes since the root was created.
  pub fn writeset(&self) -> BTreeSet<String> {
    self.writeset.lock().unwrap().clone()
  }

  /// Record a read of a project-relative path.
  pub fn add_to_readset(&self, name: impl Into<String>) {
    self.readset.lock().unwrap().insert(name.into());
  }

  /// Record a write of a project-relative path.
  pub fn add_to_writeset(&self, name: impl Into<String>) {
    self.writeset.lock().unwrap().insert(name.into());
  }
}

/// A backend constructor.
pub type NewFileSystemFn = fn(FileSystemOptions) -> Result<Arc<dyn FileSystem>, TrackingError>;

static REGISTRY: LazyLock<Mutex<HashMap<String, NewFileSystemFn>>> = LazyLock::new(|| {
  let mut backends: HashMap<String, NewFileSystemFn> = HashMap::new();
  backends.insert(direct::TYPE.to_string(), direct::new_backend);
  backends.insert(track::TYPE.to_string(), track::new_backend);
  Mutex::new(backends)
});

/// Register a backend constructor under a name.
///
/// # Panics
///
/// Panics if the name is already taken; registration happens at program
/// init and a duplicate is a programmer error.
pub fn register_filesystem(name: &str, constructor: NewFileSystemFn) {
  let mut registry = REGISTRY.lock().unwrap();
  if registry.contains_key(name) {
    panic!("filesystem backend already registered: {name}");
  }
  registry.insert(name.to_string(), constructor);
}

/// Construct a backend by name.
pub fn new_filesystem(
  name: &str,
  options: FileSystemOptions,
) -> Result<Arc<dyn FileSystem>, TrackingError> {
  let constructor = {
    let registry = REGISTRY.lock().unwrap();
    registry.get(name).copied()
  };

  match constructor {
    Some(constructor) => constructor(options),
    None => Err(TrackingError::Unregistered(name.to_string())),
  }
}
