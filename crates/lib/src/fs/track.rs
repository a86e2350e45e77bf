//! Tracking file service.
//!
//! The server-side engine a protocol frontend (9P, FUSE) drives. The
//! frontend maps wire requests onto the operations here; each operation
//! resolves the root from the request path, performs the real I/O against
//! the project tree, and records the project-relative name into the root's
//! read or write set:
//!
//! - opening a file for reading (or read/write) records a read,
//! - creating, writing, removing, renaming, truncating, or changing the
//!   metadata of a file records a write.
//!
//! Roots are isolated: parallel builds over the same project tree collect
//! independent sets. The mount syscall itself is out of scope; the service
//! only allocates the host paths (`<mount>/<id>`) the frontend exposes.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tracing::trace;

use super::{FileSystem, FileSystemOptions, Root, TrackingError};

/// Backend name.
pub const TYPE: &str = "track";

/// Access mode for [`TrackingFileSystem::open_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
  Read,
  Write,
  ReadWrite,
}

/// A file service that mediates a project tree and records access per root.
#[derive(Debug)]
pub struct TrackingFileSystem {
  path: PathBuf,
  mount_path: PathBuf,
  state: Mutex<ServeState>,
}

#[derive(Debug, Default)]
struct ServeState {
  roots: HashMap<String, Arc<Root>>,
  next_root_id: u64,
}

/// Registry constructor.
pub(crate) fn new_backend(options: FileSystemOptions) -> Result<Arc<dyn FileSystem>, TrackingError> {
  Ok(Arc::new(TrackingFileSystem::new(options.path, options.mount_path)))
}

impl FileSystem for TrackingFileSystem {
  fn open(&self) -> Result<(), TrackingError> {
    // The frontend owns listeners and mounts; serving-side state needs no
    // setup beyond verifying the tree exists.
    fs::metadata(&self.path)?;
    Ok(())
  }

  fn close(&self) -> Result<(), TrackingError> {
    Ok(())
  }

  fn path(&self) -> &Path {
    &self.path
  }

  fn create_root(&self) -> Result<Arc<Root>, TrackingError> {
    let mut state = self.state.lock().unwrap();
    let id = format!("{:04x}", state.next_root_id);
    state.next_root_id += 1;

    let root = Root::new(id.clone(), self.mount_path.join(&id));
    state.roots.insert(id, root.clone());
    Ok(root)
  }
}

impl TrackingFileSystem {
  /// Create a service mediating `path`, allocating host paths under
  /// `mount_path`.
  pub fn new(path: impl Into<PathBuf>, mount_path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      mount_path: mount_path.into(),
      state: Mutex::new(ServeState::default()),
    }
  }

  /// Look up a root by id.
  pub fn root(&self, id: &str) -> Option<Arc<Root>> {
    self.state.lock().unwrap().roots.get(id).cloned()
  }

  /// Resolve a host path `<mount>/<id>/rel…` into its root and the
  /// project-relative remainder.
  pub fn resolve(&self, path: &Path) -> Result<(Arc<Root>, String), TrackingError> {
    let relative = path
      .strip_prefix(&self.mount_path)
      .map_err(|_| TrackingError::OutsideTree(path.to_path_buf()))?;

    let mut components = relative.components();
    let Some(Component::Normal(id)) = components.next() else {
      return Err(TrackingError::OutsideTree(path.to_path_buf()));
    };
    let id = id.to_string_lossy();

    let Some(root) = self.root(&id) else {
      return Err(TrackingError::OutsideTree(path.to_path_buf()));
    };

    Ok((root, normalize(components.as_path())))
  }

  /// Open a file, recording a read and/or write on the owning root.
  pub fn open_file(&self, root_id: &str, name: &str, mode: OpenMode) -> io::Result<fs::File> {
    let (root, name, full) = self.locate(root_id, name)?;
    trace!(root = root.id(), name = %name, ?mode, "open");

    let file = match mode {
      OpenMode::Read => fs::File::open(&full)?,
      OpenMode::Write => fs::File::options().write(true).open(&full)?,
      OpenMode::ReadWrite => fs::File::options().read(true).write(true).open(&full)?,
    };

    match mode {
      OpenMode::Read => root.add_to_readset(name),
      OpenMode::Write => root.add_to_writeset(name),
      OpenMode::ReadWrite => {
        root.add_to_readset(name.clone());
        root.add_to_writeset(name);
      }
    }

    Ok(file)
  }

  /// Create (or truncate) a file, recording a write.
  pub fn create_file(&self, root_id: &str, name: &str) -> io::Result<fs::File> {
    let (root, name, full) = self.locate(root_id, name)?;
    trace!(root = root.id(), name = %name, "create");

    let file = fs::File::create(&full)?;
    root.add_to_writeset(name);
    Ok(file)
  }

  /// Create a directory, recording a write.
  pub fn create_dir(&self, root_id: &str, name: &str) -> io::Result<()> {
    let (root, name, full) = self.locate(root_id, name)?;
    fs::create_dir(&full)?;
    root.add_to_writeset(name);
    Ok(())
  }

  /// List a directory, recording a read. Entry names are sorted.
  pub fn read_dir(&self, root_id: &str, name: &str) -> io::Result<Vec<String>> {
    let (root, name, full) = self.locate(root_id, name)?;

    let mut entries = Vec::new();
    for entry in fs::read_dir(&full)? {
      entries.push(entry?.file_name().to_string_lossy().into_owned());
    }
    entries.sort();

    root.add_to_readset(name);
    Ok(entries)
  }

  /// Remove a file or empty directory, recording a write.
  pub fn remove(&self, root_id: &str, name: &str) -> io::Result<()> {
    let (root, name, full) = self.locate(root_id, name)?;
    trace!(root = root.id(), name = %name, "remove");

    if full.is_dir() {
      fs::remove_dir(&full)?;
    } else {
      fs::remove_file(&full)?;
    }
    root.add_to_writeset(name);
    Ok(())
  }

  /// Rename within the tree, recording writes on both names.
  pub fn rename(&self, root_id: &str, from: &str, to: &str) -> io::Result<()> {
    let (root, from, from_full) = self.locate(root_id, from)?;
    let (_, to, to_full) = self.locate(root_id, to)?;
    trace!(root = root.id(), from = %from, to = %to, "rename");

    fs::rename(&from_full, &to_full)?;
    root.add_to_writeset(from);
    root.add_to_writeset(to);
    Ok(())
  }

  /// Change permissions, recording a write.
  #[cfg(unix)]
  pub fn set_mode(&self, root_id: &str, name: &str, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let (root, name, full) = self.locate(root_id, name)?;
    fs::set_permissions(&full, fs::Permissions::from_mode(mode))?;
    root.add_to_writeset(name);
    Ok(())
  }

  /// Change the modification time, recording a write.
  pub fn set_mtime(&self, root_id: &str, name: &str, mtime: SystemTime) -> io::Result<()> {
    let (root, name, full) = self.locate(root_id, name)?;
    let file = fs::File::options().write(true).open(&full)?;
    file.set_modified(mtime)?;
    root.add_to_writeset(name);
    Ok(())
  }

  /// Truncate a file to `len`, recording a write.
  pub fn truncate(&self, root_id: &str, name: &str, len: u64) -> io::Result<()> {
    let (root, name, full) = self.locate(root_id, name)?;
    let file = fs::File::options().write(true).open(&full)?;
    file.set_len(len)?;
    root.add_to_writeset(name);
    Ok(())
  }

  /// Stat a file. Stat alone records nothing.
  pub fn stat(&self, root_id: &str, name: &str) -> io::Result<fs::Metadata> {
    let (_, _, full) = self.locate(root_id, name)?;
    fs::metadata(&full)
  }

  /// Resolve a root id and name to the root, the normalized
  /// project-relative name, and the full on-disk path.
  fn locate(&self, root_id: &str, name: &str) -> io::Result<(Arc<Root>, String, PathBuf)> {
    let Some(root) = self.root(root_id) else {
      return Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("unknown tracking root: {root_id}"),
      ));
    };

    let name = normalize(Path::new(name));
    let full = self.path.join(&name);
    Ok((root, name, full))
  }
}

/// Strip leading separators and current-dir markers so recorded names are
/// clean project-relative paths.
fn normalize(path: &Path) -> String {
  let mut parts: Vec<String> = Vec::new();
  for component in path.components() {
    match component {
      Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
      Component::ParentDir => {
        parts.pop();
      }
      _ => {}
    }
  }
  parts.join("/")
}
