//! Pass-through backend.
//!
//! Commands operate directly on the project tree and nothing is observed:
//! every root points at the project root and the read/write sets stay
//! empty. With this backend signatures fall back to each target's declared
//! inputs.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{FileSystem, FileSystemOptions, Root, TrackingError};

/// Backend name.
pub const TYPE: &str = "direct";

/// A filesystem that tracks nothing.
#[derive(Debug)]
pub struct DirectFileSystem {
  path: PathBuf,
  next_root_id: Mutex<u64>,
}

/// Registry constructor.
pub(crate) fn new_backend(options: FileSystemOptions) -> Result<Arc<dyn FileSystem>, TrackingError> {
  Ok(Arc::new(DirectFileSystem {
    path: options.path,
    next_root_id: Mutex::new(0),
  }))
}

impl FileSystem for DirectFileSystem {
  fn open(&self) -> Result<(), TrackingError> {
    Ok(())
  }

  fn close(&self) -> Result<(), TrackingError> {
    Ok(())
  }

  fn path(&self) -> &Path {
    &self.path
  }

  fn create_root(&self) -> Result<Arc<Root>, TrackingError> {
    let mut next = self.next_root_id.lock().unwrap();
    let id = format!("{:04x}", *next);
    *next += 1;

    // No isolation to offer: the root operates on the real tree.
    Ok(Root::new(id, self.path.clone()))
  }
}
