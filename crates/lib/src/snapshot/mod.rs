//! Target signature persistence and dirtiness checking.
//!
//! The snapshot store keeps one file per target under a configured root
//! directory. After a successful build the builder records the target's
//! command hash plus a snapshot of every input file it observed; on the next
//! run the planner asks [`Snapshot::is_target_dirty`] to decide whether the
//! target can be skipped.
//!
//! # Storage layout
//!
//! ```text
//! <snapshot_root>/<target-name>     # binary TargetSignature record
//! ```
//!
//! Target names may contain slashes; parent directories are created as
//! needed. Writes are atomic (write to temp, then rename) so concurrent
//! target completions and abrupt termination never leave a torn record.

pub mod codec;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::package::Target;
use crate::util::hash::{command_hash, file_content_hash, file_info_hash};

use codec::{FileSignature, TargetSignature};

/// Errors raised by the snapshot store.
///
/// Not-exist conditions are not errors: a missing signature means dirty, and
/// a missing input file is assumed to be temporary.
#[derive(Debug, Error)]
pub enum SnapshotError {
  /// Failed to read a signature file.
  #[error("failed to read signature: {0}")]
  Read(#[source] io::Error),

  /// Failed to write a signature file.
  #[error("failed to write signature: {0}")]
  Write(#[source] io::Error),

  /// Failed to create the snapshot directory tree.
  #[error("failed to create snapshot directory: {0}")]
  CreateDir(#[source] io::Error),

  /// Failed to stat or hash an input file.
  #[error("failed to hash input {name}: {source}")]
  HashInput {
    name: String,
    #[source]
    source: io::Error,
  },

  /// A signature file did not decode.
  #[error("malformed signature record: {0}")]
  Decode(#[from] prost::DecodeError),
}

/// Persisted state of the build system: target signatures keyed by name.
#[derive(Debug)]
pub struct Snapshot {
  /// Directory the signature files live in.
  path: PathBuf,

  /// Project root input file names are resolved against.
  root: PathBuf,
}

impl Snapshot {
  /// Create a snapshot store rooted at `path`, resolving input names
  /// against the project `root`.
  pub fn new(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      root: root.into(),
    }
  }

  /// Directory the signature files live in.
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Project root input names are resolved against.
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Record a target's signature after a successful build.
  ///
  /// `inputs` are project-relative file names; names that no longer exist
  /// on disk are silently dropped, they were temporary files.
  pub fn add_target(&self, target: &Target, inputs: &BTreeSet<String>) -> Result<(), SnapshotError> {
    let mut files = Vec::with_capacity(inputs.len());
    for name in inputs {
      let full = self.root.join(name);

      let info_hash = match file_info_hash(&full) {
        Ok(hash) => hash,
        Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
        Err(e) => return Err(SnapshotError::HashInput { name: name.clone(), source: e }),
      };
      let content_hash = match file_content_hash(&full) {
        Ok(hash) => hash,
        Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
        Err(e) => return Err(SnapshotError::HashInput { name: name.clone(), source: e }),
      };

      files.push(FileSignature {
        name: name.clone(),
        info_hash,
        content_hash,
        unknown: Vec::new(),
      });
    }

    let record = TargetSignature {
      name: target.name.clone(),
      hash: command_hash(target),
      inputs: files,
      unknown: Vec::new(),
    };

    debug!(name = %target.name, inputs = record.inputs.len(), "recording signature");
    self.write_record(&record)
  }

  /// Report whether a target must be rebuilt.
  ///
  /// A target is dirty when it has no signature, when its command hash
  /// changed, or when any snapshotted input file disappeared or changed.
  /// The cheap metadata hash alone is never conclusive for a regular file:
  /// a touch that left the bytes alone must not rebuild, and a rewrite
  /// that preserved size and mtime must. The content hash decides both.
  /// Directories carry no content hash, so a membership change is final.
  pub fn is_target_dirty(&self, target: &Target) -> Result<bool, SnapshotError> {
    let Some(record) = self.read_record(&target.name)? else {
      return Ok(true);
    };

    if record.hash != command_hash(target) {
      return Ok(true);
    }

    for file in &record.inputs {
      let full = self.root.join(&file.name);

      match file_info_hash(&full) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(SnapshotError::HashInput { name: file.name.clone(), source: e }),
        Ok(hash) if hash != file.info_hash && file.content_hash.is_empty() => {
          // A directory's entry list changed.
          return Ok(true);
        }
        Ok(_) => {}
      }

      match file_content_hash(&full) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(SnapshotError::HashInput { name: file.name.clone(), source: e }),
        Ok(hash) if hash != file.content_hash => return Ok(true),
        Ok(_) => {}
      }
    }

    Ok(false)
  }

  fn signature_path(&self, name: &str) -> PathBuf {
    self.path.join(name)
  }

  fn read_record(&self, name: &str) -> Result<Option<TargetSignature>, SnapshotError> {
    let buf = match fs::read(self.signature_path(name)) {
      Ok(buf) => buf,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(SnapshotError::Read(e)),
    };

    Ok(Some(TargetSignature::decode(&buf)?))
  }

  fn write_record(&self, record: &TargetSignature) -> Result<(), SnapshotError> {
    let path = self.signature_path(&record.name);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(SnapshotError::CreateDir)?;
    }

    // Write to temp, then rename, so a record is never observed half-written.
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);
    fs::write(&temp_path, record.encode()).map_err(SnapshotError::Write)?;
    fs::rename(&temp_path, &path).map_err(SnapshotError::Write)?;

    Ok(())
  }
}
