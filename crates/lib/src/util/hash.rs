//! Deterministic hashing of commands and file state.
//!
//! All hashes are lowercase-hex SHA-256. Encodings are stable across runs
//! and platforms: filename lists are sorted, integers are big-endian fixed
//! width, and command variants carry a discriminator token so an exec of
//! `["shell", "x"]` cannot collide with a shell command `"x"`.

use std::fs::{self, Metadata};
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use crate::package::{Command, Target};

/// Hash a target's declared inputs and command sequence.
///
/// Each input is written followed by a NUL. Each command is written as the
/// token `exec` plus its NUL-terminated argv, or the token `shell` plus its
/// source.
pub fn command_hash(target: &Target) -> String {
  let mut hasher = Sha256::new();

  for input in &target.inputs {
    hasher.update(input.as_bytes());
    hasher.update([0u8]);
  }

  for command in &target.commands {
    match command {
      Command::Exec { args } => {
        hasher.update(b"exec");
        for arg in args {
          hasher.update(arg.as_bytes());
          hasher.update([0u8]);
        }
      }
      Command::Shell { source } => {
        hasher.update(b"shell");
        hasher.update(source.as_bytes());
      }
    }
  }

  format!("{:x}", hasher.finalize())
}

/// Hash a file or directory's metadata.
///
/// Regular files hash `mode || mtime_ns || size`; directories hash the mode
/// plus the NUL-delimited sorted entry names, so a directory is dirtied by
/// adding or removing an entry but not by touching entry contents.
///
/// Not-exist errors are left to the caller; everything else is a hard I/O
/// failure.
pub fn file_info_hash(path: &Path) -> io::Result<String> {
  let metadata = fs::metadata(path)?;
  if metadata.is_dir() {
    return dir_info_hash(path, &metadata);
  }

  let mut hasher = Sha256::new();
  hasher.update(file_mode(&metadata).to_be_bytes());
  hasher.update(mtime_nanos(&metadata).to_be_bytes());
  hasher.update(metadata.len().to_be_bytes());
  Ok(format!("{:x}", hasher.finalize()))
}

fn dir_info_hash(path: &Path, metadata: &Metadata) -> io::Result<String> {
  let mut names = Vec::new();
  for entry in fs::read_dir(path)? {
    let entry = entry?;
    names.push(entry.file_name().to_string_lossy().into_owned());
  }
  names.sort();

  let mut hasher = Sha256::new();
  hasher.update(file_mode(metadata).to_be_bytes());
  for name in &names {
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
  }
  Ok(format!("{:x}", hasher.finalize()))
}

/// Hash a file's contents. Directories hash to the empty string.
pub fn file_content_hash(path: &Path) -> io::Result<String> {
  let metadata = fs::metadata(path)?;
  if metadata.is_dir() {
    return Ok(String::new());
  }

  let mut file = fs::File::open(path)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher)?;
  Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
  use std::os::unix::fs::PermissionsExt;
  metadata.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(metadata: &Metadata) -> u32 {
  if metadata.permissions().readonly() { 0o444 } else { 0o666 }
}

fn mtime_nanos(metadata: &Metadata) -> u64 {
  metadata
    .modified()
    .ok()
    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
    .map(|d| d.as_nanos() as u64)
    .unwrap_or(0)
}
