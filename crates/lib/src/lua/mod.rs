//! Build script evaluation.
//!
//! A `kiln.lua` script declares targets by calling the `target` global:
//!
//! ```lua
//! target("bin/app", {
//!   inputs  = { "main.c", "util.c" },
//!   outputs = { "bin/app" },
//!   workdir = "src",
//!   run = function(ctx)
//!     ctx:exec("cc", "-o", "../bin/app", "main.c", "util.c")
//!     ctx:shell("echo done")
//!   end,
//! })
//! ```
//!
//! Evaluating the script produces an immutable [`Package`]. A name prefixed
//! with `@` declares a phony target with the prefix stripped, and
//! `target(...)` returns the stripped name so later targets can reference
//! it in their `inputs`.

mod ctx;
mod globals;

pub use ctx::TargetCtx;

use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::Lua;
use thiserror::Error;

use crate::package::Package;

/// Errors raised while evaluating a build script.
#[derive(Debug, Error)]
pub enum ParseError {
  /// The build file could not be read.
  #[error("failed to read build file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// The script raised an error or declared something invalid.
  #[error("lua evaluation error: {0}")]
  Lua(#[from] mlua::Error),
}

/// Evaluate a build file into a package.
///
/// The package name is the name of the directory containing the file.
pub fn parse_file(path: &Path) -> Result<Package, ParseError> {
  let source = std::fs::read_to_string(path).map_err(|source| ParseError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  let package_name = path
    .parent()
    .and_then(|p| p.file_name())
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();

  parse_str(&source, &package_name, &path.display().to_string())
}

/// Evaluate build script source into a package.
pub fn parse_str(source: &str, package_name: &str, chunk_name: &str) -> Result<Package, ParseError> {
  let lua = Lua::new();
  let package = Rc::new(RefCell::new(Package::new(package_name)));

  globals::register_globals(&lua, package.clone())?;
  lua.load(source).set_name(chunk_name).exec()?;

  // The `target` closure holds the only other reference; dropping the
  // runtime releases it.
  drop(lua);
  Ok(Rc::try_unwrap(package).map(RefCell::into_inner).unwrap_or_else(|rc| rc.borrow().clone()))
}
