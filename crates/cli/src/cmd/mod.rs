mod build;
mod plan;
mod targets;

pub use build::cmd_build;
pub use plan::cmd_plan;
pub use targets::cmd_targets;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use kiln_lib::consts::BUILD_FILE;
use kiln_lib::package::Package;
use kiln_lib::platform::paths::data_dir;
use kiln_lib::snapshot::Snapshot;

/// Options shared by every subcommand: where the project lives and where
/// its snapshot data goes.
#[derive(Debug, Args)]
pub struct ProjectOpts {
  /// Build script to evaluate, relative to the project root
  #[arg(long, default_value = BUILD_FILE)]
  pub file: PathBuf,

  /// Project root directory
  #[arg(long, default_value = ".")]
  pub root: PathBuf,

  /// Directory snapshot data is stored in
  #[arg(long)]
  pub data_dir: Option<PathBuf>,
}

/// A resolved project: absolute root, evaluated package, snapshot store.
pub struct Project {
  pub root: PathBuf,
  pub package: Package,
  pub snapshot: Snapshot,
}

/// Resolve paths, evaluate the build script, and set up the snapshot
/// store for this project.
pub fn load_project(opts: &ProjectOpts) -> Result<Project> {
  let root = std::fs::canonicalize(&opts.root)
    .with_context(|| format!("project root not found: {}", opts.root.display()))?;

  let build_file = if opts.file.is_absolute() {
    opts.file.clone()
  } else {
    root.join(&opts.file)
  };
  let package = kiln_lib::lua::parse_file(&build_file)
    .with_context(|| format!("failed to evaluate {}", build_file.display()))?;

  // One snapshot tree per project root, keyed by its absolute path, so
  // overlapping projects never share signatures.
  let data_dir = opts.data_dir.clone().unwrap_or_else(data_dir);
  let mut snapshot_path = data_dir.join("snapshots");
  for component in root.components() {
    if let std::path::Component::Normal(part) = component {
      snapshot_path.push(part);
    }
  }
  let snapshot = Snapshot::new(snapshot_path, &root);

  Ok(Project {
    root,
    package,
    snapshot,
  })
}

/// Resolve the requested patterns: all declared targets when none given.
pub fn patterns_or_all(package: &Package, targets: &[String]) -> Vec<String> {
  if targets.is_empty() {
    package.target_names()
  } else {
    targets.to_vec()
  }
}
