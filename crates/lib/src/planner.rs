//! Build planning.
//!
//! The planner turns a package plus the snapshot state into a build graph.
//! Targets are resolved from user-supplied glob patterns; each target is
//! planned at most once per run so diamond dependencies share a single
//! node, and a clean leaf produces no node at all.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::build::{self, Build};
use crate::package::{Package, Target};
use crate::snapshot::{Snapshot, SnapshotError};

/// Errors raised while constructing a build plan.
#[derive(Debug, Error)]
pub enum PlanError {
  /// A user-supplied pattern matched no target.
  #[error("no targets match pattern: {0}")]
  TargetNotFound(String),

  /// Target inputs form a cycle.
  #[error("dependency cycle detected at target: {0}")]
  Cycle(String),

  /// A user-supplied pattern was not valid glob syntax.
  #[error("invalid target pattern {pattern}: {source}")]
  Pattern {
    pattern: String,
    #[source]
    source: glob::PatternError,
  },

  /// The snapshot store failed while checking dirtiness.
  #[error("snapshot error: {0}")]
  Snapshot(#[from] SnapshotError),
}

/// Creates build plans for a package. Not safe for concurrent use; create
/// one per plan.
pub struct Planner<'a> {
  package: &'a Package,

  /// Dirtiness oracle. `None` plans every reachable target (force
  /// rebuild).
  pub snapshot: Option<&'a Snapshot>,

  /// Per-run memo so a target maps to at most one node.
  builds: HashMap<String, Arc<Build>>,

  /// Names currently being planned, for cycle detection.
  in_progress: HashSet<String>,
}

impl<'a> Planner<'a> {
  /// Create a planner over a package.
  pub fn new(package: &'a Package) -> Self {
    Self {
      package,
      snapshot: None,
      builds: HashMap::new(),
      in_progress: HashSet::new(),
    }
  }

  /// Build a plan for every target matching any of `patterns`.
  ///
  /// Returns `Ok(None)` when nothing is dirty: there is no plan because
  /// there is nothing to build.
  pub fn plan(&mut self, patterns: &[String]) -> Result<Option<Arc<Build>>, PlanError> {
    self.builds.clear();
    self.in_progress.clear();

    let mut dependencies = Vec::new();
    for pattern in patterns {
      let targets = self
        .package
        .match_targets(pattern)
        .map_err(|source| PlanError::Pattern {
          pattern: pattern.clone(),
          source,
        })?;
      if targets.is_empty() {
        return Err(PlanError::TargetNotFound(pattern.clone()));
      }

      for target in targets {
        if let Some(build) = self.plan_target(&target)? {
          dependencies.push(build);
        }
      }
    }

    let dependencies = build::dedupe(dependencies);
    debug!(nodes = self.builds.len(), roots = dependencies.len(), "plan constructed");
    if dependencies.is_empty() {
      return Ok(None);
    }

    Ok(Some(Build::new(None, dependencies)))
  }

  /// Plan a single target, memoizing the node so other dependents share
  /// it. Returns `None` when the target is clean.
  fn plan_target(&mut self, target: &Arc<Target>) -> Result<Option<Arc<Build>>, PlanError> {
    // Reuse the node if another target already depends on it.
    if let Some(build) = self.builds.get(&target.name) {
      return Ok(Some(build.clone()));
    }

    if !self.in_progress.insert(target.name.clone()) {
      return Err(PlanError::Cycle(target.name.clone()));
    }

    // Inputs that resolve to targets become dependency nodes; plain file
    // paths are leaf facts for the snapshotter.
    let mut dependencies = Vec::new();
    for input in &target.inputs {
      if let Some(dependency) = self.package.target(input) {
        if let Some(build) = self.plan_target(&dependency)? {
          dependencies.push(build);
        }
      }
    }

    self.in_progress.remove(&target.name);
    let dependencies = build::dedupe(dependencies);

    // A target with dirty dependencies is dirty by transitive effect;
    // otherwise the snapshotter decides, and no snapshotter means build.
    let dirty = if !dependencies.is_empty() {
      true
    } else {
      match self.snapshot {
        None => true,
        Some(snapshot) => snapshot.is_target_dirty(target)?,
      }
    };

    if !dirty {
      return Ok(None);
    }

    let build = Build::new(Some(target.clone()), dependencies);
    self.builds.insert(target.name.clone(), build.clone());
    Ok(Some(build))
  }
}
