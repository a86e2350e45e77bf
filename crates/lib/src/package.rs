//! The package model: targets, commands, and lookup.
//!
//! A [`Package`] is the immutable output of evaluating a build script. The
//! planner and builder only ever read it.

use std::fmt;
use std::sync::Arc;

use glob::{MatchOptions, Pattern, PatternError};

/// A collection of targets sharing a project root.
#[derive(Debug, Clone, Default)]
pub struct Package {
  /// Package name, usually the directory containing the build script.
  pub name: String,

  /// Declared targets, in declaration order.
  pub targets: Vec<Arc<Target>>,
}

impl Package {
  /// Create an empty package.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      targets: Vec::new(),
    }
  }

  /// Look up a target by name or by declared output.
  ///
  /// The target-name space is scanned first, so a target whose name equals
  /// `name` wins over an earlier target that merely declares `name` as an
  /// output.
  pub fn target(&self, name: &str) -> Option<Arc<Target>> {
    if let Some(target) = self.targets.iter().find(|t| t.name == name) {
      return Some(target.clone());
    }

    self
      .targets
      .iter()
      .find(|t| t.outputs.iter().any(|output| output == name))
      .cloned()
  }

  /// Return every target whose name or declared outputs match a glob
  /// pattern.
  pub fn match_targets(&self, pattern: &str) -> Result<Vec<Arc<Target>>, PatternError> {
    let pattern = Pattern::new(pattern)?;
    Ok(
      self
        .targets
        .iter()
        .filter(|t| t.matches(&pattern))
        .cloned()
        .collect(),
    )
  }

  /// Names of all declared targets, in declaration order.
  pub fn target_names(&self) -> Vec<String> {
    self.targets.iter().map(|t| t.name.clone()).collect()
  }
}

/// A buildable rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Target {
  /// Unique identifier within the package.
  pub name: String,

  /// True if the target produces no file output (e.g. `test`, `clean`).
  pub phony: bool,

  /// Text shown to users during execution instead of the raw commands.
  pub title: Option<String>,

  /// Working directory commands run from, relative to the package root.
  pub work_dir: String,

  /// Commands executed in order to build the target.
  pub commands: Vec<Command>,

  /// Input references: either other target names within the package, or
  /// plain file paths relative to the package root.
  pub inputs: Vec<String>,

  /// Files retained after the build. Anything written outside this set is
  /// assumed to be temporary.
  pub outputs: Vec<String>,
}

impl Target {
  fn matches(&self, pattern: &Pattern) -> bool {
    // Path-glob semantics: `*` and `?` do not cross separators.
    let options = MatchOptions {
      require_literal_separator: true,
      ..MatchOptions::default()
    };

    pattern.matches_with(&self.name, options)
      || self
        .outputs
        .iter()
        .any(|output| pattern.matches_with(output, options))
  }
}

/// An executable command belonging to a target.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
  /// An argv-style invocation against the OS exec().
  Exec { args: Vec<String> },

  /// A script fed to a POSIX shell via stdin.
  Shell { source: String },
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Command::Exec { args } => write!(f, "{}", args.join(" ")),
      Command::Shell { source } => write!(f, "{}", source),
    }
  }
}
