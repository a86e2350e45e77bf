//! Test helpers shared across kiln-lib unit tests.

use std::sync::Arc;

use crate::package::{Command, Package, Target};

/// A shell command target body.
pub fn shell(source: &str) -> Command {
  Command::Shell {
    source: source.to_string(),
  }
}

/// An exec command target body.
pub fn exec(args: &[&str]) -> Command {
  Command::Exec {
    args: args.iter().map(|s| s.to_string()).collect(),
  }
}

/// A target with a name, inputs, and commands.
pub fn target(name: &str, inputs: &[&str], commands: Vec<Command>) -> Target {
  Target {
    name: name.to_string(),
    inputs: inputs.iter().map(|s| s.to_string()).collect(),
    commands,
    ..Target::default()
  }
}

/// A package from a list of targets.
pub fn package(targets: Vec<Target>) -> Package {
  Package {
    name: "test".to_string(),
    targets: targets.into_iter().map(Arc::new).collect(),
  }
}
