//! Implementation of the `kiln targets` command.

use anyhow::Result;
use owo_colors::OwoColorize;

use super::{ProjectOpts, load_project};

/// List the targets the build script declares, in declaration order.
pub fn cmd_targets(project: &ProjectOpts) -> Result<()> {
  let project = load_project(project)?;

  for target in &project.package.targets {
    let marker = if target.phony { "@" } else { " " };
    match &target.title {
      Some(title) => println!("{}{}  {}", marker, target.name, title.dimmed()),
      None => println!("{}{}", marker, target.name),
    }
  }

  Ok(())
}
