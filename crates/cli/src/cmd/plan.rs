//! Implementation of the `kiln plan` command.
//!
//! Plans like `kiln build` but stops before executing anything, printing
//! the targets that would rebuild in dependency order.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;

use kiln_lib::build::Build;
use kiln_lib::planner::Planner;

use super::{ProjectOpts, load_project, patterns_or_all};

#[derive(Serialize)]
struct PlanSummary {
  /// Targets that would rebuild, dependencies first.
  targets: Vec<String>,
}

/// Execute the plan command.
pub fn cmd_plan(project: &ProjectOpts, targets: &[String], json: bool) -> Result<()> {
  let project = load_project(project)?;
  let patterns = patterns_or_all(&project.package, targets);

  let mut planner = Planner::new(&project.package);
  planner.snapshot = Some(&project.snapshot);
  let plan = planner.plan(&patterns)?;

  let ordered = match &plan {
    Some(build) => collect_post_order(build),
    None => Vec::new(),
  };

  if json {
    let summary = PlanSummary { targets: ordered };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    return Ok(());
  }

  if ordered.is_empty() {
    println!("{}", "nothing to build".yellow());
    return Ok(());
  }

  println!("{}", "would build:".bold());
  for name in &ordered {
    println!("  {}", name.green());
  }

  Ok(())
}

/// Walk the plan depth-first, dependencies before dependents, visiting
/// shared nodes once.
fn collect_post_order(build: &Arc<Build>) -> Vec<String> {
  fn walk(build: &Arc<Build>, seen: &mut HashSet<usize>, out: &mut Vec<String>) {
    if !seen.insert(Arc::as_ptr(build) as usize) {
      return;
    }
    for dependency in build.dependencies() {
      walk(dependency, seen, out);
    }
    if build.target().is_some() {
      out.push(build.name().to_string());
    }
  }

  let mut out = Vec::new();
  walk(build, &mut HashSet::new(), &mut out);
  out
}
