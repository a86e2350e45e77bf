//! kiln-lib: Core types and logic for the kiln build orchestrator.
//!
//! This crate provides the building blocks behind the `kiln` command:
//! - `Package` / `Target`: the build rules declared in a `kiln.lua` script
//! - `Planner`: turns a package plus the snapshot state into a build graph
//! - `Builder`: executes the build graph concurrently, honoring the DAG
//! - `Snapshot`: persists per-target signatures so unchanged work is skipped
//! - `fs`: the tracking filesystem contract that observes what commands
//!   actually read and write
//!
//! The Lua surface lives in [`lua`]; everything else is runtime-agnostic
//! plumbing that the CLI wires together.

pub mod build;
pub mod builder;
pub mod consts;
pub mod fs;
pub mod label;
pub mod lua;
pub mod package;
pub mod planner;
pub mod platform;
pub mod runner;
pub mod snapshot;
pub mod util;

pub use build::Build;
pub use builder::{BuildError, Builder};
pub use label::Label;
pub use package::{Command, Package, Target};
pub use planner::{PlanError, Planner};
pub use snapshot::{Snapshot, SnapshotError};
