//! kiln: incremental builds scripted in Lua.
//!
//! Provides the `kiln` command with subcommands:
//! - `kiln build [TARGETS..]` - plan and execute the out-of-date targets
//! - `kiln plan  [TARGETS..]` - show what would be rebuilt, without building
//! - `kiln targets`           - list the targets a build script declares

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod cmd;

use cmd::ProjectOpts;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(version, about = "Incremental build orchestrator scripted in Lua")]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Plan and execute the out-of-date targets
  Build {
    /// Target patterns to build; all declared targets when omitted
    targets: Vec<String>,

    #[command(flatten)]
    project: ProjectOpts,

    /// Rebuild even if nothing changed
    #[arg(long)]
    force: bool,

    /// Filesystem backend used to track command I/O
    #[arg(long, default_value = "direct")]
    fs: String,
  },

  /// Show what would be rebuilt, without building
  Plan {
    /// Target patterns to plan; all declared targets when omitted
    targets: Vec<String>,

    #[command(flatten)]
    project: ProjectOpts,

    /// Emit a machine-readable summary
    #[arg(long)]
    json: bool,
  },

  /// List the targets the build script declares
  Targets {
    #[command(flatten)]
    project: ProjectOpts,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
  FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .without_time()
    .with_writer(std::io::stderr)
    .init();

  match cli.command {
    Commands::Build {
      targets,
      project,
      force,
      fs,
    } => cmd::cmd_build(&project, &targets, force, &fs),
    Commands::Plan {
      targets,
      project,
      json,
    } => cmd::cmd_plan(&project, &targets, json),
    Commands::Targets { project } => cmd::cmd_targets(&project),
  }
}
