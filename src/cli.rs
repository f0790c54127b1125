use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// fixloop: run a lint/build/test task and repair it with verified patches
#[derive(Parser, Debug, Clone)]
#[command(name = "fixloop", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Repository root (default: current directory)
    #[arg(long, global = true)]
    pub repo: Option<PathBuf>,

    /// Path to config file (default: <repo>/.fixloop/config.toml, optional)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Run a task and repair the errors it reports
    Run(RunArgs),

    /// Apply a unified diff with the safety gate, backup and dry-run check
    Apply {
        /// Diff file to apply
        #[arg(long)]
        diff: PathBuf,

        /// Maximum changed lines (default: 500)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        max_lines: Option<u64>,

        /// Apply without asking for confirmation
        #[arg(long, short)]
        yes: bool,
    },

    /// Print error locations found in tool output (file or stdin)
    Errors {
        /// File holding the tool output; reads stdin when omitted
        file: Option<PathBuf>,

        /// Maximum number of locations to print
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        max_errors: Option<u64>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Named task (lint, test, build or a [tasks] entry)
    #[arg(long)]
    pub task: Option<String>,

    /// Shell command to run instead of the task mapping
    #[arg(long)]
    pub cmd: Option<String>,

    /// Maximum error locations per assessment
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_errors: Option<u64>,

    /// Outer attempts (default: 2, 6 for lint)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub attempts: Option<u32>,

    /// Fix requests per attempt before giving up
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub fix_rounds: Option<u32>,

    /// Maximum changed lines per patch
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_lines: Option<u64>,

    /// Files a patch may touch (0 = every located file)
    #[arg(long)]
    pub max_files: Option<u64>,

    /// Request and apply fixes (default for lint)
    #[arg(long, conflicts_with = "no_auto")]
    pub auto: bool,

    /// Only report located errors
    #[arg(long)]
    pub no_auto: bool,

    /// Repair warnings even when the task succeeds (default for lint)
    #[arg(long, conflicts_with = "no_fix_warnings")]
    pub fix_warnings: bool,

    /// Stop once the task succeeds, even with warnings
    #[arg(long)]
    pub no_fix_warnings: bool,

    /// Save the last prompt, response and cleaned diff under .fixloop/
    #[arg(long)]
    pub dump_prompt: bool,

    /// Assistant model
    #[arg(long)]
    pub model: Option<String>,

    /// Assistant base URL
    #[arg(long)]
    pub assistant_url: Option<String>,
}

impl RunArgs {
    pub fn auto_flag(&self) -> Option<bool> {
        tri_state(self.auto, self.no_auto)
    }

    pub fn fix_warnings_flag(&self) -> Option<bool> {
        tri_state(self.fix_warnings, self.no_fix_warnings)
    }
}

fn tri_state(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}
