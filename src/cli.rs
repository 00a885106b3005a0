use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "finadvise", version, about = "Task, calendar and contact API for financial advisors")]
pub struct Cli {
    /// YAML config file. Falls back to `FINADVISE_CONFIG`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the REST API until interrupted.
    Serve,
    /// Summarize the memory monitor's logs and write an analysis report.
    AnalyzeMemory {
        /// Directory holding `memory-*.log` files; defaults to the configured memory log dir.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Print a signed bearer token for a user id.
    IssueToken {
        #[arg(long)]
        user_id: String,
    },
}
