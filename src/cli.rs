use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sessync",
    version,
    about = "Mirror on-disk session state into a queryable index"
)]
pub struct Cli {
    /// Database path
    #[arg(long, env = "SESSYNC_DB", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sync one session directory into the index
    Sync(SyncArgs),
    /// Sync every session under a project
    SyncProject(SyncProjectArgs),
    /// Print the indexed record for a session
    Show(ShowArgs),
}

#[derive(Args)]
pub struct TargetArgs {
    /// Project working directory (defaults to current)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Project id to link synced sessions to
    #[arg(long)]
    pub project_id: Option<i64>,
}

#[derive(Parser)]
pub struct SyncArgs {
    /// Session slug (directory name under the sessions root)
    pub slug: String,

    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Parser)]
pub struct SyncProjectArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Register the working directory as a project if no --project-id is given
    #[arg(long)]
    pub register: bool,

    /// Queue one task per session on the worker pool instead of a single batch pass
    #[arg(long)]
    pub background: bool,
}

#[derive(Parser)]
pub struct ShowArgs {
    /// Session slug
    pub slug: String,
}
