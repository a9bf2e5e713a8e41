use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use stash_types::{AccountId, FileId};

#[derive(Parser)]
#[command(
    name = "stash",
    about = "Stash: quota-metered, versioned file storage",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Directory holding blobs and the metadata database
    #[arg(long, global = true, default_value = "stash-data")]
    pub data_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create accounts or show their quota
    Account(AccountArgs),
    /// Upload a file as a new logical file
    Upload(UploadArgs),
    /// Upload new content for an existing file
    Replace(ReplaceArgs),
    /// Change a file's display name
    Rename(RenameArgs),
    /// List live files
    Ls(LsArgs),
    /// Show a file's version history
    Versions(VersionsArgs),
    /// Download a file's current content
    Get(GetArgs),
    /// Delete one or more files
    Rm(RmArgs),
    /// Remove blobs no version references
    Sweep(SweepArgs),
    /// Start the HTTP server
    Serve(ServeArgs),
}

#[derive(Args, Clone, Copy, Debug)]
pub struct Owner {
    /// Account acting on the files
    #[arg(short, long = "account")]
    pub account: AccountId,
}

#[derive(Args)]
pub struct AccountArgs {
    #[command(subcommand)]
    pub action: AccountAction,
}

#[derive(Subcommand)]
pub enum AccountAction {
    /// Create an account
    Create {
        /// Storage limit in bytes (defaults to the engine default)
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Show usage and limit
    Status {
        #[command(flatten)]
        owner: Owner,
    },
}

#[derive(Args)]
pub struct UploadArgs {
    #[command(flatten)]
    pub owner: Owner,
    pub path: PathBuf,
    /// Name to record instead of the file name
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub display_name: Option<String>,
    #[arg(long, default_value = "application/octet-stream")]
    pub mime: String,
}

#[derive(Args)]
pub struct ReplaceArgs {
    #[command(flatten)]
    pub owner: Owner,
    pub file: FileId,
    pub path: PathBuf,
    #[arg(long, default_value = "application/octet-stream")]
    pub mime: String,
}

#[derive(Args)]
pub struct RenameArgs {
    #[command(flatten)]
    pub owner: Owner,
    pub file: FileId,
    pub name: String,
}

#[derive(Args)]
pub struct LsArgs {
    #[command(flatten)]
    pub owner: Owner,
}

#[derive(Args)]
pub struct VersionsArgs {
    #[command(flatten)]
    pub owner: Owner,
    pub file: FileId,
}

#[derive(Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub owner: Owner,
    pub file: FileId,
    /// Write here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct RmArgs {
    #[command(flatten)]
    pub owner: Owner,
    #[arg(required = true)]
    pub files: Vec<FileId>,
}

#[derive(Args)]
pub struct SweepArgs {
    /// Report orphans without deleting them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct ServeArgs {
    /// TOML server configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}
