use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tome_db::CodecKind;

#[derive(Parser)]
#[command(
    name = "tome",
    about = "Tome: inspect and edit single-file directory databases",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new, empty database file
    Init(InitArgs),
    /// Show store and registry statistics
    Info(InfoArgs),
    /// List the directory tree below a group
    Ls(LsArgs),
    /// Print an instance's object or one of its data streams
    Cat(CatArgs),
    /// Write a file into an instance's data stream
    Put(PutArgs),
    /// Remove an instance or group and free its blocks
    Rm(RmArgs),
    /// Cross-check the registry against the block store
    Check(CheckArgs),
}

#[derive(Args)]
pub struct InitArgs {
    pub file: PathBuf,
    /// Codec for instance objects
    #[arg(long, default_value = "bincode")]
    pub codec: CodecKind,
    /// Name of the root group
    #[arg(long, default_value = "root")]
    pub root_name: String,
    /// Replace an existing file
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct LsArgs {
    pub file: PathBuf,
    /// Group path, `/`-separated
    #[arg(default_value = "/")]
    pub path: String,
}

#[derive(Args)]
pub struct CatArgs {
    pub file: PathBuf,
    /// Instance path, `/`-separated
    pub path: String,
    /// Data stream to print instead of the primary object
    #[arg(long)]
    pub data: Option<String>,
}

#[derive(Args)]
pub struct PutArgs {
    pub file: PathBuf,
    /// Instance path; missing groups and the instance are created
    pub path: String,
    /// Data stream name
    #[arg(long)]
    pub data: String,
    /// File to read the stream contents from
    #[arg(long)]
    pub from: PathBuf,
    /// Sync every block write before continuing
    #[arg(long)]
    pub durable: bool,
}

#[derive(Args)]
pub struct RmArgs {
    pub file: PathBuf,
    /// Instance or group path, `/`-separated
    pub path: String,
}

#[derive(Args)]
pub struct CheckArgs {
    pub file: PathBuf,
}
