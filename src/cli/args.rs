use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// texmend - repair LaTeX source trees that fail to compile
#[derive(Parser)]
#[command(name = "texmend")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (defaults to ~/.texmend/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a document and, if it fails, run a repair session on it
    Repair {
        /// Main .tex file of the document
        main: PathBuf,

        /// Source tree root (defaults to the main file's directory)
        #[arg(short = 'r', long)]
        root: Option<PathBuf>,

        /// Replay tool calls from a JSON file instead of asking a model
        #[arg(long)]
        script: Option<PathBuf>,

        /// API key for the chat-completions endpoint
        #[arg(long, env = "TEXMEND_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Base URL of an OpenAI-compatible API
        #[arg(long, env = "TEXMEND_API_URL")]
        api_url: Option<String>,

        /// Model to use
        #[arg(short = 'm', long, env = "TEXMEND_MODEL")]
        model: Option<String>,

        /// Override the step budget
        #[arg(long)]
        max_steps: Option<usize>,

        /// Print the session report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check files for structural defects without compiling
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Report the byte encoding of files
    DetectEncoding {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Convert files to UTF-8 without BOM, backing them up first
    FixEncoding {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Source tree root (defaults to the current directory)
        #[arg(short = 'r', long)]
        root: Option<PathBuf>,
    },
    /// Normalize encodings and fix known command typos without a model,
    /// rolling back typo fixes that add errors
    Autofix {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Source tree root (defaults to the current directory)
        #[arg(short = 'r', long)]
        root: Option<PathBuf>,

        /// Print the per-file reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or restore backups
    Backups {
        #[command(subcommand)]
        action: BackupCommands,
    },
    /// Serve the repair tools over MCP (stdio)
    Mcp {
        /// Main .tex file of the document
        main: PathBuf,

        /// Source tree root (defaults to the main file's directory)
        #[arg(short = 'r', long)]
        root: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// List backup records, oldest first
    List {
        /// Only show records for this file
        file: Option<PathBuf>,

        /// Source tree root (defaults to the current directory)
        #[arg(short = 'r', long)]
        root: Option<PathBuf>,
    },
    /// Restore a file from a backup
    Restore {
        file: PathBuf,

        /// Sequence number to restore (defaults to the latest backup)
        #[arg(long, conflicts_with = "original")]
        seq: Option<u64>,

        /// Restore the earliest backup, i.e. the content before any repair
        #[arg(long)]
        original: bool,

        /// Source tree root (defaults to the current directory)
        #[arg(short = 'r', long)]
        root: Option<PathBuf>,
    },
}
