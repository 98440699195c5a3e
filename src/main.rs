use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod backup;
mod cli;
mod command;
mod compiler;
mod config;
mod editor;
mod encoding;
mod error;
mod mcp;
mod policy;
mod session;
mod tools;
mod validator;
mod workspace;

use cli::{BackupCommands, Cli, Commands};
use config::RepairConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = RepairConfig::load(cli.config.as_deref())?;

    let success = match cli.command {
        Commands::Repair {
            main,
            root,
            script,
            api_key,
            api_url,
            model,
            max_steps,
            json,
        } => {
            command::run_repair(
                config,
                command::RepairOptions {
                    main,
                    root,
                    script,
                    api_key,
                    api_url,
                    model,
                    max_steps,
                    json,
                },
            )
            .await?
        }
        Commands::Validate { files } => command::run_validate(&config, &files)?,
        Commands::DetectEncoding { files } => {
            command::run_detect_encoding(&config, &files)?;
            true
        }
        Commands::FixEncoding { files, root } => {
            command::run_fix_encoding(&config, root.as_deref(), &files)?
        }
        Commands::Autofix { files, root, json } => {
            command::run_autofix(&config, root.as_deref(), &files, json)?
        }
        Commands::Backups { action } => {
            match action {
                BackupCommands::List { file, root } => {
                    command::run_backups_list(&config, root.as_deref(), file.as_deref())?
                }
                BackupCommands::Restore {
                    file,
                    seq,
                    original,
                    root,
                } => command::run_backups_restore(&config, root.as_deref(), &file, seq, original)?,
            }
            true
        }
        Commands::Mcp { main, root } => {
            command::run_mcp(&config, root.as_deref(), &main).await?;
            true
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
