use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::prelude::*;

mod chat;
mod config;
mod render;

use chat::ChatArgs;
use config::FileConfig;

#[derive(Parser)]
#[command(name = "niby")]
#[command(about = "Terminal chat client for the Niby assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to <config dir>/niby/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging to stderr
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant (the default)
    Chat(ChatArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the transcript.
    let default_directive = if cli.debug {
        "niby=debug,niby_client=debug,warn"
    } else {
        "warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_path = cli.config.clone().or_else(config::default_config_path);
    match (&cli.config, &config_path) {
        (Some(path), _) if !path.exists() => {
            warn!(path = %path.display(), "config file not found, using defaults");
        }
        (_, Some(path)) => debug!(path = %path.display(), "loading config"),
        (_, None) => debug!("no config directory, using defaults"),
    }

    let file_config: FileConfig = config::load_config(config_path.as_deref())
        .extract()
        .context("Failed to load configuration")?;

    match cli.command {
        None => chat::run(&file_config, ChatArgs::default()).await,
        Some(Commands::Chat(args)) => chat::run(&file_config, args).await,
        Some(Commands::Config) => {
            print!("{}", file_config.to_toml()?);
            Ok(())
        }
    }
}
