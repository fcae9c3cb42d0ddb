//! LongCat Keygen entry point.
//!
//! Loads configuration, initializes logging and dispatches the subcommand.
//! Without a subcommand the HTTP server is started.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use longcat_keygen::config::AppConfig;
use longcat_keygen::service::smoke::{DEFAULT_MODEL, DEFAULT_PROMPT};

#[derive(Debug, Parser)]
#[command(name = "longcat-keygen", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the status page and run trigger (default).
    Serve,
    /// Generate keys once in the foreground.
    Run {
        /// Keys to produce; defaults to `longcat.keys_count`.
        #[arg(short, long)]
        count: Option<u32>,
    },
    /// Import a key list into gpt-load.
    Sync {
        /// Key list; defaults to `longcat.keys_file`.
        keys_file: Option<PathBuf>,
    },
    /// Send one chat completion with the key in `LONGCAT_API_KEY`.
    Smoke {
        /// Model name.
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,
        /// Prompt text.
        #[arg(long, default_value = DEFAULT_PROMPT)]
        prompt: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let log_tail = longcat_keygen::init_logging(&config);

    let code = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            longcat_keygen::serve(config, log_tail).await?;
            0
        }
        Command::Run { count } => longcat_keygen::run_once(&config, count, &log_tail).await?,
        Command::Sync { keys_file } => {
            longcat_keygen::sync_file(&config, keys_file.as_deref()).await?
        }
        Command::Smoke { model, prompt } => {
            longcat_keygen::smoke(&config, &model, &prompt).await?
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
