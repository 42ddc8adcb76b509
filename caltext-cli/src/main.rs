mod caldav;
mod commands;
mod config;
mod dispatcher;
mod store;
mod sync;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "caltext")]
#[command(about = "Mirror a CalDAV calendar and dispatch its SMS reminders")]
struct Cli {
    /// Path to the config file (defaults to ~/.config/caltext/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile with the server and dispatch due notifications
    Sync,
    /// Show pending notifications
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = match cli.config {
        Some(path) => path,
        None => config::config_path()?,
    };
    let settings = config::Config::load(&path)?.validate()?;

    match cli.command {
        Commands::Sync => commands::sync::run(settings).await,
        Commands::Status => commands::status::run(settings).await,
    }
}
