use std::env;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::ComposeSession;
use crate::config::ConfigLoader;
use crate::storage;

pub mod commands;

use self::commands::{DraftArgs, PostArgs, StoreArgs};

#[derive(Parser, Debug)]
#[command(
    name = "blogpad",
    version,
    about = "Write, autosave and browse blog posts from the terminal"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over BLOGPAD_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over BLOGPAD_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Edit the draft line by line from stdin (default)
    Compose,
    /// Inspect or edit the draft without a session
    Draft(DraftArgs),
    /// Save, list, show and delete posts
    Post(PostArgs),
    /// Report store usage
    Store(StoreArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("BLOGPAD_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("BLOGPAD_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let storage = storage::init(&paths, &config.storage)?;
    tracing::debug!(db = %storage.database_path().display(), "store ready");

    match cli.command.unwrap_or(Commands::Compose) {
        Commands::Compose => {
            let session = ComposeSession::open(storage, &config, io::stdout())?;
            let draft = session.run(io::BufReader::new(io::stdin()))?;
            tracing::debug!(len = draft.content().len(), "compose session closed");
            Ok(())
        }
        Commands::Draft(args) => commands::handle_draft_command(&config, storage, args),
        Commands::Post(args) => commands::handle_post_command(&config, storage, args),
        Commands::Store(args) => commands::handle_store_command(&storage, args),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
