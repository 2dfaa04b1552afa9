use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use puff_cli::commands::{
    add, end, events, export, import, rebuild, sessions, status, undo, util,
};
use puff_cli::{Cli, Commands, Config};
use puff_db::{Database, SessionEngine};

/// Load config and open the session engine, ensuring the parent directory exists.
fn open_engine(config_path: Option<&Path>) -> Result<(SessionEngine, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let timeout = config
        .idle_timeout()
        .context("invalid idle_timeout_secs")?;

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    let engine = SessionEngine::open(db, timeout).context("failed to load session state")?;
    Ok((engine, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so export output on stdout stays clean
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let (engine, config) = open_engine(cli.config.as_deref())?;
    let now = Utc::now();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Add { count, at } => {
            let at = match at {
                Some(at) => util::parse_datetime(at, now)?,
                None => now,
            };
            add::run(&mut out, &engine, *count, at)?;
        }
        Commands::Undo { count } => undo::run(&mut out, &engine, *count, now)?,
        Commands::End => end::run(&mut out, &engine, now)?,
        Commands::Finalize => end::finalize(&mut out, &engine, now)?,
        Commands::Status { json } => {
            status::run(&mut out, &engine, &config.database_path, *json)?;
        }
        Commands::Sessions { limit, json } => sessions::run(&mut out, &engine, *limit, *json)?,
        Commands::Events { current } => events::run(&mut out, &engine, *current)?,
        Commands::Import { file } => match file {
            Some(path) => {
                let file = File::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                import::run(&mut out, &engine, BufReader::new(file), now)?;
            }
            None => {
                import::run(&mut out, &engine, io::stdin().lock(), now)?;
            }
        },
        Commands::Export { file } => match file {
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                let written = export::run(&mut BufWriter::new(file), &engine)?;
                writeln!(out, "Exported {written} events to {}.", path.display())?;
            }
            None => {
                export::run(&mut out, &engine)?;
            }
        },
        Commands::Rebuild => rebuild::run(&mut out, &engine, now)?,
    }

    Ok(())
}
