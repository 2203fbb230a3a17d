//! Watches a configuration repository and prints every update.
//!
//! # Usage
//!
//! ```bash
//! versioned-config-watch settings.yaml [--json]
//! ```
//!
//! Updates are written to stdout as JSON lines; logs go to stderr.
//! Shared secrets named by remotes are read from `<NAME>_USERNAME` and
//! `<NAME>_PASSWORD` environment variables.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{mpsc, Arc};

use clap::Parser;
use versioned_config::{
    init_logging, EnvCredentialsProvider, LogFormat, SyncEngine, UpdatePoller,
    VersionedConfigSettings, VersionedConfigUpdate, VersioningService,
};

/// Keep a local checkout of a configuration repository in sync and report changes
#[derive(Parser)]
#[command(name = "versioned-config-watch")]
#[command(version)]
struct Args {
    /// Settings file (.json, .yaml or .yml)
    settings: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let format = if args.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };

    if let Err(e) = init_logging(format) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    log::info!(
        "Starting versioned-config-watch v{}",
        env!("CARGO_PKG_VERSION")
    );

    let settings = VersionedConfigSettings::load(&args.settings)?;
    let provider = EnvCredentialsProvider::new();
    let spec = settings.into_spec(Some(&provider))?;

    let engine = Arc::new(SyncEngine::initialize(&spec, &settings.config_files)?);
    let service: Arc<dyn VersioningService> = engine.clone();

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    let poller = UpdatePoller::start(service, settings.poll_interval(), print_update)?;

    // Blocks until Ctrl-C
    let _ = stop_rx.recv();
    log::info!("Shutting down");

    poller.close();
    engine.close()?;
    Ok(())
}

fn print_update(update: &VersionedConfigUpdate) {
    match serde_json::to_string(update) {
        Ok(line) => println!("{}", line),
        Err(e) => log::error!("Failed to serialize config update: {}", e),
    }
}
