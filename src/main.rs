//! Reverie - Entry Point
//!
//! Modes:
//! - Default: one run, exit code reflects its status
//! - --scheduler / -s: long-lived poll loop

use reverie::{ConfigStore, FileActivityProbe, Mode, Paths, Runner, Scheduler, SystemClock};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let scheduler_mode = args.iter().any(|a| a == "--scheduler" || a == "-s");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");
    let mode_override = match args.iter().position(|a| a == "--mode" || a == "-m") {
        Some(i) => {
            let raw = args
                .get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("--mode needs a value"))?;
            Some(raw.parse::<Mode>().map_err(anyhow::Error::msg)?)
        }
        None => None,
    };

    if help_mode {
        println!("Reverie v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: reverie [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --mode, -m <MODE>  auto | exploratory | directed | drift");
        println!("  --scheduler, -s    Run the long-lived scheduler loop");
        println!("  --help, -h         Show this help");
        println!();
        println!("Default: run once; exit 0 when completed or stopped, 1 on error");
        println!();
        println!("Environment variables:");
        println!("  REVERIE_HOME  Data directory (config, queue, knowledge, output)");
        println!("  OLLAMA_URL    Ollama endpoint (default: http://localhost:11434)");
        println!("  RUST_LOG      trace | debug | info | warn | error");
        return Ok(ExitCode::SUCCESS);
    }

    // Setup logging based on mode
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if scheduler_mode {
        // Long-lived - log to stdout with colors
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // Run once - log to stderr as JSON
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let paths = Paths::from_env();
    let store = ConfigStore::new(paths.clone());
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    if scheduler_mode {
        info!("Reverie scheduler v{}", env!("CARGO_PKG_VERSION"));

        let clock = Arc::new(SystemClock);
        let activity = Arc::new(FileActivityProbe::new(
            paths.activity_stamp(),
            paths.companion_heartbeat(),
            clock.clone(),
        ));
        let factory_paths = paths.clone();
        let scheduler = Scheduler::new(
            store,
            activity,
            clock,
            Box::new(move |config| {
                Ok(Runner::from_config(factory_paths.clone(), config)?.with_mode_override(mode_override))
            }),
        );
        scheduler.run(cancel).await;
        return Ok(ExitCode::SUCCESS);
    }

    info!("Reverie v{}", env!("CARGO_PKG_VERSION"));
    let runner = Runner::from_config(paths, store.load_config())?.with_mode_override(mode_override);
    let outcome = runner.run(cancel).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(if outcome.status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Cancel the root token on Ctrl+C or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Stop requested, finishing the current round");
    cancel.cancel();
}
