//! # genjob — asynchronous generation-job server
//!
//! Serves the submit / status / fallback-trigger API over an in-memory job
//! store, with detached execution and a periodic stuck-job sweep.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: echo engine, 0.0.0.0:8080
//! cargo run --bin genjob
//!
//! # From a config file
//! cargo run --bin genjob -- --config genjob.toml
//!
//! # Print the config JSON Schema and exit
//! cargo run --bin genjob -- --schema
//!
//! # Follow a job on a running server using the [polling] settings
//! cargo run --bin genjob -- --watch <JOB_ID> --server http://127.0.0.1:8080
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json` — structured JSON output (overrides `observability.log_format`)
//! - `RUST_LOG=info` — log level filter

use std::path::PathBuf;
use std::sync::Arc;

use tokio_genjob::config::{self, loader, GenJobConfig};
use tokio_genjob::{
    engine, init_tracing_with, metrics, watch, web_api, GenJobError, HttpStatusClient, JobId,
    PollEvent,
};
use tracing::{error, info, warn};

/// Parsed CLI arguments.
struct Args {
    /// Optional path to a TOML config file.
    config: Option<PathBuf>,
    /// Print the config schema and exit.
    schema: bool,
    /// Follow this job on a running server instead of serving.
    watch: Option<String>,
    /// Base URL of the server to watch (default: the configured address).
    server: Option<String>,
}

/// Parse command-line arguments manually (no external arg parser dependency).
fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = None;
    let mut schema = false;
    let mut watch = None;
    let mut server = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a value".to_string());
                }
                config = Some(PathBuf::from(&args[i]));
            }
            "--schema" => {
                schema = true;
            }
            "--watch" => {
                i += 1;
                if i >= args.len() {
                    return Err("--watch requires a job id".to_string());
                }
                watch = Some(args[i].clone());
            }
            "--server" => {
                i += 1;
                if i >= args.len() {
                    return Err("--server requires a value".to_string());
                }
                server = Some(args[i].clone());
            }
            "--help" | "-h" => {
                return Err(usage());
            }
            other => {
                return Err(format!("unknown argument: {other}\n{}", usage()));
            }
        }
        i += 1;
    }

    Ok(Args {
        config,
        schema,
        watch,
        server,
    })
}

/// Print usage information.
fn usage() -> String {
    [
        "Usage: genjob [OPTIONS]",
        "",
        "Options:",
        "  --config, -c <FILE>   Path to TOML config (default: built-in defaults)",
        "  --schema              Print the config JSON Schema and exit",
        "  --watch <JOB_ID>      Poll a job until it settles, then exit",
        "  --server <URL>        Server to poll with --watch (default: configured address)",
        "  --help, -h            Show this help message",
    ]
    .join("\n")
}

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(1);
        }
    };

    if args.schema {
        match config::export_schema() {
            Ok(schema) => println!("{schema}"),
            Err(e) => {
                eprintln!("Failed to export schema: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let config = match &args.config {
        Some(path) => match loader::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Configuration error: {e}");
                std::process::exit(1);
            }
        },
        None => GenJobConfig::default(),
    };

    if let Err(e) = init_tracing_with(config.observability.log_format.as_str()) {
        eprintln!("Failed to initialise tracing: {e}");
    }

    if let Some(job_id) = &args.watch {
        let server = args
            .server
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", config.server.port));
        match watch_job(&config, &server, job_id).await {
            Ok(true) => return,
            Ok(false) => std::process::exit(2),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = run(config).await {
        error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}

async fn run(config: GenJobConfig) -> Result<(), GenJobError> {
    metrics::init_metrics()?;

    let engine = engine::build_engine(&config.engine)?;
    let (executor, app) = web_api::build_app(&config, engine);

    let sweeper = executor.spawn_sweeper(
        config.executor.sweep_interval(),
        config.executor.stuck_after(),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(
        %addr,
        engine = ?config.engine.kind,
        rate_limit_max = config.limits.rate_limit_max,
        "starting genjob server"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let result = web_api::serve(listener, app, shutdown_signal()).await;
    sweeper.abort();
    info!("server stopped");
    result
}

/// Poll `job_id` on `server` with the `[polling]` settings, printing each
/// event. Returns whether the job completed.
async fn watch_job(config: &GenJobConfig, server: &str, job_id: &str) -> Result<bool, GenJobError> {
    let job_id: JobId = job_id
        .parse()
        .map_err(|_| GenJobError::Other(format!("invalid job id: {job_id}")))?;
    let source = Arc::new(HttpStatusClient::new(server));
    let (handle, mut events) = watch(source, job_id, config.polling.poll_config());

    let mut completed = false;
    while let Some(event) = events.recv().await {
        match &event {
            PollEvent::Progress { status, percent, attempt } => {
                println!("[{attempt}] {status} {percent}%");
            }
            PollEvent::Completed { result } => {
                println!("{result}");
                completed = true;
            }
            PollEvent::SourceError { attempt, error } => {
                warn!(attempt, %error, "status read failed");
            }
            PollEvent::Failed(_) | PollEvent::TimedOut { .. } => {
                if let Some(err) = event.client_error() {
                    eprintln!("{}: {} (retryable: {})", err.code, err.message, err.retryable);
                }
            }
        }
    }
    handle.finished().await;
    Ok(completed)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c; shutting down");
        return;
    }
    info!("ctrl-c received, draining connections");
}
