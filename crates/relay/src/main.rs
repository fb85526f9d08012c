//! hookcord
//!
//! Invoked once per hook event: reads the JSON payload on stdin, relays it to
//! Discord (one thread per session when thread mode is on) and exits 0 on
//! delivery or deliberate filtering, 1 on any failure.

mod classify;
mod cmd_status;
mod config;
mod delivery;
mod dispatch;
mod format;
mod limits;
mod logging;
mod migration_runner;
mod paths;
mod rate_limit;
mod thread_naming;
mod thread_store;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::{error, info};

use crate::config::{Config, RelayArgs};
use crate::delivery::DiscordClient;
use crate::dispatch::DispatchEngine;
use crate::paths::DataDir;
use crate::thread_store::ThreadStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "hookcord", version, about = "Relay hook events into per-session Discord threads")]
struct Cli {
    #[command(flatten)]
    relay: RelayArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Read one hook payload from stdin and deliver it (default)
    Dispatch,
    /// Show the data dir and current session thread bindings
    Status {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let data_dir = DataDir::resolve(cli.relay.data_dir.as_deref());

    let result = match cli.command {
        Some(Command::Status { limit }) => cmd_status::run(&data_dir, limit)
            .await
            .map(|_| ExitCode::SUCCESS),
        Some(Command::Dispatch) | None => run_dispatch(&cli.relay, &data_dir).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("hookcord: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_dispatch(args: &RelayArgs, data_dir: &DataDir) -> anyhow::Result<ExitCode> {
    data_dir.ensure_dirs()?;
    let logging = logging::init_logging(&data_dir.log_dir(), args.debug)?;

    // Validate before touching stdin, the store or the network
    let config = match Config::from_args(args) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(
                component = "main",
                event = "config.invalid",
                error = %e,
            );
            eprintln!("hookcord: configuration error: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    info!(
        component = "main",
        event = "hookcord.started",
        version = VERSION,
        invocation_id = %logging.invocation_id,
        mode = config.mode_label(),
        use_threads = config.use_threads,
        debug = config.debug,
        data_dir = %data_dir.root().display(),
    );

    let mut payload = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut payload).await {
        return Ok(startup_failed("read_stdin", &e));
    }

    let store = match ThreadStore::open(data_dir.db_path()).await {
        Ok(store) => store,
        Err(e) => return Ok(startup_failed("open_store", &e)),
    };
    let client = match DiscordClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => return Ok(startup_failed("build_client", &e)),
    };
    let engine = DispatchEngine::new(config, store, client);

    let code = match engine.dispatch_raw(&payload).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hookcord: {}", e);
            ExitCode::FAILURE
        }
    };

    drop(logging);
    Ok(code)
}

/// Record a failed setup step in the log (stderr belongs to the hook host)
fn startup_failed(step: &'static str, err: &dyn std::fmt::Display) -> ExitCode {
    error!(
        component = "main",
        event = "startup.failed",
        step = step,
        error = %err,
    );
    eprintln!("hookcord: {}: {}", step, err);
    ExitCode::FAILURE
}
