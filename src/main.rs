//! Peervisor daemon entry point.
//!
//! Two modes share this binary:
//! - **parent**: resolves the slave configurations (flags or config file) and
//!   runs the restart-on-exit supervisor, spawning children of this same
//!   executable;
//! - **child** (hidden `--host-id` flag set by the supervisor): runs one
//!   slave. Exit code 1 means the engine aborted and is the supervisor's cue
//!   to respawn with a fresh host id.

use std::process::ExitCode;

use clap::Parser;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::error;

use peervisor::cli::Cli;
use peervisor::{config, daemon, logging, RuntimeError, Supervisor};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(id) = cli.host_id {
        return run_child(&cli, id).await;
    }
    run_parent(&cli).await
}

/// Child mode: the flags carry the full resolved configuration.
async fn run_child(cli: &Cli, id: u32) -> ExitCode {
    let config = cli.to_config();
    logging::init(config.verbose);

    match daemon::run_slave(config, id).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ RuntimeError::ServiceDead { .. }) => {
            error!(error = %e, "slave terminated");
            ExitCode::from(1)
        }
        Err(e) => {
            error!(error = %e, "slave failed");
            ExitCode::from(1)
        }
    }
}

/// Parent mode: supervise N children until a shutdown signal.
async fn run_parent(cli: &Cli) -> ExitCode {
    let configs = match &cli.config {
        Some(path) => match config::load_file(path) {
            Ok(configs) => configs,
            Err(e) => {
                eprintln!("peervisor: {e}");
                return ExitCode::from(1);
            }
        },
        None => vec![cli.to_config(); cli.number.max(1)],
    };

    // The first configuration's verbosity governs the parent (and, via the
    // rendered flags, each child governs itself).
    logging::init(configs[0].verbose);

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("peervisor: cannot locate own executable: {e}");
            return ExitCode::from(1);
        }
    };

    let count = configs.len();
    let spawner = Box::new(move |index: usize, id: u32| {
        let mut cmd = Command::new(&exe);
        cmd.args(configs[index].to_args());
        cmd.arg("--child-index").arg(index.to_string());
        cmd.arg("--host-id").arg(id.to_string());
        cmd
    });

    let ctx = CancellationToken::new();
    let signaller = ctx.clone();
    tokio::spawn(async move {
        let _ = peervisor::runtime::wait_for_shutdown_signal().await;
        signaller.cancel();
    });

    let mut supervisor = Supervisor::new(count, spawner);
    match supervisor.run(ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "supervisor failed");
            ExitCode::from(1)
        }
    }
}
