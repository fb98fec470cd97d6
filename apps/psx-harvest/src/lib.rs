pub mod bootstrap;
pub mod obs;

use clap::Subcommand;
use psx_application::config::{self, Config};
use psx_application::orchestrator::RunOutcome;
use psx_application::scheduler::WindowScheduler;
use psx_application::shutdown::{self, ShutdownTrigger};

/// Exit code of `run-once` when the run itself failed.
pub const RUN_FAILED_EXIT_CODE: i32 = 2;

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Harvest on the interval grid whenever the market window is open.
    Run,
    /// Execute a single harvest and exit.
    RunOnce {
        /// Ignore the market window (smoke tests outside trading hours).
        #[arg(long)]
        force: bool,
    },
    /// Create the snapshot table and indexes if they are missing.
    Migrate,
    /// Print the effective configuration as TOML.
    Config,
}

pub async fn execute(command: Command, config: Config) -> Result<i32, String> {
    match command {
        Command::Config => {
            println!("{}", config::to_toml_pretty(&config)?);
            Ok(0)
        }
        Command::Migrate => {
            bootstrap::migrate(&config).await?;
            println!("migrate complete: {}", config.db.table);
            Ok(0)
        }
        Command::RunOnce { force } => {
            let orchestrator =
                bootstrap::prepare_orchestrator(&config, bootstrap::system_clock()).await?;
            let (trigger, shutdown) = shutdown::channel();
            spawn_signal_listener(trigger);

            let outcome = orchestrator.run_once(&shutdown, force).await;
            tracing::info!(outcome = outcome.label(), "single run finished");
            Ok(exit_code(&outcome))
        }
        Command::Run => {
            let clock = bootstrap::system_clock();
            let orchestrator = bootstrap::prepare_orchestrator(&config, clock.clone()).await?;
            let (trigger, shutdown) = shutdown::channel();
            spawn_signal_listener(trigger);

            let mut scheduler = WindowScheduler::new(orchestrator, clock);
            scheduler.run_forever(shutdown).await;
            Ok(0)
        }
    }
}

pub fn exit_code(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Failed { .. } => RUN_FAILED_EXIT_CODE,
        _ => 0,
    }
}

fn spawn_signal_listener(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        trigger.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler");
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
