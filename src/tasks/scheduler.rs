use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::state::AppState;
use crate::tasks::deadline;

/// Runs the deadline enforcer until the process receives a shutdown signal.
pub(crate) async fn run(state: AppState) -> Result<()> {
    let handle = spawn_enforcer(state, crate::core::shutdown::shutdown_channel());

    if let Err(err) = handle.await {
        tracing::error!(error = %err, "Background task join failed");
    }

    Ok(())
}

pub(crate) fn spawn_enforcer(state: AppState, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(deadline_loop(state, shutdown))
}

async fn deadline_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(state.settings().engine().sweep_interval_seconds);
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval_seconds = period.as_secs(), "Deadline enforcer started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = deadline::sweep(&state).await {
                    metrics::counter!("enforcer_sweeps_total", "outcome" => "error").increment(1);
                    tracing::error!(error = %err, "Deadline sweep failed");
                }
            }
        }
    }

    tracing::info!("Deadline enforcer stopped");
}
