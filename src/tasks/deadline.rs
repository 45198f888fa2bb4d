//! Deadline enforcer sweep. Closes sessions whose window has passed and seals attempts that a
//! previous close left behind. Every step is idempotent, so overlapping sweeps or a crash
//! halfway through only mean more work for the next tick.

use anyhow::{Context, Result};

use crate::core::state::AppState;
use crate::db::types::CloseReason;
use crate::services::sessions;

const SWEEP_BATCH: i64 = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SweepSummary {
    pub(crate) sessions_closed: usize,
    pub(crate) attempts_forced: usize,
    pub(crate) orphan_attempts_forced: usize,
    pub(crate) failures: usize,
}

pub(crate) async fn sweep(state: &AppState) -> Result<SweepSummary> {
    let now = state.clock().now();
    let mut summary = SweepSummary::default();

    let expired = state
        .store()
        .list_expired_sessions(now, SWEEP_BATCH)
        .await
        .context("Failed to list expired sessions")?;

    for session in expired {
        match sessions::close_session(state, &session.id, CloseReason::Deadline).await {
            Ok(Some(closed)) => {
                summary.sessions_closed += 1;
                summary.attempts_forced += closed.drained.forced;
                summary.failures += closed.drained.failed;
            }
            // Stopped or cancelled by the teacher since the listing.
            Ok(None) => {}
            Err(err) => {
                summary.failures += 1;
                tracing::error!(session_id = %session.id, error = %err, "Failed to close expired session");
            }
        }
    }

    let leftovers = state
        .store()
        .list_closed_sessions_with_open_attempts(SWEEP_BATCH)
        .await
        .context("Failed to list closed sessions with open attempts")?;

    for session_id in leftovers {
        match sessions::drain_open_attempts(state, &session_id).await {
            Ok(drained) => {
                summary.orphan_attempts_forced += drained.forced;
                summary.failures += drained.failed;
            }
            Err(err) => {
                summary.failures += 1;
                tracing::error!(session_id = %session_id, error = %err, "Failed to drain closed session");
            }
        }
    }

    let outcome = if summary.failures == 0 { "ok" } else { "partial" };
    metrics::counter!("enforcer_sweeps_total", "outcome" => outcome).increment(1);

    if summary != SweepSummary::default() {
        tracing::info!(
            sessions_closed = summary.sessions_closed,
            attempts_forced = summary.attempts_forced,
            orphan_attempts_forced = summary.orphan_attempts_forced,
            failures = summary.failures,
            "Deadline sweep finished"
        );
    }

    Ok(summary)
}
