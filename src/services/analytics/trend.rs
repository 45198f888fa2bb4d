use serde::{Deserialize, Serialize};

use crate::core::time::format_primitive;
use crate::services::analytics::SessionSample;
use crate::services::scoring::round2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TrendPoint {
    pub(crate) session_id: String,
    pub(crate) title: String,
    pub(crate) ended_at: Option<String>,
    /// Mean score of the session's scored attempts; `None` when nobody was scored.
    pub(crate) average_score: Option<f64>,
    pub(crate) participants: usize,
    pub(crate) roster_size: usize,
    pub(crate) participation_rate: f64,
}

/// Last `window` sessions, oldest first. Samples must already be in chronological order.
pub(crate) fn trend_series(samples: &[SessionSample], window: usize) -> Vec<TrendPoint> {
    let skip = samples.len().saturating_sub(window);
    samples.iter().skip(skip).map(trend_point).collect()
}

fn trend_point(sample: &SessionSample) -> TrendPoint {
    let average_score = if sample.scores.is_empty() {
        None
    } else {
        let sum: u64 = sample.scores.iter().map(|(_, score)| u64::from(*score)).sum();
        Some(round2(sum as f64 / sample.scores.len() as f64))
    };
    let participation_rate = if sample.roster_size == 0 {
        0.0
    } else {
        round2(sample.participants as f64 * 100.0 / sample.roster_size as f64)
    };

    TrendPoint {
        session_id: sample.session_id.clone(),
        title: sample.title.clone(),
        ended_at: sample.ended_at.map(format_primitive),
        average_score,
        participants: sample.participants,
        roster_size: sample.roster_size,
        participation_rate,
    }
}
