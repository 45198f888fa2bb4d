//! Analytics aggregator. Rolls the score cards of completed sessions up into a trend series,
//! weak chapters, student segments and template insights.
//!
//! [`build_snapshot`] is pure and deterministic for a given set of sessions and attempts;
//! [`load_snapshot`] adds store access and a Redis cache in front of it.

pub(crate) mod chapters;
pub(crate) mod insights;
pub(crate) mod segmentation;
pub(crate) mod trend;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::PrimitiveDateTime;

use crate::core::config::AnalyticsSettings;
use crate::core::state::AppState;
use crate::core::time::format_primitive;
use crate::db::models::{Attempt, TestSession};
use crate::repositories::SessionFilter;
use crate::services::errors::EngineError;
use crate::services::scoring::ScoreCard;

use chapters::WeakChapter;
use segmentation::{SegmentRules, Segmentation};
use trend::TrendPoint;

const CACHE_PREFIX: &str = "examcore:analytics:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AnalyticsScope {
    Teacher(String),
    Tenant,
}

impl AnalyticsScope {
    fn label(&self) -> String {
        match self {
            AnalyticsScope::Teacher(teacher_id) => format!("teacher:{teacher_id}"),
            AnalyticsScope::Tenant => "tenant".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AnalyticsQuery {
    pub(crate) scope: AnalyticsScope,
    pub(crate) classroom_id: Option<String>,
    pub(crate) subject: Option<String>,
}

impl AnalyticsQuery {
    fn filter(&self) -> SessionFilter {
        SessionFilter {
            created_by: match &self.scope {
                AnalyticsScope::Teacher(teacher_id) => Some(teacher_id.clone()),
                AnalyticsScope::Tenant => None,
            },
            classroom_id: self.classroom_id.clone(),
            subject: self.subject.clone(),
        }
    }

    pub(crate) fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.scope.label().as_bytes());
        hasher.update([0]);
        hasher.update(self.classroom_id.as_deref().unwrap_or("*").as_bytes());
        hasher.update([0]);
        hasher.update(self.subject.as_deref().unwrap_or("*").as_bytes());
        format!("{CACHE_PREFIX}{}", hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AnalyticsSnapshot {
    pub(crate) scope: String,
    pub(crate) classroom_id: Option<String>,
    pub(crate) subject: Option<String>,
    pub(crate) generated_at: String,
    pub(crate) session_count: usize,
    pub(crate) scored_attempts: usize,
    pub(crate) trend: Vec<TrendPoint>,
    pub(crate) weak_chapters: Vec<WeakChapter>,
    pub(crate) segmentation: Segmentation,
    pub(crate) insights: Vec<String>,
}

/// One session reduced to what the trend needs.
#[derive(Debug, Clone)]
pub(crate) struct SessionSample {
    pub(crate) session_id: String,
    pub(crate) title: String,
    pub(crate) ended_at: Option<PrimitiveDateTime>,
    pub(crate) roster_size: usize,
    pub(crate) participants: usize,
    pub(crate) scores: Vec<(String, u32)>,
}

/// A score card and its owner, in chronological session order.
#[derive(Debug, Clone)]
pub(crate) struct ScoredAttempt<'a> {
    pub(crate) student_id: String,
    pub(crate) card: &'a ScoreCard,
}

pub(crate) fn build_snapshot(
    query: &AnalyticsQuery,
    sessions: &[TestSession],
    attempts: &[Attempt],
    settings: &AnalyticsSettings,
    generated_at: PrimitiveDateTime,
) -> AnalyticsSnapshot {
    let mut ordered: Vec<&TestSession> = sessions.iter().collect();
    ordered.sort_by(|a, b| a.ends_at.cmp(&b.ends_at).then_with(|| a.id.cmp(&b.id)));

    let mut by_session: HashMap<&str, Vec<&Attempt>> = HashMap::new();
    for attempt in attempts.iter().filter(|attempt| attempt.is_terminal()) {
        by_session.entry(attempt.session_id.as_str()).or_default().push(attempt);
    }

    let mut samples = Vec::with_capacity(ordered.len());
    let mut scored = Vec::new();
    for session in &ordered {
        let mut sealed = by_session.remove(session.id.as_str()).unwrap_or_default();
        sealed.sort_by(|a, b| a.student_id.cmp(&b.student_id).then_with(|| a.id.cmp(&b.id)));

        let mut scores = Vec::with_capacity(sealed.len());
        for attempt in &sealed {
            let Some(card) = attempt.score_card.as_ref() else {
                continue;
            };
            scores.push((attempt.student_id.clone(), card.0.score));
            scored.push(ScoredAttempt { student_id: attempt.student_id.clone(), card: &card.0 });
        }

        samples.push(SessionSample {
            session_id: session.id.clone(),
            title: session.paper_snapshot.title.clone(),
            ended_at: session.ends_at,
            roster_size: session.roster.len(),
            participants: sealed.len(),
            scores,
        });
    }

    let trend = trend::trend_series(&samples, settings.trend_window);
    let weak_chapters = chapters::weak_chapters(
        &scored,
        settings.weak_chapter_min_attempts,
        settings.weak_chapter_max_accuracy,
        settings.weak_chapter_limit,
    );
    let segmentation = segmentation::segment_students(
        &scored,
        SegmentRules {
            window: settings.segment_window,
            tolerance: settings.trend_tolerance,
            top_min_average: settings.top_performer_min_average,
            at_risk_max_average: settings.at_risk_max_average,
        },
    );
    let insights = insights::generate_insights(&trend, &weak_chapters, &segmentation, settings);

    AnalyticsSnapshot {
        scope: query.scope.label(),
        classroom_id: query.classroom_id.clone(),
        subject: query.subject.clone(),
        generated_at: format_primitive(generated_at),
        session_count: ordered.len(),
        scored_attempts: scored.len(),
        trend,
        weak_chapters,
        segmentation,
        insights,
    }
}

pub(crate) async fn load_snapshot(
    state: &AppState,
    query: &AnalyticsQuery,
) -> Result<AnalyticsSnapshot, EngineError> {
    let key = query.cache_key();
    match state.redis().get_cached(&key).await {
        Ok(Some(raw)) => match serde_json::from_str::<AnalyticsSnapshot>(&raw) {
            Ok(snapshot) => return Ok(snapshot),
            Err(err) => tracing::warn!(error = %err, key = %key, "Discarding unreadable analytics cache"),
        },
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "Analytics cache read failed"),
    }

    let sessions = state.store().list_completed_sessions(&query.filter()).await?;
    let session_ids: Vec<String> = sessions.iter().map(|session| session.id.clone()).collect();
    let attempts = state.store().list_attempts_for_sessions(&session_ids).await?;

    let settings = state.settings().analytics();
    let snapshot = build_snapshot(query, &sessions, &attempts, settings, state.clock().now());
    metrics::counter!("analytics_snapshots_built_total").increment(1);
    tracing::debug!(
        scope = %snapshot.scope,
        sessions = snapshot.session_count,
        scored_attempts = snapshot.scored_attempts,
        "Analytics snapshot built"
    );

    match serde_json::to_string(&snapshot) {
        Ok(raw) => {
            if let Err(err) = state.redis().set_cached(&key, &raw, settings.cache_ttl_seconds).await {
                tracing::warn!(error = %err, "Analytics cache write failed");
            }
        }
        Err(err) => tracing::warn!(error = %err, "Failed to serialise analytics snapshot"),
    }

    Ok(snapshot)
}
