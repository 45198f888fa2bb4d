use crate::core::config::AnalyticsSettings;
use crate::services::analytics::chapters::WeakChapter;
use crate::services::analytics::segmentation::Segmentation;
use crate::services::analytics::trend::TrendPoint;

fn students(count: usize) -> &'static str {
    if count == 1 {
        "student is"
    } else {
        "students are"
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Fills the fixed message templates from the computed rollups. Messages come out in a fixed
/// order: weak chapter, participation, score trend, at-risk, top performers.
pub(crate) fn generate_insights(
    trend: &[TrendPoint],
    weak_chapters: &[WeakChapter],
    segmentation: &Segmentation,
    settings: &AnalyticsSettings,
) -> Vec<String> {
    let mut insights = Vec::new();

    if let Some(weakest) = weak_chapters.first() {
        insights.push(format!(
            "{} / {} is the weakest area at {:.1}% accuracy across {} attempts.",
            weakest.subject, weakest.chapter, weakest.accuracy, weakest.attempts
        ));
    }

    if let Some((latest, earlier)) = trend.split_last() {
        let rates: Vec<f64> = earlier.iter().map(|point| point.participation_rate).collect();
        if let Some(baseline) = mean(&rates) {
            let drop = baseline - latest.participation_rate;
            if drop >= settings.participation_drop_points {
                insights.push(format!(
                    "Participation fell to {:.1}% in \"{}\", {:.1} points below the {:.1}% average of earlier tests.",
                    latest.participation_rate, latest.title, drop, baseline
                ));
            }
        }
    }

    let scored: Vec<f64> = trend.iter().filter_map(|point| point.average_score).collect();
    if let Some((latest, earlier)) = scored.split_last() {
        if let Some(baseline) = mean(earlier) {
            let delta = latest - baseline;
            if delta > settings.trend_tolerance {
                insights.push(format!(
                    "Average scores are trending up: {latest:.1} in the latest test against {baseline:.1} before."
                ));
            } else if delta < -settings.trend_tolerance {
                insights.push(format!(
                    "Average scores are trending down: {latest:.1} in the latest test against {baseline:.1} before."
                ));
            }
        }
    }

    let at_risk = segmentation.at_risk.len();
    if at_risk > 0 {
        insights.push(format!(
            "{at_risk} {} at risk with a recent average below {:.0}% or a declining trend.",
            students(at_risk),
            settings.at_risk_max_average
        ));
    }

    let top = segmentation.top_performers.len();
    if top > 0 {
        insights.push(format!(
            "{top} {} performing strongly with a recent average of {:.0}% or more.",
            students(top),
            settings.top_performer_min_average
        ));
    }

    insights
}
