use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::services::analytics::ScoredAttempt;
use crate::services::scoring::round2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StudentSegment {
    pub(crate) student_id: String,
    pub(crate) scored_attempts: usize,
    pub(crate) latest_score: u32,
    /// Mean of the windowed scores before the latest one.
    pub(crate) rolling_average: Option<f64>,
    /// Mean of the whole window, latest score included.
    pub(crate) recent_average: f64,
    pub(crate) trend: TrendDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Segmentation {
    pub(crate) top_performers: Vec<StudentSegment>,
    pub(crate) at_risk: Vec<StudentSegment>,
    pub(crate) students: Vec<StudentSegment>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SegmentRules {
    pub(crate) window: usize,
    pub(crate) tolerance: f64,
    pub(crate) top_min_average: f64,
    pub(crate) at_risk_max_average: f64,
}

fn mean(scores: &[u32]) -> f64 {
    let sum: u64 = scores.iter().map(|score| u64::from(*score)).sum();
    sum as f64 / scores.len() as f64
}

/// Direction of `latest` against the rolling average of the scores before it. Differences
/// within `tolerance` points either way are stable.
pub(crate) fn classify(previous: &[u32], latest: u32, tolerance: f64) -> (Option<f64>, TrendDirection) {
    if previous.is_empty() {
        return (None, TrendDirection::Stable);
    }
    let rolling = mean(previous);
    let delta = f64::from(latest) - rolling;
    let direction = if delta > tolerance {
        TrendDirection::Improving
    } else if delta < -tolerance {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    };
    (Some(round2(rolling)), direction)
}

/// High recent average without a downward trend.
fn is_top_performer(student: &StudentSegment, rules: SegmentRules) -> bool {
    student.recent_average >= rules.top_min_average && student.trend != TrendDirection::Declining
}

/// Low recent average, or a decline from anywhere below the top band.
fn is_at_risk(student: &StudentSegment, rules: SegmentRules) -> bool {
    student.recent_average < rules.at_risk_max_average
        || (student.trend == TrendDirection::Declining
            && student.recent_average < rules.top_min_average)
}

/// Attempts must be in chronological order.
pub(crate) fn segment_students(attempts: &[ScoredAttempt<'_>], rules: SegmentRules) -> Segmentation {
    let mut history: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
    for attempt in attempts {
        history.entry(attempt.student_id.as_str()).or_default().push(attempt.card.score);
    }

    let window = rules.window.max(2);
    let students: Vec<StudentSegment> = history
        .into_iter()
        .filter_map(|(student_id, scores)| {
            let recent = &scores[scores.len().saturating_sub(window)..];
            let (&latest, previous) = recent.split_last()?;
            let (rolling_average, trend) = classify(previous, latest, rules.tolerance);
            Some(StudentSegment {
                student_id: student_id.to_string(),
                scored_attempts: scores.len(),
                latest_score: latest,
                rolling_average,
                recent_average: round2(mean(recent)),
                trend,
            })
        })
        .collect();

    let mut top_performers: Vec<StudentSegment> = students
        .iter()
        .filter(|student| is_top_performer(student, rules))
        .cloned()
        .collect();
    top_performers.sort_by(|a, b| {
        b.recent_average.total_cmp(&a.recent_average).then_with(|| a.student_id.cmp(&b.student_id))
    });

    let mut at_risk: Vec<StudentSegment> = students
        .iter()
        .filter(|student| is_at_risk(student, rules))
        .cloned()
        .collect();
    at_risk.sort_by(|a, b| {
        a.recent_average.total_cmp(&b.recent_average).then_with(|| a.student_id.cmp(&b.student_id))
    });

    Segmentation { top_performers, at_risk, students }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analytics::tests::card_with_score;
    use crate::services::scoring::ScoreCard;

    const RULES: SegmentRules =
        SegmentRules { window: 5, tolerance: 5.0, top_min_average: 80.0, at_risk_max_average: 50.0 };

    fn history<'a>(student: &str, cards: &'a [ScoreCard]) -> Vec<ScoredAttempt<'a>> {
        cards
            .iter()
            .map(|card| ScoredAttempt { student_id: student.to_string(), card })
            .collect()
    }

    #[test]
    fn jump_above_rolling_average_is_improving() {
        let cards = [card_with_score(50), card_with_score(55), card_with_score(90)];
        let segmentation = segment_students(&history("ana", &cards), RULES);

        let ana = &segmentation.students[0];
        assert_eq!(ana.rolling_average, Some(52.5));
        assert_eq!(ana.latest_score, 90);
        assert_eq!(ana.trend, TrendDirection::Improving);
        assert_eq!(ana.recent_average, 65.0);
    }

    #[test]
    fn tolerance_band_decides_stable() {
        assert_eq!(classify(&[60, 60], 65, 5.0).1, TrendDirection::Stable);
        assert_eq!(classify(&[60, 60], 55, 5.0).1, TrendDirection::Stable);
        assert_eq!(classify(&[60, 60], 66, 5.0).1, TrendDirection::Improving);
        assert_eq!(classify(&[60, 60], 54, 5.0).1, TrendDirection::Declining);
        assert_eq!(classify(&[], 54, 5.0), (None, TrendDirection::Stable));
    }

    #[test]
    fn window_limits_history() {
        let cards: Vec<ScoreCard> = [10, 10, 10, 80, 80, 80].into_iter().map(card_with_score).collect();
        let rules = SegmentRules { window: 3, ..RULES };
        let segmentation = segment_students(&history("ben", &cards), rules);

        let ben = &segmentation.students[0];
        assert_eq!(ben.scored_attempts, 6);
        assert_eq!(ben.rolling_average, Some(80.0));
        assert_eq!(ben.trend, TrendDirection::Stable);
        assert_eq!(segmentation.top_performers.len(), 1);
    }

    #[test]
    fn splits_top_performers_and_at_risk() {
        let high = [card_with_score(90), card_with_score(85)];
        let low = [card_with_score(30), card_with_score(40)];
        let mid = [card_with_score(60)];
        let mut attempts = history("zoe", &high);
        attempts.extend(history("amy", &low));
        attempts.extend(history("max", &mid));

        let segmentation = segment_students(&attempts, RULES);
        assert_eq!(segmentation.students.len(), 3);
        assert_eq!(segmentation.top_performers[0].student_id, "zoe");
        assert_eq!(segmentation.at_risk[0].student_id, "amy");
        assert_eq!(segmentation.at_risk[0].trend, TrendDirection::Improving);
        assert_eq!(segmentation.students[1].trend, TrendDirection::Stable);
    }

    #[test]
    fn declining_mid_range_student_is_at_risk() {
        let cards = [card_with_score(70), card_with_score(72), card_with_score(55)];
        let segmentation = segment_students(&history("eva", &cards), RULES);

        let eva = &segmentation.students[0];
        assert_eq!(eva.trend, TrendDirection::Declining);
        assert_eq!(eva.recent_average, 65.67);
        assert_eq!(segmentation.at_risk.len(), 1);
        assert_eq!(segmentation.at_risk[0].student_id, "eva");
        assert!(segmentation.top_performers.is_empty());
    }

    #[test]
    fn declining_student_is_not_a_top_performer() {
        let cards = [card_with_score(100), card_with_score(100), card_with_score(85)];
        let segmentation = segment_students(&history("kai", &cards), RULES);

        assert_eq!(segmentation.students[0].trend, TrendDirection::Declining);
        assert_eq!(segmentation.students[0].recent_average, 95.0);
        assert!(segmentation.top_performers.is_empty());
        assert!(segmentation.at_risk.is_empty());
    }

    #[test]
    fn improving_student_just_under_the_cut_off_is_neither() {
        let cards = [card_with_score(60), card_with_score(90)];
        let segmentation = segment_students(&history("lea", &cards), RULES);

        let lea = &segmentation.students[0];
        assert_eq!(lea.trend, TrendDirection::Improving);
        assert_eq!(lea.recent_average, 75.0);
        assert!(segmentation.top_performers.is_empty());
        assert!(segmentation.at_risk.is_empty());
    }
}
