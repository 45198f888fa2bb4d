use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::services::analytics::ScoredAttempt;
use crate::services::scoring::round2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct WeakChapter {
    pub(crate) subject: String,
    pub(crate) chapter: String,
    /// Mean per-attempt accuracy on the chapter's graded questions, 0-100.
    pub(crate) accuracy: f64,
    pub(crate) attempts: usize,
    pub(crate) wrong_answers: u32,
}

#[derive(Default)]
struct ChapterStats {
    accuracies: Vec<f64>,
    wrong_answers: u32,
}

/// Groups graded chapter results by (subject, chapter) and returns the weakest ones, lowest
/// accuracy first. Chapters with fewer than `min_attempts` contributing attempts, or with a
/// mean accuracy at or above `max_accuracy`, are left out.
pub(crate) fn weak_chapters(
    attempts: &[ScoredAttempt<'_>],
    min_attempts: usize,
    max_accuracy: f64,
    limit: usize,
) -> Vec<WeakChapter> {
    let mut stats: BTreeMap<(&str, &str), ChapterStats> = BTreeMap::new();

    for attempt in attempts {
        for row in &attempt.card.by_chapter {
            let graded = row.tally.graded();
            if graded == 0 {
                continue;
            }
            let entry = stats.entry((row.subject.as_str(), row.chapter.as_str())).or_default();
            entry.accuracies.push(f64::from(row.tally.correct) * 100.0 / f64::from(graded));
            entry.wrong_answers += row.tally.wrong;
        }
    }

    let mut weak: Vec<WeakChapter> = stats
        .into_iter()
        .filter(|(_, stats)| stats.accuracies.len() >= min_attempts.max(1))
        .map(|((subject, chapter), mut stats)| {
            // Summing in sorted order keeps the mean independent of input order.
            stats.accuracies.sort_by(f64::total_cmp);
            let sum: f64 = stats.accuracies.iter().sum();
            WeakChapter {
                subject: subject.to_string(),
                chapter: chapter.to_string(),
                accuracy: round2(sum / stats.accuracies.len() as f64),
                attempts: stats.accuracies.len(),
                wrong_answers: stats.wrong_answers,
            }
        })
        .filter(|chapter| chapter.accuracy < max_accuracy)
        .collect();

    weak.sort_by(|a, b| {
        a.accuracy
            .total_cmp(&b.accuracy)
            .then_with(|| a.subject.cmp(&b.subject))
            .then_with(|| a.chapter.cmp(&b.chapter))
    });
    weak.truncate(limit);
    weak
}
