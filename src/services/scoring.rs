//! Scoring engine. A pure reduction of an answer sheet against a frozen paper: no clock, no
//! store, no randomness, so the same inputs always produce the same card.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::{AnswerSheet, PaperSnapshot, Question};
use crate::db::types::{DifficultyLevel, QuestionKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum ScoringError {
    #[error("question {question_id} has no correct option")]
    MissingCorrectIndex { question_id: String },
    #[error("question {question_id} points at option {index} but only has {options} options")]
    DanglingCorrectIndex { question_id: String, index: u32, options: usize },
}

/// Correctness counts for one group of questions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Tally {
    pub(crate) total: u32,
    pub(crate) correct: u32,
    pub(crate) wrong: u32,
    pub(crate) skipped: u32,
    pub(crate) pending_review: u32,
}

impl Tally {
    fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Correct => self.correct += 1,
            Outcome::Wrong { .. } => self.wrong += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::PendingReview => self.pending_review += 1,
        }
    }

    /// Objective questions that were answered, right or wrong.
    pub(crate) fn graded(&self) -> u32 {
        self.correct + self.wrong
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ChapterBreakdown {
    pub(crate) subject: String,
    pub(crate) chapter: String,
    #[serde(flatten)]
    pub(crate) tally: Tally,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DifficultyBreakdown {
    pub(crate) difficulty: DifficultyLevel,
    #[serde(flatten)]
    pub(crate) tally: Tally,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct KindBreakdown {
    pub(crate) kind: QuestionKind,
    #[serde(flatten)]
    pub(crate) tally: Tally,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MistakeExample {
    pub(crate) question_id: String,
    pub(crate) prompt: String,
    pub(crate) selected_index: u32,
    pub(crate) correct_index: u32,
}

/// Wrong answers of one chapter. `total_wrong` counts all of them, `examples` is capped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MistakePattern {
    pub(crate) chapter: String,
    pub(crate) total_wrong: u32,
    pub(crate) examples: Vec<MistakeExample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ScoreCard {
    pub(crate) total_questions: u32,
    pub(crate) attempted_questions: u32,
    pub(crate) correct_answers: u32,
    pub(crate) wrong_answers: u32,
    pub(crate) skipped: u32,
    /// Answered subjective questions; never graded automatically.
    pub(crate) pending_review: u32,
    /// `round(100 * correct / total)`.
    pub(crate) score: u32,
    /// `100 * correct / attempted`, 0 when nothing was attempted.
    pub(crate) accuracy: f64,
    pub(crate) total_time_seconds: i64,
    pub(crate) avg_time_per_question: f64,
    pub(crate) by_chapter: Vec<ChapterBreakdown>,
    pub(crate) by_difficulty: Vec<DifficultyBreakdown>,
    pub(crate) by_kind: Vec<KindBreakdown>,
    pub(crate) mistakes: Vec<MistakePattern>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Correct,
    Wrong { selected: u32, correct: u32 },
    Skipped,
    PendingReview,
}

fn grade(question: &Question, selection: Option<u32>) -> Result<Outcome, ScoringError> {
    match question.kind {
        QuestionKind::Subjective => {
            Ok(if selection.is_some() { Outcome::PendingReview } else { Outcome::Skipped })
        }
        QuestionKind::Objective => {
            let correct = correct_index(question)?;
            Ok(match selection {
                None => Outcome::Skipped,
                Some(selected) if selected == correct => Outcome::Correct,
                Some(selected) => Outcome::Wrong { selected, correct },
            })
        }
    }
}

fn correct_index(question: &Question) -> Result<u32, ScoringError> {
    let index = question
        .correct_index
        .ok_or_else(|| ScoringError::MissingCorrectIndex { question_id: question.id.clone() })?;

    if (index as usize) >= question.options.len() {
        return Err(ScoringError::DanglingCorrectIndex {
            question_id: question.id.clone(),
            index,
            options: question.options.len(),
        });
    }

    Ok(index)
}

/// Percentage rounded half up, computed on integers so it never drifts.
fn rounded_percentage(part: u32, whole: u32) -> u32 {
    if whole == 0 {
        return 0;
    }
    let part = u64::from(part);
    let whole = u64::from(whole);
    ((200 * part + whole) / (2 * whole)) as u32
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn score_attempt(
    paper: &PaperSnapshot,
    answers: &AnswerSheet,
    total_time_seconds: i64,
    mistake_examples_per_chapter: usize,
) -> Result<ScoreCard, ScoringError> {
    let mut overall = Tally::default();
    let mut by_chapter: BTreeMap<&str, Tally> = BTreeMap::new();
    let mut by_difficulty: BTreeMap<DifficultyLevel, Tally> = BTreeMap::new();
    let mut by_kind: BTreeMap<QuestionKind, Tally> = BTreeMap::new();
    let mut mistakes: BTreeMap<&str, MistakePattern> = BTreeMap::new();

    for question in &paper.questions {
        let selection = answers.get(&question.id).copied().flatten();
        let outcome = grade(question, selection)?;

        overall.record(outcome);
        by_chapter.entry(question.chapter.as_str()).or_default().record(outcome);
        by_difficulty.entry(question.difficulty).or_default().record(outcome);
        by_kind.entry(question.kind).or_default().record(outcome);

        if let Outcome::Wrong { selected, correct } = outcome {
            let pattern =
                mistakes.entry(question.chapter.as_str()).or_insert_with(|| MistakePattern {
                    chapter: question.chapter.clone(),
                    total_wrong: 0,
                    examples: Vec::new(),
                });
            pattern.total_wrong += 1;
            if pattern.examples.len() < mistake_examples_per_chapter {
                pattern.examples.push(MistakeExample {
                    question_id: question.id.clone(),
                    prompt: question.prompt.clone(),
                    selected_index: selected,
                    correct_index: correct,
                });
            }
        }
    }

    let attempted = overall.correct + overall.wrong + overall.pending_review;
    let accuracy = if attempted == 0 {
        0.0
    } else {
        round2(f64::from(overall.correct) * 100.0 / f64::from(attempted))
    };
    let avg_time_per_question = if overall.total == 0 {
        0.0
    } else {
        round2(total_time_seconds as f64 / f64::from(overall.total))
    };

    Ok(ScoreCard {
        total_questions: overall.total,
        attempted_questions: attempted,
        correct_answers: overall.correct,
        wrong_answers: overall.wrong,
        skipped: overall.skipped,
        pending_review: overall.pending_review,
        score: rounded_percentage(overall.correct, overall.total),
        accuracy,
        total_time_seconds,
        avg_time_per_question,
        by_chapter: by_chapter
            .into_iter()
            .map(|(chapter, tally)| ChapterBreakdown {
                subject: paper.subject.clone(),
                chapter: chapter.to_string(),
                tally,
            })
            .collect(),
        by_difficulty: by_difficulty
            .into_iter()
            .map(|(difficulty, tally)| DifficultyBreakdown { difficulty, tally })
            .collect(),
        by_kind: by_kind.into_iter().map(|(kind, tally)| KindBreakdown { kind, tally }).collect(),
        mistakes: mistakes.into_values().collect(),
    })
}
