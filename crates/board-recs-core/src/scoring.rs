use std::cmp::Ordering;

use time::{Duration, OffsetDateTime};

use crate::config::{KeywordWeight, MoveRule};
use crate::text::normalize_text;

const DUE_CONFIDENCE_BASE: f64 = 0.2;
const DUE_CONFIDENCE_STEP: f64 = 0.1;
const DUE_CONFIDENCE_CAP: f64 = 0.95;

const MOVE_CONFIDENCE_BASE: f64 = 0.3;
const MOVE_CONFIDENCE_STEP: f64 = 0.2;
const MOVE_CONFIDENCE_CAP: f64 = 0.9;

/// Outcome of scoring one card's text for urgency.
#[derive(Debug, Clone, PartialEq)]
pub struct DueEstimate {
    pub score: u32,
    pub days: i64,
    pub suggested_due: OffsetDateTime,
    pub confidence: f64,
}

/// Weighted substring scan over normalized card text.
#[derive(Debug, Clone)]
pub struct DueDateScorer {
    weights: Vec<KeywordWeight>,
}

impl DueDateScorer {
    #[must_use]
    pub fn new(weights: Vec<KeywordWeight>) -> Self {
        Self { weights }
    }

    /// Sum the weights of every keyword contained in the normalized text.
    ///
    /// Matching is by substring, so `urgently` counts for `urgent`.
    #[must_use]
    pub fn score(&self, text: &str) -> u32 {
        let normalized = normalize_text(text);
        self.weights
            .iter()
            .filter(|entry| normalized.contains(entry.keyword.as_str()))
            .fold(0_u32, |score, entry| score.saturating_add(entry.weight))
    }

    #[must_use]
    pub fn estimate(&self, text: &str, now: OffsetDateTime) -> Option<DueEstimate> {
        let score = self.score(text);
        let days = score_to_days(score)?;
        Some(DueEstimate {
            score,
            days,
            suggested_due: add_calendar_days(now, days),
            confidence: due_confidence(score),
        })
    }
}

/// Map an urgency score to a lead time in days; `None` for a zero score.
#[must_use]
pub fn score_to_days(score: u32) -> Option<i64> {
    match score {
        0 => None,
        1..=2 => Some(7),
        3..=4 => Some(5),
        5..=7 => Some(2),
        _ => Some(1),
    }
}

#[must_use]
pub fn due_confidence(score: u32) -> f64 {
    (DUE_CONFIDENCE_BASE + f64::from(score) * DUE_CONFIDENCE_STEP).min(DUE_CONFIDENCE_CAP)
}

/// Advance the calendar date, keeping wall-clock time and offset.
#[must_use]
pub fn add_calendar_days(now: OffsetDateTime, days: i64) -> OffsetDateTime {
    now.replace_date(now.date().saturating_add(Duration::days(days)))
}

/// Winning list for one card's text.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveCandidate {
    pub list_name: String,
    pub match_count: usize,
    pub confidence: f64,
}

impl MoveCandidate {
    fn cmp(lhs: &Self, rhs: &Self) -> Ordering {
        rhs.match_count
            .cmp(&lhs.match_count)
            .then_with(|| rhs.confidence.partial_cmp(&lhs.confidence).unwrap_or(Ordering::Equal))
    }
}

/// Trigger-phrase scan choosing a destination list.
#[derive(Debug, Clone)]
pub struct MoveScorer {
    rules: Vec<MoveRule>,
}

impl MoveScorer {
    #[must_use]
    pub fn new(rules: Vec<MoveRule>) -> Self {
        Self { rules }
    }

    /// Every rule with at least one trigger contained in the normalized text, in rule order.
    #[must_use]
    pub fn candidates(&self, text: &str) -> Vec<MoveCandidate> {
        let normalized = normalize_text(text);
        self.rules
            .iter()
            .filter_map(|rule| {
                let match_count = rule
                    .triggers
                    .iter()
                    .filter(|trigger| normalized.contains(trigger.as_str()))
                    .count();
                (match_count > 0).then(|| MoveCandidate {
                    list_name: rule.list_name.clone(),
                    match_count,
                    confidence: move_confidence(match_count),
                })
            })
            .collect()
    }

    /// Highest match count wins; ties keep rule order.
    #[must_use]
    pub fn suggest(&self, text: &str) -> Option<MoveCandidate> {
        let mut candidates = self.candidates(text);
        candidates.sort_by(MoveCandidate::cmp);
        candidates.into_iter().next()
    }
}

#[must_use]
pub fn move_confidence(match_count: usize) -> f64 {
    let count = f64::from(u32::try_from(match_count).unwrap_or(u32::MAX));
    (MOVE_CONFIDENCE_BASE + count * MOVE_CONFIDENCE_STEP).min(MOVE_CONFIDENCE_CAP)
}
