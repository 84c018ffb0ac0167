use serde::{Deserialize, Serialize};

use crate::EngineError;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.25;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordWeight {
    pub keyword: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveRule {
    pub list_name: String,
    pub triggers: Vec<String>,
}

/// Keyword tables and thresholds consumed by the scorers and the clusterer.
///
/// Table order is significant: move rules that tie on match count resolve to the
/// rule listed first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationConfig {
    #[serde(default = "default_due_keywords")]
    pub due_keywords: Vec<KeywordWeight>,
    #[serde(default = "default_move_rules")]
    pub move_rules: Vec<MoveRule>,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            due_keywords: default_due_keywords(),
            move_rules: default_move_rules(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl RecommendationConfig {
    /// Check table entries and the similarity threshold.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] when a keyword, trigger, or list name is blank,
    /// a weight is zero, or the threshold falls outside `[0.0, 1.0]`.
    pub fn validate(&self) -> Result<(), EngineError> {
        for entry in &self.due_keywords {
            if entry.keyword.trim().is_empty() {
                return Err(EngineError::Config("due keyword MUST be non-empty".to_string()));
            }
            if entry.weight == 0 {
                return Err(EngineError::Config(format!(
                    "due keyword `{}` MUST have a positive weight",
                    entry.keyword
                )));
            }
        }

        for rule in &self.move_rules {
            if rule.list_name.trim().is_empty() {
                return Err(EngineError::Config("move rule list_name MUST be non-empty".to_string()));
            }
            if rule.triggers.iter().any(|trigger| trigger.trim().is_empty()) {
                return Err(EngineError::Config(format!(
                    "move rule `{}` has an empty trigger",
                    rule.list_name
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(EngineError::Config(
                "similarity_threshold MUST be in [0.0, 1.0]".to_string(),
            ));
        }

        Ok(())
    }
}

#[must_use]
pub fn default_due_keywords() -> Vec<KeywordWeight> {
    [
        ("urgent", 5),
        ("asap", 5),
        ("critical", 4),
        ("blocker", 4),
        ("bug", 3),
        ("fix", 3),
        ("hot", 3),
        ("review", 2),
        ("pr", 2),
        ("deploy", 2),
        ("meeting", 1),
        ("presentation", 1),
        ("research", 1),
        ("planning", 1),
    ]
    .into_iter()
    .map(|(keyword, weight)| KeywordWeight { keyword: keyword.to_string(), weight })
    .collect()
}

#[must_use]
pub fn default_move_rules() -> Vec<MoveRule> {
    let rule = |list_name: &str, triggers: &[&str]| MoveRule {
        list_name: list_name.to_string(),
        triggers: triggers.iter().map(|trigger| (*trigger).to_string()).collect(),
    };

    vec![
        rule(
            "In Progress",
            &["start", "started", "starting", "doing", "inprogress", "in progress", "working", "begin"],
        ),
        rule("Done", &["done", "completed", "finished", "merged", "closed"]),
        rule("Blocked", &["blocked", "waiting", "hold", "on hold"]),
        rule("Review", &["review", "code review", "pr"]),
    ]
}

fn default_similarity_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}
