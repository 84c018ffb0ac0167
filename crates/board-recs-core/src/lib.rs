use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

pub mod cluster;
pub mod config;
pub mod scoring;
pub mod text;

pub use cluster::{Cluster, RelationClusterer, SimilarityEdge};
pub use config::{
    default_due_keywords, default_move_rules, KeywordWeight, MoveRule, RecommendationConfig,
    DEFAULT_SIMILARITY_THRESHOLD,
};
pub use scoring::{DueDateScorer, DueEstimate, MoveCandidate, MoveScorer};
pub use text::{cosine_similarity, normalize_text, tokenize, TermVector};

const UNTITLED_CARD: &str = "Untitled";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
}

macro_rules! ulid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(pub Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(value).map(Self)
            }
        }
    };
}

ulid_id!(BoardId);
ulid_id!(ListId);
ulid_id!(CardId);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardRecord {
    pub board_id: BoardId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl BoardRecord {
    /// # Errors
    /// Returns [`EngineError::Validation`] when the title is blank.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.title.trim().is_empty() {
            return Err(EngineError::Validation("board title MUST be non-empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListRecord {
    pub list_id: ListId,
    pub board_id: BoardId,
    pub title: String,
    pub position: i64,
}

impl ListRecord {
    /// # Errors
    /// Returns [`EngineError::Validation`] when the title is blank or the position is negative.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.title.trim().is_empty() {
            return Err(EngineError::Validation("list title MUST be non-empty".to_string()));
        }
        if self.position < 0 {
            return Err(EngineError::Validation("list position MUST be >= 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardRecord {
    pub card_id: CardId,
    pub board_id: BoardId,
    pub list_id: ListId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub position: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl CardRecord {
    /// Cards are written with a trimmed, non-empty title; stored cards may still
    /// carry an empty description.
    ///
    /// # Errors
    /// Returns [`EngineError::Validation`] when the title is blank or the position is negative.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.title.trim().is_empty() {
            return Err(EngineError::Validation("card title MUST be non-empty".to_string()));
        }
        if self.title.trim() != self.title {
            return Err(EngineError::Validation(
                "card title MUST NOT have leading or trailing whitespace".to_string(),
            ));
        }
        if self.position < 0 {
            return Err(EngineError::Validation("card position MUST be >= 0".to_string()));
        }
        Ok(())
    }

    /// Title and description joined by one space, the text every scorer reads.
    #[must_use]
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DueDateSuggestion {
    pub card_id: CardId,
    pub card_title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub suggested_due: OffsetDateTime,
    pub score: u32,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MoveSuggestion {
    pub card_id: CardId,
    pub card_title: String,
    pub suggested_list_name: String,
    pub suggested_list_id: Option<ListId>,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    pub id: CardId,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedGroup {
    pub cards: Vec<GroupMember>,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResult {
    pub due_date_suggestions: Vec<DueDateSuggestion>,
    pub move_suggestions: Vec<MoveSuggestion>,
    pub related_groups: Vec<RelatedGroup>,
}

/// Read-only access to the cards and lists of one board.
pub trait BoardSource {
    /// # Errors
    /// Returns [`EngineError::DataUnavailable`] when the backend cannot be read.
    fn fetch_cards_for_board(&self, board_id: BoardId) -> Result<Vec<CardRecord>, EngineError>;

    /// # Errors
    /// Returns [`EngineError::DataUnavailable`] when the backend cannot be read.
    fn fetch_lists_for_board(&self, board_id: BoardId) -> Result<Vec<ListRecord>, EngineError>;
}

/// Due-date, move, and related-card recommendations for one board at a time.
#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    due_scorer: DueDateScorer,
    move_scorer: MoveScorer,
    clusterer: RelationClusterer,
}

impl RecommendationEngine {
    /// Build an engine from validated keyword tables.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] when the configuration is invalid.
    pub fn new(config: RecommendationConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            due_scorer: DueDateScorer::new(config.due_keywords),
            move_scorer: MoveScorer::new(config.move_rules),
            clusterer: RelationClusterer::new(config.similarity_threshold),
        })
    }

    /// Fetch a board's cards and lists from `source` and score them.
    ///
    /// # Errors
    /// Returns [`EngineError::DataUnavailable`] when either fetch fails; no partial
    /// result is produced.
    pub fn compute_recommendations<S>(
        &self,
        source: &S,
        board_id: BoardId,
        now: OffsetDateTime,
    ) -> Result<RecommendationResult, EngineError>
    where
        S: BoardSource + ?Sized,
    {
        let cards = source.fetch_cards_for_board(board_id).inspect_err(|err| {
            tracing::warn!(%board_id, error = %err, "failed to fetch cards");
        })?;
        let lists = source.fetch_lists_for_board(board_id).inspect_err(|err| {
            tracing::warn!(%board_id, error = %err, "failed to fetch lists");
        })?;
        tracing::debug!(%board_id, cards = cards.len(), lists = lists.len(), "loaded board");
        Ok(self.recommend(&cards, &lists, now))
    }

    /// Score already-loaded cards against the board's lists.
    #[must_use]
    pub fn recommend(
        &self,
        cards: &[CardRecord],
        lists: &[ListRecord],
        now: OffsetDateTime,
    ) -> RecommendationResult {
        let list_ids = list_ids_by_title(lists);
        let mut due_date_suggestions = Vec::new();
        let mut move_suggestions = Vec::new();

        for card in cards {
            let text = card.text();

            if let Some(estimate) = self.due_scorer.estimate(&text, now) {
                due_date_suggestions.push(DueDateSuggestion {
                    card_id: card.card_id,
                    card_title: card.title.clone(),
                    suggested_due: estimate.suggested_due,
                    score: estimate.score,
                    confidence: estimate.confidence,
                    reason: format!("Weighted keywords sum = {}", estimate.score),
                });
            }

            if let Some(candidate) = self.move_scorer.suggest(&text) {
                let suggested_list_id =
                    list_ids.get(candidate.list_name.to_lowercase().as_str()).copied();
                move_suggestions.push(MoveSuggestion {
                    card_id: card.card_id,
                    card_title: card.title.clone(),
                    suggested_list_name: candidate.list_name,
                    suggested_list_id,
                    confidence: candidate.confidence,
                    reason: format!("Matched {} keyword(s)", candidate.match_count),
                });
            }
        }

        let related_groups = self.related_groups(cards);

        RecommendationResult { due_date_suggestions, move_suggestions, related_groups }
    }

    fn related_groups(&self, cards: &[CardRecord]) -> Vec<RelatedGroup> {
        let vectors = cards.iter().map(|card| TermVector::from_text(&card.text())).collect::<Vec<_>>();
        self.clusterer
            .cluster(&vectors)
            .into_iter()
            .map(|cluster| RelatedGroup {
                cards: cluster
                    .members
                    .iter()
                    .map(|&index| {
                        let card = &cards[index];
                        let title = if card.title.is_empty() {
                            UNTITLED_CARD.to_string()
                        } else {
                            card.title.clone()
                        };
                        GroupMember { id: card.card_id, title }
                    })
                    .collect(),
                score: cluster.score,
                reason: format!("Textual similarity (avg={:.2})", cluster.score),
            })
            .collect()
    }
}

/// Lowercased list title to list id; later lists win on duplicate titles.
fn list_ids_by_title(lists: &[ListRecord]) -> HashMap<String, ListId> {
    lists
        .iter()
        .filter(|list| !list.title.is_empty())
        .map(|list| (list.title.to_lowercase(), list.list_id))
        .collect()
}
