use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use board_recs_core::{
    BoardId, BoardRecord, CardId, CardRecord, EngineError, ListId, ListRecord,
    RecommendationConfig, RecommendationEngine, RecommendationResult,
};
use board_recs_store_sqlite::{IntegrityReport, SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("board not found: {0}")]
    BoardNotFound(BoardId),
    #[error("list {list_id} does not belong to board {board_id}")]
    ListNotOnBoard { list_id: ListId, board_id: BoardId },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddBoardRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddListRequest {
    pub title: String,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddCardRequest {
    pub list_id: ListId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecommendationsRequest {
    pub board_id: BoardId,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub as_of: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardSnapshot {
    pub board: BoardRecord,
    pub lists: Vec<ListRecord>,
    pub cards: Vec<CardRecord>,
}

/// Load a recommendation config from a YAML (or JSON) file, or the built-in tables.
///
/// # Errors
/// Returns an error when the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&Path>) -> Result<RecommendationConfig> {
    let Some(path) = path else {
        return Ok(RecommendationConfig::default());
    };

    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: RecommendationConfig = serde_yaml::from_str(&body)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    config.validate()?;
    tracing::debug!(
        path = %path.display(),
        due_keywords = config.due_keywords.len(),
        move_rules = config.move_rules.len(),
        "loaded recommendation config"
    );
    Ok(config)
}

#[derive(Debug, Clone)]
pub struct BoardRecsApi {
    db_path: PathBuf,
    engine: RecommendationEngine,
}

impl BoardRecsApi {
    /// # Errors
    /// Returns an error when `config` fails validation.
    pub fn new(db_path: PathBuf, config: RecommendationConfig) -> Result<Self> {
        let engine = RecommendationEngine::new(config)?;
        Ok(Self { db_path, engine })
    }

    /// API bound to `db_path` with the built-in keyword tables.
    ///
    /// # Errors
    /// Returns an error when the built-in tables fail validation.
    pub fn with_default_config(db_path: PathBuf) -> Result<Self> {
        Self::new(db_path, RecommendationConfig::default())
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path).map_err(data_unavailable)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate().map_err(data_unavailable)?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status().map_err(data_unavailable)
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status().map_err(data_unavailable)?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate().map_err(data_unavailable)?;
        let after = store.schema_status().map_err(data_unavailable)?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when integrity pragmas cannot be executed.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = self.open_store()?;
        store.integrity_check().map_err(data_unavailable)
    }

    /// Create one board.
    ///
    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn add_board(&self, input: AddBoardRequest) -> Result<BoardRecord> {
        let mut store = self.open_migrated_store()?;
        let board = BoardRecord {
            board_id: BoardId::new(),
            title: input.title.trim().to_string(),
            description: input.description.unwrap_or_default(),
            created_at: OffsetDateTime::now_utc(),
        };
        store.add_board(&board).map_err(data_unavailable)?;
        Ok(board)
    }

    /// Create one list on an existing board.
    ///
    /// # Errors
    /// Returns [`ApiError::BoardNotFound`] for an unknown board, or an error when
    /// validation or persistence fails.
    pub fn add_list(&self, board_id: BoardId, input: AddListRequest) -> Result<ListRecord> {
        let mut store = self.open_migrated_store()?;
        require_board(&store, board_id)?;
        let list = ListRecord {
            list_id: ListId::new(),
            board_id,
            title: input.title,
            position: input.position,
        };
        store.add_list(&list).map_err(data_unavailable)?;
        Ok(list)
    }

    /// Create one card in a list of `board_id`; without a position the card goes last.
    ///
    /// # Errors
    /// Returns [`ApiError::BoardNotFound`] or [`ApiError::ListNotOnBoard`] for mismatched
    /// identities, or an error when validation or persistence fails.
    pub fn add_card(&self, board_id: BoardId, input: AddCardRequest) -> Result<CardRecord> {
        let mut store = self.open_migrated_store()?;
        require_board(&store, board_id)?;
        let lists = store.lists_for_board(board_id).map_err(data_unavailable)?;
        if !lists.iter().any(|list| list.list_id == input.list_id) {
            return Err(ApiError::ListNotOnBoard { list_id: input.list_id, board_id }.into());
        }

        let position = match input.position {
            Some(position) => position,
            None => store.next_card_position(input.list_id).map_err(data_unavailable)?,
        };
        let card = CardRecord {
            card_id: CardId::new(),
            board_id,
            list_id: input.list_id,
            title: input.title.trim().to_string(),
            description: input.description.unwrap_or_default(),
            position,
            created_at: OffsetDateTime::now_utc(),
        };
        store.add_card(&card).map_err(data_unavailable)?;
        Ok(card)
    }

    /// Board with its lists and cards.
    ///
    /// # Errors
    /// Returns [`ApiError::BoardNotFound`] for an unknown board, or an error when reads fail.
    pub fn board_show(&self, board_id: BoardId) -> Result<BoardSnapshot> {
        let store = self.open_migrated_store()?;
        let board = require_board(&store, board_id)?;
        Ok(BoardSnapshot {
            board,
            lists: store.lists_for_board(board_id).map_err(data_unavailable)?,
            cards: store.cards_for_board(board_id).map_err(data_unavailable)?,
        })
    }

    /// Compute due-date, move, and related-card recommendations for one board.
    ///
    /// # Errors
    /// Returns [`EngineError::DataUnavailable`] when the store cannot be opened or read,
    /// and [`ApiError::BoardNotFound`] for an unknown board. Both stay downcastable.
    pub fn recommendations(&self, input: RecommendationsRequest) -> Result<RecommendationResult> {
        let store = self.open_migrated_store()?;
        require_board(&store, input.board_id)?;

        let as_of = input.as_of.unwrap_or_else(OffsetDateTime::now_utc);
        let result = self.engine.compute_recommendations(&store, input.board_id, as_of)?;
        tracing::info!(
            board_id = %input.board_id,
            due_date_suggestions = result.due_date_suggestions.len(),
            move_suggestions = result.move_suggestions.len(),
            related_groups = result.related_groups.len(),
            "computed board recommendations"
        );
        Ok(result)
    }
}

fn require_board(store: &SqliteStore, board_id: BoardId) -> Result<BoardRecord> {
    store
        .get_board(board_id)
        .map_err(data_unavailable)?
        .ok_or_else(|| anyhow!(ApiError::BoardNotFound(board_id)))
}

/// Storage failures surface as [`EngineError::DataUnavailable`]; engine errors such as
/// record validation pass through unchanged.
fn data_unavailable(err: anyhow::Error) -> anyhow::Error {
    if err.downcast_ref::<EngineError>().is_some() {
        return err;
    }
    EngineError::DataUnavailable(format!("{err:#}")).into()
}
