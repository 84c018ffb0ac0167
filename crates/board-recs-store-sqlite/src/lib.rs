use std::path::Path;

use anyhow::{anyhow, Context, Result};
use board_recs_core::{
    BoardId, BoardRecord, BoardSource, CardId, CardRecord, EngineError, ListId, ListRecord,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS boards (
  board_id TEXT PRIMARY KEY,
  title TEXT NOT NULL CHECK (length(trim(title)) > 0),
  description TEXT NOT NULL DEFAULT '',
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lists (
  list_id TEXT PRIMARY KEY,
  board_id TEXT NOT NULL,
  title TEXT NOT NULL,
  position INTEGER NOT NULL CHECK (position >= 0),
  created_at TEXT NOT NULL,
  UNIQUE(list_id, board_id),
  FOREIGN KEY (board_id) REFERENCES boards(board_id)
);

CREATE TABLE IF NOT EXISTS cards (
  card_id TEXT PRIMARY KEY,
  board_id TEXT NOT NULL,
  list_id TEXT NOT NULL,
  title TEXT NOT NULL,
  description TEXT NOT NULL DEFAULT '',
  position INTEGER NOT NULL CHECK (position >= 0),
  created_at TEXT NOT NULL,
  FOREIGN KEY (board_id) REFERENCES boards(board_id),
  FOREIGN KEY (list_id, board_id) REFERENCES lists(list_id, board_id)
);

CREATE INDEX IF NOT EXISTS idx_lists_board ON lists(board_id, position);
CREATE INDEX IF NOT EXISTS idx_cards_board ON cards(board_id);
CREATE INDEX IF NOT EXISTS idx_cards_list ON cards(list_id, position);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed board store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the database is newer than supported.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 001")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration 001")?;
            tracing::info!(version = 1, "applied board store migration");
            version = 1;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Persist one board.
    ///
    /// # Errors
    /// Returns an error when validation fails or the insert is rejected.
    pub fn add_board(&mut self, board: &BoardRecord) -> Result<()> {
        board.validate().context("board validation failed")?;
        self.conn
            .execute(
                "INSERT INTO boards(board_id, title, description, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    board.board_id.to_string(),
                    board.title,
                    board.description,
                    rfc3339(board.created_at)?
                ],
            )
            .context("failed to insert board")?;
        Ok(())
    }

    /// Persist one list on an existing board.
    ///
    /// # Errors
    /// Returns an error when validation fails or the board does not exist.
    pub fn add_list(&mut self, list: &ListRecord) -> Result<()> {
        list.validate().context("list validation failed")?;
        self.conn
            .execute(
                "INSERT INTO lists(list_id, board_id, title, position, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    list.list_id.to_string(),
                    list.board_id.to_string(),
                    list.title,
                    list.position,
                    now_rfc3339()?
                ],
            )
            .context("failed to insert list")?;
        Ok(())
    }

    /// Persist one card into a list of the same board.
    ///
    /// # Errors
    /// Returns an error when validation fails or the list does not belong to the card's board.
    pub fn add_card(&mut self, card: &CardRecord) -> Result<()> {
        card.validate().context("card validation failed")?;
        self.conn
            .execute(
                "INSERT INTO cards(card_id, board_id, list_id, title, description, position, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    card.card_id.to_string(),
                    card.board_id.to_string(),
                    card.list_id.to_string(),
                    card.title,
                    card.description,
                    card.position,
                    rfc3339(card.created_at)?
                ],
            )
            .context("failed to insert card")?;
        Ok(())
    }

    /// Position just after the last card of `list_id`, or 0 for an empty list.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn next_card_position(&self, list_id: ListId) -> Result<i64> {
        let position = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM cards WHERE list_id = ?1",
                params![list_id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .context("failed to compute next card position")?;
        Ok(position)
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_board(&self, board_id: BoardId) -> Result<Option<BoardRecord>> {
        self.conn
            .query_row(
                "SELECT board_id, title, description, created_at FROM boards WHERE board_id = ?1",
                params![board_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("failed to load board")?
            .map(|(id_raw, title, description, created_at_raw)| -> Result<BoardRecord> {
                Ok(BoardRecord {
                    board_id: BoardId(parse_ulid(&id_raw)?),
                    title,
                    description,
                    created_at: parse_rfc3339(&created_at_raw)?,
                })
            })
            .transpose()
    }

    /// Lists of one board ordered by position.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn lists_for_board(&self, board_id: BoardId) -> Result<Vec<ListRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT list_id, board_id, title, position
             FROM lists
             WHERE board_id = ?1
             ORDER BY position ASC, rowid ASC",
        )?;
        let mut rows = stmt.query(params![board_id.to_string()])?;
        let mut lists = Vec::new();
        while let Some(row) = rows.next()? {
            lists.push(list_from_row(row)?);
        }
        Ok(lists)
    }

    /// Cards of one board in insertion order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn cards_for_board(&self, board_id: BoardId) -> Result<Vec<CardRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT card_id, board_id, list_id, title, description, position, created_at
             FROM cards
             WHERE board_id = ?1
             ORDER BY rowid ASC",
        )?;
        let mut rows = stmt.query(params![board_id.to_string()])?;
        let mut cards = Vec::new();
        while let Some(row) = rows.next()? {
            cards.push(card_from_row(row)?);
        }
        Ok(cards)
    }

    /// Run `SQLite` quick-check and foreign-key verification.
    ///
    /// # Errors
    /// Returns an error when integrity pragmas cannot be executed.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt =
            self.conn.prepare("PRAGMA foreign_key_check").context("failed to run foreign_key_check")?;
        let mut rows = stmt.query([])?;
        let mut foreign_key_violations = Vec::new();
        while let Some(row) = rows.next()? {
            foreign_key_violations.push(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            });
        }

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status: self.schema_status()?,
        })
    }
}

impl BoardSource for SqliteStore {
    fn fetch_cards_for_board(&self, board_id: BoardId) -> Result<Vec<CardRecord>, EngineError> {
        self.cards_for_board(board_id).map_err(|err| EngineError::DataUnavailable(format!("{err:#}")))
    }

    fn fetch_lists_for_board(&self, board_id: BoardId) -> Result<Vec<ListRecord>, EngineError> {
        self.lists_for_board(board_id).map_err(|err| EngineError::DataUnavailable(format!("{err:#}")))
    }
}

fn list_from_row(row: &Row<'_>) -> Result<ListRecord> {
    Ok(ListRecord {
        list_id: ListId(parse_ulid(&row.get::<_, String>(0)?)?),
        board_id: BoardId(parse_ulid(&row.get::<_, String>(1)?)?),
        title: row.get(2)?,
        position: row.get(3)?,
    })
}

fn card_from_row(row: &Row<'_>) -> Result<CardRecord> {
    Ok(CardRecord {
        card_id: CardId(parse_ulid(&row.get::<_, String>(0)?)?),
        board_id: BoardId(parse_ulid(&row.get::<_, String>(1)?)?),
        list_id: ListId(parse_ulid(&row.get::<_, String>(2)?)?),
        title: row.get(3)?,
        description: row.get(4)?,
        position: row.get(5)?,
        created_at: parse_rfc3339(&row.get::<_, String>(6)?)?,
    })
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn parse_ulid(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))
}
