use std::path::PathBuf;

use anyhow::{Context, Result};
use board_recs_api::{
    load_config, AddBoardRequest, AddCardRequest, AddListRequest, BoardRecsApi,
    RecommendationsRequest,
};
use board_recs_core::{BoardId, ListId};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "brk")]
#[command(about = "Board recommendations CLI")]
struct Cli {
    #[arg(long, default_value = "./board_recs.sqlite3")]
    db: PathBuf,

    /// YAML file overriding the keyword tables and similarity threshold.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Board {
        #[command(subcommand)]
        command: BoardCommand,
    },
    List {
        #[command(subcommand)]
        command: ListCommand,
    },
    Card {
        #[command(subcommand)]
        command: CardCommand,
    },
    Recs {
        #[command(subcommand)]
        command: RecsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum BoardCommand {
    Add(BoardAddArgs),
    Show(BoardRefArgs),
}

#[derive(Debug, Args)]
struct BoardAddArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, Args)]
struct BoardRefArgs {
    #[arg(long)]
    board: String,
}

#[derive(Debug, Subcommand)]
enum ListCommand {
    Add(ListAddArgs),
}

#[derive(Debug, Args)]
struct ListAddArgs {
    #[arg(long)]
    board: String,
    #[arg(long)]
    title: String,
    #[arg(long)]
    position: i64,
}

#[derive(Debug, Subcommand)]
enum CardCommand {
    Add(CardAddArgs),
}

#[derive(Debug, Args)]
struct CardAddArgs {
    #[arg(long)]
    board: String,
    #[arg(long)]
    list: String,
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    position: Option<i64>,
}

#[derive(Debug, Subcommand)]
enum RecsCommand {
    Show(RecsShowArgs),
}

#[derive(Debug, Args)]
struct RecsShowArgs {
    #[arg(long)]
    board: String,
    /// RFC 3339 reference time; defaults to now.
    #[arg(long)]
    as_of: Option<String>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    let value = serde_json::to_value(value)?;
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn parse_board_id(raw: &str) -> Result<BoardId> {
    raw.parse().with_context(|| format!("invalid board id: {raw}"))
}

fn parse_list_id(raw: &str) -> Result<ListId> {
    raw.parse().with_context(|| format!("invalid list id: {raw}"))
}

fn parse_as_of(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp for --as-of: {raw}"))
}

/// Logs go to stderr, and only when `RUST_LOG` asks for them.
fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let api = BoardRecsApi::new(cli.db, config)?;
    tracing::debug!(command = ?cli.command, "running command");

    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Board { command } => run_board(command, &api),
        Command::List { command } => run_list(command, &api),
        Command::Card { command } => run_card(command, &api),
        Command::Recs { command } => run_recs(command, &api),
    }
}

fn run_db(command: DbCommand, api: &BoardRecsApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(&serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit_json(&api.migrate(args.dry_run)?),
        DbCommand::IntegrityCheck => emit_json(&api.integrity_check()?),
    }
}

fn run_board(command: BoardCommand, api: &BoardRecsApi) -> Result<()> {
    match command {
        BoardCommand::Add(args) => {
            let board =
                api.add_board(AddBoardRequest { title: args.title, description: args.description })?;
            emit_json(&board)
        }
        BoardCommand::Show(args) => emit_json(&api.board_show(parse_board_id(&args.board)?)?),
    }
}

fn run_list(command: ListCommand, api: &BoardRecsApi) -> Result<()> {
    match command {
        ListCommand::Add(args) => {
            let board_id = parse_board_id(&args.board)?;
            let list = api
                .add_list(board_id, AddListRequest { title: args.title, position: args.position })?;
            emit_json(&list)
        }
    }
}

fn run_card(command: CardCommand, api: &BoardRecsApi) -> Result<()> {
    match command {
        CardCommand::Add(args) => {
            let board_id = parse_board_id(&args.board)?;
            let card = api.add_card(
                board_id,
                AddCardRequest {
                    list_id: parse_list_id(&args.list)?,
                    title: args.title,
                    description: args.description,
                    position: args.position,
                },
            )?;
            emit_json(&card)
        }
    }
}

fn run_recs(command: RecsCommand, api: &BoardRecsApi) -> Result<()> {
    match command {
        RecsCommand::Show(args) => {
            let request = RecommendationsRequest {
                board_id: parse_board_id(&args.board)?,
                as_of: args.as_of.as_deref().map(parse_as_of).transpose()?,
            };
            emit_json(&api.recommendations(request)?)
        }
    }
}
