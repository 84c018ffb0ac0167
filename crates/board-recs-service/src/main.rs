use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use board_recs_api::{
    load_config, AddBoardRequest, AddCardRequest, AddListRequest, ApiError, BoardRecsApi,
    BoardSnapshot, MigrateResult, RecommendationsRequest, API_CONTRACT_VERSION,
};
use board_recs_core::{BoardId, BoardRecord, CardRecord, EngineError, ListRecord, RecommendationResult};
use board_recs_store_sqlite::SchemaStatus;
use clap::Parser;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
struct ServiceState {
    api: BoardRecsApi,
    timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
    kind: &'static str,
    #[serde(skip)]
    status: StatusCode,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RecommendationsQuery {
    as_of: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "board-recs-service")]
#[command(about = "Local HTTP service for board recommendations")]
struct Args {
    #[arg(long, default_value = "./board_recs.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// YAML file overriding the keyword tables and similarity threshold.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into(), kind, status }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    fn from_api(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        if let Some(api_err) = err.downcast_ref::<ApiError>() {
            return match api_err {
                ApiError::BoardNotFound(_) => Self::new(StatusCode::NOT_FOUND, "not_found", message),
                ApiError::ListNotOnBoard { .. } => Self::validation(message),
            };
        }
        match err.downcast_ref::<EngineError>() {
            Some(EngineError::DataUnavailable(_)) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "data_unavailable", message)
            }
            Some(EngineError::Validation(_) | EngineError::Config(_)) => Self::validation(message),
            None => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn parse_board_id(raw: &str) -> Result<BoardId, ServiceError> {
    BoardId::from_str(raw).map_err(|err| ServiceError::validation(format!("invalid board_id `{raw}`: {err}")))
}

/// Run one blocking API call off the async workers, bounded by the configured timeout.
async fn run_api<T, F>(state: &ServiceState, operation: &'static str, call: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce(&BoardRecsApi) -> Result<T> + Send + 'static,
{
    let api = state.api.clone();
    let started = Instant::now();
    let task = tokio::task::spawn_blocking(move || call(&api));

    let outcome = match tokio::time::timeout(state.timeout, task).await {
        Ok(Ok(result)) => result.map_err(|err| {
            let service_err = ServiceError::from_api(&err);
            tracing::warn!(operation, kind = service_err.kind, error = %service_err.error, "request failed");
            service_err
        }),
        Ok(Err(join_err)) => Err(ServiceError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            format!("{operation} task failed: {join_err}"),
        )),
        // The blocking task cannot be cancelled; it keeps its pool thread until the call returns.
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = state.timeout.as_millis(),
                "request timed out; blocking call left running in the background"
            );
            Err(ServiceError::new(
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
                format!("{operation} exceeded {} ms", state.timeout.as_millis()),
            ))
        }
    };

    tracing::info!(
        operation,
        ok = outcome.is_ok(),
        elapsed_ms = started.elapsed().as_millis(),
        "request handled"
    );
    outcome
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/boards", post(boards_add))
        .route("/v1/boards/:board_id", get(board_show))
        .route("/v1/boards/:board_id/lists", post(lists_add))
        .route("/v1/boards/:board_id/cards", post(cards_add))
        .route("/v1/boards/:board_id/recommendations", get(board_recommendations))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    let state = ServiceState {
        api: BoardRecsApi::new(args.db.clone(), config)?,
        timeout: Duration::from_millis(args.timeout_ms),
    };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, db = %args.db.display(), "board recommendation service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SchemaStatus>>, ServiceError> {
    let status = run_api(&state, "db.schema_version", BoardRecsApi::schema_status).await?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<MigrateResult>>, ServiceError> {
    let result = run_api(&state, "db.migrate", move |api| api.migrate(request.dry_run)).await?;
    Ok(Json(envelope(result)))
}

async fn boards_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddBoardRequest>,
) -> Result<Json<ServiceEnvelope<BoardRecord>>, ServiceError> {
    let board = run_api(&state, "boards.add", move |api| api.add_board(request)).await?;
    Ok(Json(envelope(board)))
}

async fn board_show(
    State(state): State<ServiceState>,
    Path(board_id): Path<String>,
) -> Result<Json<ServiceEnvelope<BoardSnapshot>>, ServiceError> {
    let board_id = parse_board_id(&board_id)?;
    let snapshot = run_api(&state, "boards.show", move |api| api.board_show(board_id)).await?;
    Ok(Json(envelope(snapshot)))
}

async fn lists_add(
    State(state): State<ServiceState>,
    Path(board_id): Path<String>,
    Json(request): Json<AddListRequest>,
) -> Result<Json<ServiceEnvelope<ListRecord>>, ServiceError> {
    let board_id = parse_board_id(&board_id)?;
    let list = run_api(&state, "lists.add", move |api| api.add_list(board_id, request)).await?;
    Ok(Json(envelope(list)))
}

async fn cards_add(
    State(state): State<ServiceState>,
    Path(board_id): Path<String>,
    Json(request): Json<AddCardRequest>,
) -> Result<Json<ServiceEnvelope<CardRecord>>, ServiceError> {
    let board_id = parse_board_id(&board_id)?;
    let card = run_api(&state, "cards.add", move |api| api.add_card(board_id, request)).await?;
    Ok(Json(envelope(card)))
}

async fn board_recommendations(
    State(state): State<ServiceState>,
    Path(board_id): Path<String>,
    Query(query): Query<RecommendationsQuery>,
) -> Result<Json<ServiceEnvelope<RecommendationResult>>, ServiceError> {
    let board_id = parse_board_id(&board_id)?;
    let as_of = query
        .as_of
        .as_deref()
        .map(|raw| {
            OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
                .map_err(|err| ServiceError::validation(format!("invalid as_of `{raw}`: {err}")))
        })
        .transpose()?;

    let request = RecommendationsRequest { board_id, as_of };
    let result = run_api(&state, "boards.recommendations", move |api| api.recommendations(request)).await?;
    Ok(Json(envelope(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use axum::body::to_bytes;
    use http::Request;
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("board-recs-service-{}.sqlite3", ulid::Ulid::new()))
    }

    fn test_state(db_path: PathBuf) -> ServiceState {
        let api = match BoardRecsApi::with_default_config(db_path) {
            Ok(api) => api,
            Err(err) => panic!("default config should be valid: {err}"),
        };
        ServiceState { api, timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS) }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, payload: Option<serde_json::Value>) -> Response {
        let builder = Request::builder().uri(uri).method(method);
        let request = match payload {
            Some(payload) => builder
                .header("content-type", "application/json")
                .body(axum::body::Body::from(payload.to_string())),
            None => builder.body(axum::body::Body::empty()),
        }
        .unwrap_or_else(|err| panic!("failed to build request: {err}"));

        match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    fn data_str(value: &serde_json::Value, key: &str) -> String {
        value
            .get("data")
            .and_then(|data| data.get(key))
            .and_then(serde_json::Value::as_str)
            .unwrap_or_else(|| panic!("missing data.{key} in response: {value}"))
            .to_string()
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = app(test_state(unique_temp_db_path()));

        let response = send(&router, "GET", "/v1/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(value["data"]["status"], serde_json::json!("ok"));
    }

    #[tokio::test]
    async fn openapi_endpoint_returns_versioned_artifact() {
        let router = app(test_state(unique_temp_db_path()));

        let response = send(&router, "GET", "/v1/openapi", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("version: service.v1"));
        assert!(body.contains("/v1/boards/{board_id}/recommendations"));
    }

    #[tokio::test]
    async fn service_seed_and_recommend_flow_round_trip() {
        let db_path = unique_temp_db_path();
        let router = app(test_state(db_path.clone()));

        let board = response_json(
            send(&router, "POST", "/v1/boards", Some(serde_json::json!({"title": "Launch"}))).await,
        )
        .await;
        let board_id = data_str(&board, "board_id");

        let review = send(
            &router,
            "POST",
            &format!("/v1/boards/{board_id}/lists"),
            Some(serde_json::json!({"title": "Review", "position": 0})),
        )
        .await;
        assert_eq!(review.status(), StatusCode::OK);
        let review_id = data_str(&response_json(review).await, "list_id");

        for title in ["Fix urgent bug asap", "Fix urgent bug now"] {
            let card = send(
                &router,
                "POST",
                &format!("/v1/boards/{board_id}/cards"),
                Some(serde_json::json!({"list_id": review_id, "title": title})),
            )
            .await;
            assert_eq!(card.status(), StatusCode::OK);
        }
        let pr_card = send(
            &router,
            "POST",
            &format!("/v1/boards/{board_id}/cards"),
            Some(serde_json::json!({
                "list_id": review_id,
                "title": "Checkout flow",
                "description": "This PR is ready for code review"
            })),
        )
        .await;
        assert_eq!(pr_card.status(), StatusCode::OK);

        let response = send(
            &router,
            "GET",
            &format!("/v1/boards/{board_id}/recommendations?as_of=2024-03-10T09:15:00Z"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value["api_contract_version"], serde_json::json!(API_CONTRACT_VERSION));

        let data = &value["data"];
        let due = data["dueDateSuggestions"].as_array().cloned().unwrap_or_default();
        assert_eq!(due.len(), 3);
        assert_eq!(due[0]["suggestedDue"], serde_json::json!("2024-03-11T09:15:00Z"));

        let moves = data["moveSuggestions"].as_array().cloned().unwrap_or_default();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0]["suggestedListName"], serde_json::json!("Review"));
        assert_eq!(moves[0]["suggestedListId"], serde_json::json!(review_id));

        let groups = data["relatedGroups"].as_array().cloned().unwrap_or_default();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["cards"].as_array().map(Vec::len), Some(2));

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn unknown_board_maps_to_not_found() {
        let db_path = unique_temp_db_path();
        let router = app(test_state(db_path.clone()));

        let response = send(
            &router,
            "GET",
            &format!("/v1/boards/{}/recommendations", BoardId::new()),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let value = response_json(response).await;
        assert_eq!(value["kind"], serde_json::json!("not_found"));
        assert_eq!(value["service_contract_version"], serde_json::json!(SERVICE_CONTRACT_VERSION));

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn malformed_identifiers_and_timestamps_are_validation_errors() {
        let db_path = unique_temp_db_path();
        let router = app(test_state(db_path.clone()));

        let bad_id = send(&router, "GET", "/v1/boards/not-a-ulid/recommendations", None).await;
        assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response_json(bad_id).await["kind"], serde_json::json!("validation"));

        let bad_as_of = send(
            &router,
            "GET",
            &format!("/v1/boards/{}/recommendations?as_of=yesterday", BoardId::new()),
            None,
        )
        .await;
        assert_eq!(bad_as_of.status(), StatusCode::BAD_REQUEST);

        let blank_board = send(&router, "POST", "/v1/boards", Some(serde_json::json!({"title": "   "}))).await;
        assert_eq!(blank_board.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response_json(blank_board).await["kind"], serde_json::json!("validation"));

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn unreadable_database_maps_to_service_unavailable() {
        let dir = std::env::temp_dir().join(format!("board-recs-service-dir-{}", ulid::Ulid::new()));
        if let Err(err) = std::fs::create_dir_all(&dir) {
            panic!("failed to create temp dir: {err}");
        }
        let router = app(test_state(dir.clone()));

        let response = send(
            &router,
            "GET",
            &format!("/v1/boards/{}/recommendations", BoardId::new()),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response_json(response).await["kind"], serde_json::json!("data_unavailable"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn seeding_against_unreadable_database_is_service_unavailable() {
        let dir = std::env::temp_dir().join(format!("board-recs-service-seed-{}", ulid::Ulid::new()));
        if let Err(err) = std::fs::create_dir_all(&dir) {
            panic!("failed to create temp dir: {err}");
        }
        let router = app(test_state(dir.clone()));

        let board = send(&router, "POST", "/v1/boards", Some(serde_json::json!({"title": "Launch"}))).await;
        assert_eq!(board.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response_json(board).await["kind"], serde_json::json!("data_unavailable"));

        let schema = send(&router, "POST", "/v1/db/schema-version", None).await;
        assert_eq!(schema.status(), StatusCode::SERVICE_UNAVAILABLE);

        let snapshot = send(&router, "GET", &format!("/v1/boards/{}", BoardId::new()), None).await;
        assert_eq!(snapshot.status(), StatusCode::SERVICE_UNAVAILABLE);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unclassified_failures_are_server_errors() {
        let err = ServiceError::from_api(&anyhow::anyhow!("disk quota exceeded"));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.kind, "internal");

        let err = ServiceError::from_api(&EngineError::Validation("title".to_string()).into());
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn slow_calls_are_cut_off_by_the_timeout() {
        let mut state = test_state(unique_temp_db_path());
        state.timeout = Duration::from_millis(10);

        let outcome = run_api(&state, "test.sleep", |_| {
            std::thread::sleep(Duration::from_millis(250));
            Ok(())
        })
        .await;
        match outcome {
            Err(err) => {
                assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
                assert_eq!(err.kind, "timeout");
            }
            Ok(()) => panic!("sleeping call should time out"),
        }
    }

    #[tokio::test]
    async fn timed_out_calls_still_run_to_completion() {
        let mut state = test_state(unique_temp_db_path());
        state.timeout = Duration::from_millis(10);
        let finished = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&finished);
        let outcome = run_api(&state, "test.sleep", move |_| {
            std::thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn migrate_dry_run_reports_pending_versions() {
        let db_path = unique_temp_db_path();
        let router = app(test_state(db_path.clone()));

        let response =
            send(&router, "POST", "/v1/db/migrate", Some(serde_json::json!({"dry_run": true}))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value["data"]["would_apply_versions"], serde_json::json!([1]));
        assert_eq!(value["data"]["after_version"], serde_json::Value::Null);

        let _ = std::fs::remove_file(&db_path);
    }
}
