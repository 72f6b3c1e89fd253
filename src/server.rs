//! JSON HTTP admin API.
//!
//! Exposes classification, listing ingestion, the review queue and conflict
//! handling over HTTP for the admin dashboard and scraper jobs.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version and rule table) |
//! | `POST` | `/classify` | Classify one product name |
//! | `POST` | `/listings` | Ingest one listing or an array of listings |
//! | `GET`  | `/discovery` | Review queue (`?limit=`, `?all=true`) |
//! | `POST` | `/discovery/approve` | Approve or reject one item |
//! | `PUT`  | `/discovery/approve` | Bulk approve or reject |
//! | `GET`  | `/conflicts` | List conflicts (`?status=`) |
//! | `POST` | `/conflicts` | `{"action": "detect" \| "resolve_all"}` |
//! | `POST` | `/conflicts/{id}/resolve` | Automatic resolution of one conflict |
//! | `POST` | `/conflicts/{id}/manual` | Admin price override |
//! | `GET`  | `/stats` | Aggregate statistics |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "discovery_id is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use basarometer_core::classifier::CacheStats;
use basarometer_core::conflict::{self, ConflictPolicy, ResolveOutcome, SweepSummary};
use basarometer_core::learning::{self, ApprovalDecision, ApprovalOutcome, BulkApprovalSummary};
use basarometer_core::models::{ClassificationResult, Conflict, DiscoveryQueueItem, Listing};
use basarometer_core::pipeline::{IngestOutcome, Pipeline};
use basarometer_core::store::{ConflictFilter, Store};
use basarometer_core::Error;

use crate::catalog;
use crate::config::Config;
use crate::ingest::IngestSummary;
use crate::sqlite_store::SqliteStore;
use crate::stats::{self, Stats};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<SqliteStore>,
    /// The classifier cache and learned rules live here; one request at a
    /// time may classify.
    pipeline: Arc<Mutex<Pipeline>>,
}

impl AppState {
    pub fn new(config: Config, store: SqliteStore, pipeline: Pipeline) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            pipeline: Arc::new(Mutex::new(pipeline)),
        }
    }

    fn policy(&self) -> ConflictPolicy {
        self.config.conflict_policy()
    }
}

/// Build the router. Split out from [`run_server`] so tests can drive it
/// without binding a socket.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/classify", post(handle_classify))
        .route("/listings", post(handle_listings))
        .route("/discovery", get(handle_discovery))
        .route(
            "/discovery/approve",
            post(handle_approve).put(handle_bulk_approve),
        )
        .route("/conflicts", get(handle_list_conflicts).post(handle_conflict_action))
        .route("/conflicts/{id}/resolve", post(handle_resolve))
        .route("/conflicts/{id}/manual", post(handle_manual))
        .route("/stats", get(handle_stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the admin server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let store = catalog::open_store(config).await?;
    let pipeline = catalog::load_pipeline(config, &store).await;
    let app = router(AppState::new(config.clone(), store, pipeline));

    info!(bind = %bind_addr, "admin server listening");
    println!("Admin server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn internal(err: anyhow::Error) -> AppError {
    error!("request failed: {:#}", err);
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput(m) => bad_request(m),
            Error::NotFound(m) => app_error(StatusCode::NOT_FOUND, "not_found", m),
            e @ Error::AlreadyReviewed(_) => {
                app_error(StatusCode::CONFLICT, "conflict", e.to_string())
            }
            Error::Storage(e) => internal(e),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        internal(err)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    classifier: CacheStats,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let classifier = state.pipeline.lock().await.classifier().cache_stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        classifier,
    })
}

// ============ POST /classify ============

#[derive(Deserialize)]
struct ClassifyRequest {
    name: String,
    #[serde(default)]
    category: Option<String>,
}

async fn handle_classify(
    State(state): State<AppState>,
    Json(req): Json<ClassifyRequest>,
) -> Result<Json<ClassificationResult>, AppError> {
    if req.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    let mut pipeline = state.pipeline.lock().await;
    let result = pipeline
        .classifier_mut()
        .classify(&req.name, req.category.as_deref());
    Ok(Json(result))
}

// ============ POST /listings ============

#[derive(Deserialize)]
#[serde(untagged)]
enum ListingsRequest {
    Many(Vec<Listing>),
    One(Box<Listing>),
}

#[derive(Serialize)]
#[serde(untagged)]
enum ListingResult {
    Done(IngestOutcome),
    Failed { outcome: &'static str, error: String },
}

#[derive(Serialize)]
struct ListingsResponse {
    summary: IngestSummary,
    results: Vec<ListingResult>,
}

async fn handle_listings(
    State(state): State<AppState>,
    Json(req): Json<ListingsRequest>,
) -> Result<Json<ListingsResponse>, AppError> {
    let mut pipeline = state.pipeline.lock().await;

    let listings = match req {
        ListingsRequest::One(listing) => {
            let outcome = pipeline.ingest(state.store.as_ref(), &listing).await?;
            let mut summary = IngestSummary {
                read: 1,
                ..Default::default()
            };
            summary.record(&outcome);
            return Ok(Json(ListingsResponse {
                summary,
                results: vec![ListingResult::Done(outcome)],
            }));
        }
        ListingsRequest::Many(listings) => listings,
    };

    if listings.is_empty() {
        return Err(bad_request("listings must not be empty"));
    }
    let response = ingest_listings(&mut pipeline, state.store.as_ref(), &listings).await;
    Ok(Json(response))
}

/// Run a batch through the pipeline. Every failure, storage included, is
/// counted against its listing and the batch continues.
async fn ingest_listings(
    pipeline: &mut Pipeline,
    store: &dyn Store,
    listings: &[Listing],
) -> ListingsResponse {
    let mut summary = IngestSummary::default();
    let mut results = Vec::with_capacity(listings.len());
    for listing in listings {
        summary.read += 1;
        match pipeline.ingest(store, listing).await {
            Ok(outcome) => {
                summary.record(&outcome);
                results.push(ListingResult::Done(outcome));
            }
            Err(e) => {
                if let Error::Storage(inner) = &e {
                    error!(name = %listing.name, "listing not stored: {:#}", inner);
                }
                summary.failed += 1;
                results.push(ListingResult::Failed {
                    outcome: "failed",
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        read = summary.read,
        observed = summary.observed,
        queued = summary.queued,
        rejected = summary.rejected,
        failed = summary.failed,
        "listings ingested over http"
    );
    ListingsResponse { summary, results }
}

// ============ GET /discovery ============

#[derive(Deserialize)]
struct DiscoveryQuery {
    #[serde(default)]
    limit: Option<i64>,
    /// Include reviewed items.
    #[serde(default)]
    all: bool,
}

#[derive(Serialize)]
struct DiscoveryResponse {
    items: Vec<DiscoveryQueueItem>,
}

async fn handle_discovery(
    State(state): State<AppState>,
    Query(q): Query<DiscoveryQuery>,
) -> Result<Json<DiscoveryResponse>, AppError> {
    if matches!(q.limit, Some(l) if l <= 0) {
        return Err(bad_request("limit must be positive"));
    }
    let items = state.store.list_discovery(!q.all, q.limit).await?;
    Ok(Json(DiscoveryResponse { items }))
}

// ============ POST|PUT /discovery/approve ============

async fn handle_approve(
    State(state): State<AppState>,
    Json(decision): Json<ApprovalDecision>,
) -> Result<Json<ApprovalOutcome>, AppError> {
    let outcome = learning::approve(
        state.store.as_ref(),
        &decision,
        &state.config.learning_policy(),
    )
    .await?;

    if let Some(rule) = &outcome.rule {
        state
            .pipeline
            .lock()
            .await
            .classifier_mut()
            .apply_learned_rule(rule.clone());
    }
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct BulkApproveRequest {
    discovery_ids: Vec<String>,
    approved: bool,
}

async fn handle_bulk_approve(
    State(state): State<AppState>,
    Json(req): Json<BulkApproveRequest>,
) -> Result<Json<BulkApprovalSummary>, AppError> {
    let summary =
        learning::bulk_approve(state.store.as_ref(), &req.discovery_ids, req.approved).await?;

    if summary.mappings_created > 0 {
        match state.store.active_rules().await {
            Ok(rules) => state
                .pipeline
                .lock()
                .await
                .classifier_mut()
                .reload_learned_rules(rules),
            Err(e) => error!("approvals stored but learned rules not reloaded: {:#}", e),
        }
    }
    Ok(Json(summary))
}

// ============ /conflicts ============

#[derive(Deserialize)]
struct ConflictsQuery {
    #[serde(default = "default_status")]
    status: String,
}

fn default_status() -> String {
    "unresolved".to_string()
}

#[derive(Serialize)]
struct ConflictsResponse {
    conflicts: Vec<Conflict>,
}

async fn handle_list_conflicts(
    State(state): State<AppState>,
    Query(q): Query<ConflictsQuery>,
) -> Result<Json<ConflictsResponse>, AppError> {
    let filter = ConflictFilter::parse(&q.status)
        .ok_or_else(|| bad_request(format!("unknown status: {}", q.status)))?;
    let conflicts = state.store.list_conflicts(filter).await?;
    Ok(Json(ConflictsResponse { conflicts }))
}

#[derive(Deserialize)]
struct ConflictActionRequest {
    action: String,
}

#[derive(Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ConflictActionResponse {
    Detect { created: Vec<Conflict> },
    ResolveAll(SweepSummary),
}

async fn handle_conflict_action(
    State(state): State<AppState>,
    Json(req): Json<ConflictActionRequest>,
) -> Result<Json<ConflictActionResponse>, AppError> {
    let store = state.store.as_ref();
    match req.action.as_str() {
        "detect" => {
            let created = conflict::detect_conflicts(store, &state.policy()).await?;
            Ok(Json(ConflictActionResponse::Detect { created }))
        }
        "resolve_all" => {
            let summary = conflict::sweep(store, &state.policy()).await?;
            Ok(Json(ConflictActionResponse::ResolveAll(summary)))
        }
        other => Err(bad_request(format!(
            "unknown action '{}', expected detect or resolve_all",
            other
        ))),
    }
}

async fn handle_resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResolveOutcome>, AppError> {
    let outcome = conflict::auto_resolve(state.store.as_ref(), &id, &state.policy()).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct ManualResolveRequest {
    resolved_price: f64,
    notes: String,
}

async fn handle_manual(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ManualResolveRequest>,
) -> Result<Json<ResolveOutcome>, AppError> {
    let outcome = conflict::resolve_manually(
        state.store.as_ref(),
        &id,
        req.resolved_price,
        Some(req.notes.as_str()).filter(|n| !n.trim().is_empty()),
    )
    .await?;
    Ok(Json(outcome))
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<Stats>, AppError> {
    Ok(Json(stats::collect(&state.store).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_map_to_status_codes() {
        let cases = [
            (Error::invalid("x"), StatusCode::BAD_REQUEST, "bad_request"),
            (Error::not_found("x"), StatusCode::NOT_FOUND, "not_found"),
            (
                Error::AlreadyReviewed("d1".to_string()),
                StatusCode::CONFLICT,
                "conflict",
            ),
            (
                Error::Storage(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
            ),
        ];
        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status, status);
            assert_eq!(app.code, code);
        }
    }

    #[test]
    fn test_listings_body_accepts_object_or_array() {
        let one: ListingsRequest =
            serde_json::from_str(r#"{"name": "פילה", "price": 150, "source": "x"}"#).unwrap();
        assert!(matches!(one, ListingsRequest::One(_)));
        let many: ListingsRequest =
            serde_json::from_str(r#"[{"name": "פילה", "price": 150, "source": "x"}]"#).unwrap();
        assert!(matches!(many, ListingsRequest::Many(v) if v.len() == 1));
    }

    #[test]
    fn test_manual_resolution_requires_notes() {
        let req: ManualResolveRequest =
            serde_json::from_str(r#"{"resolved_price": 150.0, "notes": "shelf check"}"#).unwrap();
        assert_eq!(req.notes, "shelf check");
        assert!(serde_json::from_str::<ManualResolveRequest>(r#"{"resolved_price": 150.0}"#).is_err());
    }

    #[tokio::test]
    async fn test_batch_storage_failure_is_counted_not_fatal() {
        use basarometer_core::classifier::Classifier;
        use basarometer_core::pipeline::PipelineSettings;
        use basarometer_core::rules::RuleTable;
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("test.sqlite"))
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        let store = SqliteStore::new(pool);
        let table = RuleTable::seed();
        catalog::seed_catalog(&store, &table).await.unwrap();
        // Queued listings now fail to store; observations still land.
        sqlx::query("DROP TABLE discovery_queue")
            .execute(store.pool())
            .await
            .unwrap();

        let listings: Vec<Listing> = serde_json::from_str(
            r#"[
                {"name": "מארז מיוחד לחג", "price": 99.0, "vendor": "shufersal", "source": "scanner"},
                {"name": "אנטריקוט בקר טרי", "price": 130.0, "unit": "ק\"ג", "vendor": "rami-levy", "source": "scanner"},
                {"name": "חלב 3%", "price": 6.5, "vendor": "shufersal", "source": "scanner"}
            ]"#,
        )
        .unwrap();
        let mut pipeline = Pipeline::new(Classifier::new(table), PipelineSettings::default());

        let response = ingest_listings(&mut pipeline, &store, &listings).await;
        assert_eq!(response.summary.read, 3);
        assert_eq!(response.summary.failed, 1);
        assert_eq!(response.summary.observed, 1);
        assert_eq!(response.summary.rejected, 1);
        assert!(matches!(response.results[0], ListingResult::Failed { .. }));
        assert_eq!(response.results.len(), 3);
        assert_eq!(store.active_observations().await.unwrap().len(), 1);
    }
}
