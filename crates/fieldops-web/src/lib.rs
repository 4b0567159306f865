//! Axum operator API and Askama review page for fieldops.

use std::collections::HashMap;
use std::sync::Arc;

use askama::Template;
use axum::{
    body::Bytes,
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use fieldops_core::{
    AssignmentHistory, CalendarImportLog, EventStatus, Job, JobType, PendingCalendarEvent,
};
use fieldops_storage::{
    AssignmentReceipt, AssignmentStore, BuilderDirectory, EventFilter, EventStore, StoreError,
};
use fieldops_sync::{AssignmentError, AssignmentOutcome, FieldOps, ReviewError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fieldops-web";

const DEFAULT_PER_PAGE: usize = 20;
const MAX_PER_PAGE: usize = 100;
const DEFAULT_LOG_LIMIT: usize = 50;
const DEFAULT_ACTOR: &str = "operator";

#[derive(Clone)]
pub struct AppState {
    pub ops: FieldOps,
}

impl AppState {
    pub fn new(ops: FieldOps) -> Self {
        Self { ops }
    }
}

/// JSON error body: `{ "error": kind, "message": text }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_input", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": self.kind,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::not_found(err.to_string()),
            StoreError::Conflict(_) | StoreError::DuplicateExternalId(_) => {
                Self::new(StatusCode::CONFLICT, "conflict", err.to_string())
            }
            other => {
                error!(error = %other, "store failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", other.to_string())
            }
        }
    }
}

impl From<ReviewError> for ApiError {
    fn from(err: ReviewError) -> Self {
        match err {
            ReviewError::NotFound(_) => Self::not_found(err.to_string()),
            ReviewError::InvalidState { .. } => {
                Self::new(StatusCode::CONFLICT, "invalid_state", err.to_string())
            }
            ReviewError::UnknownBuilder(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "unknown_builder",
                err.to_string(),
            ),
            ReviewError::Store(inner) => inner.into(),
        }
    }
}

impl From<AssignmentError> for ApiError {
    fn from(err: AssignmentError) -> Self {
        match err {
            AssignmentError::JobNotFound(_) => Self::not_found(err.to_string()),
            AssignmentError::InspectorNotFound(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "unknown_inspector",
                err.to_string(),
            ),
            AssignmentError::AlreadyAssigned { .. } => {
                Self::new(StatusCode::CONFLICT, "already_assigned", err.to_string())
            }
            AssignmentError::NotAssigned(_) => {
                Self::new(StatusCode::CONFLICT, "not_assigned", err.to_string())
            }
            AssignmentError::Store(inner) => inner.into(),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewQueueQuery {
    status: Option<String>,
    min_confidence: Option<u8>,
    max_confidence: Option<u8>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    page: Option<usize>,
    per_page: Option<usize>,
}

impl ReviewQueueQuery {
    /// Status defaults to `pending`; `all` drops the status filter.
    fn to_filter(&self) -> Result<(EventFilter, usize, usize), ApiError> {
        let status = match self.status.as_deref() {
            None | Some("") => Some(EventStatus::Pending),
            Some("all") => None,
            Some(raw) => Some(raw.parse::<EventStatus>().map_err(ApiError::unprocessable)?),
        };
        if let (Some(min), Some(max)) = (self.min_confidence, self.max_confidence) {
            if min > max {
                return Err(ApiError::unprocessable(format!(
                    "minConfidence {min} is greater than maxConfidence {max}"
                )));
            }
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(ApiError::unprocessable("start is after end"));
            }
        }
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let page = self.page.unwrap_or(1).max(1);
        let filter = EventFilter {
            status,
            min_confidence: self.min_confidence,
            max_confidence: self.max_confidence,
            start: self.start,
            end: self.end,
            offset: (page - 1) * per_page,
            limit: per_page,
        };
        Ok((filter, page, per_page))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewQueuePage {
    items: Vec<PendingCalendarEvent>,
    total: usize,
    page: usize,
    per_page: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveRequest {
    builder_id: Uuid,
    job_type: Option<String>,
    reviewer: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectRequest {
    reason: String,
    reviewer: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignRequest {
    inspector_id: Uuid,
    assigned_by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UnassignRequest {
    by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportLogQuery {
    calendar_id: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentView {
    assigned: bool,
    inspector_id: Option<Uuid>,
    score: Option<f64>,
    reason: Option<String>,
}

impl From<&AssignmentOutcome> for AssignmentView {
    fn from(outcome: &AssignmentOutcome) -> Self {
        match outcome {
            AssignmentOutcome::Assigned { candidate, .. } => Self {
                assigned: true,
                inspector_id: Some(candidate.inspector_id),
                score: Some(candidate.score),
                reason: None,
            },
            AssignmentOutcome::Unassignable { reason, .. } => Self {
                assigned: false,
                inspector_id: None,
                score: None,
                reason: Some(reason.clone()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ApprovalResponse {
    event: PendingCalendarEvent,
    job: Job,
    assignment: AssignmentView,
}

#[derive(Debug, Serialize)]
struct ReceiptResponse {
    job: Job,
    history: AssignmentHistory,
}

impl From<AssignmentReceipt> for ReceiptResponse {
    fn from(receipt: AssignmentReceipt) -> Self {
        Self {
            job: receipt.job,
            history: receipt.history,
        }
    }
}

#[derive(Debug, Clone)]
struct ReviewRow {
    id: String,
    title: String,
    start: String,
    confidence: u8,
    builder: String,
    job_type: String,
    urgency: String,
}

#[derive(Template)]
#[template(path = "review.html")]
struct ReviewTemplate {
    rows: Vec<ReviewRow>,
    total: usize,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/review", get(review_page_handler))
        .route("/review-queue", get(review_queue_handler))
        .route("/review-queue/{id}", get(review_event_handler))
        .route("/review-queue/{id}/approve", post(approve_handler))
        .route("/review-queue/{id}/reject", post(reject_handler))
        .route("/jobs/unassigned", get(unassigned_jobs_handler))
        .route("/jobs/{id}/assign", post(assign_handler))
        .route("/jobs/{id}/unassign", post(unassign_handler))
        .route("/jobs/{id}/history", get(job_history_handler))
        .route("/import-logs", get(import_logs_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(ops: FieldOps) -> anyhow::Result<()> {
    let port = ops.config.web_port;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "operator api listening");
    axum::serve(listener, app(AppState::new(ops))).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(FieldOps::from_env().await?).await
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn review_page_handler(State(state): State<Arc<AppState>>) -> Response {
    match load_review_rows(&state).await {
        Ok((rows, total)) => render_html(ReviewTemplate { rows, total }),
        Err(err) => err.into_response(),
    }
}

async fn load_review_rows(state: &AppState) -> Result<(Vec<ReviewRow>, usize), ApiError> {
    let filter = EventFilter {
        status: Some(EventStatus::Pending),
        limit: MAX_PER_PAGE,
        ..EventFilter::default()
    };
    let page = state.ops.review.list(&filter).await?;
    let builders = state
        .ops
        .store
        .list_builders()
        .await?
        .into_iter()
        .map(|b| (b.id, b.name))
        .collect::<HashMap<_, _>>();
    let rows = page
        .items
        .into_iter()
        .map(|event| ReviewRow {
            id: event.id.to_string(),
            builder: event
                .builder_match
                .builder_id
                .and_then(|id| builders.get(&id).cloned())
                .or_else(|| event.parsed.builder_guess.clone())
                .unwrap_or_else(|| "unknown".into()),
            job_type: event
                .parsed
                .job_type
                .as_ref()
                .map(|guess| guess.job_type.label().to_string())
                .unwrap_or_else(|| "unknown".into()),
            urgency: event.parsed.urgency.as_str().to_string(),
            start: event.start_at.format("%Y-%m-%d %H:%M").to_string(),
            confidence: event.confidence,
            title: event.title,
        })
        .collect();
    Ok((rows, page.total))
}

async fn review_queue_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReviewQueueQuery>,
) -> ApiResult<ReviewQueuePage> {
    let (filter, page, per_page) = query.to_filter()?;
    let result = state.ops.review.list(&filter).await?;
    Ok(Json(ReviewQueuePage {
        items: result.items,
        total: result.total,
        page,
        per_page,
    }))
}

async fn review_event_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> ApiResult<PendingCalendarEvent> {
    Ok(Json(state.ops.review.get(id).await?))
}

async fn approve_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
    Json(body): Json<ApproveRequest>,
) -> ApiResult<ApprovalResponse> {
    let job_type = match body.job_type.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<JobType>()
                .map_err(|err| ApiError::unprocessable(err.to_string()))?,
        ),
    };
    let reviewer = body.reviewer.as_deref().unwrap_or(DEFAULT_ACTOR);
    let outcome = state
        .ops
        .review
        .approve(id, body.builder_id, job_type, reviewer, Utc::now())
        .await?;
    Ok(Json(ApprovalResponse {
        assignment: AssignmentView::from(&outcome.assignment),
        event: outcome.event,
        job: outcome.job,
    }))
}

async fn reject_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
    Json(body): Json<RejectRequest>,
) -> ApiResult<PendingCalendarEvent> {
    if body.reason.trim().is_empty() {
        return Err(ApiError::unprocessable("reason must not be empty"));
    }
    let reviewer = body.reviewer.as_deref().unwrap_or(DEFAULT_ACTOR);
    let event = state
        .ops
        .review
        .reject(id, body.reason.trim(), reviewer, Utc::now())
        .await?;
    Ok(Json(event))
}

async fn unassigned_jobs_handler(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Job>> {
    Ok(Json(state.ops.store.list_unassigned_jobs().await?))
}

async fn assign_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
    Json(body): Json<AssignRequest>,
) -> ApiResult<ReceiptResponse> {
    let by = body.assigned_by.as_deref().unwrap_or(DEFAULT_ACTOR);
    let receipt = state
        .ops
        .engine
        .assign_manually(id, body.inspector_id, by, Utc::now())
        .await?;
    Ok(Json(receipt.into()))
}

async fn unassign_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
    body: Bytes,
) -> ApiResult<ReceiptResponse> {
    let body: UnassignRequest = if body.is_empty() {
        UnassignRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| ApiError::unprocessable(err.to_string()))?
    };
    let by = body.by.as_deref().unwrap_or(DEFAULT_ACTOR);
    let receipt = state.ops.engine.unassign(id, by, Utc::now()).await?;
    Ok(Json(receipt.into()))
}

async fn job_history_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> ApiResult<Vec<AssignmentHistory>> {
    if state.ops.store.get_job(id).await?.is_none() {
        return Err(ApiError::not_found(format!("job {id} not found")));
    }
    Ok(Json(state.ops.store.job_history(id).await?))
}

async fn import_logs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImportLogQuery>,
) -> ApiResult<Vec<CalendarImportLog>> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_PER_PAGE);
    let logs = state
        .ops
        .store
        .list_import_logs(query.calendar_id.as_deref(), limit)
        .await?;
    Ok(Json(logs))
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            err.to_string(),
        )
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    use axum::body::Body;
    use chrono::Duration;
    use fieldops_adapters::{EventBatch, StaticEventSource};
    use fieldops_core::{
        Builder, BuilderMatch, InspectorPreferences, NewPendingEvent, ParsedCandidate,
        RawCalendarEvent,
    };
    use fieldops_storage::{InitialRoute, MemoryStore, SeedData};
    use fieldops_sync::{AppConfig, CalendarSourceKind, PipelineConfig};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BUILDER: u128 = 7;
    const INSPECTOR: u128 = 100;

    fn workspace_file(rel: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..").join(rel)
    }

    fn config(temp: &Path) -> AppConfig {
        AppConfig {
            database_url: None,
            seed_path: workspace_file("seed/dev.yaml"),
            pipeline_config_path: workspace_file("config/pipeline.yaml"),
            calendar_source: CalendarSourceKind::Fixture,
            fixtures_dir: workspace_file("fixtures/calendars"),
            calendar_url: None,
            calendar_token: None,
            reports_dir: temp.join("reports"),
            archive_dir: temp.join("archive"),
            scheduler_enabled: false,
            import_cron: "*/30 * * * *".into(),
            calendars: vec!["ops-main".into()],
            web_port: 0,
            http_timeout_secs: 5,
            user_agent: "fieldops-test".into(),
        }
    }

    fn seed() -> SeedData {
        SeedData {
            builders: vec![Builder {
                id: Uuid::from_u128(BUILDER),
                name: "Pulte Group".into(),
                territory: Some("Raleigh".into()),
                total_jobs: 3,
            }],
            inspectors: vec![InspectorPreferences {
                inspector_id: Uuid::from_u128(INSPECTOR),
                display_name: "Sam".into(),
                preferred_territories: vec!["Raleigh".into()],
                max_daily_jobs: None,
                max_weekly_jobs: None,
                working_days: vec![],
                specializations: vec![],
                travel_radius_km: None,
                home_base: None,
                auto_assign_enabled: true,
                created_at: Utc::now(),
            }],
            ..SeedData::default()
        }
    }

    struct Harness {
        app: Router,
        store: Arc<MemoryStore>,
        pending: Uuid,
        _temp: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let temp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::seeded(seed()));
        let start = Utc::now() + Duration::days(2);
        let inserted = store
            .insert_event(
                NewPendingEvent {
                    raw: RawCalendarEvent {
                        external_id: "evt-1002".into(),
                        calendar_id: "ops-main".into(),
                        title: "Pulte | Final | ASAP".into(),
                        description: String::new(),
                        location: "88 Oak St, Raleigh NC".into(),
                        start_at: start,
                        end_at: start + Duration::hours(1),
                    },
                    parsed: ParsedCandidate::default(),
                    builder_match: BuilderMatch::none(),
                    confidence: 62,
                },
                InitialRoute::Pending,
                Utc::now(),
            )
            .await
            .unwrap();
        let source = StaticEventSource::new(EventBatch {
            calendar_id: "ops-main".into(),
            calendar_name: Some("Ops".into()),
            events: vec![],
            partial_error: None,
        });
        let ops = FieldOps::assemble(
            config(temp.path()),
            PipelineConfig::default(),
            store.clone(),
            Arc::new(source),
        );
        Harness {
            app: app(AppState::new(ops)),
            store,
            pending: inserted.event.id,
            _temp: temp,
        }
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn handler_smoke_healthz_and_review_page() {
        let h = harness().await;
        let (status, body) = send(&h.app, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let resp = h
            .app
            .clone()
            .oneshot(axum::http::Request::builder().uri("/review").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("Review Queue"));
        assert!(text.contains("Pulte | Final | ASAP"));
    }

    #[tokio::test]
    async fn review_queue_lists_and_filters() {
        let h = harness().await;
        let (status, body) = send(&h.app, "GET", "/review-queue", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["perPage"], 20);
        assert_eq!(body["items"][0]["external_id"], "evt-1002");

        let (_, body) = send(&h.app, "GET", "/review-queue?minConfidence=80", None).await;
        assert_eq!(body["total"], 0);

        let (status, body) = send(&h.app, "GET", "/review-queue?status=bogus", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "invalid_input");

        let (status, _) = send(
            &h.app,
            "GET",
            "/review-queue?minConfidence=90&maxConfidence=10",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn approve_creates_job_and_second_approve_conflicts() {
        let h = harness().await;
        let uri = format!("/review-queue/{}/approve", h.pending);
        let body = serde_json::json!({
            "builderId": Uuid::from_u128(BUILDER),
            "jobType": "final",
            "reviewer": "dana",
        });
        let (status, resp) = send(&h.app, "POST", &uri, Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["job"]["job_type"], "final");
        assert_eq!(resp["assignment"]["assigned"], true);
        assert_eq!(h.store.job_count().await, 1);

        let (status, resp) = send(&h.app, "POST", &uri, Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(resp["error"], "invalid_state");
        assert_eq!(h.store.job_count().await, 1);

        let job_id = h.store.get_event(h.pending).await.unwrap().unwrap().state.job_id().unwrap();
        let (status, history) = send(&h.app, "GET", &format!("/jobs/{job_id}/history"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn approve_maps_bad_input_and_missing_ids() {
        let h = harness().await;
        let uri = format!("/review-queue/{}/approve", h.pending);
        let (status, resp) = send(
            &h.app,
            "POST",
            &uri,
            Some(serde_json::json!({ "builderId": Uuid::from_u128(404) })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(resp["error"], "unknown_builder");

        let (status, _) = send(
            &h.app,
            "POST",
            &uri,
            Some(serde_json::json!({ "builderId": Uuid::from_u128(BUILDER), "jobType": "roofing" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let missing = format!("/review-queue/{}", Uuid::from_u128(999));
        let (status, resp) = send(&h.app, "GET", &missing, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(resp["error"], "not_found");
        assert_eq!(h.store.job_count().await, 0);
    }

    #[tokio::test]
    async fn reject_then_approve_is_invalid_state() {
        let h = harness().await;
        let (status, resp) = send(
            &h.app,
            "POST",
            &format!("/review-queue/{}/reject", h.pending),
            Some(serde_json::json!({ "reason": "duplicate booking" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["state"]["status"], "rejected");

        let (status, _) = send(
            &h.app,
            "POST",
            &format!("/review-queue/{}/approve", h.pending),
            Some(serde_json::json!({ "builderId": Uuid::from_u128(BUILDER) })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(h.store.job_count().await, 0);
    }

    #[tokio::test]
    async fn manual_assign_and_unassign_round_trip() {
        let h = harness().await;
        let (_, approved) = send(
            &h.app,
            "POST",
            &format!("/review-queue/{}/approve", h.pending),
            Some(serde_json::json!({ "builderId": Uuid::from_u128(BUILDER), "jobType": "final" })),
        )
        .await;
        let job_id = approved["job"]["id"].as_str().unwrap().to_string();

        let (status, resp) = send(&h.app, "POST", &format!("/jobs/{job_id}/unassign"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["history"]["action"], "unassigned");

        let (_, unassigned) = send(&h.app, "GET", "/jobs/unassigned", None).await;
        assert_eq!(unassigned.as_array().map(Vec::len), Some(1));

        let (status, _) = send(&h.app, "POST", &format!("/jobs/{job_id}/unassign"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, resp) = send(
            &h.app,
            "POST",
            &format!("/jobs/{job_id}/assign"),
            Some(serde_json::json!({ "inspectorId": Uuid::from_u128(INSPECTOR), "assignedBy": "kim" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["history"]["assigned_by"], "kim");

        let (status, resp) = send(
            &h.app,
            "POST",
            &format!("/jobs/{job_id}/assign"),
            Some(serde_json::json!({ "inspectorId": Uuid::from_u128(5) })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(resp["error"], "unknown_inspector");

        let (_, history) = send(&h.app, "GET", &format!("/jobs/{job_id}/history"), None).await;
        assert_eq!(history.as_array().map(Vec::len), Some(3));

        let (status, _) = send(
            &h.app,
            "GET",
            &format!("/jobs/{}/history", Uuid::from_u128(1)),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn import_logs_reflect_pipeline_runs() {
        let h = harness().await;
        let (_, logs) = send(&h.app, "GET", "/import-logs", None).await;
        assert_eq!(logs.as_array().map(Vec::len), Some(0));

        h.store
            .append_import_log(&CalendarImportLog {
                id: Uuid::from_u128(1),
                run_id: Uuid::from_u128(2),
                calendar_id: "ops-main".into(),
                calendar_name: None,
                run_at: Utc::now(),
                counters: Default::default(),
                error: Some("connection refused".into()),
            })
            .await
            .unwrap();
        let (status, logs) = send(&h.app, "GET", "/import-logs?calendarId=ops-main&limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(logs[0]["error"], "connection refused");

        let (_, logs) = send(&h.app, "GET", "/import-logs?calendarId=other", None).await;
        assert_eq!(logs.as_array().map(Vec::len), Some(0));
    }
}
