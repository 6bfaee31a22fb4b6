//! REST API handlers.
//!
//! Each handler resolves its registry through the directory and forwards a
//! single operation to it.

use std::future::Future;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use promvault_core::{LabelSet, MetricKind};
use promvault_registry::{RegistryError, RegistryHandle};
use serde::Deserialize;
use tracing::debug;

use crate::{ApiState, DEFAULT_REGISTRY};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn registry_error(e: &RegistryError) -> axum::response::Response {
    let status = match e {
        RegistryError::Metrics(_) => StatusCode::BAD_REQUEST,
        RegistryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(&e.to_string(), status).into_response()
}

/// Run `op` against the current instance of `registry`. An instance can
/// stop for idleness between lookup and use; one fresh lookup covers that.
async fn with_registry<T, F, Fut>(state: &ApiState, registry: &str, op: F) -> Result<T, RegistryError>
where
    F: Fn(RegistryHandle) -> Fut,
    Fut: Future<Output = Result<T, RegistryError>>,
{
    let handle = state.directory.get_or_activate(registry).await;
    match op(handle).await {
        Err(RegistryError::Unavailable(_)) => {
            debug!(%registry, "registry stopped before use; reactivating");
            op(state.directory.get_or_activate(registry).await).await
        }
        other => other,
    }
}

async fn exposition(state: &ApiState, registry: &str) -> axum::response::Response {
    match with_registry(state, registry, |handle| async move { handle.metrics().await }).await {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", PROMETHEUS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => registry_error(&e),
    }
}

async fn clear(state: &ApiState, registry: &str) -> axum::response::Response {
    match with_registry(state, registry, |handle| async move { handle.clear().await }).await {
        Ok(()) => ApiResponse::ok("cleared").into_response(),
        Err(e) => registry_error(&e),
    }
}

// ── Default registry ───────────────────────────────────────────

/// GET /metrics
pub async fn default_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    exposition(&state, DEFAULT_REGISTRY).await
}

/// POST /flush
pub async fn flush_default(State(state): State<ApiState>) -> impl IntoResponse {
    clear(&state, DEFAULT_REGISTRY).await
}

// ── Named registries ───────────────────────────────────────────

/// GET /api/v1/registries
pub async fn list_registries(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.directory.names().await)
}

/// GET /api/v1/registries/:registry/metrics
pub async fn registry_metrics(
    State(state): State<ApiState>,
    Path(registry): Path<String>,
) -> impl IntoResponse {
    exposition(&state, &registry).await
}

/// POST /api/v1/registries/:registry/clear
pub async fn clear_registry(
    State(state): State<ApiState>,
    Path(registry): Path<String>,
) -> impl IntoResponse {
    clear(&state, &registry).await
}

/// Operation named in a record request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOp {
    Inc,
    Add,
    Dec,
    Sub,
    Observe,
    Reset,
    ResetAll,
}

/// Body of `POST /api/v1/registries/:registry/record`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordRequest {
    pub kind: MetricKind,
    pub name: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub buckets: Option<Vec<f64>>,
    pub op: RecordOp,
    #[serde(default, alias = "value")]
    pub amount: Option<f64>,
    #[serde(default)]
    pub labels: LabelSet,
}

/// POST /api/v1/registries/:registry/record
pub async fn record(
    State(state): State<ApiState>,
    Path(registry): Path<String>,
    Json(req): Json<RecordRequest>,
) -> impl IntoResponse {
    debug!(%registry, name = %req.name, kind = %req.kind, op = ?req.op, "record");
    let outcome = match validate(&req) {
        Ok(()) => {
            with_registry(&state, &registry, |handle| {
                let req = req.clone();
                async move { apply_record(&handle, req).await }
            })
            .await
        }
        Err(msg) => return error_response(&msg, StatusCode::BAD_REQUEST).into_response(),
    };
    match outcome {
        Ok(()) => ApiResponse::ok("recorded").into_response(),
        Err(e) => registry_error(&e),
    }
}

/// Reject requests whose operation or arguments do not fit the metric kind.
fn validate(req: &RecordRequest) -> Result<(), String> {
    let allowed = match req.kind {
        MetricKind::Counter => matches!(
            req.op,
            RecordOp::Inc | RecordOp::Add | RecordOp::Reset | RecordOp::ResetAll
        ),
        MetricKind::Gauge => !matches!(req.op, RecordOp::Observe),
        MetricKind::Histogram => matches!(
            req.op,
            RecordOp::Observe | RecordOp::Reset | RecordOp::ResetAll
        ),
    };
    if !allowed {
        return Err(format!("{:?} is not supported on a {}", req.op, req.kind));
    }
    if req.kind == MetricKind::Histogram && req.buckets.is_none() {
        return Err("histograms require `buckets`".to_string());
    }
    let needs_amount = matches!(req.op, RecordOp::Add | RecordOp::Sub | RecordOp::Observe);
    if needs_amount && req.amount.is_none() {
        let what = if req.op == RecordOp::Observe { "value" } else { "amount" };
        return Err(format!("`{what}` is required for {:?}", req.op));
    }
    Ok(())
}

/// Apply a request that has passed [`validate`].
async fn apply_record(handle: &RegistryHandle, req: RecordRequest) -> Result<(), RegistryError> {
    let RecordRequest {
        kind,
        name,
        help,
        buckets,
        op,
        amount,
        labels,
    } = req;
    let amount = amount.unwrap_or(1.0);

    match kind {
        MetricKind::Counter => {
            let counter = handle.counter(name, help).await?;
            match op {
                RecordOp::Inc => counter.inc(labels).await,
                RecordOp::Reset => counter.reset(labels).await,
                RecordOp::ResetAll => counter.reset_all().await,
                _ => counter.add(amount, labels).await,
            }
        }
        MetricKind::Gauge => {
            let gauge = handle.gauge(name, help).await?;
            match op {
                RecordOp::Inc => gauge.inc(labels).await,
                RecordOp::Dec => gauge.dec(labels).await,
                RecordOp::Sub => gauge.sub(amount, labels).await,
                RecordOp::Reset => gauge.reset(labels).await,
                RecordOp::ResetAll => gauge.reset_all().await,
                _ => gauge.add(amount, labels).await,
            }
        }
        MetricKind::Histogram => {
            let histogram = handle
                .histogram(name, help, buckets.unwrap_or_default())
                .await?;
            match op {
                RecordOp::Reset => histogram.reset(labels).await,
                RecordOp::ResetAll => histogram.reset_all().await,
                _ => histogram.observe(amount, labels).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::to_bytes;
    use promvault_registry::{RegistryConfig, RegistryDirectory};
    use promvault_state::StateStore;

    use super::*;

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        ApiState {
            directory: Arc::new(RegistryDirectory::new(Arc::new(store), RegistryConfig::default())),
        }
    }

    fn idle_state(idle: Duration) -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        let config = RegistryConfig {
            idle_timeout: Some(idle),
            ..RegistryConfig::default()
        };
        ApiState {
            directory: Arc::new(RegistryDirectory::new(Arc::new(store), config)),
        }
    }

    fn request(body: serde_json::Value) -> Json<RecordRequest> {
        Json(serde_json::from_value(body).unwrap())
    }

    async fn body_text(resp: axum::response::Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn record_then_expose() {
        let state = test_state();
        for method in ["GET", "GET", "POST"] {
            let resp = record(
                State(state.clone()),
                Path("api".to_string()),
                request(serde_json::json!({
                    "kind": "counter",
                    "name": "http_requests",
                    "help": "reqs",
                    "op": "inc",
                    "labels": {"method": method}
                })),
            )
            .await
            .into_response();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = registry_metrics(State(state), Path("api".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            PROMETHEUS_CONTENT_TYPE
        );
        let body = body_text(resp).await;
        assert!(body.contains("http_requests{method=\"GET\"} 2\n"));
        assert!(body.contains("http_requests{method=\"POST\"} 1\n"));
    }

    #[tokio::test]
    async fn numeric_labels_and_observe_value() {
        let state = test_state();
        let resp = record(
            State(state.clone()),
            Path("api".to_string()),
            request(serde_json::json!({
                "kind": "histogram",
                "name": "latency",
                "buckets": [50, 100],
                "op": "observe",
                "value": 75,
                "labels": {"status": 200}
            })),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_text(
            registry_metrics(State(state), Path("api".to_string()))
                .await
                .into_response(),
        )
        .await;
        assert!(body.contains("latency_bucket{le=\"100\",status=\"200\"} 1\n"));
    }

    #[tokio::test]
    async fn negative_counter_increment_is_bad_request() {
        let state = test_state();
        let resp = record(
            State(state),
            Path("api".to_string()),
            request(serde_json::json!({
                "kind": "counter", "name": "c", "op": "add", "amount": -1
            })),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(resp).await.contains("\"success\":false"));
    }

    #[tokio::test]
    async fn op_not_valid_for_kind_is_bad_request() {
        let state = test_state();
        let resp = record(
            State(state),
            Path("api".to_string()),
            request(serde_json::json!({"kind": "counter", "name": "c", "op": "dec"})),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn histogram_without_buckets_is_bad_request() {
        let state = test_state();
        let resp = record(
            State(state),
            Path("api".to_string()),
            request(serde_json::json!({
                "kind": "histogram", "name": "h", "op": "observe", "value": 1
            })),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn flush_clears_default_registry() {
        let state = test_state();
        let resp = record(
            State(state.clone()),
            Path(DEFAULT_REGISTRY.to_string()),
            request(serde_json::json!({"kind": "gauge", "name": "g", "op": "inc"})),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = flush_default(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_text(default_metrics(State(state)).await.into_response()).await;
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn list_registries_reports_activated_names() {
        let state = test_state();
        registry_metrics(State(state.clone()), Path("b".to_string())).await;
        registry_metrics(State(state.clone()), Path("a".to_string())).await;

        let body = body_text(list_registries(State(state)).await.into_response()).await;
        assert_eq!(body, r#"{"success":true,"data":["a","b"]}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_registry_is_reactivated_by_next_request() {
        let state = idle_state(Duration::from_secs(1));
        let resp = record(
            State(state.clone()),
            Path("api".to_string()),
            request(serde_json::json!({"kind": "counter", "name": "c", "op": "add", "amount": 2})),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let body = body_text(list_registries(State(state.clone())).await.into_response()).await;
        assert_eq!(body, r#"{"success":true,"data":[]}"#);

        let resp = registry_metrics(State(state), Path("api".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("\nc 2\n"));
    }
}
