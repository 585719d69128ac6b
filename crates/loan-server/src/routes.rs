use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use loan_core::{
    error::PredictError,
    history::{HistoryRecord, HistoryStore},
    pipeline::PredictionPipeline,
    schema::PredictResponse,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Caller identity, set by whatever sits in front of us and verifies tokens.
pub const IDENTITY_HEADER: &str = "x-user-email";

const DEFAULT_RECENT_LIMIT: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PredictionPipeline>,
    pub history: Arc<dyn HistoryStore>,
    pub prom: PrometheusHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/history", get(history).delete(clear_history))
        .route("/api/admin/predictions", get(all_predictions))
        .route("/admin/dashboard/recent-predictions", get(recent_predictions))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Predict(PredictError),
    BadRequest(String),
    Forbidden(String),
    Internal(anyhow::Error),
}

impl From<PredictError> for ApiError {
    fn from(e: PredictError) -> Self {
        ApiError::Predict(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Predict(e) if e.is_client_error() => {
                let mut body = json!({ "error": e.to_string(), "kind": e.kind() });
                if let PredictError::UnknownCategory { valid, .. } = &e {
                    body["valid"] = json!(valid);
                }
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            ApiError::Predict(e) => {
                tracing::error!(err = %e, "prediction failed on internal shape mismatch");
                internal_error()
            }
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Internal(e) => {
                tracing::error!(err = ?e, "request failed");
                internal_error()
            }
        }
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "An unexpected error occurred during prediction." })),
    )
        .into_response()
}

fn identity_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

async fn predict(
    State(st): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Value::Object(raw) = body else {
        return Err(ApiError::BadRequest("request body must be a JSON object".into()));
    };
    let identity = identity_from(&headers);
    let res = st.pipeline.predict_request(&raw, identity.as_deref())?;
    Ok(Json(res.into()))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    email: Option<String>,
}

impl HistoryQuery {
    fn email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    }
}

async fn history(
    State(st): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    let identity = identity_from(&headers)
        .or_else(|| q.email())
        .ok_or_else(|| ApiError::BadRequest("User email required for history".into()))?;

    let store = Arc::clone(&st.history);
    let recs = tokio::task::spawn_blocking(move || store.list_for(&identity))
        .await
        .map_err(anyhow::Error::new)??;
    Ok(Json(recs))
}

/// A caller may only clear their own records: an authenticated identity that
/// differs from `?email=` is refused.
async fn clear_history(
    State(st): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let caller = identity_from(&headers);
    let target = q.email();
    if let (Some(c), Some(t)) = (&caller, &target) {
        if c != t {
            tracing::warn!(caller = %c, target = %t, "refused to clear another user's history");
            return Err(ApiError::Forbidden("Unauthorized to clear this history".into()));
        }
    }
    let identity = caller
        .or(target)
        .ok_or_else(|| ApiError::BadRequest("User email required for history".into()))?;

    let store = Arc::clone(&st.history);
    let removed = tokio::task::spawn_blocking(move || store.clear_for(&identity))
        .await
        .map_err(anyhow::Error::new)??;
    tracing::info!(removed, "history cleared");
    Ok(Json(json!({ "message": "History cleared successfully" })))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn newest(st: &AppState, limit: usize) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    let store = Arc::clone(&st.history);
    let recs = tokio::task::spawn_blocking(move || store.recent(limit))
        .await
        .map_err(anyhow::Error::new)??;
    Ok(Json(recs))
}

/// Every record, newest first, unless `?limit=` caps it.
async fn all_predictions(
    State(st): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    newest(&st, q.limit.unwrap_or(usize::MAX)).await
}

async fn recent_predictions(
    State(st): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    newest(&st, q.limit.unwrap_or(DEFAULT_RECENT_LIMIT)).await
}

async fn healthz(State(st): State<AppState>) -> impl IntoResponse {
    let a = st.pipeline.artifacts();
    Json(json!({
        "status": "ok",
        "classifier": a.classifier.name(),
        "vocabulary": a.encoder.len(),
    }))
}

async fn metrics(State(st): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, st.prom.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use loan_core::{
        artifacts::ModelArtifacts,
        encoder::CategoricalEncoder,
        history::MemoryHistoryStore,
        model::{Classifier, LogisticModel},
        normalizer::Normalizer,
        schema::{Label, N_FEATURES},
    };
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Map;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn record(identity: &str, ts: i64) -> HistoryRecord {
        HistoryRecord {
            id: Uuid::new_v4(),
            identity: Some(identity.to_string()),
            input: Map::new(),
            label: Label::AtRisk,
            result: Label::AtRisk.text().to_string(),
            confidence: 0.75,
            timestamp_ms: ts,
        }
    }

    fn state(store: Arc<MemoryHistoryStore>) -> AppState {
        state_with(
            store,
            Arc::new(LogisticModel {
                bias: 0.0,
                weights: vec![0.0; N_FEATURES],
            }),
        )
    }

    fn state_with(store: Arc<MemoryHistoryStore>, clf: Arc<dyn Classifier>) -> AppState {
        let artifacts = ModelArtifacts::new(
            CategoricalEncoder::new(["all_other", "credit_card", "debt_consolidation"]).unwrap(),
            Normalizer::identity(),
            clf,
        )
        .unwrap();
        AppState {
            pipeline: Arc::new(PredictionPipeline::new(artifacts, None)),
            history: store,
            prom: PrometheusBuilder::new().build_recorder().handle(),
        }
    }

    fn sample() -> Map<String, Value> {
        json!({
            "credit.policy": 1,
            "purpose": "debt_consolidation",
            "int.rate": 0.1189,
            "installment": 829.10,
            "log.annual.inc": 11.35,
            "dti": 19.48,
            "fico": 737,
            "days.with.cr.line": 5639.96,
            "revol.bal": 28854,
            "revol.util": 52.1,
            "inq.last.6mths": 0,
            "delinq.2yrs": 0,
            "pub.rec": 0
        })
        .as_object()
        .unwrap()
        .clone()
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let v = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, v)
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header(IDENTITY_HEADER, "a@x.io")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn predict_returns_label_and_percentage() {
        let app = router(state(Arc::new(MemoryHistoryStore::new())));
        let (status, v) = call(app, post_json("/predict", &Value::Object(sample()))).await;
        assert_eq!(status, StatusCode::OK);
        // all-zero weights -> p1 = 0.5 -> class 0 with confidence 0.5
        assert_eq!(v["label"], "repaid");
        assert_eq!(v["result"], "Loan Likely to be Repaid");
        assert_eq!(v["confidence"], "50.00%");
    }

    #[tokio::test]
    async fn unknown_purpose_is_400_with_choices() {
        let app = router(state(Arc::new(MemoryHistoryStore::new())));
        let mut body = sample();
        body.insert("purpose".into(), json!("space_travel"));
        let (status, v) = call(app, post_json("/predict", &Value::Object(body))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(v["kind"], "unknown_category");
        assert_eq!(
            v["valid"],
            json!(["all_other", "credit_card", "debt_consolidation"])
        );
    }

    #[tokio::test]
    async fn missing_field_is_400() {
        let app = router(state(Arc::new(MemoryHistoryStore::new())));
        let mut body = sample();
        body.remove("fico");
        let (status, v) = call(app, post_json("/predict", &Value::Object(body))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(v["kind"], "missing_field");
        assert!(v["error"].as_str().unwrap().contains("fico"));
    }

    #[tokio::test]
    async fn non_object_body_is_400() {
        let app = router(state(Arc::new(MemoryHistoryStore::new())));
        let (status, _) = call(app, post_json("/predict", &json!([1, 2, 3]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn history_uses_header_then_query() {
        let store = Arc::new(MemoryHistoryStore::new());
        store.append(&record("a@x.io", 1)).unwrap();
        store.append(&record("a@x.io", 3)).unwrap();
        store.append(&record("b@x.io", 2)).unwrap();

        let app = router(state(store));
        let req = Request::builder()
            .uri("/history")
            .header(IDENTITY_HEADER, "a@x.io")
            .body(Body::empty())
            .unwrap();
        let (status, v) = call(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        let ts: Vec<i64> = v
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["timestamp_ms"].as_i64().unwrap())
            .collect();
        assert_eq!(ts, vec![3, 1]);

        let req = Request::builder()
            .uri("/history?email=b@x.io")
            .body(Body::empty())
            .unwrap();
        let (_, v) = call(app.clone(), req).await;
        assert_eq!(v.as_array().unwrap().len(), 1);

        let req = Request::builder().uri("/history").body(Body::empty()).unwrap();
        let (status, _) = call(app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    /// Reports the schema width but fails every row.
    struct WrongWidth;

    impl Classifier for WrongWidth {
        fn predict(&self, row: &[f64]) -> Result<(u8, f64), PredictError> {
            Err(PredictError::ModelInput { expected: N_FEATURES + 1, got: row.len() })
        }
        fn n_features(&self) -> usize {
            N_FEATURES
        }
        fn name(&self) -> &'static str {
            "wrong_width"
        }
    }

    #[tokio::test]
    async fn model_input_error_is_500_with_generic_body() {
        let store = Arc::new(MemoryHistoryStore::new());
        let app = router(state_with(store.clone(), Arc::new(WrongWidth)));
        let (status, v) = call(app, post_json("/predict", &Value::Object(sample()))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            v,
            json!({ "error": "An unexpected error occurred during prediction." })
        );
        assert!(store.is_empty());
    }

    fn delete(uri: &str, identity: Option<&str>) -> Request<Body> {
        let mut b = Request::builder().method("DELETE").uri(uri);
        if let Some(id) = identity {
            b = b.header(IDENTITY_HEADER, id);
        }
        b.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn clearing_history_only_touches_the_caller() {
        let store = Arc::new(MemoryHistoryStore::new());
        store.append(&record("a@x.io", 1)).unwrap();
        store.append(&record("a@x.io", 2)).unwrap();
        store.append(&record("b@x.io", 3)).unwrap();
        let app = router(state(store.clone()));

        let req = delete("/history?email=b@x.io", Some("a@x.io"));
        let (status, v) = call(app.clone(), req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(v["error"], "Unauthorized to clear this history");
        assert_eq!(store.len(), 3);

        let (status, _) = call(app.clone(), delete("/history", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = delete("/history?email=a@x.io", Some("a@x.io"));
        let (status, v) = call(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["message"], "History cleared successfully");
        assert!(store.list_for("a@x.io").unwrap().is_empty());
        assert_eq!(store.list_for("b@x.io").unwrap().len(), 1);

        let (status, _) = call(app, delete("/history?email=b@x.io", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn admin_predictions_lists_everything_by_default() {
        let store = Arc::new(MemoryHistoryStore::new());
        for ts in 0..8 {
            store.append(&record("a@x.io", ts)).unwrap();
        }
        let app = router(state(store));

        let req = Request::builder()
            .uri("/api/admin/predictions")
            .body(Body::empty())
            .unwrap();
        let (_, v) = call(app.clone(), req).await;
        assert_eq!(v.as_array().unwrap().len(), 8);
        assert_eq!(v[0]["timestamp_ms"], 7);

        let req = Request::builder()
            .uri("/api/admin/predictions?limit=2")
            .body(Body::empty())
            .unwrap();
        let (_, v) = call(app, req).await;
        assert_eq!(v.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dashboard_recent_defaults_to_five() {
        let store = Arc::new(MemoryHistoryStore::new());
        for ts in 0..8 {
            store.append(&record("a@x.io", ts)).unwrap();
        }
        let app = router(state(store));

        let req = Request::builder()
            .uri("/admin/dashboard/recent-predictions")
            .body(Body::empty())
            .unwrap();
        let (_, v) = call(app.clone(), req).await;
        assert_eq!(v.as_array().unwrap().len(), DEFAULT_RECENT_LIMIT);
        assert_eq!(v[0]["timestamp_ms"], 7);

        let req = Request::builder()
            .uri("/admin/dashboard/recent-predictions?limit=3")
            .body(Body::empty())
            .unwrap();
        let (_, v) = call(app, req).await;
        assert_eq!(v.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn healthz_reports_model() {
        let app = router(state(Arc::new(MemoryHistoryStore::new())));
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let (status, v) = call(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["classifier"], "logistic");
        assert_eq!(v["vocabulary"], 3);
    }
}
