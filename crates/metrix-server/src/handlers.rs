//! HTTP request handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use metrix_core::metric::{MetricBatch, MetricKind, MetricRecord, MetricValue};

use crate::error::ApiError;
use crate::state::AppState;

fn text(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

/// JSON is parsed here rather than with the `Json` extractor so malformed
/// bodies map to 400.
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

// ============================================================
// Updates
// ============================================================

pub(crate) async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, raw)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    if name.is_empty() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let kind: MetricKind = kind.parse()?;
    let value = MetricValue::parse(kind, &raw)?;

    let stored = state
        .with_store(move |store| store.update(&name, value))
        .await?;
    debug!(%kind, value = %stored, "path update applied");
    Ok(text(String::new()))
}

pub(crate) async fn update_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MetricRecord>, ApiError> {
    let record: MetricRecord = parse_json(&body)?;
    let value = record.metric_value()?;
    let id = record.id;

    let stored = state
        .with_store({
            let id = id.clone();
            move |store| store.update(&id, value)
        })
        .await?;
    Ok(Json(MetricRecord::new(id, stored)))
}

pub(crate) async fn updates_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let records: Vec<MetricRecord> = parse_json(&body)?;
    let batch = MetricBatch::from_records(&records)?;
    let (received, merged) = (records.len(), batch.len());

    state
        .with_store(move |store| store.update_batch(&batch))
        .await?;
    debug!(received, merged, "batch update applied");
    Ok(StatusCode::OK.into_response())
}

// ============================================================
// Reads
// ============================================================

pub(crate) async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let kind: MetricKind = kind.parse()?;
    let value = state.with_store(move |store| store.get(kind, &name)).await?;
    Ok(text(value.to_string()))
}

pub(crate) async fn value_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MetricRecord>, ApiError> {
    let query: MetricRecord = parse_json(&body)?;
    if query.id.is_empty() {
        return Err(ApiError::BadRequest("metric id is empty".to_string()));
    }
    let (kind, id) = (query.kind, query.id);

    let value = state
        .with_store({
            let id = id.clone();
            move |store| store.get(kind, &id)
        })
        .await?;
    Ok(Json(MetricRecord::new(id, value)))
}

pub(crate) async fn list_all(State(state): State<AppState>) -> Result<Response, ApiError> {
    let values = state.with_store(|store| store.list_all()).await?;
    Ok(text(values.join(",")))
}

pub(crate) async fn ping(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.with_store(|store| store.ping()).await?;
    Ok(text("ok".to_string()))
}
