//! Key index handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::engine::IndexEstimate;
use crate::error::Error;
use crate::index::ScanProgress;
use crate::session::IndexStatus;

use super::super::{error::ApiError, state::AppState};

/// Estimate response.
#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    #[serde(flatten)]
    pub estimate: IndexEstimate,
    pub summary: String,
}

/// Query parameters for starting a scan.
#[derive(Debug, Deserialize, Default)]
pub struct StartQuery {
    /// Rescan even if an index is cached.
    #[serde(default)]
    pub refresh: bool,
}

/// Scan start response.
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub connection: String,
    pub progress: ScanProgress,
    pub finished: bool,
}

/// Query parameters for reading the index.
#[derive(Debug, Deserialize, Default)]
pub struct StatusQuery {
    /// Build (or join) the scan and wait for it before answering.
    #[serde(default)]
    pub wait: bool,
    /// Answer 422 instead of returning a partial index.
    #[serde(default)]
    pub require_complete: bool,
}

/// Query parameters for key search.
#[derive(Debug, Deserialize, Default)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// Key search response.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub connection: String,
    pub query: String,
    pub count: usize,
    pub keys: Vec<String>,
}

/// Cancel response.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

pub async fn estimate(
    State(state): State<AppState>,
    Path(connection): Path<String>,
) -> Result<Json<EstimateResponse>, ApiError> {
    let estimate = state.session().index_estimate(&connection).await?;
    let summary = estimate.summary();
    Ok(Json(EstimateResponse { estimate, summary }))
}

/// Start a scan, or join the running one.
pub async fn start(
    State(state): State<AppState>,
    Path(connection): Path<String>,
    Query(query): Query<StartQuery>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let task = state
        .session()
        .start_index(&connection, query.refresh)
        .await?;
    let finished = task.is_finished();
    let status = if finished {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((
        status,
        Json(StartResponse {
            connection,
            progress: task.current(),
            finished,
        }),
    ))
}

/// Progress of the running scan plus the cached index.
pub async fn status(
    State(state): State<AppState>,
    Path(connection): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<IndexStatus>, ApiError> {
    if query.wait {
        state.session().build_index(&connection).await?;
    }
    let status = state.session().index_status(&connection)?;
    if query.require_complete
        && let Some(index) = &status.index
        && let Some(reason) = &index.scan_error
    {
        return Err(Error::ScanPartialFailure {
            connection,
            keys_scanned: index.total_keys,
            reason: reason.clone(),
        }
        .into());
    }
    Ok(Json(status))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(connection): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    state.session().connection(&connection)?;
    let cancelled = state.session().cancel_index(&connection);
    Ok(Json(CancelResponse { cancelled }))
}

/// Case-insensitive substring search; builds the index when missing.
pub async fn search(
    State(state): State<AppState>,
    Path(connection): Path<String>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let keys = state.session().search_keys(&connection, &query.q).await?;
    Ok(Json(SearchResponse {
        connection,
        query: query.q,
        count: keys.len(),
        keys,
    }))
}
