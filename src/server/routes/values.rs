//! Value handlers.

use std::path::PathBuf;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};

use crate::export::{ExportReport, suggested_file_name};
use crate::value::{RenderFormat, ValueDescriptor};

use super::super::{error::ApiError, state::AppState};

/// Full value response.
#[derive(Debug, Serialize)]
pub struct ValueResponse {
    pub key: String,
    pub value: String,
}

/// Query parameters for inspection.
#[derive(Debug, Deserialize, Default)]
pub struct InspectQuery {
    /// `auto`, `string`, `hex` or `base64`.
    pub format: Option<String>,
}

/// Descriptor plus the rendering selected by the request.
#[derive(Debug, Serialize)]
pub struct InspectResponse {
    #[serde(flatten)]
    pub descriptor: ValueDescriptor,
    pub format: RenderFormat,
    pub display: String,
}

/// Body of an export request.
///
/// Either `path` names the target file, or `directory` names where a file
/// called `export_<key>.bin` is created.
#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub path: Option<PathBuf>,
    pub directory: Option<PathBuf>,
}

/// Export response.
#[derive(Debug, Serialize)]
pub struct ExportResponse {
    #[serde(flatten)]
    pub report: ExportReport,
    pub path: String,
}

/// The full value as text.
pub async fn get_value(
    State(state): State<AppState>,
    Path((connection, key)): Path<(String, String)>,
) -> Result<Json<ValueResponse>, ApiError> {
    let value = state.session().get_value(&connection, &key).await?;
    Ok(Json(ValueResponse { key, value }))
}

pub async fn inspect(
    State(state): State<AppState>,
    Path((connection, key)): Path<(String, String)>,
    Query(query): Query<InspectQuery>,
) -> Result<Json<InspectResponse>, ApiError> {
    let requested = match query.format.as_deref() {
        Some(format) => format.parse::<RenderFormat>()?,
        None => RenderFormat::Auto,
    };
    let descriptor = state.session().inspect_value(&connection, &key).await?;
    let format = requested.resolve(descriptor.value_type);
    let display = descriptor.render(format).to_string();
    Ok(Json(InspectResponse {
        descriptor: descriptor.as_ref().clone(),
        format,
        display,
    }))
}

pub async fn export(
    State(state): State<AppState>,
    Path((connection, key)): Path<(String, String)>,
    Json(request): Json<ExportRequest>,
) -> Result<Json<ExportResponse>, ApiError> {
    let path = match (request.path, request.directory) {
        (Some(path), _) => path,
        (None, Some(dir)) => dir.join(suggested_file_name(&key)),
        (None, None) => {
            return Err(ApiError::invalid_input(
                "export needs either 'path' or 'directory'",
            ));
        }
    };
    let report = state.session().export_value(&connection, &key, &path).await?;
    Ok(Json(ExportResponse {
        report,
        path: path.display().to_string(),
    }))
}
