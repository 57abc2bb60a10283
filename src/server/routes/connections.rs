//! Connection registry handlers.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::registry::Connection;

use super::super::{error::ApiError, state::AppState};

/// Body of a connection create request.
#[derive(Debug, Deserialize)]
pub struct AddConnectionRequest {
    pub name: String,
    pub location: String,
}

/// Body of a connection update request.
#[derive(Debug, Deserialize)]
pub struct UpdateConnectionRequest {
    /// New name; keeps the current one when absent.
    pub name: Option<String>,
    pub location: String,
}

/// List connection names in registration order.
pub async fn list(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.session().list_connections())
}

/// Name to location mapping.
pub async fn locations(State(state): State<AppState>) -> Json<BTreeMap<String, String>> {
    Json(state.session().connection_locations())
}

pub async fn get(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Connection>, ApiError> {
    Ok(Json(state.session().connection(&name)?))
}

pub async fn add(
    State(state): State<AppState>,
    Json(request): Json<AddConnectionRequest>,
) -> Result<(StatusCode, Json<Connection>), ApiError> {
    let conn = state
        .session()
        .add_connection(&request.name, &request.location)?;
    Ok((StatusCode::CREATED, Json(conn)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<UpdateConnectionRequest>,
) -> Result<Json<Connection>, ApiError> {
    let new_name = request.name.as_deref().unwrap_or(&name);
    let conn = state
        .session()
        .update_connection(&name, new_name, &request.location)
        .await?;
    Ok(Json(conn))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.session().remove_connection(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
