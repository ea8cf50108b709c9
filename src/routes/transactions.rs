//! Transaction read routes

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::repos::transaction_repo;
use crate::routes::{ApiError, AppState};

/// Handler for GET /api/transactions/{id}
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let record = transaction_repo::find_by_id(&state.pool, id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::new(StatusCode::NOT_FOUND, format!("Transaction not found: {id}"))
        })?;

    let entries = transaction_repo::find_entries(&state.pool, id)
        .await
        .map_err(internal)?;

    Ok(Json(json!({ "transaction": record, "entries": entries })))
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
