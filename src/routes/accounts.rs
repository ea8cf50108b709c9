//! Account read routes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::repos::{account_repo, balance_history_repo, instance_repo};
use crate::routes::{ApiError, AppState};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct FindAccountQuery {
    pub instance_address: String,
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    pub(crate) fn limits(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

/// Handler for GET /api/accounts?instance_address=...&address=...
pub async fn find_account(
    State(state): State<AppState>,
    Query(params): Query<FindAccountQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    let instance = instance_repo::find_by_address(&state.pool, &params.instance_address)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                format!("Instance not found: {}", params.instance_address),
            )
        })?;

    let account = account_repo::find_by_address(&state.pool, instance.id, &params.address)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                format!("Account not found: {}", params.address),
            )
        })?;

    Ok(Json(json!({ "account": account })))
}

/// Handler for GET /api/accounts/{id}
pub async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let account = account_repo::find_by_id(&state.pool, id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Account not found: {id}")))?;

    Ok(Json(json!({ "account": account })))
}

/// Handler for GET /api/accounts/{id}/balance-history
pub async fn balance_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    let account = account_repo::find_by_id(&state.pool, id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Account not found: {id}")))?;

    let (limit, offset) = page.limits();
    let entries = balance_history_repo::list_for_account(&state.pool, account.id, limit, offset)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(json!({
        "account_id": account.id,
        "balance_history": entries,
        "limit": limit,
        "offset": offset,
    })))
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
