//! Instance management and per-instance listing routes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::repos::instance_repo::{self, Instance, InstanceError};
use crate::repos::queue_repo::QueueStatus;
use crate::repos::{account_repo, command_repo, queue_repo};
use crate::routes::accounts::PageQuery;
use crate::routes::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub address: String,
    #[serde(default)]
    pub config: Option<JsonValue>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

/// Handler for POST /api/instances
pub async fn create_instance(
    State(state): State<AppState>,
    Json(request): Json<CreateInstanceRequest>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    if request.address.trim().is_empty() {
        return Err(ApiError::with_field(
            StatusCode::UNPROCESSABLE_ENTITY,
            "address",
            "address cannot be empty",
        ));
    }

    let instance = instance_repo::create(
        &state.pool,
        &request.address,
        request.config.unwrap_or_else(|| json!({})),
        request.metadata.unwrap_or_else(|| json!({})),
    )
    .await
    .map_err(|e| match e {
        InstanceError::AddressTaken { .. } => {
            ApiError::with_field(StatusCode::UNPROCESSABLE_ENTITY, "address", e.to_string())
        }
        InstanceError::Database(_) => {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal database error")
        }
    })?;

    Ok((StatusCode::CREATED, Json(json!({ "instance": instance }))))
}

/// Handler for GET /api/instances/{address}
pub async fn get_instance(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let instance = resolve_instance(&state, &address).await?;
    Ok(Json(json!({ "instance": instance })))
}

/// Handler for GET /api/instances/{address}/accounts
pub async fn list_accounts(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    let instance = resolve_instance(&state, &address).await?;

    let (limit, offset) = page.limits();
    let accounts = account_repo::list_for_instance(&state.pool, instance.id, limit, offset)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(json!({
        "instance_id": instance.id,
        "accounts": accounts,
        "limit": limit,
        "offset": offset,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListCommandsQuery {
    pub status: Option<QueueStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Handler for GET /api/instances/{address}/commands
///
/// Without a status filter this lists the instance's commands, newest
/// first; with one it lists the matching queue items for operational
/// visibility into retries and dead letters.
pub async fn list_commands(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(params): Query<ListCommandsQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    let instance = resolve_instance(&state, &address).await?;

    let page = PageQuery {
        limit: params.limit,
        offset: params.offset,
    };
    let (limit, offset) = page.limits();

    match params.status {
        Some(status) => {
            let items =
                queue_repo::list_by_status(&state.pool, instance.id, status, limit, offset)
                    .await
                    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            Ok(Json(json!({
                "instance_id": instance.id,
                "queue_items": items,
                "limit": limit,
                "offset": offset,
            })))
        }
        None => {
            let commands = command_repo::list_for_instance(&state.pool, instance.id, limit, offset)
                .await
                .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            Ok(Json(json!({
                "instance_id": instance.id,
                "commands": commands,
                "limit": limit,
                "offset": offset,
            })))
        }
    }
}

async fn resolve_instance(state: &AppState, address: &str) -> Result<Instance, ApiError> {
    instance_repo::find_by_address(&state.pool, address)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| {
            ApiError::new(StatusCode::NOT_FOUND, format!("Instance not found: {address}"))
        })
}
