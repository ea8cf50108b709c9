//! Command intake and polling routes

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::contracts::command_request_v1::CommandRequestV1;
use crate::repos::{command_repo, journal_repo, queue_repo};
use crate::routes::{ApiError, AppState};
use crate::services::ingest_service::{self, IngestError, SyncOutcome};
use crate::workers::{Projection, WorkerError};

/// Handler for POST /api/commands
///
/// Synchronous submission: the command is stored, claimed, and executed
/// inline; the response carries the projection.
pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<CommandRequestV1>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let outcome = ingest_service::submit_sync(&state.pool, &state.config, &request)
        .await
        .map_err(ingest_error)?;

    match outcome {
        SyncOutcome::Completed {
            command,
            projection,
        } => {
            let mut body = json!({ "command": command });
            merge_projection(&mut body, &projection);
            Ok((StatusCode::CREATED, Json(body)))
        }
        SyncOutcome::Enqueued { command, item } => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "command": command, "queue_item": item })),
        )),
    }
}

/// Handler for POST /api/commands/enqueue
///
/// Enqueue-only submission: returns the command with its pending queue
/// item; the instance processor projects it asynchronously.
pub async fn enqueue(
    State(state): State<AppState>,
    Json(request): Json<CommandRequestV1>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let (command, item) = ingest_service::submit(&state.pool, &state.config, &request)
        .await
        .map_err(ingest_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "command": command, "queue_item": item })),
    ))
}

/// Handler for GET /api/commands/{id}
///
/// Polling endpoint for asynchronous submissions: command plus its queue
/// item state and accumulated errors.
pub async fn get_command(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let command = command_repo::find_by_id(&state.pool, id)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Command not found: {id}")))?;

    let item = queue_repo::find_by_command(&state.pool, id)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let journal_event = journal_repo::find_by_command(&state.pool, id)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(json!({
        "command": command,
        "queue_item": item,
        "journal_event": journal_event,
    })))
}

fn merge_projection(body: &mut JsonValue, projection: &Projection) {
    if let Some(map) = body.as_object_mut() {
        match projection {
            Projection::Transaction { record, entries } => {
                map.insert("transaction".to_string(), json!(record));
                map.insert("entries".to_string(), json!(entries));
            }
            Projection::Account(account) => {
                map.insert("account".to_string(), json!(account));
            }
        }
    }
}

fn ingest_error(e: IngestError) -> ApiError {
    match e {
        IngestError::InstanceNotFound { .. } | IngestError::AccountNotFound { .. } => {
            ApiError::new(StatusCode::NOT_FOUND, e.to_string())
        }
        IngestError::ActionNotSupported { .. } => {
            ApiError::new(StatusCode::BAD_REQUEST, e.to_string())
        }
        IngestError::ValidationFailed { ref field, .. } => {
            let field = field.clone();
            ApiError::with_field(StatusCode::UNPROCESSABLE_ENTITY, &field, e.to_string())
        }
        IngestError::Duplicate { existing } => ApiError::duplicate(existing),
        IngestError::UpdateTargetMissing { .. } | IngestError::UpdateTargetNotPending { .. } => {
            ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
        IngestError::Worker(w) => worker_error(w),
        IngestError::Database(_) => {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal database error")
        }
    }
}

fn worker_error(e: WorkerError) -> ApiError {
    match e {
        WorkerError::Validation(ref v) => {
            ApiError::with_field(StatusCode::UNPROCESSABLE_ENTITY, v.field(), e.to_string())
        }
        WorkerError::InvalidPayload(_) => {
            ApiError::with_field(StatusCode::UNPROCESSABLE_ENTITY, "payload", e.to_string())
        }
        WorkerError::AddressTaken { .. } => {
            ApiError::with_field(StatusCode::UNPROCESSABLE_ENTITY, "address", e.to_string())
        }
        WorkerError::AccountNotFound { .. } => ApiError::new(StatusCode::NOT_FOUND, e.to_string()),
        WorkerError::UpdateTargetMissing { .. } | WorkerError::UpdateTargetNotPending { .. } => {
            ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
        WorkerError::PendingUpdateInFlight { .. } | WorkerError::OccTimeout { .. } => {
            ApiError::new(StatusCode::CONFLICT, e.to_string())
        }
        WorkerError::Internal(_) | WorkerError::Database(_) => {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
