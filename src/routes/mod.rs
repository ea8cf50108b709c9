pub mod accounts;
pub mod commands;
pub mod instances;
pub mod transactions;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::health::health;
use crate::monitor::ProcessorRegistry;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub registry: Arc<ProcessorRegistry>,
}

/// JSON error envelope
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
    /// Set on duplicate-command responses so the caller can look up the
    /// prior result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_command_id: Option<Uuid>,
}

/// Error response wrapper for proper HTTP error handling
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: message.into(),
                errors: None,
                existing_command_id: None,
            },
        }
    }

    pub fn with_field(status: StatusCode, field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status,
            body: ErrorBody {
                error: message.clone(),
                errors: Some(serde_json::json!({ field: [message] })),
                existing_command_id: None,
            },
        }
    }

    pub fn duplicate(existing: Uuid) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            body: ErrorBody {
                error: format!("Duplicate command, original id: {existing}"),
                errors: None,
                existing_command_id: Some(existing),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/instances", post(instances::create_instance))
        .route("/api/instances/{address}", get(instances::get_instance))
        .route(
            "/api/instances/{address}/accounts",
            get(instances::list_accounts),
        )
        .route(
            "/api/instances/{address}/commands",
            get(instances::list_commands),
        )
        .route("/api/commands", post(commands::submit))
        .route("/api/commands/enqueue", post(commands::enqueue))
        .route("/api/commands/{id}", get(commands::get_command))
        .route("/api/accounts", get(accounts::find_account))
        .route("/api/accounts/{id}", get(accounts::get_account))
        .route(
            "/api/accounts/{id}/balance-history",
            get(accounts::balance_history),
        )
        .route("/api/transactions/{id}", get(transactions::get_transaction))
        .with_state(state)
}
