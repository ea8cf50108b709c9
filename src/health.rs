use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::routes::AppState;

/// Health check endpoint handler
///
/// Liveness plus engine state: whether the database answers, the schema
/// the engine is pinned to, and how many instance processors are running
/// right now. The database probe rides the same pool the projections use,
/// so "ok" here means commands can actually reach storage.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = match sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
    {
        Ok(_) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Health probe could not reach the database");
            "unreachable"
        }
    };

    let status = if database == "ok" { "healthy" } else { "degraded" };

    Json(serde_json::json!({
        "status": status,
        "service": "ledger-rs",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "schema_prefix": state.config.schema_prefix,
        "active_processors": state.registry.active_count(),
    }))
}
