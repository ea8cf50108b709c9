//! create_transaction worker
//!
//! Translates the signed entry payload into typed debit/credit entries and
//! projects the transaction under the OCC retry loop.

use chrono::Utc;
use sqlx::PgPool;

use crate::config::EngineOptions;
use crate::contracts::command_request_v1::TransactionPayload;
use crate::repos::command_repo::Command;
use crate::services::transaction_service::{self, NewTransaction};
use crate::workers::{self, Projection, WorkerError};

pub async fn run(
    pool: &PgPool,
    opts: &EngineOptions,
    command: &Command,
) -> Result<Projection, WorkerError> {
    let payload: TransactionPayload = workers::parse_payload(command)?;

    let entries = workers::resolve_entries(pool, command.instance_id, &payload.entries).await?;

    let new = NewTransaction {
        status: payload.status,
        effective_at: payload.effective_at.unwrap_or_else(Utc::now),
        metadata: payload.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
        entries,
    };

    let (record, entries) = workers::with_occ_retry(&opts.retry, "create_transaction", || {
        transaction_service::create(pool, command.instance_id, &new, command)
    })
    .await?;

    Ok(Projection::Transaction { record, entries })
}
