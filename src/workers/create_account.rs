//! create_account worker
//!
//! Pure insert; no OCC retries are configured for this action.

use sqlx::PgPool;

use crate::config::EngineOptions;
use crate::contracts::command_request_v1::AccountPayload;
use crate::repos::account_repo::NewAccount;
use crate::repos::command_repo::Command;
use crate::services::account_service;
use crate::workers::{self, Projection, WorkerError};

pub async fn run(
    pool: &PgPool,
    _opts: &EngineOptions,
    command: &Command,
) -> Result<Projection, WorkerError> {
    let payload: AccountPayload = workers::parse_payload(command)?;

    let account_type = payload
        .account_type
        .ok_or_else(|| WorkerError::InvalidPayload("missing account type".to_string()))?;

    let currency = payload
        .currency
        .ok_or_else(|| WorkerError::InvalidPayload("missing currency".to_string()))?;
    if !is_valid_currency(&currency) {
        return Err(WorkerError::InvalidPayload(format!(
            "currency must be a 3-letter uppercase code, got: {currency}"
        )));
    }

    let attrs = NewAccount {
        address: payload.address.clone(),
        name: payload.name.clone(),
        account_type,
        currency,
        allow_negative: payload.allow_negative.unwrap_or(false),
        metadata: payload.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
    };

    let account = account_service::create(pool, command.instance_id, &attrs, command).await?;

    Ok(Projection::Account(account))
}

fn is_valid_currency(currency: &str) -> bool {
    currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_code_shape() {
        assert!(is_valid_currency("EUR"));
        assert!(is_valid_currency("USD"));
        assert!(!is_valid_currency("eur"));
        assert!(!is_valid_currency("EU"));
        assert!(!is_valid_currency("EURO"));
    }
}
