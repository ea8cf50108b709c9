//! Command intake contract
//!
//! One request shape covers all four command actions. The `payload` field is
//! kept as raw JSON at the envelope level and parsed into the typed payload
//! for the action once the action string has been resolved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::repos::account_repo::AccountType;
use crate::repos::transaction_repo::TransactionStatus;

/// Inbound command request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequestV1 {
    /// Human key of the owning instance (tenant)
    pub instance_address: String,
    /// One of create_transaction, update_transaction, create_account, update_account
    pub action: String,
    /// Originating system tag
    pub source: String,
    /// Caller-supplied idempotency key, unique per source
    pub source_idempk: String,
    /// Required for update_* actions; distinguishes successive updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_idempk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_source: Option<String>,
    /// Action-specific payload (TransactionPayload | AccountPayload)
    pub payload: JsonValue,
}

/// Payload for create_transaction / update_transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
    /// Signed amounts in minor units; sign is translated to debit/credit
    /// using the polarity of the target account. Optional on updates that
    /// only restatus the transaction.
    #[serde(default)]
    pub entries: Vec<EntryInput>,
}

/// One signed entry line of a transaction payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInput {
    pub account_address: String,
    /// Signed amount in minor units
    pub amount: i64,
    /// ISO 4217 code, must match the account's currency
    pub currency: String,
}

/// Payload for create_account / update_account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountPayload {
    pub address: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub account_type: Option<AccountType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_negative: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_request_round_trips() {
        let raw = serde_json::json!({
            "instance_address": "Acme:Ledger",
            "action": "create_transaction",
            "source": "billing",
            "source_idempk": "inv_001",
            "payload": {
                "status": "posted",
                "entries": [
                    {"account_address": "cash:op", "amount": 100_000, "currency": "EUR"},
                    {"account_address": "equity:cap", "amount": 100_000, "currency": "EUR"}
                ]
            }
        });

        let request: CommandRequestV1 = serde_json::from_value(raw).unwrap();
        assert_eq!(request.action, "create_transaction");
        assert!(request.update_idempk.is_none());

        let payload: TransactionPayload = serde_json::from_value(request.payload).unwrap();
        assert_eq!(payload.status, TransactionStatus::Posted);
        assert_eq!(payload.entries.len(), 2);
        assert_eq!(payload.entries[0].amount, 100_000);
    }

    #[test]
    fn account_payload_accepts_optional_fields() {
        let payload: AccountPayload = serde_json::from_value(serde_json::json!({
            "address": "cash:op",
            "type": "asset",
            "currency": "EUR"
        }))
        .unwrap();

        assert_eq!(payload.account_type, Some(AccountType::Asset));
        assert_eq!(payload.allow_negative, None);
        assert!(payload.name.is_none());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let result: Result<TransactionPayload, _> = serde_json::from_value(serde_json::json!({
            "status": "reversed",
            "entries": []
        }));
        assert!(result.is_err());
    }
}
