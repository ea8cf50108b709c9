//! Command idempotency fingerprints
//!
//! Every accepted command is fingerprinted with an HMAC-SHA256 over its
//! identifying tuple; the unique index on `(instance_id, idempotency_hash)`
//! turns replays into `DuplicateCommand` responses. The secret keeps
//! fingerprints unforgeable across deployments sharing a database.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::repos::command_repo::CommandAction;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("Invalid idempotency secret")]
    InvalidSecret,
}

/// Hex-encoded HMAC over the command's identifying tuple
///
/// Layout: `action|instance_address|source|source_idempk|update_source|update_idempk`
/// with absent optionals contributing empty segments, so the same field
/// values always hash identically regardless of which call site built them.
pub fn fingerprint(
    secret: &str,
    action: CommandAction,
    instance_address: &str,
    source: &str,
    source_idempk: &str,
    update_source: Option<&str>,
    update_idempk: Option<&str>,
) -> Result<String, IdempotencyError> {
    let canonical = [
        action.as_str(),
        instance_address,
        source,
        source_idempk,
        update_source.unwrap_or(""),
        update_idempk.unwrap_or(""),
    ]
    .join("|");

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| IdempotencyError::InvalidSecret)?;
    mac.update(canonical.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_tuple_same_fingerprint() {
        let a = fingerprint(
            "secret",
            CommandAction::CreateTransaction,
            "Acme:Ledger",
            "billing",
            "inv_001",
            None,
            None,
        )
        .unwrap();
        let b = fingerprint(
            "secret",
            CommandAction::CreateTransaction,
            "Acme:Ledger",
            "billing",
            "inv_001",
            None,
            None,
        )
        .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn update_idempk_changes_the_fingerprint() {
        let create = fingerprint(
            "secret",
            CommandAction::CreateTransaction,
            "Acme:Ledger",
            "billing",
            "inv_001",
            None,
            None,
        )
        .unwrap();
        let update = fingerprint(
            "secret",
            CommandAction::UpdateTransaction,
            "Acme:Ledger",
            "billing",
            "inv_001",
            None,
            Some("rev_1"),
        )
        .unwrap();

        assert_ne!(create, update);
    }

    #[test]
    fn secret_changes_the_fingerprint() {
        let args = (
            CommandAction::CreateAccount,
            "Acme:Ledger",
            "onboarding",
            "acct_9",
        );
        let a = fingerprint("secret-a", args.0, args.1, args.2, args.3, None, None).unwrap();
        let b = fingerprint("secret-b", args.0, args.1, args.2, args.3, None, None).unwrap();
        assert_ne!(a, b);
    }
}
