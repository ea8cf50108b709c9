pub mod account_service;
pub mod balances;
pub mod idempotency;
pub mod ingest_service;
pub mod transaction_service;
pub mod validation;
