use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Connection, Executor};
use std::time::Duration;

/// Initialize a connection pool pinned to the configured schema.
///
/// Every connection sets `search_path` to the schema prefix on checkout so
/// repository SQL stays unqualified. The schema itself is created by
/// [`ensure_schema`] before migrations run.
pub async fn init_pool(database_url: &str, schema_prefix: &str) -> Result<PgPool, sqlx::Error> {
    let max_connections = std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(10);

    let acquire_timeout_secs = std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(3);

    let schema = quote_ident(schema_prefix);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
        .after_connect(move |conn, _meta| {
            let set_search_path = format!("SET search_path TO {}", schema);
            Box::pin(async move {
                conn.execute(set_search_path.as_str()).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

/// Create the schema the engine lives in, if it does not exist yet.
///
/// Runs against a throwaway single connection so the pooled connections can
/// assume the schema is present when their `search_path` is set.
pub async fn ensure_schema(database_url: &str, schema_prefix: &str) -> Result<(), sqlx::Error> {
    let mut conn = sqlx::postgres::PgConnection::connect(database_url).await?;
    let create = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema_prefix));
    conn.execute(create.as_str()).await?;
    Ok(())
}

/// Quote a schema identifier, doubling any embedded quotes.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_wraps_and_escapes() {
        assert_eq!(quote_ident("double_entry_ledger"), "\"double_entry_ledger\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }
}
