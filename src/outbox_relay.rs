//! Link fan-out relay
//!
//! Drains the `link_outbox` and materializes journal link rows with
//! at-least-once delivery. The link tables' unique constraints make
//! replays harmless, so a crash between insert and mark-published only
//! costs a redundant pass. A missing link row never invalidates the
//! journal event it belongs to.

use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::repos::journal_repo::{self, JournalError};
use crate::repos::outbox_repo::{self, LinkOutboxItem};

const BATCH_SIZE: i64 = 50;

/// Start the background relay task
pub fn start_link_relay(
    pool: PgPool,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Link relay started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match outbox_repo::fetch_unpublished(&pool, BATCH_SIZE).await {
                Ok(items) => {
                    for item in items {
                        match publish_links(&pool, &item).await {
                            Ok(()) => {
                                if let Err(e) = outbox_repo::mark_published(&pool, item.id).await {
                                    tracing::error!(
                                        outbox_id = %item.id,
                                        error = %e,
                                        "Failed to mark outbox item published"
                                    );
                                }
                            }
                            Err(e) => {
                                tracing::warn!(
                                    outbox_id = %item.id,
                                    journal_event_id = %item.journal_event_id,
                                    attempts = item.attempts + 1,
                                    error = %e,
                                    "Link fan-out failed, will retry"
                                );
                                if let Err(e) = outbox_repo::mark_attempt(&pool, item.id).await {
                                    tracing::error!(
                                        outbox_id = %item.id,
                                        error = %e,
                                        "Failed to record outbox attempt"
                                    );
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read link outbox");
                }
            }

            tokio::select! {
                _ = sleep(poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        tracing::info!("Link relay stopped");
    })
}

/// Insert every link row one outbox item calls for
async fn publish_links(pool: &PgPool, item: &LinkOutboxItem) -> Result<(), JournalError> {
    journal_repo::insert_command_link(pool, item.journal_event_id, item.command_id).await?;

    if let Some(transaction_id) = item.transaction_id {
        journal_repo::insert_transaction_link(pool, item.journal_event_id, transaction_id).await?;
    }

    for account_id in &item.account_ids {
        journal_repo::insert_account_link(pool, item.journal_event_id, *account_id).await?;
    }

    Ok(())
}
