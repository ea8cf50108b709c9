//! Per-tenant command processor
//!
//! A processor is a cooperative task owning one instance's queue: it claims
//! the oldest claimable item, dispatches the matching worker, and settles
//! the item. Commands within a tenant therefore apply strictly in claim
//! order; parallelism only exists across tenants.
//!
//! When the queue runs dry the processor idles for one poll period and
//! exits; the instance monitor respawns it when new work arrives.

use sqlx::PgPool;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{EngineOptions, OnError};
use crate::repos::command_repo;
use crate::repos::queue_repo::{self, FailureKind, QueueError, QueueItem};
use crate::workers::{self, FailureClass, Projection, WorkerError};

pub async fn run(
    pool: PgPool,
    instance_id: Uuid,
    opts: EngineOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let processor_id = format!("{}-{}", opts.processor_name, Uuid::new_v4());

    tracing::debug!(
        instance_id = %instance_id,
        processor_id = %processor_id,
        "Processor started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = match queue_repo::next_claimable(&pool, instance_id).await {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(
                    instance_id = %instance_id,
                    error = %e,
                    "Failed to read queue, backing off one poll period"
                );
                idle(&mut shutdown, &opts).await;
                continue;
            }
        };

        let Some(item) = next else {
            // Queue is dry: idle once, then exit and let the monitor
            // respawn on new work.
            idle(&mut shutdown, &opts).await;
            break;
        };

        let claimed = match queue_repo::claim(&pool, item.id, item.row_version, &processor_id).await
        {
            Ok(claimed) => claimed,
            Err(QueueError::AlreadyClaimed { item_id }) => {
                tracing::debug!(
                    instance_id = %instance_id,
                    item_id = %item_id,
                    "Item claimed elsewhere, moving on"
                );
                continue;
            }
            Err(e) => {
                tracing::error!(
                    instance_id = %instance_id,
                    item_id = %item.id,
                    error = %e,
                    "Claim failed, backing off one poll period"
                );
                idle(&mut shutdown, &opts).await;
                continue;
            }
        };

        let command = match command_repo::find_by_id(&pool, claimed.command_id).await {
            Ok(Some(command)) => command,
            Ok(None) => {
                tracing::error!(
                    item_id = %claimed.id,
                    command_id = %claimed.command_id,
                    "Queue item without command row, dead-lettering"
                );
                if let Err(e) =
                    queue_repo::mark_dead_letter(&pool, claimed.id, "command row missing").await
                {
                    tracing::error!(item_id = %claimed.id, error = %e, "Dead-letter write failed");
                }
                continue;
            }
            Err(e) => {
                tracing::error!(
                    item_id = %claimed.id,
                    error = %e,
                    "Failed to load command, backing off one poll period"
                );
                idle(&mut shutdown, &opts).await;
                continue;
            }
        };

        let span = tracing::info_span!(
            "process_command",
            command_id = %command.id,
            instance_id = %instance_id,
            processor_id = %processor_id,
            action = %command.action.as_str(),
            retry_count = claimed.retry_count,
        );

        let result = workers::execute(&pool, &opts, &command)
            .instrument(span)
            .await;

        settle(&pool, &opts, &claimed, &result).await;
    }

    tracing::debug!(
        instance_id = %instance_id,
        processor_id = %processor_id,
        "Processor stopped"
    );
}

/// Map a worker outcome onto the queue item
///
/// Success marks the item processed. Failures route by class: transients
/// re-queue with backoff, exhausted OCC budgets park as `occ_timeout`, and
/// terminal business rejections go where `on_error` points them.
pub async fn settle(
    pool: &PgPool,
    opts: &EngineOptions,
    item: &QueueItem,
    result: &Result<Projection, WorkerError>,
) {
    let settled = match result {
        Ok(_) => queue_repo::mark_processed(pool, item.id).await,
        Err(e) => {
            let message = e.to_string();
            match e.class() {
                FailureClass::Transient => {
                    queue_repo::mark_failed(pool, item, &message, FailureKind::Failed, &opts.retry)
                        .await
                }
                FailureClass::OccTimeout => {
                    queue_repo::mark_failed(
                        pool,
                        item,
                        &message,
                        FailureKind::OccTimeout,
                        &opts.retry,
                    )
                    .await
                }
                FailureClass::Terminal => match opts.on_error {
                    OnError::Fail => queue_repo::mark_dead_letter(pool, item.id, &message).await,
                    OnError::Retry => {
                        queue_repo::mark_failed(
                            pool,
                            item,
                            &message,
                            FailureKind::Failed,
                            &opts.retry,
                        )
                        .await
                    }
                },
            }
        }
    };

    match settled {
        Ok(updated) => {
            tracing::info!(
                item_id = %updated.id,
                command_id = %updated.command_id,
                status = ?updated.status,
                retry_count = updated.retry_count,
                "Queue item settled"
            );
        }
        Err(e) => {
            tracing::error!(
                item_id = %item.id,
                command_id = %item.command_id,
                error = %e,
                "Failed to settle queue item"
            );
        }
    }
}

async fn idle(shutdown: &mut watch::Receiver<bool>, opts: &EngineOptions) {
    tokio::select! {
        _ = sleep(opts.poll_interval) => {}
        _ = shutdown.changed() => {}
    }
}
