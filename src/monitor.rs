//! Instance monitor
//!
//! Periodically scans for tenants with claimable queue items and ensures a
//! processor task exists for each. The registry guarantees at most one
//! processor per instance within this process; cross-process exclusion
//! rests on the queue's atomic claim, the registry is an optimization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::EngineOptions;
use crate::processor;
use crate::repos::queue_repo;

/// Process-wide map of running processors, keyed by instance
#[derive(Default)]
pub struct ProcessorRegistry {
    inner: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a processor for the instance unless one is already running
    fn ensure<F>(&self, instance_id: Uuid, spawn: F)
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut map = self.inner.lock().expect("processor registry poisoned");

        map.retain(|_, handle| !handle.is_finished());

        if !map.contains_key(&instance_id) {
            map.insert(instance_id, spawn());
        }
    }

    /// Take every live handle, leaving the registry empty
    fn drain(&self) -> Vec<JoinHandle<()>> {
        let mut map = self.inner.lock().expect("processor registry poisoned");
        map.drain().map(|(_, handle)| handle).collect()
    }

    pub fn active_count(&self) -> usize {
        let mut map = self.inner.lock().expect("processor registry poisoned");
        map.retain(|_, handle| !handle.is_finished());
        map.len()
    }
}

/// Start the instance monitor task
///
/// Each tick queries the distinct instances with claimable work and spawns
/// missing processors. The registry is shared with the HTTP layer so the
/// health endpoint can report how many processors are live. On shutdown
/// the monitor waits for every active processor to finish its current
/// item before returning.
pub fn start_instance_monitor(
    pool: PgPool,
    opts: EngineOptions,
    registry: Arc<ProcessorRegistry>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            poll_interval_ms = opts.poll_interval.as_millis() as u64,
            "Instance monitor started"
        );

        let mut shutdown_rx = shutdown.clone();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match queue_repo::claimable_instances(&pool).await {
                Ok(instance_ids) => {
                    for instance_id in instance_ids {
                        let pool = pool.clone();
                        let opts = opts.clone();
                        let shutdown = shutdown.clone();
                        registry.ensure(instance_id, || {
                            tokio::spawn(processor::run(pool, instance_id, opts, shutdown))
                        });
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to scan for claimable instances");
                }
            }

            tokio::select! {
                _ = sleep(opts.poll_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }

        // Drain: let in-flight items finish their current claim.
        let handles = registry.drain();
        tracing::info!(active = handles.len(), "Instance monitor draining processors");
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Processor task panicked during drain");
                }
            }
        }

        tracing::info!("Instance monitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_spawns_once_per_instance() {
        let registry = ProcessorRegistry::new();
        let instance_id = Uuid::new_v4();

        registry.ensure(instance_id, || tokio::spawn(std::future::pending::<()>()));
        registry.ensure(instance_id, || panic!("second spawn for the same instance"));

        assert_eq!(registry.active_count(), 1);

        for handle in registry.drain() {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn registry_prunes_finished_processors() {
        let registry = ProcessorRegistry::new();
        let instance_id = Uuid::new_v4();

        registry.ensure(instance_id, || tokio::spawn(async {}));

        // Give the no-op task a moment to finish.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(registry.active_count(), 0);

        // A finished processor may be replaced.
        registry.ensure(instance_id, || tokio::spawn(std::future::pending::<()>()));
        assert_eq!(registry.active_count(), 1);

        for handle in registry.drain() {
            handle.abort();
        }
    }
}
