//! Component H's tick loop: scan pending Exists, claim a batch, verify them
//! on a bounded worker pool, and drain results with a periodic progress log
//! (the "reaper", §4.H / §10.5).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use iaudit_store::Store;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::error::VerifyError;
use crate::publisher::Publisher;
use crate::worker;

/// One batch of `find_pending_exists` per tick. Large enough that a healthy
/// deployment drains its backlog in one tick; not unbounded, so one tick
/// can't grow without limit while the store is under load.
const PENDING_BATCH_LIMIT: usize = 1_000;
const REAPER_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub tick_time: Duration,
    pub settle_time: Duration,
    pub pool_size: usize,
    pub run_once: bool,
}

pub struct Verifier {
    store: Arc<dyn Store>,
    publisher: Option<Arc<dyn Publisher>>,
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(store: Arc<dyn Store>, publisher: Option<Arc<dyn Publisher>>, config: VerifierConfig) -> Self {
        Verifier { store, publisher, config }
    }

    /// Runs ticks forever, or exactly once if `run_once` is set.
    pub async fn run(&self) -> Result<(), VerifyError> {
        loop {
            self.tick().await?;
            if self.config.run_once {
                return Ok(());
            }
            tokio::time::sleep(self.config.tick_time).await;
        }
    }

    async fn tick(&self) -> Result<(), VerifyError> {
        let ending_max = Utc::now() - self.config.settle_time;
        let pending = self.store.find_pending_exists(ending_max, PENDING_BATCH_LIMIT).await?;
        if pending.is_empty() {
            debug!("no pending exists records to verify");
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.pool_size.max(1)));
        let (tx, rx) = mpsc::channel::<bool>(pending.len().max(1));
        let mut spawned = 0usize;

        for candidate in pending {
            let Some(claimed) = self.store.try_begin_verification(candidate.id).await? else { continue };
            let store = self.store.clone();
            let publisher = self.publisher.clone();
            let permit = semaphore.clone();
            let tx = tx.clone();
            spawned += 1;

            tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore is never closed");
                let (verified, exists) = worker::verify_one(store.as_ref(), claimed).await;
                if verified {
                    if let Some(publisher) = &publisher {
                        if let Err(e) = publisher.publish(&exists).await {
                            warn!(
                                instance_id = %exists.instance_id,
                                error = %e,
                                "publish failed, verified status kept (recoverable, retried next opportunity)"
                            );
                        }
                    }
                }
                let _ = tx.send(verified).await;
            });
        }
        drop(tx); // the channel closes once every spawned task's clone is dropped

        reap(spawned, rx).await;
        Ok(())
    }
}

/// Drains verify-task results from the mpsc channel the pool's tasks report
/// into, logging a progress line roughly every 30 seconds with
/// pending/finished/verified/failed counts.
async fn reap(total: usize, mut results: mpsc::Receiver<bool>) {
    let mut verified = 0usize;
    let mut failed = 0usize;
    let mut ticker = tokio::time::interval(REAPER_LOG_INTERVAL);
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            next = results.recv() => {
                match next {
                    Some(true) => verified += 1,
                    Some(false) => failed += 1,
                    None => break,
                }
            }
            _ = ticker.tick() => {
                let finished = verified + failed;
                info!(pending = total - finished, finished, verified, failed, "verifier progress");
            }
        }
    }

    info!(total, verified, failed, "tick complete");
}
