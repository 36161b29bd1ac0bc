//! Reconciliation Scheduler
//!
//! Periodic dispatcher feeding a fixed pool of workers through a bounded
//! queue. Every tick enqueues one job per worker; each job runs one
//! reconciliation cycle. Claims are taken with skip-locked selection, so the
//! workers of one tick pick disjoint orders.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::order::{OrderError, OrderService, ReconcileReport};
use crate::store::Store;

/// One reconciliation cycle, as driven by the scheduler
#[async_trait]
pub trait ReconcileCycle: Send + Sync + 'static {
    async fn run_cycle(&self, batch_limit: usize) -> Result<ReconcileReport, OrderError>;
}

#[async_trait]
impl<S: Store> ReconcileCycle for OrderService<S> {
    async fn run_cycle(&self, batch_limit: usize) -> Result<ReconcileReport, OrderError> {
        self.reconcile(batch_limit).await
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of workers, and jobs enqueued per tick
    pub pool_size: usize,
    pub interval: Duration,
    /// Orders claimed per cycle
    pub batch_limit: usize,
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            interval: Duration::from_secs(1),
            batch_limit: 5,
            queue_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileJob {
    pub tick: u64,
    pub slot: usize,
    pub batch_limit: usize,
}

/// Running scheduler. Call [`ReconciliationScheduler::stop`] to shut it down.
pub struct ReconciliationScheduler {
    shutdown: CancellationToken,
    dispatcher: JoinHandle<()>,
    workers: JoinSet<()>,
}

impl ReconciliationScheduler {
    /// Spawn the dispatcher and `pool_size` workers on the current runtime
    pub fn start<R: ReconcileCycle>(reconciler: Arc<R>, config: SchedulerConfig) -> Self {
        let pool_size = config.pool_size.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let queue = Arc::new(Mutex::new(rx));
        let shutdown = CancellationToken::new();

        let mut workers = JoinSet::new();
        for worker_id in 0..pool_size {
            workers.spawn(run_worker(worker_id, reconciler.clone(), queue.clone()));
        }

        let dispatcher = tokio::spawn(run_dispatcher(
            tx,
            config.interval,
            pool_size,
            config.batch_limit,
            shutdown.clone(),
        ));

        info!(
            pool_size,
            interval_ms = config.interval.as_millis() as u64,
            batch_limit = config.batch_limit,
            "Reconciliation scheduler started"
        );

        Self {
            shutdown,
            dispatcher,
            workers,
        }
    }

    /// Stop ticking, close the queue and wait for workers to drain it
    pub async fn stop(mut self) {
        self.shutdown.cancel();

        if let Err(e) = self.dispatcher.await {
            error!(error = %e, "Reconciliation dispatcher failed");
        }

        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "Reconciliation worker panicked");
                } else {
                    warn!(error = %e, "Reconciliation worker cancelled");
                }
            }
        }

        info!("Reconciliation scheduler stopped");
    }
}

async fn run_dispatcher(
    tx: mpsc::Sender<ReconcileJob>,
    interval: Duration,
    pool_size: usize,
    batch_limit: usize,
    shutdown: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    'ticks: loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tick += 1;
        for slot in 0..pool_size {
            let job = ReconcileJob {
                tick,
                slot,
                batch_limit,
            };
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'ticks,
                sent = tx.send(job) => {
                    if sent.is_err() {
                        break 'ticks;
                    }
                }
            }
        }
    }

    // Dropping the sender closes the queue; idle workers see `None` and exit
    drop(tx);
    debug!(ticks = tick, "Reconciliation dispatcher stopped");
}

async fn run_worker<R: ReconcileCycle>(
    worker_id: usize,
    reconciler: Arc<R>,
    queue: Arc<Mutex<mpsc::Receiver<ReconcileJob>>>,
) {
    loop {
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        match reconciler.run_cycle(job.batch_limit).await {
            Ok(report) => {
                if report.claimed > 0 {
                    debug!(
                        worker_id,
                        tick = job.tick,
                        claimed = report.claimed,
                        updated = report.updated,
                        "Reconciliation job done"
                    );
                }
            }
            Err(e) => {
                error!(worker_id, tick = job.tick, error = %e, "Reconciliation cycle failed");
            }
        }
    }
    debug!(worker_id, "Reconciliation worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingReconciler {
        started: AtomicUsize,
        finished: AtomicUsize,
        work: Duration,
        fail: bool,
    }

    #[async_trait]
    impl ReconcileCycle for CountingReconciler {
        async fn run_cycle(&self, _batch_limit: usize) -> Result<ReconcileReport, OrderError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if !self.work.is_zero() {
                tokio::time::sleep(self.work).await;
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::Backend("cycle failed".into()).into());
            }
            Ok(ReconcileReport::default())
        }
    }

    fn config(pool_size: usize, interval_ms: u64) -> SchedulerConfig {
        SchedulerConfig {
            pool_size,
            interval: Duration::from_millis(interval_ms),
            ..SchedulerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_ticks_dispatch_jobs_to_pool() {
        let reconciler = Arc::new(CountingReconciler::default());
        let scheduler = ReconciliationScheduler::start(reconciler.clone(), config(2, 20));

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.stop().await;

        assert!(reconciler.finished.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn test_first_tick_waits_one_interval() {
        let reconciler = Arc::new(CountingReconciler::default());
        let scheduler = ReconciliationScheduler::start(reconciler.clone(), config(3, 10_000));

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;

        assert_eq!(reconciler.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_drains_queued_jobs() {
        let reconciler = Arc::new(CountingReconciler {
            work: Duration::from_millis(100),
            ..Default::default()
        });
        let scheduler = ReconciliationScheduler::start(
            reconciler.clone(),
            SchedulerConfig {
                queue_capacity: 3,
                ..config(1, 10)
            },
        );

        while reconciler.started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // One job running, the queue fills up behind it
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.stop().await;

        assert_eq!(reconciler.started.load(Ordering::SeqCst), 4);
        assert_eq!(reconciler.finished.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failed_cycles_keep_worker_alive() {
        let reconciler = Arc::new(CountingReconciler {
            fail: true,
            ..Default::default()
        });
        let scheduler = ReconciliationScheduler::start(reconciler.clone(), config(1, 15));

        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.stop().await;

        assert!(reconciler.started.load(Ordering::SeqCst) >= 2);
    }
}
