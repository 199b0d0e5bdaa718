//! Periodic persistence of the write-back domains.
//!
//! [`FlushScheduler`] runs a [`FlushRunnable`] on a [`BackgroundWorker`]:
//! every tick flushes all domains and purges stale cooldowns, `FlushNow`
//! forces a flush between ticks, and stopping the scheduler performs one last
//! flush before [`FlushScheduler::stop`] returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::state::{FlushSummary, StateCache};
use super::worker::{BackgroundRunnable, BackgroundWorker};

#[derive(Debug)]
pub enum FlushTask {
    /// Flush every domain now and reply with the outcome.
    FlushNow { reply: oneshot::Sender<FlushSummary> },
}

pub struct FlushRunnable {
    cache: Arc<StateCache>,
}

impl FlushRunnable {
    #[must_use]
    pub fn new(cache: Arc<StateCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl BackgroundRunnable for FlushRunnable {
    type Task = FlushTask;

    async fn run(&mut self, task: FlushTask) {
        match task {
            FlushTask::FlushNow { reply } => {
                let summary = self.cache.flush_all().await;
                info!(
                    rows = summary.written(),
                    failures = summary.failures.len(),
                    "Manual flush"
                );
                let _ = reply.send(summary);
            }
        }
    }

    async fn on_tick(&mut self) {
        let summary = self.cache.flush_all().await;
        let purged = self.cache.purge_cooldowns();
        if summary.written() > 0 || purged > 0 {
            debug!(rows = summary.written(), purged, "Flush cycle");
        }
    }

    async fn shutdown(&mut self) {
        let summary = self.cache.flush_all().await;
        if summary.is_ok() {
            info!(rows = summary.written(), "Final flush complete");
        } else {
            warn!(
                rows = summary.written(),
                failures = summary.failures.len(),
                "Final flush incomplete; unflushed changes are lost"
            );
        }
    }
}

/// Handle to the running flush loop.
pub struct FlushScheduler {
    worker: BackgroundWorker<FlushRunnable>,
}

impl FlushScheduler {
    /// Starts flushing `cache` every `interval`.
    #[must_use]
    pub fn start(cache: Arc<StateCache>, interval: Duration) -> Self {
        info!(interval_secs = interval.as_secs(), "Starting flush scheduler");
        Self {
            worker: BackgroundWorker::start(FlushRunnable::new(cache), interval),
        }
    }

    /// Flushes outside the timer cadence, e.g. before a planned restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler has been stopped.
    pub async fn flush_now(&self) -> anyhow::Result<FlushSummary> {
        let (reply, rx) = oneshot::channel();
        self.worker.submit(FlushTask::FlushNow { reply }).await?;
        Ok(rx.await?)
    }

    /// Cancels the periodic flush and waits for the final flush.
    pub async fn stop(&mut self) {
        self.worker.stop().await;
    }
}
