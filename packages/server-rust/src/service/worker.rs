//! Background worker for periodic and on-demand tasks.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc channel
//! via a `BackgroundRunnable` implementation, with periodic tick callbacks.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

/// Trait for task handlers executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called once per tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down, before `stop` returns.
    async fn shutdown(&mut self) {}
}

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The spawned task runs until [`stop`](Self::stop) is called or every sender
/// is dropped. Ticks and tasks never run concurrently with each other, and
/// `shutdown` always runs last.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Starts the worker. The first tick fires one full `tick_interval` after
    /// start. The channel capacity is fixed at 256.
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(256);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            // A slow flush should not be followed by a burst of catch-up ticks.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submit a task to the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Whether `stop` has not been called yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the worker gracefully, waiting for `shutdown` to complete.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
