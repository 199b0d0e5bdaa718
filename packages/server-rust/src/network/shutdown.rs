//! Process lifecycle state shared by the operator endpoints and `main`.
//!
//! Health moves Starting -> Ready -> Draining -> Stopped. `Ready` is set once
//! the state cache is hydrated and the flush scheduler runs; `Draining` as
//! soon as shutdown is requested; `Stopped` after the final flush.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

/// Lock-free lifecycle state plus a count of in-flight operator requests.
#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<HealthState>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (signal, _rx) = watch::channel(false);
        Self {
            signal,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(HealthState::Ready));
    }

    /// Moves to `Draining` and wakes every [`wait_for_shutdown`](Self::wait_for_shutdown).
    pub fn trigger_shutdown(&self) {
        self.state.store(Arc::new(HealthState::Draining));
        let _ = self.signal.send(true);
    }

    /// Marks the process as fully stopped; called after the final flush.
    pub fn set_stopped(&self) {
        self.state.store(Arc::new(HealthState::Stopped));
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.state.load()
    }

    /// Resolves once shutdown has been triggered. Suitable for
    /// `axum::serve(..).with_graceful_shutdown`.
    pub fn wait_for_shutdown(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.signal.subscribe();
        async move {
            // A closed channel means the controller is gone; treat it as shutdown.
            let _ = rx.wait_for(|triggered| *triggered).await;
        }
    }

    /// Counts a request as in flight until the guard is dropped.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter on drop, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let controller = ShutdownController::new();
        assert_eq!(controller.health_state(), HealthState::Starting);
        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Ready);
        controller.trigger_shutdown();
        assert_eq!(controller.health_state(), HealthState::Draining);
        controller.set_stopped();
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[test]
    fn in_flight_guard_counts_requests() {
        let controller = ShutdownController::new();
        let a = controller.in_flight_guard();
        let b = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);
        drop(a);
        drop(b);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn wait_for_shutdown_resolves_after_trigger() {
        let controller = Arc::new(ShutdownController::new());
        let waiter = tokio::spawn(controller.wait_for_shutdown());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        controller.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_for_shutdown_after_trigger_is_immediate() {
        let controller = ShutdownController::new();
        controller.trigger_shutdown();
        tokio::time::timeout(Duration::from_millis(100), controller.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[test]
    fn health_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&HealthState::Draining).unwrap(), "\"draining\"");
    }
}
