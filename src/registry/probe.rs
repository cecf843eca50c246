//! Periodic health probe driving [`super::WorkerRegistry`] health
//! transitions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::WorkerRegistry;

/// Outcome of a single probe attempt against one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The worker responded within the probe budget.
    Success,
    /// The worker failed to respond or returned an error.
    Failure,
}

/// A probe function: given a worker id, report whether it is reachable.
/// Boxed so the task can hold a trait-object prober supplied by whatever
/// external collaborator knows how to ping each worker kind.
pub type ProbeFn =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ProbeOutcome> + Send>> + Send + Sync>;

/// Drives the periodic probe loop described in the Worker Registry design:
/// every `interval`, probe every registered worker and feed the outcome
/// into its health state machine.
pub struct ProbeTask {
    registry: WorkerRegistry,
    probe: ProbeFn,
    interval: Duration,
}

impl ProbeTask {
    /// Construct a probe task over `registry`, calling `probe` for each
    /// worker id on each tick.
    #[must_use]
    pub fn new(registry: WorkerRegistry, probe: ProbeFn, interval: Duration) -> Self {
        Self {
            registry,
            probe,
            interval,
        }
    }

    /// Run the probe loop until cancelled. Intended to be spawned as a
    /// long-lived `tokio::task`.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            for worker in self.registry.list(None, None) {
                let outcome = (self.probe)(worker.id.clone()).await;
                match outcome {
                    ProbeOutcome::Success => debug!(worker = %worker.id, "probe succeeded"),
                    ProbeOutcome::Failure => warn!(worker = %worker.id, "probe failed"),
                }
                self.registry
                    .record_probe_outcome(&worker.id, outcome == ProbeOutcome::Success);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Health, WorkerDescriptor, WorkerKind, Warmth};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn three_consecutive_failures_marks_unavailable() {
        let registry = WorkerRegistry::new();
        registry.register(WorkerDescriptor::new(
            "w1",
            WorkerKind::LocalInference,
            1024,
            0.0,
            Warmth::T0,
            0,
        ));

        for _ in 0..3 {
            registry.record_probe_outcome("w1", false);
        }

        assert_eq!(registry.get("w1").unwrap().health, Health::Unavailable);
    }

    #[tokio::test]
    async fn probe_task_runs_prober_per_worker_per_tick() {
        let registry = WorkerRegistry::new();
        registry.register(WorkerDescriptor::new(
            "w1",
            WorkerKind::LocalInference,
            1024,
            0.0,
            Warmth::T0,
            0,
        ));

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let probe: ProbeFn = Arc::new(move |_id| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                ProbeOutcome::Success
            })
        });

        let task = ProbeTask::new(registry.clone(), probe, Duration::from_millis(5));
        let handle = tokio::spawn(task.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.abort();

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(registry.get("w1").unwrap().health, Health::Ready);
    }
}
