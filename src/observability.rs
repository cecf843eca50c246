//! Logging and metrics wiring, matching the teacher's use of `tracing` for
//! structured logs and `prometheus` for counters/gauges exported over a
//! pull endpoint the operator wires up separately.

use std::sync::OnceLock;

use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};
use tracing_subscriber::{fmt, EnvFilter};

/// Install a `tracing` subscriber reading filter directives from
/// `RUST_LOG` (defaulting to `info`), writing structured logs to stdout.
/// Idempotent: safe to call from multiple binaries/tests in the same
/// process, though only the first call takes effect.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}

/// Process-wide Prometheus metrics. Constructed once via [`metrics`].
pub struct Metrics {
    /// Registry every metric below is registered against.
    pub registry: Registry,
    /// Requests completed, labeled by workflow id and stop reason.
    pub requests_total: IntCounterVec,
    /// Node execution latency, in seconds.
    pub node_latency_seconds: Histogram,
    /// Currently resident worker count.
    pub resident_workers: IntGauge,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("orchestrator_requests_total", "Completed requests by workflow and stop reason"),
            &["workflow", "reason"],
        )
        .expect("static metric descriptor");
        let node_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "orchestrator_node_latency_seconds",
            "Per-node execution latency",
        ))
        .expect("static metric descriptor");
        let resident_workers = IntGauge::new("orchestrator_resident_workers", "Workers currently resident").expect("static metric descriptor");

        registry.register(Box::new(requests_total.clone())).expect("single registration");
        registry.register(Box::new(node_latency_seconds.clone())).expect("single registration");
        registry.register(Box::new(resident_workers.clone())).expect("single registration");

        Self {
            registry,
            requests_total,
            node_latency_seconds,
            resident_workers,
        }
    }
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Process-wide metrics registry, lazily constructed on first use.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
