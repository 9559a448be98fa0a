//! Prometheus metrics for the worker pool.

use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Worker pool metrics registry.
pub struct PoolMetrics {
    registry: Registry,

    /// Live worker tasks
    pub workers_live: Gauge,

    /// Workers parked on the idle stack
    pub workers_idle: Gauge,

    /// Connections handed to a worker
    pub connections_served_total: IntCounter,

    /// Connections refused by `serve`, by reason
    pub connections_rejected_total: IntCounterVec,

    /// Handler errors by kind (transient ones included)
    pub handler_errors_total: IntCounterVec,

    /// Workers evicted by the idle reaper
    pub workers_reaped_total: IntCounter,
}

impl PoolMetrics {
    /// Create a registry with all pool metrics. `prefix` namespaces the names.
    pub fn new(prefix: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let workers_live = Gauge::new(format!("{prefix}_workers_live"), "Live worker tasks")?;
        registry.register(Box::new(workers_live.clone()))?;

        let workers_idle = Gauge::new(
            format!("{prefix}_workers_idle"),
            "Workers parked on the idle stack",
        )?;
        registry.register(Box::new(workers_idle.clone()))?;

        let connections_served_total = IntCounter::new(
            format!("{prefix}_connections_served_total"),
            "Connections handed to a worker",
        )?;
        registry.register(Box::new(connections_served_total.clone()))?;

        let connections_rejected_total = IntCounterVec::new(
            Opts::new(
                format!("{prefix}_connections_rejected_total"),
                "Connections refused by the worker pool",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(connections_rejected_total.clone()))?;

        let handler_errors_total = IntCounterVec::new(
            Opts::new(
                format!("{prefix}_handler_errors_total"),
                "Connection handler errors",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(handler_errors_total.clone()))?;

        let workers_reaped_total = IntCounter::new(
            format!("{prefix}_workers_reaped_total"),
            "Workers evicted after idling too long",
        )?;
        registry.register(Box::new(workers_reaped_total.clone()))?;

        Ok(Self {
            registry,
            workers_live,
            workers_idle,
            connections_served_total,
            connections_rejected_total,
            handler_errors_total,
            workers_reaped_total,
        })
    }

    pub fn record_rejected(&self, reason: &str) {
        self.connections_rejected_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_handler_error(&self, kind: &str) {
        self.handler_errors_total.with_label_values(&[kind]).inc();
    }

    pub fn update_worker_gauges(&self, live: usize, idle: usize) {
        self.workers_live.set(live as f64);
        self.workers_idle.set(idle as f64);
    }

    /// Render all metrics in the Prometheus text format.
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Get the Prometheus registry (for custom metrics).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
