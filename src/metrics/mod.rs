use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for the event store
// ============================================================================
//
// Covers:
// - Events appended and aggregates loaded, per aggregate type
// - Optimistic concurrency conflicts
// - Envelopes published on the bus
// - Append latency
//
// Each `Metrics` owns its registry; `render` produces the text exposition
// format for whatever endpoint the host application runs.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    pub events_appended: IntCounterVec,
    pub concurrency_conflicts: IntCounterVec,
    pub aggregates_loaded: IntCounterVec,
    pub events_published: IntCounter,
    pub append_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_appended = IntCounterVec::new(
            Opts::new("es_events_appended_total", "Total events appended to the store"),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(events_appended.clone()))?;

        let concurrency_conflicts = IntCounterVec::new(
            Opts::new(
                "es_concurrency_conflicts_total",
                "Appends rejected by the expected-version check",
            ),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(concurrency_conflicts.clone()))?;

        let aggregates_loaded = IntCounterVec::new(
            Opts::new("es_aggregates_loaded_total", "Aggregates rebuilt from their stream"),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(aggregates_loaded.clone()))?;

        let events_published = IntCounter::new(
            "es_events_published_total",
            "Envelopes handed to the event bus after a save",
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let append_duration = HistogramVec::new(
            HistogramOpts::new("es_append_duration_seconds", "Event store append latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        Ok(Self {
            registry,
            events_appended,
            concurrency_conflicts,
            aggregates_loaded,
            events_published,
            append_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_append(&self, aggregate_type: &str, event_count: usize, duration_secs: f64) {
        self.events_appended
            .with_label_values(&[aggregate_type])
            .inc_by(event_count as u64);
        self.append_duration
            .with_label_values(&[aggregate_type])
            .observe(duration_secs);
    }

    pub fn record_conflict(&self, aggregate_type: &str) {
        self.concurrency_conflicts
            .with_label_values(&[aggregate_type])
            .inc();
    }

    pub fn record_load(&self, aggregate_type: &str) {
        self.aggregates_loaded.with_label_values(&[aggregate_type]).inc();
    }

    pub fn record_published(&self, count: usize) {
        self.events_published.inc_by(count as u64);
    }

    /// Prometheus text exposition of everything in the registry.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
