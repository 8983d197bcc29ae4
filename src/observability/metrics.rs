use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_outcomes_total: IntCounterVec,
    pub dispatch_latency_seconds: HistogramVec,
    pub ws_connections: IntGauge,
    pub broadcast_evictions_total: IntCounter,
    pub chat_messages_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_outcomes_total = IntCounterVec::new(
            Opts::new("dispatch_outcomes_total", "Booking transitions by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_outcomes_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of dispatch operations in seconds",
            ),
            &["operation"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let ws_connections = IntGauge::new("ws_connections", "Currently open duplex connections")
            .expect("valid ws_connections metric");

        let broadcast_evictions_total = IntCounter::new(
            "broadcast_evictions_total",
            "Connections evicted after a failed delivery",
        )
        .expect("valid broadcast_evictions_total metric");

        let chat_messages_total = IntCounterVec::new(
            Opts::new("chat_messages_total", "Chat messages relayed by kind"),
            &["kind"],
        )
        .expect("valid chat_messages_total metric");

        registry
            .register(Box::new(dispatch_outcomes_total.clone()))
            .expect("register dispatch_outcomes_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(ws_connections.clone()))
            .expect("register ws_connections");
        registry
            .register(Box::new(broadcast_evictions_total.clone()))
            .expect("register broadcast_evictions_total");
        registry
            .register(Box::new(chat_messages_total.clone()))
            .expect("register chat_messages_total");

        Self {
            registry,
            dispatch_outcomes_total,
            dispatch_latency_seconds,
            ws_connections,
            broadcast_evictions_total,
            chat_messages_total,
        }
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.dispatch_outcomes_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
