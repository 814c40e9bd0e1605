use std::sync::LazyLock;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static RECONCILE_TICKS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "pvcviewer_reconcile_ticks_total",
        "Total reconcile ticks executed",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static RECONCILE_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "pvcviewer_reconcile_errors_total",
        "Total reconcile ticks that ended in error",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static TARGETS_DESIRED: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new(
        "pvcviewer_targets_desired",
        "PVC targets selected by the last discovery pass",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static CONFIG_RELOADS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "pvcviewer_config_reloads_total",
        "Successful configuration reloads",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static PROXY_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "pvcviewer_proxy_requests_total",
            "Requests forwarded to agents, by endpoint",
        ),
        &["endpoint"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

/// Touch every metric so zero-valued series appear on /metrics from startup.
pub fn force_init() {
    LazyLock::force(&RECONCILE_TICKS);
    LazyLock::force(&RECONCILE_ERRORS);
    LazyLock::force(&TARGETS_DESIRED);
    LazyLock::force(&CONFIG_RELOADS);
    LazyLock::force(&PROXY_REQUESTS);
}

pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}
