use std::sync::OnceLock;

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    if PROM_HANDLE.get().is_none() {
        let handle = PrometheusBuilder::new().install_recorder()?;
        let _ = PROM_HANDLE.set(handle);
        describe();
    }
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    describe_counter!("http_requests_total", "HTTP requests by response status");
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request latency by response status"
    );
    describe_counter!("sessions_activated_total", "Sessions moved from draft to active");
    describe_counter!("sessions_closed_total", "Sessions completed or cancelled, by reason");
    describe_counter!("attempts_started_total", "Attempts created on first student access");
    describe_counter!("attempts_sealed_total", "Attempts frozen into a terminal status");
    describe_counter!("scoring_failures_total", "Attempts whose score card could not be built");
    describe_counter!("enforcer_sweeps_total", "Deadline enforcer sweeps by outcome");
    describe_counter!("analytics_snapshots_built_total", "Analytics snapshots computed");
}
