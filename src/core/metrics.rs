use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

/// Registers help text for the counters the pipeline emits, so the exposition
/// carries descriptions instead of bare series names.
fn describe() {
    metrics::describe_counter!(
        "provider_attempts_total",
        "Provider chain attempts, labelled by provider name and outcome"
    );
    metrics::describe_counter!(
        "extraction_jobs_total",
        "Question extraction jobs, labelled by final status"
    );
    metrics::describe_counter!(
        "grading_jobs_total",
        "Answer sheet grading jobs, labelled by final status"
    );
}

pub fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}
