use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::Settings;

/// Builds the default directive set for the pipeline. The configured level
/// applies to our own spans; chatty dependencies are capped at `warn` so
/// per-query and per-request noise does not drown provider and job logs.
fn default_filter(level: &str) -> String {
    format!("{level},sqlx=warn,hyper=warn,hyper_util=warn,aws_config=warn,aws_smithy_runtime=warn")
}

pub fn init_tracing(settings: &Settings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&settings.telemetry().log_level)));

    let builder = fmt().with_env_filter(filter).with_target(false);

    if settings.telemetry().json {
        builder
            .json()
            .with_span_events(fmt::format::FmtSpan::CLOSE)
            .try_init()
            .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    } else {
        builder
            .with_span_events(fmt::format::FmtSpan::CLOSE)
            .try_init()
            .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use tracing_subscriber::EnvFilter;

    use super::default_filter;

    #[test]
    fn default_filter_parses_and_caps_dependency_noise() {
        let directives = default_filter("debug");

        assert!(EnvFilter::from_str(&directives).is_ok());
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("sqlx=warn"));
    }
}
