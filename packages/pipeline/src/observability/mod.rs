// packages/pipeline/src/observability/mod.rs
//! Diagnostic logging and metrics export
//!
//! The logger reports its own failures through `tracing` and counts writes
//! through `metrics`. Both are process-global, so installing them twice is a
//! no-op rather than an error.
//!
//! Counters:
//! - `aspect_logger_events_written_total{writer}`
//! - `aspect_logger_write_failures_total{writer}`
//! - `aspect_logger_writers_pruned_total{writer}`
//! - `aspect_logger_pages_inserted_total`

use crate::utils::config::ObservabilityConfig;
use crate::utils::errors::{LoggerError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static METRICS_INSTALLED: OnceCell<SocketAddr> = OnceCell::new();

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Returns `false` when a
/// subscriber was already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .is_ok()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .is_ok()
    };

    if installed {
        debug!("Tracing initialized at level {}", config.log_level);
    }

    installed
}

/// Start the Prometheus exporter if an address is configured.
///
/// Returns the listen address, or `None` when export is disabled.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<Option<SocketAddr>> {
    let Some(raw) = config.metrics_address.as_deref() else {
        return Ok(None);
    };

    let addr: SocketAddr = raw
        .parse()
        .map_err(|e| LoggerError::Configuration(format!("invalid metrics address {}: {}", raw, e)))?;

    let bound = METRICS_INSTALLED.get_or_try_init(|| {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| LoggerError::Configuration(format!("Failed to install metrics exporter: {}", e)))?;

        info!("Metrics exporter listening on {}", addr);
        Ok::<_, LoggerError>(addr)
    })?;

    Ok(Some(*bound))
}
