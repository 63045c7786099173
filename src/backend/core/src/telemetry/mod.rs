//! Telemetry: structured logging and policy metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_core::telemetry::{init_telemetry, LoggingConfig};
//!
//! init_telemetry(&LoggingConfig::default(), "production").expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, PolicyMetrics};

/// Install logging and describe metrics.
pub fn init_telemetry(logging: &LoggingConfig, environment: &str) -> anyhow::Result<()> {
    init_logging(logging, environment)?;
    init_metrics();

    tracing::info!(
        environment = environment,
        format = ?logging.format,
        "Telemetry initialized"
    );
    Ok(())
}
