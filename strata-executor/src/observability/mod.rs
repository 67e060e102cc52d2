//! Logging setup for Strata controllers.
//!
//! Log format is controlled via `STRATA_LOG_FORMAT`:
//! - `json` - Structured JSON output
//! - `pretty` - Human-readable multi-line output
//! - `compact` - Single-line output (default)
//!
//! The filter comes from `STRATA_LOG`, then `RUST_LOG`, then `info`.
//!
//! # Example
//!
//! ```ignore
//! use strata_executor::observability::{TracingConfig, init_tracing};
//!
//! let _guard = init_tracing(TracingConfig::from_env())?;
//! ```

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig, TracingConfigBuilder};
pub use tracing_setup::{TracingGuard, init_tracing};

/// Span for the execution of one job on one controller.
#[macro_export]
macro_rules! instrument_job {
    ($node:expr, $job:expr, $operation:expr) => {
        tracing::info_span!(
            "job_execution",
            node = %$node,
            job = %$job,
            operation = $operation
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.log_format(), LogFormat::Compact);
        assert_eq!(config.log_filter(), "info");
    }

    #[test]
    fn config_builder() {
        let config = TracingConfig::builder()
            .log_format(LogFormat::Json)
            .log_filter("debug,strata_core=trace")
            .include_location(true)
            .build();

        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.log_filter(), "debug,strata_core=trace");
        assert!(config.include_location());
        assert!(!config.include_thread_names());
    }

    #[test]
    fn unknown_format_falls_back() {
        assert_eq!("xml".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
    }

    #[test]
    fn second_init_fails() {
        let first = init_tracing(TracingConfig::default());
        let second = init_tracing(TracingConfig::default());
        // Whichever test installed the subscriber first, the second attempt fails
        assert!(first.is_err() || second.is_err());
    }
}
