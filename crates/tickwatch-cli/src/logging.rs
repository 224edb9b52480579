//! Subscriber setup for the `tickwatch` binary.
//!
//! `RUST_LOG` wins when set; otherwise the `logging.level` directive from the
//! config file is used. Output goes to stderr so command results on stdout
//! stay machine-readable.

use tickwatch_core::config::LoggingSection;
use tickwatch_core::LogFormat;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::CliError;

pub fn init(section: &LoggingSection) -> Result<(), CliError> {
    let env_filter = build_filter(&section.level);
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match section.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    result.map_err(|error| CliError::Logging(error.to_string()))
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
