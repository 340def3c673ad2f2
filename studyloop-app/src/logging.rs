//! Tracing setup for the binary.
//!
//! Logs always go to stderr so CLI output on stdout stays clean.
//! `RUST_LOG` overrides the default filter (e.g. `RUST_LOG=debug,sqlx=warn`).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::cli::opts::LogFormat;

/// Quiet default for one-shot commands.
pub const CLI_FILTER: &str = "warn";
/// Default for the long-running API server.
pub const SERVER_FILTER: &str = "info,tower_http=debug,sqlx=warn";

pub fn init_tracing(format: LogFormat, default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_filter(env_filter),
            )
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .flatten_event(true)
                    .with_target(true)
                    .with_filter(env_filter),
            )
            .init(),
    }

    tracing::debug!(?format, "tracing initialized");
}
