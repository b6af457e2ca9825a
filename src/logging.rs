//! Log filter setup.
//!
//! `RUST_LOG` directives take precedence; INFO applies only when none
//! are given.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Builds the filter from `RUST_LOG`, defaulting to INFO.
pub fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Builds the filter from explicit directives, defaulting to INFO.
pub fn filter_from(directives: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(directives)
}
