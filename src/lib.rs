//! WireGuard Metrics Exporter Library
//!
//! Samples live WireGuard peer statistics, labels them with client names
//! from an identity mapping file and exposes them as Prometheus gauges.
//!
//! # Architecture
//!
//! One sampler task writes, any number of scrape requests read:
//!
//! ```text
//! wg show all dump → status ─┐
//!                            ├→ sampler → metrics ← GET /metrics
//! wg0.json → identity ───────┘
//! ```
//!
//! # Design Principles
//!
//! - **Never crash on sampling errors**: a failed cycle is logged and the next tick retries
//! - **Named peers only**: peers without a client name are not exported
//! - **Last write wins**: gauges are overwritten each cycle, never summed
//! - **Explicit staleness**: old clients stay exported unless a TTL is configured
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wireguard_exporter::{
//!     metrics::PeerMetrics,
//!     sampler::{Sampler, SamplerConfig},
//!     status::CommandSource,
//! };
//!
//! let metrics = Arc::new(PeerMetrics::new().unwrap());
//! let sampler = Sampler::new(
//!     Box::new(CommandSource::default()),
//!     "/etc/wireguard/wg0.json",
//!     Arc::clone(&metrics),
//!     SamplerConfig::default(),
//! );
//!
//! let report = sampler.run_cycle();
//! println!("published {} clients", report.published);
//! println!("{}", metrics.render().unwrap());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod sampler;
pub mod status;

// Re-export commonly used types at crate root
pub use config::{ConfigError, FileConfig};
pub use identity::{IdentityError, IdentityMap};
pub use metrics::{MetricsServer, MetricsServerConfig, PeerMetrics};
pub use sampler::{CycleOutcome, CycleReport, Sampler, SamplerConfig};
pub use status::{parse_dump, CommandSource, PeerSample, PeerSet, StatusSource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
