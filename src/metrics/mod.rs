//! Prometheus exporter for WireGuard peer statistics.
//!
//! # Metrics Exposed
//!
//! All gauges carry a single `client_name` label holding the name
//! resolved from the identity mapping.
//!
//! - `wireguard_received_bytes_gauge` - Bytes received from the client
//! - `wireguard_send_bytes_gauge` - Bytes sent to the client
//! - `wireguard_last_handshake_unixtimestamp` - Last handshake, seconds since the epoch
//!
//! # Example
//!
//! ```
//! use wireguard_exporter::metrics::PeerMetrics;
//!
//! let metrics = PeerMetrics::new().expect("Failed to create registry");
//! metrics.set_received("alice", 500.0);
//!
//! assert_eq!(metrics.received("alice"), Some(500.0));
//! assert!(metrics.render().unwrap().contains("client_name=\"alice\""));
//! ```

mod collector;
mod server;

pub use collector::{MetricsError, PeerMetrics, CLIENT_LABEL, SUBSYSTEM};
pub use server::{router, BoundMetricsServer, MetricsServer, MetricsServerConfig, ServerError};
