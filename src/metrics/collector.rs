//! Per-client gauges and registry.

use crate::status::PeerSample;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Subsystem prefix shared by all exported gauges.
pub const SUBSYSTEM: &str = "wireguard";

/// Label carrying the resolved client name.
pub const CLIENT_LABEL: &str = "client_name";

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registration or encoding failed inside the prometheus crate.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

const RECEIVED: u8 = 1 << 0;
const SENT: u8 = 1 << 1;
const HANDSHAKE: u8 = 1 << 2;

/// Publish bookkeeping for one client name.
#[derive(Debug, Clone, Copy)]
struct Published {
    at: Instant,
    // Bitmask of the gauges that hold a value for this name.
    gauges: u8,
}

/// Prometheus gauges for WireGuard peers, labelled by client name.
///
/// The gauges are safe to update while the registry is being gathered.
/// Values are overwritten on every publish and never accumulate.
pub struct PeerMetrics {
    registry: Registry,

    received_bytes: GaugeVec,
    sent_bytes: GaugeVec,
    last_handshake: GaugeVec,

    // Last publish time and set gauges per client name.
    published: Mutex<HashMap<String, Published>>,
}

impl PeerMetrics {
    /// Creates a registry with the three peer gauges registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let received_bytes = GaugeVec::new(
            Opts::new("received_bytes_gauge", "Amount of bytes received by client")
                .subsystem(SUBSYSTEM),
            &[CLIENT_LABEL],
        )?;
        let sent_bytes = GaugeVec::new(
            Opts::new("send_bytes_gauge", "Amount of bytes send by client").subsystem(SUBSYSTEM),
            &[CLIENT_LABEL],
        )?;
        let last_handshake = GaugeVec::new(
            Opts::new(
                "last_handshake_unixtimestamp",
                "Date time in unixtimestamp seconds when last handshake activity registered",
            )
            .subsystem(SUBSYSTEM),
            &[CLIENT_LABEL],
        )?;

        registry.register(Box::new(received_bytes.clone()))?;
        registry.register(Box::new(sent_bytes.clone()))?;
        registry.register(Box::new(last_handshake.clone()))?;

        Ok(Self {
            registry,
            received_bytes,
            sent_bytes,
            last_handshake,
            published: Mutex::new(HashMap::new()),
        })
    }

    fn published(&self) -> MutexGuard<'_, HashMap<String, Published>> {
        // The map only holds bookkeeping, a poisoned guard is still usable.
        self.published.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn touch(&self, name: &str, gauge: u8) {
        let now = Instant::now();
        let mut published = self.published();
        let entry = published.entry(name.to_string()).or_insert(Published {
            at: now,
            gauges: 0,
        });
        entry.at = now;
        entry.gauges |= gauge;
    }

    /// Sets the received byte count for `name`.
    pub fn set_received(&self, name: &str, value: f64) {
        self.received_bytes.with_label_values(&[name]).set(value);
        self.touch(name, RECEIVED);
    }

    /// Sets the sent byte count for `name`.
    pub fn set_sent(&self, name: &str, value: f64) {
        self.sent_bytes.with_label_values(&[name]).set(value);
        self.touch(name, SENT);
    }

    /// Sets the last handshake time for `name`, in seconds since the epoch.
    pub fn set_last_handshake(&self, name: &str, unix_seconds: f64) {
        self.last_handshake.with_label_values(&[name]).set(unix_seconds);
        self.touch(name, HANDSHAKE);
    }

    /// Publishes all three values of a resolved sample.
    ///
    /// Returns false and does nothing if the sample has no client name.
    pub fn publish(&self, sample: &PeerSample) -> bool {
        if !sample.is_resolved() {
            return false;
        }
        let name = sample.display_name.as_str();
        self.set_received(name, sample.rx_bytes as f64);
        self.set_sent(name, sample.tx_bytes as f64);
        self.set_last_handshake(name, sample.last_handshake as f64);
        true
    }

    // Looking up a label that was never set would create it, so only
    // gauges recorded in the bitmask are read.
    fn read(&self, gauge: &GaugeVec, bit: u8, name: &str) -> Option<f64> {
        let published = self.published();
        match published.get(name) {
            Some(p) if p.gauges & bit != 0 => {
                gauge.get_metric_with_label_values(&[name]).ok().map(|g| g.get())
            }
            _ => None,
        }
    }

    /// Current received byte count for `name`, if published.
    pub fn received(&self, name: &str) -> Option<f64> {
        self.read(&self.received_bytes, RECEIVED, name)
    }

    /// Current sent byte count for `name`, if published.
    pub fn sent(&self, name: &str) -> Option<f64> {
        self.read(&self.sent_bytes, SENT, name)
    }

    /// Current last handshake time for `name`, if published.
    pub fn last_handshake(&self, name: &str) -> Option<f64> {
        self.read(&self.last_handshake, HANDSHAKE, name)
    }

    /// Names currently exported, sorted.
    pub fn clients(&self) -> Vec<String> {
        let mut names: Vec<String> = self.published().keys().cloned().collect();
        names.sort();
        names
    }

    /// Removes `name` from all gauges. Returns false if it was not exported.
    pub fn remove(&self, name: &str) -> bool {
        if self.published().remove(name).is_none() {
            return false;
        }
        // A label may be missing from a gauge if only some setters ran.
        let _ = self.received_bytes.remove_label_values(&[name]);
        let _ = self.sent_bytes.remove_label_values(&[name]);
        let _ = self.last_handshake.remove_label_values(&[name]);
        true
    }

    /// Removes every name not published within `ttl` of `now`.
    ///
    /// Returns the evicted names, sorted.
    pub fn evict_stale(&self, now: Instant, ttl: Duration) -> Vec<String> {
        let mut stale: Vec<String> = self
            .published()
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.at) > ttl)
            .map(|(name, _)| name.clone())
            .collect();
        stale.sort();

        for name in &stale {
            self.remove(name);
            tracing::info!(client = %name, ttl_secs = ttl.as_secs(), "Evicted stale client metrics");
        }
        stale
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, rx: i64, tx: i64, handshake: i64) -> PeerSample {
        PeerSample {
            interface: "wg0".to_string(),
            public_key: format!("key-{name}"),
            preshared_key: "(none)".to_string(),
            endpoint: "(none)".to_string(),
            allowed_ips: "10.0.0.2/32".to_string(),
            last_handshake: handshake,
            rx_bytes: rx,
            tx_bytes: tx,
            persistent_keepalive: "off".to_string(),
            display_name: name.to_string(),
        }
    }

    #[test]
    fn test_registry_creation() {
        let metrics = PeerMetrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_publish_renders_labels() {
        let metrics = PeerMetrics::new().unwrap();
        assert!(metrics.publish(&sample("alice", 500, 700, 1_700_000_000)));

        let output = metrics.render().unwrap();
        assert!(output.contains(r#"wireguard_received_bytes_gauge{client_name="alice"} 500"#));
        assert!(output.contains(r#"wireguard_send_bytes_gauge{client_name="alice"} 700"#));
        assert!(output.contains(
            r#"wireguard_last_handshake_unixtimestamp{client_name="alice"} 1700000000"#
        ));
    }

    #[test]
    fn test_unresolved_sample_not_published() {
        let metrics = PeerMetrics::new().unwrap();
        assert!(!metrics.publish(&sample("", 1, 2, 3)));
        assert!(metrics.clients().is_empty());
        assert!(!metrics.render().unwrap().contains("client_name"));
    }

    #[test]
    fn test_overwrite_not_accumulate() {
        let metrics = PeerMetrics::new().unwrap();
        metrics.publish(&sample("alice", 500, 10, 1));
        metrics.publish(&sample("alice", 20, 30, 2));

        assert_eq!(metrics.received("alice"), Some(20.0));
        assert_eq!(metrics.sent("alice"), Some(30.0));
        assert_eq!(metrics.last_handshake("alice"), Some(2.0));
        let output = metrics.render().unwrap();
        assert!(output.contains(r#"wireguard_received_bytes_gauge{client_name="alice"} 20"#));
        assert!(!output.contains(r#"wireguard_received_bytes_gauge{client_name="alice"} 520"#));
    }

    #[test]
    fn test_read_unknown_name() {
        let metrics = PeerMetrics::new().unwrap();
        assert_eq!(metrics.received("nobody"), None);
        assert!(!metrics.render().unwrap().contains("nobody"));
    }

    #[test]
    fn test_reading_unset_gauge_leaves_export_unchanged() {
        let metrics = PeerMetrics::new().unwrap();
        metrics.set_received("alice", 500.0);
        let before = metrics.render().unwrap();

        assert_eq!(metrics.received("alice"), Some(500.0));
        assert_eq!(metrics.sent("alice"), None);
        assert_eq!(metrics.last_handshake("alice"), None);

        let after = metrics.render().unwrap();
        assert_eq!(before, after);
        assert!(!after.contains(r#"wireguard_send_bytes_gauge{client_name="alice"}"#));
        assert!(!after.contains(r#"wireguard_last_handshake_unixtimestamp{client_name="alice"}"#));
    }

    #[test]
    fn test_partial_client_removed() {
        let metrics = PeerMetrics::new().unwrap();
        metrics.set_sent("bob", 7.0);

        assert!(metrics.remove("bob"));
        assert!(!metrics.render().unwrap().contains("bob"));
    }

    #[test]
    fn test_remove() {
        let metrics = PeerMetrics::new().unwrap();
        metrics.publish(&sample("alice", 1, 2, 3));
        metrics.publish(&sample("bob", 1, 2, 3));

        assert!(metrics.remove("alice"));
        assert!(!metrics.remove("alice"));
        assert_eq!(metrics.clients(), vec!["bob".to_string()]);
        assert!(!metrics.render().unwrap().contains("alice"));
    }

    #[test]
    fn test_evict_stale() {
        let metrics = PeerMetrics::new().unwrap();
        metrics.publish(&sample("alice", 1, 2, 3));
        let ttl = Duration::from_secs(60);

        assert!(metrics.evict_stale(Instant::now(), ttl).is_empty());

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(metrics.evict_stale(later, ttl), vec!["alice".to_string()]);
        assert_eq!(metrics.received("alice"), None);
    }
}
