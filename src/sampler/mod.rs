//! Sampling loop.
//!
//! Every cycle runs four phases in order:
//!
//! ```text
//! acquire dump → parse peers → resolve names → publish gauges
//! ```
//!
//! A failing phase ends the cycle early and the next tick retries.
//! Nothing that happens inside a cycle can stop the loop; only the
//! cancellation token does.

use crate::identity::IdentityMap;
use crate::metrics::PeerMetrics;
use crate::status::{parse_dump, StatusSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Sampler timing settings.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Time between cycles.
    pub interval: Duration,
    /// Remove clients not published for this long. `None` keeps them forever.
    pub stale_after: Option<Duration>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            stale_after: None,
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleOutcome {
    /// All phases ran.
    #[default]
    Published,
    /// The status dump could not be acquired.
    SourceFailed,
    /// The identity file does not exist; nothing was resolved.
    IdentityMissing,
    /// The identity file is unreadable or malformed; nothing was resolved.
    IdentityInvalid,
}

/// Counters describing one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// How the cycle ended.
    pub outcome: CycleOutcome,
    /// Peer records parsed from the dump.
    pub peers: usize,
    /// Dump lines that were not peer records.
    pub skipped_lines: usize,
    /// Peers matched to a client name.
    pub resolved: usize,
    /// Clients written to the gauges.
    pub published: usize,
    /// Clients removed as stale.
    pub evicted: usize,
}

/// Periodically reconciles WireGuard peer stats into [`PeerMetrics`].
pub struct Sampler {
    source: Box<dyn StatusSource>,
    identity_file: PathBuf,
    metrics: Arc<PeerMetrics>,
    config: SamplerConfig,
}

impl Sampler {
    /// Creates a new sampler writing into `metrics`.
    pub fn new(
        source: Box<dyn StatusSource>,
        identity_file: impl Into<PathBuf>,
        metrics: Arc<PeerMetrics>,
        config: SamplerConfig,
    ) -> Self {
        Self {
            source,
            identity_file: identity_file.into(),
            metrics,
            config,
        }
    }

    /// Runs a single cycle synchronously.
    ///
    /// Blocks on the status command and the identity file read.
    pub fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let raw = match self.source.fetch() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire WireGuard status");
                report.outcome = CycleOutcome::SourceFailed;
                report.evicted = self.evict_stale();
                return report;
            }
        };

        let parsed = parse_dump(&raw);
        report.skipped_lines = parsed.skipped();
        report.peers = parsed.peers.len();
        let mut peers = parsed.peers;

        match IdentityMap::load(&self.identity_file) {
            Ok(Some(identities)) => {
                report.resolved = identities.resolve(&mut peers);
            }
            Ok(None) => {
                tracing::debug!(path = %self.identity_file.display(), "Identity file not found");
                report.outcome = CycleOutcome::IdentityMissing;
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.identity_file.display(),
                    error = %e,
                    "Ignoring identity file"
                );
                report.outcome = CycleOutcome::IdentityInvalid;
            }
        }

        for sample in peers.values() {
            if self.metrics.publish(sample) {
                report.published += 1;
            } else {
                tracing::debug!(
                    public_key = %sample.public_key,
                    interface = %sample.interface,
                    "Peer has no client name, not published"
                );
            }
        }

        report.evicted = self.evict_stale();
        report
    }

    fn evict_stale(&self) -> usize {
        match self.config.stale_after {
            Some(ttl) => self.metrics.evict_stale(std::time::Instant::now(), ttl).len(),
            None => 0,
        }
    }

    /// Runs cycles every interval until `shutdown` is cancelled.
    ///
    /// The first cycle starts one interval after the call. Cycles run on
    /// the blocking pool so a slow `wg` never stalls scrape handlers.
    pub async fn run(self, shutdown: CancellationToken) {
        let interval = self.config.interval;
        let sampler = Arc::new(self);

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = interval.as_secs_f64(),
            identity_file = %sampler.identity_file.display(),
            "Sampler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let cycle = Arc::clone(&sampler);
            let handle = tokio::task::spawn_blocking(move || cycle.run_cycle());

            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = handle => match result {
                    Ok(report) => tracing::debug!(
                        outcome = ?report.outcome,
                        peers = report.peers,
                        skipped = report.skipped_lines,
                        resolved = report.resolved,
                        published = report.published,
                        evicted = report.evicted,
                        "Sampling cycle finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "Sampling cycle aborted"),
                },
            }
        }

        tracing::info!("Sampler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{SourceError, StaticSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const DUMP: &str = "wg0\tprivate\tpublic\t51820\toff\n\
wg0\tkey-a\t(none)\t203.0.113.5:51820\t10.8.0.2/32\t1700000000\t500\t700\t25\n\
wg0\tkey-b\t(none)\t(none)\t10.8.0.3/32\t0\t10\t20\toff\n\
wg0\tkey-c\t(none)\t198.51.100.7:1234\t10.8.0.4/32\t1700000100\t900\t1100\toff\n";

    const MAPPING: &str = r#"{"clients": {
        "1": { "publicKey": "key-a", "name": "alice" },
        "2": { "publicKey": "key-c", "name": "carol" }
    }}"#;

    struct Fixture {
        dir: TempDir,
        metrics: Arc<PeerMetrics>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                metrics: Arc::new(PeerMetrics::new().unwrap()),
            }
        }

        fn identity_path(&self) -> PathBuf {
            self.dir.path().join("wg0.json")
        }

        fn write_identity(&self, content: &str) {
            std::fs::write(self.identity_path(), content).unwrap();
        }

        fn sampler(&self, source: impl StatusSource + 'static, config: SamplerConfig) -> Sampler {
            Sampler::new(
                Box::new(source),
                self.identity_path(),
                Arc::clone(&self.metrics),
                config,
            )
        }
    }

    /// Returns a different dump on every fetch.
    struct SequenceSource {
        dumps: Vec<String>,
        calls: AtomicUsize,
    }

    impl StatusSource for SequenceSource {
        fn fetch(&self) -> Result<String, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.dumps[call.min(self.dumps.len() - 1)].clone())
        }
    }

    #[test]
    fn test_cycle_joins_and_publishes() {
        let fixture = Fixture::new();
        fixture.write_identity(MAPPING);
        let sampler = fixture.sampler(StaticSource::new(DUMP), SamplerConfig::default());

        let report = sampler.run_cycle();

        assert_eq!(report.outcome, CycleOutcome::Published);
        assert_eq!(report.peers, 3);
        assert_eq!(report.skipped_lines, 1);
        assert_eq!(report.resolved, 2);
        assert_eq!(report.published, 2);
        assert_eq!(fixture.metrics.clients(), vec!["alice", "carol"]);
        assert_eq!(fixture.metrics.received("alice"), Some(500.0));
        assert_eq!(fixture.metrics.sent("carol"), Some(1100.0));
        assert_eq!(fixture.metrics.last_handshake("carol"), Some(1_700_000_100.0));
    }

    #[test]
    fn test_source_failure_skips_cycle() {
        let fixture = Fixture::new();
        fixture.write_identity(MAPPING);
        let sampler = fixture.sampler(StaticSource::failing(), SamplerConfig::default());

        let report = sampler.run_cycle();

        assert_eq!(report.outcome, CycleOutcome::SourceFailed);
        assert_eq!(report.peers, 0);
        assert!(fixture.metrics.clients().is_empty());
    }

    #[test]
    fn test_missing_identity_keeps_previous_values() {
        let fixture = Fixture::new();
        fixture.write_identity(MAPPING);
        let source = SequenceSource {
            dumps: vec![DUMP.to_string(), DUMP.replace("\t500\t", "\t9999\t")],
            calls: AtomicUsize::new(0),
        };
        let sampler = fixture.sampler(source, SamplerConfig::default());

        sampler.run_cycle();
        assert_eq!(fixture.metrics.received("alice"), Some(500.0));

        std::fs::remove_file(fixture.identity_path()).unwrap();
        let report = sampler.run_cycle();

        assert_eq!(report.outcome, CycleOutcome::IdentityMissing);
        assert_eq!(report.published, 0);
        assert_eq!(fixture.metrics.received("alice"), Some(500.0));
    }

    #[test]
    fn test_malformed_identity_tolerated() {
        let fixture = Fixture::new();
        fixture.write_identity("{\"server\": {}}");
        let sampler = fixture.sampler(StaticSource::new(DUMP), SamplerConfig::default());

        let report = sampler.run_cycle();

        assert_eq!(report.outcome, CycleOutcome::IdentityInvalid);
        assert_eq!(report.peers, 3);
        assert_eq!(report.published, 0);
    }

    #[test]
    fn test_second_cycle_overwrites() {
        let fixture = Fixture::new();
        fixture.write_identity(MAPPING);
        let source = SequenceSource {
            dumps: vec![DUMP.to_string(), DUMP.replace("\t500\t", "\t650\t")],
            calls: AtomicUsize::new(0),
        };
        let sampler = fixture.sampler(source, SamplerConfig::default());

        sampler.run_cycle();
        sampler.run_cycle();

        assert_eq!(fixture.metrics.received("alice"), Some(650.0));
        let output = fixture.metrics.render().unwrap();
        assert!(output.contains(r#"wireguard_received_bytes_gauge{client_name="alice"} 650"#));
    }

    #[test]
    fn test_renamed_client_kept_without_ttl() {
        let fixture = Fixture::new();
        fixture.write_identity(MAPPING);
        let sampler = fixture.sampler(StaticSource::new(DUMP), SamplerConfig::default());
        sampler.run_cycle();

        fixture.write_identity(&MAPPING.replace("alice", "alicia"));
        sampler.run_cycle();

        assert_eq!(fixture.metrics.clients(), vec!["alice", "alicia", "carol"]);
    }

    #[test]
    fn test_renamed_client_evicted_with_ttl() {
        let fixture = Fixture::new();
        fixture.write_identity(MAPPING);
        let config = SamplerConfig {
            stale_after: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let sampler = fixture.sampler(StaticSource::new(DUMP), config);
        sampler.run_cycle();

        fixture.write_identity(&MAPPING.replace("alice", "alicia"));
        std::thread::sleep(Duration::from_millis(120));
        let report = sampler.run_cycle();

        assert_eq!(report.evicted, 1);
        assert_eq!(fixture.metrics.clients(), vec!["alicia", "carol"]);
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let fixture = Fixture::new();
        fixture.write_identity(MAPPING);
        let config = SamplerConfig {
            interval: Duration::from_millis(20),
            stale_after: None,
        };
        let sampler = fixture.sampler(StaticSource::new(DUMP), config);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(sampler.run(shutdown.clone()));

        let deadline = Instant::now() + Duration::from_secs(5);
        while fixture.metrics.received("alice").is_none() {
            assert!(Instant::now() < deadline, "sampler never published");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sampler did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_survives_failing_source() {
        let fixture = Fixture::new();
        let config = SamplerConfig {
            interval: Duration::from_millis(10),
            stale_after: None,
        };
        let sampler = fixture.sampler(StaticSource::failing(), config);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(sampler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sampler did not stop")
            .unwrap();
    }
}
