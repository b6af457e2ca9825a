//! WireGuard Metrics Exporter
//!
//! Polls `wg show all dump`, names peers from the identity mapping and
//! serves the result on `/metrics`.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wireguard_exporter::{
    config::FileConfig,
    metrics::{MetricsServer, MetricsServerConfig, PeerMetrics},
    sampler::{Sampler, SamplerConfig},
    status::CommandSource,
};

/// Prometheus exporter for WireGuard peers.
#[derive(Debug, Parser)]
#[command(name = "wireguard-exporter", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to serve metrics on.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// JSON file mapping public keys to client names.
    #[arg(long)]
    identity_file: Option<PathBuf>,

    /// Seconds between sampling cycles.
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Remove clients not seen for this many seconds (0 to disable).
    #[arg(long)]
    stale_after_secs: Option<u64>,

    /// WireGuard control tool.
    #[arg(long)]
    wg_program: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<FileConfig, wireguard_exporter::ConfigError> {
        let mut config = match &self.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(path) = self.identity_file {
            config.wireguard.identity_file = path;
        }
        if let Some(secs) = self.interval_secs {
            config.sampler.interval_secs = secs;
        }
        if let Some(secs) = self.stale_after_secs {
            config.sampler.stale_after_secs = secs;
        }
        if let Some(program) = self.wg_program {
            config.wireguard.program = program;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(wireguard_exporter::logging::env_filter())
        .init();

    info!("WireGuard Metrics Exporter v{}", wireguard_exporter::VERSION);

    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let metrics = match PeerMetrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(e) => {
            error!("Failed to create metrics registry: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutdown requested");
        signal_token.cancel();
    }) {
        error!("Failed to install signal handler: {}", e);
    }

    let server = MetricsServer::new(
        MetricsServerConfig {
            bind_addr: config.server.listen,
        },
        Arc::clone(&metrics),
    );
    let server = match server.bind().await {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let sampler = Sampler::new(
        Box::new(CommandSource::new(
            config.wireguard.program.clone(),
            config.wireguard.args.clone(),
        )),
        config.wireguard.identity_file.clone(),
        metrics,
        SamplerConfig {
            interval: config.sampler.interval(),
            stale_after: config.sampler.stale_after(),
        },
    );
    let sampler_task = tokio::spawn(sampler.run(shutdown.clone()));

    let result = server.serve(shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = sampler_task.await {
        error!("Sampler task failed: {}", e);
    }

    match result {
        Ok(()) => info!("Stopping metrics exporter"),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
