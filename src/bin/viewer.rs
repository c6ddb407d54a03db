//! UDP Log Viewer
//!
//! Receives log lines over UDP and streams them to every browser that has
//! the index page open.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use udp_log_viewer::{
    config::AppConfig,
    network::UdpDatagramSource,
    relay::{BroadcastLoop, ConnectionRegistry, LoopExit},
    shutdown::Shutdown,
    ui::WebServer,
};

/// Tail a UDP log stream in the browser
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML); flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// The udp log server address
    #[arg(long)]
    udp_host: Option<String>,

    /// The udp log server port
    #[arg(long)]
    udp_port: Option<u16>,

    /// The http server address
    #[arg(long)]
    http_host: Option<String>,

    /// The http server port
    #[arg(long)]
    http_port: Option<u16>,
}

impl Args {
    fn into_config(self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => match AppConfig::default_path().filter(|path| path.exists()) {
                Some(path) => {
                    tracing::info!("Using config file {}", path.display());
                    AppConfig::load(&path)?
                }
                None => AppConfig::default(),
            },
        };

        if let Some(host) = self.udp_host {
            config.network.bind_address = host;
        }
        if let Some(port) = self.udp_port {
            config.network.udp_port = port;
        }
        if let Some(host) = self.http_host {
            config.ui.bind_address = host;
        }
        if let Some(port) = self.http_port {
            config.ui.http_port = port;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Args::parse().into_config()?;

    tracing::info!("Starting UDP log viewer");

    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster = BroadcastLoop::new(registry.clone());
    let stats = broadcaster.stats();
    let shutdown = Shutdown::new();

    // Ctrl+C
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => shutdown.trigger(),
                Err(e) => tracing::warn!("Failed to listen for Ctrl+C: {}", e),
            }
        });
    }

    // UDP ingestion
    let source = UdpDatagramSource::bind(&config.network)?;
    let source_counters = source.counters();
    tracing::info!("UDP log server listening on {}", source.local_addr()?);

    // Web UI
    let web_server = WebServer::new(
        config.ui.clone(),
        registry.clone(),
        stats.clone(),
        config.relay.queue_capacity,
    )?;
    let listener = web_server.bind().await?;
    let web_handle = web_server.start_background(listener, shutdown.signal());

    tracing::info!("Log viewer available at http://{}:{}", config.ui.bind_address, config.ui.http_port);

    let ingest_handle = {
        let signal = shutdown.signal();
        tokio::spawn(async move { broadcaster.run(source, signal).await })
    };

    // Periodic stats
    if let Some(interval) = config.relay.stats_interval() {
        let registry = registry.clone();
        let stats = stats.clone();
        let mut signal = shutdown.signal();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = signal.wait() => break,
                    _ = ticker.tick() => {
                        let snapshot = stats.snapshot();
                        tracing::info!(
                            "Relay stats: {} consumers, {} datagrams ({} bytes, {} truncated), {} queued, {} dropped",
                            registry.len(),
                            snapshot.datagrams_received,
                            snapshot.bytes_received,
                            source_counters.truncated(),
                            snapshot.deliveries_queued,
                            snapshot.deliveries_dropped
                        );
                    }
                }
            }
        });
    }

    // The web server runs until shutdown; ingestion may stop earlier on a
    // socket error while browsers keep draining what they already have.
    let web_result = web_handle.await;
    shutdown.trigger();

    match ingest_handle.await? {
        LoopExit::Shutdown => tracing::info!("Ingestion stopped"),
        LoopExit::SourceFailed(e) => tracing::warn!("Ingestion had stopped earlier: {}", e),
    }

    web_result??;
    tracing::info!("Goodbye");
    Ok(())
}
