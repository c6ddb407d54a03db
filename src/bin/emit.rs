//! UDP Log Emitter
//!
//! Sends log lines to a running viewer, one datagram per line. Reads stdin
//! unless `--message` is given.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use udp_log_viewer::{constants::MAX_DATAGRAM_SIZE, network::PacketSender};

/// Send log lines to a UDP log viewer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Viewer UDP address
    #[arg(short, long, default_value = "127.0.0.1:10000")]
    target: SocketAddr,

    /// Send this message instead of reading stdin
    #[arg(short, long)]
    message: Option<String>,

    /// How many times to send --message
    #[arg(short = 'n', long, default_value = "1")]
    count: u64,

    /// Pause between datagrams in milliseconds
    #[arg(long, default_value = "0")]
    interval_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let sender = PacketSender::connect(args.target)?;
    let pause = Duration::from_millis(args.interval_ms);

    let send_line = |line: &str| -> Result<()> {
        let mut datagram = format!("{}\n", line).into_bytes();
        if datagram.len() > MAX_DATAGRAM_SIZE {
            tracing::warn!("Line of {} bytes truncated to {}", datagram.len(), MAX_DATAGRAM_SIZE);
            datagram.truncate(MAX_DATAGRAM_SIZE);
        }
        sender
            .send(&datagram)
            .with_context(|| format!("sending to {}", sender.target()))?;
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
        Ok(())
    };

    match &args.message {
        Some(message) => {
            for _ in 0..args.count {
                send_line(message)?;
            }
        }
        None => {
            for line in std::io::stdin().lock().lines() {
                send_line(&line?)?;
            }
        }
    }

    tracing::info!(
        "Sent {} datagrams ({} bytes) to {}",
        sender.packets_sent(),
        sender.bytes_sent(),
        sender.target()
    );
    Ok(())
}
