//! IQ Remote Client
//!
//! Connects to a remote receiver, streams baseband and reports throughput
//! until interrupted. Usage: `iq_client [config.toml]`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iq_remote_client::{
    constants::STREAM_BUFFER_SIZE, dsp::SampleStream, ClientConfig, Session, SessionState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting IQ Remote Client");

    let config = match std::env::args().nth(1) {
        Some(path) => ClientConfig::load(Path::new(&path))
            .with_context(|| format!("loading {path}"))?,
        None => ClientConfig::load_default()?,
    };

    let output = Arc::new(SampleStream::new(STREAM_BUFFER_SIZE));
    let session = {
        let connect_config = config.clone();
        let output = output.clone();
        tokio::task::spawn_blocking(move || Session::connect(&connect_config, output))
            .await?
            .with_context(|| format!("connecting to {}:{}", config.host, config.port))?
    };
    let session = Arc::new(session);
    tracing::info!("Session {} connected", session.id());

    {
        let session = session.clone();
        tokio::task::spawn_blocking(move || session.start()).await??;
    }

    // Consumer: drain the output stream and count samples
    let samples = Arc::new(AtomicU64::new(0));
    let consumer = {
        let output = output.clone();
        let samples = samples.clone();
        thread::Builder::new()
            .name("consumer".into())
            .spawn(move || {
                while let Some(block) = output.read() {
                    samples.fetch_add(block.len() as u64, Ordering::Relaxed);
                }
            })?
    };

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = interval.tick() => {
                let total = samples.load(Ordering::Relaxed);
                let stats = session.stats();
                tracing::info!(
                    "{:?}: {} S/s (server {} S/s), {} KiB in, buffered {:.0} ms",
                    session.state(),
                    total - last,
                    session.sample_rate(),
                    stats.bytes_received / 1024,
                    session.prebuffer_stats().buffered_msec
                );
                last = total;

                if session.state() == SessionState::Busy {
                    tracing::error!("Server is busy");
                    break;
                }
                if session.state() == SessionState::Closed {
                    break;
                }
            }
        }
    }

    {
        let session = session.clone();
        tokio::task::spawn_blocking(move || session.close()).await?;
    }
    output.stop_reader();
    if consumer.join().is_err() {
        tracing::error!("Consumer thread panicked");
    }

    tracing::info!("Received {} samples", samples.load(Ordering::Relaxed));
    Ok(())
}
