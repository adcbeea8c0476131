use opal_config::OpalConfig;
use opal_ring::{Frame, FrameReader, StreamError};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => OpalConfig::load(path)?,
        None => OpalConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let mut reader = FrameReader::open(&config.region)?;
    let (w, h, d) = reader.geometry();
    info!(
        "OPAL-VIEW: attached to region '{region}' ({w}x{h}x{d}). Reading...",
        region = config.region
    );

    if reader.is_poisoned() {
        warn!(
            "OPAL-VIEW: region '{region}' is poisoned (producer died); destroy and recreate it",
            region = config.region
        );
        return Ok(());
    }

    let mut frame = Frame::new();
    let mut last_report = Instant::now();
    let mut count: u64 = 0;

    loop {
        match reader.read(&mut frame) {
            Ok(()) => count += 1,
            Err(StreamError::NotActive) => {
                info!("OPAL-VIEW: producer is gone; exiting");
                return Ok(());
            }
            Err(e) => anyhow::bail!("consume failed: {e}"),
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            info!(
                "OPAL-VIEW: read rate ~ {count} f/s | uid = {uid} | acquired at {t} ns",
                uid = frame.frame_uid,
                t = frame.acquisition_time
            );
            count = 0;
            last_report = Instant::now();
        }
    }
}
