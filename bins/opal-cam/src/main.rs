use opal_config::OpalConfig;
use opal_ring::FrameWriter;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Monotonic nanoseconds for frame acquisition stamps.
#[inline(always)]
fn now_ns() -> u64 {
    let mut ts: libc::timespec = unsafe { core::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

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

    let mut writer = FrameWriter::create(&config.region, config.width, config.height, config.depth)?;

    info!(
        "OPAL-CAM: publishing {w}x{h}x{d} frames to region '{region}' every {interval}ms",
        w = config.width,
        h = config.height,
        d = config.depth,
        region = config.region,
        interval = config.frame_interval_ms
    );

    // Synthetic source: each frame is a flat fill that steps through the
    // byte range, so a viewer can eyeball continuity.
    let mut image = vec![0u8; writer.image_size()];
    let interval = Duration::from_millis(config.frame_interval_ms);
    let mut last_report = Instant::now();
    let mut published: u64 = 0;

    loop {
        let level = (writer.latest_uid() % 256) as u8;
        image.fill(level);
        writer.publish(
            config.width,
            config.height,
            config.depth,
            now_ns(),
            &image,
        )?;
        published += 1;

        if last_report.elapsed() >= Duration::from_secs(1) {
            info!(
                "OPAL-CAM: publish rate ~ {published} f/s | newest uid = {uid}",
                uid = writer.latest_uid()
            );
            published = 0;
            last_report = Instant::now();
        }

        std::thread::sleep(interval);
    }
}
