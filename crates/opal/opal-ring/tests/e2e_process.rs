//! Two-process end-to-end tests for the frame ring.
//!
//! These use a self-spawning pattern: the test executable re-invokes
//! itself with `--exact <test-name>` and a role in the environment, so the
//! producer genuinely lives in another address space. That is the only way
//! to exercise process-shared primitives, and the only way at all to
//! produce a poisoned region (the owner has to die).

use opal_ring::{Frame, FrameReader, FrameWriter, RegionError, StreamError};
use std::env;
use std::process::Command;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const ENV_ROLE: &str = "OPAL_E2E_ROLE";
const ENV_REGION: &str = "OPAL_E2E_REGION";

/// Owner that exits without destroying its region.
const ROLE_DYING_OWNER: &str = "dying-owner";

/// Owner that streams a fixed number of frames, then destroys.
const ROLE_STREAM_WRITER: &str = "stream-writer";

const STREAM_FRAMES: u64 = 200;
const STREAM_WIDTH: usize = 16;
const STREAM_HEIGHT: usize = 16;

fn unique_name(tag: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("e2e-{tag}-{}-{ts}", std::process::id())
}

fn spawn_role(test_name: &str, role: &str, region: &str) -> std::process::Child {
    let exe = env::current_exe().expect("failed to get current executable path");
    Command::new(exe)
        .arg("--exact")
        .arg(test_name)
        .env(ENV_ROLE, role)
        .env(ENV_REGION, region)
        .spawn()
        .expect("failed to spawn role process")
}

/// Opens the region with a retry loop: the producer in the other process
/// may not have created it yet.
fn open_with_retry(name: &str, deadline: Duration) -> FrameReader {
    let give_up = Instant::now() + deadline;
    loop {
        match FrameReader::open(name) {
            Ok(reader) => return reader,
            Err(_) if Instant::now() < give_up => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => panic!("region '{name}' never appeared: {e}"),
        }
    }
}

fn run_dying_owner(region: &str) {
    let mut writer = FrameWriter::create(region, 2, 2, 1).expect("dying owner: create failed");
    writer
        .publish(2, 2, 1, 42, &[7u8; 4])
        .expect("dying owner: publish failed");
    // Exit without destroy: the region is now poisoned.
}

fn run_stream_writer(region: &str) {
    let mut writer = FrameWriter::create(region, STREAM_WIDTH, STREAM_HEIGHT, 1)
        .expect("stream writer: create failed");
    let image_size = writer.image_size();

    for i in 0..STREAM_FRAMES {
        let uid = i + 1;
        let payload = vec![(uid % 256) as u8; image_size];
        writer
            .publish(STREAM_WIDTH, STREAM_HEIGHT, 1, uid * 1_000, &payload)
            .expect("stream writer: publish failed");
        // Pace the producer so the consumer genuinely runs concurrently.
        std::thread::sleep(Duration::from_millis(1));
    }

    writer.destroy().expect("stream writer: destroy failed");
}

#[test]
fn e2e_poisoned_region_is_detected_and_reclaimed() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let region = env::var(ENV_REGION).expect("role process without region name");
        match role.as_str() {
            ROLE_DYING_OWNER => run_dying_owner(&region),
            other => panic!("unknown role: {other}"),
        }
        return;
    }

    let region = unique_name("poison");
    let status = spawn_role(
        "e2e_poisoned_region_is_detected_and_reclaimed",
        ROLE_DYING_OWNER,
        &region,
    )
    .wait()
    .expect("failed to wait for dying owner");
    assert!(status.success(), "dying owner exited abnormally: {status}");

    // The owner is gone but never destroyed: alive still reads true, and
    // the poison probe sees a dead owner pid.
    let mut reader = FrameReader::open(&region).expect("poisoned region must still open");
    assert!(reader.is_alive());
    assert!(reader.is_poisoned());
    assert!(opal_ring::is_poisoned(&region).unwrap());

    // The published frame is still readable: poison means "no producer",
    // not "no data".
    let mut frame = Frame::new();
    reader.try_read(&mut frame).unwrap();
    assert_eq!(frame.frame_uid, 1);
    assert_eq!(frame.data, vec![7u8; 4]);

    // Any process may reclaim a poisoned region.
    reader.destroy().expect("destroy of poisoned region failed");
    assert!(matches!(
        FrameReader::open(&region),
        Err(RegionError::NotFound(_))
    ));
}

#[test]
fn e2e_concurrent_stream_across_processes() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let region = env::var(ENV_REGION).expect("role process without region name");
        match role.as_str() {
            ROLE_STREAM_WRITER => run_stream_writer(&region),
            other => panic!("unknown role: {other}"),
        }
        return;
    }

    let region = unique_name("stream");
    let mut writer_proc = spawn_role(
        "e2e_concurrent_stream_across_processes",
        ROLE_STREAM_WRITER,
        &region,
    );

    let mut reader = open_with_retry(&region, Duration::from_secs(5));
    let mut frame = Frame::new();
    let mut frames_read = 0u64;
    let mut last_uid = 0u64;

    loop {
        match reader.read(&mut frame) {
            Ok(()) => {
                assert!(frame.frame_uid > last_uid, "uid went backwards");
                assert!(frame.frame_uid <= STREAM_FRAMES);
                // Every byte of a frame carries its uid, so a torn or
                // misattributed copy cannot go unnoticed.
                let expect = (frame.frame_uid % 256) as u8;
                assert!(
                    frame.data.iter().all(|&b| b == expect),
                    "frame {} has inconsistent payload",
                    frame.frame_uid
                );
                assert_eq!(frame.acquisition_time, frame.frame_uid * 1_000);
                last_uid = frame.frame_uid;
                frames_read += 1;
            }
            // The producer destroyed the region after its last frame.
            Err(StreamError::NotActive) => break,
            Err(e) => panic!("unexpected consume failure: {e}"),
        }
    }

    let status = writer_proc.wait().expect("failed to wait for writer");
    assert!(status.success(), "writer exited abnormally: {status}");

    assert!(frames_read > 0, "consumer never observed a frame");
    // A consumer may skip when lapped, but it can never see more frames
    // than were published.
    assert!(frames_read <= STREAM_FRAMES);
}
