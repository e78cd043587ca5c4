// SPDX-License-Identifier: GPL-3.0-only

//! Collator rate decoupling: duplication above the camera rate, skipping
//! below it, and convergence to the target rate.

mod common;

use std::sync::Arc;
use std::time::Duration;

use multicam::camera::capture::CaptureLoop;
use multicam::camera::collator::CollatorLoop;
use multicam::camera::virtual_driver::VirtualCameraDriver;

async fn run_collation(camera_fps: f64, target_fps: f64, run_for: Duration) -> Stats {
    let driver = VirtualCameraDriver::new(1);
    let device = common::open_virtual_device(&driver, camera_fps);

    let capture = Arc::new(CaptureLoop::new(0, device));
    capture.start();
    let collator = Arc::new(CollatorLoop::new(0, target_fps, Arc::clone(&capture)));

    // Warm up capture before collation starts measuring.
    tokio::time::sleep(Duration::from_millis(300)).await;
    collator.start();
    tokio::time::sleep(run_for).await;

    let stats = Stats {
        captured: capture.get_frame_count(),
        collated: collator.get_frame_count(),
        duplicated: collator.get_duplicate_count(),
        collation_fps: collator.get_fps(),
    };

    collator.stop().await;
    capture.stop().await;
    stats
}

struct Stats {
    captured: u64,
    collated: u64,
    duplicated: u64,
    collation_fps: f64,
}

#[tokio::test]
async fn matched_rates_emit_near_target() {
    let stats = run_collation(30.0, 30.0, Duration::from_secs(2)).await;

    let expected = 60.0;
    assert!(
        (stats.collated as f64) > expected * 0.8 && (stats.collated as f64) < expected * 1.2,
        "expected ~{expected} collated frames, got {}",
        stats.collated
    );
    assert!(
        (stats.collation_fps - 30.0).abs() < 30.0 * 0.2,
        "collation fps {} outside 30 +/- 20%",
        stats.collation_fps
    );
}

#[tokio::test]
async fn target_above_camera_rate_duplicates() {
    let stats = run_collation(30.0, 60.0, Duration::from_secs(2)).await;

    assert!(
        (stats.collated as f64) > 96.0,
        "expected ~120 collated frames, got {}",
        stats.collated
    );
    // Emitting twice as fast as the camera delivers means roughly half of
    // the emissions are duplicates.
    let ratio = stats.duplicated as f64 / stats.collated as f64;
    assert!(
        (0.3..=0.7).contains(&ratio),
        "expected ~50% duplicates, got {:.0}% ({} of {})",
        ratio * 100.0,
        stats.duplicated,
        stats.collated
    );
}

#[tokio::test]
async fn target_below_camera_rate_never_duplicates() {
    let stats = run_collation(30.0, 10.0, Duration::from_secs(2)).await;

    assert!(
        (14..=26).contains(&stats.collated),
        "expected ~20 collated frames, got {}",
        stats.collated
    );
    assert_eq!(
        stats.duplicated, 0,
        "a camera faster than the target always has a fresh frame"
    );
    assert!(
        stats.captured > stats.collated,
        "camera frames must be skipped, captured={} collated={}",
        stats.captured,
        stats.collated
    );
}
