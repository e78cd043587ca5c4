// SPDX-License-Identifier: GPL-3.0-only

//! Lifecycle idempotence: repeated starts, stops, and cleanups must behave
//! like a single call.

mod common;

use std::sync::Arc;
use std::time::Duration;

use multicam::camera::capture::CaptureLoop;
use multicam::camera::collator::CollatorLoop;
use multicam::camera::virtual_driver::VirtualCameraDriver;
use multicam::system::{CameraSystem, RunMode};
use tokio::sync::watch;

#[tokio::test]
async fn repeated_capture_start_spawns_one_loop() {
    let driver = VirtualCameraDriver::new(1);
    let device = common::open_virtual_device(&driver, 30.0);
    let capture = Arc::new(CaptureLoop::new(0, device));

    capture.start();
    capture.start();
    capture.start();
    tokio::time::sleep(Duration::from_millis(500)).await;

    // A doubled loop would capture at roughly twice the configured rate.
    let count = capture.get_frame_count();
    assert!(
        count <= 25,
        "30fps over 0.5s must stay near 15 frames, got {count}"
    );
    assert!(count >= 5, "capture must be running, got {count}");

    capture.stop().await;
    capture.stop().await;
}

#[tokio::test]
async fn stopping_idle_loops_is_a_no_op() {
    let driver = VirtualCameraDriver::new(1);
    let device = common::open_virtual_device(&driver, 30.0);
    let capture = Arc::new(CaptureLoop::new(0, device));
    let collator = CollatorLoop::new(0, 30.0, Arc::clone(&capture));

    // Never started: both stops return without hanging.
    collator.stop().await;
    capture.stop().await;
}

#[tokio::test]
async fn handler_cleanup_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::test_config(dir.path(), 30.0);
    let driver = Arc::new(VirtualCameraDriver::new(1));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut system = CameraSystem::new(config, driver, RunMode::Headless, shutdown_rx);
    system.initialize().await.expect("initialize");

    let handler = Arc::clone(&system.handlers()[0]);
    handler.cleanup().await;
    assert_eq!(handler.state(), multicam::camera::HandlerState::Closed);
    handler.cleanup().await;
    assert_eq!(handler.state(), multicam::camera::HandlerState::Closed);

    // System-level cleanup over an already-closed handler stays quiet.
    system.cleanup().await;
}

#[tokio::test]
async fn cleanup_while_recording_stops_and_finalizes() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::test_config(dir.path(), 30.0);
    let driver = Arc::new(VirtualCameraDriver::new(1));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut system = CameraSystem::new(config, driver, RunMode::Headless, shutdown_rx);
    system.initialize().await.expect("initialize");

    system.start_recording_all().await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    // No explicit stop: cleanup must stop the recording first.
    system.cleanup().await;

    let csvs = common::find_files(dir.path(), "_frame_timing.csv");
    assert_eq!(csvs.len(), 1);
    let rows = common::parse_timing_csv(&csvs[0]);
    assert!(!rows.is_empty(), "rows were flushed before shutdown");
    assert_eq!(common::find_files(dir.path(), ".h264").len(), 1);
}
