// SPDX-License-Identifier: GPL-3.0-only

//! Hardware-timestamp drop detection through the capture pipeline.

mod common;

use std::sync::Arc;
use std::time::Duration;

use multicam::camera::capture::CaptureLoop;
use multicam::camera::virtual_driver::VirtualCameraDriver;
use multicam::errors::CameraError;

#[tokio::test]
async fn injected_stall_is_detected_as_drops() {
    let driver = VirtualCameraDriver::new(1);
    let faults = driver.fault_injector(0);
    let device = common::open_virtual_device(&driver, 30.0);

    let capture = Arc::new(CaptureLoop::new(0, device));
    capture.start();
    let mut waiter = capture.subscribe();

    // Let drop detection lock onto the interval first.
    for _ in 0..5 {
        waiter
            .wait_for_frame(Duration::from_secs(2))
            .await
            .expect("warm-up frame");
    }

    let before = waiter
        .wait_for_frame(Duration::from_secs(2))
        .await
        .expect("reference frame");

    // One second of silence from the sensor.
    faults.inject_timestamp_gap(Duration::from_secs(1));

    // Hardware numbering advances by drops + 1 per captured frame, so the
    // delta over a few frames isolates the gap regardless of which exact
    // frame this waiter observes.
    let mut after = waiter
        .wait_for_frame(Duration::from_secs(2))
        .await
        .expect("frame after gap");
    while after.capture_frame_index < before.capture_frame_index + 3 {
        after = waiter
            .wait_for_frame(Duration::from_secs(2))
            .await
            .expect("frame after gap");
    }

    let hw_delta = after.hardware_frame_number - before.hardware_frame_number;
    let index_delta = after.capture_frame_index - before.capture_frame_index;
    let dropped = hw_delta - index_delta;
    assert!(
        (29..=31).contains(&dropped),
        "1s gap at 30fps should account 29..=31 drops, got {dropped}"
    );

    capture.stop().await;
}

#[tokio::test]
async fn hardware_frame_number_tracks_timestamp_deltas() {
    let driver = VirtualCameraDriver::new(1);
    let device = common::open_virtual_device(&driver, 30.0);

    let capture = Arc::new(CaptureLoop::new(0, device));
    capture.start();
    let mut waiter = capture.subscribe();

    let mut previous: Option<(u64, u64)> = None;
    for _ in 0..20 {
        let frame = waiter
            .wait_for_frame(Duration::from_secs(2))
            .await
            .expect("frame");
        assert_eq!(frame.dropped_since_last, 0, "healthy sensor has no drops");
        if let Some((prev_hw, prev_idx)) = previous {
            // Without drops the hardware number moves in lockstep with the
            // capture index, however many frames this waiter skipped.
            assert_eq!(
                frame.hardware_frame_number - prev_hw,
                frame.capture_frame_index - prev_idx,
                "hardware number must advance one per captured frame"
            );
        }
        previous = Some((frame.hardware_frame_number, frame.capture_frame_index));
    }

    capture.stop().await;
}

#[tokio::test]
async fn missing_timestamps_fall_back_to_capture_index() {
    let driver = VirtualCameraDriver::new(1);
    driver.fault_injector(0).set_timestamps_enabled(false);
    let device = common::open_virtual_device(&driver, 30.0);

    let capture = Arc::new(CaptureLoop::new(0, device));
    capture.start();
    let mut waiter = capture.subscribe();

    for _ in 0..5 {
        let frame = waiter
            .wait_for_frame(Duration::from_secs(2))
            .await
            .expect("frame");
        assert!(frame.sensor_timestamp_ns.is_none());
        assert_eq!(frame.hardware_frame_number, frame.capture_frame_index);
        assert_eq!(frame.dropped_since_last, 0);
    }

    capture.stop().await;
}

#[tokio::test]
async fn wait_for_frame_times_out_when_capture_is_stopped() {
    let driver = VirtualCameraDriver::new(1);
    let device = common::open_virtual_device(&driver, 30.0);

    // Never started: no frames will ever be published.
    let capture = Arc::new(CaptureLoop::new(0, device));
    let mut waiter = capture.subscribe();

    let result = waiter.wait_for_frame(Duration::from_millis(100)).await;
    assert!(matches!(result, Err(CameraError::FrameWaitTimeout)));
}

#[tokio::test]
async fn paused_capture_publishes_nothing() {
    let driver = VirtualCameraDriver::new(1);
    let device = common::open_virtual_device(&driver, 30.0);

    let capture = Arc::new(CaptureLoop::new(0, device));
    capture.start();
    tokio::time::sleep(Duration::from_millis(300)).await;

    capture.pause();
    // One in-flight request may still land after the pause flag flips.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let count_at_pause = capture.get_frame_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        capture.get_frame_count(),
        count_at_pause,
        "paused capture must not publish frames"
    );

    capture.resume();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        capture.get_frame_count() > count_at_pause,
        "resumed capture must publish again"
    );

    capture.stop().await;
}

#[tokio::test]
async fn device_hang_surfaces_as_capture_timeout() {
    let driver = VirtualCameraDriver::new(1);
    let faults = driver.fault_injector(0);
    let device = common::open_virtual_device(&driver, 30.0);

    faults.inject_hang(Duration::from_millis(300));
    let result = device
        .lock()
        .unwrap()
        .capture_request(Duration::from_millis(100));
    assert!(matches!(result, Err(CameraError::CaptureTimeout)));

    // The hang is one-shot; the next request succeeds.
    let result = device
        .lock()
        .unwrap()
        .capture_request(Duration::from_secs(1));
    assert!(result.is_ok());
}
