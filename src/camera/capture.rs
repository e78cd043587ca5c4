// SPDX-License-Identifier: GPL-3.0-only

//! Capture loop
//!
//! Pulls frames from the camera as fast as the sensor delivers them, derives
//! hardware frame numbers and drop counts from sensor timestamp deltas, and
//! publishes the latest frame atomically. Consumers either poll the slot
//! ([`CaptureLoop::get_latest_frame`]) or wait for the next publish through a
//! [`FrameWaiter`].
//!
//! The blocking per-frame hardware wait runs on the worker pool with a hard
//! 5 s timeout; a timeout is the only tolerated hardware hang and is retried
//! after a back-off without exiting the loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::camera::driver::{CompletedRequest, SharedDevice};
use crate::camera::fps::RollingFps;
use crate::camera::types::CapturedFrame;
use crate::constants::{
    CAPTURE_ERROR_BACKOFF, CAPTURE_HANG_BACKOFF, CAPTURE_REQUEST_TIMEOUT, FRAME_DURATION_MAX_US,
    FRAME_DURATION_MIN_US, FRAME_LOG_COUNT, FRAME_WAIT_TIMEOUT, LOG_EVERY_N_FRAMES,
    PAUSE_IDLE_SLEEP, TASK_CANCEL_TIMEOUT,
};
use crate::errors::CameraError;

/// Sensor-timestamp-based drop detection state.
///
/// `hardware_frame_number` advances by `round(Δts / expected_interval)` per
/// frame; anything beyond one interval is counted as dropped frames.
#[derive(Debug, Default)]
struct DropDetector {
    last_sensor_timestamp_ns: Option<u64>,
    expected_frame_interval_ns: Option<u64>,
    hardware_frame_number: u64,
}

impl DropDetector {
    /// Accept a frame duration only when it is inside the believable range;
    /// out-of-range values leave the expected interval untouched.
    fn update_interval(&mut self, frame_duration_us: u64) -> bool {
        if (FRAME_DURATION_MIN_US..=FRAME_DURATION_MAX_US).contains(&frame_duration_us) {
            self.expected_frame_interval_ns = Some(frame_duration_us * 1_000);
            true
        } else {
            false
        }
    }

    /// Feed one frame's sensor timestamp (if any); returns the hardware frame
    /// number and the drops detected immediately before this frame.
    fn observe(&mut self, sensor_timestamp_ns: Option<u64>, captured_frames: u64) -> (u64, u64) {
        let Some(ts) = sensor_timestamp_ns else {
            // No hardware timestamps: fall back to the software counter.
            self.hardware_frame_number = captured_frames;
            return (self.hardware_frame_number, 0);
        };

        let mut dropped = 0u64;
        match (self.last_sensor_timestamp_ns, self.expected_frame_interval_ns) {
            (Some(last), Some(interval)) if interval > 0 => {
                let delta_ns = ts.saturating_sub(last);
                let intervals = (delta_ns as f64 / interval as f64).round() as u64;
                dropped = intervals.saturating_sub(1);
                self.hardware_frame_number += intervals;
            }
            _ => {
                // First frame with a valid timestamp: initialize tracking,
                // do not advance until a second timestamp arrives.
                if self.last_sensor_timestamp_ns.is_none() {
                    self.hardware_frame_number = 0;
                }
            }
        }
        self.last_sensor_timestamp_ns = Some(ts);
        (self.hardware_frame_number, dropped)
    }
}

/// State shared between the capture task and its consumers.
struct CaptureShared {
    latest: Mutex<Option<Arc<CapturedFrame>>>,
    fps: RollingFps,
    captured_frames: AtomicU64,
    /// Camera-reported rate, `f64` bits stored atomically
    hardware_fps_bits: AtomicU64,
    paused: AtomicBool,
    running: AtomicBool,
}

/// Per-camera capture loop handle.
pub struct CaptureLoop {
    camera_id: usize,
    device: SharedDevice,
    shared: Arc<CaptureShared>,
    seq_tx: watch::Sender<u64>,
    seq_rx: watch::Receiver<u64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureLoop {
    pub fn new(camera_id: usize, device: SharedDevice) -> Self {
        let (seq_tx, seq_rx) = watch::channel(0u64);
        Self {
            camera_id,
            device,
            shared: Arc::new(CaptureShared {
                latest: Mutex::new(None),
                fps: RollingFps::default(),
                captured_frames: AtomicU64::new(0),
                hardware_fps_bits: AtomicU64::new(0f64.to_bits()),
                paused: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            seq_tx,
            seq_rx,
            task: Mutex::new(None),
        }
    }

    /// Start the capture task. Idempotent.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let device = Arc::clone(&self.device);
        let shared = Arc::clone(&self.shared);
        let seq_tx = self.seq_tx.clone();
        let camera_id = self.camera_id;
        let handle = tokio::spawn(async move {
            capture_task(camera_id, device, shared, seq_tx).await;
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!(camera = self.camera_id, "Camera capture loop started");
    }

    /// Stop the capture task, waiting a bounded time for it to exit.
    /// Idempotent.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(TASK_CANCEL_TIMEOUT, handle).await.is_err() {
                warn!(
                    camera = self.camera_id,
                    "Capture task did not exit in time, aborting"
                );
                abort.abort();
            }
        }
        info!(camera = self.camera_id, "Camera capture loop stopped");
    }

    /// Pause capture without releasing the device (idle sleep, no hardware
    /// polling).
    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::SeqCst) {
            info!(camera = self.camera_id, "Capture loop paused");
        }
    }

    /// Resume a paused capture loop.
    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            info!(camera = self.camera_id, "Capture loop resumed");
        }
    }

    /// Most recently published frame, if any. Non-blocking; may return the
    /// same frame on consecutive calls.
    pub fn get_latest_frame(&self) -> Option<Arc<CapturedFrame>> {
        self.shared
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// A waiter that blocks until a frame newer than its last wake is
    /// published.
    pub fn subscribe(&self) -> FrameWaiter {
        FrameWaiter {
            rx: self.seq_rx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Measured capture rate over the rolling window.
    pub fn get_fps(&self) -> f64 {
        self.shared.fps.fps()
    }

    /// Camera-reported rate (`1e6 / FrameDuration`).
    pub fn get_hardware_fps(&self) -> f64 {
        f64::from_bits(self.shared.hardware_fps_bits.load(Ordering::Relaxed))
    }

    /// Total frames captured since start.
    pub fn get_frame_count(&self) -> u64 {
        self.shared.captured_frames.load(Ordering::Relaxed)
    }
}

/// Blocks on the frame-ready signal; each waiter tracks its own last wake.
pub struct FrameWaiter {
    rx: watch::Receiver<u64>,
    shared: Arc<CaptureShared>,
}

impl FrameWaiter {
    /// Wait for a frame published after this waiter's previous wake.
    pub async fn wait_for_frame(
        &mut self,
        timeout: Duration,
    ) -> Result<Arc<CapturedFrame>, CameraError> {
        match tokio::time::timeout(timeout, self.rx.changed()).await {
            Ok(Ok(())) => self
                .shared
                .latest
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
                .ok_or(CameraError::FrameWaitTimeout),
            Ok(Err(_)) => Err(CameraError::Disconnected),
            Err(_) => Err(CameraError::FrameWaitTimeout),
        }
    }

    /// Wait with the default deadline.
    pub async fn wait(&mut self) -> Result<Arc<CapturedFrame>, CameraError> {
        self.wait_for_frame(FRAME_WAIT_TIMEOUT).await
    }
}

async fn capture_task(
    camera_id: usize,
    device: SharedDevice,
    shared: Arc<CaptureShared>,
    seq_tx: watch::Sender<u64>,
) {
    info!(camera = camera_id, "Entering capture loop (lores stream)");
    let mut detector = DropDetector::default();

    while shared.running.load(Ordering::SeqCst) {
        if shared.paused.load(Ordering::SeqCst) {
            tokio::time::sleep(PAUSE_IDLE_SLEEP).await;
            continue;
        }

        // Blocking hardware wait on the worker pool, hard 5 s deadline.
        let dev = Arc::clone(&device);
        let result = tokio::task::spawn_blocking(move || {
            dev.lock()
                .unwrap_or_else(|e| e.into_inner())
                .capture_request(CAPTURE_REQUEST_TIMEOUT)
        })
        .await;

        let request = match result {
            Ok(Ok(request)) => request,
            Ok(Err(CameraError::CaptureTimeout)) => {
                error!(
                    camera = camera_id,
                    "Camera capture timed out after {:?} (hardware may be hung)",
                    CAPTURE_REQUEST_TIMEOUT
                );
                tokio::time::sleep(CAPTURE_HANG_BACKOFF).await;
                continue;
            }
            Ok(Err(CameraError::Disconnected)) => {
                if shared.running.load(Ordering::SeqCst) {
                    debug!(camera = camera_id, "Device stopped, idling capture loop");
                }
                tokio::time::sleep(CAPTURE_ERROR_BACKOFF).await;
                continue;
            }
            Ok(Err(e)) => {
                if shared.running.load(Ordering::SeqCst) {
                    error!(camera = camera_id, error = %e, "Capture error");
                }
                tokio::time::sleep(CAPTURE_ERROR_BACKOFF).await;
                continue;
            }
            Err(e) => {
                error!(camera = camera_id, error = %e, "Capture worker panicked");
                tokio::time::sleep(CAPTURE_ERROR_BACKOFF).await;
                continue;
            }
        };

        publish_frame(camera_id, request, &mut detector, &shared, &seq_tx);
    }

    info!(camera = camera_id, "Exited capture loop");
}

fn publish_frame(
    camera_id: usize,
    request: CompletedRequest,
    detector: &mut DropDetector,
    shared: &CaptureShared,
    seq_tx: &watch::Sender<u64>,
) {
    let captured_frames = shared.captured_frames.load(Ordering::Relaxed);

    let mut hardware_fps = 0.0;
    if let Some(duration_us) = request.metadata.frame_duration_us {
        if detector.update_interval(duration_us) {
            hardware_fps = 1_000_000.0 / duration_us as f64;
            shared
                .hardware_fps_bits
                .store(hardware_fps.to_bits(), Ordering::Relaxed);
            if captured_frames < FRAME_LOG_COUNT {
                info!(
                    camera = camera_id,
                    frame = captured_frames,
                    frame_duration_us = duration_us,
                    "Frame duration accepted"
                );
            }
        } else if duration_us > 0 {
            warn!(
                camera = camera_id,
                frame = captured_frames,
                frame_duration_us = duration_us,
                "Frame duration outside believable range, ignoring"
            );
        }
    }

    let (hardware_frame_number, dropped_since_last) =
        detector.observe(request.metadata.sensor_timestamp_ns, captured_frames);

    if dropped_since_last > 0 {
        warn!(
            camera = camera_id,
            frame = captured_frames,
            dropped = dropped_since_last,
            hardware_frame_number,
            "Sensor timestamp gap detected"
        );
    }
    if request.metadata.sensor_timestamp_ns.is_none() && captured_frames < FRAME_LOG_COUNT {
        warn!(
            camera = camera_id,
            frame = captured_frames,
            "No sensor timestamp in metadata, using software frame counter"
        );
    }

    let frame = Arc::new(CapturedFrame {
        pixels: request.lores,
        capture_time: request.completed_at,
        captured_at: std::time::Instant::now(),
        sensor_timestamp_ns: request.metadata.sensor_timestamp_ns,
        capture_frame_index: captured_frames,
        hardware_frame_number,
        dropped_since_last,
        hardware_fps,
    });

    if captured_frames < FRAME_LOG_COUNT {
        info!(
            camera = camera_id,
            capture_frame_index = frame.capture_frame_index,
            hardware_frame_number = frame.hardware_frame_number,
            dropped_since_last = frame.dropped_since_last,
            "Frame metadata attached"
        );
    }

    // Short single-writer publish: pointer swap only, no pixel copy.
    {
        let mut latest = shared.latest.lock().unwrap_or_else(|e| e.into_inner());
        *latest = Some(frame);
    }
    let total = shared.captured_frames.fetch_add(1, Ordering::Relaxed) + 1;
    shared.fps.add_frame();

    if total.is_multiple_of(LOG_EVERY_N_FRAMES) {
        debug!(
            camera = camera_id,
            frames = total,
            fps = format!("{:.1}", shared.fps.fps()),
            hardware_frame_number,
            "Capture progress"
        );
    }

    // Level-triggered frame-ready signal.
    let _ = seq_tx.send(total);
}
