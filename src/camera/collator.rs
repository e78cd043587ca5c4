// SPDX-License-Identifier: GPL-3.0-only

//! Collator loop
//!
//! Emits frames at a fixed target rate regardless of the camera's native
//! rate: the previous frame is re-emitted (`is_duplicate = true`) when the
//! capture loop has produced nothing new since the last tick, and capture
//! frames are silently skipped when the camera runs faster than the target.
//!
//! The output queue is bounded (capacity 10) with a drop-oldest overflow
//! policy; the consumer side reads newest-only. Together these keep the
//! downstream path fresh when the processor lags without ever blocking
//! capture.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::camera::capture::CaptureLoop;
use crate::camera::fps::RollingFps;
use crate::camera::types::CollatedFrame;
use crate::constants::{COLLATOR_QUEUE_SIZE, TASK_CANCEL_TIMEOUT};

/// Bounded frame queue: drop-oldest on push overflow, newest-only on read.
pub(crate) struct FrameQueue {
    inner: Mutex<VecDeque<CollatedFrame>>,
    notify: Notify,
    capacity: usize,
}

impl FrameQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Non-blocking push; evicts the oldest queued frame when full.
    pub(crate) fn push(&self, frame: CollatedFrame) {
        {
            let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if queue.len() >= self.capacity {
                queue.pop_front();
            }
            queue.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Take the newest queued frame, discarding everything older.
    pub(crate) fn pop_newest(&self) -> Option<CollatedFrame> {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let newest = queue.pop_back();
        queue.clear();
        newest
    }

    /// Newest frame, waiting up to `timeout` when the queue is empty.
    pub(crate) async fn pop_newest_or_wait(&self, timeout: Duration) -> Option<CollatedFrame> {
        if let Some(frame) = self.pop_newest() {
            return Some(frame);
        }
        match tokio::time::timeout(timeout, self.notify.notified()).await {
            Ok(()) => self.pop_newest(),
            Err(_) => None,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct CollatorShared {
    fps: RollingFps,
    collated_frames: AtomicU64,
    duplicated_frames: AtomicU64,
    running: AtomicBool,
}

/// Per-camera collation loop handle.
pub struct CollatorLoop {
    camera_id: usize,
    target_fps: f64,
    capture: Arc<CaptureLoop>,
    shared: Arc<CollatorShared>,
    queue: Arc<FrameQueue>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CollatorLoop {
    pub fn new(camera_id: usize, target_fps: f64, capture: Arc<CaptureLoop>) -> Self {
        Self {
            camera_id,
            target_fps,
            capture,
            shared: Arc::new(CollatorShared {
                fps: RollingFps::default(),
                collated_frames: AtomicU64::new(0),
                duplicated_frames: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
            queue: Arc::new(FrameQueue::new(COLLATOR_QUEUE_SIZE)),
            task: Mutex::new(None),
        }
    }

    /// Start the collation task. Idempotent.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let capture = Arc::clone(&self.capture);
        let shared = Arc::clone(&self.shared);
        let queue = Arc::clone(&self.queue);
        let target_fps = self.target_fps;
        let camera_id = self.camera_id;
        let handle = tokio::spawn(async move {
            collation_task(camera_id, target_fps, capture, shared, queue).await;
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!(
            camera = self.camera_id,
            target_fps = self.target_fps,
            "Camera collation loop started"
        );
    }

    /// Stop the collation task and discard queued frames. Idempotent.
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
                    "Collation task did not exit in time, aborting"
                );
                abort.abort();
            }
        }
        // Drain anything still queued so frames are released promptly.
        while self.queue.pop_newest().is_some() {}
        info!(camera = self.camera_id, "Camera collation loop stopped");
    }

    /// Newest collated frame, discarding older queued frames first. Waits up
    /// to `2 / target_fps` seconds when the queue is empty; `None` on
    /// timeout.
    pub async fn get_frame(&self) -> Option<CollatedFrame> {
        let timeout = if self.target_fps > 0.0 {
            Duration::from_secs_f64(2.0 / self.target_fps)
        } else {
            Duration::from_millis(100)
        };
        self.queue.pop_newest_or_wait(timeout).await
    }

    /// Measured collation rate over the rolling window.
    pub fn get_fps(&self) -> f64 {
        self.shared.fps.fps()
    }

    /// Total frames emitted since start.
    pub fn get_frame_count(&self) -> u64 {
        self.shared.collated_frames.load(Ordering::Relaxed)
    }

    /// Frames emitted as duplicates of their predecessor.
    pub fn get_duplicate_count(&self) -> u64 {
        self.shared.duplicated_frames.load(Ordering::Relaxed)
    }
}

async fn collation_task(
    camera_id: usize,
    target_fps: f64,
    capture: Arc<CaptureLoop>,
    shared: Arc<CollatorShared>,
    queue: Arc<FrameQueue>,
) {
    info!(camera = camera_id, target_fps, "Entering collation loop");

    let frame_interval = if target_fps > 0.0 {
        Duration::from_secs_f64(1.0 / target_fps)
    } else {
        Duration::from_millis(33)
    };
    let mut next_tick = Instant::now() + frame_interval;
    let mut last_capture_index: Option<u64> = None;

    while shared.running.load(Ordering::SeqCst) {
        tokio::time::sleep_until(next_tick).await;
        next_tick += frame_interval;

        let Some(frame) = capture.get_latest_frame() else {
            // Nothing captured yet: skip this tick entirely.
            continue;
        };

        let is_duplicate = last_capture_index == Some(frame.capture_frame_index);
        last_capture_index = Some(frame.capture_frame_index);

        let collated_frame_num = shared.collated_frames.fetch_add(1, Ordering::Relaxed) + 1;
        if is_duplicate {
            shared.duplicated_frames.fetch_add(1, Ordering::Relaxed);
        }
        shared.fps.add_frame();

        queue.push(CollatedFrame {
            frame,
            is_duplicate,
            collated_frame_num,
        });
    }

    info!(camera = camera_id, "Exited collation loop");
}
