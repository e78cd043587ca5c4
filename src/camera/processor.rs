// SPDX-License-Identifier: GPL-3.0-only

//! Processor loop
//!
//! Glue between the collator and the preview/recording sides: takes the
//! newest collated frame, submits timing metadata to the recorder while a
//! recording is active (pixels never pass through here — the encoder gets
//! them straight from the camera), overlays the display frame number onto
//! the preview pixels, and publishes the result into the display slot.
//!
//! Overlay rendering is the only per-frame pixel work and runs on the
//! worker pool to keep the scheduling thread free.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::camera::collator::CollatorLoop;
use crate::camera::driver::PlaneMut;
use crate::camera::overlay::OverlayRenderer;
use crate::camera::types::{FrameTimingMetadata, PixelBuffer, PreviewFrame};
use crate::constants::{PAUSE_IDLE_SLEEP, TASK_CANCEL_TIMEOUT};
use crate::recording::manager::RecordingManager;

/// Thread-safe single-slot mailbox for the latest preview frame,
/// overwritten on every processed frame.
#[derive(Default)]
pub struct DisplaySlot {
    inner: Mutex<Option<PreviewFrame>>,
}

impl DisplaySlot {
    fn update(&self, frame: PreviewFrame) {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(frame);
    }

    /// Latest preview frame. Returns a clone of the shared handle — pixel
    /// data is reference-counted and never mutated after publication, so no
    /// snapshot copy is needed.
    pub fn get(&self) -> Option<PreviewFrame> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

struct ProcessorShared {
    processed_frames: AtomicU64,
    paused: AtomicBool,
    running: AtomicBool,
}

/// Per-camera processing loop handle.
pub struct ProcessorLoop {
    camera_id: usize,
    collator: Arc<CollatorLoop>,
    recorder: Arc<RecordingManager>,
    renderer: Arc<OverlayRenderer>,
    display: Arc<DisplaySlot>,
    shared: Arc<ProcessorShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessorLoop {
    pub fn new(
        camera_id: usize,
        collator: Arc<CollatorLoop>,
        recorder: Arc<RecordingManager>,
        renderer: Arc<OverlayRenderer>,
    ) -> Self {
        Self {
            camera_id,
            collator,
            recorder,
            renderer,
            display: Arc::new(DisplaySlot::default()),
            shared: Arc::new(ProcessorShared {
                processed_frames: AtomicU64::new(0),
                paused: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the processing task. Idempotent.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let collator = Arc::clone(&self.collator);
        let recorder = Arc::clone(&self.recorder);
        let renderer = Arc::clone(&self.renderer);
        let display = Arc::clone(&self.display);
        let shared = Arc::clone(&self.shared);
        let camera_id = self.camera_id;
        let handle = tokio::spawn(async move {
            processing_task(camera_id, collator, recorder, renderer, display, shared).await;
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!(camera = self.camera_id, "Camera processor started");
    }

    /// Stop the processing task. Idempotent.
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
                    "Processor task did not exit in time, aborting"
                );
                abort.abort();
            }
        }
        info!(camera = self.camera_id, "Camera processor stopped");
    }

    /// Idle without releasing downstream resources.
    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::SeqCst) {
            info!(camera = self.camera_id, "Processor paused");
        }
    }

    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            info!(camera = self.camera_id, "Processor resumed");
        }
    }

    /// Latest preview frame for external consumers (snapshots, preview
    /// streaming).
    pub fn get_display_frame(&self) -> Option<PreviewFrame> {
        self.display.get()
    }

    /// Total frames processed since start.
    pub fn get_frame_count(&self) -> u64 {
        self.shared.processed_frames.load(Ordering::Relaxed)
    }
}

async fn processing_task(
    camera_id: usize,
    collator: Arc<CollatorLoop>,
    recorder: Arc<RecordingManager>,
    renderer: Arc<OverlayRenderer>,
    display: Arc<DisplaySlot>,
    shared: Arc<ProcessorShared>,
) {
    info!(camera = camera_id, "Entering processing loop");

    // Canonical display numbering: follows the hardware frame number (so
    // sensor drops leave visible gaps) but stays strictly increasing even
    // across duplicate emissions, where the hardware number stalls.
    let mut last_display: Option<u64> = None;
    // (hardware number, capture index) of the last non-duplicate emission;
    // the delta between the two recovers drops on frames the collator
    // skipped.
    let mut last_emitted: Option<(u64, u64)> = None;

    while shared.running.load(Ordering::SeqCst) {
        if shared.paused.load(Ordering::SeqCst) {
            tokio::time::sleep(PAUSE_IDLE_SLEEP).await;
            continue;
        }

        let Some(collated) = collator.get_frame().await else {
            // Queue empty past its adaptive timeout; brief sleep avoids a
            // tight spin when the camera is stalled.
            tokio::time::sleep(Duration::from_millis(1)).await;
            continue;
        };

        let frame = &collated.frame;
        let display_frame_number = match last_display {
            None => frame.hardware_frame_number,
            Some(prev) => frame.hardware_frame_number.max(prev + 1),
        };
        last_display = Some(display_frame_number);

        // A duplicate emission re-delivers pixels the sensor produced once;
        // its drops were accounted on the original. For a fresh frame, the
        // hardware-vs-capture-index delta since the previous fresh emission
        // also covers drops carried by frames the collator skipped.
        let dropped = if collated.is_duplicate {
            frame.sensor_timestamp_ns.map(|_| 0)
        } else {
            let drops = match last_emitted {
                Some((prev_hw, prev_idx)) => {
                    let hw_delta = frame.hardware_frame_number.saturating_sub(prev_hw);
                    let idx_delta = frame.capture_frame_index.saturating_sub(prev_idx);
                    hw_delta.saturating_sub(idx_delta)
                }
                None => frame.dropped_since_last,
            };
            last_emitted = Some((frame.hardware_frame_number, frame.capture_frame_index));
            frame.sensor_timestamp_ns.map(|_| drops)
        };

        if recorder.is_recording() {
            let metadata = FrameTimingMetadata {
                sensor_timestamp_ns: frame.sensor_timestamp_ns,
                dropped_since_last: dropped,
                display_frame_index: Some(display_frame_number),
                hardware_frame_number: Some(frame.hardware_frame_number),
                software_frame_index: Some(frame.capture_frame_index),
            };
            // Metadata only; the encoder receives pixels directly from the
            // camera's main stream.
            recorder.submit_frame(None, metadata);
        }

        // Preview overlay on the worker pool; the buffer copy happens there
        // too so this task never touches pixel data.
        let preview = if renderer.enabled() {
            let pixels = frame.pixels.clone();
            let renderer = Arc::clone(&renderer);
            let rendered = tokio::task::spawn_blocking(move || {
                let mut data = pixels.to_mut_vec();
                let mut plane = PlaneMut {
                    data: &mut data[..],
                    width: pixels.width,
                    height: pixels.height,
                    stride: pixels.stride,
                };
                renderer.draw_frame_number(&mut plane, display_frame_number);
                PixelBuffer {
                    data: Arc::from(data),
                    width: pixels.width,
                    height: pixels.height,
                    stride: pixels.stride,
                }
            })
            .await;
            match rendered {
                Ok(pixels) => pixels,
                Err(e) => {
                    warn!(camera = camera_id, error = %e, "Preview overlay task failed");
                    frame.pixels.clone()
                }
            }
        } else {
            frame.pixels.clone()
        };

        display.update(PreviewFrame {
            pixels: preview,
            frame_number: display_frame_number,
        });
        shared.processed_frames.fetch_add(1, Ordering::Relaxed);
    }

    info!(camera = camera_id, "Exited processing loop");
}
