// SPDX-License-Identifier: GPL-3.0-only

//! Per-camera handler
//!
//! Assembles one camera's full pipeline (device → capture → collator →
//! processor → recorder) and enforces the lifecycle state machine:
//!
//! ```text
//! Uninitialized → Active ⇄ Paused
//!                   ↓ start_recording / stop_recording
//!                 Recording
//!                   ↓ cleanup
//!                 Cleaning → Closed
//! ```
//!
//! Initialization failures release everything already opened before the
//! error propagates; cleanup runs every stage in order and never lets one
//! stage's failure skip the rest.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::camera::capture::CaptureLoop;
use crate::camera::collator::CollatorLoop;
use crate::camera::driver::{CameraDriver, CameraInfo, SharedDevice};
use crate::camera::overlay::{FrameOverlay, OverlayRenderer};
use crate::camera::processor::ProcessorLoop;
use crate::camera::types::{PreviewFrame, StreamConfig};
use crate::config::CameraConfig;
use crate::constants::{CAMERA_FPS_MAX, CAMERA_FPS_MIN};
use crate::errors::{CameraError, RecordingError};
use crate::recording::RecordingManager;

/// Handler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Uninitialized,
    Active,
    Paused,
    Recording,
    Cleaning,
    Closed,
}

/// One camera's pipeline and lifecycle.
pub struct CameraHandler {
    pub cam_num: usize,
    device: SharedDevice,
    capture: Arc<CaptureLoop>,
    collator: Arc<CollatorLoop>,
    processor: Arc<ProcessorLoop>,
    recorder: Arc<RecordingManager>,
    state: Mutex<HandlerState>,
    session_dir: Mutex<Option<PathBuf>>,
    effective_fps: f64,
}

impl CameraHandler {
    /// Clamp the requested rate into the supported camera range.
    fn validate_fps(requested: f64) -> f64 {
        requested.clamp(CAMERA_FPS_MIN, CAMERA_FPS_MAX)
    }

    /// Open the camera with the dual-stream layout, register the overlay
    /// callback, and start the capture/collation/processing loops.
    pub fn init(
        driver: &dyn CameraDriver,
        info: &CameraInfo,
        cam_num: usize,
        config: &CameraConfig,
        session_dir: Option<PathBuf>,
    ) -> Result<Arc<Self>, CameraError> {
        info!(camera = cam_num, model = %info.model, "Initializing camera");

        let requested_fps = config.target_fps;
        let effective_fps = Self::validate_fps(requested_fps);
        if (effective_fps - requested_fps).abs() > f64::EPSILON {
            warn!(
                camera = cam_num,
                requested = requested_fps,
                effective = effective_fps,
                "Requested FPS outside supported range, clamped"
            );
        }
        let frame_duration_us = (1_000_000.0 / effective_fps).round() as u64;

        let stream_config = StreamConfig {
            main_size: (config.width, config.height),
            lores_size: (config.preview_width, config.preview_height),
            frame_duration_us,
        };

        let device = driver.open(info, &stream_config)?;
        let device: SharedDevice = Arc::new(Mutex::new(device));

        // Post-callback registered exactly once, for the device's lifetime.
        let overlay = FrameOverlay::new(cam_num, config.overlay.clone());
        device
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_post_callback(overlay.post_callback());

        let auto_remux = !config.disable_mp4_conversion;
        let recorder = Arc::new(RecordingManager::new(
            cam_num,
            Arc::clone(&device),
            (config.width, config.height),
            effective_fps,
            config.bitrate_bps,
            config.enable_csv_timing_log,
            auto_remux,
            overlay,
        ));

        let capture = Arc::new(CaptureLoop::new(cam_num, Arc::clone(&device)));
        let collator = Arc::new(CollatorLoop::new(
            cam_num,
            effective_fps,
            Arc::clone(&capture),
        ));
        let renderer = Arc::new(OverlayRenderer::new(config.overlay.clone()));
        let processor = Arc::new(ProcessorLoop::new(
            cam_num,
            Arc::clone(&collator),
            Arc::clone(&recorder),
            renderer,
        ));

        capture.start();
        collator.start();
        processor.start();

        info!(
            camera = cam_num,
            fps = effective_fps,
            frame_duration_us,
            main = format!("{}x{}", config.width, config.height),
            lores = format!("{}x{}", config.preview_width, config.preview_height),
            "Camera initialized (dual-stream RGB888)"
        );

        Ok(Arc::new(Self {
            cam_num,
            device,
            capture,
            collator,
            processor,
            recorder,
            state: Mutex::new(HandlerState::Active),
            session_dir: Mutex::new(session_dir),
            effective_fps,
        }))
    }

    pub fn state(&self) -> HandlerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_recording(&self) -> bool {
        self.state() == HandlerState::Recording
    }

    pub fn effective_fps(&self) -> f64 {
        self.effective_fps
    }

    pub fn capture(&self) -> &CaptureLoop {
        &self.capture
    }

    pub fn collator(&self) -> &CollatorLoop {
        &self.collator
    }

    pub fn processor(&self) -> &ProcessorLoop {
        &self.processor
    }

    pub fn recorder(&self) -> &RecordingManager {
        &self.recorder
    }

    /// Latest preview frame (overlaid lores pixels).
    pub fn get_display_frame(&self) -> Option<PreviewFrame> {
        self.processor.get_display_frame()
    }

    /// Start recording into `session_dir`. Rejects a second start while one
    /// is already in progress.
    pub async fn start_recording(&self, session_dir: &Path) -> Result<(), RecordingError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                HandlerState::Recording => return Err(RecordingError::AlreadyRecording),
                HandlerState::Active => {}
                other => {
                    return Err(RecordingError::EncoderStartFailed(format!(
                        "handler not active (state: {other:?})"
                    )));
                }
            }
            // Claim the state up front so a concurrent start is rejected
            // while this one is still bringing the encoder up.
            *state = HandlerState::Recording;
        }
        *self.session_dir.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(session_dir.to_path_buf());

        let recorder = Arc::clone(&self.recorder);
        let dir = session_dir.to_path_buf();
        let result = tokio::task::spawn_blocking(move || recorder.start_recording(&dir))
            .await
            .unwrap_or_else(|e| {
                Err(RecordingError::EncoderStartFailed(format!(
                    "start task failed: {e}"
                )))
            });

        if result.is_err() {
            *self.state.lock().unwrap_or_else(|e| e.into_inner()) = HandlerState::Active;
        }
        result
    }

    /// Stop an active recording. Idempotent: stopping while not recording is
    /// a no-op.
    pub async fn stop_recording(&self) -> Result<(), RecordingError> {
        let recorder = Arc::clone(&self.recorder);
        let result = tokio::task::spawn_blocking(move || recorder.stop_recording())
            .await
            .unwrap_or_else(|e| Err(RecordingError::EncoderStopFailed(format!("{e}"))));

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == HandlerState::Recording {
            *state = HandlerState::Active;
        }
        result
    }

    /// Pause capture and processing without releasing the camera. Refused
    /// while recording.
    pub fn pause(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            HandlerState::Recording => {
                warn!(camera = self.cam_num, "Refusing to pause while recording");
                false
            }
            HandlerState::Active => {
                self.capture.pause();
                self.processor.pause();
                *state = HandlerState::Paused;
                info!(camera = self.cam_num, "Camera paused");
                true
            }
            _ => false,
        }
    }

    /// Resume a paused camera.
    pub fn resume(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != HandlerState::Paused {
            return false;
        }
        self.capture.resume();
        self.processor.resume();
        *state = HandlerState::Active;
        info!(camera = self.cam_num, "Camera resumed");
        true
    }

    /// Tear down in strict order: recording → device → loops → release.
    /// Every step runs regardless of earlier failures.
    pub async fn cleanup(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == HandlerState::Closed || *state == HandlerState::Cleaning {
                return;
            }
            *state = HandlerState::Cleaning;
        }

        // 1. Stop recording if active.
        self.recorder.cleanup_async().await;

        // 2. Stop the camera device; in-flight capture requests fail fast
        //    from here on.
        self.device.lock().unwrap_or_else(|e| e.into_inner()).stop();

        // 3 & 4. Stop the loops; each waits a bounded time for its task.
        self.capture.stop().await;
        self.collator.stop().await;
        self.processor.stop().await;

        // 5. Device handle released when the last Arc clone drops.
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = HandlerState::Closed;
        info!(camera = self.cam_num, "Cleanup completed");
    }
}
