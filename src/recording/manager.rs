// SPDX-License-Identifier: GPL-3.0-only

//! Recording manager
//!
//! Owns one camera's encoder lifecycle and timing-CSV lifecycle. The encoder
//! consumes pixels directly from the camera's `main` stream; this manager
//! only ever sees timing metadata. Start and stop are idempotent; encoder
//! start failure unwinds the CSV state it created and surfaces the error so
//! the handler stays out of the recording state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Local;
use tracing::{error, info, warn};

use crate::camera::driver::{EncoderSettings, SharedDevice};
use crate::camera::overlay::FrameOverlay;
use crate::camera::types::{FrameTimingMetadata, PixelBuffer};
use crate::constants::CSV_QUEUE_SIZE;
use crate::errors::RecordingError;
use crate::recording::csv_log::{CsvEntry, CsvLogger, DropAccumulator};
use crate::recording::remux;

struct RecordingState {
    video_path: Option<PathBuf>,
    csv: Option<CsvLogger>,
    /// Monotonic recording generation, bumped at each successful start
    generation: u64,
}

/// Per-camera recording coordinator.
pub struct RecordingManager {
    camera_id: usize,
    device: SharedDevice,
    resolution: (u32, u32),
    fps: f64,
    bitrate_bps: u64,
    enable_csv_logging: bool,
    auto_remux: bool,
    overlay: Arc<FrameOverlay>,
    accumulator: Arc<DropAccumulator>,
    recording: AtomicBool,
    written_frames: AtomicU64,
    state: Mutex<RecordingState>,
}

impl RecordingManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera_id: usize,
        device: SharedDevice,
        resolution: (u32, u32),
        fps: f64,
        bitrate_bps: u64,
        enable_csv_logging: bool,
        auto_remux: bool,
        overlay: Arc<FrameOverlay>,
    ) -> Self {
        Self {
            camera_id,
            device,
            resolution,
            fps,
            bitrate_bps,
            enable_csv_logging,
            auto_remux,
            overlay,
            accumulator: DropAccumulator::new(),
            recording: AtomicBool::new(false),
            written_frames: AtomicU64::new(0),
            state: Mutex::new(RecordingState {
                video_path: None,
                csv: None,
                generation: 0,
            }),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Frames submitted since recording started.
    pub fn written_frames(&self) -> u64 {
        self.written_frames.load(Ordering::Relaxed)
    }

    /// Lifetime hardware drops for the current recording.
    pub fn total_hardware_drops(&self) -> u64 {
        self.accumulator.total()
    }

    /// Current (or last) output file path.
    pub fn video_path(&self) -> Option<PathBuf> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .video_path
            .clone()
    }

    /// Recording generation counter.
    pub fn generation(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .generation
    }

    /// Start the encoder and the timing CSV for a new recording inside
    /// `session_dir`. Idempotent while already recording.
    pub fn start_recording(&self, session_dir: &Path) -> Result<(), RecordingError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if self.recording.load(Ordering::SeqCst) {
            return Ok(());
        }

        std::fs::create_dir_all(session_dir).map_err(|e| RecordingError::Io(e.to_string()))?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let (w, h) = self.resolution;
        let base_name = format!(
            "cam{}_{}x{}_{:.1}fps_{}",
            self.camera_id, w, h, self.fps, timestamp
        );
        let video_path = session_dir.join(format!("{base_name}.h264"));
        let csv_path = session_dir.join(format!("{base_name}_frame_timing.csv"));

        // Fresh accounting for this recording: counters, drop totals, and
        // the burned-in overlay counter all restart together.
        self.accumulator.reset();
        self.written_frames.store(0, Ordering::SeqCst);
        self.overlay.reset();

        let csv = if self.enable_csv_logging {
            Some(CsvLogger::start(
                self.camera_id,
                &csv_path,
                Arc::clone(&self.accumulator),
                CSV_QUEUE_SIZE,
            )?)
        } else {
            None
        };

        let settings = EncoderSettings {
            bitrate_bps: self.bitrate_bps,
        };
        let encoder_result = self
            .device
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .start_encoder(&settings, &video_path);

        if let Err(e) = encoder_result {
            error!(camera = self.camera_id, error = %e, "Failed to start H.264 encoder");
            // Unwind the CSV state created above; no recording began.
            if let Some(csv) = csv {
                csv.stop();
                if let Err(rm) = std::fs::remove_file(&csv_path) {
                    warn!(camera = self.camera_id, error = %rm, "Could not remove CSV after unwind");
                }
            }
            return Err(e);
        }

        state.video_path = Some(video_path.clone());
        state.csv = csv;
        state.generation += 1;

        self.overlay.set_recording(true);
        self.recording.store(true, Ordering::SeqCst);

        info!(
            camera = self.camera_id,
            output = %video_path.display(),
            csv = self.enable_csv_logging,
            bitrate = self.bitrate_bps,
            "Recording started (hardware H.264)"
        );
        Ok(())
    }

    /// Stop the encoder, drain the CSV writer, and remux if configured.
    /// Idempotent.
    pub fn stop_recording(&self) -> Result<(), RecordingError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !self.recording.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.overlay.set_recording(false);

        // Encoder first: releasing the camera's main stream has priority
        // over diagnostics.
        if let Err(e) = self
            .device
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stop_encoder()
        {
            warn!(camera = self.camera_id, error = %e, "Error stopping encoder");
        }

        if let Some(csv) = state.csv.take() {
            csv.stop();
        }

        if self.auto_remux
            && let Some(h264_path) = state.video_path.clone()
            && h264_path.exists()
        {
            match remux::remux_to_mp4(&h264_path, self.fps) {
                Ok(mp4_path) => {
                    if let Err(e) = std::fs::remove_file(&h264_path) {
                        warn!(camera = self.camera_id, error = %e, "Could not remove .h264 after remux");
                    }
                    state.video_path = Some(mp4_path);
                }
                Err(e) => {
                    warn!(
                        camera = self.camera_id,
                        error = %e,
                        "Remux failed, keeping .h264 file"
                    );
                }
            }
        }

        if let Some(path) = &state.video_path {
            info!(
                camera = self.camera_id,
                output = %path.display(),
                frames = self.written_frames.load(Ordering::Relaxed),
                "Recording saved"
            );
        }
        Ok(())
    }

    /// Submit one frame's timing metadata. Pixels are never forwarded here;
    /// pass `None` (the encoder reads the main stream directly).
    ///
    /// Non-blocking: on CSV queue overflow the row is dropped silently and
    /// its drop counts stay in the accumulator until the next accepted row.
    pub fn submit_frame(&self, _pixels: Option<&PixelBuffer>, metadata: FrameTimingMetadata) {
        if !self.recording.load(Ordering::SeqCst) || !self.enable_csv_logging {
            return;
        }

        if let Some(drops) = metadata.dropped_since_last {
            self.accumulator.accumulate(drops);
        }
        let written = self.written_frames.fetch_add(1, Ordering::SeqCst) + 1;

        let write_time_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let entry = CsvEntry {
            frame_number: metadata.display_frame_index.unwrap_or(written),
            write_time_unix,
            sensor_timestamp_ns: metadata.sensor_timestamp_ns,
            dropped_since_last: metadata.dropped_since_last,
        };

        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(csv) = &state.csv {
            // Queue-full => entry dropped; accumulator compensates later.
            let _ = csv.log(entry);
        }
    }

    /// Stop with extra defensive logging; used from cleanup paths.
    pub fn cleanup(&self) {
        if self.is_recording() {
            warn!(
                camera = self.camera_id,
                "Recording still active during cleanup, stopping"
            );
        }
        if let Err(e) = self.stop_recording() {
            error!(camera = self.camera_id, error = %e, "Error stopping recording during cleanup");
        }
    }

    /// Async wrapper for [`cleanup`](Self::cleanup) so the blocking stop
    /// (encoder + remux) runs on the worker pool.
    pub async fn cleanup_async(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || manager.cleanup()).await {
            error!(error = %e, "Recording cleanup task failed");
        }
    }
}
