// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera backend
//!
//! An in-process synthetic camera that honors the full driver contract:
//! paced frame delivery from `FrameDurationLimits`, monotonic synthetic
//! sensor timestamps, the post-callback hook, and an "encoder" that appends
//! each main-stream frame to the output file after the callback has run (so
//! overlay bytes are observable in the output). Used by the test suite and
//! by demo runs on machines without camera hardware.
//!
//! Fault injection hooks cover the failure paths the real hardware exhibits:
//! sensor timestamp gaps (dropped frames), missing timestamps, capture
//! hangs, and encoder start refusal.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info};

use crate::camera::driver::{
    CameraDevice, CameraDriver, CameraInfo, CompletedRequest, EncoderSettings, MappedRequest,
    PlaneMut, PostCallback, SensorMetadata,
};
use crate::camera::types::{PixelBuffer, RGB888_BYTES_PER_PIXEL, StreamConfig};
use crate::errors::{CameraError, RecordingError};

/// Fault injection handle shared between a test and the opened device.
#[derive(Debug, Default)]
pub struct FaultInjector {
    /// Extra nanoseconds added to the next frame's sensor timestamp
    gap_ns: AtomicU64,
    /// Extra milliseconds of delivery delay for the next capture request
    hang_ms: AtomicU64,
    /// When false, frames carry no sensor timestamp
    timestamps_enabled: AtomicBool,
    /// When true, `start_encoder` fails
    refuse_encoder: AtomicBool,
}

impl FaultInjector {
    fn new() -> Self {
        Self {
            gap_ns: AtomicU64::new(0),
            hang_ms: AtomicU64::new(0),
            timestamps_enabled: AtomicBool::new(true),
            refuse_encoder: AtomicBool::new(false),
        }
    }

    /// Make the next frame's sensor timestamp jump forward by `gap`,
    /// simulating a sensor stall of that length.
    pub fn inject_timestamp_gap(&self, gap: Duration) {
        self.gap_ns.fetch_add(gap.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Delay the next frame delivery by `hang` of wall time.
    pub fn inject_hang(&self, hang: Duration) {
        self.hang_ms.store(hang.as_millis() as u64, Ordering::SeqCst);
    }

    /// Enable or disable sensor timestamps entirely.
    pub fn set_timestamps_enabled(&self, enabled: bool) {
        self.timestamps_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Make subsequent `start_encoder` calls fail.
    pub fn set_refuse_encoder(&self, refuse: bool) {
        self.refuse_encoder.store(refuse, Ordering::SeqCst);
    }

    fn take_gap_ns(&self) -> u64 {
        self.gap_ns.swap(0, Ordering::SeqCst)
    }

    fn take_hang(&self) -> Duration {
        Duration::from_millis(self.hang_ms.swap(0, Ordering::SeqCst))
    }
}

/// Synthetic multi-camera driver.
pub struct VirtualCameraDriver {
    camera_count: usize,
    /// How many of the cameras are currently "plugged in"
    attached: AtomicUsize,
    faults: Vec<Arc<FaultInjector>>,
}

impl VirtualCameraDriver {
    pub fn new(camera_count: usize) -> Self {
        Self {
            camera_count,
            attached: AtomicUsize::new(camera_count),
            faults: (0..camera_count)
                .map(|_| Arc::new(FaultInjector::new()))
                .collect(),
        }
    }

    /// Simulate hot-plug: make only the first `count` cameras discoverable.
    pub fn set_attached(&self, count: usize) {
        self.attached
            .store(count.min(self.camera_count), Ordering::SeqCst);
    }

    /// Fault injection handle for camera `index`; shared with any device
    /// opened for that camera.
    pub fn fault_injector(&self, index: usize) -> Arc<FaultInjector> {
        Arc::clone(&self.faults[index])
    }
}

impl CameraDriver for VirtualCameraDriver {
    fn discover(&self) -> Result<Vec<CameraInfo>, CameraError> {
        Ok((0..self.attached.load(Ordering::SeqCst))
            .map(|i| CameraInfo {
                id: format!("/virtual/camera{i}"),
                model: "virtual-sensor".to_string(),
                index: i,
            })
            .collect())
    }

    fn open(
        &self,
        info: &CameraInfo,
        config: &StreamConfig,
    ) -> Result<Box<dyn CameraDevice>, CameraError> {
        if config.frame_duration_us == 0 {
            return Err(CameraError::InvalidConfiguration(
                "frame duration must be non-zero".to_string(),
            ));
        }
        info!(
            camera = info.index,
            main = format!("{}x{}", config.main_size.0, config.main_size.1),
            lores = format!("{}x{}", config.lores_size.0, config.lores_size.1),
            frame_duration_us = config.frame_duration_us,
            "Opening virtual camera"
        );
        Ok(Box::new(VirtualCameraDevice::new(
            info.index,
            *config,
            Arc::clone(&self.faults[info.index]),
        )))
    }
}

struct EncoderSink {
    writer: BufWriter<File>,
}

/// One open virtual camera.
struct VirtualCameraDevice {
    camera_index: usize,
    config: StreamConfig,
    faults: Arc<FaultInjector>,
    post_callback: Option<PostCallback>,
    encoder: Option<EncoderSink>,
    /// Synthetic boot-relative timestamp of the most recent frame
    sensor_ts_ns: u64,
    sequence: u64,
    next_due: Instant,
    stopped: bool,
}

impl VirtualCameraDevice {
    fn new(camera_index: usize, config: StreamConfig, faults: Arc<FaultInjector>) -> Self {
        Self {
            camera_index,
            config,
            faults,
            post_callback: None,
            encoder: None,
            // Arbitrary non-zero boot offset so timestamps look realistic
            sensor_ts_ns: 1_000_000_000,
            sequence: 0,
            next_due: Instant::now(),
            stopped: false,
        }
    }

    /// Fill an RGB888 plane with a cheap per-frame test pattern.
    fn fill_pattern(data: &mut [u8], seq: u64) {
        let base = (seq % 251) as u8;
        for (i, px) in data.chunks_exact_mut(RGB888_BYTES_PER_PIXEL).enumerate() {
            px[0] = base;
            px[1] = base.wrapping_add((i % 7) as u8);
            px[2] = 0x20;
        }
    }
}

impl CameraDevice for VirtualCameraDevice {
    fn capture_request(&mut self, timeout: Duration) -> Result<CompletedRequest, CameraError> {
        if self.stopped {
            return Err(CameraError::Disconnected);
        }

        let hang = self.faults.take_hang();
        if hang > timeout {
            // Simulated hardware hang: consume the caller's whole deadline.
            std::thread::sleep(timeout);
            return Err(CameraError::CaptureTimeout);
        }
        if !hang.is_zero() {
            std::thread::sleep(hang);
        }

        // Pace delivery to the configured frame duration.
        let interval = Duration::from_micros(self.config.frame_duration_us);
        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                return Err(CameraError::CaptureTimeout);
            }
            std::thread::sleep(wait);
        }
        self.next_due = Instant::now().max(self.next_due) + interval;

        // Advance the synthetic sensor clock, applying any injected stall.
        let gap = self.faults.take_gap_ns();
        self.sensor_ts_ns += gap + self.config.frame_duration_us * 1_000;

        let (main_w, main_h) = self.config.main_size;
        let (lores_w, lores_h) = self.config.lores_size;
        let mut main = vec![0u8; main_w as usize * main_h as usize * RGB888_BYTES_PER_PIXEL];
        let mut lores = vec![0u8; lores_w as usize * lores_h as usize * RGB888_BYTES_PER_PIXEL];
        Self::fill_pattern(&mut main, self.sequence);
        Self::fill_pattern(&mut lores, self.sequence);

        // The post-callback mutates the very buffers the encoder and the
        // capture consumer will see, matching the hardware mapping contract.
        if let Some(cb) = &self.post_callback {
            let mut mapped = MappedRequest {
                main: PlaneMut {
                    data: &mut main[..],
                    width: main_w,
                    height: main_h,
                    stride: main_w * RGB888_BYTES_PER_PIXEL as u32,
                },
                lores: PlaneMut {
                    data: &mut lores[..],
                    width: lores_w,
                    height: lores_h,
                    stride: lores_w * RGB888_BYTES_PER_PIXEL as u32,
                },
            };
            cb(&mut mapped);
        }

        if let Some(sink) = &mut self.encoder {
            sink.writer
                .write_all(&main)
                .map_err(|e| CameraError::CaptureFailed(format!("encoder sink: {e}")))?;
        }

        let sequence = self.sequence;
        self.sequence += 1;

        let timestamps = self.faults.timestamps_enabled.load(Ordering::SeqCst);
        Ok(CompletedRequest {
            lores: PixelBuffer::from_rgb(lores, lores_w, lores_h),
            metadata: SensorMetadata {
                frame_duration_us: Some(self.config.frame_duration_us),
                sensor_timestamp_ns: timestamps.then_some(self.sensor_ts_ns),
                sequence,
            },
            completed_at: SystemTime::now(),
        })
    }

    fn set_post_callback(&mut self, callback: PostCallback) {
        self.post_callback = Some(callback);
    }

    fn start_encoder(
        &mut self,
        settings: &EncoderSettings,
        output: &Path,
    ) -> Result<(), RecordingError> {
        if self.faults.refuse_encoder.load(Ordering::SeqCst) {
            return Err(RecordingError::EncoderStartFailed(
                "virtual encoder refused by fault injection".to_string(),
            ));
        }
        if self.encoder.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        let file = File::create(output)
            .map_err(|e| RecordingError::EncoderStartFailed(e.to_string()))?;
        self.encoder = Some(EncoderSink {
            writer: BufWriter::new(file),
        });
        debug!(
            camera = self.camera_index,
            bitrate = settings.bitrate_bps,
            output = %output.display(),
            "Virtual encoder started"
        );
        Ok(())
    }

    fn stop_encoder(&mut self) -> Result<(), RecordingError> {
        match self.encoder.take() {
            Some(mut sink) => {
                sink.writer
                    .flush()
                    .map_err(|e| RecordingError::EncoderStopFailed(e.to_string()))?;
                debug!(camera = self.camera_index, "Virtual encoder stopped");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.encoder = None;
        debug!(camera = self.camera_index, "Virtual camera stopped");
    }
}
