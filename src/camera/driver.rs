// SPDX-License-Identifier: GPL-3.0-only

//! Camera driver contract
//!
//! The pipeline consumes cameras through these traits rather than a concrete
//! hardware stack. A driver provides device discovery and per-device capture,
//! an in-place post-callback hook invoked before encoding, and a hardware
//! H.264 encoder attached to a file sink. The in-tree
//! [`virtual_driver`](super::virtual_driver) backend implements the contract
//! for tests and demo runs; a libcamera-style backend plugs in at the same
//! seam.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::camera::types::{PixelBuffer, StreamConfig};
use crate::errors::{CameraError, RecordingError};

/// One discovered camera.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Stable device identifier
    pub id: String,
    /// Human-readable sensor/model name
    pub model: String,
    /// Discovery index (0-based)
    pub index: usize,
}

/// Raw per-frame metadata reported by the sensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorMetadata {
    /// Reported frame duration in microseconds
    pub frame_duration_us: Option<u64>,
    /// Sensor timestamp in nanoseconds since boot
    pub sensor_timestamp_ns: Option<u64>,
    /// Driver-side frame sequence number
    pub sequence: u64,
}

/// A completed capture request: lores pixels plus sensor metadata.
///
/// Buffers are released when the request is dropped.
#[derive(Debug)]
pub struct CompletedRequest {
    /// Lores stream pixels
    pub lores: PixelBuffer,
    /// Sensor metadata for this frame
    pub metadata: SensorMetadata,
    /// Wall-clock completion time
    pub completed_at: SystemTime,
}

/// Mutable view of one stream's pixel plane inside a request.
pub struct PlaneMut<'a> {
    pub data: &'a mut [u8],
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

/// Direct mapping of a request's stream buffers, handed to the post-callback.
///
/// Mutations land in the memory the encoder and downstream consumers see;
/// this is the only way to affect encoded output without copying frames.
pub struct MappedRequest<'a> {
    /// Full-resolution stream that feeds the encoder
    pub main: PlaneMut<'a>,
    /// Preview-resolution stream
    pub lores: PlaneMut<'a>,
}

/// Hook invoked once per captured frame, before encoding and before the
/// frame is visible to `capture_request`.
pub type PostCallback = Arc<dyn Fn(&mut MappedRequest<'_>) + Send + Sync>;

/// Hardware encoder settings.
#[derive(Debug, Clone, Copy)]
pub struct EncoderSettings {
    /// Target bitrate in bits per second
    pub bitrate_bps: u64,
}

/// An open, streaming camera device.
pub trait CameraDevice: Send {
    /// Block until the next frame completes, up to `timeout`.
    ///
    /// Returns [`CameraError::CaptureTimeout`] when the hardware does not
    /// deliver a frame in time; the caller is expected to retry.
    fn capture_request(&mut self, timeout: Duration) -> Result<CompletedRequest, CameraError>;

    /// Register the per-frame post-callback. Called exactly once, at
    /// initialization; the callback stays registered for the device's life.
    fn set_post_callback(&mut self, callback: PostCallback);

    /// Attach the hardware H.264 encoder to `output` and start it.
    fn start_encoder(
        &mut self,
        settings: &EncoderSettings,
        output: &Path,
    ) -> Result<(), RecordingError>;

    /// Stop the encoder and flush its file sink.
    fn stop_encoder(&mut self) -> Result<(), RecordingError>;

    /// Stop streaming. Further capture requests fail with
    /// [`CameraError::Disconnected`].
    fn stop(&mut self);
}

/// A camera backend: discovery plus device opening.
pub trait CameraDriver: Send + Sync {
    /// Enumerate currently attached cameras.
    fn discover(&self) -> Result<Vec<CameraInfo>, CameraError>;

    /// Open and start a camera with the dual-stream configuration.
    fn open(
        &self,
        info: &CameraInfo,
        config: &StreamConfig,
    ) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// Shared handle to an open device.
///
/// The capture loop holds the lock for the duration of each blocking capture
/// request; encoder start/stop waits at most one frame interval behind it.
pub type SharedDevice = Arc<std::sync::Mutex<Box<dyn CameraDevice>>>;
