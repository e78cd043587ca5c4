// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for the per-camera pipeline
//!
//! Frames flow capture → collator → processor as cheaply cloneable handles:
//! pixel data lives in an `Arc<[u8]>` and is never copied between pipeline
//! stages. Both streams use RGB888 (3 bytes per pixel, row-major with an
//! explicit stride).

use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Bytes per pixel of the RGB888 format used on both streams.
pub const RGB888_BYTES_PER_PIXEL: usize = 3;

/// A reference-counted RGB888 pixel buffer with layout information.
#[derive(Clone)]
pub struct PixelBuffer {
    /// Raw pixel bytes, `stride * height` long
    pub data: Arc<[u8]>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row stride in bytes (>= `width * 3`)
    pub stride: u32,
}

impl PixelBuffer {
    /// Build a buffer with a tight stride from raw bytes.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data: Arc::from(data),
            width,
            height,
            stride: width * RGB888_BYTES_PER_PIXEL as u32,
        }
    }

    /// Copy the pixel bytes into a fresh mutable vector.
    pub fn to_mut_vec(&self) -> Vec<u8> {
        self.data.as_ref().to_vec()
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PixelBuffer({}x{}, stride {}, {} bytes)",
            self.width,
            self.height,
            self.stride,
            self.data.len()
        )
    }
}

/// Dual-stream camera configuration applied at device open.
///
/// `frame_duration_us` maps onto `FrameDurationLimits = (d, d)`, pinning the
/// sensor to a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// `main` stream size (feeds the encoder)
    pub main_size: (u32, u32),
    /// `lores` stream size (feeds preview/processing)
    pub lores_size: (u32, u32),
    /// Fixed frame duration in microseconds
    pub frame_duration_us: u64,
}

/// A frame as published by the capture loop, with derived timing fields.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Lores stream pixels
    pub pixels: PixelBuffer,
    /// Wall-clock capture time
    pub capture_time: SystemTime,
    /// Monotonic capture time
    pub captured_at: Instant,
    /// Hardware sensor timestamp in nanoseconds since boot, when reported
    pub sensor_timestamp_ns: Option<u64>,
    /// 0-based index over frames this capture loop has seen
    pub capture_frame_index: u64,
    /// Sensor-timestamp-derived monotonic frame number
    pub hardware_frame_number: u64,
    /// Frames the sensor skipped immediately before this one
    pub dropped_since_last: u64,
    /// Camera-reported rate at capture time (`1e6 / FrameDuration`)
    pub hardware_fps: f64,
}

/// A frame emitted by the collator at the target rate.
#[derive(Debug, Clone)]
pub struct CollatedFrame {
    /// The underlying captured frame (shared, never copied)
    pub frame: Arc<CapturedFrame>,
    /// True when the collator re-emitted the previous frame
    pub is_duplicate: bool,
    /// 1-based count of frames the collator has emitted
    pub collated_frame_num: u64,
}

/// Immutable timing record attached to each processed frame for CSV logging.
///
/// `display_frame_index` is the canonical frame number used for the CSV and
/// the overlay; the remaining index fields are diagnostics only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTimingMetadata {
    /// Hardware sensor timestamp (nanoseconds since boot)
    pub sensor_timestamp_ns: Option<u64>,
    /// Dropped frames detected via timestamp analysis
    pub dropped_since_last: Option<u64>,
    /// Frame number for CSV and video overlay
    pub display_frame_index: Option<u64>,
    /// Hardware frame number (diagnostics)
    pub hardware_frame_number: Option<u64>,
    /// Software capture counter (diagnostics)
    pub software_frame_index: Option<u64>,
}

/// Latest preview-resolution frame held in the display slot.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    /// Overlaid lores pixels
    pub pixels: PixelBuffer,
    /// Display frame number the overlay was drawn with
    pub frame_number: u64,
}
