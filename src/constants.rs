// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants
//!
//! Centralizes the timing limits, queue capacities and timeout budgets used
//! throughout the capture, collation and recording pipelines.

use std::time::Duration;

/// Shortest believable camera frame duration (1000 FPS ceiling).
///
/// Frame durations outside [`FRAME_DURATION_MIN_US`, `FRAME_DURATION_MAX_US`]
/// are reported by some sensors during mode switches and must not update the
/// expected frame interval used for drop detection.
pub const FRAME_DURATION_MIN_US: u64 = 1_000;

/// Longest believable camera frame duration (0.1 FPS floor).
pub const FRAME_DURATION_MAX_US: u64 = 10_000_000;

/// Lowest FPS the camera pipeline accepts.
pub const CAMERA_FPS_MIN: f64 = 1.0;

/// Highest FPS the camera pipeline accepts (IMX296 limit at 1456x1088).
pub const CAMERA_FPS_MAX: f64 = 60.0;

/// Rolling window used by all FPS trackers.
pub const FPS_WINDOW: Duration = Duration::from_secs(5);

/// Ceiling on rolling-FPS samples: window length times the FPS ceiling.
pub const FPS_MAX_SAMPLES: usize = 5_000;

/// Hard per-frame timeout on the blocking camera capture request.
pub const CAPTURE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Back-off after a capture timeout before retrying the hardware.
pub const CAPTURE_HANG_BACKOFF: Duration = Duration::from_secs(1);

/// Back-off after a transient capture error.
pub const CAPTURE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Idle sleep while a loop is paused.
pub const PAUSE_IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Default deadline when waiting for a newly published frame.
pub const FRAME_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the collator output queue (drop-oldest on overflow).
pub const COLLATOR_QUEUE_SIZE: usize = 10;

/// Capacity of the CSV logging queue (drop-newest on overflow).
pub const CSV_QUEUE_SIZE: usize = 300;

/// Rows written between CSV flushes (~2 s at 30 FPS).
pub const CSV_FLUSH_INTERVAL_ROWS: u32 = 60;

/// CSV file write buffer size in bytes.
pub const CSV_WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// How long the CSV writer blocks waiting for the next queued entry.
pub const CSV_QUEUE_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Budget for joining the CSV writer thread on stop.
pub const CSV_LOGGER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for cancelling a pipeline task during handler cleanup.
pub const TASK_CANCEL_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-handler budget during system-wide cleanup fan-out.
pub const HANDLER_CLEANUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause between camera discovery attempts.
pub const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default H.264 encoder bitrate (10 Mbps).
pub const DEFAULT_BITRATE_BPS: u64 = 10_000_000;

/// Interval between slave-mode preview frame emissions (~30 FPS).
pub const PREVIEW_STREAM_INTERVAL: Duration = Duration::from_millis(33);

/// JPEG quality for slave-mode preview frames.
pub const PREVIEW_JPEG_QUALITY: u8 = 75;

/// Ceiling on error message length sent to the parent process.
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 200;

/// Number of initial frames that get verbose per-frame diagnostics.
pub const FRAME_LOG_COUNT: u64 = 3;

/// How often to emit periodic progress log messages (every Nth frame).
pub const LOG_EVERY_N_FRAMES: u64 = 30;
