// SPDX-License-Identifier: GPL-3.0-only

//! Multi-camera recording and session orchestration
//!
//! Per-camera pipelines (capture → collation → processing → recording) with
//! hardware-timestamp drop detection, FPS-decoupled frame delivery, an
//! in-place pre-encode overlay, drop-preserving timing CSVs, and a
//! supervising coordinator that multiplexes cameras and a JSON command
//! protocol to a parent process.

pub mod camera;
pub mod config;
pub mod constants;
pub mod errors;
pub mod recording;
pub mod system;

pub use config::{CameraConfig, OverlayConfig};
pub use errors::{AppError, AppResult, CameraError, CommandError, RecordingError};
pub use system::supervisor::Supervisor;
pub use system::{CameraSystem, RunMode};
