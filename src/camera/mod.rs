// SPDX-License-Identifier: GPL-3.0-only

//! Per-camera pipeline: capture, collation, processing, overlay

pub mod capture;
pub mod collator;
pub mod driver;
pub mod fps;
pub mod handler;
pub mod overlay;
pub mod processor;
pub mod types;
pub mod virtual_driver;

pub use capture::{CaptureLoop, FrameWaiter};
pub use collator::CollatorLoop;
pub use handler::{CameraHandler, HandlerState};
pub use processor::ProcessorLoop;
pub use virtual_driver::VirtualCameraDriver;
