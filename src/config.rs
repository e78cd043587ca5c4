// SPDX-License-Identifier: GPL-3.0-only

//! Configuration loading
//!
//! Settings come from a plain `key = value` text file (`config.txt` style):
//! blank lines and `#` comments are skipped, inline comments are stripped,
//! unknown keys are warned about and ignored. Every field has a default so a
//! missing file yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::constants::DEFAULT_BITRATE_BPS;

/// Overlay rendering settings shared by the recording and preview paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Base font scale (matches the source material's 0.6 default)
    pub font_scale_base: f32,
    /// Text stroke thickness in pixels
    pub thickness_base: u32,
    /// Left margin of the text block in pixels
    pub margin_left: u32,
    /// Baseline of the first text line in pixels
    pub line_start_y: u32,
    /// Text color, red channel
    pub text_color_r: u8,
    /// Text color, green channel
    pub text_color_g: u8,
    /// Text color, blue channel
    pub text_color_b: u8,
    /// Whether the frame-number overlay is drawn at all
    pub show_frame_number: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            font_scale_base: 0.6,
            thickness_base: 2,
            margin_left: 10,
            line_start_y: 30,
            text_color_r: 255,
            text_color_g: 255,
            text_color_b: 255,
            show_frame_number: true,
        }
    }
}

/// Top-level configuration for the camera system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Root directory that session directories are created under
    pub output_dir: PathBuf,
    /// Session directory name prefix (`{prefix}_{YYYYMMDD_HHMMSS}`)
    pub session_prefix: String,
    /// Recording (main stream) width
    pub width: u32,
    /// Recording (main stream) height
    pub height: u32,
    /// Preview (lores stream) width
    pub preview_width: u32,
    /// Preview (lores stream) height
    pub preview_height: u32,
    /// Target collation/recording FPS
    pub target_fps: f64,
    /// H.264 encoder bitrate in bits per second
    pub bitrate_bps: u64,
    /// Minimum number of cameras required at startup
    pub min_cameras: usize,
    /// Continue with fewer than `min_cameras` cameras
    pub allow_partial: bool,
    /// Wall-clock budget for device discovery in seconds
    pub discovery_timeout: f64,
    /// Supervisor retry interval after initialization failure in seconds
    pub discovery_retry: f64,
    /// Start recording immediately after initialization
    pub auto_start_recording: bool,
    /// Stream preview frames to the parent process in slave mode
    pub show_preview: bool,
    /// Write the per-frame timing CSV during recording
    pub enable_csv_timing_log: bool,
    /// Skip the post-recording `.h264` to `.mp4` remux
    pub disable_mp4_conversion: bool,
    /// Overlay rendering settings
    pub overlay: OverlayConfig,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            session_prefix: "session".to_string(),
            width: 1920,
            height: 1080,
            preview_width: 640,
            preview_height: 360,
            target_fps: 30.0,
            bitrate_bps: DEFAULT_BITRATE_BPS,
            min_cameras: 1,
            allow_partial: true,
            discovery_timeout: 5.0,
            discovery_retry: 3.0,
            auto_start_recording: false,
            show_preview: true,
            enable_csv_timing_log: true,
            disable_mp4_conversion: true,
            overlay: OverlayConfig::default(),
        }
    }
}

impl CameraConfig {
    /// Load configuration from a `key = value` file, falling back to
    /// defaults for anything missing. A missing file is not an error.
    pub fn load(path: &Path) -> Self {
        let mut config = Self::default();

        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config file not readable, using defaults");
                return config;
            }
        };

        for (line_no, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line = line_no + 1, "Ignoring malformed config line (no '=')");
                continue;
            };
            let key = key.trim();
            // Strip inline comments
            let value = value.split('#').next().unwrap_or("").trim();
            config.apply(key, value, line_no + 1);
        }

        config
    }

    fn apply(&mut self, key: &str, value: &str, line: usize) {
        match key {
            "output_dir" => self.output_dir = PathBuf::from(value),
            "session_prefix" => self.session_prefix = value.to_string(),
            "resolution_width" | "width" => set_parsed(&mut self.width, key, value, line),
            "resolution_height" | "height" => set_parsed(&mut self.height, key, value, line),
            "preview_width" => set_parsed(&mut self.preview_width, key, value, line),
            "preview_height" => set_parsed(&mut self.preview_height, key, value, line),
            "target_fps" => set_parsed(&mut self.target_fps, key, value, line),
            "bitrate" => set_parsed(&mut self.bitrate_bps, key, value, line),
            "min_cameras" => set_parsed(&mut self.min_cameras, key, value, line),
            "allow_partial" => self.allow_partial = parse_bool(value),
            "discovery_timeout" => set_parsed(&mut self.discovery_timeout, key, value, line),
            "discovery_retry" => set_parsed(&mut self.discovery_retry, key, value, line),
            "auto_start_recording" => self.auto_start_recording = parse_bool(value),
            "show_preview" => self.show_preview = parse_bool(value),
            "enable_csv_timing_log" => self.enable_csv_timing_log = parse_bool(value),
            "disable_mp4_conversion" => self.disable_mp4_conversion = parse_bool(value),
            "font_scale_base" => set_parsed(&mut self.overlay.font_scale_base, key, value, line),
            "thickness_base" => set_parsed(&mut self.overlay.thickness_base, key, value, line),
            "margin_left" => set_parsed(&mut self.overlay.margin_left, key, value, line),
            "line_start_y" => set_parsed(&mut self.overlay.line_start_y, key, value, line),
            "text_color_r" => set_parsed(&mut self.overlay.text_color_r, key, value, line),
            "text_color_g" => set_parsed(&mut self.overlay.text_color_g, key, value, line),
            "text_color_b" => set_parsed(&mut self.overlay.text_color_b, key, value, line),
            "show_frame_number" => self.overlay.show_frame_number = parse_bool(value),
            _ => warn!(key, line, "Ignoring unknown config key"),
        }
    }
}

/// Parse `value` into the slot, keeping the current value on failure.
fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str, line: usize) {
    match value.parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => warn!(key, value, line, "Ignoring unparseable config value"),
    }
}

/// Accepts the usual truthy spellings: `true`, `1`, `yes`, `on`.
fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
