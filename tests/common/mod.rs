// SPDX-License-Identifier: GPL-3.0-only

//! Shared helpers for integration tests

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use multicam::camera::driver::{CameraDriver, SharedDevice};
use multicam::camera::types::StreamConfig;
use multicam::camera::virtual_driver::VirtualCameraDriver;
use multicam::config::CameraConfig;

/// Small-resolution configuration for fast tests.
pub fn test_config(output_root: &Path, fps: f64) -> CameraConfig {
    CameraConfig {
        output_dir: output_root.to_path_buf(),
        session_prefix: "testsession".to_string(),
        width: 96,
        height: 64,
        preview_width: 64,
        preview_height: 48,
        target_fps: fps,
        min_cameras: 1,
        allow_partial: true,
        discovery_timeout: 2.0,
        discovery_retry: 0.2,
        auto_start_recording: false,
        show_preview: false,
        enable_csv_timing_log: true,
        disable_mp4_conversion: true,
        ..CameraConfig::default()
    }
}

/// Open camera 0 of a virtual driver as a shared device at the given rate.
pub fn open_virtual_device(driver: &VirtualCameraDriver, fps: f64) -> SharedDevice {
    let infos = driver.discover().expect("discovery");
    let config = StreamConfig {
        main_size: (96, 64),
        lores_size: (64, 48),
        frame_duration_us: (1_000_000.0 / fps).round() as u64,
    };
    let device = driver.open(&infos[0], &config).expect("open device");
    Arc::new(Mutex::new(device))
}

/// A parsed timing CSV row.
#[derive(Debug, Clone)]
pub struct CsvRow {
    pub frame_number: u64,
    pub write_time_unix: f64,
    pub sensor_timestamp_ns: Option<u64>,
    pub dropped_since_last: Option<u64>,
    pub total_hardware_drops: u64,
}

/// Parse a timing CSV, asserting the header is present and exactly once.
pub fn parse_timing_csv(path: &Path) -> Vec<CsvRow> {
    let contents = std::fs::read_to_string(path).expect("read CSV");
    let mut lines = contents.lines();
    let header = lines.next().expect("CSV has a header");
    assert_eq!(
        header,
        "frame_number,write_time_unix,sensor_timestamp_ns,dropped_since_last,total_hardware_drops"
    );

    lines
        .map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 5, "malformed row: {line}");
            CsvRow {
                frame_number: fields[0].parse().expect("frame_number"),
                write_time_unix: fields[1].parse().expect("write_time_unix"),
                sensor_timestamp_ns: (!fields[2].is_empty())
                    .then(|| fields[2].parse().expect("sensor_timestamp_ns")),
                dropped_since_last: (!fields[3].is_empty())
                    .then(|| fields[3].parse().expect("dropped_since_last")),
                total_hardware_drops: fields[4].parse().expect("total_hardware_drops"),
            }
        })
        .collect()
}

/// Files under `dir` (recursively) whose name ends with `suffix`.
pub fn find_files(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(suffix))
            {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}
