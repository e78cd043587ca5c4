// SPDX-License-Identifier: GPL-3.0-only

//! Multi-camera system coordinator
//!
//! Owns the set of per-camera handlers, the lazily created session
//! directory, and the run mode: *slave* (JSON command protocol on standard
//! streams), *headless* (record immediately until shutdown), or
//! *interactive* (single-letter console commands). Commands are handled
//! sequentially on one task, so status responses never interleave.

pub mod commands;
pub mod status;
pub mod supervisor;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Local;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::camera::driver::CameraDriver;
use crate::camera::handler::CameraHandler;
use crate::camera::types::{PreviewFrame, RGB888_BYTES_PER_PIXEL};
use crate::config::CameraConfig;
use crate::constants::{
    DISCOVERY_POLL_INTERVAL, HANDLER_CLEANUP_TIMEOUT, PREVIEW_JPEG_QUALITY,
    PREVIEW_STREAM_INTERVAL,
};
use crate::errors::{AppError, AppResult, CameraError};
use crate::system::commands::{Command, parse_command};
use crate::system::status::{StatusKind, StatusSink, sanitize_error_message};

/// Top-level run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Console commands (`r`/`s`/`q`) with log output
    #[default]
    Interactive,
    /// JSON line protocol on stdin/stdout, driven by a parent process
    Slave,
    /// Record immediately, stop on shutdown
    Headless,
}

/// Multi-camera system: handlers, session directory, command dispatch.
pub struct CameraSystem {
    config: CameraConfig,
    driver: Arc<dyn CameraDriver>,
    mode: RunMode,
    handlers: Vec<Arc<CameraHandler>>,
    recording: AtomicBool,
    running: AtomicBool,
    session_dir: Mutex<Option<PathBuf>>,
    preview_enabled: Mutex<Vec<bool>>,
    status: StatusSink,
    shutdown_rx: watch::Receiver<bool>,
}

impl CameraSystem {
    pub fn new(
        config: CameraConfig,
        driver: Arc<dyn CameraDriver>,
        mode: RunMode,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            driver,
            mode,
            handlers: Vec::new(),
            recording: AtomicBool::new(false),
            running: AtomicBool::new(false),
            session_dir: Mutex::new(None),
            preview_enabled: Mutex::new(Vec::new()),
            status: StatusSink::new(mode == RunMode::Slave),
            shutdown_rx,
        }
    }

    /// Replace the status sink, e.g. to capture the protocol stream in
    /// tests. The default sink writes to stdout in slave mode only.
    pub fn with_status_sink(mut self, sink: StatusSink) -> Self {
        self.status = sink;
        self
    }

    /// Handlers currently owned by the system.
    pub fn handlers(&self) -> &[Arc<CameraHandler>] {
        &self.handlers
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Probe the discovery interface until at least one camera appears or
    /// the wall-clock budget runs out, then build one handler per camera.
    pub async fn initialize(&mut self) -> AppResult<()> {
        self.status
            .send(StatusKind::Initializing, json!({"device": "cameras"}));

        let timeout = std::time::Duration::from_secs_f64(self.config.discovery_timeout);
        info!(timeout_secs = self.config.discovery_timeout, "Searching for cameras");

        let deadline = std::time::Instant::now() + timeout;
        let mut cameras = Vec::new();
        loop {
            match self.driver.discover() {
                Ok(found) if !found.is_empty() => {
                    cameras = found;
                    break;
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Camera discovery attempt failed"),
            }
            if self.shutting_down() {
                return Err(AppError::Other("discovery cancelled".to_string()));
            }
            if std::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(DISCOVERY_POLL_INTERVAL).await;
        }

        if cameras.is_empty() {
            let message = format!(
                "No cameras found within {:.0} seconds",
                self.config.discovery_timeout
            );
            warn!("{message}");
            self.status
                .send(StatusKind::Warning, json!({"message": message.clone()}));
            return Err(CameraError::NoCameraFound.into());
        }

        for info in &cameras {
            info!(camera = info.index, id = %info.id, model = %info.model, "Found camera");
        }

        if cameras.len() < self.config.min_cameras {
            let message = format!(
                "Only {} camera(s) found, expected at least {}",
                cameras.len(),
                self.config.min_cameras
            );
            warn!("{message}");
            if !self.config.allow_partial {
                self.status.send_error(&message);
                return Err(CameraError::InitializationFailed(message).into());
            }
            self.status.send(
                StatusKind::Warning,
                json!({"message": message, "cameras": cameras.len()}),
            );
        }

        info!(count = cameras.len(), "Initializing cameras");
        for (i, info) in cameras.iter().enumerate() {
            match CameraHandler::init(self.driver.as_ref(), info, i, &self.config, None) {
                Ok(handler) => self.handlers.push(handler),
                Err(e) => {
                    error!(camera = i, error = %e, "Failed to initialize camera");
                    self.status
                        .send_error(&format!("Camera initialization failed: {e}"));
                    return Err(AppError::Camera(CameraError::InitializationFailed(
                        e.to_string(),
                    )));
                }
            }
        }

        *self.preview_enabled.lock().unwrap_or_else(|e| e.into_inner()) =
            vec![true; self.handlers.len()];

        self.status.send(
            StatusKind::Initialized,
            json!({
                "cameras": self.handlers.len(),
                "session": self.session_label(),
            }),
        );
        info!(count = self.handlers.len(), "All cameras initialized");

        if self.config.auto_start_recording {
            info!("Auto-starting recording");
            self.start_recording_all().await;
        }
        Ok(())
    }

    /// Session directory, created lazily on first recording or snapshot.
    fn ensure_session_dir(&self) -> AppResult<PathBuf> {
        let mut session = self.session_dir.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(dir) = session.as_ref() {
            return Ok(dir.clone());
        }
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let prefix = self.config.session_prefix.trim_end_matches('_');
        let name = if prefix.is_empty() {
            timestamp.to_string()
        } else {
            format!("{prefix}_{timestamp}")
        };
        let dir = self.config.output_dir.join(name);
        std::fs::create_dir_all(&dir).map_err(|e| AppError::Config(e.to_string()))?;
        info!(session = %dir.display(), "Session directory created");
        *session = Some(dir.clone());
        Ok(dir)
    }

    /// Session directory name, when one exists.
    pub fn session_label(&self) -> Option<String> {
        self.session_dir
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
    }

    /// Current session directory, when one exists.
    pub fn session_dir(&self) -> Option<PathBuf> {
        self.session_dir
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Handle one parsed command. Errors are reported to the parent as
    /// sanitized `error` statuses; processing always continues.
    pub async fn handle_command(&self, command: Command) {
        match command {
            Command::StartRecording => self.start_recording_all().await,
            Command::StopRecording => self.stop_recording_all().await,
            Command::TakeSnapshot => self.take_snapshot().await,
            Command::GetStatus => self.send_status_report(),
            Command::TogglePreview { camera_id, enabled } => {
                self.toggle_preview(camera_id, enabled)
            }
            Command::Quit => self.quit(),
        }
    }

    /// Start recording on every handler, sharing one session directory.
    pub async fn start_recording_all(&self) {
        if self.recording.load(Ordering::SeqCst) {
            self.status.send_error("Already recording");
            return;
        }
        let session_dir = match self.ensure_session_dir() {
            Ok(dir) => dir,
            Err(e) => {
                error!(error = %e, "Could not create session directory");
                self.status.send_error(&e.to_string());
                return;
            }
        };

        let mut started = Vec::new();
        for handler in &self.handlers {
            match handler.start_recording(&session_dir).await {
                Ok(()) => started.push(Arc::clone(handler)),
                Err(e) => {
                    error!(camera = handler.cam_num, error = %e, "Failed to start recording");
                    // Unwind the handlers already recording so the system
                    // stays in a consistent non-recording state.
                    for handler in &started {
                        if let Err(stop_err) = handler.stop_recording().await {
                            warn!(camera = handler.cam_num, error = %stop_err, "Rollback stop failed");
                        }
                    }
                    self.status.send_error(&e.to_string());
                    return;
                }
            }
        }

        self.recording.store(true, Ordering::SeqCst);
        let files: Vec<String> = self
            .handlers
            .iter()
            .filter_map(|h| h.recorder().video_path())
            .map(|p| p.display().to_string())
            .collect();
        info!(session = ?self.session_label(), "Recording started on all cameras");
        self.status.send(
            StatusKind::RecordingStarted,
            json!({"session": self.session_label(), "files": files}),
        );
    }

    /// Stop recording on every handler.
    pub async fn stop_recording_all(&self) {
        if !self.recording.load(Ordering::SeqCst) {
            self.status.send_error("Not recording");
            return;
        }
        for handler in &self.handlers {
            if let Err(e) = handler.stop_recording().await {
                warn!(camera = handler.cam_num, error = %e, "Error stopping recording");
            }
        }
        self.recording.store(false, Ordering::SeqCst);
        let files: Vec<String> = self
            .handlers
            .iter()
            .filter_map(|h| h.recorder().video_path())
            .map(|p| p.display().to_string())
            .collect();
        info!("Recording stopped on all cameras");
        self.status.send(
            StatusKind::RecordingStopped,
            json!({"session": self.session_label(), "files": files}),
        );
    }

    /// Save one JPEG snapshot per camera from the display slot.
    pub async fn take_snapshot(&self) {
        let session_dir = match self.ensure_session_dir() {
            Ok(dir) => dir,
            Err(e) => {
                self.status.send_error(&e.to_string());
                return;
            }
        };
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        let mut files = Vec::new();
        for handler in &self.handlers {
            let Some(frame) = handler.get_display_frame() else {
                warn!(camera = handler.cam_num, "No display frame yet, skipping snapshot");
                continue;
            };
            let path = session_dir.join(format!("snapshot_cam{}_{}.jpg", handler.cam_num, timestamp));
            let save_path = path.clone();
            let result =
                tokio::task::spawn_blocking(move || save_jpeg(&frame, &save_path)).await;
            match result {
                Ok(Ok(())) => {
                    info!(camera = handler.cam_num, path = %path.display(), "Snapshot saved");
                    files.push(path.display().to_string());
                }
                Ok(Err(e)) => {
                    error!(camera = handler.cam_num, error = %e, "Snapshot failed");
                }
                Err(e) => {
                    error!(camera = handler.cam_num, error = %e, "Snapshot task failed");
                }
            }
        }
        self.status
            .send(StatusKind::SnapshotTaken, json!({"files": files}));
    }

    /// Emit a `status_report` with per-camera pipeline counters.
    pub fn send_status_report(&self) {
        let cameras: Vec<serde_json::Value> = self
            .handlers
            .iter()
            .map(|h| {
                json!({
                    "cam_num": h.cam_num,
                    "recording": h.is_recording(),
                    "capture_fps": round2(h.capture().get_fps()),
                    "collation_fps": round2(h.collator().get_fps()),
                    "captured_frames": h.capture().get_frame_count(),
                    "collated_frames": h.collator().get_frame_count(),
                    "duplicated_frames": h.collator().get_duplicate_count(),
                    "recorded_frames": h.recorder().written_frames(),
                    "output": h.recorder().video_path().map(|p| p.display().to_string()),
                })
            })
            .collect();

        self.status.send(
            StatusKind::StatusReport,
            json!({
                "recording": self.is_recording(),
                "session": self.session_label(),
                "cameras": cameras,
            }),
        );
    }

    /// Enable or disable preview streaming for one camera.
    pub fn toggle_preview(&self, camera_id: usize, enabled: bool) {
        let mut preview = self.preview_enabled.lock().unwrap_or_else(|e| e.into_inner());
        if camera_id >= preview.len() {
            self.status
                .send_error(&format!("Invalid camera_id: {camera_id}"));
            return;
        }
        preview[camera_id] = enabled;
        self.status.send(
            StatusKind::PreviewToggled,
            json!({"camera_id": camera_id, "enabled": enabled}),
        );
    }

    /// Begin an orderly exit.
    pub fn quit(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.status.send(StatusKind::Quitting, json!({}));
    }

    /// Run the configured mode until quit or shutdown.
    pub async fn run(&self) -> AppResult<()> {
        self.running.store(true, Ordering::SeqCst);
        match self.mode {
            RunMode::Slave => self.slave_loop().await,
            RunMode::Headless => self.headless_loop().await,
            RunMode::Interactive => self.interactive_loop().await,
        }
        Ok(())
    }

    /// Command-driven slave mode: JSON lines in, status lines out, plus
    /// periodic preview frames for enabled cameras.
    async fn slave_loop(&self) {
        info!("Slave mode: waiting for commands");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut preview_tick = tokio::time::interval(PREVIEW_STREAM_INTERVAL);
        preview_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown_rx.clone();

        while self.running.load(Ordering::SeqCst) && !self.shutting_down() {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            match parse_command(line) {
                                Ok(command) => self.handle_command(command).await,
                                Err(e) => {
                                    warn!(error = %e, "Bad command line");
                                    self.status.send_error(&e.to_string());
                                }
                            }
                        }
                        Ok(None) => {
                            info!("Command stream closed, exiting slave loop");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "Command read error");
                            self.status.send_error(&format!("Command error: {e}"));
                            break;
                        }
                    }
                }
                _ = preview_tick.tick() => {
                    if self.config.show_preview {
                        self.stream_preview_frames().await;
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("Shutdown requested, exiting slave loop");
                    break;
                }
            }
        }
        info!("Slave mode ended");
    }

    /// Send one `preview_frame` status per enabled camera.
    async fn stream_preview_frames(&self) {
        let enabled: Vec<bool> = self
            .preview_enabled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for handler in &self.handlers {
            if !enabled.get(handler.cam_num).copied().unwrap_or(false) {
                continue;
            }
            let Some(frame) = handler.get_display_frame() else {
                continue;
            };
            let encoded =
                tokio::task::spawn_blocking(move || encode_jpeg(&frame, PREVIEW_JPEG_QUALITY))
                    .await;
            match encoded {
                Ok(Ok(jpeg)) => {
                    let timestamp = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs_f64())
                        .unwrap_or(0.0);
                    self.status.send(
                        StatusKind::PreviewFrame,
                        json!({
                            "camera_id": handler.cam_num,
                            "frame": BASE64.encode(&jpeg),
                            "timestamp": timestamp,
                        }),
                    );
                }
                Ok(Err(e)) => debug!(camera = handler.cam_num, error = %e, "Preview encode failed"),
                Err(e) => debug!(camera = handler.cam_num, error = %e, "Preview encode task failed"),
            }
        }
    }

    /// Headless mode: record from start to shutdown.
    async fn headless_loop(&self) {
        info!("Headless mode: starting continuous recording");
        if !self.recording.load(Ordering::SeqCst) {
            self.start_recording_all().await;
        }
        let mut shutdown_rx = self.shutdown_rx.clone();
        while self.running.load(Ordering::SeqCst) && !self.shutting_down() {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
                _ = shutdown_rx.changed() => break,
            }
        }
        if self.recording.load(Ordering::SeqCst) {
            self.stop_recording_all().await;
        }
        info!("Headless mode ended");
    }

    /// Interactive console mode: `r` toggles recording, `s` snapshots,
    /// `q` quits.
    async fn interactive_loop(&self) {
        println!("Commands: r = toggle recording, s = snapshot, q = quit (Ctrl+C also quits)");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut shutdown_rx = self.shutdown_rx.clone();

        while self.running.load(Ordering::SeqCst) && !self.shutting_down() {
            tokio::select! {
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else { break };
                    match line.trim().chars().next() {
                        Some('q') => {
                            println!("Quitting...");
                            self.quit();
                        }
                        Some('r') => {
                            if self.is_recording() {
                                self.stop_recording_all().await;
                                println!("Recording stopped");
                            } else {
                                self.start_recording_all().await;
                                match self.session_label() {
                                    Some(label) => println!("Recording started -> {label}"),
                                    None => println!("Recording failed to start"),
                                }
                            }
                        }
                        Some('s') => {
                            self.take_snapshot().await;
                            println!("Snapshot taken");
                        }
                        Some(other) => println!("Unknown command '{other}' (use r/s/q)"),
                        None => {}
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        info!("Interactive mode ended");
    }

    /// Stop recordings, then clean up every handler concurrently with a
    /// per-handler budget.
    pub async fn cleanup(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if self.recording.swap(false, Ordering::SeqCst) {
            for handler in &self.handlers {
                if let Err(e) = handler.stop_recording().await {
                    debug!(camera = handler.cam_num, error = %e, "Error stopping recording during cleanup");
                }
            }
        }

        let cleanups = self.handlers.iter().map(|handler| {
            let handler = Arc::clone(handler);
            async move {
                if tokio::time::timeout(HANDLER_CLEANUP_TIMEOUT, handler.cleanup())
                    .await
                    .is_err()
                {
                    warn!(
                        camera = handler.cam_num,
                        "Camera cleanup did not finish within budget"
                    );
                }
            }
        });
        futures::future::join_all(cleanups).await;

        self.handlers.clear();
        self.status.send(StatusKind::Shutdown, json!({}));
        info!("Cleanup completed");
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Copy a strided RGB888 buffer into a tightly packed one.
fn tight_rgb(frame: &PreviewFrame) -> Vec<u8> {
    let px = &frame.pixels;
    let row_bytes = px.width as usize * RGB888_BYTES_PER_PIXEL;
    if px.stride as usize == row_bytes {
        return px.data.as_ref().to_vec();
    }
    let mut out = Vec::with_capacity(row_bytes * px.height as usize);
    for row in 0..px.height as usize {
        let start = row * px.stride as usize;
        out.extend_from_slice(&px.data[start..start + row_bytes]);
    }
    out
}

/// Encode a preview frame as JPEG bytes.
fn encode_jpeg(frame: &PreviewFrame, quality: u8) -> Result<Vec<u8>, String> {
    let data = tight_rgb(frame);
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(
            &data,
            frame.pixels.width,
            frame.pixels.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| e.to_string())?;
    Ok(out)
}

/// Write a preview frame to disk as a JPEG snapshot.
fn save_jpeg(frame: &PreviewFrame, path: &std::path::Path) -> Result<(), String> {
    let jpeg = encode_jpeg(frame, 90)?;
    std::fs::write(path, jpeg).map_err(|e| sanitize_error_message(&e.to_string()))
}
