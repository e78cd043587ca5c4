// SPDX-License-Identifier: GPL-3.0-only

//! Parent-process status messaging
//!
//! In slave mode every command and lifecycle event produces one JSON line on
//! stdout with a common envelope:
//!
//! ```json
//! {"type":"status","status":"<kind>","timestamp":"<ISO-8601>","data":{...}}
//! ```
//!
//! Error text sent to the parent is sanitized: absolute paths are replaced
//! with a placeholder and messages are truncated, so filesystem layout never
//! leaks across the process boundary.

use std::io::Write;
use std::sync::{LazyLock, Mutex};

use chrono::{Local, SecondsFormat};
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::constants::MAX_ERROR_MESSAGE_LENGTH;

/// Status kinds emitted to the parent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Initializing,
    Initialized,
    RecordingStarted,
    RecordingStopped,
    SnapshotTaken,
    StatusReport,
    PreviewToggled,
    PreviewFrame,
    Warning,
    Error,
    Shutdown,
    Quitting,
}

#[derive(Serialize)]
struct StatusMessage<'a> {
    #[serde(rename = "type")]
    message_type: &'static str,
    status: StatusKind,
    timestamp: String,
    data: &'a serde_json::Value,
}

/// Writes status lines to the parent when running as a child process;
/// disabled (silent) in the other run modes.
///
/// The output stream is injectable so tests can capture the protocol; the
/// real system always writes to stdout.
pub struct StatusSink {
    enabled: bool,
    out: Option<Mutex<Box<dyn Write + Send>>>,
}

impl StatusSink {
    /// Stdout-backed sink, silent unless `enabled`.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            out: enabled.then(|| {
                Mutex::new(Box::new(std::io::stdout()) as Box<dyn Write + Send>)
            }),
        }
    }

    /// Sink writing to an arbitrary stream (protocol tests).
    pub fn to_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            enabled: true,
            out: Some(Mutex::new(Box::new(writer))),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Emit one status line. Timestamps are issued in send order, so the
    /// parent can rely on their ordering within a response stream.
    pub fn send(&self, status: StatusKind, data: serde_json::Value) {
        let Some(out) = &self.out else {
            return;
        };
        let message = StatusMessage {
            message_type: "status",
            status,
            timestamp: Local::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            data: &data,
        };
        match serde_json::to_string(&message) {
            Ok(line) => {
                let mut out = out.lock().unwrap_or_else(|e| e.into_inner());
                let _ = writeln!(out, "{line}");
                let _ = out.flush();
            }
            Err(e) => warn!(error = %e, "Could not serialize status message"),
        }
    }

    /// Emit an `error` status with a sanitized message.
    pub fn send_error(&self, message: &str) {
        self.send(
            StatusKind::Error,
            serde_json::json!({ "message": sanitize_error_message(message) }),
        );
    }
}

static UNIX_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[\s(\[])(/|\.{1,2}/)[^\s)\]]*").expect("valid regex"));
static WINDOWS_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]:\\[^\s]*").expect("valid regex"));

/// Scrub filesystem paths and clamp the length of an error message before it
/// leaves the process.
pub fn sanitize_error_message(message: &str) -> String {
    let scrubbed = UNIX_PATH.replace_all(message, "${1}[path]");
    let scrubbed = WINDOWS_PATH.replace_all(&scrubbed, "[path]");

    let mut out = scrubbed.into_owned();
    if out.len() > MAX_ERROR_MESSAGE_LENGTH {
        let mut end = MAX_ERROR_MESSAGE_LENGTH - 3;
        while !out.is_char_boundary(end) {
            end -= 1;
        }
        out.truncate(end);
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&StatusKind::RecordingStarted).unwrap(),
            "\"recording_started\""
        );
        assert_eq!(
            serde_json::to_string(&StatusKind::StatusReport).unwrap(),
            "\"status_report\""
        );
    }

    #[test]
    fn absolute_paths_are_scrubbed() {
        let msg = sanitize_error_message("could not open /home/pi/recordings/cam0.h264");
        assert!(!msg.contains("/home"), "sanitized: {msg}");
        assert!(msg.contains("[path]"));
    }

    #[test]
    fn relative_paths_are_scrubbed() {
        let msg = sanitize_error_message("missing ./config.txt here");
        assert!(msg.contains("[path]"));
        assert!(!msg.contains("config.txt"));
    }

    #[test]
    fn long_messages_are_truncated() {
        let long = "x".repeat(400);
        let msg = sanitize_error_message(&long);
        assert_eq!(msg.len(), MAX_ERROR_MESSAGE_LENGTH);
        assert!(msg.ends_with("..."));
    }

    #[test]
    fn plain_messages_pass_through() {
        let msg = sanitize_error_message("Already recording");
        assert_eq!(msg, "Already recording");
    }
}
