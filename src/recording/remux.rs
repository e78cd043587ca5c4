// SPDX-License-Identifier: GPL-3.0-only

//! Post-recording remux
//!
//! Repackages the elementary `.h264` stream into an `.mp4` container by
//! invoking the external `ffmpeg` binary with stream copy (no re-encoding).
//! The remuxer is an opaque subprocess: any failure is reported to the
//! caller, which keeps the `.h264` file and carries on.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::errors::RecordingError;

/// Remux `h264_path` into a sibling `.mp4`, using `fps` as the input frame
/// rate. Returns the `.mp4` path on success; the caller owns deleting the
/// original.
pub fn remux_to_mp4(h264_path: &Path, fps: f64) -> Result<PathBuf, RecordingError> {
    let mp4_path = h264_path.with_extension("mp4");

    debug!(
        input = %h264_path.display(),
        output = %mp4_path.display(),
        fps,
        "Invoking ffmpeg remux"
    );

    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-r")
        .arg(fps.to_string())
        .arg("-i")
        .arg(h264_path)
        .args(["-c:v", "copy"])
        .arg(&mp4_path)
        .output()
        .map_err(|e| RecordingError::RemuxFailed(format!("failed to run ffmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RecordingError::RemuxFailed(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            stderr.lines().last().unwrap_or("")
        )));
    }

    info!(output = %mp4_path.display(), "Remux complete");
    Ok(mp4_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_input_reports_failure() {
        // Whether ffmpeg is installed or not, remuxing a nonexistent input
        // must surface RemuxFailed so the caller keeps the original file.
        let result = remux_to_mp4(Path::new("/nonexistent/capture.h264"), 30.0);
        assert!(matches!(result, Err(RecordingError::RemuxFailed(_))));
    }
}
