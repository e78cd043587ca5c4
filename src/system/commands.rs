// SPDX-License-Identifier: GPL-3.0-only

//! Command protocol parsing
//!
//! One JSON object per stdin line, dispatched by its required `command` key:
//!
//! ```json
//! {"command":"start_recording"}
//! {"command":"toggle_preview","camera_id":0,"enabled":false}
//! ```
//!
//! Malformed lines and unknown commands are reported back to the parent as
//! `error` statuses; they never interrupt command processing.

use serde::Deserialize;

use crate::errors::CommandError;

/// A parsed parent-process command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    StartRecording,
    StopRecording,
    TakeSnapshot,
    GetStatus,
    TogglePreview {
        camera_id: usize,
        #[serde(default = "default_enabled")]
        enabled: bool,
    },
    Quit,
}

fn default_enabled() -> bool {
    true
}

/// Parse one protocol line, distinguishing malformed JSON from a
/// well-formed line carrying an unknown command name.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| CommandError::InvalidJson(e.to_string()))?;

    let Some(name) = value.get("command").and_then(|v| v.as_str()) else {
        return Err(CommandError::InvalidJson(
            "missing \"command\" key".to_string(),
        ));
    };
    let name = name.to_string();

    serde_json::from_value(value).map_err(|e| {
        let text = e.to_string();
        if text.contains("unknown variant") {
            CommandError::UnknownCommand(name)
        } else {
            CommandError::InvalidArgument(text)
        }
    })
}
