// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the camera recording system

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Camera-related errors
    Camera(CameraError),
    /// Recording-related errors
    Recording(RecordingError),
    /// Command protocol errors
    Command(CommandError),
    /// Configuration errors
    Config(String),
    /// Generic error with message
    Other(String),
}

/// Camera-specific errors
#[derive(Debug, Clone)]
pub enum CameraError {
    /// No camera devices found during discovery
    NoCameraFound,
    /// Camera initialization failed (triggers supervisor retry)
    InitializationFailed(String),
    /// Camera disconnected or released during operation
    Disconnected,
    /// The per-frame capture request timed out (hardware hang)
    CaptureTimeout,
    /// Timed out waiting for a published frame
    FrameWaitTimeout,
    /// Transient per-frame capture failure
    CaptureFailed(String),
    /// Requested stream configuration is not supported
    InvalidConfiguration(String),
}

/// Recording-specific errors
#[derive(Debug, Clone)]
pub enum RecordingError {
    /// Recording already in progress
    AlreadyRecording,
    /// No recording in progress
    NotRecording,
    /// The hardware encoder failed to start
    EncoderStartFailed(String),
    /// The hardware encoder failed to stop
    EncoderStopFailed(String),
    /// Timing CSV file could not be created or written
    CsvIo(String),
    /// Post-recording remux failed (the `.h264` file is preserved)
    RemuxFailed(String),
    /// General I/O error
    Io(String),
}

/// Command protocol errors
#[derive(Debug, Clone)]
pub enum CommandError {
    /// Input line was not valid JSON or lacked a `command` key
    InvalidJson(String),
    /// Command name is not recognized
    UnknownCommand(String),
    /// Command arguments were out of range
    InvalidArgument(String),
}

impl AppError {
    /// True when the supervisor should re-enter device discovery.
    pub fn is_initialization_error(&self) -> bool {
        matches!(
            self,
            AppError::Camera(CameraError::NoCameraFound)
                | AppError::Camera(CameraError::InitializationFailed(_))
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Camera(e) => write!(f, "Camera error: {}", e),
            AppError::Recording(e) => write!(f, "Recording error: {}", e),
            AppError::Command(e) => write!(f, "Command error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::NoCameraFound => write!(f, "No camera devices found"),
            CameraError::InitializationFailed(msg) => {
                write!(f, "Camera initialization failed: {}", msg)
            }
            CameraError::Disconnected => write!(f, "Camera disconnected"),
            CameraError::CaptureTimeout => write!(f, "Camera capture request timed out"),
            CameraError::FrameWaitTimeout => write!(f, "Timed out waiting for a frame"),
            CameraError::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            CameraError::InvalidConfiguration(msg) => {
                write!(f, "Invalid camera configuration: {}", msg)
            }
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::AlreadyRecording => write!(f, "Recording already in progress"),
            RecordingError::NotRecording => write!(f, "No recording in progress"),
            RecordingError::EncoderStartFailed(msg) => {
                write!(f, "Failed to start encoder: {}", msg)
            }
            RecordingError::EncoderStopFailed(msg) => {
                write!(f, "Failed to stop encoder: {}", msg)
            }
            RecordingError::CsvIo(msg) => write!(f, "Timing CSV error: {}", msg),
            RecordingError::RemuxFailed(msg) => write!(f, "Remux failed: {}", msg),
            RecordingError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::InvalidJson(msg) => write!(f, "Invalid JSON: {}", msg),
            CommandError::UnknownCommand(cmd) => write!(f, "Unknown command: {}", cmd),
            CommandError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for CameraError {}
impl std::error::Error for RecordingError {}
impl std::error::Error for CommandError {}

impl From<CameraError> for AppError {
    fn from(e: CameraError) -> Self {
        AppError::Camera(e)
    }
}

impl From<RecordingError> for AppError {
    fn from(e: RecordingError) -> Self {
        AppError::Recording(e)
    }
}

impl From<CommandError> for AppError {
    fn from(e: CommandError) -> Self {
        AppError::Command(e)
    }
}
