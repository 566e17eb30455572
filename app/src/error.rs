use camera_capture::CaptureError;
use thiserror::Error;

pub const CAMERA_DENIED_MESSAGE: &str =
    "Camera access denied. Please allow access to your camera and microphone.";

/// Errors surfaced by the capture pipeline, the gallery and the account service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Encoding failed: {0}")]
    EncodingFailure(String),

    #[error("Gallery store is corrupt: {0}")]
    CorruptStore(String),

    #[error("{0}")]
    RemoteService(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("A video with id {0} already exists")]
    DuplicateRecord(String),

    #[error("Cannot go from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("No active session")]
    NoActiveSession,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Stable code for error events
    pub fn code(&self) -> &'static str {
        match self {
            AppError::PermissionDenied(_) => "PERMISSION_DENIED",
            AppError::EncodingFailure(_) => "ENCODING_FAILURE",
            AppError::CorruptStore(_) => "CORRUPT_STORE",
            AppError::RemoteService(_) => "REMOTE_SERVICE_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::DuplicateRecord(_) => "DUPLICATE_RECORD",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::NoActiveSession => "NO_SESSION",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Inline message shown to the user
    pub fn user_message(&self) -> String {
        match self {
            AppError::PermissionDenied(_) => CAMERA_DENIED_MESSAGE.to_string(),
            AppError::RemoteService(message) => message.clone(),
            AppError::NoActiveSession => "Please sign in first.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<CaptureError> for AppError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::PermissionDenied(reason) | CaptureError::DeviceUnavailable(reason) => {
                AppError::PermissionDenied(reason)
            }
            other => AppError::EncodingFailure(other.to_string()),
        }
    }
}
