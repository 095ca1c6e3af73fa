//! Error types for vigil

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to bind or unbind the camera use-cases
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Use case binding failed: {0}")]
    UseCase(String),

    #[error("Frame source already bound")]
    AlreadyBound,

    #[error("Binding context closed")]
    ContextClosed,
}

/// Single-frame inference failure reported by a detector
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),

    #[error("Detector panicked: {0}")]
    Panicked(String),
}

/// Failure to hand a frame buffer back to its source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Release of frame {frame_id} failed: {reason}")]
pub struct ReleaseError {
    pub frame_id: u64,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Binding error: {0}")]
    Binding(#[from] BindError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectorError),

    #[error("Resource release error: {0}")]
    ResourceRelease(#[from] ReleaseError),

    #[error("Pipeline not initialized")]
    NotInitialized,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Stable error code reported on the control surface
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Binding(_) => "CAMERA_BIND_FAILED",
            PipelineError::Detection(_) => "DETECTION_FAILED",
            PipelineError::ResourceRelease(_) => "RESOURCE_RELEASE_FAILED",
            PipelineError::NotInitialized => "NOT_INITIALIZED",
            PipelineError::Config(_) => "INVALID_CONFIG",
        }
    }
}

/// Error returned to the host shell for a control command
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ControlError {
    pub code: String,
    pub message: String,
}

impl ControlError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_implemented(method: &str) -> Self {
        Self::new("NOT_IMPLEMENTED", format!("Unknown method: {}", method))
    }
}

impl From<PipelineError> for ControlError {
    fn from(err: PipelineError) -> Self {
        ControlError::new(err.code(), err.to_string())
    }
}
