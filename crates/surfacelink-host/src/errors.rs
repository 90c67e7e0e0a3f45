use surfacelink_core::{CaptureError, GpuError};
use thiserror::Error;

use crate::method::MethodError;

// MARK: - HostError

/// Failures while wiring a browser session to a capture pipeline.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Windows.Graphics.Capture is not supported on this system")]
    CaptureUnsupported,

    #[error("Creating the browser environment failed: {0}")]
    EnvironmentCreation(String),

    #[error("Creating the browser session failed: {0}")]
    SessionCreation(String),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl From<HostError> for MethodError {
    fn from(e: HostError) -> Self {
        MethodError::InitializationFailed(e.to_string())
    }
}
