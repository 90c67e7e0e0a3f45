use thiserror::Error;

use crate::types::Size;

#[derive(Error, Debug)]
pub enum SurfaceLinkError {
    #[error("Screen capture is not supported on this system")]
    CaptureUnsupported,

    #[error("Configuration invalid: {reason}")]
    ConfigurationInvalid { reason: String },

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("No GPU device available: {reason}")]
    DeviceUnavailable { reason: String },

    #[error("Failed to create {size} texture: {reason}")]
    TextureCreation { size: Size, reason: String },

    #[error("Failed to map texture for read: {reason}")]
    MapFailed { reason: String },

    #[error("Failed to export shared handle: {reason}")]
    SharedHandle { reason: String },

    #[error("Texture does not belong to this device")]
    ForeignTexture,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture source is not bound to a surface")]
    NotBound,

    #[error("Captured surface was closed")]
    SourceClosed,

    #[error("Failed to create capture item: {reason}")]
    ItemCreation { reason: String },

    #[error("Failed to create frame pool: {reason}")]
    FramePool { reason: String },

    #[error("Failed to start capture session: {reason}")]
    Session { reason: String },
}
