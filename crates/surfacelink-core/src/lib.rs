//! surfacelink-core: frame-delivery pipeline between a captured visual
//! surface and a host renderer's texture.
//!
//! ```text
//!  CaptureItem ──FrameArrived──► FrameCaptureSource ──latest_frame()──► Presenter
//!  (platform)    capture thread   single-slot inbox    consumer thread    │
//!                                                                        ├─ CpuPresenter → PixelBuffer (RGBA8)
//!                                                                        └─ GpuPresenter → SurfaceDescriptor
//! ```
//!
//! Platform backends implement [`capture::CaptureItem`] and
//! [`gpu::GpuDevice`]. The [`soft`] module provides an in-process backend
//! used by tests and the headless host.

pub mod bridge;
pub mod capture;
pub mod config;
pub mod errors;
pub mod gpu;
pub mod presenter;
pub mod soft;
pub mod swizzle;
pub mod types;

pub use bridge::TextureBridge;
pub use capture::{CaptureStats, FrameCaptureSource, SurfaceSizeNotifier};
pub use config::{PipelineConfig, PresenterKind};
pub use errors::{CaptureError, GpuError, SurfaceLinkError};
pub use presenter::{CpuPresenter, GpuPresenter, Presenter};
pub use types::*;
