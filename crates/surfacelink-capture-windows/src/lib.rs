//! surfacelink-capture-windows: Windows.Graphics.Capture (WGC) backend.
//!
//! Captures a `Windows.UI.Composition` visual (the browser's composition
//! target) and exposes it through the `surfacelink-core` seams.
//! On non-Windows targets only the support probe is compiled.
//!
//! # Windows pipeline
//!
//! ```text
//! Visual
//!   │  GraphicsCaptureItem::CreateFromVisual
//!   ▼
//! WgcCaptureItem
//!   │  Direct3D11CaptureFramePool::CreateFreeThreaded (BGRA8, N buffers)
//!   ▼
//! GraphicsCaptureSession::StartCapture()
//!   │  FrameArrived (thread-pool thread)
//!   ▼
//! D3d11Texture (frame surface) → FrameCaptureSource → CpuPresenter / GpuPresenter
//!                                                      on D3d11Context
//! ```

// ── Platform split ─────────────────────────────────────────────────────────────

#[cfg(target_os = "windows")]
mod graphics;
#[cfg(target_os = "windows")]
mod wgc;
#[cfg(target_os = "windows")]
pub use graphics::{D3d11Context, D3d11Texture};
#[cfg(target_os = "windows")]
pub use wgc::{is_capture_supported, WgcCaptureItem, WgcCaptureStream, WgcFramePool};

#[cfg(not(target_os = "windows"))]
mod stub;
#[cfg(not(target_os = "windows"))]
pub use stub::is_capture_supported;
