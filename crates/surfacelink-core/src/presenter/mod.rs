//! Presentation strategies turning the latest captured frame into something
//! the host renderer consumes.
//!
//! | Presenter | Artifact | Reallocation policy |
//! |-----------|----------|---------------------|
//! | [`CpuPresenter`] | RGBA8 [`PixelBuffer`](crate::types::PixelBuffer) | staging texture grows only |
//! | [`GpuPresenter`] | [`SurfaceDescriptor`](crate::types::SurfaceDescriptor) | recreated on any size change |

mod cpu;
mod gpu;

pub use cpu::CpuPresenter;
pub use gpu::GpuPresenter;

use crate::types::Size;

/// Produces a host artifact from a captured frame. Called on the consumer
/// thread only.
pub trait Presenter: Send + 'static {
    type Frame;
    type Artifact<'a>
    where
        Self: 'a;

    /// Copy `frame` into the presenter's own surface and return the result.
    ///
    /// `requested` is the host's layout size; the frame's own dimensions are
    /// authoritative. Transient GPU failures are logged and yield the
    /// previous artifact (or `None` if there is none).
    fn present(&mut self, frame: &Self::Frame, requested: Size) -> Option<Self::Artifact<'_>>;
}
