//! `TextureBridge`: owns one capture source and one presenter and ties
//! their lifetimes together.
//!
//! Dropping the bridge stops the capture source, and waits for any in-flight
//! frame-arrived notification, before the presenter's GPU resources are
//! released.

use std::sync::Arc;

use crate::capture::{CaptureItem, CaptureStats, FrameAvailableCallback, FrameCaptureSource, SurfaceSizeNotifier};
use crate::errors::CaptureError;
use crate::gpu::GpuDevice;
use crate::presenter::{CpuPresenter, GpuPresenter, Presenter};
use crate::types::{CaptureState, PixelBuffer, Size, SurfaceDescriptor};

pub struct TextureBridge<I, P>
where
    I: CaptureItem,
    P: Presenter<Frame = I::Frame>,
{
    source: FrameCaptureSource<I>,
    presenter: P,
}

impl<I, P> TextureBridge<I, P>
where
    I: CaptureItem,
    P: Presenter<Frame = I::Frame>,
{
    pub fn new(source: FrameCaptureSource<I>, presenter: P) -> Self {
        Self { source, presenter }
    }

    pub fn start(&self) -> Result<(), CaptureError> {
        self.source.start()
    }

    pub fn stop(&self) {
        self.source.stop();
    }

    pub fn state(&self) -> CaptureState {
        self.source.state()
    }

    pub fn is_running(&self) -> bool {
        self.source.is_running()
    }

    pub fn notify_surface_size_changed(&self) {
        self.source.notify_surface_size_changed();
    }

    pub fn size_notifier(&self) -> SurfaceSizeNotifier {
        self.source.size_notifier()
    }

    pub fn set_on_frame_available(&self, callback: Option<FrameAvailableCallback>) {
        self.source.set_on_frame_available(callback);
    }

    pub fn stats(&self) -> CaptureStats {
        self.source.stats()
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Present the latest frame. `None` if the source is not running or no
    /// frame has arrived yet; never waits for one.
    pub fn pull(&mut self, requested_width: u32, requested_height: u32) -> Option<P::Artifact<'_>> {
        let frame = self.source.latest_frame()?;
        self.presenter.present(&frame, Size::new(requested_width, requested_height))
    }
}

impl<I, D> TextureBridge<I, CpuPresenter<D>>
where
    D: GpuDevice,
    I: CaptureItem<Frame = D::Texture>,
{
    /// CPU variant: bind `item` and present through a staging texture.
    pub fn pixel_buffer(device: Arc<D>, item: I, buffer_count: u32) -> Self {
        Self::new(FrameCaptureSource::new(item, buffer_count), CpuPresenter::new(device))
    }

    /// The returned buffer stays valid until the next pull.
    pub fn copy_pixel_buffer(&mut self, width: u32, height: u32) -> Option<PixelBuffer<'_>> {
        self.pull(width, height)
    }
}

impl<I, D> TextureBridge<I, GpuPresenter<D>>
where
    D: GpuDevice,
    I: CaptureItem<Frame = D::Texture>,
{
    /// GPU variant: bind `item` and present through a shared surface.
    pub fn gpu_surface(device: Arc<D>, item: I, buffer_count: u32) -> Self {
        Self::new(FrameCaptureSource::new(item, buffer_count), GpuPresenter::new(device))
    }

    pub fn surface_descriptor(&mut self, width: u32, height: u32) -> Option<SurfaceDescriptor> {
        self.pull(width, height)
    }
}

impl<I, P> Drop for TextureBridge<I, P>
where
    I: CaptureItem,
    P: Presenter<Frame = I::Frame>,
{
    fn drop(&mut self) {
        self.source.stop();
    }
}
