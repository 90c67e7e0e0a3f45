use std::sync::Arc;

use tracing::{debug, warn};

use super::Presenter;
use crate::gpu::{copy_frame, GpuDevice, TextureUsage};
use crate::types::{Size, SurfaceDescriptor};

struct SharedSurface<T> {
    texture: T,
    descriptor: SurfaceDescriptor,
}

/// GPU path: frame → shared texture, handed out through its shared handle.
///
/// The shared surface always matches the frame size exactly. The host opens
/// it by handle, so it is recreated rather than resized.
pub struct GpuPresenter<D: GpuDevice> {
    device: Arc<D>,
    surface: Option<SharedSurface<D::Texture>>,
}

impl<D: GpuDevice> GpuPresenter<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self { device, surface: None }
    }

    /// Descriptor of the current shared surface.
    pub fn descriptor(&self) -> Option<SurfaceDescriptor> {
        self.surface.as_ref().map(|s| s.descriptor)
    }

    fn ensure_surface(&mut self, size: Size) -> Option<(D::Texture, SurfaceDescriptor)> {
        if let Some(surface) = &self.surface {
            if surface.descriptor.size() == size {
                return Some((surface.texture.clone(), surface.descriptor));
            }
        }

        // The old handle must not outlive its size.
        self.surface = None;

        let texture = match self.device.create_texture(size, TextureUsage::Shared) {
            Ok(t) => t,
            Err(e) => {
                warn!("creating shared surface failed: {e}");
                return None;
            }
        };
        let handle = match self.device.shared_handle(&texture) {
            Ok(h) => h,
            Err(e) => {
                warn!("exporting shared surface failed: {e}");
                return None;
            }
        };

        let descriptor = SurfaceDescriptor::new(handle, size);
        debug!("shared surface {size} created, handle {:#x}", handle.as_raw());
        self.surface = Some(SharedSurface { texture: texture.clone(), descriptor });
        Some((texture, descriptor))
    }
}

impl<D: GpuDevice> Presenter for GpuPresenter<D> {
    type Frame = D::Texture;
    type Artifact<'a> = SurfaceDescriptor where Self: 'a;

    fn present(&mut self, frame: &D::Texture, _requested: Size) -> Option<SurfaceDescriptor> {
        let frame_size = self.device.texture_size(frame);
        if frame_size.is_empty() {
            return None;
        }

        let (surface, descriptor) = self.ensure_surface(frame_size)?;
        copy_frame(&*self.device, &surface, descriptor.size(), frame, frame_size);
        // The host consumes the handle from another device; the copy must
        // have been submitted first.
        self.device.flush();
        Some(descriptor)
    }
}
