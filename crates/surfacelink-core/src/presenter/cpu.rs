use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::Presenter;
use crate::gpu::{copy_frame, GpuDevice, TextureUsage};
use crate::swizzle::swap_red_blue;
use crate::types::{PixelBuffer, Size};

/// CPU path: frame → staging texture → map → swizzle into an RGBA buffer.
pub struct CpuPresenter<D: GpuDevice> {
    device: Arc<D>,
    /// Never shrinks, so shrinking frames do not churn GPU allocations.
    staging: Option<(D::Texture, Size)>,
    backing: Vec<u8>,
    /// Dimensions `backing` currently describes; `None` before the first
    /// successful pull.
    buffer_size: Option<Size>,
}

impl<D: GpuDevice> CpuPresenter<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self { device, staging: None, backing: Vec::new(), buffer_size: None }
    }

    /// Current staging texture size.
    pub fn staging_capacity(&self) -> Option<Size> {
        self.staging.as_ref().map(|(_, size)| *size)
    }

    /// Pixel buffer produced by the last successful pull.
    pub fn pixel_buffer(&self) -> Option<PixelBuffer<'_>> {
        self.buffer_size.map(|size| PixelBuffer {
            data: &self.backing,
            width: size.width,
            height: size.height,
        })
    }

    fn ensure_staging(&mut self, frame_size: Size) -> Option<(D::Texture, Size)> {
        if let Some((texture, size)) = &self.staging {
            if size.contains(frame_size) {
                return Some((texture.clone(), *size));
            }
        }

        // The old texture stays in place until its replacement exists.
        let target = self
            .staging
            .as_ref()
            .map_or(frame_size, |(_, size)| size.union(frame_size));
        match self.device.create_texture(target, TextureUsage::Staging) {
            Ok(texture) => {
                debug!("staging texture grown to {target}");
                self.staging = Some((texture.clone(), target));
                Some((texture, target))
            }
            Err(e) => {
                warn!("creating staging texture failed: {e}");
                None
            }
        }
    }
}

impl<D: GpuDevice> Presenter for CpuPresenter<D> {
    type Frame = D::Texture;
    type Artifact<'a> = PixelBuffer<'a> where Self: 'a;

    fn present(&mut self, frame: &D::Texture, requested: Size) -> Option<PixelBuffer<'_>> {
        let frame_size = self.device.texture_size(frame);
        if frame_size.is_empty() {
            return self.pixel_buffer();
        }
        if frame_size != requested {
            trace!("frame {frame_size} presented for {requested} layout");
        }

        let Some((staging, staging_size)) = self.ensure_staging(frame_size) else {
            return self.pixel_buffer();
        };
        copy_frame(&*self.device, &staging, staging_size, frame, frame_size);

        let backing = &mut self.backing;
        let buffer_size = &mut self.buffer_size;
        let converted = self.device.read_texture(&staging, |mapped| {
            if *buffer_size != Some(frame_size) {
                *backing = vec![0; frame_size.pixel_count() * 4];
                *buffer_size = Some(frame_size);
            }
            swap_red_blue(backing, mapped.data, frame_size, mapped.row_pitch)
        });

        match converted {
            Ok(rows) if rows < frame_size.height => {
                warn!("mapped staging texture was short: {rows}/{} rows", frame_size.height)
            }
            Ok(_) => {}
            Err(e) => debug!("skipping pull: {e}"),
        }
        self.pixel_buffer()
    }
}
