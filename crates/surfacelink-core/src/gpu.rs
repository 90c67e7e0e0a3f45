//! GPU device capability consumed by the pipeline.
//!
//! The device is created once per process and shared read-only by the
//! capture source and the presenters. Only presenters issue copy commands,
//! always from the consumer thread.

use crate::errors::GpuError;
use crate::types::{SharedHandle, Size};

/// How a texture created by the pipeline will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUsage {
    /// CPU-readable copy target (`D3D11_USAGE_STAGING`, `CPU_ACCESS_READ`).
    Staging,
    /// Render-target and shader-resource texture (`D3D11_USAGE_DEFAULT`,
    /// `MISC_SHARED`) that another device opens through its shared handle.
    Shared,
}

/// Part of the source texture a copy command transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyRegion {
    /// Whole resource; both textures have identical dimensions.
    Full,
    /// Rectangle of the given size anchored at (0, 0) in both textures.
    TopLeft(Size),
}

/// A texture mapped for CPU read.
///
/// Rows start every `row_pitch` bytes, which may be larger than
/// `size.width * 4` because of GPU alignment.
#[derive(Debug)]
pub struct MappedTexture<'a> {
    pub data: &'a [u8],
    pub row_pitch: usize,
    pub size: Size,
}

impl<'a> MappedTexture<'a> {
    /// Bytes of row `y`, limited to `width` pixels.
    pub fn row(&self, y: u32, width: u32) -> Option<&'a [u8]> {
        let start = y as usize * self.row_pitch;
        self.data.get(start..start + width as usize * 4)
    }
}

/// GPU device + immediate execution context.
pub trait GpuDevice: Send + Sync + 'static {
    /// Handle to a 2D BGRA texture living on this device.
    type Texture: Clone + Send + Sync + 'static;

    /// Dimensions from the texture description.
    fn texture_size(&self, texture: &Self::Texture) -> Size;

    fn create_texture(&self, size: Size, usage: TextureUsage) -> Result<Self::Texture, GpuError>;

    /// Export a handle for a texture created with [`TextureUsage::Shared`].
    fn shared_handle(&self, texture: &Self::Texture) -> Result<SharedHandle, GpuError>;

    fn copy_texture(&self, dst: &Self::Texture, src: &Self::Texture, region: CopyRegion);

    /// Map `texture` for read, run `read` on the mapping, then unmap.
    fn read_texture<R, F>(&self, texture: &Self::Texture, read: F) -> Result<R, GpuError>
    where
        F: FnOnce(&MappedTexture<'_>) -> R;

    /// Submit queued commands so they complete before another API consumes
    /// the destination.
    fn flush(&self);
}

/// Copy `src` into `dst`: a full-resource copy when the sizes match exactly,
/// otherwise a top-left sub-region restricted to the overlap.
pub fn copy_frame<D: GpuDevice>(
    device: &D,
    dst: &D::Texture,
    dst_size: Size,
    src: &D::Texture,
    src_size: Size,
) -> CopyRegion {
    let region = if dst_size == src_size {
        CopyRegion::Full
    } else {
        CopyRegion::TopLeft(dst_size.intersect(src_size))
    };
    device.copy_texture(dst, src, region);
    region
}
