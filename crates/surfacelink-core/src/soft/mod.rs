//! Software backend: an in-memory GPU device and capture item.
//!
//! Runs the whole pipeline without a GPU: headless hosts, CI and the unit
//! tests. Textures are pitched byte buffers (rows padded to 64 bytes, like a
//! real driver would align them), frames are delivered on a dedicated
//! capture thread, and failures can be injected.

mod capture;

pub use capture::{SoftwareCaptureItem, SoftwareCaptureStream, SoftwareFramePool, SoftwareVisual};

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::errors::GpuError;
use crate::gpu::{CopyRegion, GpuDevice, MappedTexture, TextureUsage};
use crate::types::{SharedHandle, Size};

const ROW_ALIGNMENT: usize = 64;

/// Row pitch for a BGRA texture of `width` pixels.
pub fn aligned_pitch(width: u32) -> usize {
    let row = width as usize * 4;
    row.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT
}

// ── SoftwareTexture ───────────────────────────────────────────────────────────

/// Kind of a software texture; capture frames are neither staging nor shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextureKind {
    Frame,
    Created(TextureUsage),
}

struct TextureInner {
    id: u64,
    size: Size,
    kind: TextureKind,
    row_pitch: usize,
    pixels: Mutex<Vec<u8>>,
}

/// Refcounted handle to an in-memory BGRA texture.
#[derive(Clone)]
pub struct SoftwareTexture {
    inner: Arc<TextureInner>,
}

impl SoftwareTexture {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn size(&self) -> Size {
        self.inner.size
    }

    pub fn row_pitch(&self) -> usize {
        self.inner.row_pitch
    }

    /// True if both handles refer to the same allocation.
    pub fn same_as(&self, other: &SoftwareTexture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for SoftwareTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareTexture")
            .field("id", &self.inner.id)
            .field("size", &self.inner.size)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

// ── SoftwareDevice ────────────────────────────────────────────────────────────

/// In-memory implementation of [`GpuDevice`].
#[derive(Default)]
pub struct SoftwareDevice {
    next_id: AtomicU64,
    textures_created: AtomicU64,
    flushes: AtomicU64,
    fail_maps: AtomicU32,
    fail_creates: AtomicU32,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self, size: Size, kind: TextureKind) -> SoftwareTexture {
        let row_pitch = aligned_pitch(size.width);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        SoftwareTexture {
            inner: Arc::new(TextureInner {
                id,
                size,
                kind,
                row_pitch,
                pixels: Mutex::new(vec![0; row_pitch * size.height as usize]),
            }),
        }
    }

    /// A frame texture filled from packed BGRA bytes.
    pub fn create_frame(&self, size: Size, bgra: &[u8]) -> SoftwareTexture {
        let texture = self.allocate(size, TextureKind::Frame);
        self.upload(&texture, bgra);
        texture
    }

    /// Write packed BGRA bytes into `texture`, honoring its row pitch.
    pub fn upload(&self, texture: &SoftwareTexture, bgra: &[u8]) {
        let row_bytes = texture.size().width as usize * 4;
        if row_bytes == 0 {
            return;
        }
        let pitch = texture.row_pitch();
        let mut pixels = texture.inner.pixels.lock().unwrap_or_else(PoisonError::into_inner);
        for (dst, src) in pixels.chunks_mut(pitch).zip(bgra.chunks(row_bytes)) {
            let n = src.len().min(row_bytes);
            dst[..n].copy_from_slice(&src[..n]);
        }
    }

    /// Packed copy of the texture's BGRA bytes.
    pub fn download(&self, texture: &SoftwareTexture) -> Vec<u8> {
        let size = texture.size();
        let row_bytes = size.width as usize * 4;
        let pixels = texture.inner.pixels.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::with_capacity(row_bytes * size.height as usize);
        if row_bytes == 0 {
            return out;
        }
        for row in pixels.chunks(texture.row_pitch()).take(size.height as usize) {
            out.extend_from_slice(&row[..row_bytes]);
        }
        out
    }

    /// Make the next `n` map-for-read calls fail.
    pub fn fail_next_maps(&self, n: u32) {
        self.fail_maps.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` texture creations fail.
    pub fn fail_next_creates(&self, n: u32) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    pub fn textures_created(&self) -> u64 {
        self.textures_created.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl GpuDevice for SoftwareDevice {
    type Texture = SoftwareTexture;

    fn texture_size(&self, texture: &SoftwareTexture) -> Size {
        texture.size()
    }

    fn create_texture(&self, size: Size, usage: TextureUsage) -> Result<SoftwareTexture, GpuError> {
        if size.is_empty() || Self::take_failure(&self.fail_creates) {
            return Err(GpuError::TextureCreation { size, reason: "allocation refused".into() });
        }
        self.textures_created.fetch_add(1, Ordering::Relaxed);
        trace!("software texture {size} {usage:?}");
        Ok(self.allocate(size, TextureKind::Created(usage)))
    }

    fn shared_handle(&self, texture: &SoftwareTexture) -> Result<SharedHandle, GpuError> {
        match texture.inner.kind {
            TextureKind::Created(TextureUsage::Shared) => Ok(SharedHandle(texture.id() as usize)),
            _ => Err(GpuError::SharedHandle { reason: "texture was not created shareable".into() }),
        }
    }

    fn copy_texture(&self, dst: &SoftwareTexture, src: &SoftwareTexture, region: CopyRegion) {
        if dst.same_as(src) {
            return;
        }
        let size = match region {
            CopyRegion::Full => {
                if dst.size() != src.size() {
                    return;
                }
                src.size()
            }
            CopyRegion::TopLeft(size) => size.intersect(dst.size()).intersect(src.size()),
        };
        let row_bytes = size.width as usize * 4;
        if row_bytes == 0 {
            return;
        }

        let src_pixels = src.inner.pixels.lock().unwrap_or_else(PoisonError::into_inner);
        let mut dst_pixels = dst.inner.pixels.lock().unwrap_or_else(PoisonError::into_inner);
        for (d, s) in dst_pixels
            .chunks_mut(dst.row_pitch())
            .zip(src_pixels.chunks(src.row_pitch()))
            .take(size.height as usize)
        {
            d[..row_bytes].copy_from_slice(&s[..row_bytes]);
        }
    }

    fn read_texture<R, F>(&self, texture: &SoftwareTexture, read: F) -> Result<R, GpuError>
    where
        F: FnOnce(&MappedTexture<'_>) -> R,
    {
        if texture.inner.kind != TextureKind::Created(TextureUsage::Staging) {
            return Err(GpuError::MapFailed { reason: "texture is not CPU readable".into() });
        }
        if Self::take_failure(&self.fail_maps) {
            return Err(GpuError::MapFailed { reason: "device busy".into() });
        }
        let pixels = texture.inner.pixels.lock().unwrap_or_else(PoisonError::into_inner);
        let mapped = MappedTexture { data: &pixels, row_pitch: texture.row_pitch(), size: texture.size() };
        Ok(read(&mapped))
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }
}
