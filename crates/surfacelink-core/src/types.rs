use serde::{Deserialize, Serialize};

// MARK: - Size

/// Width × height of a surface, texture or pixel buffer, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const ZERO: Self = Self { width: 0, height: 0 };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True if a surface of `self` can hold `other` without reallocation.
    pub fn contains(&self, other: Size) -> bool {
        self.width >= other.width && self.height >= other.height
    }

    /// Per-dimension maximum of both sizes.
    pub fn union(&self, other: Size) -> Size {
        Size::new(self.width.max(other.width), self.height.max(other.height))
    }

    /// Per-dimension minimum of both sizes.
    pub fn intersect(&self, other: Size) -> Size {
        Size::new(self.width.min(other.width), self.height.min(other.height))
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// MARK: - PixelFormat

/// 32-bit pixel layouts handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Blue, Green, Red, Alpha. Native format of the capture frame pool.
    Bgra8,
    /// Red, Green, Blue, Alpha. Format the host expects in pixel buffers.
    Rgba8,
}

impl PixelFormat {
    /// Format every capture frame pool is created with.
    pub const CAPTURE: Self = Self::Bgra8;

    pub const fn bytes_per_pixel(&self) -> usize {
        4
    }
}

// MARK: - CaptureState

/// Lifecycle of a [`FrameCaptureSource`](crate::capture::FrameCaptureSource).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Bound to a target but not capturing yet.
    Idle,
    /// Frame pool and session are being created.
    Starting,
    /// Frames are being delivered.
    Running,
    /// Capture was stopped; `start()` may resume it.
    Stopped,
    /// The captured surface went away. Terminal.
    Closed,
}

impl CaptureState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle     => "idle",
            Self::Starting => "starting",
            Self::Running  => "running",
            Self::Stopped  => "stopped",
            Self::Closed   => "closed",
        }
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// MARK: - SharedHandle

/// Platform handle that lets another API or device open a GPU surface
/// without a CPU round-trip (a DXGI shared `HANDLE` on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedHandle(pub usize);

impl SharedHandle {
    pub fn as_raw(&self) -> usize {
        self.0
    }
}

// MARK: - PixelBuffer

/// Borrowed view of the CPU presenter's backing buffer.
///
/// Packed RGBA8, row-major, `width * 4` bytes per row. The borrow ends at the
/// next pull, which is the only point the presenter may rewrite the buffer.
#[derive(Debug, Clone, Copy)]
pub struct PixelBuffer<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> PixelBuffer<'a> {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn stride(&self) -> usize {
        self.width as usize * PixelFormat::Rgba8.bytes_per_pixel()
    }

    /// RGBA bytes of the pixel at (`x`, `y`).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * 4;
        let px = self.data.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

// MARK: - SurfaceDescriptor

/// Shared GPU surface handed to the host by the GPU presenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDescriptor {
    pub handle: SharedHandle,
    /// Physical allocation size.
    pub width: u32,
    pub height: u32,
    /// Region the host should display. Always equal to the physical size.
    pub visible_width: u32,
    pub visible_height: u32,
}

impl SurfaceDescriptor {
    pub fn new(handle: SharedHandle, size: Size) -> Self {
        Self {
            handle,
            width: size.width,
            height: size.height,
            visible_width: size.width,
            visible_height: size.height,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_union_is_per_dimension() {
        let a = Size::new(200, 100);
        let b = Size::new(100, 200);
        assert_eq!(a.union(b), Size::new(200, 200));
        assert_eq!(a.intersect(b), Size::new(100, 100));
        assert!(a.union(b).contains(a));
        assert!(!a.contains(b));
    }

    #[test]
    fn pixel_buffer_indexing() {
        let data = [
            1, 2, 3, 4, 5, 6, 7, 8,
            9, 10, 11, 12, 13, 14, 15, 16,
        ];
        let buf = PixelBuffer { data: &data, width: 2, height: 2 };
        assert_eq!(buf.pixel(1, 0), Some([5, 6, 7, 8]));
        assert_eq!(buf.pixel(0, 1), Some([9, 10, 11, 12]));
        assert_eq!(buf.pixel(2, 0), None);
    }
}
