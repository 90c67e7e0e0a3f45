//! Windows.Graphics.Capture capture item, frame pool and session.
//!
//! Requires Windows 10 1903+ for `GraphicsCaptureItem::CreateFromVisual`.
//!
//! # Threading model
//!
//! The frame pool is free-threaded: `FrameArrived` fires on a thread-pool
//! thread and calls straight into the capture source's handler. `Closed`
//! fires on an arbitrary thread.

use std::sync::{Arc, Mutex, PoisonError};

use surfacelink_core::capture::{CaptureItem, CaptureStream, ClosedHandler, FrameArrivedHandler, FramePool};
use surfacelink_core::{CaptureError, Size};
use windows::{
    core::{IInspectable, Interface},
    Foundation::TypedEventHandler,
    Graphics::{
        Capture::{Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession},
        DirectX::{Direct3D11::IDirect3DDevice, DirectXPixelFormat},
        SizeInt32,
    },
    UI::Composition::Visual,
    Win32::{Graphics::Direct3D11::ID3D11Texture2D, System::WinRT::Direct3D11::IDirect3DDxgiInterfaceAccess},
};

use crate::graphics::{D3d11Context, D3d11Texture};

const PIXEL_FORMAT: DirectXPixelFormat = DirectXPixelFormat::B8G8R8A8UIntNormalized;

/// Removes one event registration.
type Revoke = Box<dyn FnOnce() + Send>;

fn size_int32(size: Size) -> SizeInt32 {
    SizeInt32 { Width: size.width as i32, Height: size.height as i32 }
}

/// Whether Windows.Graphics.Capture is available on this system.
pub fn is_capture_supported() -> bool {
    match GraphicsCaptureSession::IsSupported() {
        Ok(supported) => supported,
        Err(e) => {
            tracing::warn!("GraphicsCaptureSession::IsSupported failed: {e}");
            false
        }
    }
}

// ── WgcFramePool ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct WgcFramePool {
    pool: Direct3D11CaptureFramePool,
    device: IDirect3DDevice,
}

// SAFETY: both are agile WinRT objects; the pool was created free-threaded.
unsafe impl Send for WgcFramePool {}
unsafe impl Sync for WgcFramePool {}

impl FramePool for WgcFramePool {
    type Frame = D3d11Texture;

    fn try_get_next_frame(&self) -> Option<D3d11Texture> {
        let frame = self.pool.TryGetNextFrame().ok()?;
        let texture = frame
            .Surface()
            .and_then(|surface| surface.cast::<IDirect3DDxgiInterfaceAccess>())
            .and_then(|access| unsafe { access.GetInterface::<ID3D11Texture2D>() });
        match texture {
            Ok(texture) => Some(D3d11Texture::from_frame(texture, frame)),
            Err(e) => {
                tracing::debug!("frame surface unavailable: {e}");
                let _ = frame.Close();
                None
            }
        }
    }

    fn recreate(&self, size: Size, buffer_count: u32) -> Result<(), CaptureError> {
        if size.is_empty() {
            return Err(CaptureError::FramePool { reason: format!("invalid pool size {size}") });
        }
        self.pool
            .Recreate(&self.device, PIXEL_FORMAT, buffer_count as i32, size_int32(size))
            .map_err(|e| CaptureError::FramePool { reason: format!("Recreate: {e}") })
    }
}

// ── WgcCaptureStream ───────────────────────────────────────────────────────────

pub struct WgcCaptureStream {
    pool: Direct3D11CaptureFramePool,
    session: GraphicsCaptureSession,
    frame_arrived: Option<Revoke>,
}

// SAFETY: agile WinRT objects.
unsafe impl Send for WgcCaptureStream {}

impl CaptureStream for WgcCaptureStream {
    fn close(&mut self) {
        let Some(revoke) = self.frame_arrived.take() else {
            return;
        };
        revoke();
        let _ = self.session.Close();
        let _ = self.pool.Close();
        tracing::debug!("WGC session closed");
    }
}

impl Drop for WgcCaptureStream {
    fn drop(&mut self) {
        self.close();
    }
}

// ── WgcCaptureItem ─────────────────────────────────────────────────────────────

/// A composition visual bound for capture.
pub struct WgcCaptureItem {
    item: GraphicsCaptureItem,
    graphics: Arc<D3d11Context>,
    closed: Mutex<Vec<Revoke>>,
}

// SAFETY: GraphicsCaptureItem is agile.
unsafe impl Send for WgcCaptureItem {}
unsafe impl Sync for WgcCaptureItem {}

impl WgcCaptureItem {
    pub fn from_visual(graphics: Arc<D3d11Context>, visual: &Visual) -> Result<Self, CaptureError> {
        let item = GraphicsCaptureItem::CreateFromVisual(visual)
            .map_err(|e| CaptureError::ItemCreation { reason: format!("CreateFromVisual: {e}") })?;
        Ok(Self::from_item(graphics, item))
    }

    pub fn from_item(graphics: Arc<D3d11Context>, item: GraphicsCaptureItem) -> Self {
        Self { item, graphics, closed: Mutex::new(Vec::new()) }
    }
}

impl CaptureItem for WgcCaptureItem {
    type Frame = D3d11Texture;
    type Pool = WgcFramePool;
    type Stream = WgcCaptureStream;

    fn size(&self) -> Result<Size, CaptureError> {
        let size = self
            .item
            .Size()
            .map_err(|e| CaptureError::Session { reason: format!("GraphicsCaptureItem::Size: {e}") })?;
        Ok(Size::new(size.Width.max(0) as u32, size.Height.max(0) as u32))
    }

    fn set_closed_handler(&self, handler: ClosedHandler) -> Result<(), CaptureError> {
        let token = self
            .item
            .Closed(&TypedEventHandler::<GraphicsCaptureItem, IInspectable>::new(move |_, _| {
                handler();
                Ok(())
            }))
            .map_err(|e| CaptureError::Session { reason: format!("Closed registration: {e}") })?;
        let item = self.item.clone();
        self.closed.lock().unwrap_or_else(PoisonError::into_inner).push(Box::new(move || {
            let _ = item.RemoveClosed(token);
        }));
        Ok(())
    }

    fn start_capture(
        &self,
        size: Size,
        buffer_count: u32,
        on_frame: FrameArrivedHandler<WgcFramePool>,
    ) -> Result<WgcCaptureStream, CaptureError> {
        let graphics = Arc::clone(&self.graphics);
        let pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            graphics.winrt_device(),
            PIXEL_FORMAT,
            buffer_count as i32,
            size_int32(size),
        )
        .map_err(|e| CaptureError::FramePool { reason: format!("CreateFreeThreaded: {e}") })?;

        let session = pool
            .CreateCaptureSession(&self.item)
            .map_err(|e| CaptureError::Session { reason: format!("CreateCaptureSession: {e}") })?;
        // Disable the yellow capture border (Windows 11 22H2+; OK to ignore error)
        let _ = session.SetIsBorderRequired(false);

        let token = pool
            .FrameArrived(&TypedEventHandler::<Direct3D11CaptureFramePool, IInspectable>::new(
                move |sender, _| {
                    if let Some(pool) = sender {
                        let device = graphics.winrt_device().clone();
                        on_frame(&WgcFramePool { pool: pool.clone(), device });
                    }
                    Ok(())
                },
            ))
            .map_err(|e| CaptureError::Session { reason: format!("FrameArrived registration: {e}") })?;

        let revoke_pool = pool.clone();
        let revoke: Revoke = Box::new(move || {
            let _ = revoke_pool.RemoveFrameArrived(token);
        });
        let mut stream = WgcCaptureStream { pool, session, frame_arrived: Some(revoke) };
        if let Err(e) = stream.session.StartCapture() {
            stream.close();
            return Err(CaptureError::Session { reason: format!("StartCapture: {e}") });
        }
        tracing::info!("WGC capture session started at {size}");
        Ok(stream)
    }
}

impl Drop for WgcCaptureItem {
    fn drop(&mut self) {
        let revokes = std::mem::take(&mut *self.closed.lock().unwrap_or_else(PoisonError::into_inner));
        for revoke in revokes {
            revoke();
        }
    }
}
