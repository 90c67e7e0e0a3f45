//! Direct3D 11 implementation of [`GpuDevice`].
//!
//! The immediate context is not thread-safe; every use goes through one
//! mutex. Presenters only run on the consumer thread, so it is uncontended
//! in practice.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use surfacelink_core::gpu::{CopyRegion, GpuDevice, MappedTexture, TextureUsage};
use surfacelink_core::{GpuError, SharedHandle, Size};
use windows::{
    core::Interface,
    Graphics::Capture::Direct3D11CaptureFrame,
    Graphics::DirectX::Direct3D11::IDirect3DDevice,
    Win32::{
        Foundation::HMODULE,
        Graphics::{
            Direct3D::D3D_DRIVER_TYPE_HARDWARE,
            Direct3D11::{
                D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
                D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_BOX, D3D11_CPU_ACCESS_READ,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_READ,
                D3D11_RESOURCE_MISC_SHARED, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC,
                D3D11_USAGE_DEFAULT, D3D11_USAGE_STAGING,
            },
            Dxgi::{
                Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC},
                IDXGIDevice, IDXGIResource,
            },
        },
        System::WinRT::{
            Direct3D11::CreateDirect3D11DeviceFromDXGIDevice, RoInitialize, RO_INIT_MULTITHREADED,
        },
    },
};

fn gpu_err(what: &str) -> impl Fn(windows::core::Error) -> GpuError + '_ {
    move |e| GpuError::DeviceUnavailable { reason: format!("{what}: {e}") }
}

// ── D3d11Texture ───────────────────────────────────────────────────────────────

/// A BGRA8 texture on the shared device. Captured frames also keep their
/// `Direct3D11CaptureFrame` alive, so the pool buffer is not recycled while
/// the frame is the latest one.
#[derive(Clone)]
pub struct D3d11Texture {
    texture: ID3D11Texture2D,
    _frame: Option<Direct3D11CaptureFrame>,
}

// SAFETY: the texture is created on a multithread-capable D3D11 device and
// only ever used through D3d11Context, which serializes the immediate
// context. Direct3D11CaptureFrame is an agile WinRT object.
unsafe impl Send for D3d11Texture {}
unsafe impl Sync for D3d11Texture {}

impl D3d11Texture {
    pub(crate) fn from_frame(texture: ID3D11Texture2D, frame: Direct3D11CaptureFrame) -> Self {
        Self { texture, _frame: Some(frame) }
    }

    pub fn raw(&self) -> &ID3D11Texture2D {
        &self.texture
    }

    fn desc(&self) -> D3D11_TEXTURE2D_DESC {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { self.texture.GetDesc(&mut desc) };
        desc
    }
}

// ── D3d11Context ───────────────────────────────────────────────────────────────

/// Hardware D3D11 device, its immediate context and the WinRT wrapper the
/// capture frame pool needs.
pub struct D3d11Context {
    device: ID3D11Device,
    context: Mutex<ID3D11DeviceContext>,
    winrt_device: IDirect3DDevice,
}

// SAFETY: ID3D11Device is free-threaded; the immediate context is only
// reached through the mutex; IDirect3DDevice is agile.
unsafe impl Send for D3d11Context {}
unsafe impl Sync for D3d11Context {}

impl D3d11Context {
    pub fn create() -> Result<Arc<Self>, GpuError> {
        // Initialise WinRT on this thread (no-op if already done)
        unsafe {
            let _ = RoInitialize(RO_INIT_MULTITHREADED);
        }

        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;
        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
            .map_err(gpu_err("D3D11CreateDevice"))?;
        }
        let (Some(device), Some(context)) = (device, context) else {
            return Err(GpuError::DeviceUnavailable { reason: "D3D11CreateDevice returned no device".into() });
        };

        let dxgi_device: IDXGIDevice = device.cast().map_err(gpu_err("cast IDXGIDevice"))?;
        let winrt_device: IDirect3DDevice = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device) }
            .and_then(|inspectable| inspectable.cast())
            .map_err(gpu_err("CreateDirect3D11DeviceFromDXGIDevice"))?;

        tracing::info!("D3D11 hardware device created");
        Ok(Arc::new(Self { device, context: Mutex::new(context), winrt_device }))
    }

    pub fn winrt_device(&self) -> &IDirect3DDevice {
        &self.winrt_device
    }

    fn context(&self) -> MutexGuard<'_, ID3D11DeviceContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// BGRA, single-mip description for a texture of the given usage.
fn texture_desc(size: Size, usage: TextureUsage) -> D3D11_TEXTURE2D_DESC {
    let (usage_flag, bind, cpu, misc) = match usage {
        TextureUsage::Staging => (D3D11_USAGE_STAGING, 0, D3D11_CPU_ACCESS_READ.0 as u32, 0),
        TextureUsage::Shared => (
            D3D11_USAGE_DEFAULT,
            (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
            0,
            D3D11_RESOURCE_MISC_SHARED.0 as u32,
        ),
    };
    D3D11_TEXTURE2D_DESC {
        Width: size.width,
        Height: size.height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Usage: usage_flag,
        BindFlags: bind,
        CPUAccessFlags: cpu,
        MiscFlags: misc,
    }
}

impl GpuDevice for D3d11Context {
    type Texture = D3d11Texture;

    fn texture_size(&self, texture: &D3d11Texture) -> Size {
        let desc = texture.desc();
        Size::new(desc.Width, desc.Height)
    }

    fn create_texture(&self, size: Size, usage: TextureUsage) -> Result<D3d11Texture, GpuError> {
        let desc = texture_desc(size, usage);
        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(&desc, None, Some(&mut texture)) }
            .map_err(|e| GpuError::TextureCreation { size, reason: e.to_string() })?;
        let texture = texture.ok_or_else(|| GpuError::TextureCreation {
            size,
            reason: "CreateTexture2D returned no texture".into(),
        })?;
        Ok(D3d11Texture { texture, _frame: None })
    }

    fn shared_handle(&self, texture: &D3d11Texture) -> Result<SharedHandle, GpuError> {
        let resource: IDXGIResource = texture
            .texture
            .cast()
            .map_err(|e| GpuError::SharedHandle { reason: format!("cast IDXGIResource: {e}") })?;
        let handle = unsafe { resource.GetSharedHandle() }
            .map_err(|e| GpuError::SharedHandle { reason: e.to_string() })?;
        Ok(SharedHandle(handle.0 as usize))
    }

    fn copy_texture(&self, dst: &D3d11Texture, src: &D3d11Texture, region: CopyRegion) {
        let ctx = self.context();
        match region {
            CopyRegion::Full => unsafe { ctx.CopyResource(&dst.texture, &src.texture) },
            CopyRegion::TopLeft(size) => {
                let source_box = D3D11_BOX {
                    left: 0,
                    top: 0,
                    front: 0,
                    right: size.width,
                    bottom: size.height,
                    back: 1,
                };
                unsafe {
                    ctx.CopySubresourceRegion(&dst.texture, 0, 0, 0, 0, &src.texture, 0, Some(&source_box))
                };
            }
        }
    }

    fn read_texture<R, F>(&self, texture: &D3d11Texture, read: F) -> Result<R, GpuError>
    where
        F: FnOnce(&MappedTexture<'_>) -> R,
    {
        let desc = texture.desc();
        let ctx = self.context();

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe { ctx.Map(&texture.texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
            .map_err(|e| GpuError::MapFailed { reason: e.to_string() })?;
        if mapped.pData.is_null() {
            unsafe { ctx.Unmap(&texture.texture, 0) };
            return Err(GpuError::MapFailed { reason: "null mapping".into() });
        }

        let row_pitch = mapped.RowPitch as usize;
        let len = match desc.Height {
            0 => 0,
            h => row_pitch * (h as usize - 1) + desc.Width as usize * 4,
        };
        // SAFETY: a mapped staging subresource spans RowPitch bytes for every
        // row but the last, which holds at least Width pixels.
        let data = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, len) };
        let result = read(&MappedTexture { data, row_pitch, size: Size::new(desc.Width, desc.Height) });

        unsafe { ctx.Unmap(&texture.texture, 0) };
        Ok(result)
    }

    fn flush(&self) {
        unsafe { self.context().Flush() };
    }
}
