//! Capture platforms: which GPU device, capture item and browser environment
//! a plugin instance is built from.
//!
//! | Platform | Device | Capture item | Browser |
//! |----------|--------|--------------|---------|
//! | [`SoftwarePlatform`] | `SoftwareDevice` | `SoftwareCaptureItem` | [`HeadlessEnvironment`] |
//! | `WindowsPlatform` | `D3d11Context` | `WgcCaptureItem` | any environment whose sessions expose a composition visual |

use std::sync::Arc;

use async_trait::async_trait;
use surfacelink_core::capture::CaptureItem;
use surfacelink_core::gpu::GpuDevice;
use surfacelink_core::soft::{SoftwareCaptureItem, SoftwareDevice};
use surfacelink_core::{CaptureError, GpuError};

use crate::browser::{BrowserEnvironment, EnvironmentOptions};
use crate::errors::HostError;
use crate::headless::HeadlessEnvironment;

pub type SessionOf<P> = <<P as CapturePlatform>::Environment as BrowserEnvironment>::Session;

#[async_trait]
pub trait CapturePlatform: Send + Sync + 'static {
    type Device: GpuDevice;
    type Item: CaptureItem<Frame = <Self::Device as GpuDevice>::Texture>;
    type Environment: BrowserEnvironment;

    fn name(&self) -> &'static str;

    fn is_capture_supported(&self) -> bool;

    fn create_device(&self) -> Result<Arc<Self::Device>, GpuError>;

    async fn create_environment(&self, options: EnvironmentOptions) -> Result<Self::Environment, HostError>;

    /// Bind the session's rendered surface for capture.
    fn capture_item(&self, device: &Arc<Self::Device>, session: &SessionOf<Self>) -> Result<Self::Item, CaptureError>;
}

// MARK: - SoftwarePlatform

/// Everything in-process: headless browser sessions captured through the
/// software backend.
#[derive(Default)]
pub struct SoftwarePlatform {
    device: Arc<SoftwareDevice>,
}

impl SoftwarePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self) -> &Arc<SoftwareDevice> {
        &self.device
    }
}

#[async_trait]
impl CapturePlatform for SoftwarePlatform {
    type Device = SoftwareDevice;
    type Item = SoftwareCaptureItem;
    type Environment = HeadlessEnvironment;

    fn name(&self) -> &'static str {
        "software"
    }

    fn is_capture_supported(&self) -> bool {
        true
    }

    fn create_device(&self) -> Result<Arc<SoftwareDevice>, GpuError> {
        Ok(Arc::clone(&self.device))
    }

    async fn create_environment(&self, options: EnvironmentOptions) -> Result<HeadlessEnvironment, HostError> {
        HeadlessEnvironment::new(Arc::clone(&self.device), options)
    }

    fn capture_item(
        &self,
        _device: &Arc<SoftwareDevice>,
        session: &SessionOf<Self>,
    ) -> Result<SoftwareCaptureItem, CaptureError> {
        SoftwareCaptureItem::from_visual(session.visual())
    }
}

// MARK: - WindowsPlatform

#[cfg(target_os = "windows")]
pub use windows_platform::{CompositionSurface, EnvironmentFactory, WindowsPlatform};

#[cfg(target_os = "windows")]
mod windows_platform {
    use super::*;
    use surfacelink_capture_windows::{D3d11Context, WgcCaptureItem};
    use windows::UI::Composition::Visual;

    /// A browser session that renders into a `Windows.UI.Composition` visual.
    pub trait CompositionSurface {
        fn visual(&self) -> windows::core::Result<Visual>;
    }

    /// Creates the browser environment for [`WindowsPlatform`].
    #[async_trait]
    pub trait EnvironmentFactory: Send + Sync + 'static {
        type Environment: BrowserEnvironment;

        async fn create(&self, options: EnvironmentOptions) -> Result<Self::Environment, HostError>;
    }

    /// Windows.Graphics.Capture over a hardware D3D11 device.
    pub struct WindowsPlatform<F> {
        factory: F,
    }

    impl<F> WindowsPlatform<F> {
        pub fn new(factory: F) -> Self {
            Self { factory }
        }
    }

    #[async_trait]
    impl<F> CapturePlatform for WindowsPlatform<F>
    where
        F: EnvironmentFactory,
        <F::Environment as BrowserEnvironment>::Session: CompositionSurface,
    {
        type Device = D3d11Context;
        type Item = WgcCaptureItem;
        type Environment = F::Environment;

        fn name(&self) -> &'static str {
            "windows-graphics-capture"
        }

        fn is_capture_supported(&self) -> bool {
            surfacelink_capture_windows::is_capture_supported()
        }

        fn create_device(&self) -> Result<Arc<D3d11Context>, GpuError> {
            D3d11Context::create()
        }

        async fn create_environment(&self, options: EnvironmentOptions) -> Result<F::Environment, HostError> {
            self.factory.create(options).await
        }

        fn capture_item(
            &self,
            device: &Arc<D3d11Context>,
            session: &SessionOf<Self>,
        ) -> Result<WgcCaptureItem, CaptureError> {
            let visual = session
                .visual()
                .map_err(|e| CaptureError::ItemCreation { reason: format!("session visual: {e}") })?;
            WgcCaptureItem::from_visual(Arc::clone(device), &visual)
        }
    }
}
