//! surfacelink-host: exposes browser sessions to a host renderer as
//! pull-based external textures.
//!
//! ```text
//! host channel                 SurfaceLinkPlugin
//! ─────────────                ─────────────────────────────────────────
//! initializeEnvironment ─────► BrowserEnvironment (one per plugin)
//! initialize ────────────────► WebviewBridge { session, pipeline, events }
//!                                   │                │
//! per-instance calls ───────────────┘                ▼
//!                                          TextureRegistrar ◄── host pulls
//! dispose ───────────────────► stop pipeline, unregister texture
//! ```

pub mod browser;
pub mod config;
pub mod errors;
pub mod events;
pub mod headless;
pub mod method;
pub mod platform;
pub mod plugin;
pub mod registrar;
pub mod webview_bridge;

pub use browser::{BrowserEnvironment, BrowserEvent, BrowserSession, EnvironmentOptions, PermissionKind, PermissionState};
pub use config::HostConfig;
pub use errors::HostError;
pub use events::BridgeEvent;
pub use headless::{HeadlessBrowser, HeadlessEnvironment};
pub use method::{MethodCall, MethodError, MethodResult};
pub use platform::{CapturePlatform, SoftwarePlatform};
pub use plugin::SurfaceLinkPlugin;
pub use registrar::{ExternalTexture, TextureFrame, TextureRegistrar, TextureTable};
pub use webview_bridge::WebviewBridge;
