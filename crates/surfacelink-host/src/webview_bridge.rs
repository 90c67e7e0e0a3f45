//! Per-instance bridge: one browser session, one capture pipeline, one host
//! texture and one event stream.
//!
//! ```text
//! host ──method call──► WebviewBridge ──► BrowserSession
//!                            │                 │ events
//!                            ▼                 ▼
//!                       Pipeline ◄── resize ── EventChannel ──► host listener
//!                            │ frame available
//!                            ▼
//!                     TextureRegistrar (host pulls)
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use surfacelink_core::capture::{FrameAvailableCallback, SurfaceSizeNotifier};
use surfacelink_core::{
    CaptureError, CaptureState, CaptureStats, CpuPresenter, GpuPresenter, PipelineConfig, PresenterKind,
    TextureBridge,
};
use tracing::{debug, info, warn};

use crate::browser::{BrowserEvent, BrowserSession};
use crate::errors::HostError;
use crate::events::{BridgeEvent, EventChannel};
use crate::method::{self, MethodCall, MethodError, MethodResult};
use crate::platform::{CapturePlatform, SessionOf};
use crate::registrar::{ExternalTexture, SharedTexture, TextureFrame, TextureRegistrar};

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// The texture bridge with the presenter picked at runtime.
pub(crate) enum Pipeline<P: CapturePlatform> {
    PixelBuffer(TextureBridge<P::Item, CpuPresenter<P::Device>>),
    GpuSurface(TextureBridge<P::Item, GpuPresenter<P::Device>>),
}

impl<P: CapturePlatform> Pipeline<P> {
    fn new(config: &PipelineConfig, device: Arc<P::Device>, item: P::Item) -> Self {
        match config.presenter {
            PresenterKind::PixelBuffer => Self::PixelBuffer(TextureBridge::pixel_buffer(device, item, config.buffer_count)),
            PresenterKind::GpuSurface => Self::GpuSurface(TextureBridge::gpu_surface(device, item, config.buffer_count)),
        }
    }

    fn start(&self) -> Result<(), CaptureError> {
        match self {
            Self::PixelBuffer(b) => b.start(),
            Self::GpuSurface(b) => b.start(),
        }
    }

    fn stop(&self) {
        match self {
            Self::PixelBuffer(b) => b.stop(),
            Self::GpuSurface(b) => b.stop(),
        }
    }

    fn state(&self) -> CaptureState {
        match self {
            Self::PixelBuffer(b) => b.state(),
            Self::GpuSurface(b) => b.state(),
        }
    }

    fn stats(&self) -> CaptureStats {
        match self {
            Self::PixelBuffer(b) => b.stats(),
            Self::GpuSurface(b) => b.stats(),
        }
    }

    fn size_notifier(&self) -> SurfaceSizeNotifier {
        match self {
            Self::PixelBuffer(b) => b.size_notifier(),
            Self::GpuSurface(b) => b.size_notifier(),
        }
    }

    fn set_on_frame_available(&self, callback: Option<FrameAvailableCallback>) {
        match self {
            Self::PixelBuffer(b) => b.set_on_frame_available(callback),
            Self::GpuSurface(b) => b.set_on_frame_available(callback),
        }
    }
}

impl<P: CapturePlatform> ExternalTexture for Pipeline<P> {
    fn pull(&mut self, width: u32, height: u32) -> Option<TextureFrame<'_>> {
        match self {
            Self::PixelBuffer(b) => b.copy_pixel_buffer(width, height).map(TextureFrame::PixelBuffer),
            Self::GpuSurface(b) => b.surface_descriptor(width, height).map(TextureFrame::GpuSurface),
        }
    }
}

// ── WebviewBridge ─────────────────────────────────────────────────────────────

pub struct WebviewBridge<P: CapturePlatform> {
    texture_id: i64,
    session: Arc<SessionOf<P>>,
    pipeline: Arc<Mutex<Pipeline<P>>>,
    registrar: Arc<dyn TextureRegistrar>,
    events: Arc<EventChannel>,
}

impl<P: CapturePlatform> WebviewBridge<P> {
    /// Bind `session` for capture, register its texture and start relaying
    /// its events. Frame delivery begins with the first `setSize`.
    pub fn new(
        platform: &P,
        device: Arc<P::Device>,
        session: SessionOf<P>,
        registrar: Arc<dyn TextureRegistrar>,
        config: &PipelineConfig,
    ) -> Result<Self, HostError> {
        let item = platform.capture_item(&device, &session)?;
        let pipeline = Pipeline::<P>::new(config, device, item);
        let notifier = pipeline.size_notifier();
        let pipeline = Arc::new(Mutex::new(pipeline));

        let texture: SharedTexture = pipeline.clone();
        let texture_id = registrar.register_texture(texture);
        let events = Arc::new(EventChannel::new());

        {
            let registrar = Arc::clone(&registrar);
            let events = Arc::clone(&events);
            lock(&pipeline).set_on_frame_available(Some(Arc::new(move || {
                registrar.mark_frame_available(texture_id);
                events.emit(BridgeEvent::FrameAvailable);
            })));
        }

        let session = Arc::new(session);
        {
            let events = Arc::clone(&events);
            session.set_event_handler(Arc::new(move |event: BrowserEvent| {
                if matches!(event, BrowserEvent::SurfaceSizeChanged { .. }) {
                    notifier.notify();
                }
                events.emit(event.into());
            }));
        }

        info!("instance {texture_id} created ({:?} presenter)", config.presenter);
        Ok(Self { texture_id, session, pipeline, registrar, events })
    }

    pub fn texture_id(&self) -> i64 {
        self.texture_id
    }

    pub fn session(&self) -> &Arc<SessionOf<P>> {
        &self.session
    }

    /// Subscribe to this instance's events, replacing any earlier listener.
    pub fn listen(&self) -> tokio::sync::mpsc::UnboundedReceiver<BridgeEvent> {
        self.events.listen()
    }

    pub fn state(&self) -> CaptureState {
        lock(&self.pipeline).state()
    }

    pub fn stats(&self) -> CaptureStats {
        lock(&self.pipeline).stats()
    }

    pub async fn handle_method_call(&self, call: &MethodCall) -> MethodResult {
        let args = &call.arguments;
        debug!("instance {} ← {}", self.texture_id, call.method);

        match call.method.as_str() {
            "setSize" => {
                let (width, height) = method::size(args)?;
                self.session.set_surface_size(width, height);
                if let Err(e) = lock(&self.pipeline).start() {
                    warn!("instance {}: frame delivery not started: {e}", self.texture_id);
                }
                Ok(Value::Null)
            }
            "loadUrl" => {
                self.session.load_url(method::string(args)?);
                Ok(Value::Null)
            }
            "loadStringContent" => {
                self.session.load_string_content(method::string(args)?);
                Ok(Value::Null)
            }
            "reload" => succeeded(self.session.reload()),
            "stop" => succeeded(self.session.stop()),
            "goBack" => succeeded(self.session.go_back()),
            "goForward" => succeeded(self.session.go_forward()),
            "executeScript" => {
                let script = method::string(args)?;
                if self.session.execute_script(script).await {
                    Ok(Value::Null)
                } else {
                    Err(MethodError::ScriptFailed("Executing script failed.".into()))
                }
            }
            "postWebMessage" => {
                if self.session.post_web_message(method::string(args)?) {
                    Ok(Value::Null)
                } else {
                    Err(MethodError::NotSupported("Posting the message failed.".into()))
                }
            }
            "setCursorPos" => {
                let (x, y) = method::point(args)?;
                self.session.set_cursor_pos(x, y);
                Ok(Value::Null)
            }
            "setScrollDelta" => {
                let (dx, dy) = method::point(args)?;
                self.session.set_scroll_delta(dx, dy);
                Ok(Value::Null)
            }
            "setPointerButton" => {
                let (button, is_down) = method::pointer_button(args)?;
                self.session.set_pointer_button(button, is_down);
                Ok(Value::Null)
            }
            "setUserAgent" => {
                if self.session.set_user_agent(method::string(args)?) {
                    Ok(Value::Null)
                } else {
                    Err(MethodError::NotSupported("Setting the user agent failed.".into()))
                }
            }
            "setBackgroundColor" => {
                if self.session.set_background_color(method::argb(args)?) {
                    Ok(Value::Null)
                } else {
                    Err(MethodError::NotSupported("Setting the background color failed.".into()))
                }
            }
            "resolvePermission" => {
                let (id, state) = method::permission_reply(args)?;
                succeeded(self.session.resolve_permission(id, state))
            }
            other => Err(MethodError::NotImplemented(other.to_string())),
        }
    }
}

fn succeeded(ok: bool) -> MethodResult {
    if ok {
        Ok(Value::Null)
    } else {
        Err(MethodError::MethodFailed)
    }
}

impl<P: CapturePlatform> Drop for WebviewBridge<P> {
    fn drop(&mut self) {
        {
            let pipeline = lock(&self.pipeline);
            pipeline.stop();
            // The callback holds the registrar, which holds the pipeline.
            pipeline.set_on_frame_available(None);
        }
        self.registrar.unregister_texture(self.texture_id);
        self.events.cancel();
        info!("instance {} disposed", self.texture_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::InputEvent;
    use crate::platform::SoftwarePlatform;
    use crate::browser::{BrowserEnvironment, PermissionKind, PermissionState, PointerButton};
    use crate::registrar::TextureTable;
    use serde_json::json;

    async fn bridge(
        presenter: PresenterKind,
    ) -> (Arc<TextureTable>, WebviewBridge<SoftwarePlatform>) {
        let platform = SoftwarePlatform::new();
        let env = platform.create_environment(Default::default()).await.expect("environment");
        let session = env.create_session().await.expect("session");
        let table = Arc::new(TextureTable::new());
        let config = PipelineConfig { presenter, ..PipelineConfig::default() };
        let device = platform.create_device().expect("device");
        let bridge = WebviewBridge::new(&platform, device, session, table.clone(), &config).expect("bridge");
        (table, bridge)
    }

    fn call(method: &str, arguments: Value) -> MethodCall {
        MethodCall::new(method, arguments)
    }

    #[tokio::test]
    async fn set_size_starts_delivery_and_frames_reach_the_texture() {
        let (table, bridge) = bridge(PresenterKind::PixelBuffer).await;
        let id = bridge.texture_id();
        assert_eq!(bridge.state(), CaptureState::Idle);

        bridge.handle_method_call(&call("setSize", json!([64, 32]))).await.unwrap();
        assert_eq!(bridge.state(), CaptureState::Running);
        assert!(table.with_frame(id, 64, 32, |f| f.is_none()).unwrap());

        bridge.handle_method_call(&call("setBackgroundColor", json!(0xFF10_2030u32))).await.unwrap();
        assert!(table.take_dirty(id));

        let pixel = table.with_frame(id, 64, 32, |frame| match frame {
            Some(TextureFrame::PixelBuffer(buf)) => {
                assert_eq!((buf.width, buf.height), (64, 32));
                buf.pixel(63, 31)
            }
            _ => None,
        });
        assert_eq!(pixel, Some(Some([0x10, 0x20, 0x30, 0xFF])));
    }

    #[tokio::test]
    async fn resize_recreates_the_pool_once() {
        let (table, bridge) = bridge(PresenterKind::PixelBuffer).await;
        let id = bridge.texture_id();
        bridge.handle_method_call(&call("setSize", json!([100, 100]))).await.unwrap();
        bridge.handle_method_call(&call("loadUrl", json!("https://a.test/"))).await.unwrap();

        bridge.handle_method_call(&call("setSize", json!([200, 150]))).await.unwrap();
        assert!(bridge.session().render_frame());
        assert_eq!(bridge.stats().pool_recreations, 1);

        let size = table.with_frame(id, 200, 150, |f| match f {
            Some(TextureFrame::PixelBuffer(buf)) => Some(buf.size()),
            _ => None,
        });
        assert_eq!(size, Some(Some(surfacelink_core::Size::new(200, 150))));
    }

    #[tokio::test]
    async fn gpu_presenter_hands_out_descriptors() {
        let (table, bridge) = bridge(PresenterKind::GpuSurface).await;
        let id = bridge.texture_id();
        bridge.handle_method_call(&call("setSize", json!([40, 30]))).await.unwrap();
        bridge.session().render_frame();

        let desc = table.with_frame(id, 40, 30, |f| match f {
            Some(TextureFrame::GpuSurface(d)) => Some(d),
            _ => None,
        });
        let desc = desc.flatten().expect("descriptor");
        assert_eq!((desc.width, desc.height, desc.visible_width, desc.visible_height), (40, 30, 40, 30));
    }

    #[tokio::test]
    async fn events_are_relayed_with_host_names() {
        let (_table, bridge) = bridge(PresenterKind::PixelBuffer).await;
        let mut rx = bridge.listen();

        bridge.handle_method_call(&call("setSize", json!([8, 8]))).await.unwrap();
        bridge.handle_method_call(&call("setCursorPos", json!([1, 1]))).await.unwrap();
        bridge.handle_method_call(&call("loadUrl", json!("https://a.test/"))).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen[0], BridgeEvent::SurfaceSizeChanged { width: 8, height: 8 });
        assert_eq!(seen[1], BridgeEvent::CursorChanged("basic"));
        assert!(seen.contains(&BridgeEvent::UrlChanged("https://a.test/".into())));
        assert!(seen.contains(&BridgeEvent::TitleChanged("https://a.test/".into())));
        assert_eq!(seen.last(), Some(&BridgeEvent::FrameAvailable));
    }

    #[tokio::test]
    async fn malformed_arguments_are_rejected() {
        let (_table, bridge) = bridge(PresenterKind::PixelBuffer).await;
        for (method, args) in [
            ("setSize", json!("big")),
            ("loadUrl", json!(42)),
            ("setCursorPos", json!([1])),
            ("setPointerButton", json!({"button": 1})),
            ("executeScript", Value::Null),
            ("setBackgroundColor", json!("red")),
        ] {
            assert_eq!(
                bridge.handle_method_call(&call(method, args)).await,
                Err(MethodError::InvalidArguments),
                "{method}"
            );
        }
        assert_eq!(bridge.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn session_failures_map_to_error_codes() {
        let (_table, bridge) = bridge(PresenterKind::PixelBuffer).await;

        let err = bridge.handle_method_call(&call("goBack", Value::Null)).await.unwrap_err();
        assert_eq!(err.code(), "method_failed");
        let err = bridge.handle_method_call(&call("executeScript", json!("1"))).await.unwrap_err();
        assert_eq!(err.code(), "script_failed");
        let err = bridge.handle_method_call(&call("postWebMessage", json!("hi"))).await.unwrap_err();
        assert_eq!(err.code(), "not_supported");
        let err = bridge.handle_method_call(&call("setBackgroundColor", json!(0x7F00_0000))).await.unwrap_err();
        assert_eq!(err.code(), "not_supported");
        let err = bridge.handle_method_call(&call("openDevTools", Value::Null)).await.unwrap_err();
        assert_eq!(err, MethodError::NotImplemented("openDevTools".into()));

        assert!(bridge.handle_method_call(&call("stop", Value::Null)).await.is_ok());
        assert!(bridge.handle_method_call(&call("setUserAgent", json!("agent/1.0"))).await.is_ok());
        assert_eq!(bridge.session().user_agent().as_deref(), Some("agent/1.0"));
    }

    #[tokio::test]
    async fn permission_requests_round_trip_through_the_host() {
        let (_table, bridge) = bridge(PresenterKind::PixelBuffer).await;
        let mut rx = bridge.listen();
        bridge.handle_method_call(&call("loadUrl", json!("https://mic.test/"))).await.unwrap();

        let id = bridge.session().request_permission(PermissionKind::Microphone, true);
        let mut requested = None;
        while let Ok(event) = rx.try_recv() {
            if let BridgeEvent::PermissionRequested { .. } = event {
                requested = Some(event);
            }
        }
        assert_eq!(
            requested,
            Some(BridgeEvent::PermissionRequested {
                id,
                url: "https://mic.test/".into(),
                permission_kind: 1,
                is_user_initiated: true,
            })
        );

        bridge.handle_method_call(&call("resolvePermission", json!({ "id": id, "allow": true }))).await.unwrap();
        assert_eq!(bridge.session().permission_decision(id), Some(PermissionState::Allow));

        let err = bridge.handle_method_call(&call("resolvePermission", json!({ "id": id }))).await.unwrap_err();
        assert_eq!(err, MethodError::MethodFailed);
    }

    #[tokio::test]
    async fn input_is_forwarded() {
        let (_table, bridge) = bridge(PresenterKind::PixelBuffer).await;
        bridge.handle_method_call(&call("setPointerButton", json!({"button": 2, "isDown": false}))).await.unwrap();
        bridge.handle_method_call(&call("setScrollDelta", json!([0.0, 3.5]))).await.unwrap();
        assert_eq!(
            bridge.session().inputs(),
            vec![
                InputEvent::Button { button: PointerButton::Secondary, is_down: false },
                InputEvent::Scroll { dx: 0.0, dy: 3.5 },
            ]
        );
    }

    #[tokio::test]
    async fn closed_surface_yields_nothing() {
        let (table, bridge) = bridge(PresenterKind::PixelBuffer).await;
        let id = bridge.texture_id();
        bridge.handle_method_call(&call("setSize", json!([16, 16]))).await.unwrap();
        bridge.session().render_frame();
        assert!(table.with_frame(id, 16, 16, |f| f.is_some()).unwrap());

        bridge.session().close();
        assert_eq!(bridge.state(), CaptureState::Closed);
        assert!(table.with_frame(id, 16, 16, |f| f.is_none()).unwrap());

        // setSize after close still succeeds; delivery stays off.
        assert!(bridge.handle_method_call(&call("setSize", json!([32, 32]))).await.is_ok());
        assert_eq!(bridge.state(), CaptureState::Closed);
    }

    #[tokio::test]
    async fn dropping_unregisters_the_texture() {
        let (table, bridge) = bridge(PresenterKind::PixelBuffer).await;
        let id = bridge.texture_id();
        bridge.handle_method_call(&call("setSize", json!([4, 4]))).await.unwrap();
        let session = Arc::clone(bridge.session());
        drop(bridge);

        assert!(!table.contains(id));
        assert!(!session.render_frame());
    }
}
