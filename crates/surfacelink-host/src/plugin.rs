//! Plugin registry: one shared browser environment, one GPU device, and the
//! live instances keyed by their texture identifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use serde_json::{json, Value};
use surfacelink_core::PipelineConfig;
use tracing::{error, info};

use crate::browser::{BrowserEnvironment, EnvironmentOptions};
use crate::errors::HostError;
use crate::method::{self, MethodCall, MethodError, MethodResult};
use crate::platform::CapturePlatform;
use crate::registrar::TextureRegistrar;
use crate::webview_bridge::WebviewBridge;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SurfaceLinkPlugin<P: CapturePlatform> {
    platform: P,
    registrar: Arc<dyn TextureRegistrar>,
    config: PipelineConfig,
    /// Held across environment creation so concurrent calls create one.
    environment: tokio::sync::Mutex<Option<Arc<P::Environment>>>,
    device: Mutex<Option<Arc<P::Device>>>,
    instances: Mutex<HashMap<i64, Arc<WebviewBridge<P>>>>,
}

impl<P: CapturePlatform> SurfaceLinkPlugin<P> {
    pub fn new(platform: P, registrar: Arc<dyn TextureRegistrar>, config: PipelineConfig) -> Self {
        Self {
            platform,
            registrar,
            config,
            environment: tokio::sync::Mutex::new(None),
            device: Mutex::new(None),
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn instance(&self, texture_id: i64) -> Option<Arc<WebviewBridge<P>>> {
        lock(&self.instances).get(&texture_id).cloned()
    }

    pub fn instance_count(&self) -> usize {
        lock(&self.instances).len()
    }

    // MARK: - Plugin-level commands

    pub async fn handle_method_call(&self, call: &MethodCall) -> MethodResult {
        match call.method.as_str() {
            "initializeEnvironment" => {
                let options = environment_options(&call.arguments)?;
                self.initialize_environment(options).await?;
                Ok(Value::Null)
            }
            "initialize" => {
                let texture_id = self.create_instance().await?;
                Ok(json!({ "textureId": texture_id }))
            }
            "dispose" => {
                self.dispose(method::texture_id(&call.arguments)?)?;
                Ok(Value::Null)
            }
            other => Err(MethodError::NotImplemented(other.to_string())),
        }
    }

    /// Route a call to the instance that owns `texture_id`.
    pub async fn handle_instance_call(&self, texture_id: i64, call: &MethodCall) -> MethodResult {
        let instance = self.instance(texture_id).ok_or(MethodError::NoSuchInstance(texture_id))?;
        instance.handle_method_call(call).await
    }

    /// Create the shared browser environment. Only allowed once, and not
    /// after an instance has created a default one.
    pub async fn initialize_environment(&self, options: EnvironmentOptions) -> Result<(), MethodError> {
        let mut environment = self.environment.lock().await;
        if environment.is_some() {
            return Err(MethodError::AlreadyInitialized);
        }
        let created = self.platform.create_environment(options.with_defaults()).await?;
        *environment = Some(Arc::new(created));
        info!("browser environment initialized ({})", self.platform.name());
        Ok(())
    }

    async fn environment(&self) -> Result<Arc<P::Environment>, HostError> {
        let mut environment = self.environment.lock().await;
        if let Some(env) = environment.as_ref() {
            return Ok(Arc::clone(env));
        }
        info!("no browser environment yet, creating one with default options");
        let env = Arc::new(self.platform.create_environment(EnvironmentOptions::default().with_defaults()).await?);
        *environment = Some(Arc::clone(&env));
        Ok(env)
    }

    fn device(&self) -> Result<Arc<P::Device>, HostError> {
        let mut device = lock(&self.device);
        if let Some(d) = device.as_ref() {
            return Ok(Arc::clone(d));
        }
        let created = self.platform.create_device().map_err(|e| {
            error!("{} GPU device creation failed: {e}", self.platform.name());
            e
        })?;
        *device = Some(Arc::clone(&created));
        Ok(created)
    }

    /// Create a browser session, bind it to a capture pipeline and register
    /// its texture. Returns the texture identifier.
    pub async fn create_instance(&self) -> Result<i64, HostError> {
        if !self.platform.is_capture_supported() {
            error!("{} capture is not available", self.platform.name());
            return Err(HostError::CaptureUnsupported);
        }

        let environment = self.environment().await?;
        let device = self.device()?;
        let session = environment.create_session().await?;
        let bridge = WebviewBridge::new(&self.platform, device, session, Arc::clone(&self.registrar), &self.config)?;

        let texture_id = bridge.texture_id();
        lock(&self.instances).insert(texture_id, Arc::new(bridge));
        Ok(texture_id)
    }

    /// Tear down the instance for `texture_id`. Its texture is unregistered
    /// once the last outstanding handle to the instance is dropped.
    pub fn dispose(&self, texture_id: i64) -> Result<(), MethodError> {
        let removed = lock(&self.instances).remove(&texture_id);
        match removed {
            Some(_) => Ok(()),
            None => Err(MethodError::NoSuchInstance(texture_id)),
        }
    }
}

/// `null` or a map of environment options.
fn environment_options(args: &Value) -> Result<EnvironmentOptions, MethodError> {
    match args {
        Value::Null => Ok(EnvironmentOptions::default()),
        Value::Object(_) => EnvironmentOptions::deserialize(args).map_err(|_| MethodError::InvalidArguments),
        _ => Err(MethodError::InvalidArguments),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BridgeEvent;
    use crate::platform::SoftwarePlatform;
    use crate::registrar::{TextureFrame, TextureTable};
    use surfacelink_core::{CaptureState, PresenterKind, Size};

    fn plugin(presenter: PresenterKind) -> (Arc<TextureTable>, SurfaceLinkPlugin<SoftwarePlatform>) {
        let table = Arc::new(TextureTable::new());
        let config = PipelineConfig { presenter, ..PipelineConfig::default() };
        let plugin = SurfaceLinkPlugin::new(SoftwarePlatform::new(), table.clone(), config);
        (table, plugin)
    }

    fn call(method: &str, arguments: Value) -> MethodCall {
        MethodCall::new(method, arguments)
    }

    async fn initialize(plugin: &SurfaceLinkPlugin<SoftwarePlatform>) -> i64 {
        let reply = plugin.handle_method_call(&call("initialize", Value::Null)).await.expect("initialize");
        reply["textureId"].as_i64().expect("texture id")
    }

    #[tokio::test]
    async fn initialize_registers_a_texture_per_instance() {
        let (table, plugin) = plugin(PresenterKind::PixelBuffer);
        let a = initialize(&plugin).await;
        let b = initialize(&plugin).await;
        assert_ne!(a, b);
        assert!(table.contains(a) && table.contains(b));
        assert_eq!(plugin.instance_count(), 2);
    }

    #[tokio::test]
    async fn environment_can_only_be_initialized_once() {
        let (_table, plugin) = plugin(PresenterKind::PixelBuffer);
        let args = json!({ "userDataPath": "/tmp/surfacelink-test", "additionalArguments": "--mute-audio" });
        plugin.handle_method_call(&call("initializeEnvironment", args)).await.expect("first");

        let err = plugin.handle_method_call(&call("initializeEnvironment", Value::Null)).await.unwrap_err();
        assert_eq!(err.code(), "already_initialized");
    }

    #[tokio::test]
    async fn initialize_creates_a_default_environment() {
        let (_table, plugin) = plugin(PresenterKind::PixelBuffer);
        initialize(&plugin).await;
        let err = plugin.handle_method_call(&call("initializeEnvironment", json!({}))).await.unwrap_err();
        assert_eq!(err, MethodError::AlreadyInitialized);
    }

    #[tokio::test]
    async fn bad_environment_options_are_reported() {
        let (_table, plugin) = plugin(PresenterKind::PixelBuffer);
        let err = plugin.handle_method_call(&call("initializeEnvironment", json!([1, 2]))).await.unwrap_err();
        assert_eq!(err, MethodError::InvalidArguments);

        let missing = json!({ "browserExePath": "/definitely/not/here/msedge" });
        let err = plugin.handle_method_call(&call("initializeEnvironment", missing)).await.unwrap_err();
        assert_eq!(err.code(), "initialization_failed");

        // A failed attempt leaves the environment unset.
        assert!(plugin.handle_method_call(&call("initializeEnvironment", Value::Null)).await.is_ok());
    }

    #[tokio::test]
    async fn dispose_unregisters_and_rejects_unknown_ids() {
        let (table, plugin) = plugin(PresenterKind::PixelBuffer);
        let id = initialize(&plugin).await;

        plugin.handle_method_call(&call("dispose", json!(id))).await.expect("dispose");
        assert!(!table.contains(id));
        assert!(plugin.instance(id).is_none());

        let err = plugin.handle_method_call(&call("dispose", json!(id))).await.unwrap_err();
        assert_eq!(err, MethodError::NoSuchInstance(id));
        let err = plugin.handle_instance_call(id, &call("reload", Value::Null)).await.unwrap_err();
        assert_eq!(err.code(), "no_such_instance");
        let err = plugin.handle_method_call(&call("dispose", json!("one"))).await.unwrap_err();
        assert_eq!(err, MethodError::InvalidArguments);
    }

    /// Software platform with switchable capture support and device creation.
    struct LimitedPlatform {
        inner: SoftwarePlatform,
        capture_supported: bool,
        device_available: bool,
    }

    #[async_trait::async_trait]
    impl CapturePlatform for LimitedPlatform {
        type Device = <SoftwarePlatform as CapturePlatform>::Device;
        type Item = <SoftwarePlatform as CapturePlatform>::Item;
        type Environment = <SoftwarePlatform as CapturePlatform>::Environment;

        fn name(&self) -> &'static str {
            "limited"
        }

        fn is_capture_supported(&self) -> bool {
            self.capture_supported
        }

        fn create_device(&self) -> Result<Arc<Self::Device>, surfacelink_core::GpuError> {
            if !self.device_available {
                return Err(surfacelink_core::GpuError::DeviceUnavailable { reason: "adapter removed".into() });
            }
            self.inner.create_device()
        }

        async fn create_environment(&self, options: EnvironmentOptions) -> Result<Self::Environment, HostError> {
            self.inner.create_environment(options).await
        }

        fn capture_item(
            &self,
            device: &Arc<Self::Device>,
            session: &crate::platform::SessionOf<Self>,
        ) -> Result<Self::Item, surfacelink_core::CaptureError> {
            self.inner.capture_item(device, session)
        }
    }

    fn limited(
        capture_supported: bool,
        device_available: bool,
    ) -> (Arc<TextureTable>, SurfaceLinkPlugin<LimitedPlatform>) {
        let table = Arc::new(TextureTable::new());
        let platform = LimitedPlatform { inner: SoftwarePlatform::new(), capture_supported, device_available };
        let plugin = SurfaceLinkPlugin::new(platform, table.clone(), PipelineConfig::default());
        (table, plugin)
    }

    #[tokio::test]
    async fn unsupported_capture_fails_initialize() {
        let (table, plugin) = limited(false, true);
        let err = plugin.handle_method_call(&call("initialize", Value::Null)).await.unwrap_err();
        assert_eq!(err.code(), "initialization_failed");
        assert!(err.to_string().contains("not supported"));
        assert_eq!(plugin.instance_count(), 0);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn device_creation_failure_fails_initialize() {
        let (table, plugin) = limited(true, false);
        let err = plugin.handle_method_call(&call("initialize", Value::Null)).await.unwrap_err();
        assert_eq!(err.code(), "initialization_failed");
        assert!(err.to_string().contains("adapter removed"));
        assert_eq!(plugin.instance_count(), 0);
        assert!(table.is_empty());

        let (_table, plugin) = limited(true, true);
        assert!(plugin.handle_method_call(&call("initialize", Value::Null)).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_plugin_method_is_not_implemented() {
        let (_table, plugin) = plugin(PresenterKind::PixelBuffer);
        let err = plugin.handle_method_call(&call("getVersion", Value::Null)).await.unwrap_err();
        assert_eq!(err, MethodError::NotImplemented("getVersion".into()));
    }

    #[tokio::test]
    async fn end_to_end_through_the_plugin() {
        let (table, plugin) = plugin(PresenterKind::PixelBuffer);
        let id = initialize(&plugin).await;
        let instance = plugin.instance(id).expect("instance");
        let mut events = instance.listen();

        plugin.handle_instance_call(id, &call("setSize", json!([100, 100]))).await.unwrap();
        plugin.handle_instance_call(id, &call("setBackgroundColor", json!(0xFF00_80FFu32))).await.unwrap();
        assert!(table.take_dirty(id));

        let pixel = table.with_frame(id, 100, 100, |f| match f {
            Some(TextureFrame::PixelBuffer(buf)) => buf.pixel(50, 50),
            _ => None,
        });
        assert_eq!(pixel, Some(Some([0x00, 0x80, 0xFF, 0xFF])));

        plugin.handle_instance_call(id, &call("setSize", json!([200, 150]))).await.unwrap();
        assert!(instance.session().render_frame());
        assert_eq!(instance.stats().pool_recreations, 1);
        let size = table.with_frame(id, 200, 150, |f| match f {
            Some(TextureFrame::PixelBuffer(buf)) => Some(buf.size()),
            _ => None,
        });
        assert_eq!(size, Some(Some(Size::new(200, 150))));

        instance.session().close();
        assert_eq!(instance.state(), CaptureState::Closed);
        assert!(table.with_frame(id, 200, 150, |f| f.is_none()).unwrap());

        let mut frames = 0;
        while let Ok(event) = events.try_recv() {
            if event == BridgeEvent::FrameAvailable {
                frames += 1;
            }
        }
        assert_eq!(frames, 2);

        drop(instance);
        plugin.dispose(id).unwrap();
        assert!(table.is_empty());
    }
}
