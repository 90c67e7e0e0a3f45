//! SurfaceLink demo host.
//!
//! Drives the full plugin surface against the headless browser and the
//! software capture backend, acting as the host renderer:
//!
//! ```text
//! initializeEnvironment → initialize → setSize → loadUrl
//!        → render / pull × N → dispose
//! ```
//!
//! Usage: `surfacelink-demo [config.json]`. `SURFACELINK_PRESENTER`,
//! `SURFACELINK_BUFFER_COUNT`, `SURFACELINK_URL` and
//! `SURFACELINK_USER_DATA_PATH` override the file.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use surfacelink_host::{HostConfig, MethodCall, SoftwarePlatform, SurfaceLinkPlugin, TextureFrame, TextureTable};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("SurfaceLink demo v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading config {path}"))?;
            HostConfig::from_json(&text).with_context(|| format!("parsing config {path}"))?
        }
        None => HostConfig::default(),
    };
    config.apply_process_env();

    if surfacelink_capture_windows::is_capture_supported() {
        info!("Windows.Graphics.Capture is available on this system");
    } else {
        info!("Windows.Graphics.Capture unavailable, using the software backend");
    }

    let table = Arc::new(TextureTable::new());
    let plugin = SurfaceLinkPlugin::new(SoftwarePlatform::new(), table.clone(), config.pipeline.clone());

    // ── Plugin-level setup ─────────────────────────────────────────────────
    let options = serde_json::to_value(&config.environment).context("encoding environment options")?;
    call(&plugin, None, "initializeEnvironment", options).await?;
    let reply = call(&plugin, None, "initialize", json!(null)).await?;
    let texture_id = reply["textureId"].as_i64().ok_or_else(|| anyhow!("initialize returned no textureId"))?;
    info!("texture {texture_id} registered ({:?} presenter)", config.pipeline.presenter);

    let instance = plugin.instance(texture_id).ok_or_else(|| anyhow!("instance {texture_id} vanished"))?;
    let mut events = instance.listen();
    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!("event {}", event.to_json());
        }
    });

    // ── Per-instance commands ──────────────────────────────────────────────
    call(&plugin, Some(texture_id), "setSize", json!([config.width, config.height])).await?;
    call(&plugin, Some(texture_id), "loadUrl", json!(config.start_url)).await?;

    // ── Render / pull loop ─────────────────────────────────────────────────
    let mut pulled = 0u32;
    for n in 0..config.frames {
        if !instance.session().render_frame() {
            warn!("frame {n} was not captured");
            continue;
        }
        if !table.take_dirty(texture_id) {
            continue;
        }
        let described = table.with_frame(texture_id, config.width, config.height, |frame| match frame {
            Some(TextureFrame::PixelBuffer(buf)) => {
                Some(format!("pixel buffer {}x{} ({} bytes)", buf.width, buf.height, buf.data.len()))
            }
            Some(TextureFrame::GpuSurface(desc)) => {
                Some(format!("shared surface {:#x} {}", desc.handle.as_raw(), desc.size()))
            }
            None => None,
        });
        match described.flatten() {
            Some(text) => {
                pulled += 1;
                info!("frame {n}: {text}");
            }
            None => warn!("frame {n}: nothing to present"),
        }
    }

    let stats = instance.stats();
    info!(
        "{pulled}/{} frames presented, {} arrived, {} pool recreations",
        config.frames, stats.frames_arrived, stats.pool_recreations
    );

    drop(instance);
    call(&plugin, None, "dispose", json!(texture_id)).await?;
    logger.await.context("event logger task")?;
    info!("done");
    Ok(())
}

async fn call(
    plugin: &SurfaceLinkPlugin<SoftwarePlatform>,
    instance: Option<i64>,
    method: &str,
    arguments: serde_json::Value,
) -> Result<serde_json::Value> {
    let call = MethodCall::new(method, arguments);
    let result = match instance {
        Some(id) => plugin.handle_instance_call(id, &call).await,
        None => plugin.handle_method_call(&call).await,
    };
    result.map_err(|e| anyhow!("{method} failed: {}", e.to_json()))
}
