//! Demo host configuration: an optional JSON file plus `SURFACELINK_*`
//! environment overrides.
//!
//! ```json
//! {
//!   "pipeline": { "bufferCount": 2, "presenter": "gpuSurface" },
//!   "environment": { "userDataPath": "C:/Temp/surfacelink" },
//!   "startUrl": "https://example.com/",
//!   "width": 1280, "height": 720, "frames": 30
//! }
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use surfacelink_core::{PipelineConfig, PresenterKind, SurfaceLinkError};
use tracing::warn;

use crate::browser::EnvironmentOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub pipeline: PipelineConfig,
    pub environment: EnvironmentOptions,
    #[serde(alias = "startUrl")]
    pub start_url: String,
    pub width: u32,
    pub height: u32,
    /// Frames the demo renders and pulls before disposing.
    pub frames: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            environment: EnvironmentOptions::default(),
            start_url: "about:blank".into(),
            width: 800,
            height: 600,
            frames: 5,
        }
    }
}

impl HostConfig {
    pub fn from_json(json: &str) -> Result<Self, SurfaceLinkError> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| SurfaceLinkError::ConfigurationInvalid { reason: e.to_string() })?;
        cfg.pipeline.validate()?;
        Ok(cfg)
    }

    /// Apply `SURFACELINK_PRESENTER`, `SURFACELINK_BUFFER_COUNT`,
    /// `SURFACELINK_URL` and `SURFACELINK_USER_DATA_PATH`. Unparseable values
    /// are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SURFACELINK_PRESENTER") {
            match v.to_ascii_lowercase().as_str() {
                "pixel_buffer" | "pixelbuffer" | "cpu" => self.pipeline.presenter = PresenterKind::PixelBuffer,
                "gpu_surface" | "gpusurface" | "gpu" => self.pipeline.presenter = PresenterKind::GpuSurface,
                other => warn!("ignoring SURFACELINK_PRESENTER={other}"),
            }
        }
        if let Some(v) = lookup("SURFACELINK_BUFFER_COUNT") {
            match v.parse::<u32>() {
                Ok(n) => self.pipeline.buffer_count = n.clamp(1, 8),
                Err(_) => warn!("ignoring SURFACELINK_BUFFER_COUNT={v}"),
            }
        }
        if let Some(v) = lookup("SURFACELINK_URL") {
            self.start_url = v;
        }
        if let Some(v) = lookup("SURFACELINK_USER_DATA_PATH") {
            self.environment.user_data_path = Some(PathBuf::from(v));
        }
    }

    pub fn apply_process_env(&mut self) {
        self.apply_env_overrides(|name| std::env::var(name).ok().filter(|v| !v.is_empty()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = HostConfig::from_json(r#"{ "startUrl": "https://a.test/", "pipeline": { "presenter": "gpu" } }"#)
            .expect("valid config");
        assert_eq!(cfg.start_url, "https://a.test/");
        assert_eq!(cfg.pipeline.presenter, PresenterKind::GpuSurface);
        assert_eq!(cfg.pipeline.buffer_count, 2);
        assert_eq!((cfg.width, cfg.height, cfg.frames), (800, 600, 5));
    }

    #[test]
    fn invalid_pipeline_is_rejected() {
        assert!(HostConfig::from_json(r#"{ "pipeline": { "bufferCount": 0 } }"#).is_err());
        assert!(HostConfig::from_json("not json").is_err());
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("SURFACELINK_PRESENTER", "GPU_SURFACE"),
            ("SURFACELINK_BUFFER_COUNT", "32"),
            ("SURFACELINK_URL", "https://b.test/"),
            ("SURFACELINK_USER_DATA_PATH", "/var/tmp/profile"),
        ]
        .into_iter()
        .collect();

        let mut cfg = HostConfig::default();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.pipeline.presenter, PresenterKind::GpuSurface);
        assert_eq!(cfg.pipeline.buffer_count, 8);
        assert_eq!(cfg.start_url, "https://b.test/");
        assert_eq!(cfg.environment.user_data_path.as_deref(), Some(Path::new("/var/tmp/profile")));
    }

    #[test]
    fn bad_env_values_are_ignored() {
        let mut cfg = HostConfig::default();
        cfg.apply_env_overrides(|k| match k {
            "SURFACELINK_PRESENTER" => Some("metal".into()),
            "SURFACELINK_BUFFER_COUNT" => Some("two".into()),
            _ => None,
        });
        assert_eq!(cfg, HostConfig::default());
    }
}
