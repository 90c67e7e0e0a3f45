use serde::{Deserialize, Serialize};

use crate::errors::SurfaceLinkError;

/// Which artifact the host consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenterKind {
    /// RGBA8 pixel buffer copied through a CPU staging texture.
    #[default]
    #[serde(alias = "pixelBuffer", alias = "cpu")]
    PixelBuffer,
    /// Shared GPU surface, no CPU round-trip.
    #[serde(alias = "gpuSurface", alias = "gpu")]
    GpuSurface,
}

/// Frame-delivery pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Buffers in the capture frame pool.
    #[serde(alias = "bufferCount")]
    pub buffer_count: u32,
    pub presenter: PresenterKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_count: 2,
            presenter: PresenterKind::PixelBuffer,
        }
    }
}

impl PipelineConfig {
    /// Shared GPU surface presentation with the default pool depth.
    pub fn gpu_surface() -> Self {
        Self {
            presenter: PresenterKind::GpuSurface,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), SurfaceLinkError> {
        if !(1..=8).contains(&self.buffer_count) {
            return Err(SurfaceLinkError::ConfigurationInvalid {
                reason: format!("buffer_count must be within 1..=8, got {}", self.buffer_count),
            });
        }
        Ok(())
    }

    /// Parse from JSON, applying defaults for missing fields.
    pub fn from_json(json: &str) -> Result<Self, SurfaceLinkError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| SurfaceLinkError::ConfigurationInvalid {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::{PipelineConfig, PresenterKind};

    #[test]
    fn deserializes_camel_case_fields() {
        let json = r#"{ "bufferCount": 3, "presenter": "gpuSurface" }"#;

        let cfg = PipelineConfig::from_json(json).expect("valid camelCase config");
        assert_eq!(cfg.buffer_count, 3);
        assert_eq!(cfg.presenter, PresenterKind::GpuSurface);
    }

    #[test]
    fn deserializes_snake_case_fields() {
        let json = r#"{ "buffer_count": 1, "presenter": "pixel_buffer" }"#;

        let cfg = PipelineConfig::from_json(json).expect("valid snake_case config");
        assert_eq!(cfg.buffer_count, 1);
        assert_eq!(cfg.presenter, PresenterKind::PixelBuffer);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg = PipelineConfig::from_json("{}").expect("empty config");
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn rejects_zero_buffers() {
        assert!(PipelineConfig::from_json(r#"{ "bufferCount": 0 }"#).is_err());
    }
}
