use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::PixelFormat;

/// Camera capture configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub fps: u32,
    /// Pool depth; validated to 2-8 buffers.
    pub buffer_count: u32,
    pub source_id: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        // 1080p@30 NV12 with a 4-deep pool.
        Self {
            width: 1920,
            height: 1080,
            format: PixelFormat::Nv12,
            fps: 30,
            buffer_count: 4,
            source_id: 0,
        }
    }
}

impl CameraConfig {
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.format != PixelFormat::Unknown
            && self.fps > 0
            && (2..=8).contains(&self.buffer_count)
    }
}

/// Frame broker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Worker threads; 0 resolves to the hardware concurrency at start.
    pub worker_count: usize,
    /// Dispatch queue capacity; 0 drops every task.
    pub max_queue_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            max_queue_size: crate::broker::DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub camera: CameraConfig,
    pub broker: BrokerConfig,
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("parsing pipeline config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_camera_config_is_valid() {
        let config = CameraConfig::default();
        assert!(config.is_valid());
        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 1080);
        assert_eq!(config.format, PixelFormat::Nv12);
        assert_eq!(config.fps, 30);
        assert_eq!(config.buffer_count, 4);
    }

    #[test]
    fn camera_config_validation() {
        let mut config = CameraConfig::default();
        config.width = 0;
        assert!(!config.is_valid());

        let mut config = CameraConfig::default();
        config.format = PixelFormat::Unknown;
        assert!(!config.is_valid());

        let mut config = CameraConfig::default();
        config.fps = 0;
        assert!(!config.is_valid());

        let mut config = CameraConfig::default();
        config.buffer_count = 1;
        assert!(!config.is_valid());
        config.buffer_count = 9;
        assert!(!config.is_valid());
        config.buffer_count = 2;
        assert!(config.is_valid());
        config.buffer_count = 8;
        assert!(config.is_valid());
    }

    #[test]
    fn parses_partial_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [camera]
            width = 1280
            height = 720
            format = "yuyv"

            [broker]
            worker_count = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.camera.width, 1280);
        assert_eq!(config.camera.height, 720);
        assert_eq!(config.camera.format, PixelFormat::Yuyv);
        // Unspecified fields keep their defaults.
        assert_eq!(config.camera.fps, 30);
        assert_eq!(config.camera.buffer_count, 4);
        assert_eq!(config.broker.worker_count, 2);
        assert_eq!(
            config.broker.max_queue_size,
            crate::broker::DEFAULT_MAX_QUEUE_SIZE
        );
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert!(config.camera.is_valid());
        assert_eq!(config.broker.worker_count, 0);
    }

    #[test]
    fn rejects_unknown_format() {
        let result = PipelineConfig::from_toml_str("[camera]\nformat = \"webp\"\n");
        assert!(result.is_err());
    }
}
