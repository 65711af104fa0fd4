//! Renderer configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Camera defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub near: f32,
    pub far: f32,
    /// Initial horizontal extent of the visible region.
    pub bounds: f32,
    pub min_bounds: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            near: 0.1,
            far: 1000.0,
            bounds: 2.0,
            min_bounds: 0.1,
            zoom_speed: 5.0,
            pan_speed: 10.0,
        }
    }
}

/// Compute output settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Local workgroup size of the compute shader (both axes).
    pub workgroup_size: u32,
    /// Place the output in host-visible memory so results can be read back.
    pub host_readable: bool,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            width: 3200,
            height: 2400,
            workgroup_size: 32,
            host_readable: true,
        }
    }
}

/// Renderer configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Upper bound for every fence wait. `u64::MAX` waits indefinitely.
    pub fence_timeout_ns: u64,
    pub camera: CameraConfig,
    pub compute: ComputeConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fence_timeout_ns: u64::MAX,
            camera: CameraConfig::default(),
            compute: ComputeConfig::default(),
        }
    }
}

impl RenderConfig {
    /// Parse a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Load a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Set the fence wait timeout.
    #[must_use]
    pub fn with_fence_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }

    /// Set the compute output size.
    #[must_use]
    pub fn with_compute_size(mut self, width: u32, height: u32) -> Self {
        self.compute.width = width;
        self.compute.height = height;
        self
    }

    /// Set the initial camera bounds.
    #[must_use]
    pub fn with_camera_bounds(mut self, bounds: f32) -> Self {
        self.camera.bounds = bounds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(RenderConfig::from_toml_str("").unwrap(), RenderConfig::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = RenderConfig::from_toml_str(
            r#"
            fence_timeout_ns = 1000000000

            [compute]
            width = 640
            host_readable = false
            "#,
        )
        .unwrap();

        assert_eq!(config.fence_timeout_ns, 1_000_000_000);
        assert_eq!(config.compute.width, 640);
        assert_eq!(config.compute.height, 2400);
        assert!(!config.compute.host_readable);
        assert_eq!(config.camera, CameraConfig::default());
    }

    #[test]
    fn malformed_document_is_rejected() {
        assert!(matches!(
            RenderConfig::from_toml_str("compute = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = RenderConfig::load("/nonexistent/tessera.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tessera.toml"));
    }
}
