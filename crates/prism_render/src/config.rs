//! Session configuration.

use std::path::Path;

use prism_gpu::{DeviceDescriptor, DeviceLimits};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::renderer::RendererKind;
use crate::state::RenderSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Everything a [`RenderSession`](crate::RenderSession) needs up front.
///
/// Every field has a default, so a JSON file only lists what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Accumulation stops once this many frames have been averaged
    pub max_iterations: i32,
    /// Submissions the device keeps in flight before retiring the oldest
    pub frames_in_flight: usize,
    /// Back-end active when the session starts
    pub renderer: RendererKind,
    /// Tolerance for camera-change detection; `None` compares bit for bit
    pub camera_epsilon: Option<f32>,
    /// Baseline that `reset_settings` restores
    pub defaults: RenderSettings,
    pub limits: DeviceLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            frames_in_flight: 2,
            renderer: RendererKind::PathTracer,
            camera_epsilon: None,
            defaults: RenderSettings::default(),
            limits: DeviceLimits::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded session config from {}", path.display());
        Ok(config)
    }

    pub fn device_descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            label: "prism".to_string(),
            limits: self.limits,
            frames_in_flight: self.frames_in_flight,
        }
    }
}
