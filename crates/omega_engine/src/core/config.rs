//! # Unified Configuration System
//!
//! Configuration structures for the engine core. The device manager derives
//! its presentation parameters from [`EngineConfig`]; replacing the config
//! on a live engine schedules a device reset for the next frame.
//!
//! ## Configuration Categories
//!
//! - **Engine Config**: adapter, display mode, multisampling, shader model override
//! - **Logging Config**: default log filter
//! - **Profiling Config**: frame-log defaults
//! - **Application Config**: file-level root grouping the above

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{Config, ConfigError};

/// Display resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    /// Create a new resolution
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

/// Programmable shader model levels, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShaderModel {
    /// Fixed-function pipeline only
    #[serde(rename = "fixed")]
    Fixed,
    /// Shader model 1.1
    #[serde(rename = "sm1_1")]
    Model11,
    /// Shader model 1.4
    #[serde(rename = "sm1_4")]
    Model14,
    /// Shader model 2.0
    #[serde(rename = "sm2_0")]
    Model20,
    /// Shader model 2.a
    #[serde(rename = "sm2_a")]
    Model2a,
    /// Shader model 2.b
    #[serde(rename = "sm2_b")]
    Model2b,
    /// Shader model 3.0
    #[serde(rename = "sm3_0")]
    Model30,
}

/// # Engine Configuration
///
/// Settings that shape the graphics device. Changing any of these at runtime
/// takes effect through a deferred device reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Index of the display adapter to create the device on
    pub adapter: u32,
    /// Exclusive fullscreen mode
    pub fullscreen: bool,
    /// Wait for vertical retrace on present
    pub vsync: bool,
    /// Multisample count; 0 or 1 disables antialiasing
    pub antialiasing: u32,
    /// Back buffer size used in fullscreen mode
    pub resolution: Resolution,
    /// Cap the shader model below what the hardware reports
    pub force_shader_model: Option<ShaderModel>,
    /// Use anisotropic texture filtering when available
    pub anisotropic_filtering: bool,
    /// Sleep between cooperative-level polls while the device is lost
    pub reset_poll_interval_ms: u64,
    /// Maximum number of polls before a lost device is reported as timed out
    pub reset_wait_limit: Option<u32>,
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self {
            adapter: 0,
            fullscreen: false,
            vsync: true,
            antialiasing: 0,
            resolution: Resolution::default(),
            force_shader_model: None,
            anisotropic_filtering: false,
            reset_poll_interval_ms: 100,
            reset_wait_limit: None,
        }
    }

    /// Set fullscreen mode
    pub fn with_fullscreen(mut self, fullscreen: bool) -> Self {
        self.fullscreen = fullscreen;
        self
    }

    /// Set vsync
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Set multisample count
    pub fn with_antialiasing(mut self, samples: u32) -> Self {
        self.antialiasing = samples;
        self
    }

    /// Set fullscreen resolution
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Resolution::new(width, height);
        self
    }

    /// Cap the shader model
    pub fn with_forced_shader_model(mut self, model: ShaderModel) -> Self {
        self.force_shader_model = Some(model);
        self
    }

    /// Enable anisotropic filtering
    pub fn with_anisotropic_filtering(mut self, enabled: bool) -> Self {
        self.anisotropic_filtering = enabled;
        self
    }

    /// Bound the lost-device wait loop
    pub fn with_reset_wait_limit(mut self, polls: u32) -> Self {
        self.reset_wait_limit = Some(polls);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "resolution must be non-zero, got {}x{}",
                self.resolution.width, self.resolution.height
            )));
        }

        if self.antialiasing > 16 {
            return Err(ConfigError::Invalid(format!(
                "antialiasing sample count {} exceeds 16",
                self.antialiasing
            )));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `env_logger` filter, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Frame-log defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingConfig {
    /// Directory frame logs are written to
    pub log_dir: PathBuf,
    /// Stall the GPU at every event boundary
    pub gpu_inclusive: bool,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            gpu_inclusive: false,
        }
    }
}

/// # Complete Application Configuration
///
/// Top-level configuration that encompasses all engine subsystems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Device and display settings
    pub engine: EngineConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Frame-log settings
    pub profiling: ProfilingConfig,
}

impl ApplicationConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()
    }
}

impl Config for ApplicationConfig {}

impl Config for EngineConfig {}
