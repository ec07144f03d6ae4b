//! # Core Engine Module
//!
//! Shared configuration types consumed by the engine, the device manager and
//! the profiling harness.

pub mod config;

pub use config::{
    ApplicationConfig,
    EngineConfig,
    LoggingConfig,
    ProfilingConfig,
    Resolution,
    ShaderModel,
};
pub use crate::config::{Config, ConfigError};
