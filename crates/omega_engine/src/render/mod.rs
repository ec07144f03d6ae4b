//! # Rendering System
//!
//! Device lifecycle, render-state caching and the per-frame pipeline.
//!
//! ## Architecture
//!
//! - **api**: traits the backend implements (device, factory, capabilities)
//! - **state**: set-if-changed cache in front of every pipeline switch
//! - **device_manager**: owns the device and runs the reset state machine
//! - **reset_queue**: deferred per-frame resets of dependents
//! - **shader_cache**: terrain shader variants indexed by texture mask
//! - **view**: scene views and the context they render with
//! - **frame**: frame timing, FPS smoothing and tweens
//! - **backends**: concrete devices (headless)
//!
//! All of it is single-threaded. The only suspension point is the lost-device
//! wait loop, which yields to the host through [`window::RenderWindow`].

pub mod api;
pub mod state;
pub mod device_manager;
pub mod reset_queue;
pub mod shader_cache;
pub mod view;
pub mod window;
pub mod frame;

/// Graphics backend implementations
pub mod backends;

pub use api::{
    Capabilities, CooperativeLevel, DeviceError, DeviceFactory, DeviceResult, GraphicsDevice,
    PresentParameters, ShaderHandle, VertexProcessing,
};
pub use device_manager::{DeviceManager, DeviceState};
pub use reset_queue::{ResetQueue, Resettable};
pub use shader_cache::{TerrainShaderCache, TextureMask};
pub use state::{AlphaBlend, CullMode, FillMode, RenderStateCache, ZBufferMode};
pub use view::{RenderContext, View};
pub use window::{HeadlessWindow, RenderWindow, ScreenRect};

use thiserror::Error;

/// Rendering errors
#[derive(Error, Debug)]
pub enum RenderError {
    /// A device call failed
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// A draw or present call rejected its input
    ///
    /// Kept apart from [`RenderError::Device`] so content bugs are not
    /// mistaken for driver or hardware trouble.
    #[error("Invalid render data: {source}")]
    InvalidData {
        /// The device error that reported the bad data
        source: DeviceError,
    },

    /// The device ended up in a state it cannot be reset from
    #[error("Unrecoverable driver failure, cooperative level {0:?}")]
    DriverFailure(CooperativeLevel),

    /// The lost device did not become resettable within the configured bound
    #[error("Device still lost after {attempts} polls")]
    ResetTimedOut {
        /// Number of polls made
        attempts: u32,
    },

    /// No vertex-processing tier produced a device
    #[error("Device creation failed: {0}")]
    DeviceCreationFailed(String),

    /// The engine was already disposed
    #[error("Engine has been disposed")]
    Disposed,

    /// Writing a frame log failed
    #[error("Frame log I/O error: {0}")]
    FrameLog(#[from] std::io::Error),

    /// Encoding or writing a screenshot failed
    #[error("Screenshot failed: {0}")]
    Screenshot(String),
}

impl RenderError {
    /// Whether this is a transient device loss the next frame will handle
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            Self::Device(DeviceError::DeviceLost | DeviceError::DeviceNotReset)
        )
    }
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
