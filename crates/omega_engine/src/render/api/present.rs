//! Presentation parameters
//!
//! Immutable snapshot of how the back buffer is set up. Rebuilt whenever the
//! engine configuration is replaced and consumed on device creation/reset.

use crate::core::config::EngineConfig;

/// How presents are synchronized with the display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentInterval {
    /// Present as soon as possible
    Immediate,
    /// Wait for one vertical retrace
    One,
}

/// Depth/stencil buffer layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthStencilFormat {
    /// 24-bit depth, 8-bit stencil
    D24S8,
    /// 16-bit depth, no stencil
    D16,
}

/// Back buffer and presentation setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentParameters {
    /// Back buffer width
    pub back_buffer_width: u32,
    /// Back buffer height
    pub back_buffer_height: u32,
    /// Windowed (not exclusive fullscreen)
    pub windowed: bool,
    /// Present synchronization
    pub interval: PresentInterval,
    /// Multisample count, 0 when disabled
    pub multisample: u32,
    /// Depth/stencil format
    pub depth_stencil: DepthStencilFormat,
}

impl PresentParameters {
    /// Derive parameters from the configuration
    ///
    /// Fullscreen uses the configured resolution; windowed mode follows the
    /// size of the host's render area.
    pub fn from_config(config: &EngineConfig, render_area: (u32, u32)) -> Self {
        let (back_buffer_width, back_buffer_height) = if config.fullscreen {
            (config.resolution.width, config.resolution.height)
        } else {
            (render_area.0.max(1), render_area.1.max(1))
        };

        Self {
            back_buffer_width,
            back_buffer_height,
            windowed: !config.fullscreen,
            interval: if config.vsync { PresentInterval::One } else { PresentInterval::Immediate },
            multisample: if config.antialiasing > 1 { config.antialiasing } else { 0 },
            depth_stencil: DepthStencilFormat::D24S8,
        }
    }
}
