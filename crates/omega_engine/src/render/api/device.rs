//! Graphics device traits
//!
//! The engine owns exactly one [`GraphicsDevice`] at a time. Every state
//! change and draw goes through this trait; backends translate the calls to
//! their native API.

use thiserror::Error;

use crate::foundation::math::{Color, Mat4, Plane};
use crate::render::state::{Blend, Compare, CullMode, FillMode, TextureFilter};
use super::capabilities::{Capabilities, VertexProcessing};
use super::present::PresentParameters;

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Handle to a compiled shader owned by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u64);

/// Handle to a device surface (back buffer, render target)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// Result of a cooperative-level query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooperativeLevel {
    /// Device is usable
    Ok,
    /// Device is lost and cannot be reset yet
    Lost,
    /// Device is lost but can be reset now
    NotReset,
    /// The driver failed internally; the device cannot be recovered
    DriverInternalError,
}

/// Errors reported by the device layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Device was lost during the call
    #[error("Device lost")]
    DeviceLost,

    /// Device is lost but ready to be reset
    #[error("Device not reset")]
    DeviceNotReset,

    /// Draw or present call was given invalid data
    #[error("Invalid call data: {0}")]
    InvalidData(String),

    /// Unrecoverable driver failure
    #[error("Driver internal error: {0}")]
    DriverInternal(String),

    /// Video memory exhausted
    #[error("Out of video memory")]
    OutOfVideoMemory,

    /// Requested feature is not supported by the device
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Which transform slot a matrix is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    /// Object to world space
    World,
    /// World to camera space
    View,
    /// Camera to clip space
    Projection,
}

/// A single device pipeline switch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderState {
    /// Polygon fill mode
    FillMode(FillMode),
    /// Face culling
    CullMode(CullMode),
    /// Depth testing
    ZEnable(bool),
    /// Depth writes
    ZWriteEnable(bool),
    /// Depth comparison function
    ZFunc(Compare),
    /// Fixed-function lighting
    Lighting(bool),
    /// Fog
    FogEnable(bool),
    /// Fog color
    FogColor(Color),
    /// Linear fog start distance
    FogStart(f32),
    /// Linear fog end distance
    FogEnd(f32),
    /// Alpha blending
    AlphaBlendEnable(bool),
    /// Source blend factor
    SourceBlend(Blend),
    /// Destination blend factor
    DestinationBlend(Blend),
    /// Constant blend factor color
    BlendFactor(Color),
    /// Alpha testing
    AlphaTestEnable(bool),
    /// Alpha test reference value
    AlphaRef(u8),
    /// Alpha test comparison
    AlphaFunc(Compare),
    /// Bitmask of enabled user clip planes
    ClipPlaneEnable(u32),
}

/// Per-stage texture sampler setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// Minification filter
    MinFilter(TextureFilter),
    /// Magnification filter
    MagFilter(TextureFilter),
    /// Mip level filter
    MipFilter(TextureFilter),
    /// Anisotropy level used by anisotropic filters
    MaxAnisotropy(u32),
}

/// Render target rectangle and depth range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge in pixels
    pub x: u32,
    /// Top edge in pixels
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Near depth
    pub min_z: f32,
    /// Far depth
    pub max_z: f32,
}

impl Viewport {
    /// Full-surface viewport with the default depth range
    pub const fn full(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height, min_z: 0.0, max_z: 1.0 }
    }
}

/// RGBA8 copy of the back buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCapture {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major RGBA8 pixels
    pub pixels: Vec<u8>,
}

/// GPU pipeline synchronization used by the profiler
///
/// A flush issues a query behind all outstanding work and polls it until the
/// GPU has caught up.
pub trait PipelineSync {
    /// Issue a query that completes once all prior commands have executed
    fn issue_flush_query(&mut self) -> DeviceResult<()>;

    /// Poll the last issued query
    fn is_flush_complete(&mut self) -> DeviceResult<bool>;

    /// Block until the GPU pipeline is drained
    fn flush_pipeline(&mut self) -> DeviceResult<()> {
        self.issue_flush_query()?;
        while !self.is_flush_complete()? {
            std::hint::spin_loop();
        }
        Ok(())
    }
}

/// The hardware rendering context
///
/// All state and draw calls must happen between [`begin_scene`](Self::begin_scene)
/// and [`end_scene`](Self::end_scene) while the device is not lost.
pub trait GraphicsDevice: PipelineSync {
    /// Query whether the device is usable, lost or resettable
    fn cooperative_level(&mut self) -> CooperativeLevel;

    /// Reinitialize the device with new presentation parameters
    ///
    /// The device forgets all render states on reset.
    fn reset(&mut self, params: &PresentParameters) -> DeviceResult<()>;

    /// Obtain a handle to the current back buffer
    fn acquire_back_buffer(&mut self) -> DeviceResult<SurfaceHandle>;

    /// Release a surface handle
    fn release_surface(&mut self, surface: SurfaceHandle);

    /// Current viewport
    fn viewport(&self) -> Viewport;

    /// Replace the viewport
    fn set_viewport(&mut self, viewport: Viewport) -> DeviceResult<()>;

    /// Open a scene
    fn begin_scene(&mut self) -> DeviceResult<()>;

    /// Close a scene
    fn end_scene(&mut self) -> DeviceResult<()>;

    /// Clear the render target and depth buffer
    fn clear(&mut self, color: Color) -> DeviceResult<()>;

    /// Present the back buffer
    fn present(&mut self) -> DeviceResult<()>;

    /// Change one pipeline switch
    fn set_render_state(&mut self, state: RenderState) -> DeviceResult<()>;

    /// Bind a transform matrix
    fn set_transform(&mut self, kind: TransformKind, matrix: &Mat4) -> DeviceResult<()>;

    /// Set the equation of a user clip plane
    fn set_clip_plane(&mut self, index: u32, plane: &Plane) -> DeviceResult<()>;

    /// Change a sampler setting for one texture stage
    fn set_sampler_state(&mut self, stage: u32, state: SamplerState) -> DeviceResult<()>;

    /// Draw a screen-covering quad in the given color
    fn draw_fullscreen_quad(&mut self, color: Color) -> DeviceResult<()>;

    /// Draw indexed geometry with an optional shader bound
    fn draw_indexed(&mut self, shader: Option<ShaderHandle>, primitive_count: u32) -> DeviceResult<()>;

    /// Compile a terrain shader blending the given texture layers (1-based)
    fn create_terrain_shader(&mut self, lighting: bool, layers: &[u32]) -> DeviceResult<ShaderHandle>;

    /// Release the device-dependent part of a shader before a reset
    fn shader_lost(&mut self, shader: ShaderHandle);

    /// Recreate the device-dependent part of a shader after a reset
    fn shader_reset(&mut self, shader: ShaderHandle) -> DeviceResult<()>;

    /// Destroy a shader
    fn release_shader(&mut self, shader: ShaderHandle);

    /// Copy the back buffer into system memory
    fn read_back_buffer(&mut self) -> DeviceResult<FrameCapture>;

    /// Destroy the device
    fn dispose(&mut self);
}

/// Creates devices on a display adapter
pub trait DeviceFactory {
    /// Capability descriptor of an adapter
    fn capabilities(&self, adapter: u32) -> DeviceResult<Capabilities>;

    /// Create a device with the given vertex-processing tier
    fn create_device(
        &mut self,
        adapter: u32,
        processing: VertexProcessing,
        params: &PresentParameters,
    ) -> DeviceResult<Box<dyn GraphicsDevice>>;
}
