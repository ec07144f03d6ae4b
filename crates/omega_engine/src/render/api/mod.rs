//! Device abstraction
//!
//! Traits and descriptors the engine core consumes from a graphics backend:
//! the device handle itself, the factory that creates it, the capability
//! descriptor and the presentation parameters derived from configuration.

pub mod device;
pub mod capabilities;
pub mod present;

pub use device::{
    CooperativeLevel, DeviceError, DeviceFactory, DeviceResult, FrameCapture, GraphicsDevice,
    PipelineSync, RenderState, SamplerState, ShaderHandle, SurfaceHandle, TransformKind, Viewport,
};
pub use capabilities::{Capabilities, DeviceCaps, FilterCaps, VertexProcessing};
pub use present::{DepthStencilFormat, PresentInterval, PresentParameters};
