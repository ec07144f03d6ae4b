//! Render-state caching
//!
//! Mirrors every pipeline switch the engine controls and only talks to the
//! device when a requested value differs from the cached one.

pub mod render_state;

pub use render_state::{
    apply_if_changed, AlphaBlend, Blend, Compare, CullMode, FillMode, RenderStateCache,
    RenderStateSnapshot, TextureFilter, TextureFilterSetup, ZBufferMode,
};
