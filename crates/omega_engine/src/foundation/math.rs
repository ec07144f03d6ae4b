//! Math utilities and types
//!
//! Provides the math types the render-state layer caches: transforms,
//! clip planes and packed colors.

pub use nalgebra::{Matrix4, Vector4};

use serde::{Deserialize, Serialize};

/// 4x4 matrix type used for world/view/projection transforms
pub type Mat4 = Matrix4<f32>;

/// Plane equation `(a, b, c, d)` where `ax + by + cz + d = 0`
pub type Plane = Vector4<f32>;

/// 8-bit-per-channel ARGB color as understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    /// Alpha channel
    pub a: u8,
    /// Red channel
    pub r: u8,
    /// Green channel
    pub g: u8,
    /// Blue channel
    pub b: u8,
}

impl Color {
    /// Opaque black
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    /// Opaque white
    pub const WHITE: Self = Self::rgb(255, 255, 255);

    /// Create an opaque color
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { a: 255, r, g, b }
    }

    /// Create a color with explicit alpha
    pub const fn argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self { a, r, g, b }
    }

    /// Gray color with all four channels set to `value`
    pub const fn splat(value: u8) -> Self {
        Self { a: value, r: value, g: value, b: value }
    }

    /// Pack into the `0xAARRGGBB` layout
    pub const fn to_argb_u32(self) -> u32 {
        (self.a as u32) << 24 | (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }
}
