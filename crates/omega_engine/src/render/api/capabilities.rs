//! Hardware capability descriptor
//!
//! Backends report what the adapter can do; the engine uses it to pick a
//! vertex-processing tier, a texture-filter setup and a shader model.

use bitflags::bitflags;

use crate::core::config::ShaderModel;

bitflags! {
    /// Device-level capability flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceCaps: u32 {
        /// Transform and lighting in hardware
        const HARDWARE_TRANSFORM_LIGHT = 1 << 0;
        /// Device supports pure (non-shadowing) mode
        const PURE_DEVICE = 1 << 1;
    }
}

bitflags! {
    /// Texture filtering capability flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FilterCaps: u32 {
        /// Linear minification
        const MIN_LINEAR = 1 << 0;
        /// Linear magnification
        const MAG_LINEAR = 1 << 1;
        /// Linear mip interpolation
        const MIP_LINEAR = 1 << 2;
        /// Anisotropic minification
        const MIN_ANISOTROPIC = 1 << 3;
        /// Anisotropic magnification
        const MAG_ANISOTROPIC = 1 << 4;
    }
}

/// Capability descriptor for one adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Device-level flags
    pub device: DeviceCaps,
    /// Texture filter flags
    pub filters: FilterCaps,
    /// Highest supported anisotropy level
    pub max_anisotropy: u32,
    /// Number of texture stages usable in one pass
    pub max_simultaneous_textures: u32,
    /// Number of user clip planes
    pub max_user_clip_planes: u32,
    /// Highest vertex shader model
    pub vertex_shader_model: ShaderModel,
    /// Highest pixel shader model
    pub pixel_shader_model: ShaderModel,
}

impl Capabilities {
    /// Capabilities of a typical shader model 2.0 card
    pub fn sm20() -> Self {
        Self {
            device: DeviceCaps::all(),
            filters: FilterCaps::all(),
            max_anisotropy: 16,
            max_simultaneous_textures: 8,
            max_user_clip_planes: 6,
            vertex_shader_model: ShaderModel::Model20,
            pixel_shader_model: ShaderModel::Model20,
        }
    }

    /// A device without any hardware acceleration
    pub fn software() -> Self {
        Self {
            device: DeviceCaps::empty(),
            filters: FilterCaps::empty(),
            max_anisotropy: 1,
            max_simultaneous_textures: 1,
            max_user_clip_planes: 0,
            vertex_shader_model: ShaderModel::Fixed,
            pixel_shader_model: ShaderModel::Fixed,
        }
    }

    /// Shader model usable for both vertex and pixel shaders
    pub fn shader_model(&self) -> ShaderModel {
        self.vertex_shader_model.min(self.pixel_shader_model)
    }

    /// Whether linear minification and magnification are supported
    pub fn supports_linear_filtering(&self) -> bool {
        self.filters.contains(FilterCaps::MIN_LINEAR | FilterCaps::MAG_LINEAR)
    }

    /// Whether anisotropic minification and magnification are supported
    pub fn supports_anisotropic_filtering(&self) -> bool {
        self.filters.contains(FilterCaps::MIN_ANISOTROPIC | FilterCaps::MAG_ANISOTROPIC)
            && self.max_anisotropy > 1
    }
}

/// Where vertex transformation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexProcessing {
    /// Hardware processing without runtime state shadowing
    PureHardware,
    /// Hardware processing
    Hardware,
    /// CPU processing
    Software,
}

impl VertexProcessing {
    /// All tiers from most to least preferred
    pub const PREFERENCE: [Self; 3] = [Self::PureHardware, Self::Hardware, Self::Software];

    /// Whether the capability flags allow this tier
    pub fn is_supported(self, caps: &Capabilities) -> bool {
        match self {
            Self::PureHardware => caps
                .device
                .contains(DeviceCaps::HARDWARE_TRANSFORM_LIGHT | DeviceCaps::PURE_DEVICE),
            Self::Hardware => caps.device.contains(DeviceCaps::HARDWARE_TRANSFORM_LIGHT),
            Self::Software => true,
        }
    }

    /// Supported tiers in order of preference
    pub fn candidates(caps: &Capabilities) -> impl Iterator<Item = Self> + '_ {
        Self::PREFERENCE.into_iter().filter(move |tier| tier.is_supported(caps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_selection_prefers_pure_hardware() {
        let caps = Capabilities::sm20();
        let tiers: Vec<_> = VertexProcessing::candidates(&caps).collect();
        assert_eq!(
            tiers,
            vec![VertexProcessing::PureHardware, VertexProcessing::Hardware, VertexProcessing::Software]
        );
    }

    #[test]
    fn test_tier_selection_without_pure_device() {
        let mut caps = Capabilities::sm20();
        caps.device = DeviceCaps::HARDWARE_TRANSFORM_LIGHT;
        assert_eq!(VertexProcessing::candidates(&caps).next(), Some(VertexProcessing::Hardware));

        caps.device = DeviceCaps::empty();
        assert_eq!(VertexProcessing::candidates(&caps).next(), Some(VertexProcessing::Software));
    }

    #[test]
    fn test_filter_support_queries() {
        let mut caps = Capabilities::sm20();
        assert!(caps.supports_linear_filtering());
        assert!(caps.supports_anisotropic_filtering());

        caps.max_anisotropy = 1;
        assert!(!caps.supports_anisotropic_filtering());

        assert!(!Capabilities::software().supports_linear_filtering());
    }

    #[test]
    fn test_shader_model_is_weaker_of_both() {
        let mut caps = Capabilities::sm20();
        caps.pixel_shader_model = ShaderModel::Model14;
        assert_eq!(caps.shader_model(), ShaderModel::Model14);
    }
}
