//! Render-state cache
//!
//! Every cached state has exactly one setter, and every setter goes through
//! [`apply_if_changed`]. After a device reset the device is back at its
//! hardware defaults, so [`RenderStateCache::reset_to_defaults`] must run
//! before the next state change.

use crate::foundation::math::{Color, Mat4, Plane};
use crate::render::api::{DeviceResult, GraphicsDevice, RenderState, SamplerState, TransformKind};

/// Polygon fill mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    /// Vertices only
    Point,
    /// Edges only
    Wireframe,
    /// Filled polygons
    Solid,
}

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    /// Draw both faces
    None,
    /// Cull faces with clockwise winding
    Clockwise,
    /// Cull faces with counter-clockwise winding
    CounterClockwise,
}

/// Depth buffer usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZBufferMode {
    /// Test and write depth
    Normal,
    /// Test depth without writing
    ReadOnly,
    /// Neither test nor write
    Off,
}

/// Comparison function for depth and alpha tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compare {
    /// Never passes
    Never,
    /// Passes if less
    Less,
    /// Passes if equal
    Equal,
    /// Passes if less or equal
    LessEqual,
    /// Passes if greater
    Greater,
    /// Passes if not equal
    NotEqual,
    /// Passes if greater or equal
    GreaterEqual,
    /// Always passes
    Always,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blend {
    /// `(0, 0, 0, 0)`
    Zero,
    /// `(1, 1, 1, 1)`
    One,
    /// Source alpha
    SourceAlpha,
    /// One minus source alpha
    InverseSourceAlpha,
    /// Constant blend factor color
    BlendFactor,
    /// One minus constant blend factor color
    InverseBlendFactor,
}

/// Texture filter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFilter {
    /// Filtering disabled (only meaningful for mip filters)
    None,
    /// Nearest texel
    Point,
    /// Bilinear interpolation
    Linear,
    /// Anisotropic filtering
    Anisotropic,
}

/// Sampler configuration applied to every texture stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureFilterSetup {
    /// Minification and magnification filter
    pub filter: TextureFilter,
    /// Mip filter
    pub mip_filter: TextureFilter,
    /// Anisotropy level
    pub max_anisotropy: u32,
    /// Number of stages the setup is applied to
    pub stages: u32,
}

impl TextureFilterSetup {
    /// Hardware default sampler state
    pub const DEFAULT: Self = Self {
        filter: TextureFilter::Point,
        mip_filter: TextureFilter::None,
        max_anisotropy: 1,
        stages: 0,
    };
}

/// Alpha blending configuration
///
/// A mode selector over five mutually exclusive device configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlphaBlend {
    /// No blending, no alpha test
    Opaque,
    /// Blend by the alpha channel, skipping fully transparent texels
    AlphaChannel,
    /// Alpha channel used as a binary cutoff at 50%
    BinaryAlphaChannel,
    /// Add source to destination
    Additive,
    /// Blend with a constant opacity, 0 = invisible, 255 = opaque
    Constant(u8),
}

impl AlphaBlend {
    /// Constant-factor blending; the factor is clamped to `0..=255`
    pub fn constant(factor: i32) -> Self {
        // Clamped into u8 range, so the cast is lossless
        Self::Constant(factor.clamp(0, 255) as u8)
    }

    /// The device states that realize this mode, in application order
    pub fn device_states(self) -> Vec<RenderState> {
        match self {
            Self::Opaque => vec![
                RenderState::AlphaBlendEnable(false),
                RenderState::AlphaTestEnable(false),
            ],
            Self::AlphaChannel => vec![
                RenderState::AlphaBlendEnable(true),
                RenderState::SourceBlend(Blend::SourceAlpha),
                RenderState::DestinationBlend(Blend::InverseSourceAlpha),
                RenderState::AlphaTestEnable(true),
                RenderState::AlphaFunc(Compare::Greater),
                RenderState::AlphaRef(0),
            ],
            Self::BinaryAlphaChannel => vec![
                RenderState::AlphaBlendEnable(false),
                RenderState::AlphaTestEnable(true),
                RenderState::AlphaFunc(Compare::GreaterEqual),
                RenderState::AlphaRef(128),
            ],
            Self::Additive => vec![
                RenderState::AlphaBlendEnable(true),
                RenderState::SourceBlend(Blend::One),
                RenderState::DestinationBlend(Blend::One),
                RenderState::AlphaTestEnable(false),
            ],
            Self::Constant(factor) => vec![
                RenderState::AlphaBlendEnable(true),
                RenderState::SourceBlend(Blend::BlendFactor),
                RenderState::DestinationBlend(Blend::InverseBlendFactor),
                RenderState::BlendFactor(Color::splat(factor)),
                RenderState::AlphaTestEnable(false),
            ],
        }
    }
}

/// Cached mirror of every render state the engine controls
#[derive(Debug, Clone, PartialEq)]
pub struct RenderStateSnapshot {
    /// Polygon fill mode
    pub fill_mode: FillMode,
    /// Face culling
    pub cull_mode: CullMode,
    /// Depth buffer usage
    pub zbuffer_mode: ZBufferMode,
    /// Fixed-function lighting
    pub lighting: bool,
    /// Fog enabled
    pub fog_enabled: bool,
    /// Fog color
    pub fog_color: Color,
    /// Linear fog `(start, end)`
    pub fog_range: (f32, f32),
    /// Alpha blending mode
    pub alpha_blend: AlphaBlend,
    /// World transform
    pub world: Mat4,
    /// View transform
    pub view: Mat4,
    /// Projection transform
    pub projection: Mat4,
    /// User clip plane 0, `None` when disabled
    pub clip_plane: Option<Plane>,
    /// Sampler setup
    pub texture_filter: TextureFilterSetup,
}

impl RenderStateSnapshot {
    /// Documented device state right after creation or reset
    pub fn hardware_defaults() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::CounterClockwise,
            zbuffer_mode: ZBufferMode::Normal,
            lighting: true,
            fog_enabled: false,
            fog_color: Color::argb(0, 0, 0, 0),
            fog_range: (0.0, 1.0),
            alpha_blend: AlphaBlend::Opaque,
            world: Mat4::identity(),
            view: Mat4::identity(),
            projection: Mat4::identity(),
            clip_plane: None,
            texture_filter: TextureFilterSetup::DEFAULT,
        }
    }
}

impl Default for RenderStateSnapshot {
    fn default() -> Self {
        Self::hardware_defaults()
    }
}

/// Compare `value` to `cached`; on a difference run `apply` and store the value
///
/// The cache is only updated when `apply` succeeds. A setter that issues
/// several device calls can fail part way and leave the device partly
/// changed; the stale cache entry makes a retry re-send the whole sequence.
/// After a device loss the cache is brought back in line by
/// [`RenderStateCache::reset_to_defaults`]. Returns whether `apply` ran.
pub fn apply_if_changed<T, E>(
    cached: &mut T,
    value: T,
    apply: impl FnOnce(T) -> Result<(), E>,
) -> Result<bool, E>
where
    T: PartialEq + Copy,
{
    if *cached == value {
        return Ok(false);
    }
    apply(value)?;
    *cached = value;
    Ok(true)
}

/// Set-if-changed gate in front of the device's pipeline switches
#[derive(Debug, Clone, Default)]
pub struct RenderStateCache {
    current: RenderStateSnapshot,
}

impl RenderStateCache {
    /// Create a cache matching a freshly created device
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cached values
    pub fn snapshot(&self) -> &RenderStateSnapshot {
        &self.current
    }

    /// Forget everything and assume the device is at its hardware defaults
    pub fn reset_to_defaults(&mut self) {
        log::debug!("Render-state cache reset to hardware defaults");
        self.current = RenderStateSnapshot::hardware_defaults();
    }

    /// Set the polygon fill mode
    pub fn set_fill_mode(&mut self, device: &mut dyn GraphicsDevice, mode: FillMode) -> DeviceResult<()> {
        apply_if_changed(&mut self.current.fill_mode, mode, |mode| {
            device.set_render_state(RenderState::FillMode(mode))
        })
        .map(drop)
    }

    /// Set face culling
    pub fn set_cull_mode(&mut self, device: &mut dyn GraphicsDevice, mode: CullMode) -> DeviceResult<()> {
        apply_if_changed(&mut self.current.cull_mode, mode, |mode| {
            device.set_render_state(RenderState::CullMode(mode))
        })
        .map(drop)
    }

    /// Set depth buffer usage
    pub fn set_zbuffer_mode(&mut self, device: &mut dyn GraphicsDevice, mode: ZBufferMode) -> DeviceResult<()> {
        apply_if_changed(&mut self.current.zbuffer_mode, mode, |mode| {
            let (test, write) = match mode {
                ZBufferMode::Normal => (true, true),
                ZBufferMode::ReadOnly => (true, false),
                ZBufferMode::Off => (false, false),
            };
            device.set_render_state(RenderState::ZEnable(test))?;
            device.set_render_state(RenderState::ZWriteEnable(write))
        })
        .map(drop)
    }

    /// Toggle fixed-function lighting
    pub fn set_lighting(&mut self, device: &mut dyn GraphicsDevice, enabled: bool) -> DeviceResult<()> {
        apply_if_changed(&mut self.current.lighting, enabled, |enabled| {
            device.set_render_state(RenderState::Lighting(enabled))
        })
        .map(drop)
    }

    /// Toggle fog
    ///
    /// Enabling fog invalidates the device's derived projection state, so
    /// the cached projection is sent again right after.
    pub fn set_fog(&mut self, device: &mut dyn GraphicsDevice, enabled: bool) -> DeviceResult<()> {
        let projection = self.current.projection;
        apply_if_changed(&mut self.current.fog_enabled, enabled, |enabled| {
            device.set_render_state(RenderState::FogEnable(enabled))?;
            if enabled {
                device.set_transform(TransformKind::Projection, &projection)?;
            }
            Ok(())
        })
        .map(drop)
    }

    /// Set the fog color
    pub fn set_fog_color(&mut self, device: &mut dyn GraphicsDevice, color: Color) -> DeviceResult<()> {
        apply_if_changed(&mut self.current.fog_color, color, |color| {
            device.set_render_state(RenderState::FogColor(color))
        })
        .map(drop)
    }

    /// Set linear fog start and end distances
    pub fn set_fog_range(&mut self, device: &mut dyn GraphicsDevice, start: f32, end: f32) -> DeviceResult<()> {
        apply_if_changed(&mut self.current.fog_range, (start, end), |(start, end)| {
            device.set_render_state(RenderState::FogStart(start))?;
            device.set_render_state(RenderState::FogEnd(end))
        })
        .map(drop)
    }

    /// Select an alpha blending mode
    pub fn set_alpha_blend(&mut self, device: &mut dyn GraphicsDevice, mode: AlphaBlend) -> DeviceResult<()> {
        apply_if_changed(&mut self.current.alpha_blend, mode, |mode| {
            mode.device_states()
                .into_iter()
                .try_for_each(|state| device.set_render_state(state))
        })
        .map(drop)
    }

    /// Select constant-factor blending, clamping the factor to `0..=255`
    pub fn set_alpha_factor(&mut self, device: &mut dyn GraphicsDevice, factor: i32) -> DeviceResult<()> {
        self.set_alpha_blend(device, AlphaBlend::constant(factor))
    }

    /// Set the world transform
    pub fn set_world(&mut self, device: &mut dyn GraphicsDevice, matrix: Mat4) -> DeviceResult<()> {
        apply_if_changed(&mut self.current.world, matrix, |matrix| {
            device.set_transform(TransformKind::World, &matrix)
        })
        .map(drop)
    }

    /// Set the view transform
    pub fn set_view(&mut self, device: &mut dyn GraphicsDevice, matrix: Mat4) -> DeviceResult<()> {
        apply_if_changed(&mut self.current.view, matrix, |matrix| {
            device.set_transform(TransformKind::View, &matrix)
        })
        .map(drop)
    }

    /// Set the projection transform
    pub fn set_projection(&mut self, device: &mut dyn GraphicsDevice, matrix: Mat4) -> DeviceResult<()> {
        apply_if_changed(&mut self.current.projection, matrix, |matrix| {
            device.set_transform(TransformKind::Projection, &matrix)
        })
        .map(drop)
    }

    /// Set or disable user clip plane 0
    pub fn set_clip_plane(&mut self, device: &mut dyn GraphicsDevice, plane: Option<Plane>) -> DeviceResult<()> {
        apply_if_changed(&mut self.current.clip_plane, plane, |plane| match plane {
            Some(plane) => {
                device.set_clip_plane(0, &plane)?;
                device.set_render_state(RenderState::ClipPlaneEnable(1))
            }
            None => device.set_render_state(RenderState::ClipPlaneEnable(0)),
        })
        .map(drop)
    }

    /// Apply a sampler setup to every configured texture stage
    pub fn set_texture_filter(
        &mut self,
        device: &mut dyn GraphicsDevice,
        setup: TextureFilterSetup,
    ) -> DeviceResult<()> {
        apply_if_changed(&mut self.current.texture_filter, setup, |setup| {
            for stage in 0..setup.stages {
                device.set_sampler_state(stage, SamplerState::MinFilter(setup.filter))?;
                device.set_sampler_state(stage, SamplerState::MagFilter(setup.filter))?;
                device.set_sampler_state(stage, SamplerState::MipFilter(setup.mip_filter))?;
                if setup.filter == TextureFilter::Anisotropic {
                    device.set_sampler_state(stage, SamplerState::MaxAnisotropy(setup.max_anisotropy))?;
                }
            }
            Ok(())
        })
        .map(drop)
    }
}
