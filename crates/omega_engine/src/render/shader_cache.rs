//! Terrain shader variants
//!
//! Every combination of active texture layers and lighting gets its own
//! shader. Variants are built on first use and kept for the lifetime of the
//! engine, in two dense tables indexed directly by the 16-bit texture mask.

use crate::render::api::{DeviceResult, GraphicsDevice, ShaderHandle};

const TABLE_SIZE: usize = 1 << 16;

/// Bitfield of active terrain texture layers
///
/// Bit `i` set means layer `i + 1` contributes to the blend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureMask(pub u16);

impl TextureMask {
    /// Build a mask from 1-based layer numbers; numbers outside `1..=16` are ignored
    pub fn from_layers(layers: impl IntoIterator<Item = u32>) -> Self {
        let bits = layers
            .into_iter()
            .filter(|layer| (1..=16).contains(layer))
            .fold(0u16, |bits, layer| bits | 1 << (layer - 1));
        Self(bits)
    }

    /// Active layer numbers in ascending order
    pub fn layers(self) -> Vec<u32> {
        (0..16u32).filter(|bit| self.0 & (1 << bit) != 0).map(|bit| bit + 1).collect()
    }

    /// Number of active layers
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl From<u16> for TextureMask {
    fn from(bits: u16) -> Self {
        Self(bits)
    }
}

/// Lazily filled shader tables, one per lighting mode
pub struct TerrainShaderCache {
    lit: Box<[Option<ShaderHandle>]>,
    unlit: Box<[Option<ShaderHandle>]>,
    live: usize,
}

impl Default for TerrainShaderCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TerrainShaderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerrainShaderCache").field("live", &self.live).finish()
    }
}

impl TerrainShaderCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            lit: vec![None; TABLE_SIZE].into_boxed_slice(),
            unlit: vec![None; TABLE_SIZE].into_boxed_slice(),
            live: 0,
        }
    }

    /// Shader for a texture mask and lighting mode, building it on a miss
    ///
    /// # Arguments
    /// * `device` - Device used to build a missing variant
    /// * `lighting` - Whether the variant applies vertex lighting
    /// * `mask` - Active texture layers
    ///
    /// # Returns
    /// The cached handle; repeated calls with the same key return the same
    /// handle without touching the device.
    pub fn get_or_create(
        &mut self,
        device: &mut dyn GraphicsDevice,
        lighting: bool,
        mask: impl Into<TextureMask>,
    ) -> DeviceResult<ShaderHandle> {
        let mask = mask.into();
        let slot = &mut self.table_mut(lighting)[mask.index()];
        if let Some(handle) = *slot {
            return Ok(handle);
        }

        let layers = mask.layers();
        let handle = device.create_terrain_shader(lighting, &layers)?;
        *slot = Some(handle);
        self.live += 1;
        log::debug!("Built terrain shader {handle:?} for layers {layers:?} (lighting: {lighting})");
        Ok(handle)
    }

    /// Cached shader without building it
    pub fn get(&self, lighting: bool, mask: impl Into<TextureMask>) -> Option<ShaderHandle> {
        self.table(lighting)[mask.into().index()]
    }

    /// Number of variants built so far
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether no variant was built yet
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Let every built shader drop its device-dependent state
    pub fn on_device_lost(&mut self, device: &mut dyn GraphicsDevice) {
        for handle in self.handles() {
            device.shader_lost(handle);
        }
    }

    /// Restore every built shader after a device reset
    pub fn on_device_reset(&mut self, device: &mut dyn GraphicsDevice) -> DeviceResult<()> {
        for handle in self.handles() {
            device.shader_reset(handle)?;
        }
        Ok(())
    }

    /// Release every built shader and empty both tables
    pub fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        for slot in self.lit.iter_mut().chain(self.unlit.iter_mut()) {
            if let Some(handle) = slot.take() {
                device.release_shader(handle);
            }
        }
        if self.live > 0 {
            log::debug!("Released {} terrain shaders", self.live);
        }
        self.live = 0;
    }

    fn handles(&self) -> Vec<ShaderHandle> {
        self.lit.iter().chain(self.unlit.iter()).flatten().copied().collect()
    }

    fn table(&self, lighting: bool) -> &[Option<ShaderHandle>] {
        if lighting {
            &self.lit
        } else {
            &self.unlit
        }
    }

    fn table_mut(&mut self, lighting: bool) -> &mut [Option<ShaderHandle>] {
        if lighting {
            &mut self.lit
        } else {
            &mut self.unlit
        }
    }
}
