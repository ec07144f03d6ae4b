//! Scene views
//!
//! A view renders one scene into the back buffer. Views render in the order
//! they were added, through a [`RenderContext`] that bundles the device with
//! the caches and the profiler.

use crate::core::ShaderModel;
use crate::profiling::ProfilingContext;
use crate::render::api::{Capabilities, GraphicsDevice, ShaderHandle};
use crate::render::shader_cache::{TerrainShaderCache, TextureMask};
use crate::render::state::RenderStateCache;
use crate::render::RenderResult;

/// Everything a view needs to draw
pub struct RenderContext<'a> {
    /// The device, inside an open scene
    pub device: &'a mut dyn GraphicsDevice,
    /// Render-state cache; route pipeline switches through it
    pub states: &'a mut RenderStateCache,
    /// Terrain shader variants
    pub shaders: &'a mut TerrainShaderCache,
    /// Profiler for the current frame
    pub profiler: &'a mut ProfilingContext,
    /// Adapter capabilities
    pub capabilities: &'a Capabilities,
    /// Shader model in effect
    pub shader_model: ShaderModel,
}

impl RenderContext<'_> {
    /// Run `f` inside a profiling event
    ///
    /// The event is closed when `f` returns or panics. Without an active
    /// frame log this is a plain call.
    pub fn event<R>(&mut self, name: &str, f: impl FnOnce(&mut Self) -> RenderResult<R>) -> RenderResult<R> {
        if !self.profiler.is_active() {
            return f(self);
        }
        self.profiler.begin_event(name, &mut *self.device)?;
        let mut open = OpenEvent { context: self, closed: false };
        let result = f(&mut *open.context);
        open.closed = true;
        open.context.profiler.end_event(&mut *open.context.device)?;
        result
    }

    /// Record an untimed marker in the frame log
    pub fn marker(&mut self, value: &str) {
        self.profiler.marker(value);
    }

    /// Terrain shader for a texture mask, built on first use
    pub fn terrain_shader(&mut self, lighting: bool, mask: impl Into<TextureMask>) -> RenderResult<ShaderHandle> {
        Ok(self.shaders.get_or_create(&mut *self.device, lighting, mask)?)
    }
}

struct OpenEvent<'c, 'a> {
    context: &'c mut RenderContext<'a>,
    closed: bool,
}

impl Drop for OpenEvent<'_, '_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let context = &mut *self.context;
        if let Err(err) = context.profiler.end_event(&mut *context.device) {
            log::warn!("Pipeline flush failed while closing profiling event: {err}");
        }
    }
}

/// A scene rendered every frame
pub trait View {
    /// Name used for profiling events and logs
    fn name(&self) -> &str;

    /// Hidden views are skipped
    fn is_visible(&self) -> bool {
        true
    }

    /// Draw the scene
    fn render(&mut self, context: &mut RenderContext<'_>) -> RenderResult<()>;

    /// Release device resources before a reset
    fn on_device_lost(&mut self, _device: &mut dyn GraphicsDevice) {}

    /// Recreate device resources after a reset
    fn on_device_reset(&mut self, _device: &mut dyn GraphicsDevice) -> RenderResult<()> {
        Ok(())
    }

    /// Release everything at engine shutdown
    fn dispose(&mut self, _device: &mut dyn GraphicsDevice) {}
}

/// Render one view, wrapped in a profiling event named after it
pub(crate) fn render_view(context: &mut RenderContext<'_>, view: &mut dyn View) -> RenderResult<()> {
    if !context.profiler.is_active() {
        return view.render(context);
    }
    let name = view.name().to_owned();
    context.event(&name, |context| view.render(context))
}
