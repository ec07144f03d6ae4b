//! Engine render loop
//!
//! The [`Engine`] owns the device, every cache in front of it and the list
//! of views, and turns one call to [`Engine::render`] into one frame:
//!
//! 1. count the frame
//! 2. bail out if the target is hidden, mid-reset or disposed
//! 3. confine the cursor in fullscreen mode
//! 4. detect device loss and reset
//! 5. drain the reset queue
//! 6. fire `PreRender` and advance tweens (normal frames only)
//! 7. start the frame log if one was requested
//! 8. feed the FPS window
//! 9. render views, fade and the extra callback, then present
//! 10. absorb device loss, re-wrap invalid data
//! 11. write the frame log
//! 12. fire `PostRender` (normal frames only)
//!
//! "Normal" frames are the ones the host renders for display. Frames rendered
//! only to take a screenshot or to write a frame log skip the frame events,
//! the tweens and presentation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::core::{EngineConfig, ShaderModel};
use crate::events::{DeviceListener, FrameEvent, FrameEvents, FrameHandler};
use crate::foundation::math::Color;
use crate::foundation::time::Clock;
use crate::profiling::ProfilingContext;
use crate::render::api::{
    Capabilities, DeviceError, DeviceFactory, FilterCaps, GraphicsDevice, PresentParameters,
    VertexProcessing,
};
use crate::render::device_manager::{DeviceManager, DeviceState, ResetPolicy, SharedListener};
use crate::render::frame::{Easing, FrameTiming, Tween, TweenId, TweenSet, TweenTarget};
use crate::render::reset_queue::{ResetQueue, SharedResettable};
use crate::render::shader_cache::TerrainShaderCache;
use crate::render::state::{
    AlphaBlend, RenderStateCache, RenderStateSnapshot, TextureFilter, TextureFilterSetup,
    ZBufferMode,
};
use crate::render::view::{render_view, RenderContext, View};
use crate::render::window::RenderWindow;
use crate::render::{RenderError, RenderResult};

/// Duration of the built-in fades
pub const FADE_DURATION: Duration = Duration::from_secs(1);

/// Fade level [`Engine::dim_down`] settles at
pub const DIM_LEVEL: u8 = 160;

/// Callback drawing on top of the views, typically a GUI
pub type ExtraRender = Box<dyn FnMut(&mut RenderContext<'_>) -> RenderResult<()>>;

/// Engine-level errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Rendering error
    #[error("Rendering error: {0}")]
    Render(#[from] RenderError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Initialization error
    #[error("Engine initialization failed: {0}")]
    InitializationFailed(String),
}

#[derive(Debug)]
struct FrameLogRequest {
    path: PathBuf,
    gpu_inclusive: bool,
}

/// Device resources owned by the engine itself
///
/// Notified before any registered listener on loss and reset.
struct EngineResources {
    states: RenderStateCache,
    shaders: TerrainShaderCache,
    views: Vec<Box<dyn View>>,
    texture_filter: TextureFilterSetup,
}

impl EngineResources {
    fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        while let Some(mut view) = self.views.pop() {
            log::debug!("Disposing view '{}'", view.name());
            view.dispose(device);
        }
        self.shaders.dispose(device);
    }
}

impl DeviceListener for EngineResources {
    fn on_device_lost(&mut self, device: &mut dyn GraphicsDevice) {
        self.shaders.on_device_lost(device);
        for view in &mut self.views {
            view.on_device_lost(device);
        }
    }

    fn on_device_reset(&mut self, device: &mut dyn GraphicsDevice) -> RenderResult<()> {
        // The device forgot everything; the sampler setup is re-sent on top
        // of the defaults so the cache matches the device afterwards.
        self.states.reset_to_defaults();
        self.states.set_texture_filter(device, self.texture_filter)?;
        if let Err(err) = self.shaders.on_device_reset(device) {
            self.shaders.on_device_lost(device);
            return Err(err.into());
        }
        // A view that fails leaves the earlier ones released again, so the
        // retried reset rebuilds every view exactly once.
        for index in 0..self.views.len() {
            if let Err(err) = self.views[index].on_device_reset(device) {
                for view in self.views[..index].iter_mut().rev() {
                    view.on_device_lost(device);
                }
                self.shaders.on_device_lost(device);
                return Err(err);
            }
        }
        Ok(())
    }
}

/// The render loop and everything it owns
pub struct Engine {
    config: EngineConfig,
    manager: DeviceManager,
    capabilities: Capabilities,
    shader_model: ShaderModel,
    resources: EngineResources,
    window: Box<dyn RenderWindow>,
    clock: Box<dyn Clock>,
    profiler: ProfilingContext,
    pending_log: Option<FrameLogRequest>,
    reset_queue: ResetQueue,
    frame_events: FrameEvents,
    extra_render: Option<ExtraRender>,
    tweens: TweenSet,
    timing: FrameTiming,
    fade_level: u8,
    fade_extra: bool,
    clear_color: Color,
    disposed: bool,
}

impl Engine {
    /// Create the device and set up the caches
    ///
    /// # Arguments
    /// * `config` - Engine settings; validated first
    /// * `factory` - Backend that creates the device
    /// * `window` - Host window the engine renders into
    /// * `clock` - Wall clock driving tweens
    pub fn new(
        config: EngineConfig,
        factory: &mut dyn DeviceFactory,
        window: Box<dyn RenderWindow>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let area = window.render_area();
        if !config.fullscreen && (area.width == 0 || area.height == 0) {
            return Err(EngineError::InitializationFailed(format!(
                "render area is empty ({}x{})",
                area.width, area.height
            )));
        }

        let present = PresentParameters::from_config(&config, area.size());
        let mut manager = DeviceManager::create(factory, config.adapter, present)?;
        let capabilities = manager.capabilities().clone();
        let shader_model = select_shader_model(&capabilities, config.force_shader_model);
        let texture_filter = select_texture_filter(&capabilities, &config);

        let mut states = RenderStateCache::new();
        if let Err(err) = states.set_texture_filter(manager.device_mut(), texture_filter) {
            manager.dispose();
            return Err(RenderError::from(err).into());
        }

        log::info!(
            "Engine ready: {:?} vertex processing, shader model {shader_model:?}, {:?} filtering",
            manager.vertex_processing(),
            texture_filter.filter
        );

        Ok(Self {
            config,
            manager,
            capabilities,
            shader_model,
            resources: EngineResources {
                states,
                shaders: TerrainShaderCache::new(),
                views: Vec::new(),
                texture_filter,
            },
            window,
            clock,
            profiler: ProfilingContext::new(),
            pending_log: None,
            reset_queue: ResetQueue::new(),
            frame_events: FrameEvents::new(),
            extra_render: None,
            tweens: TweenSet::new(),
            timing: FrameTiming::new(),
            fade_level: u8::MAX,
            fade_extra: false,
            clear_color: Color::BLACK,
            disposed: false,
        })
    }

    /// Render one frame
    ///
    /// `no_present` marks a frame rendered only to be captured: no frame
    /// events, no tween progress and no present.
    ///
    /// # Errors
    /// Device loss is absorbed and recovered from on a later frame. Invalid
    /// draw data surfaces as [`RenderError::InvalidData`]; an unrecoverable
    /// driver state, an exhausted reset wait and every other device error
    /// propagate.
    pub fn render(&mut self, elapsed: Duration, no_present: bool) -> RenderResult<()> {
        self.timing.advance(elapsed);

        if self.disposed || !self.window.is_visible() || self.manager.is_resetting() {
            self.window.clip_cursor(None);
            return Ok(());
        }

        if self.config.fullscreen {
            let area = self.window.render_area();
            self.window.clip_cursor(Some(area));
        }

        self.sync_render_area();
        if self.manager.check_lost() {
            match self.reset_device() {
                Ok(()) => {}
                Err(err) if err.is_device_lost() => return Ok(()),
                Err(err) => return Err(err),
            }
        }

        self.reset_queue.drain();

        if !no_present {
            self.frame_events.dispatch(FrameEvent::PreRender);
            self.tweens.update(self.clock.now(), &mut self.fade_level);
        }

        let log_request = self.pending_log.take();
        let started = match &log_request {
            Some(request) => self
                .profiler
                .start_frame(request.gpu_inclusive, self.manager.device_mut())
                .map_err(RenderError::from),
            None => Ok(()),
        };

        self.timing.sample_fps(elapsed);

        let frame = match started.and_then(|()| self.render_frame(no_present)) {
            Err(err) if err.is_device_lost() => {
                log::debug!("Device lost while rendering, recovering next frame");
                self.manager.request_reset();
                Ok(())
            }
            Err(RenderError::Device(source @ DeviceError::InvalidData(_))) => {
                Err(RenderError::InvalidData { source })
            }
            other => other,
        };

        if let Some(request) = log_request {
            if let Some(log) = self.profiler.finish_frame() {
                // A frame abandoned to device loss is as incomplete as a failed one
                if frame.is_ok() && !self.manager.needs_reset() {
                    log.write_to(&request.path)?;
                    log::info!("Frame log written to {}", request.path.display());
                } else {
                    log::warn!("Frame did not complete, frame log discarded");
                }
            }
        }
        frame?;

        if !no_present {
            self.frame_events.dispatch(FrameEvent::PostRender);
        }
        Ok(())
    }

    /// Replace the settings; the device is reset on the next frame
    pub fn set_config(&mut self, config: EngineConfig) -> Result<(), EngineError> {
        config.validate()?;
        let present = PresentParameters::from_config(&config, self.window.render_area().size());
        self.shader_model = select_shader_model(&self.capabilities, config.force_shader_model);
        self.resources.texture_filter = select_texture_filter(&self.capabilities, &config);
        self.manager.set_present_parameters(present);
        self.config = config;
        Ok(())
    }

    /// Current settings
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reset `target` at the start of the next frame
    ///
    /// Returns `false` if it was already queued.
    pub fn queue_reset(&mut self, target: SharedResettable) -> bool {
        self.reset_queue.queue_reset(target)
    }

    /// Append a view; views render in the order they were added
    pub fn add_view(&mut self, view: Box<dyn View>) {
        log::debug!("Added view '{}'", view.name());
        self.resources.views.push(view);
    }

    /// Number of views
    pub fn view_count(&self) -> usize {
        self.resources.views.len()
    }

    /// Register a dependent for device lost/reset notifications
    pub fn add_device_listener(&mut self, listener: SharedListener) {
        self.manager.add_listener(listener);
    }

    /// Unregister a dependent
    pub fn remove_device_listener(&mut self, listener: &SharedListener) -> bool {
        self.manager.remove_listener(listener)
    }

    /// Register a handler for `PreRender` or `PostRender`
    pub fn on_frame_event(&mut self, event: FrameEvent, handler: FrameHandler) {
        self.frame_events.register(event, handler);
    }

    /// Set or clear the callback drawn after the views
    pub fn set_extra_render(&mut self, extra: Option<ExtraRender>) {
        self.extra_render = extra;
    }

    /// Whether the fade also covers the extra callback's output
    pub fn fade_extra(&self) -> bool {
        self.fade_extra
    }

    /// Choose whether the fade is drawn after (`true`) or before the extra callback
    pub fn set_fade_extra(&mut self, fade_extra: bool) {
        self.fade_extra = fade_extra;
    }

    /// Current fade level; 255 is fully visible, 0 fully black
    pub fn fade_level(&self) -> u8 {
        self.fade_level
    }

    /// Set the fade level directly
    pub fn set_fade_level(&mut self, level: u8) {
        self.fade_level = level;
    }

    /// Fade from black to fully visible
    pub fn fade_in(&mut self) -> TweenId {
        self.fade_level = 0;
        self.start_fade(0, u8::MAX, Easing::Linear)
    }

    /// Dim the scene, e.g. behind a menu
    pub fn dim_down(&mut self) -> TweenId {
        self.start_fade(self.fade_level, DIM_LEVEL, Easing::Trigonometric)
    }

    /// Undo [`Engine::dim_down`]
    pub fn dim_up(&mut self) -> TweenId {
        self.start_fade(self.fade_level, u8::MAX, Easing::Trigonometric)
    }

    /// Interpolate a value over time, delivering it once per normal frame
    ///
    /// Timing starts on the first frame after this call. The callback gets
    /// `to` exactly on the last frame and is then dropped.
    pub fn interpolate(
        &mut self,
        from: f32,
        to: f32,
        duration: Duration,
        easing: Easing,
        callback: impl FnMut(f32) + 'static,
    ) -> TweenId {
        self.tweens.add(Tween::new(
            from,
            to,
            duration,
            easing,
            TweenTarget::Callback(Box::new(callback)),
        ))
    }

    /// Stop a running interpolation or fade
    pub fn cancel_tween(&mut self, id: TweenId) -> bool {
        self.tweens.cancel(id)
    }

    /// Number of running interpolations and fades
    pub fn active_tweens(&self) -> usize {
        self.tweens.len()
    }

    /// Render one capture-only frame and write its profile to `path`
    ///
    /// With `gpu_inclusive`, every event boundary waits for the GPU, so the
    /// times include GPU work at the cost of a much slower frame.
    pub fn log_frame(&mut self, path: impl AsRef<Path>, gpu_inclusive: bool) -> RenderResult<()> {
        self.pending_log = Some(FrameLogRequest {
            path: path.as_ref().to_path_buf(),
            gpu_inclusive,
        });
        let result = self.render(Duration::ZERO, true);
        if self.pending_log.take().is_some() {
            log::warn!("Nothing was rendered, frame log skipped");
        }
        result
    }

    /// Render one capture-only frame and read back the result
    pub fn screenshot(&mut self) -> RenderResult<image::RgbaImage> {
        self.render(Duration::ZERO, true)?;
        let capture = self.manager.device_mut().read_back_buffer()?;
        image::RgbaImage::from_raw(capture.width, capture.height, capture.pixels).ok_or_else(|| {
            RenderError::Screenshot(format!(
                "back buffer does not hold {}x{} pixels",
                capture.width, capture.height
            ))
        })
    }

    /// Take a screenshot and save it as PNG
    pub fn save_screenshot(&mut self, path: impl AsRef<Path>) -> RenderResult<()> {
        let path = path.as_ref();
        let shot = self.screenshot()?;
        shot.save_with_format(path, image::ImageFormat::Png)
            .map_err(|err| RenderError::Screenshot(err.to_string()))?;
        log::info!("Screenshot saved to {}", path.display());
        Ok(())
    }

    /// Color the back buffer is cleared to
    pub fn set_clear_color(&mut self, color: Color) {
        self.clear_color = color;
    }

    /// Shader model in effect: the adapter's, lowered by a forced override
    pub fn shader_model(&self) -> ShaderModel {
        self.shader_model
    }

    /// Adapter capabilities
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Tier the device was created with
    pub fn vertex_processing(&self) -> VertexProcessing {
        self.manager.vertex_processing()
    }

    /// The device
    pub fn device_mut(&mut self) -> &mut dyn GraphicsDevice {
        self.manager.device_mut()
    }

    /// Cached render states
    pub fn render_states(&self) -> &RenderStateSnapshot {
        self.resources.states.snapshot()
    }

    /// Sampler setup re-applied after every reset
    pub fn texture_filter(&self) -> TextureFilterSetup {
        self.resources.texture_filter
    }

    /// Terrain shader cache
    pub fn terrain_shaders(&self) -> &TerrainShaderCache {
        &self.resources.shaders
    }

    /// Frames rendered since construction
    pub fn total_frames(&self) -> u64 {
        self.timing.total_frames()
    }

    /// Seconds accumulated since construction
    pub fn total_time(&self) -> f64 {
        self.timing.total_time()
    }

    /// Seconds the last frame took
    pub fn this_frame_time(&self) -> f64 {
        self.timing.this_frame_time()
    }

    /// Smoothed frames per second
    pub fn fps(&self) -> f32 {
        self.timing.fps()
    }

    /// Smoothed milliseconds per frame
    pub fn frame_ms(&self) -> f32 {
        self.timing.frame_ms()
    }

    /// Whether a device reset is pending
    pub fn needs_reset(&self) -> bool {
        self.manager.needs_reset()
    }

    /// Device lifecycle state
    pub fn device_state(&self) -> DeviceState {
        self.manager.state()
    }

    /// Whether [`Engine::dispose`] ran
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Shut down in reverse order of acquisition
    ///
    /// Views are disposed last-added first, then the shader cache, then the
    /// back buffer and the device. Calling this again does nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.window.clip_cursor(None);
        self.extra_render = None;
        self.frame_events.clear();
        self.tweens = TweenSet::new();
        self.reset_queue.clear();
        let _ = self.profiler.finish_frame();

        self.resources.dispose(self.manager.device_mut());
        self.manager.dispose();
        log::info!("Engine disposed after {} frames", self.timing.total_frames());
    }

    fn start_fade(&mut self, from: u8, to: u8, easing: Easing) -> TweenId {
        self.tweens.cancel_fades();
        self.tweens.add(Tween::fade(from, to, FADE_DURATION, easing))
    }

    // A resized window needs a back buffer of the new size
    fn sync_render_area(&mut self) {
        if self.config.fullscreen {
            return;
        }
        let (width, height) = self.window.render_area().size();
        let present = self.manager.present_parameters();
        if width == 0 || height == 0 || (width, height) == (present.back_buffer_width, present.back_buffer_height) {
            return;
        }
        let resized = PresentParameters::from_config(&self.config, (width, height));
        self.manager.set_present_parameters(resized);
    }

    fn reset_device(&mut self) -> RenderResult<()> {
        let policy = ResetPolicy::from_config(&self.config);
        self.manager
            .reset(self.window.as_mut(), &policy, &mut self.resources)?;
        self.timing.reset_window();
        Ok(())
    }

    fn render_frame(&mut self, no_present: bool) -> RenderResult<()> {
        let device = self.manager.device_mut();
        device.clear(self.clear_color)?;
        device.begin_scene()?;
        let drawn = self.draw_scene();
        let ended = self.manager.device_mut().end_scene();
        drawn?;
        ended?;

        if !no_present {
            let Self { manager, profiler, .. } = self;
            profiler.begin_event("Present", manager.device_mut())?;
            let presented = manager.device_mut().present();
            profiler.end_event(manager.device_mut())?;
            presented?;
        }
        Ok(())
    }

    fn draw_scene(&mut self) -> RenderResult<()> {
        let Self {
            manager,
            capabilities,
            shader_model,
            resources,
            profiler,
            extra_render,
            fade_level,
            fade_extra,
            ..
        } = self;
        let EngineResources { states, shaders, views, .. } = resources;
        let mut context = RenderContext {
            device: manager.device_mut(),
            states,
            shaders,
            profiler,
            capabilities,
            shader_model: *shader_model,
        };

        context.event("Views", |context| {
            for view in views.iter_mut().filter(|view| view.is_visible()) {
                render_view(context, view.as_mut())?;
            }
            Ok(())
        })?;

        let fade_alpha = u8::MAX - *fade_level;
        if *fade_extra {
            draw_extra(&mut context, extra_render)?;
            draw_fade(&mut context, fade_alpha)?;
        } else {
            draw_fade(&mut context, fade_alpha)?;
            draw_extra(&mut context, extra_render)?;
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        log::error!("Engine dropped without dispose(), releasing device resources now");
        self.dispose();
        if cfg!(debug_assertions) && !std::thread::panicking() {
            panic!("Engine dropped without dispose()");
        }
    }
}

fn draw_fade(context: &mut RenderContext<'_>, alpha: u8) -> RenderResult<()> {
    if alpha == 0 {
        return Ok(());
    }
    context.event("Fade", |context| {
        context.states.set_zbuffer_mode(&mut *context.device, ZBufferMode::Off)?;
        context
            .states
            .set_alpha_blend(&mut *context.device, AlphaBlend::AlphaChannel)?;
        context.device.draw_fullscreen_quad(Color::argb(alpha, 0, 0, 0))?;
        Ok(())
    })
}

fn draw_extra(context: &mut RenderContext<'_>, extra: &mut Option<ExtraRender>) -> RenderResult<()> {
    match extra {
        Some(extra) => context.event("Extra", |context| extra(context)),
        None => Ok(()),
    }
}

fn select_shader_model(capabilities: &Capabilities, forced: Option<ShaderModel>) -> ShaderModel {
    let supported = capabilities.shader_model();
    match forced {
        Some(forced) if forced < supported => {
            log::info!("Shader model forced down from {supported:?} to {forced:?}");
            forced
        }
        _ => supported,
    }
}

fn select_texture_filter(capabilities: &Capabilities, config: &EngineConfig) -> TextureFilterSetup {
    let stages = capabilities.max_simultaneous_textures;
    if !capabilities.supports_linear_filtering() {
        log::warn!("Linear texture filtering not supported, falling back to point filtering");
        return TextureFilterSetup {
            filter: TextureFilter::Point,
            mip_filter: TextureFilter::Point,
            max_anisotropy: 1,
            stages,
        };
    }

    let mip_filter = if capabilities.filters.contains(FilterCaps::MIP_LINEAR) {
        TextureFilter::Linear
    } else {
        TextureFilter::Point
    };
    if config.anisotropic_filtering {
        if capabilities.supports_anisotropic_filtering() {
            return TextureFilterSetup {
                filter: TextureFilter::Anisotropic,
                mip_filter,
                max_anisotropy: capabilities.max_anisotropy,
                stages,
            };
        }
        log::warn!("Anisotropic filtering requested but not supported, using linear filtering");
    }
    TextureFilterSetup {
        filter: TextureFilter::Linear,
        mip_filter,
        max_anisotropy: 1,
        stages,
    }
}
