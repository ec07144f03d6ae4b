//! Headless device
//!
//! A [`GraphicsDevice`] that renders nothing. It keeps a log of calls, a
//! one-color "back buffer" and a script of cooperative levels, which is
//! enough to drive the reset state machine and the frame loop end to end.
//! A [`HeadlessProbe`] shares the device's state so callers can inspect a
//! device after handing it to the engine.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::foundation::math::{Color, Mat4, Plane};
use crate::render::api::{
    Capabilities, CooperativeLevel, DeviceError, DeviceFactory, DeviceResult, FrameCapture,
    GraphicsDevice, PipelineSync, PresentParameters, RenderState, SamplerState, ShaderHandle,
    SurfaceHandle, TransformKind, VertexProcessing, Viewport,
};

/// A recorded device call
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    /// `reset`
    Reset(PresentParameters),
    /// `acquire_back_buffer`
    AcquireBackBuffer(SurfaceHandle),
    /// `release_surface`
    ReleaseSurface(SurfaceHandle),
    /// `set_viewport`
    SetViewport(Viewport),
    /// `begin_scene`
    BeginScene,
    /// `end_scene`
    EndScene,
    /// `clear`
    Clear(Color),
    /// `present`
    Present,
    /// `set_render_state`
    RenderState(RenderState),
    /// `set_transform`
    Transform(TransformKind, Mat4),
    /// `set_clip_plane`
    ClipPlane(u32, Plane),
    /// `set_sampler_state`
    Sampler(u32, SamplerState),
    /// `draw_fullscreen_quad`
    FullscreenQuad(Color),
    /// `draw_indexed`
    Draw(Option<ShaderHandle>, u32),
    /// `create_terrain_shader`
    CreateShader {
        /// Lighting variant
        lighting: bool,
        /// Active texture layers
        layers: Vec<u32>,
        /// Returned handle
        handle: ShaderHandle,
    },
    /// `shader_lost`
    ShaderLost(ShaderHandle),
    /// `shader_reset`
    ShaderReset(ShaderHandle),
    /// `release_shader`
    ReleaseShader(ShaderHandle),
    /// `issue_flush_query`
    FlushQuery,
    /// `dispose`
    Dispose,
}

/// Calls that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `reset`
    Reset,
    /// `begin_scene`
    BeginScene,
    /// `draw_indexed` and `draw_fullscreen_quad`
    Draw,
    /// `present`
    Present,
    /// `create_terrain_shader`
    CreateShader,
    /// `issue_flush_query`
    Flush,
    /// `set_render_state`
    RenderState,
}

#[derive(Debug)]
struct HeadlessState {
    calls: Vec<DeviceCall>,
    levels: VecDeque<CooperativeLevel>,
    failures: HashMap<FailPoint, DeviceError>,
    params: PresentParameters,
    viewport: Viewport,
    next_handle: u64,
    live_surfaces: HashSet<SurfaceHandle>,
    live_shaders: HashSet<ShaderHandle>,
    shaders_created: usize,
    resets: usize,
    flush_polls: u32,
    flush_polls_remaining: u32,
    scene_open: bool,
    surface_rgba: [u8; 4],
    created_with: Vec<VertexProcessing>,
    disposed: bool,
}

impl HeadlessState {
    fn new(params: PresentParameters) -> Self {
        let viewport = Viewport::full(params.back_buffer_width, params.back_buffer_height);
        Self {
            calls: Vec::new(),
            levels: VecDeque::new(),
            failures: HashMap::new(),
            params,
            viewport,
            next_handle: 1,
            live_surfaces: HashSet::new(),
            live_shaders: HashSet::new(),
            shaders_created: 0,
            resets: 0,
            flush_polls: 0,
            flush_polls_remaining: 0,
            scene_open: false,
            surface_rgba: [0, 0, 0, 255],
            created_with: Vec::new(),
            disposed: false,
        }
    }

    fn handle(&mut self) -> u64 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn check(&mut self, point: FailPoint) -> DeviceResult<()> {
        self.failures.remove(&point).map_or(Ok(()), Err)
    }

    fn blend_over(&mut self, color: Color) {
        let alpha = u32::from(color.a);
        let mix = |src: u8, dst: u8| {
            let value = (u32::from(src) * alpha + u32::from(dst) * (255 - alpha)) / 255;
            u8::try_from(value).unwrap_or(u8::MAX)
        };
        let [r, g, b, a] = self.surface_rgba;
        self.surface_rgba = [mix(color.r, r), mix(color.g, g), mix(color.b, b), a];
    }
}

fn default_params() -> PresentParameters {
    PresentParameters::from_config(&crate::core::config::EngineConfig::default(), (800, 600))
}

/// Shared view into a headless device's state
#[derive(Debug, Clone)]
pub struct HeadlessProbe {
    state: Rc<RefCell<HeadlessState>>,
}

impl Default for HeadlessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessProbe {
    /// Create state for a device that does not exist yet
    pub fn new() -> Self {
        Self { state: Rc::new(RefCell::new(HeadlessState::new(default_params()))) }
    }

    /// Drain the call log
    pub fn take_calls(&self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.state.borrow_mut().calls)
    }

    /// Copy of the call log
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.borrow().calls.clone()
    }

    /// Queue results for upcoming cooperative-level queries; `Ok` once exhausted
    pub fn script_cooperative_levels(&self, levels: impl IntoIterator<Item = CooperativeLevel>) {
        self.state.borrow_mut().levels.extend(levels);
    }

    /// Make the next call at `point` fail with `error`
    pub fn fail_next(&self, point: FailPoint, error: DeviceError) {
        self.state.borrow_mut().failures.insert(point, error);
    }

    /// Number of polls a flush query needs before completing
    pub fn set_flush_latency(&self, polls: u32) {
        self.state.borrow_mut().flush_polls = polls;
    }

    /// Number of shaders compiled so far
    pub fn shaders_created(&self) -> usize {
        self.state.borrow().shaders_created
    }

    /// Number of shaders not yet released
    pub fn live_shaders(&self) -> usize {
        self.state.borrow().live_shaders.len()
    }

    /// Number of surfaces not yet released
    pub fn live_surfaces(&self) -> usize {
        self.state.borrow().live_surfaces.len()
    }

    /// Number of successful resets
    pub fn resets(&self) -> usize {
        self.state.borrow().resets
    }

    /// Parameters of the last creation or reset
    pub fn present_parameters(&self) -> PresentParameters {
        self.state.borrow().params.clone()
    }

    /// Vertex-processing tiers devices were created with
    pub fn created_with(&self) -> Vec<VertexProcessing> {
        self.state.borrow().created_with.clone()
    }

    /// Whether `dispose` ran
    pub fn is_disposed(&self) -> bool {
        self.state.borrow().disposed
    }
}

/// Device that records calls instead of rendering
#[derive(Debug)]
pub struct HeadlessDevice {
    state: Rc<RefCell<HeadlessState>>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Create a standalone device with default parameters
    pub fn new() -> Self {
        Self::with_probe(&HeadlessProbe::new(), &default_params())
    }

    /// Create a device whose state is shared with `probe`
    pub fn with_probe(probe: &HeadlessProbe, params: &PresentParameters) -> Self {
        {
            let mut state = probe.state.borrow_mut();
            state.params = params.clone();
            state.viewport = Viewport::full(params.back_buffer_width, params.back_buffer_height);
            state.disposed = false;
        }
        Self { state: Rc::clone(&probe.state) }
    }

    /// Probe sharing this device's state
    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe { state: Rc::clone(&self.state) }
    }

    /// Drain the call log
    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.state.borrow_mut().calls)
    }

    fn record(&self, call: DeviceCall) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl PipelineSync for HeadlessDevice {
    fn issue_flush_query(&mut self) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        state.check(FailPoint::Flush)?;
        state.flush_polls_remaining = state.flush_polls;
        state.calls.push(DeviceCall::FlushQuery);
        Ok(())
    }

    fn is_flush_complete(&mut self) -> DeviceResult<bool> {
        let mut state = self.state.borrow_mut();
        if state.flush_polls_remaining == 0 {
            return Ok(true);
        }
        state.flush_polls_remaining -= 1;
        Ok(false)
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn cooperative_level(&mut self) -> CooperativeLevel {
        self.state.borrow_mut().levels.pop_front().unwrap_or(CooperativeLevel::Ok)
    }

    fn reset(&mut self, params: &PresentParameters) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        state.check(FailPoint::Reset)?;
        state.params = params.clone();
        state.viewport = Viewport::full(params.back_buffer_width, params.back_buffer_height);
        state.scene_open = false;
        state.resets += 1;
        state.calls.push(DeviceCall::Reset(params.clone()));
        Ok(())
    }

    fn acquire_back_buffer(&mut self) -> DeviceResult<SurfaceHandle> {
        let mut state = self.state.borrow_mut();
        let surface = SurfaceHandle(state.handle());
        state.live_surfaces.insert(surface);
        state.calls.push(DeviceCall::AcquireBackBuffer(surface));
        Ok(surface)
    }

    fn release_surface(&mut self, surface: SurfaceHandle) {
        let mut state = self.state.borrow_mut();
        state.live_surfaces.remove(&surface);
        state.calls.push(DeviceCall::ReleaseSurface(surface));
    }

    fn viewport(&self) -> Viewport {
        self.state.borrow().viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        state.viewport = viewport;
        state.calls.push(DeviceCall::SetViewport(viewport));
        Ok(())
    }

    fn begin_scene(&mut self) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        state.check(FailPoint::BeginScene)?;
        if state.scene_open {
            return Err(DeviceError::InvalidData("begin_scene inside an open scene".to_string()));
        }
        state.scene_open = true;
        state.calls.push(DeviceCall::BeginScene);
        Ok(())
    }

    fn end_scene(&mut self) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.scene_open {
            return Err(DeviceError::InvalidData("end_scene without begin_scene".to_string()));
        }
        state.scene_open = false;
        state.calls.push(DeviceCall::EndScene);
        Ok(())
    }

    fn clear(&mut self, color: Color) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        state.surface_rgba = [color.r, color.g, color.b, color.a];
        state.calls.push(DeviceCall::Clear(color));
        Ok(())
    }

    fn present(&mut self) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        state.check(FailPoint::Present)?;
        state.calls.push(DeviceCall::Present);
        Ok(())
    }

    fn set_render_state(&mut self, render_state: RenderState) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        state.check(FailPoint::RenderState)?;
        state.calls.push(DeviceCall::RenderState(render_state));
        Ok(())
    }

    fn set_transform(&mut self, kind: TransformKind, matrix: &Mat4) -> DeviceResult<()> {
        self.record(DeviceCall::Transform(kind, *matrix));
        Ok(())
    }

    fn set_clip_plane(&mut self, index: u32, plane: &Plane) -> DeviceResult<()> {
        self.record(DeviceCall::ClipPlane(index, *plane));
        Ok(())
    }

    fn set_sampler_state(&mut self, stage: u32, sampler: SamplerState) -> DeviceResult<()> {
        self.record(DeviceCall::Sampler(stage, sampler));
        Ok(())
    }

    fn draw_fullscreen_quad(&mut self, color: Color) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        state.check(FailPoint::Draw)?;
        state.blend_over(color);
        state.calls.push(DeviceCall::FullscreenQuad(color));
        Ok(())
    }

    fn draw_indexed(&mut self, shader: Option<ShaderHandle>, primitive_count: u32) -> DeviceResult<()> {
        let mut state = self.state.borrow_mut();
        state.check(FailPoint::Draw)?;
        if let Some(shader) = shader {
            if !state.live_shaders.contains(&shader) {
                return Err(DeviceError::InvalidData(format!("draw with released shader {shader:?}")));
            }
        }
        state.calls.push(DeviceCall::Draw(shader, primitive_count));
        Ok(())
    }

    fn create_terrain_shader(&mut self, lighting: bool, layers: &[u32]) -> DeviceResult<ShaderHandle> {
        let mut state = self.state.borrow_mut();
        state.check(FailPoint::CreateShader)?;
        let handle = ShaderHandle(state.handle());
        state.live_shaders.insert(handle);
        state.shaders_created += 1;
        state.calls.push(DeviceCall::CreateShader { lighting, layers: layers.to_vec(), handle });
        Ok(handle)
    }

    fn shader_lost(&mut self, shader: ShaderHandle) {
        self.record(DeviceCall::ShaderLost(shader));
    }

    fn shader_reset(&mut self, shader: ShaderHandle) -> DeviceResult<()> {
        self.record(DeviceCall::ShaderReset(shader));
        Ok(())
    }

    fn release_shader(&mut self, shader: ShaderHandle) {
        let mut state = self.state.borrow_mut();
        state.live_shaders.remove(&shader);
        state.calls.push(DeviceCall::ReleaseShader(shader));
    }

    fn read_back_buffer(&mut self) -> DeviceResult<FrameCapture> {
        let state = self.state.borrow();
        let (width, height) = (state.params.back_buffer_width, state.params.back_buffer_height);
        let pixel_count = width as usize * height as usize;
        let pixels = state.surface_rgba.iter().copied().cycle().take(pixel_count * 4).collect();
        Ok(FrameCapture { width, height, pixels })
    }

    fn dispose(&mut self) {
        let mut state = self.state.borrow_mut();
        state.disposed = true;
        state.calls.push(DeviceCall::Dispose);
    }
}

/// Factory handing out headless devices that share one probe
pub struct HeadlessDeviceFactory {
    capabilities: Capabilities,
    refused: Vec<VertexProcessing>,
    probe: HeadlessProbe,
}

impl Default for HeadlessDeviceFactory {
    fn default() -> Self {
        Self::new(Capabilities::sm20())
    }
}

impl HeadlessDeviceFactory {
    /// Create a factory reporting the given capabilities
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            refused: Vec::new(),
            probe: HeadlessProbe::new(),
        }
    }

    /// Fail device creation for a tier even though the caps allow it
    pub fn refuse_tier(mut self, tier: VertexProcessing) -> Self {
        self.refused.push(tier);
        self
    }

    /// Probe shared by every device this factory creates
    pub fn probe(&self) -> HeadlessProbe {
        self.probe.clone()
    }
}

impl DeviceFactory for HeadlessDeviceFactory {
    fn capabilities(&self, adapter: u32) -> DeviceResult<Capabilities> {
        if adapter != 0 {
            return Err(DeviceError::Unsupported(format!("adapter {adapter} does not exist")));
        }
        Ok(self.capabilities.clone())
    }

    fn create_device(
        &mut self,
        adapter: u32,
        processing: VertexProcessing,
        params: &PresentParameters,
    ) -> DeviceResult<Box<dyn GraphicsDevice>> {
        if adapter != 0 {
            return Err(DeviceError::Unsupported(format!("adapter {adapter} does not exist")));
        }
        if self.refused.contains(&processing) {
            return Err(DeviceError::Unsupported(format!("{processing:?} vertex processing refused")));
        }
        self.probe.state.borrow_mut().created_with.push(processing);
        Ok(Box::new(HeadlessDevice::with_probe(&self.probe, params)))
    }
}
