//! Whole-loop tests for the engine against the headless backend

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::core::{EngineConfig, ShaderModel};
use crate::events::{DeviceListener, FrameEvent};
use crate::foundation::math::Color;
use crate::foundation::time::ManualClock;
use crate::render::api::{
    CooperativeLevel, DeviceError, GraphicsDevice, RenderState, SamplerState, ShaderHandle,
};
use crate::render::backends::headless::{DeviceCall, FailPoint, HeadlessDeviceFactory, HeadlessProbe};
use crate::render::frame::Easing;
use crate::render::reset_queue::Resettable;
use crate::render::state::{CullMode, TextureFilter};
use crate::render::view::{RenderContext, View};
use crate::render::window::{HeadlessWindow, ScreenRect};
use crate::render::{DeviceState, RenderError, RenderResult};
use crate::{Engine, EngineError};

const FRAME: Duration = Duration::from_millis(20);

type Journal = Rc<RefCell<Vec<String>>>;

fn note(journal: &Journal, entry: impl Into<String>) {
    journal.borrow_mut().push(entry.into());
}

struct Harness {
    engine: Engine,
    probe: HeadlessProbe,
    window: HeadlessWindow,
    clock: ManualClock,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let mut factory = HeadlessDeviceFactory::default();
        let probe = factory.probe();
        let window = HeadlessWindow::new(64, 48);
        let clock = ManualClock::new();
        let engine = Engine::new(
            config,
            &mut factory,
            Box::new(window.clone()),
            Box::new(clock.clone()),
        )
        .unwrap();
        probe.take_calls();
        Self {
            engine,
            probe,
            window,
            clock,
        }
    }

    fn frame(&mut self) -> RenderResult<()> {
        self.engine.render(FRAME, false)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.engine.dispose();
    }
}

type RenderFn = Box<dyn FnMut(&mut RenderContext<'_>) -> RenderResult<()>>;

struct TestView {
    name: &'static str,
    journal: Journal,
    render: RenderFn,
}

impl View for TestView {
    fn name(&self) -> &str {
        self.name
    }

    fn render(&mut self, context: &mut RenderContext<'_>) -> RenderResult<()> {
        (self.render)(context)
    }

    fn dispose(&mut self, _device: &mut dyn GraphicsDevice) {
        note(&self.journal, format!("dispose {}", self.name));
    }
}

fn view(
    name: &'static str,
    journal: &Journal,
    render: impl FnMut(&mut RenderContext<'_>) -> RenderResult<()> + 'static,
) -> Box<dyn View> {
    Box::new(TestView {
        name,
        journal: journal.clone(),
        render: Box::new(render),
    })
}

fn journaling_view(name: &'static str, journal: &Journal) -> Box<dyn View> {
    let log = journal.clone();
    view(name, journal, move |_| {
        note(&log, name);
        Ok(())
    })
}

struct Recorder {
    journal: Journal,
}

impl DeviceListener for Recorder {
    fn on_device_lost(&mut self, _device: &mut dyn GraphicsDevice) {
        note(&self.journal, "lost");
    }

    fn on_device_reset(&mut self, _device: &mut dyn GraphicsDevice) -> RenderResult<()> {
        note(&self.journal, "reset");
        Ok(())
    }
}

struct Rebuild {
    journal: Journal,
}

impl Resettable for Rebuild {
    fn reset(&mut self) {
        note(&self.journal, "rebuild");
    }
}

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("omega_engine_tests_{}", std::process::id()))
        .join(name)
}

#[test]
fn test_plain_frame_call_sequence() {
    let mut h = Harness::new();
    h.frame().unwrap();

    assert_eq!(
        h.probe.take_calls(),
        vec![
            DeviceCall::Clear(Color::BLACK),
            DeviceCall::BeginScene,
            DeviceCall::EndScene,
            DeviceCall::Present,
        ]
    );
    assert_eq!(h.engine.total_frames(), 1);
}

#[test]
fn test_frame_step_order() {
    let mut h = Harness::new();
    let journal = Journal::default();

    let pre = journal.clone();
    h.engine
        .on_frame_event(FrameEvent::PreRender, Box::new(move || note(&pre, "pre")));
    let post = journal.clone();
    h.engine
        .on_frame_event(FrameEvent::PostRender, Box::new(move || note(&post, "post")));
    h.engine.add_view(journaling_view("first", &journal));
    h.engine.add_view(journaling_view("second", &journal));
    let extra = journal.clone();
    h.engine.set_extra_render(Some(Box::new(move |_| {
        note(&extra, "extra");
        Ok(())
    })));

    h.frame().unwrap();
    assert_eq!(*journal.borrow(), vec!["pre", "first", "second", "extra", "post"]);

    journal.borrow_mut().clear();
    h.probe.take_calls();
    h.engine.render(FRAME, true).unwrap();
    assert_eq!(*journal.borrow(), vec!["first", "second", "extra"]);
    assert!(!h.probe.take_calls().contains(&DeviceCall::Present));
}

#[test]
fn test_hidden_view_is_skipped() {
    struct Hidden;

    impl View for Hidden {
        fn name(&self) -> &str {
            "hidden"
        }

        fn is_visible(&self) -> bool {
            false
        }

        fn render(&mut self, context: &mut RenderContext<'_>) -> RenderResult<()> {
            context.device.draw_indexed(None, 1)?;
            Ok(())
        }
    }

    let mut h = Harness::new();
    h.engine.add_view(Box::new(Hidden));
    h.frame().unwrap();
    assert!(!h
        .probe
        .take_calls()
        .iter()
        .any(|call| matches!(call, DeviceCall::Draw(..))));
}

#[test]
fn test_fade_in_composites_black_quad() {
    let mut h = Harness::new();
    h.engine.fade_in();

    h.frame().unwrap();
    assert_eq!(h.engine.fade_level(), 0);
    assert!(h
        .probe
        .take_calls()
        .contains(&DeviceCall::FullscreenQuad(Color::argb(255, 0, 0, 0))));

    h.clock.advance(Duration::from_millis(500));
    h.frame().unwrap();
    assert_eq!(h.engine.fade_level(), 128);
    assert!(h
        .probe
        .take_calls()
        .contains(&DeviceCall::FullscreenQuad(Color::argb(127, 0, 0, 0))));

    h.clock.advance(Duration::from_millis(500));
    h.frame().unwrap();
    assert_eq!(h.engine.fade_level(), 255);
    assert_eq!(h.engine.active_tweens(), 0);
    assert!(!h
        .probe
        .take_calls()
        .iter()
        .any(|call| matches!(call, DeviceCall::FullscreenQuad(_))));
}

#[test]
fn test_dim_down_and_up() {
    let mut h = Harness::new();
    h.engine.dim_down();
    h.frame().unwrap();
    h.clock.advance(Duration::from_secs(2));
    h.frame().unwrap();
    assert_eq!(h.engine.fade_level(), crate::DIM_LEVEL);

    h.engine.dim_up();
    h.frame().unwrap();
    h.clock.advance(Duration::from_secs(1));
    h.frame().unwrap();
    assert_eq!(h.engine.fade_level(), 255);
}

#[test]
fn test_fade_extra_controls_overlay_order() {
    let mut h = Harness::new();
    h.engine.set_fade_level(100);
    h.engine.set_extra_render(Some(Box::new(|context| {
        context.device.draw_fullscreen_quad(Color::WHITE)?;
        Ok(())
    })));
    let quads = |calls: Vec<DeviceCall>| -> Vec<Color> {
        calls
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::FullscreenQuad(color) => Some(color),
                _ => None,
            })
            .collect()
    };
    let fade = Color::argb(155, 0, 0, 0);

    h.frame().unwrap();
    assert_eq!(quads(h.probe.take_calls()), vec![fade, Color::WHITE]);

    h.engine.set_fade_extra(true);
    h.frame().unwrap();
    assert_eq!(quads(h.probe.take_calls()), vec![Color::WHITE, fade]);
}

#[test]
fn test_interpolate_reaches_target_then_stops() {
    let mut h = Harness::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    h.engine.interpolate(0.0, 100.0, Duration::from_secs(1), Easing::Linear, move |value| {
        sink.borrow_mut().push(value);
    });

    h.frame().unwrap();
    // Capture-only frames do not advance tweens
    h.engine.render(Duration::ZERO, true).unwrap();
    h.clock.advance(Duration::from_secs(1));
    h.frame().unwrap();
    h.clock.advance(Duration::from_secs(1));
    h.frame().unwrap();

    assert_eq!(*seen.borrow(), vec![0.0, 100.0]);
    assert_eq!(h.engine.active_tweens(), 0);
}

#[test]
fn test_cancelled_tween_stops_delivering() {
    let mut h = Harness::new();
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let id = h.engine.interpolate(0.0, 1.0, Duration::from_secs(1), Easing::Trigonometric, move |_| {
        counter.set(counter.get() + 1);
    });

    h.frame().unwrap();
    assert!(h.engine.cancel_tween(id));
    h.frame().unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_reset_queue_drains_before_pre_render() {
    let mut h = Harness::new();
    let journal = Journal::default();
    let pre = journal.clone();
    h.engine
        .on_frame_event(FrameEvent::PreRender, Box::new(move || note(&pre, "pre")));

    let target = Rc::new(RefCell::new(Rebuild {
        journal: journal.clone(),
    }));
    assert!(h.engine.queue_reset(target.clone()));
    assert!(!h.engine.queue_reset(target.clone()));

    h.frame().unwrap();
    h.frame().unwrap();
    assert_eq!(*journal.borrow(), vec!["rebuild", "pre", "pre"]);
}

#[test]
fn test_device_loss_resets_within_frame() {
    let mut h = Harness::new();
    let journal = Journal::default();
    h.engine.add_device_listener(Rc::new(RefCell::new(Recorder {
        journal: journal.clone(),
    })));

    h.probe
        .script_cooperative_levels([CooperativeLevel::Lost, CooperativeLevel::Lost, CooperativeLevel::NotReset]);
    h.frame().unwrap();

    assert_eq!(h.probe.resets(), 1);
    assert_eq!(h.window.yields(), 1);
    assert_eq!(*journal.borrow(), vec!["lost", "reset"]);
    assert_eq!(h.engine.device_state(), DeviceState::Active);
    assert!(!h.engine.needs_reset());
    assert!(h.probe.take_calls().contains(&DeviceCall::Present));
}

struct RebuildingView {
    name: &'static str,
    journal: Journal,
    failures: u32,
}

impl View for RebuildingView {
    fn name(&self) -> &str {
        self.name
    }

    fn render(&mut self, _context: &mut RenderContext<'_>) -> RenderResult<()> {
        Ok(())
    }

    fn on_device_lost(&mut self, _device: &mut dyn GraphicsDevice) {
        note(&self.journal, format!("{} lost", self.name));
    }

    fn on_device_reset(&mut self, _device: &mut dyn GraphicsDevice) -> RenderResult<()> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(DeviceError::DeviceLost.into());
        }
        note(&self.journal, format!("{} reset", self.name));
        Ok(())
    }
}

#[test]
fn test_view_failing_to_rebuild_is_retried_next_frame() {
    let mut h = Harness::new();
    let journal = Journal::default();
    for (name, failures) in [("steady", 0), ("flaky", 1)] {
        h.engine.add_view(Box::new(RebuildingView {
            name,
            journal: journal.clone(),
            failures,
        }));
    }
    h.engine.add_device_listener(Rc::new(RefCell::new(Recorder {
        journal: journal.clone(),
    })));

    h.probe.script_cooperative_levels([CooperativeLevel::NotReset]);
    h.frame().unwrap();
    assert!(h.engine.needs_reset());
    assert_eq!(
        *journal.borrow(),
        vec!["steady lost", "flaky lost", "lost", "steady reset", "steady lost"]
    );

    journal.borrow_mut().clear();
    h.frame().unwrap();
    assert!(!h.engine.needs_reset());
    assert_eq!(*journal.borrow(), vec!["steady reset", "flaky reset", "reset"]);
    assert_eq!(h.probe.resets(), 2);
    assert_eq!(h.probe.live_surfaces(), 1);
}

#[test]
fn test_state_cache_reapplies_after_reset() {
    let mut h = Harness::new();
    let journal = Journal::default();
    h.engine.add_view(view("cull", &journal, |context| {
        context.states.set_cull_mode(&mut *context.device, CullMode::None)?;
        Ok(())
    }));
    fn cull_calls(calls: &[DeviceCall]) -> usize {
        calls
            .iter()
            .filter(|call| **call == DeviceCall::RenderState(RenderState::CullMode(CullMode::None)))
            .count()
    }

    h.frame().unwrap();
    assert_eq!(cull_calls(&h.probe.take_calls()), 1);
    h.frame().unwrap();
    assert_eq!(cull_calls(&h.probe.take_calls()), 0);

    h.probe.script_cooperative_levels([CooperativeLevel::NotReset]);
    h.frame().unwrap();
    let calls = h.probe.take_calls();
    assert_eq!(cull_calls(&calls), 1);
    assert!(calls.contains(&DeviceCall::Sampler(0, SamplerState::MinFilter(TextureFilter::Linear))));
    assert_eq!(h.engine.render_states().texture_filter, h.engine.texture_filter());
}

#[test]
fn test_loss_during_present_is_absorbed() {
    let mut h = Harness::new();
    let posts = Rc::new(Cell::new(0));
    let counter = posts.clone();
    h.engine.on_frame_event(
        FrameEvent::PostRender,
        Box::new(move || counter.set(counter.get() + 1)),
    );

    h.probe.fail_next(FailPoint::Present, DeviceError::DeviceLost);
    h.frame().unwrap();
    assert!(h.engine.needs_reset());
    assert_eq!(posts.get(), 1);

    h.frame().unwrap();
    assert_eq!(h.probe.resets(), 1);
    assert!(!h.engine.needs_reset());
}

#[test]
fn test_invalid_data_is_wrapped() {
    let mut h = Harness::new();
    let journal = Journal::default();
    h.engine.add_view(view("draw", &journal, |context| {
        context.device.draw_indexed(None, 4)?;
        Ok(())
    }));
    let posts = Rc::new(Cell::new(0));
    let counter = posts.clone();
    h.engine.on_frame_event(
        FrameEvent::PostRender,
        Box::new(move || counter.set(counter.get() + 1)),
    );

    h.probe
        .fail_next(FailPoint::Draw, DeviceError::InvalidData("broken index buffer".to_string()));
    let err = h.frame().unwrap_err();
    assert!(matches!(
        err,
        RenderError::InvalidData { source: DeviceError::InvalidData(_) }
    ));
    assert_eq!(posts.get(), 0);

    // The scene was closed, so the next frame renders normally
    h.frame().unwrap();
    assert_eq!(posts.get(), 1);
}

#[test]
fn test_released_shader_draw_is_invalid_data() {
    let mut h = Harness::new();
    let journal = Journal::default();
    h.engine.add_view(view("stale", &journal, |context| {
        context.device.draw_indexed(Some(ShaderHandle(9_999)), 4)?;
        Ok(())
    }));
    assert!(matches!(h.frame(), Err(RenderError::InvalidData { .. })));
}

#[test]
fn test_other_device_errors_propagate() {
    let mut h = Harness::new();
    h.probe.fail_next(FailPoint::BeginScene, DeviceError::OutOfVideoMemory);
    assert!(matches!(
        h.frame(),
        Err(RenderError::Device(DeviceError::OutOfVideoMemory))
    ));
}

#[test]
fn test_driver_failure_is_fatal() {
    let mut h = Harness::new();
    h.probe
        .script_cooperative_levels([CooperativeLevel::Lost, CooperativeLevel::DriverInternalError]);
    assert!(matches!(
        h.frame(),
        Err(RenderError::DriverFailure(CooperativeLevel::DriverInternalError))
    ));
    assert_eq!(h.probe.resets(), 0);
}

#[test]
fn test_reset_wait_limit_surfaces_timeout() {
    let mut h = Harness::with_config(EngineConfig::default().with_reset_wait_limit(3));
    h.probe.script_cooperative_levels([CooperativeLevel::Lost; 10]);

    assert!(matches!(h.frame(), Err(RenderError::ResetTimedOut { attempts: 3 })));
    assert_eq!(h.window.yields(), 3);
    assert!(h.engine.needs_reset());
}

#[test]
fn test_hidden_window_skips_frame() {
    let mut h = Harness::new();
    h.window.set_visible(false);
    h.frame().unwrap();

    assert!(h.probe.take_calls().is_empty());
    assert_eq!(h.engine.total_frames(), 1);
    assert_eq!(h.window.cursor_clip(), None);
}

#[test]
fn test_fullscreen_confines_cursor() {
    let mut h = Harness::with_config(EngineConfig::default().with_fullscreen(true));
    h.frame().unwrap();
    assert_eq!(h.window.cursor_clip(), Some(ScreenRect::new(0, 0, 64, 48)));

    h.window.set_visible(false);
    h.frame().unwrap();
    assert_eq!(h.window.cursor_clip(), None);
}

#[test]
fn test_config_change_defers_reset() {
    let mut h = Harness::new();
    h.engine
        .set_config(EngineConfig::default().with_vsync(false))
        .unwrap();
    assert!(h.engine.needs_reset());
    assert_eq!(h.probe.resets(), 0);

    h.frame().unwrap();
    assert_eq!(h.probe.resets(), 1);
    assert!(!h.engine.config().vsync);
}

#[test]
fn test_invalid_config_change_is_rejected() {
    let mut h = Harness::new();
    let err = h
        .engine
        .set_config(EngineConfig::default().with_antialiasing(64))
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert!(!h.engine.needs_reset());
}

#[test]
fn test_window_resize_resets_back_buffer() {
    let mut h = Harness::new();
    h.window.resize(100, 80);
    h.frame().unwrap();

    assert_eq!(h.probe.resets(), 1);
    let params = h.probe.present_parameters();
    assert_eq!((params.back_buffer_width, params.back_buffer_height), (100, 80));
}

#[test]
fn test_fps_after_thirty_one_frames() {
    let mut h = Harness::new();
    for _ in 0..30 {
        h.frame().unwrap();
    }
    approx::assert_relative_eq!(h.engine.fps(), 0.0);

    h.frame().unwrap();
    approx::assert_relative_eq!(h.engine.fps(), 50.0, epsilon = 1e-3);
    approx::assert_relative_eq!(h.engine.frame_ms(), 20.0, epsilon = 1e-3);
    approx::assert_relative_eq!(h.engine.total_time(), 0.62, epsilon = 1e-9);
    approx::assert_relative_eq!(h.engine.this_frame_time(), 0.02, epsilon = 1e-9);
}

#[test]
fn test_log_frame_writes_nested_events() {
    let mut h = Harness::new();
    let journal = Journal::default();
    h.engine.add_view(view("Terrain", &journal, |context| {
        let shader = context.terrain_shader(true, 0b101u16)?;
        context.device.draw_indexed(Some(shader), 8)?;
        Ok(())
    }));
    let pres = Rc::new(Cell::new(0));
    let counter = pres.clone();
    h.engine.on_frame_event(
        FrameEvent::PreRender,
        Box::new(move || counter.set(counter.get() + 1)),
    );

    let path = temp_path("frame.xml");
    h.engine.log_frame(&path, false).unwrap();

    let xml = std::fs::read_to_string(&path).unwrap();
    assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<frame>"));
    assert!(xml.contains("  <event name=\"Views\" time=\""));
    assert!(xml.contains("    <event name=\"Terrain\" time=\""));
    assert!(!xml.contains("Present"));
    assert_eq!(pres.get(), 0);
    assert!(!h.probe.take_calls().contains(&DeviceCall::Present));

    // Profiling is off again for normal frames
    h.frame().unwrap();
    std::fs::remove_file(&path).unwrap();
    h.window.set_visible(false);
    h.engine.log_frame(&path, false).unwrap();
    assert!(!path.exists());
}

#[test]
fn test_gpu_inclusive_log_flushes_at_every_boundary() {
    let mut h = Harness::new();
    let journal = Journal::default();
    h.engine.add_view(journaling_view("Terrain", &journal));

    h.engine.log_frame(temp_path("gpu.xml"), true).unwrap();
    let flushes = h
        .probe
        .take_calls()
        .into_iter()
        .filter(|call| *call == DeviceCall::FlushQuery)
        .count();
    // Frame start, then begin and end of "Views" and "Terrain"
    assert_eq!(flushes, 5);
}

#[test]
fn test_loss_during_frame_start_flush_is_absorbed() {
    let mut h = Harness::new();
    let path = temp_path("lost_flush.xml");

    h.probe.fail_next(FailPoint::Flush, DeviceError::DeviceLost);
    h.engine.log_frame(&path, true).unwrap();
    assert!(h.engine.needs_reset());
    assert!(!path.exists());

    h.frame().unwrap();
    assert_eq!(h.probe.resets(), 1);
    assert!(!h.engine.needs_reset());
}

#[test]
fn test_screenshot_reads_back_buffer() {
    let mut h = Harness::new();
    h.engine.set_clear_color(Color::rgb(10, 20, 30));
    let pres = Rc::new(Cell::new(0));
    let counter = pres.clone();
    h.engine.on_frame_event(
        FrameEvent::PreRender,
        Box::new(move || counter.set(counter.get() + 1)),
    );

    let shot = h.engine.screenshot().unwrap();
    assert_eq!(shot.dimensions(), (64, 48));
    assert_eq!(shot.get_pixel(0, 0).0, [10, 20, 30, 255]);
    assert_eq!(pres.get(), 0);

    let path = temp_path("shot.png");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    h.engine.save_screenshot(&path).unwrap();
    let loaded = image::open(&path).unwrap();
    assert_eq!((loaded.width(), loaded.height()), (64, 48));
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_shader_model_override() {
    let h = Harness::with_config(EngineConfig::default().with_forced_shader_model(ShaderModel::Model14));
    assert_eq!(h.engine.shader_model(), ShaderModel::Model14);
}

#[test]
fn test_empty_window_fails_initialization() {
    let mut factory = HeadlessDeviceFactory::default();
    let result = Engine::new(
        EngineConfig::default(),
        &mut factory,
        Box::new(HeadlessWindow::new(0, 0)),
        Box::new(ManualClock::new()),
    );
    assert!(matches!(result, Err(EngineError::InitializationFailed(_))));
}

#[test]
fn test_dispose_in_reverse_order() {
    let mut h = Harness::new();
    let journal = Journal::default();
    h.engine.add_view(view("first", &journal, |context| {
        context.terrain_shader(false, 1u16)?;
        Ok(())
    }));
    h.engine.add_view(journaling_view("second", &journal));
    h.frame().unwrap();
    journal.borrow_mut().clear();
    assert_eq!(h.probe.live_shaders(), 1);

    h.engine.dispose();
    h.engine.dispose();

    assert_eq!(*journal.borrow(), vec!["dispose second", "dispose first"]);
    assert_eq!(h.probe.live_shaders(), 0);
    assert_eq!(h.probe.live_surfaces(), 0);
    assert!(h.probe.is_disposed());
    assert!(h.engine.is_disposed());

    h.probe.take_calls();
    h.frame().unwrap();
    assert!(h.probe.take_calls().is_empty());
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "dispose")]
fn test_dropping_undisposed_engine_panics_in_debug() {
    let mut factory = HeadlessDeviceFactory::default();
    let engine = Engine::new(
        EngineConfig::default(),
        &mut factory,
        Box::new(HeadlessWindow::new(8, 8)),
        Box::new(ManualClock::new()),
    )
    .unwrap();
    drop(engine);
}
