//! Headless render-loop benchmark
//!
//! Drives the engine over the headless backend with a small terrain view,
//! simulates one device loss half way through, then writes a profiled frame
//! log and a screenshot.
//!
//! Usage: `omega_bench [config.toml|config.ron] [frames]`

use std::time::Instant;

use nalgebra::Vector3;

use omega_engine::config::ConfigError;
use omega_engine::foundation::logging;
use omega_engine::prelude::*;
use omega_engine::render::api::CooperativeLevel;
use omega_engine::render::backends::HeadlessProbe;
use thiserror::Error;

const DEFAULT_FRAMES: u32 = 300;
const WINDOW_SIZE: (u32, u32) = (800, 600);

#[derive(Error, Debug)]
enum BenchError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid frame count: {0}")]
    FrameCount(String),
}

/// Grid of terrain tiles, each blending a different set of texture layers
struct TerrainView {
    tiles: Vec<(Mat4, u16)>,
}

impl TerrainView {
    fn grid(size: u16) -> Self {
        let tiles = (0..size * size)
            .map(|index| {
                let (x, z) = (f32::from(index % size), f32::from(index / size));
                let world = Mat4::new_translation(&Vector3::new(x * 64.0, 0.0, z * 64.0));
                // Layers 1 and 2 everywhere, plus one detail layer per tile
                let mask = 0b11 | (1 << (2 + index % 6));
                (world, mask)
            })
            .collect();
        Self { tiles }
    }
}

impl View for TerrainView {
    fn name(&self) -> &str {
        "Terrain"
    }

    fn render(&mut self, context: &mut RenderContext<'_>) -> RenderResult<()> {
        context.states.set_fog(&mut *context.device, true)?;
        context.states.set_fog_range(&mut *context.device, 200.0, 900.0)?;
        context.states.set_cull_mode(&mut *context.device, CullMode::CounterClockwise)?;
        for (world, mask) in &self.tiles {
            context.states.set_world(&mut *context.device, *world)?;
            let shader = context.terrain_shader(true, *mask)?;
            context.device.draw_indexed(Some(shader), 2 * 32 * 32)?;
        }
        context.marker("terrain done");
        Ok(())
    }
}

fn parse_args() -> Result<(ApplicationConfig, u32), BenchError> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => ApplicationConfig::load_from_file(&path)?,
        None => ApplicationConfig::default(),
    };
    config.validate()?;
    let frames = match args.next() {
        Some(raw) => raw.parse().map_err(|_| BenchError::FrameCount(raw))?,
        None => DEFAULT_FRAMES,
    };
    Ok((config, frames))
}

fn run(config: &ApplicationConfig, frames: u32) -> Result<(), BenchError> {
    let mut factory = HeadlessDeviceFactory::default();
    let probe = factory.probe();
    let window = HeadlessWindow::new(WINDOW_SIZE.0, WINDOW_SIZE.1);

    let mut engine = Engine::new(
        config.engine.clone(),
        &mut factory,
        Box::new(window.clone()),
        Box::new(SystemClock::new()),
    )?;
    let result = drive(&mut engine, &probe, config, frames);
    engine.dispose();
    log::info!(
        "Host yielded {} times ({:?}) while waiting for the device",
        window.yields(),
        window.requested_wait()
    );
    result
}

fn drive(
    engine: &mut Engine,
    probe: &HeadlessProbe,
    config: &ApplicationConfig,
    frames: u32,
) -> Result<(), BenchError> {
    engine.add_view(Box::new(TerrainView::grid(4)));
    engine.set_clear_color(Color::rgb(40, 60, 90));
    engine.fade_in();

    let wall = Stopwatch::start_new();
    let mut last = Instant::now();
    for frame in 0..frames {
        if frame == frames / 2 {
            log::info!("Simulating device loss at frame {frame}");
            probe.script_cooperative_levels([
                CooperativeLevel::Lost,
                CooperativeLevel::Lost,
                CooperativeLevel::NotReset,
            ]);
        }
        let now = Instant::now();
        engine.render(now - last, false)?;
        last = now;
    }

    log::info!(
        "{} frames in {:.2?}: {:.1} fps, {:.3} ms/frame, {} terrain shaders, {} device resets",
        engine.total_frames(),
        wall.elapsed(),
        engine.fps(),
        engine.frame_ms(),
        engine.terrain_shaders().len(),
        probe.resets()
    );

    let log_dir = &config.profiling.log_dir;
    engine.log_frame(log_dir.join("frame.xml"), config.profiling.gpu_inclusive)?;
    engine.save_screenshot(log_dir.join("screenshot.png"))?;
    Ok(())
}

fn main() {
    let (config, frames) = match parse_args() {
        Ok(parsed) => parsed,
        Err(err) => {
            logging::init();
            log::error!("{err}");
            std::process::exit(2);
        }
    };
    logging::init_with_config(&config.logging);
    log::info!("Running {frames} frames at {}x{}", WINDOW_SIZE.0, WINDOW_SIZE.1);

    if let Err(err) = run(&config, frames) {
        log::error!("Benchmark failed: {err}");
        std::process::exit(1);
    }
}
