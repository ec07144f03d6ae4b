//! # Omega Engine
//!
//! Device lifecycle and frame-render core of a 3D engine.
//!
//! ## Features
//!
//! - **Render loop**: one call per frame covering reset handling, views,
//!   fades, an extra overlay callback and presentation
//! - **Device lifecycle**: lost-device detection and a reset state machine
//!   that keeps dependents in sync
//! - **Render-state cache**: redundant pipeline switches never reach the device
//! - **Shader cache**: terrain shader variants indexed by texture mask
//! - **Frame profiling**: nested timed events written as XML frame logs
//! - **Headless backend**: a recording device for tests and benchmarks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use omega_engine::prelude::*;
//!
//! fn main() -> Result<(), EngineError> {
//!     let mut factory = HeadlessDeviceFactory::default();
//!     let mut engine = Engine::new(
//!         EngineConfig::default(),
//!         &mut factory,
//!         Box::new(HeadlessWindow::new(800, 600)),
//!         Box::new(SystemClock::new()),
//!     )?;
//!
//!     engine.fade_in();
//!     for _ in 0..60 {
//!         engine.render(Duration::from_millis(16), false)?;
//!     }
//!     engine.dispose();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::must_use_candidate
)]

pub mod core;
pub mod foundation;
pub mod config;
pub mod events;
pub mod render;
pub mod profiling;

mod engine;

#[cfg(test)]
mod engine_tests;

pub use engine::{Engine, EngineError, ExtraRender, DIM_LEVEL, FADE_DURATION};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        core::{ApplicationConfig, Config, EngineConfig, ShaderModel},
        events::{DeviceListener, FrameEvent},
        foundation::{
            math::{Color, Mat4, Plane},
            time::{Clock, ManualClock, Stopwatch, SystemClock},
        },
        profiling::ProfilingContext,
        render::{
            api::GraphicsDevice,
            backends::{HeadlessDevice, HeadlessDeviceFactory},
            frame::Easing,
            AlphaBlend, CullMode, DeviceState, FillMode, HeadlessWindow, RenderContext,
            RenderError, RenderResult, RenderWindow, Resettable, View, ZBufferMode,
        },
        Engine, EngineError,
    };
}
