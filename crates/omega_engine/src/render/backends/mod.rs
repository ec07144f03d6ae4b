//! Graphics backend implementations
//!
//! Only the headless backend ships with the core: it records every device
//! call, supports scripted device loss and serves as the device for tests,
//! benchmark runs on machines without a display, and tooling.

pub mod headless;

pub use headless::{DeviceCall, FailPoint, HeadlessDevice, HeadlessDeviceFactory, HeadlessProbe};
