//! Host window abstraction
//!
//! The engine never talks to a windowing system directly. The host supplies
//! a [`RenderWindow`] that answers visibility questions, confines the cursor
//! in fullscreen mode and lets the engine yield while it waits for a lost
//! device to come back.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Rectangle in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenRect {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl ScreenRect {
    /// Create a rectangle
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// `(width, height)`
    pub const fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Host environment the engine renders into
pub trait RenderWindow {
    /// Whether the render target is currently visible
    fn is_visible(&self) -> bool;

    /// Render area in screen coordinates
    fn render_area(&self) -> ScreenRect;

    /// Confine the cursor to `area`, or release it with `None`
    fn clip_cursor(&mut self, area: Option<ScreenRect>);

    /// Sleep for up to `wait` while letting the host process its events
    fn yield_to_host(&mut self, wait: Duration);
}

#[derive(Debug)]
struct WindowState {
    visible: bool,
    area: ScreenRect,
    cursor_clip: Option<ScreenRect>,
    yields: u32,
    slept: Duration,
}

/// Window stand-in for headless runs
///
/// Clones share state, so a test can keep a clone to flip visibility or
/// inspect the cursor clip after giving the window to the engine. Yielding
/// does not sleep; it only records the request.
#[derive(Debug, Clone)]
pub struct HeadlessWindow {
    state: Rc<RefCell<WindowState>>,
}

impl HeadlessWindow {
    /// Create a visible window with the given client size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Rc::new(RefCell::new(WindowState {
                visible: true,
                area: ScreenRect::new(0, 0, width, height),
                cursor_clip: None,
                yields: 0,
                slept: Duration::ZERO,
            })),
        }
    }

    /// Show or hide the window
    pub fn set_visible(&self, visible: bool) {
        self.state.borrow_mut().visible = visible;
    }

    /// Resize the client area
    pub fn resize(&self, width: u32, height: u32) {
        let mut state = self.state.borrow_mut();
        state.area.width = width;
        state.area.height = height;
    }

    /// Current cursor confinement
    pub fn cursor_clip(&self) -> Option<ScreenRect> {
        self.state.borrow().cursor_clip
    }

    /// Number of times the engine yielded to the host
    pub fn yields(&self) -> u32 {
        self.state.borrow().yields
    }

    /// Total time the engine asked to wait
    pub fn requested_wait(&self) -> Duration {
        self.state.borrow().slept
    }
}

impl RenderWindow for HeadlessWindow {
    fn is_visible(&self) -> bool {
        self.state.borrow().visible
    }

    fn render_area(&self) -> ScreenRect {
        self.state.borrow().area
    }

    fn clip_cursor(&mut self, area: Option<ScreenRect>) {
        self.state.borrow_mut().cursor_clip = area;
    }

    fn yield_to_host(&mut self, wait: Duration) {
        let mut state = self.state.borrow_mut();
        state.yields += 1;
        state.slept += wait;
    }
}
