//! Engine event hooks
//!
//! Two kinds of notifications leave the engine core:
//! - Frame events (`PreRender`, `PostRender`), fired once per normal frame.
//!   Frames rendered only for a screenshot or a frame log skip them.
//! - Device events (`DeviceLost`, `DeviceReset`), delivered to registered
//!   [`DeviceListener`]s, which must release and reacquire their device
//!   resources synchronously inside the callback.

use std::collections::HashMap;

use crate::render::api::GraphicsDevice;
use crate::render::RenderResult;

/// Frame event identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameEvent {
    /// Before any view is rendered
    PreRender,
    /// After the frame was presented
    PostRender,
}

/// Handler invoked for a frame event
pub type FrameHandler = Box<dyn FnMut()>;

/// Registry of frame-event handlers
///
/// Handlers run in registration order.
#[derive(Default)]
pub struct FrameEvents {
    handlers: HashMap<FrameEvent, Vec<FrameHandler>>,
}

impl FrameEvents {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a specific event
    pub fn register(&mut self, event: FrameEvent, handler: FrameHandler) {
        self.handlers.entry(event).or_default().push(handler);
    }

    /// Number of handlers registered for `event`
    pub fn handler_count(&self, event: FrameEvent) -> usize {
        self.handlers.get(&event).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for `event`
    pub fn dispatch(&mut self, event: FrameEvent) {
        if let Some(handlers) = self.handlers.get_mut(&event) {
            for handler in handlers.iter_mut() {
                handler();
            }
        }
    }

    /// Drop all handlers
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

/// A dependent that owns device resources
pub trait DeviceListener {
    /// The device is about to be reset; release everything size- or
    /// format-dependent now
    fn on_device_lost(&mut self, device: &mut dyn GraphicsDevice);

    /// The device was reset; recreate what `on_device_lost` released
    fn on_device_reset(&mut self, device: &mut dyn GraphicsDevice) -> RenderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut events = FrameEvents::new();

        for tag in ["a", "b"] {
            let log = Rc::clone(&log);
            events.register(FrameEvent::PreRender, Box::new(move || log.borrow_mut().push(tag)));
        }
        let post_log = Rc::clone(&log);
        events.register(FrameEvent::PostRender, Box::new(move || post_log.borrow_mut().push("post")));

        events.dispatch(FrameEvent::PreRender);
        assert_eq!(*log.borrow(), vec!["a", "b"]);

        events.dispatch(FrameEvent::PostRender);
        assert_eq!(*log.borrow(), vec!["a", "b", "post"]);
        assert_eq!(events.handler_count(FrameEvent::PreRender), 2);
    }

    #[test]
    fn test_dispatch_without_handlers_is_noop() {
        let mut events = FrameEvents::new();
        events.dispatch(FrameEvent::PostRender);
        events.clear();
        assert_eq!(events.handler_count(FrameEvent::PostRender), 0);
    }
}
