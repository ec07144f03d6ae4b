//! Device ownership and the reset state machine
//!
//! ```text
//! Active --(cooperative level not Ok)--> Lost
//! Lost --(reset requested)--> ResettingBlocked --(device resettable)--> Resetting --> Active
//! ```
//!
//! A reset releases the back buffer and tells every dependent to drop its
//! device resources, waits (yielding to the host) until the device can be
//! reset, resets it with the current presentation parameters and lets the
//! dependents rebuild. Dependents are released at most once per loss, even
//! if the reset has to be retried on a later frame.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::core::EngineConfig;
use crate::events::DeviceListener;
use crate::render::api::{
    Capabilities, CooperativeLevel, DeviceFactory, GraphicsDevice, PresentParameters,
    SurfaceHandle, VertexProcessing, Viewport,
};
use crate::render::window::RenderWindow;
use crate::render::{RenderError, RenderResult};

/// Where the device is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Usable
    Active,
    /// Lost or waiting for a requested reset
    Lost,
    /// Waiting for the device to become resettable
    ResettingBlocked,
    /// Resetting and rebuilding dependents
    Resetting,
}

/// How long a reset may wait for a lost device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetPolicy {
    /// Pause between cooperative-level polls
    pub poll_interval: Duration,
    /// Maximum number of pauses; `None` waits indefinitely
    pub wait_limit: Option<u32>,
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            wait_limit: None,
        }
    }
}

impl ResetPolicy {
    /// Policy from engine settings
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.reset_poll_interval_ms),
            wait_limit: config.reset_wait_limit,
        }
    }
}

/// Shared handle to a device dependent
pub type SharedListener = Rc<RefCell<dyn DeviceListener>>;

/// Owner of the graphics device, its back buffer and its dependents
pub struct DeviceManager {
    device: Box<dyn GraphicsDevice>,
    capabilities: Capabilities,
    vertex_processing: VertexProcessing,
    present: PresentParameters,
    back_buffer: Option<SurfaceHandle>,
    viewport: Viewport,
    listeners: Vec<SharedListener>,
    state: DeviceState,
    needs_reset: bool,
    resources_released: bool,
    disposed: bool,
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("vertex_processing", &self.vertex_processing)
            .field("present", &self.present)
            .field("state", &self.state)
            .field("needs_reset", &self.needs_reset)
            .field("listeners", &self.listeners.len())
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl DeviceManager {
    /// Create a device on `adapter`
    ///
    /// Vertex-processing tiers the capabilities allow are tried from most to
    /// least preferred; the first one the factory accepts wins.
    pub fn create(
        factory: &mut dyn DeviceFactory,
        adapter: u32,
        present: PresentParameters,
    ) -> RenderResult<Self> {
        let capabilities = factory.capabilities(adapter)?;
        let tiers: Vec<_> = VertexProcessing::candidates(&capabilities).collect();
        let mut failures = Vec::new();

        for tier in tiers {
            let mut device = match factory.create_device(adapter, tier, &present) {
                Ok(device) => device,
                Err(err) => {
                    log::warn!("Device creation with {tier:?} vertex processing failed: {err}");
                    failures.push(format!("{tier:?}: {err}"));
                    continue;
                }
            };

            let back_buffer = match device.acquire_back_buffer() {
                Ok(surface) => surface,
                Err(err) => {
                    device.dispose();
                    return Err(err.into());
                }
            };
            let viewport = device.viewport();
            log::info!(
                "Created device on adapter {adapter} with {tier:?} vertex processing ({}x{}, windowed: {})",
                present.back_buffer_width,
                present.back_buffer_height,
                present.windowed
            );

            return Ok(Self {
                device,
                capabilities,
                vertex_processing: tier,
                present,
                back_buffer: Some(back_buffer),
                viewport,
                listeners: Vec::new(),
                state: DeviceState::Active,
                needs_reset: false,
                resources_released: false,
                disposed: false,
            });
        }

        Err(RenderError::DeviceCreationFailed(if failures.is_empty() {
            format!("no vertex processing tier available on adapter {adapter}")
        } else {
            failures.join("; ")
        }))
    }

    /// The device
    pub fn device(&self) -> &dyn GraphicsDevice {
        self.device.as_ref()
    }

    /// The device, mutably
    pub fn device_mut(&mut self) -> &mut dyn GraphicsDevice {
        self.device.as_mut()
    }

    /// Capabilities of the adapter the device runs on
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Tier the device was created with
    pub fn vertex_processing(&self) -> VertexProcessing {
        self.vertex_processing
    }

    /// Parameters the device was last reset with, or will be
    pub fn present_parameters(&self) -> &PresentParameters {
        &self.present
    }

    /// Current back-buffer surface
    pub fn back_buffer(&self) -> Option<SurfaceHandle> {
        self.back_buffer
    }

    /// Viewport captured after the last creation or reset
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Lifecycle state
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Whether a reset is pending
    pub fn needs_reset(&self) -> bool {
        self.needs_reset
    }

    /// Whether a reset is in progress
    pub fn is_resetting(&self) -> bool {
        matches!(self.state, DeviceState::ResettingBlocked | DeviceState::Resetting)
    }

    /// Whether the device was disposed
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Replace the presentation parameters; they take effect on the next reset
    pub fn set_present_parameters(&mut self, present: PresentParameters) {
        if present != self.present {
            log::debug!("Presentation parameters changed, reset deferred to next frame");
            self.present = present;
        }
        self.needs_reset = true;
    }

    /// Ask for a reset on the next frame
    pub fn request_reset(&mut self) {
        self.needs_reset = true;
    }

    /// Register a dependent for lost/reset notifications
    pub fn add_listener(&mut self, listener: SharedListener) {
        self.listeners.push(listener);
    }

    /// Unregister a dependent; returns whether it was registered
    pub fn remove_listener(&mut self, listener: &SharedListener) -> bool {
        let key = Rc::as_ptr(listener).cast::<()>();
        let before = self.listeners.len();
        self.listeners.retain(|registered| Rc::as_ptr(registered).cast::<()>() != key);
        self.listeners.len() != before
    }

    /// Number of registered dependents
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Query the cooperative level and flag a reset if the device is lost
    ///
    /// Returns whether a reset is pending.
    pub fn check_lost(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        let level = self.device.cooperative_level();
        if level != CooperativeLevel::Ok {
            if self.state == DeviceState::Active {
                log::warn!("Device lost (cooperative level {level:?})");
            }
            self.state = DeviceState::Lost;
            self.needs_reset = true;
        }
        self.needs_reset
    }

    /// Run the reset sequence
    ///
    /// `owned` receives the lost/reset notifications first; it stands for
    /// the resources the caller owns directly (state cache, shader cache).
    /// Registered listeners follow in registration order.
    ///
    /// # Errors
    /// * [`RenderError::DriverFailure`] if the device leaves the lost state
    ///   for anything but "not reset" or "ok"
    /// * [`RenderError::ResetTimedOut`] if the policy's wait limit runs out
    /// * device errors from the reset itself or from a dependent rebuilding
    ///
    /// On error the reset stays pending.
    pub fn reset(
        &mut self,
        window: &mut dyn RenderWindow,
        policy: &ResetPolicy,
        owned: &mut dyn DeviceListener,
    ) -> RenderResult<()> {
        if self.disposed {
            return Err(RenderError::Disposed);
        }
        if self.is_resetting() {
            log::debug!("Reset already in progress");
            return Ok(());
        }

        log::info!(
            "Resetting device ({}x{}, windowed: {})",
            self.present.back_buffer_width,
            self.present.back_buffer_height,
            self.present.windowed
        );
        self.release_resources(owned);
        self.state = DeviceState::ResettingBlocked;

        match self.wait_and_reset(window, policy, owned) {
            Ok(()) => {
                self.state = DeviceState::Active;
                self.needs_reset = false;
                log::info!("Device reset complete");
                Ok(())
            }
            Err(err) => {
                self.state = DeviceState::Lost;
                self.needs_reset = true;
                if err.is_device_lost() {
                    log::warn!("Device lost again during reset, retrying next frame");
                }
                Err(err)
            }
        }
    }

    /// Release the back buffer and the device, dropping all listeners
    ///
    /// Calling this again does nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(surface) = self.back_buffer.take() {
            self.device.release_surface(surface);
        }
        self.listeners.clear();
        self.device.dispose();
        self.disposed = true;
        log::info!("Device disposed");
    }

    fn release_resources(&mut self, owned: &mut dyn DeviceListener) {
        if self.resources_released {
            return;
        }
        if let Some(surface) = self.back_buffer.take() {
            self.device.release_surface(surface);
        }
        owned.on_device_lost(self.device.as_mut());
        for listener in &self.listeners {
            listener.borrow_mut().on_device_lost(self.device.as_mut());
        }
        self.resources_released = true;
    }

    fn wait_and_reset(
        &mut self,
        window: &mut dyn RenderWindow,
        policy: &ResetPolicy,
        owned: &mut dyn DeviceListener,
    ) -> RenderResult<()> {
        let mut waits = 0u32;
        loop {
            match self.device.cooperative_level() {
                CooperativeLevel::Lost => {
                    if policy.wait_limit.is_some_and(|limit| waits >= limit) {
                        return Err(RenderError::ResetTimedOut { attempts: waits });
                    }
                    waits += 1;
                    window.yield_to_host(policy.poll_interval);
                }
                CooperativeLevel::NotReset | CooperativeLevel::Ok => break,
                level => {
                    log::error!("Device cannot be reset, cooperative level {level:?}");
                    return Err(RenderError::DriverFailure(level));
                }
            }
        }
        if waits > 0 {
            log::debug!("Device became resettable after {waits} waits");
        }

        self.state = DeviceState::Resetting;
        // Left over from an attempt whose rebuild failed
        if let Some(surface) = self.back_buffer.take() {
            self.device.release_surface(surface);
        }
        self.device.reset(&self.present)?;
        self.viewport = self.device.viewport();
        self.back_buffer = Some(self.device.acquire_back_buffer()?);

        self.rebuild_dependents(owned)?;
        self.resources_released = false;
        Ok(())
    }

    // Every dependent sees lost and reset strictly alternating: when one
    // fails to rebuild, those already rebuilt are released again and the
    // next attempt rebuilds all of them.
    fn rebuild_dependents(&mut self, owned: &mut dyn DeviceListener) -> RenderResult<()> {
        owned.on_device_reset(self.device.as_mut())?;
        for (index, listener) in self.listeners.iter().enumerate() {
            let rebuilt = listener.borrow_mut().on_device_reset(self.device.as_mut());
            if let Err(err) = rebuilt {
                log::warn!("Device listener failed to rebuild after reset: {err}");
                for earlier in self.listeners[..index].iter().rev() {
                    earlier.borrow_mut().on_device_lost(self.device.as_mut());
                }
                owned.on_device_lost(self.device.as_mut());
                return Err(err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::DeviceError;
    use crate::render::backends::headless::{FailPoint, HeadlessDeviceFactory, HeadlessProbe};
    use crate::render::window::HeadlessWindow;

    type Journal = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        journal: Journal,
    }

    impl DeviceListener for Recorder {
        fn on_device_lost(&mut self, _device: &mut dyn GraphicsDevice) {
            self.journal.borrow_mut().push(format!("{} lost", self.name));
        }

        fn on_device_reset(&mut self, _device: &mut dyn GraphicsDevice) -> RenderResult<()> {
            self.journal.borrow_mut().push(format!("{} reset", self.name));
            Ok(())
        }
    }

    fn params() -> PresentParameters {
        PresentParameters::from_config(&EngineConfig::default(), (640, 480))
    }

    fn manager() -> (DeviceManager, HeadlessProbe) {
        let mut factory = HeadlessDeviceFactory::default();
        let probe = factory.probe();
        let manager = DeviceManager::create(&mut factory, 0, params()).unwrap();
        (manager, probe)
    }

    fn recorders(manager: &mut DeviceManager) -> (Recorder, Journal) {
        let journal = Journal::default();
        let listener = Rc::new(RefCell::new(Recorder {
            name: "listener",
            journal: journal.clone(),
        }));
        manager.add_listener(listener);
        let owned = Recorder {
            name: "owned",
            journal: journal.clone(),
        };
        (owned, journal)
    }

    #[test]
    fn test_creation_prefers_pure_hardware() {
        let (manager, probe) = manager();
        assert_eq!(manager.vertex_processing(), VertexProcessing::PureHardware);
        assert_eq!(probe.created_with(), vec![VertexProcessing::PureHardware]);
        assert_eq!(manager.state(), DeviceState::Active);
        assert!(manager.back_buffer().is_some());
        assert_eq!(manager.viewport(), Viewport::full(640, 480));
    }

    #[test]
    fn test_creation_uses_software_without_hardware_caps() {
        let mut factory = HeadlessDeviceFactory::new(Capabilities::software());
        let manager = DeviceManager::create(&mut factory, 0, params()).unwrap();
        assert_eq!(manager.vertex_processing(), VertexProcessing::Software);
    }

    #[test]
    fn test_creation_falls_back_to_next_tier() {
        let mut factory = HeadlessDeviceFactory::default().refuse_tier(VertexProcessing::PureHardware);
        let manager = DeviceManager::create(&mut factory, 0, params()).unwrap();
        assert_eq!(manager.vertex_processing(), VertexProcessing::Hardware);
    }

    #[test]
    fn test_creation_fails_when_every_tier_is_refused() {
        let mut factory = HeadlessDeviceFactory::new(Capabilities::software())
            .refuse_tier(VertexProcessing::Software);
        let err = DeviceManager::create(&mut factory, 0, params()).unwrap_err();
        assert!(matches!(err, RenderError::DeviceCreationFailed(_)));
    }

    #[test]
    fn test_unknown_adapter() {
        let mut factory = HeadlessDeviceFactory::default();
        let err = DeviceManager::create(&mut factory, 3, params()).unwrap_err();
        assert!(matches!(err, RenderError::Device(DeviceError::Unsupported(_))));
    }

    #[test]
    fn test_check_lost_flags_reset() {
        let (mut manager, probe) = manager();
        assert!(!manager.check_lost());

        probe.script_cooperative_levels([CooperativeLevel::Lost]);
        assert!(manager.check_lost());
        assert_eq!(manager.state(), DeviceState::Lost);
        assert!(manager.needs_reset());
    }

    #[test]
    fn test_reset_waits_then_rebuilds_in_order() {
        let (mut manager, probe) = manager();
        let (mut owned, journal) = recorders(&mut manager);
        let window = HeadlessWindow::new(640, 480);
        let mut host = window.clone();
        let policy = ResetPolicy {
            poll_interval: Duration::from_millis(50),
            wait_limit: None,
        };

        probe.script_cooperative_levels([
            CooperativeLevel::Lost,
            CooperativeLevel::Lost,
            CooperativeLevel::Lost,
            CooperativeLevel::NotReset,
        ]);
        assert!(manager.check_lost());
        manager.reset(&mut host, &policy, &mut owned).unwrap();

        assert_eq!(window.yields(), 2);
        assert_eq!(window.requested_wait(), Duration::from_millis(100));
        assert_eq!(probe.resets(), 1);
        assert_eq!(probe.live_surfaces(), 1);
        assert_eq!(manager.state(), DeviceState::Active);
        assert!(!manager.needs_reset());
        assert_eq!(
            *journal.borrow(),
            vec!["owned lost", "listener lost", "owned reset", "listener reset"]
        );
    }

    #[test]
    fn test_unexpected_level_is_fatal() {
        let (mut manager, probe) = manager();
        let (mut owned, _journal) = recorders(&mut manager);
        let mut window = HeadlessWindow::new(640, 480);

        probe.script_cooperative_levels([
            CooperativeLevel::Lost,
            CooperativeLevel::DriverInternalError,
        ]);
        manager.request_reset();
        let err = manager
            .reset(&mut window, &ResetPolicy::default(), &mut owned)
            .unwrap_err();

        assert!(matches!(
            err,
            RenderError::DriverFailure(CooperativeLevel::DriverInternalError)
        ));
        assert_eq!(probe.resets(), 0);
        assert!(manager.needs_reset());
    }

    #[test]
    fn test_wait_limit_times_out() {
        let (mut manager, probe) = manager();
        let (mut owned, _journal) = recorders(&mut manager);
        let window = HeadlessWindow::new(640, 480);
        let mut host = window.clone();
        let policy = ResetPolicy {
            poll_interval: Duration::from_millis(10),
            wait_limit: Some(2),
        };

        probe.script_cooperative_levels([CooperativeLevel::Lost; 5]);
        manager.request_reset();
        let err = manager.reset(&mut host, &policy, &mut owned).unwrap_err();

        assert!(matches!(err, RenderError::ResetTimedOut { attempts: 2 }));
        assert_eq!(window.yields(), 2);
        assert_eq!(manager.state(), DeviceState::Lost);
    }

    #[test]
    fn test_failed_reset_releases_dependents_once() {
        let (mut manager, probe) = manager();
        let (mut owned, journal) = recorders(&mut manager);
        let mut window = HeadlessWindow::new(640, 480);
        let policy = ResetPolicy::default();

        probe.fail_next(FailPoint::Reset, DeviceError::DeviceLost);
        manager.request_reset();
        let err = manager.reset(&mut window, &policy, &mut owned).unwrap_err();
        assert!(err.is_device_lost());
        assert!(manager.needs_reset());

        manager.reset(&mut window, &policy, &mut owned).unwrap();
        assert_eq!(
            *journal.borrow(),
            vec!["owned lost", "listener lost", "owned reset", "listener reset"]
        );
    }

    struct Flaky {
        journal: Journal,
        failed: bool,
    }

    impl DeviceListener for Flaky {
        fn on_device_lost(&mut self, _device: &mut dyn GraphicsDevice) {
            self.journal.borrow_mut().push("flaky lost".into());
        }

        fn on_device_reset(&mut self, _device: &mut dyn GraphicsDevice) -> RenderResult<()> {
            if !self.failed {
                self.failed = true;
                return Err(DeviceError::DeviceLost.into());
            }
            self.journal.borrow_mut().push("flaky reset".into());
            Ok(())
        }
    }

    #[test]
    fn test_failed_listener_rebuild_rolls_back_earlier_dependents() {
        let (mut manager, probe) = manager();
        let (mut owned, journal) = recorders(&mut manager);
        manager.add_listener(Rc::new(RefCell::new(Flaky {
            journal: journal.clone(),
            failed: false,
        })));
        let mut window = HeadlessWindow::new(640, 480);
        let policy = ResetPolicy::default();

        manager.request_reset();
        assert!(manager.reset(&mut window, &policy, &mut owned).is_err());
        assert!(manager.needs_reset());
        assert_eq!(
            *journal.borrow(),
            vec![
                "owned lost",
                "listener lost",
                "flaky lost",
                "owned reset",
                "listener reset",
                "listener lost",
                "owned lost",
            ]
        );

        journal.borrow_mut().clear();
        manager.reset(&mut window, &policy, &mut owned).unwrap();
        assert_eq!(
            *journal.borrow(),
            vec!["owned reset", "listener reset", "flaky reset"]
        );
        assert_eq!(probe.resets(), 2);
        // The back buffer from the failed attempt was given back
        assert_eq!(probe.live_surfaces(), 1);
    }

    #[test]
    fn test_new_present_parameters_apply_on_reset() {
        let (mut manager, probe) = manager();
        let mut window = HeadlessWindow::new(640, 480);
        let (mut owned, _journal) = recorders(&mut manager);

        let resized = PresentParameters::from_config(&EngineConfig::default(), (1024, 768));
        manager.set_present_parameters(resized.clone());
        assert!(manager.needs_reset());
        assert_eq!(probe.resets(), 0);

        manager.reset(&mut window, &ResetPolicy::default(), &mut owned).unwrap();
        assert_eq!(probe.present_parameters(), resized);
        assert_eq!(manager.viewport(), Viewport::full(1024, 768));
    }

    #[test]
    fn test_remove_listener() {
        let (mut manager, _probe) = manager();
        let listener: SharedListener = Rc::new(RefCell::new(Recorder {
            name: "x",
            journal: Journal::default(),
        }));
        manager.add_listener(listener.clone());
        assert_eq!(manager.listener_count(), 1);
        assert!(manager.remove_listener(&listener));
        assert!(!manager.remove_listener(&listener));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (mut manager, probe) = manager();
        let mut window = HeadlessWindow::new(640, 480);
        let (mut owned, _journal) = recorders(&mut manager);

        manager.dispose();
        manager.dispose();

        assert!(probe.is_disposed());
        assert_eq!(probe.live_surfaces(), 0);
        assert_eq!(manager.listener_count(), 0);
        assert!(!manager.check_lost());
        assert!(matches!(
            manager.reset(&mut window, &ResetPolicy::default(), &mut owned),
            Err(RenderError::Disposed)
        ));
    }
}
