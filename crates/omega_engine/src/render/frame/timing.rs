//! Frame counters and FPS smoothing

use std::time::Duration;

/// Number of frames averaged into one FPS sample
pub const FPS_WINDOW: u32 = 30;

/// Frame counters and smoothed frame-rate statistics
///
/// The smoothed values only change when a window closes, which happens on
/// the frame that pushes the window's frame count past [`FPS_WINDOW`].
#[derive(Debug, Clone, Default)]
pub struct FrameTiming {
    total_frames: u64,
    total_time: f64,
    this_frame_time: f64,
    window_frames: u32,
    window_elapsed: f64,
    fps: f32,
    frame_ms: f32,
}

impl FrameTiming {
    /// Start from zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a frame and accumulate its elapsed time
    pub fn advance(&mut self, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        self.total_frames += 1;
        self.total_time += seconds;
        self.this_frame_time = seconds;
    }

    /// Feed a frame into the FPS window
    ///
    /// Returns `true` when this frame closed the window and the smoothed
    /// values were recomputed.
    pub fn sample_fps(&mut self, elapsed: Duration) -> bool {
        self.window_frames += 1;
        self.window_elapsed += elapsed.as_secs_f64();
        if self.window_frames <= FPS_WINDOW {
            return false;
        }

        if self.window_elapsed > 0.0 {
            let frames = f64::from(self.window_frames);
            self.fps = (frames / self.window_elapsed) as f32;
            self.frame_ms = (self.window_elapsed * 1000.0 / frames) as f32;
            log::trace!("FPS window closed: {:.1} fps, {:.2} ms/frame", self.fps, self.frame_ms);
        }
        self.reset_window();
        true
    }

    /// Restart the FPS window, keeping the last smoothed values
    pub fn reset_window(&mut self) {
        self.window_frames = 0;
        self.window_elapsed = 0.0;
    }

    /// Frames counted since construction
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Seconds accumulated since construction
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Seconds the last frame took
    pub fn this_frame_time(&self) -> f64 {
        self.this_frame_time
    }

    /// Smoothed frames per second
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Smoothed milliseconds per frame
    pub fn frame_ms(&self) -> f32 {
        self.frame_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FRAME: Duration = Duration::from_millis(20);

    #[test]
    fn test_counters_accumulate() {
        let mut timing = FrameTiming::new();
        timing.advance(Duration::from_millis(10));
        timing.advance(Duration::from_millis(30));

        assert_eq!(timing.total_frames(), 2);
        assert_relative_eq!(timing.total_time(), 0.04, epsilon = 1e-9);
        assert_relative_eq!(timing.this_frame_time(), 0.03, epsilon = 1e-9);
    }

    #[test]
    fn test_window_closes_after_thirty_one_frames() {
        let mut timing = FrameTiming::new();
        let mut updates = 0;
        for _ in 0..FPS_WINDOW {
            if timing.sample_fps(FRAME) {
                updates += 1;
            }
        }
        // Window is full but not past the boundary yet
        assert_eq!(updates, 0);
        assert_eq!(timing.fps(), 0.0);

        assert!(timing.sample_fps(FRAME));
        assert_relative_eq!(timing.fps(), 50.0, epsilon = 1e-3);
        assert_relative_eq!(timing.frame_ms(), 20.0, epsilon = 1e-3);
    }

    #[test]
    fn test_values_hold_between_windows() {
        let mut timing = FrameTiming::new();
        for _ in 0..=FPS_WINDOW {
            timing.sample_fps(FRAME);
        }
        for _ in 0..10 {
            assert!(!timing.sample_fps(Duration::from_millis(100)));
        }
        assert_relative_eq!(timing.fps(), 50.0, epsilon = 1e-3);
    }

    #[test]
    fn test_reset_window_restarts_count() {
        let mut timing = FrameTiming::new();
        for _ in 0..20 {
            timing.sample_fps(FRAME);
        }
        timing.reset_window();
        for _ in 0..FPS_WINDOW {
            assert!(!timing.sample_fps(FRAME));
        }
        assert!(timing.sample_fps(FRAME));
    }

    #[test]
    fn test_zero_elapsed_window_keeps_previous_values() {
        let mut timing = FrameTiming::new();
        for _ in 0..=FPS_WINDOW {
            timing.sample_fps(FRAME);
        }
        for _ in 0..=FPS_WINDOW {
            timing.sample_fps(Duration::ZERO);
        }
        assert_relative_eq!(timing.fps(), 50.0, epsilon = 1e-3);
    }
}
