//! Time-based interpolation
//!
//! A tween moves a value from `from` to `to` over a fixed duration measured
//! from the first frame it is polled on. The engine polls all tweens once per
//! frame and drops each one on the frame it reaches its target.

use std::f32::consts::FRAC_PI_2;
use std::fmt;
use std::time::Duration;

/// Interpolation curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Easing {
    /// Constant rate
    Linear,
    /// Quarter sine: fast start, gentle arrival
    Trigonometric,
}

impl Easing {
    /// Map linear progress in `0..=1` onto the curve
    pub fn apply(self, progress: f32) -> f32 {
        match self {
            Self::Linear => progress,
            Self::Trigonometric => (progress * FRAC_PI_2).sin(),
        }
    }
}

/// Where interpolated values go
pub enum TweenTarget {
    /// The engine's fade level
    FadeLevel,
    /// An arbitrary consumer
    Callback(Box<dyn FnMut(f32)>),
}

impl fmt::Debug for TweenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FadeLevel => f.write_str("FadeLevel"),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// One running interpolation
#[derive(Debug)]
pub struct Tween {
    from: f32,
    to: f32,
    duration: Duration,
    easing: Easing,
    started_at: Option<Duration>,
    target: TweenTarget,
}

impl Tween {
    /// Create a tween that starts on the first frame it is polled
    pub fn new(from: f32, to: f32, duration: Duration, easing: Easing, target: TweenTarget) -> Self {
        Self {
            from,
            to,
            duration,
            easing,
            started_at: None,
            target,
        }
    }

    /// Tween driving the engine's fade level
    pub fn fade(from: u8, to: u8, duration: Duration, easing: Easing) -> Self {
        Self::new(f32::from(from), f32::from(to), duration, easing, TweenTarget::FadeLevel)
    }

    /// Whether this tween drives the fade level
    pub fn is_fade(&self) -> bool {
        matches!(self.target, TweenTarget::FadeLevel)
    }

    /// Value after `elapsed` of running time
    ///
    /// Returns the value and whether the target was reached. The target is
    /// returned exactly once progress reaches 1.
    pub fn value_at(&self, elapsed: Duration) -> (f32, bool) {
        let progress = if self.duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f32() / self.duration.as_secs_f32()).clamp(0.0, 1.0)
        };
        if progress >= 1.0 {
            return (self.to, true);
        }
        let eased = self.easing.apply(progress);
        (self.from + (self.to - self.from) * eased, false)
    }

    fn step(&mut self, now: Duration, fade_level: &mut u8) -> bool {
        let started_at = *self.started_at.get_or_insert(now);
        let (value, done) = self.value_at(now.saturating_sub(started_at));
        match &mut self.target {
            TweenTarget::FadeLevel => *fade_level = value.round().clamp(0.0, 255.0) as u8,
            TweenTarget::Callback(callback) => callback(value),
        }
        done
    }
}

/// Handle to a running tween
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TweenId(u64);

/// Tweens polled by the render loop
#[derive(Debug, Default)]
pub struct TweenSet {
    running: Vec<(TweenId, Tween)>,
    next_id: u64,
}

impl TweenSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling `tween` from the next update
    pub fn add(&mut self, tween: Tween) -> TweenId {
        let id = TweenId(self.next_id);
        self.next_id += 1;
        self.running.push((id, tween));
        id
    }

    /// Stop a tween without delivering further values
    ///
    /// Returns `false` if it already finished or was cancelled.
    pub fn cancel(&mut self, id: TweenId) -> bool {
        let before = self.running.len();
        self.running.retain(|(running, _)| *running != id);
        self.running.len() != before
    }

    /// Stop every tween that drives the fade level
    pub fn cancel_fades(&mut self) {
        self.running.retain(|(_, tween)| !tween.is_fade());
    }

    /// Whether `id` is still running
    pub fn contains(&self, id: TweenId) -> bool {
        self.running.iter().any(|(running, _)| *running == id)
    }

    /// Number of running tweens
    pub fn len(&self) -> usize {
        self.running.len()
    }

    /// Whether nothing is running
    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Deliver the current value of every tween and drop the finished ones
    pub fn update(&mut self, now: Duration, fade_level: &mut u8) {
        self.running.retain_mut(|(_, tween)| !tween.step(now, fade_level));
    }
}
