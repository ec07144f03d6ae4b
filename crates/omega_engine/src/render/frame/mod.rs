//! Per-frame bookkeeping: timing statistics and running tweens

pub mod timing;
pub mod tween;

pub use timing::{FrameTiming, FPS_WINDOW};
pub use tween::{Easing, Tween, TweenId, TweenSet, TweenTarget};
