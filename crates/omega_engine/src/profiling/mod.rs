//! Frame profiling
//!
//! While a frame is being logged, named spans of work are recorded as a tree
//! of timed events and written out as one XML document per frame. Outside a
//! logged frame every call is an early return.

pub mod context;
pub mod frame_log;

pub use context::ProfilingContext;
pub use frame_log::{FrameLog, LogNode, NodeKey};
