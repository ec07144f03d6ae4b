//! Profiling context
//!
//! Owns the frame log while a frame is being recorded and the stack of open
//! events. Anything that wants to emit events takes a `&mut ProfilingContext`.

use crate::foundation::time::Stopwatch;
use crate::render::api::{DeviceResult, PipelineSync};

use super::frame_log::{FrameLog, NodeKey};

#[derive(Debug)]
struct OpenEvent {
    key: NodeKey,
    timer: Stopwatch,
}

/// Event recorder for logged frames
#[derive(Debug, Default)]
pub struct ProfilingContext {
    log: Option<FrameLog>,
    open: Vec<OpenEvent>,
    gpu_inclusive: bool,
}

impl ProfilingContext {
    /// Create an inactive context
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a frame is being recorded
    pub fn is_active(&self) -> bool {
        self.log.is_some()
    }

    /// Whether event boundaries stall the GPU pipeline
    pub fn is_gpu_inclusive(&self) -> bool {
        self.gpu_inclusive
    }

    /// Number of events currently open
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Start recording a frame
    ///
    /// With `gpu_inclusive`, the pipeline is drained first so the frame
    /// does not inherit GPU work queued before it.
    pub fn start_frame<S>(&mut self, gpu_inclusive: bool, sync: &mut S) -> DeviceResult<()>
    where
        S: PipelineSync + ?Sized,
    {
        if self.is_active() {
            log::warn!("Frame log started while another frame was recording; discarding it");
            self.open.clear();
        }
        if gpu_inclusive {
            sync.flush_pipeline()?;
        }
        self.log = Some(FrameLog::new());
        self.gpu_inclusive = gpu_inclusive;
        Ok(())
    }

    /// Stop recording and hand out the finished document
    ///
    /// Events still open are closed with the time measured so far.
    pub fn finish_frame(&mut self) -> Option<FrameLog> {
        let mut log = self.log.take()?;
        if !self.open.is_empty() {
            log::warn!("{} profiling events left open at end of frame", self.open.len());
            while let Some(event) = self.open.pop() {
                log.close_event(event.key, event.timer.elapsed_millis());
            }
        }
        self.gpu_inclusive = false;
        Some(log)
    }

    /// Open a timed event nested in the current one
    pub fn begin_event<S>(&mut self, name: &str, sync: &mut S) -> DeviceResult<()>
    where
        S: PipelineSync + ?Sized,
    {
        if self.log.is_none() {
            return Ok(());
        }
        if self.gpu_inclusive {
            sync.flush_pipeline()?;
        }
        let parent = self.open.last().map(|event| event.key);
        if let Some(log) = self.log.as_mut() {
            let key = log.open_event(parent, name);
            self.open.push(OpenEvent {
                key,
                timer: Stopwatch::start_new(),
            });
        }
        Ok(())
    }

    /// Close the innermost open event
    ///
    /// The event is popped even when the pipeline flush fails, so the stack
    /// stays balanced.
    pub fn end_event<S>(&mut self, sync: &mut S) -> DeviceResult<()>
    where
        S: PipelineSync + ?Sized,
    {
        if self.log.is_none() {
            return Ok(());
        }
        let Some(event) = self.open.pop() else {
            log::warn!("end_event without a matching begin_event");
            return Ok(());
        };
        let flushed = if self.gpu_inclusive {
            sync.flush_pipeline()
        } else {
            Ok(())
        };
        if let Some(log) = self.log.as_mut() {
            log.close_event(event.key, event.timer.elapsed_millis());
        }
        flushed
    }

    /// Record an untimed marker under the current event
    #[cfg(debug_assertions)]
    pub fn marker(&mut self, value: &str) {
        let parent = self.open.last().map(|event| event.key);
        if let Some(log) = self.log.as_mut() {
            log.add_marker(parent, value);
        }
    }

    /// Record an untimed marker under the current event (compiled out)
    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub fn marker(&mut self, _value: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::frame_log::LogNode;
    use crate::render::backends::headless::{DeviceCall, HeadlessDevice};

    fn event_name(log: &FrameLog, key: NodeKey) -> String {
        match log.node(key) {
            Some(LogNode::Event { name, .. }) => name.clone(),
            other => panic!("expected event, got {other:?}"),
        }
    }

    fn event_time(log: &FrameLog, key: NodeKey) -> f64 {
        match log.node(key) {
            Some(LogNode::Event { time_ms: Some(time), .. }) => *time,
            other => panic!("expected closed event, got {other:?}"),
        }
    }

    #[test]
    fn test_inactive_context_records_nothing() {
        let mut device = HeadlessDevice::new();
        let mut profiler = ProfilingContext::new();

        profiler.begin_event("A", &mut device).unwrap();
        profiler.end_event(&mut device).unwrap();
        profiler.marker("m");

        assert_eq!(profiler.depth(), 0);
        assert!(profiler.finish_frame().is_none());
        assert!(device.take_calls().is_empty());
    }

    #[test]
    fn test_nested_events() {
        let mut device = HeadlessDevice::new();
        let mut profiler = ProfilingContext::new();
        profiler.start_frame(false, &mut device).unwrap();

        profiler.begin_event("A", &mut device).unwrap();
        profiler.begin_event("B", &mut device).unwrap();
        assert_eq!(profiler.depth(), 2);
        profiler.end_event(&mut device).unwrap();
        profiler.end_event(&mut device).unwrap();

        let log = profiler.finish_frame().unwrap();
        assert!(!profiler.is_active());
        assert_eq!(log.roots().len(), 1);
        let a = log.roots()[0];
        assert_eq!(event_name(&log, a), "A");
        assert_eq!(log.children(a).len(), 1);
        let b = log.children(a)[0];
        assert_eq!(event_name(&log, b), "B");
        assert!(event_time(&log, a) >= 0.0);
        assert!(event_time(&log, b) >= 0.0);

        let xml = log.to_xml_string();
        let a_at = xml.find("<event name=\"A\"").unwrap();
        let b_at = xml.find("    <event name=\"B\"").unwrap();
        let a_end = xml.find("  </event>").unwrap();
        assert!(a_at < b_at && b_at < a_end);
    }

    #[test]
    fn test_gpu_inclusive_flushes_every_boundary() {
        let mut device = HeadlessDevice::new();
        device.probe().set_flush_latency(2);
        let mut profiler = ProfilingContext::new();

        profiler.start_frame(true, &mut device).unwrap();
        profiler.begin_event("A", &mut device).unwrap();
        profiler.end_event(&mut device).unwrap();
        profiler.finish_frame().unwrap();

        let flushes = device
            .take_calls()
            .into_iter()
            .filter(|call| *call == DeviceCall::FlushQuery)
            .count();
        assert_eq!(flushes, 3);
    }

    #[test]
    fn test_unbalanced_events_closed_at_finish() {
        let mut device = HeadlessDevice::new();
        let mut profiler = ProfilingContext::new();
        profiler.start_frame(false, &mut device).unwrap();
        profiler.begin_event("Open", &mut device).unwrap();

        let log = profiler.finish_frame().unwrap();
        assert!(event_time(&log, log.roots()[0]) >= 0.0);
        assert_eq!(profiler.depth(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_marker_lands_under_current_event() {
        let mut device = HeadlessDevice::new();
        let mut profiler = ProfilingContext::new();
        profiler.start_frame(false, &mut device).unwrap();
        profiler.begin_event("A", &mut device).unwrap();
        profiler.marker("checkpoint");
        profiler.end_event(&mut device).unwrap();

        let log = profiler.finish_frame().unwrap();
        let a = log.roots()[0];
        assert_eq!(
            log.node(log.children(a)[0]),
            Some(&LogNode::Marker { value: "checkpoint".to_string() })
        );
    }
}
