//! Ordered sets of (run loop, mode) pairs.

use crate::run_loop::{RunLoop, RunLoopMode};
use crate::source::Source;

/// An ordered, duplicate-free list of (loop, mode) pairs a pending operation
/// is delivered on.
#[derive(Debug, Clone, Default)]
pub struct ScheduleList {
    entries: Vec<(RunLoop, RunLoopMode)>,
}

impl ScheduleList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pair. Returns `false` if it was already present.
    pub fn add(&mut self, run_loop: &RunLoop, mode: &RunLoopMode) -> bool {
        if self.contains(run_loop, mode) {
            return false;
        }
        self.entries.push((run_loop.clone(), mode.clone()));
        true
    }

    /// Remove a pair. Returns `false` if it was not present.
    pub fn remove(&mut self, run_loop: &RunLoop, mode: &RunLoopMode) -> bool {
        match self
            .entries
            .iter()
            .position(|(l, m)| l == run_loop && m == mode)
        {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Whether the pair is present.
    pub fn contains(&self, run_loop: &RunLoop, mode: &RunLoopMode) -> bool {
        self.entries
            .iter()
            .any(|(l, m)| l == run_loop && m == mode)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate the pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(RunLoop, RunLoopMode)> {
        self.entries.iter()
    }

    /// Attach `source` to every pair.
    pub fn schedule(&self, source: &Source) {
        for (run_loop, mode) in &self.entries {
            run_loop.add_source(source, mode);
        }
    }

    /// Detach `source` from every pair.
    pub fn unschedule(&self, source: &Source) {
        for (run_loop, mode) in &self.entries {
            run_loop.remove_source(source, mode);
        }
    }

    /// Wake every loop that is parked in a mode containing `source`.
    pub fn wake_waiting(&self, source: &Source) {
        for (run_loop, _) in &self.entries {
            if run_loop.is_waiting_on(source) {
                run_loop.wake_up();
            }
        }
    }
}
