//! Cooperative run loop.
//!
//! A [`RunLoop`] owns, per [`RunLoopMode`], the set of [`Source`]s attached to
//! it. Running the loop in a mode performs the signalled sources of that mode
//! only, parking the thread on a condition variable while nothing is ready.
//!
//! Each thread has a lazily created loop reachable through
//! [`RunLoop::current`]. Other threads may attach sources to it and wake it,
//! but only its owner is expected to run it.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use horizon_hostinfo_core::{RunLoop, RunLoopMode, RunResult, Source};
//!
//! let run_loop = RunLoop::current();
//! let source = Source::signalled(|_| println!("fired"));
//! run_loop.add_source(&source, &RunLoopMode::DEFAULT);
//!
//! let result = run_loop.run_in_mode(&RunLoopMode::DEFAULT, Some(Duration::from_secs(1)), true);
//! assert_eq!(result, RunResult::HandledSource);
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::logging::targets;
use crate::source::Source;

/// A named sub-context of a run loop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunLoopMode(Cow<'static, str>);

impl RunLoopMode {
    /// The mode most sources are attached to.
    pub const DEFAULT: RunLoopMode = RunLoopMode(Cow::Borrowed("default"));

    /// Create a mode from a static name.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Create a mode with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// The mode's name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunLoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why [`RunLoop::run_in_mode`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    /// The mode has no sources attached.
    Finished,
    /// [`RunLoop::stop`] was called.
    Stopped,
    /// The timeout elapsed.
    TimedOut,
    /// A source was performed and the caller asked to return after one.
    HandledSource,
}

#[derive(Default)]
struct LoopState {
    modes: HashMap<RunLoopMode, Vec<Source>>,
    current_mode: Option<RunLoopMode>,
    waiting: bool,
    wake_pending: bool,
    stop_requested: bool,
}

pub(crate) struct RunLoopInner {
    state: Mutex<LoopState>,
    wakeup: Condvar,
}

thread_local! {
    static CURRENT: RunLoop = RunLoop::new();
}

/// Handle to a cooperative run loop. Cloning yields another handle to the
/// same loop.
#[derive(Clone)]
pub struct RunLoop {
    inner: Arc<RunLoopInner>,
}

impl RunLoop {
    /// Create a free-standing loop.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RunLoopInner {
                state: Mutex::new(LoopState::default()),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// The calling thread's loop.
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    pub(crate) fn from_inner(inner: Arc<RunLoopInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RunLoopInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn is(&self, weak: &Weak<RunLoopInner>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.inner), weak.as_ptr())
    }

    /// Attach `source` to this loop in `mode`.
    ///
    /// Attaching an already attached pair or an invalidated source does
    /// nothing. The source's schedule hook runs after the loop lock is
    /// released.
    pub fn add_source(&self, source: &Source, mode: &RunLoopMode) {
        if !source.is_valid() {
            return;
        }
        {
            let mut state = self.inner.state.lock();
            if state
                .modes
                .get(mode)
                .is_some_and(|sources| sources.contains(source))
            {
                return;
            }
            // Recorded under the loop lock so a concurrent `wake_loops` sees it.
            // A source invalidated since the check above is left out.
            if !source.record_attachment(self, mode) {
                return;
            }
            state.modes.entry(mode.clone()).or_default().push(source.clone());
            if source.is_signalled() {
                state.wake_pending = true;
                self.inner.wakeup.notify_all();
            }
        }
        tracing::trace!(target: targets::RUN_LOOP, id = ?source.id(), %mode, "source added");
        source.run_schedule_hook(self, mode);
    }

    /// Detach `source` from this loop in `mode`.
    pub fn remove_source(&self, source: &Source, mode: &RunLoopMode) {
        if self.remove_entry(source, mode) {
            source.detached(self, mode);
            tracing::trace!(target: targets::RUN_LOOP, id = ?source.id(), %mode, "source removed");
        }
    }

    pub(crate) fn remove_entry(&self, source: &Source, mode: &RunLoopMode) -> bool {
        let mut state = self.inner.state.lock();
        let Some(sources) = state.modes.get_mut(mode) else {
            return false;
        };
        let Some(pos) = sources.iter().position(|s| s == source) else {
            return false;
        };
        sources.remove(pos);
        if sources.is_empty() {
            state.modes.remove(mode);
        }
        true
    }

    /// Whether `source` is attached to this loop in `mode`.
    pub fn contains_source(&self, source: &Source, mode: &RunLoopMode) -> bool {
        self.inner
            .state
            .lock()
            .modes
            .get(mode)
            .is_some_and(|sources| sources.contains(source))
    }

    /// Run the loop in `mode`.
    ///
    /// Only sources attached in `mode` are performed. `timeout` of `None`
    /// runs until stopped, until the mode empties, or until a source is
    /// handled when `return_after_source_handled` is set. Sources are
    /// performed without the loop lock held, so they may re-enter the loop
    /// API, including nested runs.
    #[tracing::instrument(name = "horizon_hostinfo::run_loop", skip(self), target = "horizon_hostinfo_core::run_loop", level = "trace")]
    pub fn run_in_mode(
        &self,
        mode: &RunLoopMode,
        timeout: Option<Duration>,
        return_after_source_handled: bool,
    ) -> RunResult {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock();
        let previous_mode = state.current_mode.replace(mode.clone());

        let result = loop {
            if state.stop_requested {
                state.stop_requested = false;
                break RunResult::Stopped;
            }

            let sources = match state.modes.get(mode) {
                Some(sources) if !sources.is_empty() => sources.clone(),
                _ => break RunResult::Finished,
            };

            if self.perform_ready(&mut state, &sources, return_after_source_handled) {
                if return_after_source_handled {
                    break RunResult::HandledSource;
                }
                continue;
            }

            if state.wake_pending {
                state.wake_pending = false;
                continue;
            }

            match deadline {
                Some(deadline) if Instant::now() >= deadline => break RunResult::TimedOut,
                Some(deadline) => {
                    state.waiting = true;
                    let _ = self.inner.wakeup.wait_until(&mut state, deadline);
                    state.waiting = false;
                }
                None => {
                    state.waiting = true;
                    self.inner.wakeup.wait(&mut state);
                    state.waiting = false;
                }
            }
        };

        state.current_mode = previous_mode;
        tracing::trace!(target: targets::RUN_LOOP, ?result, "run finished");
        result
    }

    fn perform_ready(
        &self,
        state: &mut MutexGuard<'_, LoopState>,
        sources: &[Source],
        stop_after_one: bool,
    ) -> bool {
        let mut handled = false;
        for source in sources {
            if source.try_claim() {
                handled = true;
                MutexGuard::unlocked(state, || source.perform());
                if stop_after_one {
                    break;
                }
            }
        }
        handled
    }

    /// Wake the loop if it is idle, or make its next idle check return
    /// immediately.
    pub fn wake_up(&self) {
        let mut state = self.inner.state.lock();
        state.wake_pending = true;
        self.inner.wakeup.notify_all();
    }

    /// Make the innermost active run return [`RunResult::Stopped`].
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        state.stop_requested = true;
        self.inner.wakeup.notify_all();
    }

    /// Whether the loop is parked waiting for work.
    pub fn is_waiting(&self) -> bool {
        self.inner.state.lock().waiting
    }

    /// The mode of the innermost active run, if any.
    pub fn current_mode(&self) -> Option<RunLoopMode> {
        self.inner.state.lock().current_mode.clone()
    }

    /// Whether the loop is parked in a mode that contains `source`.
    pub fn is_waiting_on(&self, source: &Source) -> bool {
        let state = self.inner.state.lock();
        state.waiting
            && state
                .current_mode
                .as_ref()
                .and_then(|mode| state.modes.get(mode))
                .is_some_and(|sources| sources.contains(source))
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for RunLoop {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for RunLoop {}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RunLoop")
            .field("ptr", &Arc::as_ptr(&self.inner))
            .field("modes", &state.modes.keys().collect::<Vec<_>>())
            .field("current_mode", &state.current_mode)
            .field("waiting", &state.waiting)
            .finish()
    }
}

static_assertions::assert_impl_all!(RunLoop: Send, Sync);
static_assertions::assert_impl_all!(RunLoopMode: Send, Sync);
