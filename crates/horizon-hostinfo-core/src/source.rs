//! Fireable completion sources.
//!
//! A [`Source`] is the unit a [`RunLoop`] dispatches: it carries a perform
//! callback that runs once each time the source is signalled and claimed by a
//! loop running in one of the modes the source is attached to.
//!
//! Sources that are signalled before they are attached fire on the next
//! iteration of the loop without further stimulus, which makes them suitable
//! for synthetic completions (cache hits, cancellations).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::logging::targets;
use crate::run_loop::{RunLoop, RunLoopInner, RunLoopMode};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a [`Source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    fn next() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

type PerformFn = dyn Fn(&Source) + Send + Sync;
type ScheduleHookFn = dyn Fn(&RunLoop, &RunLoopMode) + Send + Sync;

struct SourceInner {
    id: SourceId,
    signalled: AtomicBool,
    valid: AtomicBool,
    perform: Box<PerformFn>,
    schedule_hook: Option<Box<ScheduleHookFn>>,
    attachments: Mutex<Vec<(Weak<RunLoopInner>, RunLoopMode)>>,
}

/// A fireable completion source. Cloning yields another handle to the same
/// source.
#[derive(Clone)]
pub struct Source {
    inner: Arc<SourceInner>,
}

impl Source {
    /// Create an unsignalled source with the given perform callback.
    pub fn new<F>(perform: F) -> Self
    where
        F: Fn(&Source) + Send + Sync + 'static,
    {
        Self::build(Box::new(perform), None)
    }

    /// Create a source whose `hook` runs every time it is attached to a
    /// (loop, mode) pair.
    pub fn with_schedule_hook<F, H>(perform: F, hook: H) -> Self
    where
        F: Fn(&Source) + Send + Sync + 'static,
        H: Fn(&RunLoop, &RunLoopMode) + Send + Sync + 'static,
    {
        Self::build(Box::new(perform), Some(Box::new(hook)))
    }

    /// Create a source that is already signalled.
    pub fn signalled<F>(perform: F) -> Self
    where
        F: Fn(&Source) + Send + Sync + 'static,
    {
        let source = Self::new(perform);
        source.signal();
        source
    }

    fn build(perform: Box<PerformFn>, schedule_hook: Option<Box<ScheduleHookFn>>) -> Self {
        let id = SourceId::next();
        tracing::trace!(target: targets::SOURCE, ?id, "source created");
        Self {
            inner: Arc::new(SourceInner {
                id,
                signalled: AtomicBool::new(false),
                valid: AtomicBool::new(true),
                perform,
                schedule_hook,
                attachments: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The source's identifier.
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    /// Mark the source as ready to fire.
    ///
    /// Signalling does not wake any loop; pair it with [`wake_loops`] or a
    /// targeted [`RunLoop::wake_up`] when a loop may be idle.
    ///
    /// [`wake_loops`]: Source::wake_loops
    pub fn signal(&self) {
        self.inner.signalled.store(true, Ordering::SeqCst);
    }

    /// Whether the source is signalled and has not fired yet.
    pub fn is_signalled(&self) -> bool {
        self.inner.signalled.load(Ordering::SeqCst)
    }

    /// Whether the source has not been invalidated.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::SeqCst)
    }

    /// Invalidate the source and detach it from every loop it is attached to.
    ///
    /// An invalidated source never fires again.
    pub fn invalidate(&self) {
        let attachments = {
            // Validity only changes under the attachments lock, so no attach
            // can slip in between the swap and the drain.
            let mut attachments = self.inner.attachments.lock();
            if !self.inner.valid.swap(false, Ordering::SeqCst) {
                return;
            }
            self.inner.signalled.store(false, Ordering::SeqCst);
            std::mem::take(&mut *attachments)
        };
        for (weak, mode) in attachments {
            if let Some(inner) = weak.upgrade() {
                RunLoop::from_inner(inner).remove_entry(self, &mode);
            }
        }
        tracing::trace!(target: targets::SOURCE, id = ?self.inner.id, "source invalidated");
    }

    /// Wake every loop the source is attached to.
    pub fn wake_loops(&self) {
        for run_loop in self.attached_loops() {
            run_loop.wake_up();
        }
    }

    /// Loops the source is currently attached to, without duplicates.
    pub fn attached_loops(&self) -> Vec<RunLoop> {
        let attachments = self.inner.attachments.lock();
        let mut loops: Vec<RunLoop> = Vec::with_capacity(attachments.len());
        for (weak, _) in attachments.iter() {
            if let Some(inner) = weak.upgrade() {
                let run_loop = RunLoop::from_inner(inner);
                if !loops.contains(&run_loop) {
                    loops.push(run_loop);
                }
            }
        }
        loops
    }

    /// Atomically take the signal. Returns `true` for exactly one caller per
    /// signal.
    pub(crate) fn try_claim(&self) -> bool {
        self.is_valid() && self.inner.signalled.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn perform(&self) {
        tracing::trace!(target: targets::SOURCE, id = ?self.inner.id, "source perform");
        (self.inner.perform)(self);
    }

    /// Record that the source sits in `run_loop` under `mode`. Returns
    /// `false`, recording nothing, once the source is invalidated.
    pub(crate) fn record_attachment(&self, run_loop: &RunLoop, mode: &RunLoopMode) -> bool {
        let mut attachments = self.inner.attachments.lock();
        if !self.is_valid() {
            return false;
        }
        attachments.push((run_loop.downgrade(), mode.clone()));
        true
    }

    pub(crate) fn run_schedule_hook(&self, run_loop: &RunLoop, mode: &RunLoopMode) {
        if let Some(hook) = &self.inner.schedule_hook {
            hook(run_loop, mode);
        }
    }

    pub(crate) fn detached(&self, run_loop: &RunLoop, mode: &RunLoopMode) {
        let mut attachments = self.inner.attachments.lock();
        if let Some(pos) = attachments
            .iter()
            .position(|(weak, m)| m == mode && run_loop.is(weak))
        {
            attachments.swap_remove(pos);
        }
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Source {}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.inner.id)
            .field("signalled", &self.is_signalled())
            .field("valid", &self.is_valid())
            .finish()
    }
}

static_assertions::assert_impl_all!(Source: Send, Sync);
