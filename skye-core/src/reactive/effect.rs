//! Effect Implementation
//!
//! A [`Computation`] is a re-runnable unit of work that reads reactive state
//! and is re-triggered when that state changes. Effects registered through
//! [`effect`](super::effect) and the internals of [`Memo`](super::Memo) are
//! both computations.
//!
//! # How Computations Work
//!
//! 1. Running a computation first unsubscribes it from every dep it holds.
//!
//! 2. The body then runs with the computation on top of the context stack,
//!    so every reactive read subscribes it again. After a run, the
//!    subscription set is exactly what this run read, which keeps tracking
//!    branch-sensitive.
//!
//! 3. While the body runs, `allow_mutate` is false and reactive writes are
//!    rejected. `running` makes a nested `run()` of the same computation a
//!    no-op.
//!
//! 4. A body may return [`Completion::Pending`]. The computation is then
//!    suspended: notifications resume it instead of re-running it, and it is
//!    resumed once the pending value settles.
//!
//! # States
//!
//! ```text
//! Idle -> Running -> Idle | Suspended
//! Suspended -> Idle            (resume)
//! any -> Disposed              (stop)
//! ```

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, trace, trace_span};

use super::batch;
use super::context::ReactiveContext;
use super::dep::Dep;
use super::id::{ComputationId, DepId};
use super::runtime::Runtime;
use super::suspense::{self, Pending};
use crate::error::{BoxError, ReactiveError, Result};

/// Name given to computations registered without one.
pub const DEFAULT_EFFECT_NAME: &str = "default";

/// What a computation body produced.
pub enum Completion {
    /// The body finished synchronously.
    Done,
    /// The body started asynchronous work that is still in flight.
    Pending(Pending),
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("Done"),
            Self::Pending(pending) => f.debug_tuple("Pending").field(pending).finish(),
        }
    }
}

/// Conversion from a body's return value into a [`Completion`].
///
/// Bodies can return `()`, a [`Pending`], a [`Completion`], or a `Result` of
/// any of those.
pub trait IntoCompletion {
    fn into_completion(self) -> std::result::Result<Completion, BoxError>;
}

impl IntoCompletion for () {
    fn into_completion(self) -> std::result::Result<Completion, BoxError> {
        Ok(Completion::Done)
    }
}

impl IntoCompletion for Completion {
    fn into_completion(self) -> std::result::Result<Completion, BoxError> {
        Ok(self)
    }
}

impl IntoCompletion for Pending {
    fn into_completion(self) -> std::result::Result<Completion, BoxError> {
        Ok(Completion::Pending(self))
    }
}

impl<T, E> IntoCompletion for std::result::Result<T, E>
where
    T: IntoCompletion,
    E: Into<BoxError>,
{
    fn into_completion(self) -> std::result::Result<Completion, BoxError> {
        match self {
            Ok(value) => value.into_completion(),
            Err(err) => Err(err.into()),
        }
    }
}

/// Observable lifecycle state of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectState {
    Idle,
    Running,
    Suspended,
    Disposed,
}

type Body = Box<dyn FnMut() -> std::result::Result<Completion, BoxError>>;
type TriggerHook = Box<dyn Fn() -> Result<()>>;

/// A re-runnable computation with dynamically tracked dependencies.
///
/// Cloning yields another handle to the same computation.
#[derive(Clone)]
pub struct Computation {
    inner: Rc<ComputationInner>,
}

pub(crate) struct ComputationInner {
    id: ComputationId,
    name: Cow<'static, str>,
    body: RefCell<Body>,
    /// Replaces scheduling through the batch manager when notified.
    on_trigger: Option<TriggerHook>,
    deps: RefCell<IndexMap<DepId, Dep>>,
    active: Cell<bool>,
    running: Cell<bool>,
    suspended: Cell<bool>,
    allow_mutate: Cell<bool>,
    /// Incremented per suspension so stale settlements are ignored.
    epoch: Cell<u64>,
    in_flight: RefCell<Option<Pending>>,
    run_count: Cell<usize>,
}

/// Non-owning handle held by deps and settlement continuations.
#[derive(Clone)]
pub(crate) struct WeakComputation(Weak<ComputationInner>);

impl WeakComputation {
    pub(crate) fn upgrade(&self) -> Option<Computation> {
        self.0.upgrade().map(|inner| Computation { inner })
    }
}

impl Computation {
    /// Create a computation without running it.
    pub fn new<F, R>(name: impl Into<Cow<'static, str>>, body: F) -> Self
    where
        F: FnMut() -> R + 'static,
        R: IntoCompletion,
    {
        Self::build(name.into(), body, None)
    }

    /// Create a computation whose notifications call `hook` instead of
    /// scheduling a run.
    pub(crate) fn with_trigger<F, R, H>(name: impl Into<Cow<'static, str>>, body: F, hook: H) -> Self
    where
        F: FnMut() -> R + 'static,
        R: IntoCompletion,
        H: Fn() -> Result<()> + 'static,
    {
        Self::build(name.into(), body, Some(Box::new(hook)))
    }

    fn build<F, R>(name: Cow<'static, str>, mut body: F, on_trigger: Option<TriggerHook>) -> Self
    where
        F: FnMut() -> R + 'static,
        R: IntoCompletion,
    {
        Self {
            inner: Rc::new(ComputationInner {
                id: ComputationId::new(),
                name,
                body: RefCell::new(Box::new(move || body().into_completion())),
                on_trigger,
                deps: RefCell::new(IndexMap::new()),
                active: Cell::new(true),
                running: Cell::new(false),
                suspended: Cell::new(false),
                allow_mutate: Cell::new(true),
                epoch: Cell::new(0),
                in_flight: RefCell::new(None),
                run_count: Cell::new(0),
            }),
        }
    }

    pub fn id(&self) -> ComputationId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> EffectState {
        if !self.inner.active.get() {
            EffectState::Disposed
        } else if self.inner.running.get() {
            EffectState::Running
        } else if self.inner.suspended.get() {
            EffectState::Suspended
        } else {
            EffectState::Idle
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.suspended.get()
    }

    /// False strictly while the body's synchronous pass is executing.
    pub fn allows_mutation(&self) -> bool {
        self.inner.allow_mutate.get()
    }

    /// Number of times the body has been invoked.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Number of deps this computation is subscribed to.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    /// Whether this computation is currently subscribed to `dep`.
    pub fn depends_on(&self, dep: &Dep) -> bool {
        self.inner.deps.borrow().contains_key(&dep.id())
    }

    /// The pending value this computation is suspended on.
    ///
    /// Awaiting it is how callers observe a rejection; the engine itself
    /// only waits for settlement.
    pub fn pending(&self) -> Option<Pending> {
        self.inner.in_flight.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Computation) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Execute the body within a tracking context.
    ///
    /// Does nothing if the computation is disposed, already running, or
    /// suspended. An error returned by the body is reported as
    /// [`ReactiveError::ComputationBody`] once the run has been cleaned up.
    pub fn run(&self) -> Result<()> {
        let inner = &*self.inner;
        if !inner.active.get() || inner.running.get() || inner.suspended.get() {
            trace!(effect = %inner.name, id = %inner.id, state = ?self.state(), "skipping run");
            return Ok(());
        }

        let span = trace_span!("effect", name = %inner.name, id = %inner.id);
        let _entered = span.enter();

        let outcome = {
            let _guard = RunGuard::enter(self);
            let mut body = inner.body.borrow_mut();
            (&mut **body)()
        };
        inner.run_count.set(inner.run_count.get() + 1);

        match outcome {
            Ok(Completion::Done) => Ok(()),
            Ok(Completion::Pending(pending)) => self.suspend_on(pending),
            Err(source) => Err(ReactiveError::ComputationBody {
                effect: inner.name.to_string(),
                source,
            }),
        }
    }

    /// Mark the computation as waiting on asynchronous work.
    pub fn suspend(&self) {
        if self.inner.active.get() && !self.inner.suspended.replace(true) {
            trace!(effect = %self.inner.name, id = %self.inner.id, "suspended");
        }
    }

    /// Wake a suspended computation. The body is not re-run.
    pub fn resume(&self) {
        if self.inner.suspended.replace(false) {
            self.inner.in_flight.borrow_mut().take();
            trace!(effect = %self.inner.name, id = %self.inner.id, "resumed");
        }
    }

    /// Unsubscribe from everything and never run again.
    pub fn stop(&self) {
        if !self.inner.active.replace(false) {
            return;
        }

        self.cleanup();
        self.inner.suspended.set(false);
        self.inner.in_flight.borrow_mut().take();
        Runtime::release(self.inner.id);
        debug!(effect = %self.inner.name, id = %self.inner.id, "stopped");
    }

    /// React to a notification from one of the deps.
    pub(crate) fn trigger(&self) -> Result<()> {
        match &self.inner.on_trigger {
            Some(hook) => hook(),
            None => batch::schedule_effect(self),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakComputation {
        WeakComputation(Rc::downgrade(&self.inner))
    }

    /// Record `dep` in the subscription set.
    pub(crate) fn link(&self, dep: &Dep) {
        self.inner
            .deps
            .borrow_mut()
            .entry(dep.id())
            .or_insert_with(|| dep.clone());
    }

    /// Called by a settlement continuation.
    pub(crate) fn settle(&self, epoch: u64) {
        if !self.inner.active.get() || self.inner.epoch.get() != epoch {
            trace!(effect = %self.inner.name, id = %self.inner.id, epoch, "ignoring stale settlement");
            return;
        }
        self.resume();
    }

    /// Suspend on `pending` and spawn its settlement continuation.
    ///
    /// If the continuation cannot be spawned the suspension is rolled back,
    /// so the computation is never left waiting on nothing.
    fn suspend_on(&self, pending: Pending) -> Result<()> {
        if !self.inner.active.get() {
            return Ok(());
        }

        let epoch = self.inner.epoch.get() + 1;
        self.inner.epoch.set(epoch);
        self.suspend();
        *self.inner.in_flight.borrow_mut() = Some(pending.clone());

        if let Err(err) = suspense::watch(self, epoch, pending) {
            self.inner.suspended.set(false);
            self.inner.in_flight.borrow_mut().take();
            return Err(err);
        }
        Ok(())
    }

    fn cleanup(&self) {
        let deps = std::mem::take(&mut *self.inner.deps.borrow_mut());
        for dep in deps.values() {
            dep.unsubscribe(self.inner.id);
        }
    }
}

impl Drop for ComputationInner {
    fn drop(&mut self) {
        for dep in self.deps.get_mut().values() {
            dep.unsubscribe(self.id);
        }
    }
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

/// Holds a computation in the running state for the duration of its body.
///
/// Dropping restores `allow_mutate` and `running`, then pops the context
/// stack, on every exit path including panics.
struct RunGuard<'a> {
    computation: &'a Computation,
    _context: ReactiveContext,
}

impl<'a> RunGuard<'a> {
    fn enter(computation: &'a Computation) -> Self {
        computation.inner.running.set(true);
        computation.cleanup();
        let context = ReactiveContext::enter(computation);
        computation.inner.allow_mutate.set(false);
        Self {
            computation,
            _context: context,
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.computation.inner.allow_mutate.set(true);
        self.computation.inner.running.set(false);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
