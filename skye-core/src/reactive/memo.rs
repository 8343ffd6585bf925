//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its getter and caches the result. The
//!    getter runs as a nested computation, so its reads subscribe the memo
//!    rather than whoever asked for the value.
//!
//! 2. When accessed again and nothing it read has changed, the cache is
//!    returned.
//!
//! 3. When a dependency changes and nobody is subscribed to the memo, it is
//!    only marked dirty and recomputes on next access.
//!
//! 4. When a dependency changes and the memo has subscribers, it recomputes
//!    right away and notifies them only if the value actually changed.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::trace;

use super::context::untracked;
use super::dep::Dep;
use super::effect::Computation;
use crate::error::{ReactiveError, Result};

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// The memo needs to recompute before its value can be used.
    Dirty,
}

/// A cached value derived from reactive state.
///
/// The `PartialEq` bound lets a recomputation that produces the same value
/// skip notifying subscribers.
pub struct Memo<T>
where
    T: Clone + PartialEq + 'static,
{
    inner: Rc<MemoInner<T>>,
}

struct MemoInner<T> {
    getter: Box<dyn Fn() -> T>,
    value: RefCell<Option<T>>,
    dirty: Cell<bool>,
    /// Subscribers of the memo itself.
    dep: Dep,
    /// Tracks what the getter reads.
    computation: Computation,
}

impl<T> Memo<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a memo. The getter does not run until the first access.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::named("memo", getter)
    }

    pub fn named<F>(name: impl Into<Cow<'static, str>>, getter: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let name = name.into();
        let inner = Rc::new_cyclic(|weak: &Weak<MemoInner<T>>| {
            let for_body = weak.clone();
            let body = move || {
                if let Some(memo) = for_body.upgrade() {
                    memo.store((memo.getter)());
                }
            };

            let for_trigger = weak.clone();
            let hook = move || match for_trigger.upgrade() {
                Some(memo) => memo.invalidate(),
                None => Ok(()),
            };

            MemoInner {
                getter: Box::new(getter),
                value: RefCell::new(None),
                dirty: Cell::new(true),
                dep: Dep::new(),
                computation: Computation::with_trigger(name, body, hook),
            }
        });

        Self { inner }
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the memo is read while computing itself. Use
    /// [`try_get`](Self::try_get) to handle that case.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the current value, or [`ReactiveError::CircularMemo`] if the
    /// memo is read while computing itself.
    ///
    /// A disposed memo returns its last value. If it was disposed before it
    /// ever computed, the getter is evaluated once, untracked.
    pub fn try_get(&self) -> Result<T> {
        let inner = &*self.inner;
        // Checked before tracking so a self-read never subscribes the memo to itself
        if inner.computation.is_running() {
            return Err(self.circular());
        }
        inner.dep.depend();

        if inner.dirty.get() {
            if inner.computation.is_active() {
                inner.computation.run()?;
            } else if !self.has_value() {
                trace!(memo = %inner.computation.name(), "evaluating disposed memo");
                inner.store(untracked(|| (inner.getter)()));
            }
        }

        match inner.value.borrow().clone() {
            Some(value) => Ok(value),
            None => Err(self.circular()),
        }
    }

    /// Read the cached value without tracking or recomputing.
    pub fn get_untracked(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    /// Mark the memo as needing recomputation.
    pub fn mark_dirty(&self) {
        self.inner.dirty.set(true);
    }

    pub fn state(&self) -> MemoState {
        if self.inner.dirty.get() {
            MemoState::Dirty
        } else {
            MemoState::Clean
        }
    }

    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Number of computations subscribed to this memo.
    pub fn dependent_count(&self) -> usize {
        self.inner.dep.subscriber_count()
    }

    /// Number of reactive values the getter read on its last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.computation.dependency_count()
    }

    /// Stop tracking. A disposed memo keeps returning its last value.
    pub fn dispose(&self) {
        self.inner.computation.stop();
    }

    fn circular(&self) -> ReactiveError {
        ReactiveError::CircularMemo {
            memo: self.inner.computation.name().to_owned(),
        }
    }
}

impl<T> MemoInner<T>
where
    T: Clone + PartialEq + 'static,
{
    fn store(&self, value: T) {
        *self.value.borrow_mut() = Some(value);
        self.dirty.set(false);
    }

    /// Called when something the getter read has changed.
    fn invalidate(&self) -> Result<()> {
        self.dirty.set(true);
        if self.dep.subscriber_count() == 0 {
            trace!(memo = %self.computation.name(), "marked dirty");
            return Ok(());
        }

        let previous = self.value.borrow().clone();
        self.computation.run()?;

        let changed = *self.value.borrow() != previous;
        if changed {
            self.dep.notify()
        } else {
            trace!(memo = %self.computation.name(), "recomputed to the same value");
            Ok(())
        }
    }
}

/// Create a [`Memo`].
pub fn memo<T, F>(getter: F) -> Memo<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Memo::new(getter)
}

impl<T> Clone for Memo<T>
where
    T: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("name", &self.inner.computation.name())
            .field("state", &self.state())
            .field("value", &*self.inner.value.borrow())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
