//! Dependency Sets
//!
//! A [`Dep`] is the set of computations subscribed to one reactive
//! property. Reading the property calls [`Dep::depend`], writing it calls
//! [`Dep::notify`].
//!
//! # Ownership
//!
//! The proxy's per-property map owns each `Dep`, and every computation owns
//! handles to the `Dep`s it currently reads. A `Dep` only holds weak
//! references to its subscribers, so it can drop them during cleanup without
//! keeping them alive.
//!
//! # Notification order
//!
//! `notify` snapshots the subscriber set before visiting it. Subscribers are
//! visited once each, in subscription order, even if re-running one of them
//! rewires the set. Subscribers added during the pass are not visited until
//! the next write.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{error, trace, warn};

use super::context::ReactiveContext;
use super::effect::{Computation, WeakComputation};
use super::id::{ComputationId, DepId};
use super::runtime::Runtime;
use crate::error::{ReactiveError, Result};

thread_local! {
    static NOTIFY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// The set of computations subscribed to a single reactive property.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

struct DepInner {
    id: DepId,
    subscribers: RefCell<IndexMap<ComputationId, WeakComputation>>,
}

impl Dep {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DepInner {
                id: DepId::new(),
                subscribers: RefCell::new(IndexMap::new()),
            }),
        }
    }

    pub fn id(&self) -> DepId {
        self.inner.id
    }

    /// Subscribe the running computation, if there is one.
    pub fn depend(&self) {
        if let Some(computation) = ReactiveContext::current() {
            self.subscribe(&computation);
        }
    }

    /// Link `computation` and this dep in both directions.
    pub(crate) fn subscribe(&self, computation: &Computation) {
        if !computation.is_active() {
            return;
        }

        self.inner
            .subscribers
            .borrow_mut()
            .entry(computation.id())
            .or_insert_with(|| computation.downgrade());
        computation.link(self);
    }

    pub(crate) fn unsubscribe(&self, id: ComputationId) {
        self.inner.subscribers.borrow_mut().shift_remove(&id);
    }

    /// Re-run or resume every subscriber present right now.
    ///
    /// Suspended subscribers are resumed instead of re-run. A failing
    /// subscriber is logged and does not stop the others from being visited.
    pub fn notify(&self) -> Result<()> {
        let _depth = NotifyDepth::enter()?;

        let subscribers: SmallVec<[Computation; 8]> = self
            .inner
            .subscribers
            .borrow()
            .values()
            .filter_map(WeakComputation::upgrade)
            .collect();

        trace!(dep = %self.inner.id, subscribers = subscribers.len(), "notify");

        for computation in subscribers {
            if computation.is_suspended() {
                computation.resume();
                continue;
            }
            if let Err(err) = computation.trigger() {
                error!(
                    effect = %computation.name(),
                    id = %computation.id(),
                    error = %err,
                    "effect failed during notification"
                );
            }
        }

        Ok(())
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    pub fn has_subscriber(&self, computation: &Computation) -> bool {
        self.inner
            .subscribers
            .borrow()
            .contains_key(&computation.id())
    }

    /// Subscriber ids in subscription order.
    pub fn subscriber_ids(&self) -> Vec<ComputationId> {
        self.inner.subscribers.borrow().keys().copied().collect()
    }

    pub fn ptr_eq(&self, other: &Dep) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.inner.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Counts notifications nested inside one another.
struct NotifyDepth;

impl NotifyDepth {
    fn enter() -> Result<Self> {
        let limit = Runtime::max_update_depth();
        let depth = NOTIFY_DEPTH.with(Cell::get);
        if depth >= limit {
            warn!(limit, "update depth exceeded, dropping notification");
            return Err(ReactiveError::UpdateDepthExceeded { limit });
        }
        NOTIFY_DEPTH.with(|d| d.set(depth + 1));
        Ok(Self)
    }
}

impl Drop for NotifyDepth {
    fn drop(&mut self) {
        NOTIFY_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
