//! Write Middleware
//!
//! A target can carry an ordered chain of interceptors that transform a
//! value before a reactive write stores it. Each interceptor sees the key,
//! the value produced so far, and the value currently stored, and may be
//! gated by a condition over the same three inputs.
//!
//! Middleware runs after the mutation guard and before the equality check,
//! so a write that a middleware maps back to the stored value notifies
//! nobody.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

type TransformFn<V> = Rc<dyn Fn(&str, V, Option<&V>) -> V>;
type ConditionFn<V> = Rc<dyn Fn(&str, &V, Option<&V>) -> bool>;

struct Middleware<V> {
    transform: TransformFn<V>,
    condition: Option<ConditionFn<V>>,
}

impl<V> Clone for Middleware<V> {
    fn clone(&self) -> Self {
        Self {
            transform: Rc::clone(&self.transform),
            condition: self.condition.clone(),
        }
    }
}

/// Ordered write interceptors for one target.
pub(crate) struct MiddlewareChain<V> {
    entries: RefCell<Vec<Middleware<V>>>,
}

impl<V> MiddlewareChain<V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn push<F>(&self, transform: F, condition: Option<ConditionFn<V>>)
    where
        F: Fn(&str, V, Option<&V>) -> V + 'static,
    {
        self.entries.borrow_mut().push(Middleware {
            transform: Rc::new(transform),
            condition,
        });
    }

    pub(crate) fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Run `value` through every applicable interceptor, in registration
    /// order.
    ///
    /// The chain is copied first, so an interceptor may register or clear
    /// middleware without affecting the write in progress.
    pub(crate) fn apply(&self, key: &str, value: V, old: Option<&V>) -> V {
        let entries = self.entries.borrow().clone();
        entries.iter().fold(value, |value, middleware| {
            let applies = middleware
                .condition
                .as_ref()
                .map_or(true, |condition| condition(key, &value, old));
            if applies {
                (middleware.transform)(key, value, old)
            } else {
                trace!(key, "middleware skipped by its condition");
                value
            }
        })
    }
}

impl<V> fmt::Debug for MiddlewareChain<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("len", &self.len())
            .finish()
    }
}

pub(crate) fn condition<V, C>(condition: C) -> ConditionFn<V>
where
    C: Fn(&str, &V, Option<&V>) -> bool + 'static,
{
    Rc::new(condition)
}
