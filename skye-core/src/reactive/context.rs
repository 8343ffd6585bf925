//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a reactive property is
//! read, the innermost running computation is recorded as its subscriber.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Running a computation pushes a
//! tracked frame and the returned guard pops it on drop, so the previous
//! computation becomes current again even if the body errors or panics.
//! [`untracked`] pushes a frame that hides the running computation from
//! reads without lifting its write restriction.

use std::cell::RefCell;

use super::effect::Computation;
use super::id::ComputationId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

#[derive(Clone)]
enum Frame {
    Tracked(Computation),
    Untracked,
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    computation: Option<ComputationId>,
}

impl ReactiveContext {
    /// Enter a tracking context for the given computation.
    pub(crate) fn enter(computation: &Computation) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .push(Frame::Tracked(computation.clone()));
        });

        Self {
            computation: Some(computation.id()),
        }
    }

    /// Enter a frame in which reads are not tracked.
    pub(crate) fn enter_untracked() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Frame::Untracked));
        Self { computation: None }
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        Self::current().is_some()
    }

    /// The computation that reads are attributed to, if any.
    pub fn current() -> Option<Computation> {
        CONTEXT_STACK.with(|stack| match stack.borrow().last() {
            Some(Frame::Tracked(computation)) => Some(computation.clone()),
            _ => None,
        })
    }

    pub fn current_id() -> Option<ComputationId> {
        Self::current().map(|computation| computation.id())
    }

    /// The innermost running computation, if it currently forbids writes.
    ///
    /// Untracked frames are skipped: hiding reads does not permit writes.
    pub(crate) fn mutation_blocker() -> Option<Computation> {
        CONTEXT_STACK.with(|stack| {
            stack.borrow().iter().rev().find_map(|frame| match frame {
                Frame::Tracked(computation) if !computation.allows_mutation() => {
                    Some(computation.clone())
                }
                Frame::Tracked(_) => None,
                Frame::Untracked => None,
            })
        })
    }

    /// Number of frames on the stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        if let Some(frame) = popped {
            let popped_id = match &frame {
                Frame::Tracked(computation) => Some(computation.id()),
                Frame::Untracked => None,
            };
            debug_assert_eq!(
                popped_id, self.computation,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.computation, popped_id
            );
        }
    }
}

/// Run `f` without attributing its reads to the running computation.
///
/// Writes inside `f` are still rejected while a computation body is
/// executing.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _frame = ReactiveContext::enter_untracked();
    f()
}
