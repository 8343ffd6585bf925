//! Batch Manager
//!
//! Outside a batch, a notified computation runs immediately. Inside
//! [`batch`], it is queued instead, and the queue is flushed once the
//! outermost batch returns. Each computation runs at most once per flush no
//! matter how many writes triggered it.
//!
//! # Algorithm
//!
//! 1. `batch` increments a per-thread depth counter and runs the closure.
//! 2. [`schedule_effect`] inserts into an insertion-ordered set keyed by
//!    computation id while the depth is positive.
//! 3. When the depth returns to zero, the set is drained and every entry is
//!    run. A failing entry is logged and the rest still run.

use std::cell::{Cell, RefCell};

use indexmap::IndexMap;
use tracing::{debug, error, trace};

use super::effect::Computation;
use super::id::ComputationId;
use crate::error::Result;

thread_local! {
    static BATCH: BatchState = BatchState::default();
}

#[derive(Default)]
struct BatchState {
    depth: Cell<usize>,
    pending: RefCell<IndexMap<ComputationId, Computation>>,
}

/// Run `f` with notifications deferred until the outermost batch exits.
///
/// If `f` panics, the queued computations are discarded rather than run.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let output = {
        let _scope = BatchScope::enter();
        f()
    };

    if depth() == 0 {
        flush();
    }
    output
}

/// Run `computation` now, or queue it if a batch is open.
pub fn schedule_effect(computation: &Computation) -> Result<()> {
    if depth() == 0 {
        return computation.run();
    }

    BATCH.with(|state| {
        state
            .pending
            .borrow_mut()
            .entry(computation.id())
            .or_insert_with(|| computation.clone());
    });
    trace!(effect = %computation.name(), id = %computation.id(), "queued for batch flush");
    Ok(())
}

pub fn is_batching() -> bool {
    depth() > 0
}

/// Number of distinct computations waiting for the current batch to end.
pub fn pending_len() -> usize {
    BATCH.with(|state| state.pending.borrow().len())
}

fn depth() -> usize {
    BATCH.with(|state| state.depth.get())
}

fn flush() {
    let pending = BATCH.with(|state| std::mem::take(&mut *state.pending.borrow_mut()));
    if pending.is_empty() {
        return;
    }

    debug!(count = pending.len(), "flushing batch");
    for computation in pending.into_values() {
        if let Err(err) = computation.run() {
            error!(
                effect = %computation.name(),
                id = %computation.id(),
                error = %err,
                "effect failed during batch flush"
            );
        }
    }
}

struct BatchScope;

impl BatchScope {
    fn enter() -> Self {
        BATCH.with(|state| state.depth.set(state.depth.get() + 1));
        Self
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let discarded = BATCH.with(|state| {
            let depth = state.depth.get().saturating_sub(1);
            state.depth.set(depth);
            if depth == 0 && std::thread::panicking() {
                std::mem::take(&mut *state.pending.borrow_mut())
            } else {
                IndexMap::new()
            }
        });
        if !discarded.is_empty() {
            debug!(count = discarded.len(), "discarding batch after panic");
        }
    }
}
