//! Reactive Primitives
//!
//! This module implements the reactive core: keyed reactive records,
//! dependency sets, effects, batching, and suspension of asynchronous
//! effects.
//!
//! # Concepts
//!
//! ## Reactive records
//!
//! A [`Target`] is a plain keyed record. [`reactive`] wraps it in a
//! [`Reactive`] proxy whose `get` records the running effect as a
//! subscriber of that key and whose `set` notifies the key's subscribers
//! when the value changes.
//!
//! ## Effects
//!
//! An effect is a [`Computation`] registered with [`effect`]. It runs once
//! immediately and again whenever something it read changes. Dependencies
//! are rebuilt on every run, so only the branches actually taken are
//! tracked.
//!
//! ## Batches
//!
//! [`batch`] defers effect runs until the outermost batch returns and runs
//! each affected effect once.
//!
//! ## Suspension
//!
//! An effect body may return a [`Pending`] value. The effect is then
//! suspended: notifications wake it instead of re-running it, and it is
//! resumed when the pending value settles.
//!
//! # Implementation Notes
//!
//! Everything is single-threaded. The running-effect stack, the batch queue,
//! the proxy registry, and the effect registry are thread-local, and deps
//! refer to their subscribers weakly.

mod batch;
mod context;
mod dep;
mod effect;
mod id;
mod memo;
mod middleware;
mod proxy;
mod runtime;
mod suspense;

pub use batch::{batch, is_batching, pending_len, schedule_effect};
pub use context::{untracked, ReactiveContext};
pub use dep::Dep;
pub use effect::{Completion, Computation, EffectState, IntoCompletion, DEFAULT_EFFECT_NAME};
pub use id::{ComputationId, DepId, TargetId};
pub use memo::{memo, Memo, MemoState};
pub use proxy::{evict, reactive, registry_len, Reactive, Target};
pub use runtime::{effect, effect_with, try_effect, Disposer, EffectOptions, Effects, Runtime};
pub use suspense::{reset_spawner, set_spawner, Pending};
