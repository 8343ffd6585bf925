//! Skye Core
//!
//! This crate provides the reactive core of the Skye UI framework. It
//! implements:
//!
//! - Keyed reactive records with per-property dependency tracking
//! - Effects that re-run precisely when what they read changes
//! - Batching of writes into a single pass per effect
//! - Suspension and resumption of effects that start asynchronous work
//! - Cached derived values (memos)
//!
//! Components, templates, and the server are built on top of this crate and
//! only need [`reactive`], [`effect`], and [`batch`].
//!
//! # Architecture
//!
//! - `reactive`: records, deps, effects, batching, suspension
//! - `error`: the crate error type
//! - `config`: runtime tunables
//!
//! # Example
//!
//! ```rust
//! use skye_core::{effect, reactive, Target};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let state = reactive(&Target::from_fields([("count", 0)]));
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let disposer = effect({
//!     let (state, log) = (state.clone(), log.clone());
//!     move || log.borrow_mut().push(state.get("count").unwrap_or_default())
//! });
//!
//! state.set("count", 1).unwrap();
//! state.set("count", 1).unwrap(); // unchanged, no re-run
//! assert_eq!(*log.borrow(), vec![0, 1]);
//!
//! disposer.dispose();
//! ```

pub mod config;
pub mod error;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{AsyncSettlementError, BoxError, ReactiveError, ReactiveError as Error, Result};
pub use reactive::{
    batch, effect, effect_with, memo, reactive, try_effect, untracked, Completion, Computation,
    Disposer, EffectOptions, EffectState, Effects, Memo, Pending, Reactive, Runtime, Target,
};
