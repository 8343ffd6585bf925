//! Reactive Runtime
//!
//! The runtime is the per-thread coordinator behind the public entry points.
//! It owns every registered effect until that effect is stopped, holds the
//! runtime configuration, and exposes the spawner used for suspended
//! effects.
//!
//! # How It Works
//!
//! 1. [`effect`] creates a [`Computation`], registers it, and runs it once
//!    to establish its dependencies.
//!
//! 2. The registry keeps a strong reference, so the effect stays subscribed
//!    even if the returned [`Disposer`] is dropped. Deps only hold weak
//!    references.
//!
//! 3. [`Disposer::dispose`] stops the computations it covers, which
//!    unsubscribes them and releases the registry's reference.
//!
//! # Thread Safety
//!
//! Reactive roots are single-threaded. All runtime state is thread-local
//! and every handle is `!Send`.

use std::borrow::Cow;
use std::cell::RefCell;

use futures_util::future::LocalBoxFuture;
use indexmap::IndexMap;
use tracing::{debug, error};

use super::context::ReactiveContext;
use super::effect::{Computation, IntoCompletion, DEFAULT_EFFECT_NAME};
use super::id::ComputationId;
use super::suspense;
use crate::config::RuntimeConfig;
use crate::error::Result;

thread_local! {
    static LIVE: RefCell<IndexMap<ComputationId, Computation>> = RefCell::new(IndexMap::new());
    static CONFIG: RefCell<RuntimeConfig> = RefCell::new(RuntimeConfig::default());
}

/// The per-thread reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Keep `computation` alive until it is stopped.
    pub(crate) fn register(computation: &Computation) {
        LIVE.with(|live| {
            live.borrow_mut()
                .insert(computation.id(), computation.clone());
        });
    }

    /// Drop the registry's reference to a stopped computation.
    pub(crate) fn release(id: ComputationId) {
        let released = LIVE.with(|live| live.borrow_mut().shift_remove(&id));
        drop(released);
    }

    /// Number of effects that are registered and not yet stopped.
    pub fn live_count() -> usize {
        LIVE.with(|live| live.borrow().len())
    }

    /// Install a configuration for this thread.
    pub fn configure(config: RuntimeConfig) -> Result<()> {
        config.validate()?;
        debug!(?config, "configured reactive runtime");
        CONFIG.with(|slot| *slot.borrow_mut() = config);
        Ok(())
    }

    pub fn config() -> RuntimeConfig {
        CONFIG.with(|slot| slot.borrow().clone())
    }

    pub(crate) fn max_update_depth() -> usize {
        CONFIG.with(|slot| slot.borrow().max_update_depth)
    }

    /// Install the spawner for settlement continuations on this thread.
    ///
    /// Without one, `tokio::task::spawn_local` is used.
    pub fn set_spawner<F>(spawner: F)
    where
        F: Fn(LocalBoxFuture<'static, ()>) + 'static,
    {
        suspense::set_spawner(spawner);
    }

    /// The computation currently being tracked, if any.
    pub fn current() -> Option<Computation> {
        ReactiveContext::current()
    }

    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}

// ----------------------------------------------------------------------------
// Entry points
// ----------------------------------------------------------------------------

/// Options for [`effect_with`].
#[derive(Debug, Clone)]
pub struct EffectOptions {
    name: Option<Cow<'static, str>>,
    immediate: bool,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self {
            name: None,
            immediate: true,
        }
    }

    /// Logical name used in logs and errors.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether to run the effect as soon as it is registered. A deferred
    /// effect tracks nothing until it is run for the first time.
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Stops a group of effects.
///
/// Dropping a `Disposer` does not stop anything.
#[must_use = "dropping a Disposer leaves its effects running; call `dispose` to stop them"]
#[derive(Debug)]
pub struct Disposer {
    computations: Vec<Computation>,
}

impl Disposer {
    fn new(computations: Vec<Computation>) -> Self {
        Self { computations }
    }

    /// Stop every effect covered by this disposer.
    pub fn dispose(self) {
        self.stop();
    }

    /// Like [`dispose`](Self::dispose), without giving up the handle.
    pub fn stop(&self) {
        for computation in &self.computations {
            computation.stop();
        }
    }

    pub fn computations(&self) -> &[Computation] {
        &self.computations
    }

    /// Look up an effect by the name it was registered under.
    pub fn get(&self, name: &str) -> Option<&Computation> {
        self.computations
            .iter()
            .find(|computation| computation.name() == name)
    }

    pub fn is_disposed(&self) -> bool {
        self.computations
            .iter()
            .all(|computation| !computation.is_active())
    }
}

/// Register `body` as an effect and run it immediately.
///
/// An error from the first run is logged; the effect stays registered and
/// runs again when something it read changes. Use [`try_effect`] to receive
/// the error instead.
pub fn effect<F, R>(body: F) -> Disposer
where
    F: FnMut() -> R + 'static,
    R: IntoCompletion,
{
    effect_with(EffectOptions::new(), body)
}

/// Register `body` with explicit [`EffectOptions`].
pub fn effect_with<F, R>(options: EffectOptions, body: F) -> Disposer
where
    F: FnMut() -> R + 'static,
    R: IntoCompletion,
{
    let name = options
        .name
        .unwrap_or(Cow::Borrowed(DEFAULT_EFFECT_NAME));
    let computation = Computation::new(name, body);
    start(&computation, options.immediate);
    Disposer::new(vec![computation])
}

/// Register `body` and return the error of its first run, if any.
///
/// On failure the effect is stopped before the error is returned.
pub fn try_effect<F, R>(body: F) -> Result<Disposer>
where
    F: FnMut() -> R + 'static,
    R: IntoCompletion,
{
    let computation = Computation::new(DEFAULT_EFFECT_NAME, body);
    Runtime::register(&computation);
    if let Err(err) = computation.run() {
        computation.stop();
        return Err(err);
    }
    Ok(Disposer::new(vec![computation]))
}

/// A keyed group of effects sharing one [`Disposer`].
///
/// ```rust,ignore
/// let disposer = Effects::new()
///     .add("render", move || render(&state))
///     .add("title", move || set_title(&state))
///     .start();
/// ```
#[must_use = "effects are not registered until `start` is called"]
#[derive(Default)]
pub struct Effects {
    computations: Vec<Computation>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F, R>(mut self, name: impl Into<Cow<'static, str>>, body: F) -> Self
    where
        F: FnMut() -> R + 'static,
        R: IntoCompletion,
    {
        self.computations.push(Computation::new(name, body));
        self
    }

    /// Register and run every effect in insertion order.
    pub fn start(self) -> Disposer {
        for computation in &self.computations {
            start(computation, true);
        }
        Disposer::new(self.computations)
    }
}

fn start(computation: &Computation, immediate: bool) {
    Runtime::register(computation);
    if !immediate {
        return;
    }
    if let Err(err) = computation.run() {
        error!(
            effect = %computation.name(),
            id = %computation.id(),
            error = %err,
            "effect failed on first run"
        );
    }
}
