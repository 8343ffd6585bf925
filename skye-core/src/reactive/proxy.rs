//! Reactive Proxies
//!
//! A [`Target`] is a plain keyed record owned by the caller. [`reactive`]
//! wraps it in a [`Reactive`] proxy whose accessors do the bookkeeping:
//!
//! - `get` looks up (or lazily creates) the [`Dep`] for the key and
//!   subscribes the running computation to it.
//! - `set` refuses writes from inside a running computation body, skips
//!   writes that do not change the value, and otherwise writes and notifies.
//!
//! # Identity
//!
//! Each target carries an injected [`TargetId`]. Proxies are cached per
//! thread by that id, so wrapping the same target twice returns the same
//! proxy. The cache only holds weak references: a proxy lives as long as
//! someone holds it, and [`evict`] drops the entry explicitly when the
//! owning component goes away.
//!
//! The per-key deps and the write middleware belong to the target, not to
//! the proxy. Every proxy ever created for a target therefore shares one
//! set of subscriptions, and dropping or evicting a proxy never loses a
//! subscriber.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::context::ReactiveContext;
use super::dep::Dep;
use super::id::TargetId;
use super::middleware::{self, MiddlewareChain};
use crate::error::{ReactiveError, Result};

thread_local! {
    static PROXIES: RefCell<HashMap<TargetId, Weak<dyn Any>>> = RefCell::new(HashMap::new());
}

// ----------------------------------------------------------------------------
// Target
// ----------------------------------------------------------------------------

/// A keyed record that can be made reactive.
///
/// Cloning yields another handle to the same record. Accessors on `Target`
/// are raw: they neither track reads nor notify on writes.
pub struct Target<V = Value> {
    inner: Rc<TargetInner<V>>,
}

struct TargetInner<V> {
    id: TargetId,
    fields: RefCell<IndexMap<String, V>>,
    deps: RefCell<HashMap<String, Dep>>,
    middleware: MiddlewareChain<V>,
}

impl<V> Target<V>
where
    V: Clone + PartialEq + 'static,
{
    pub fn new() -> Self {
        Self::from_fields(std::iter::empty::<(String, V)>())
    }

    pub fn from_fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
    {
        Self {
            inner: Rc::new(TargetInner {
                id: TargetId::new(),
                fields: RefCell::new(
                    fields
                        .into_iter()
                        .map(|(key, value)| (key.into(), value))
                        .collect(),
                ),
                deps: RefCell::new(HashMap::new()),
                middleware: MiddlewareChain::new(),
            }),
        }
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.fields.borrow().get(key).cloned()
    }

    /// Write without notifying anyone. Returns the previous value.
    pub fn insert(&self, key: impl Into<String>, value: V) -> Option<V> {
        self.inner.fields.borrow_mut().insert(key.into(), value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.fields.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a write interceptor applied by every reactive `set` on this
    /// target, after any registered earlier.
    ///
    /// `transform` receives the key, the value produced so far, and the
    /// value currently stored.
    pub fn use_middleware<F>(&self, transform: F)
    where
        F: Fn(&str, V, Option<&V>) -> V + 'static,
    {
        self.inner.middleware.push(transform, None);
    }

    /// Like [`use_middleware`](Self::use_middleware), but only applied when
    /// `condition` holds for the key, the value so far, and the stored value.
    pub fn use_middleware_when<F, C>(&self, transform: F, condition: C)
    where
        F: Fn(&str, V, Option<&V>) -> V + 'static,
        C: Fn(&str, &V, Option<&V>) -> bool + 'static,
    {
        self.inner
            .middleware
            .push(transform, Some(middleware::condition(condition)));
    }

    pub fn clear_middleware(&self) {
        self.inner.middleware.clear();
    }

    pub fn middleware_len(&self) -> usize {
        self.inner.middleware.len()
    }

    fn with_field<R>(&self, key: &str, f: impl FnOnce(Option<&V>) -> R) -> R {
        f(self.inner.fields.borrow().get(key))
    }

    fn dep(&self, key: &str) -> Option<Dep> {
        self.inner.deps.borrow().get(key).cloned()
    }

    /// The dep for `key`, created on first use.
    fn dep_or_create(&self, key: &str) -> Dep {
        self.inner
            .deps
            .borrow_mut()
            .entry(key.to_owned())
            .or_default()
            .clone()
    }
}

impl Target<Value> {
    /// Build a target from any value that serializes to a JSON object.
    pub fn from_serialize<T>(value: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        Self::from_json(serde_json::to_value(value)?)
    }

    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_fields(map)),
            other => Err(ReactiveError::NotARecord {
                found: json_kind(&other),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl<V> Clone for Target<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> Default for Target<V>
where
    V: Clone + PartialEq + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for Target<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.inner.id)
            .field("fields", &*self.inner.fields.borrow())
            .field("middleware", &self.inner.middleware)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Reactive proxy
// ----------------------------------------------------------------------------

/// Tracking wrapper around a [`Target`].
pub struct Reactive<V = Value> {
    inner: Rc<ProxyInner<V>>,
}

struct ProxyInner<V> {
    target: Target<V>,
}

/// Create or reuse the proxy for `target`.
pub fn reactive<V>(target: &Target<V>) -> Reactive<V>
where
    V: Clone + PartialEq + 'static,
{
    let id = target.id();
    let cached = PROXIES.with(|proxies| proxies.borrow().get(&id).and_then(Weak::upgrade));
    if let Some(inner) = cached.and_then(|any| any.downcast::<ProxyInner<V>>().ok()) {
        return Reactive { inner };
    }

    let inner = Rc::new(ProxyInner {
        target: target.clone(),
    });
    let erased: Rc<dyn Any> = inner.clone();
    PROXIES.with(|proxies| {
        let mut proxies = proxies.borrow_mut();
        proxies.retain(|_, proxy| proxy.strong_count() > 0);
        proxies.insert(id, Rc::downgrade(&erased));
    });
    trace!(target = %id, "created proxy");

    Reactive { inner }
}

/// Forget the cached proxy for `id`. Returns whether an entry existed.
///
/// Existing proxy handles keep working; the next [`reactive`] call for the
/// target creates a fresh proxy.
pub fn evict(id: TargetId) -> bool {
    let removed = PROXIES.with(|proxies| proxies.borrow_mut().remove(&id));
    if removed.is_some() {
        debug!(target = %id, "evicted proxy");
    }
    removed.is_some()
}

/// Number of live proxies in this thread's registry.
pub fn registry_len() -> usize {
    PROXIES.with(|proxies| {
        proxies
            .borrow()
            .values()
            .filter(|proxy| proxy.strong_count() > 0)
            .count()
    })
}

impl<V> Reactive<V>
where
    V: Clone + PartialEq + 'static,
{
    pub fn id(&self) -> TargetId {
        self.inner.target.id()
    }

    /// The wrapped target, for raw access.
    pub fn target(&self) -> &Target<V> {
        &self.inner.target
    }

    pub fn ptr_eq(&self, other: &Reactive<V>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read `key`, subscribing the running computation.
    pub fn get(&self, key: &str) -> Option<V> {
        self.track(key);
        self.inner.target.get(key)
    }

    /// Tracked read that borrows the value instead of cloning it.
    ///
    /// The record stays borrowed while `f` runs, so `f` must not write to
    /// this target; use [`update`](Self::update) for read-modify-write.
    pub fn with<R>(&self, key: &str, f: impl FnOnce(Option<&V>) -> R) -> R {
        self.track(key);
        self.inner.target.with_field(key, f)
    }

    /// Tracked presence check.
    pub fn has(&self, key: &str) -> bool {
        self.track(key);
        self.inner.target.contains_key(key)
    }

    pub fn get_untracked(&self, key: &str) -> Option<V> {
        self.inner.target.get(key)
    }

    /// Write `key` and notify its subscribers if the value changed.
    ///
    /// The value first passes through the target's write middleware. The
    /// equality check compares the transformed value with the stored one.
    ///
    /// Fails with [`ReactiveError::MutationDuringComputation`] when called
    /// from a computation body; the stored value is left untouched.
    pub fn set(&self, key: impl Into<String>, value: V) -> Result<()> {
        let key = key.into();
        if let Some(running) = ReactiveContext::mutation_blocker() {
            debug!(key = %key, effect = %running.name(), "rejected write during computation");
            return Err(ReactiveError::MutationDuringComputation {
                key,
                effect: running.name().to_owned(),
            });
        }

        let target = &self.inner.target;
        let old = target.get(&key);
        let value = target.inner.middleware.apply(&key, value, old.as_ref());

        if old.as_ref() == Some(&value) {
            trace!(key = %key, "write left value unchanged");
            return Ok(());
        }

        target.insert(key.clone(), value);

        let dep = target.dep(&key);
        match dep {
            Some(dep) => dep.notify(),
            None => Ok(()),
        }
    }

    /// Read-modify-write through [`set`](Self::set). The read is untracked.
    ///
    /// `f` works on a copy of the stored value, so it may touch the target.
    pub fn update(&self, key: &str, f: impl FnOnce(Option<&V>) -> V) -> Result<()> {
        let current = self.inner.target.get(key);
        let value = f(current.as_ref());
        self.set(key, value)
    }

    /// The dep for `key`, if one has been created.
    pub fn dep(&self, key: &str) -> Option<Dep> {
        self.inner.target.dep(key)
    }

    fn track(&self, key: &str) {
        self.inner.target.dep_or_create(key).depend();
    }
}

impl Reactive<Value> {
    /// Untracked copy of every field as a JSON object.
    pub fn snapshot(&self) -> Value {
        let fields = self.inner.target.inner.fields.borrow();
        Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }
}

impl<V> Clone for Reactive<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Reactive<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("target", &self.inner.target)
            .field("tracked_keys", &self.inner.target.inner.deps.borrow().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
