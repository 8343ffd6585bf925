//! Suspension Controller
//!
//! When a computation body returns a [`Pending`] value, the computation is
//! suspended and a continuation is spawned on the local executor. The
//! continuation waits for the value to settle and then resumes the
//! computation, unless it was stopped, dropped, or re-suspended in the
//! meantime.
//!
//! The engine never interprets a rejection. It is logged at debug level and
//! left for whoever else awaits the same `Pending`.
//!
//! # Executors
//!
//! Continuations are spawned with `tokio::task::spawn_local` by default,
//! which must be called from inside a [`tokio::task::LocalSet`]. Outside one,
//! the computation is not suspended and its run fails with
//! [`ReactiveError::NoLocalExecutor`]. Hosts with a different event loop
//! install their own spawner:
//!
//! ```rust,ignore
//! skye_core::Runtime::set_spawner(|task| wasm_bindgen_futures::spawn_local(task));
//! ```

use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_util::future::{LocalBoxFuture, Shared};
use futures_util::FutureExt;
use tracing::{debug, trace, warn};

use super::effect::Computation;
use crate::error::{AsyncSettlementError, BoxError, ReactiveError, Result};

type SpawnFn = Rc<dyn Fn(LocalBoxFuture<'static, ()>)>;

thread_local! {
    static SPAWNER: RefCell<Option<SpawnFn>> = const { RefCell::new(None) };
}

/// A shared handle to asynchronous work started by a computation body.
///
/// Every clone observes the same outcome. `Pending` is itself a future, so
/// callers can simply `.await` it.
#[derive(Clone)]
pub struct Pending {
    inner: Shared<LocalBoxFuture<'static, Result<(), AsyncSettlementError>>>,
}

impl Pending {
    /// Wrap a fallible future.
    pub fn new<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<(), E>> + 'static,
        E: Into<BoxError>,
    {
        let future = async move {
            future
                .await
                .map_err(|err| AsyncSettlementError::new(err.into().to_string()))
        };
        Self {
            inner: future.boxed_local().shared(),
        }
    }

    /// Wrap a future that cannot fail.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        Self::new(async move {
            future.await;
            Ok::<(), Infallible>(())
        })
    }

    /// Another handle to the same outcome.
    pub fn observe(&self) -> Pending {
        self.clone()
    }

    pub fn is_settled(&self) -> bool {
        self.inner.peek().is_some()
    }

    /// The outcome, once settled.
    pub fn outcome(&self) -> Option<Result<(), AsyncSettlementError>> {
        self.inner.peek().cloned()
    }
}

impl Future for Pending {
    type Output = Result<(), AsyncSettlementError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Install the spawner used for settlement continuations on this thread.
pub fn set_spawner<F>(spawner: F)
where
    F: Fn(LocalBoxFuture<'static, ()>) + 'static,
{
    SPAWNER.with(|slot| *slot.borrow_mut() = Some(Rc::new(spawner)));
}

/// Go back to `tokio::task::spawn_local`.
pub fn reset_spawner() {
    SPAWNER.with(|slot| slot.borrow_mut().take());
}

fn spawn(task: LocalBoxFuture<'static, ()>) -> bool {
    let custom = SPAWNER.with(|slot| slot.borrow().clone());
    if let Some(spawner) = custom {
        spawner(task);
        return true;
    }

    // `spawn_local` panics without a LocalSet; report that as a refusal
    if tokio::runtime::Handle::try_current().is_err() {
        return false;
    }
    panic::catch_unwind(AssertUnwindSafe(move || {
        tokio::task::spawn_local(task);
    }))
    .is_ok()
}

/// Resume `computation` once `pending` settles, if `epoch` is still current.
///
/// Fails with [`ReactiveError::NoLocalExecutor`] when the continuation could
/// not be spawned.
pub(crate) fn watch(computation: &Computation, epoch: u64, pending: Pending) -> Result<()> {
    let weak = computation.downgrade();
    let task = async move {
        if let Err(err) = pending.await {
            debug!(error = %err, "pending value rejected");
        }
        match weak.upgrade() {
            Some(computation) => computation.settle(epoch),
            None => trace!(epoch, "computation dropped before settlement"),
        }
    };

    if spawn(task.boxed_local()) {
        Ok(())
    } else {
        warn!(effect = %computation.name(), id = %computation.id(), "no local executor for settlement");
        Err(ReactiveError::NoLocalExecutor {
            effect: computation.name().to_owned(),
        })
    }
}
