//! Integration Tests for the Reactive Core
//!
//! These tests drive records, effects, batches, memos, and suspension
//! together through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::json;
use skye_core::reactive::ReactiveContext;
use skye_core::{
    batch, effect, memo, reactive, Effects, EffectState, Pending, ReactiveError, Target,
};
use tokio::sync::oneshot;
use tokio::task::LocalSet;

fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
    let runs = Rc::new(Cell::new(0));
    (runs.clone(), runs)
}

/// Let settlement continuations on the local set make progress.
async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

/// The counter scenario: initial run, change, and same-value write.
#[test]
fn count_log_scenario() {
    let state = reactive(&Target::from_fields([("count", 0)]));
    let log = Rc::new(RefCell::new(Vec::new()));

    let _disposer = effect({
        let (state, log) = (state.clone(), log.clone());
        move || log.borrow_mut().push(state.get("count").unwrap())
    });
    assert_eq!(*log.borrow(), vec![0]);

    state.set("count", 1).unwrap();
    assert_eq!(*log.borrow(), vec![0, 1]);

    // Same value: no notification
    state.set("count", 1).unwrap();
    assert_eq!(*log.borrow(), vec![0, 1]);
}

/// Reading `a ? b : c` only subscribes to the branch actually taken.
#[test]
fn tracking_follows_branches() {
    let state = reactive(&Target::from_fields([
        ("a", json!(true)),
        ("b", json!("bee")),
        ("c", json!("sea")),
    ]));
    let seen = Rc::new(RefCell::new(Vec::new()));

    let disposer = effect({
        let (state, seen) = (state.clone(), seen.clone());
        move || {
            let value = if state.get("a") == Some(json!(true)) {
                state.get("b")
            } else {
                state.get("c")
            };
            seen.borrow_mut().push(value.unwrap());
        }
    });
    let computation = disposer.computations()[0].clone();

    assert!(computation.depends_on(&state.dep("a").unwrap()));
    assert!(computation.depends_on(&state.dep("b").unwrap()));
    assert!(state.dep("c").is_none());
    assert_eq!(computation.dependency_count(), 2);

    state.set("a", json!(false)).unwrap();
    assert!(computation.depends_on(&state.dep("a").unwrap()));
    assert!(computation.depends_on(&state.dep("c").unwrap()));
    assert!(!computation.depends_on(&state.dep("b").unwrap()));
    assert_eq!(state.dep("b").unwrap().subscriber_count(), 0);

    // `b` is no longer tracked, so writing it does nothing
    state.set("b", json!("buzz")).unwrap();
    assert_eq!(*seen.borrow(), vec![json!("bee"), json!("sea")]);
    assert_eq!(computation.run_count(), 2);
}

/// A write from an effect's own body is rejected and leaves the value alone.
#[test]
fn write_during_body_is_rejected() {
    let state = reactive(&Target::from_fields([("count", 0), ("mirror", 0)]));
    let errors = Rc::new(RefCell::new(Vec::new()));

    let _disposer = effect({
        let (state, errors) = (state.clone(), errors.clone());
        move || {
            let count = state.get("count").unwrap();
            if let Err(err) = state.set("mirror", count) {
                errors.borrow_mut().push(err);
            }
        }
    });

    // Rejected even though the value would not change
    assert_eq!(errors.borrow().len(), 1);
    state.set("count", 4).unwrap();

    let errors = errors.borrow();
    assert!(errors
        .iter()
        .all(|err| matches!(err, ReactiveError::MutationDuringComputation { .. })));
    assert_eq!(errors.len(), 2);
    assert_eq!(state.get_untracked("mirror"), Some(0));
}

/// An effect that re-wraps its target on every run keeps receiving writes.
#[test]
fn effect_wrapping_target_itself_sees_later_writes() {
    let target = Target::from_fields([("count", 0)]);
    let log = Rc::new(RefCell::new(Vec::new()));

    let _disposer = effect({
        let (target, log) = (target.clone(), log.clone());
        move || log.borrow_mut().push(reactive(&target).get("count").unwrap())
    });

    // No proxy outlives the statement that created it
    reactive(&target).set("count", 1).unwrap();
    reactive(&target).set("count", 2).unwrap();
    assert_eq!(*log.borrow(), vec![0, 1, 2]);
}

/// Write middleware runs before the change check and its output is stored.
#[test]
fn middleware_shapes_what_effects_observe() {
    let target = Target::from_fields([("query", json!(""))]);
    target.use_middleware_when(
        |_, value, _| json!(value.as_str().unwrap_or_default().trim()),
        |key, value, _| key == "query" && value.is_string(),
    );
    let state = reactive(&target);
    let (runs, runs_clone) = counter();

    let _disposer = effect({
        let state = state.clone();
        move || {
            state.get("query");
            runs_clone.set(runs_clone.get() + 1);
        }
    });

    state.set("query", json!("  rust ")).unwrap();
    assert_eq!(state.get_untracked("query"), Some(json!("rust")));
    assert_eq!(runs.get(), 2);

    // Trims to the stored value, so nothing changes
    state.set("query", json!("rust   ")).unwrap();
    assert_eq!(runs.get(), 2);
}

/// Many writes in one batch re-run the subscriber once.
#[test]
fn batched_writes_run_subscriber_once() {
    let state = reactive(&Target::from_fields([("count", 0)]));
    let (runs, runs_clone) = counter();

    let _disposer = effect({
        let state = state.clone();
        move || {
            state.get("count");
            runs_clone.set(runs_clone.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    batch(|| {
        for i in 1..=10 {
            state.set("count", i).unwrap();
        }
        assert_eq!(runs.get(), 1);
    });

    assert_eq!(runs.get(), 2);
    assert_eq!(state.get_untracked("count"), Some(10));
}

/// Nested batches flush once, when the outermost one returns.
#[test]
fn nested_batches_flush_at_outermost_exit() {
    let state = reactive(&Target::from_fields([("a", 0), ("b", 0)]));
    let (runs, runs_clone) = counter();

    let _disposer = effect({
        let state = state.clone();
        move || {
            state.get("a");
            state.get("b");
            runs_clone.set(runs_clone.get() + 1);
        }
    });

    batch(|| {
        state.set("a", 1).unwrap();
        batch(|| {
            state.set("b", 1).unwrap();
            batch(|| state.set("a", 2).unwrap());
        });
        assert_eq!(runs.get(), 1);
    });

    assert_eq!(runs.get(), 2);
}

/// Two effects reading disjoint keys never re-run each other.
#[test]
fn disjoint_subscribers_are_independent() {
    let state = reactive(&Target::from_fields([("left", 0), ("right", 0)]));
    let (left_runs, left_clone) = counter();
    let (right_runs, right_clone) = counter();

    let _left = effect({
        let state = state.clone();
        move || {
            state.get("left");
            left_clone.set(left_clone.get() + 1);
        }
    });
    let _right = effect({
        let state = state.clone();
        move || {
            state.get("right");
            right_clone.set(right_clone.get() + 1);
        }
    });

    state.set("left", 1).unwrap();
    assert_eq!((left_runs.get(), right_runs.get()), (2, 1));

    state.set("right", 1).unwrap();
    assert_eq!((left_runs.get(), right_runs.get()), (2, 2));
}

/// A failing effect is logged and does not stop its siblings.
#[test]
fn failing_effect_is_isolated() {
    let state = reactive(&Target::from_fields([("count", 0)]));
    let (runs, runs_clone) = counter();

    let _failing = effect({
        let state = state.clone();
        move || -> Result<(), ReactiveError> {
            if state.get("count") == Some(1) {
                return Err(ReactiveError::Config("renderer crashed".into()));
            }
            Ok(())
        }
    });
    let _healthy = effect({
        let state = state.clone();
        move || {
            state.get("count");
            runs_clone.set(runs_clone.get() + 1);
        }
    });

    assert!(state.set("count", 1).is_ok());
    assert_eq!(runs.get(), 2);

    // The failing effect is still subscribed and recovers
    state.set("count", 2).unwrap();
    assert_eq!(runs.get(), 3);
}

/// Disposing stops every effect in a keyed group.
#[test]
fn keyed_group_disposes_together() {
    let state = reactive(&Target::from_fields([("title", "a"), ("body", "b")]));
    let log = Rc::new(RefCell::new(Vec::new()));

    let disposer = Effects::new()
        .add("title", {
            let (state, log) = (state.clone(), log.clone());
            move || log.borrow_mut().push(format!("title:{}", state.get("title").unwrap()))
        })
        .add("body", {
            let (state, log) = (state.clone(), log.clone());
            move || log.borrow_mut().push(format!("body:{}", state.get("body").unwrap()))
        })
        .start();

    state.set("title", "x").unwrap();
    disposer.dispose();
    state.set("title", "y").unwrap();
    state.set("body", "z").unwrap();

    assert_eq!(*log.borrow(), vec!["title:a", "body:b", "title:x"]);
    assert_eq!(state.dep("title").unwrap().subscriber_count(), 0);
}

/// Reads inside a nested effect belong to the nested effect.
#[test]
fn nested_effects_attribute_reads_to_innermost() {
    let state = reactive(&Target::from_fields([("outer", 0), ("inner", 0)]));
    let (outer_runs, outer_clone) = counter();
    let inner_disposers = Rc::new(RefCell::new(Vec::new()));

    let _outer = effect({
        let (state, inner_disposers) = (state.clone(), inner_disposers.clone());
        move || {
            state.get("outer");
            outer_clone.set(outer_clone.get() + 1);

            let state = state.clone();
            let inner = effect(move || {
                state.get("inner");
            });
            inner_disposers.borrow_mut().push(inner);

            // Back on the outer effect after the nested one returns
            assert!(ReactiveContext::current().is_some());
        }
    });

    state.set("inner", 1).unwrap();
    assert_eq!(outer_runs.get(), 1);

    state.set("outer", 1).unwrap();
    assert_eq!(outer_runs.get(), 2);

    for disposer in inner_disposers.borrow_mut().drain(..) {
        disposer.dispose();
    }
}

/// Subscribers added while a notification is in progress wait for the next
/// write.
#[test]
fn notify_does_not_revisit_new_subscribers() {
    let state = reactive(&Target::from_fields([("count", 0)]));
    let late_runs = Rc::new(Cell::new(0));
    let spawned = Rc::new(RefCell::new(Vec::new()));

    let _spawner = effect({
        let (state, late_runs, spawned) = (state.clone(), late_runs.clone(), spawned.clone());
        move || {
            if state.get("count") == Some(1) && spawned.borrow().is_empty() {
                let (state, late_runs) = (state.clone(), late_runs.clone());
                let late = effect(move || {
                    state.get("count");
                    late_runs.set(late_runs.get() + 1);
                });
                spawned.borrow_mut().push(late);
            }
        }
    });

    state.set("count", 1).unwrap();
    // Only the registration run, not a second visit from the same pass
    assert_eq!(late_runs.get(), 1);

    state.set("count", 2).unwrap();
    assert_eq!(late_runs.get(), 2);
}

/// Memos feed effects and only notify when their value changes.
#[test]
fn memo_drives_effects_on_change_only() {
    let state = reactive(&Target::from_fields([("count", 1)]));
    let parity = memo({
        let state = state.clone();
        move || state.get("count").unwrap() % 2 == 0
    });
    let log = Rc::new(RefCell::new(Vec::new()));

    let _disposer = effect({
        let (parity, log) = (parity.clone(), log.clone());
        move || log.borrow_mut().push(parity.get())
    });
    assert_eq!(*log.borrow(), vec![false]);

    state.set("count", 2).unwrap();
    assert_eq!(*log.borrow(), vec![false, true]);

    // Parity unchanged: the effect is not re-run
    state.set("count", 4).unwrap();
    assert_eq!(*log.borrow(), vec![false, true]);
}

/// Without a local executor a pending effect stays idle and its siblings
/// still run.
#[test]
fn pending_effect_without_executor_is_contained() {
    let state = reactive(&Target::from_fields([("id", 0)]));
    let (runs, runs_clone) = counter();

    let fetching = effect({
        let state = state.clone();
        move || {
            state.get("id");
            Pending::from_future(async {})
        }
    });
    let _bystander = effect({
        let state = state.clone();
        move || {
            state.get("id");
            runs_clone.set(runs_clone.get() + 1);
        }
    });
    let computation = fetching.computations()[0].clone();
    assert_eq!(computation.state(), EffectState::Idle);

    state.set("id", 1).unwrap();
    assert_eq!(runs.get(), 2);
    assert_eq!(computation.run_count(), 2);
    assert_eq!(computation.state(), EffectState::Idle);
}

/// An effect returning a pending value is suspended until it settles.
#[tokio::test]
async fn pending_effect_suspends_until_settled() {
    LocalSet::new()
        .run_until(async {
            let state = reactive(&Target::from_fields([("query", 0)]));
            let (tx, rx) = oneshot::channel::<()>();
            let rx = Rc::new(RefCell::new(Some(rx)));
            let (runs, runs_clone) = counter();

            let disposer = effect({
                let state = state.clone();
                move || {
                    runs_clone.set(runs_clone.get() + 1);
                    state.get("query");
                    let rx = rx.borrow_mut().take();
                    Pending::from_future(async move {
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                    })
                }
            });
            let computation = disposer.computations()[0].clone();
            assert_eq!(computation.state(), EffectState::Suspended);

            // Not re-entered while in flight
            computation.run().unwrap();
            assert_eq!(runs.get(), 1);

            let observer = computation.pending().unwrap();
            tx.send(()).unwrap();
            observer.await.unwrap();
            settle().await;
            assert_eq!(computation.state(), EffectState::Idle);

            state.set("query", 1).unwrap();
            assert_eq!(runs.get(), 2);

            disposer.dispose();
        })
        .await;
}

/// A notification for a suspended effect wakes it without re-running it.
#[tokio::test]
async fn notification_resumes_instead_of_rerunning() {
    LocalSet::new()
        .run_until(async {
            let state = reactive(&Target::from_fields([("page", 0)]));
            let (_tx, rx) = oneshot::channel::<()>();
            let rx = Rc::new(RefCell::new(Some(rx)));
            let (runs, runs_clone) = counter();

            let disposer = effect({
                let state = state.clone();
                move || {
                    runs_clone.set(runs_clone.get() + 1);
                    state.get("page");
                    let rx = rx.borrow_mut().take();
                    Pending::from_future(async move {
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                    })
                }
            });
            let computation = disposer.computations()[0].clone();

            state.set("page", 1).unwrap();
            assert_eq!(runs.get(), 1);
            assert_eq!(computation.state(), EffectState::Idle);

            // Awake again, so the next write re-runs it
            state.set("page", 2).unwrap();
            assert_eq!(runs.get(), 2);

            disposer.dispose();
        })
        .await;
}

/// A settlement from an earlier run does not resume a later suspension.
#[tokio::test]
async fn stale_settlement_does_not_resume_newer_run() {
    LocalSet::new()
        .run_until(async {
            let state = reactive(&Target::from_fields([("page", 0)]));
            let (first_tx, first_rx) = oneshot::channel::<()>();
            let (_second_tx, second_rx) = oneshot::channel::<()>();
            let receivers = Rc::new(RefCell::new(vec![second_rx, first_rx]));

            let disposer = effect({
                let state = state.clone();
                move || {
                    state.get("page");
                    let rx = receivers.borrow_mut().pop();
                    Pending::from_future(async move {
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                    })
                }
            });
            let computation = disposer.computations()[0].clone();

            state.set("page", 1).unwrap(); // resume
            state.set("page", 2).unwrap(); // run again, suspended on the second receiver
            assert_eq!(computation.run_count(), 2);
            assert!(computation.is_suspended());

            first_tx.send(()).unwrap();
            settle().await;
            assert!(computation.is_suspended());

            disposer.dispose();
        })
        .await;
}

/// Stopping a suspended effect makes the late settlement a no-op.
#[tokio::test]
async fn stop_during_suspension_wins() {
    LocalSet::new()
        .run_until(async {
            let state = reactive(&Target::from_fields([("id", 0)]));
            let (tx, rx) = oneshot::channel::<()>();
            let rx = Rc::new(RefCell::new(Some(rx)));
            let (runs, runs_clone) = counter();

            let disposer = effect({
                let state = state.clone();
                move || {
                    runs_clone.set(runs_clone.get() + 1);
                    state.get("id");
                    let rx = rx.borrow_mut().take();
                    Pending::from_future(async move {
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                    })
                }
            });
            let computation = disposer.computations()[0].clone();
            let observer = computation.pending().unwrap();

            disposer.dispose();
            tx.send(()).unwrap();
            observer.await.unwrap();
            settle().await;

            assert_eq!(computation.state(), EffectState::Disposed);
            state.set("id", 1).unwrap();
            assert_eq!(runs.get(), 1);
        })
        .await;
}

/// Rejections reach observers of the pending value, not the graph.
#[tokio::test]
async fn rejection_is_delivered_to_observers_only() {
    LocalSet::new()
        .run_until(async {
            let state = reactive(&Target::from_fields([("user", 0)]));
            let (runs, runs_clone) = counter();

            let disposer = effect({
                let state = state.clone();
                move || {
                    state.get("user");
                    Pending::new(async { Err::<(), _>("backend down") })
                }
            });
            let _bystander = effect({
                let state = state.clone();
                move || {
                    state.get("user");
                    runs_clone.set(runs_clone.get() + 1);
                }
            });
            let computation = disposer.computations()[0].clone();

            let err = computation.pending().unwrap().await.unwrap_err();
            assert_eq!(err.message(), "backend down");

            settle().await;
            assert_eq!(computation.state(), EffectState::Idle);

            state.set("user", 7).unwrap();
            assert_eq!(runs.get(), 2);
            assert_eq!(computation.run_count(), 2);

            disposer.dispose();
        })
        .await;
}
