//! Error handling and edge case tests.

use keywatch::{ComputedProperty, Engine, Method, ObjectRef, ObserveError, Value};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn counter() -> (Arc<AtomicUsize>, Method) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let method = Method::function(move |_, _| {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (count, method)
}

fn failing(key: &'static str) -> Method {
    Method::function(move |_, _| Err(ObserveError::callback(key, "Something unexpected happened!")))
}

fn count(c: &AtomicUsize) -> usize {
    c.load(Ordering::SeqCst)
}

/// Route engine warnings to the test output.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// --- Registration Errors ---

#[test]
fn test_immediate_observer_rejects_chained_path() {
    let engine = Engine::new();
    let obj = ObjectRef::new();
    let (_fired, method) = counter();

    let err = engine.add_immediate_observer(&obj, "foo.bar", None, method).unwrap_err();
    assert_eq!(err, ObserveError::IllegalImmediateObserverPath("foo.bar".into()));
    assert_eq!(engine.watch_count(&obj, "foo.bar"), 0);
}

#[test]
fn test_malformed_paths_are_rejected() {
    let engine = Engine::new();
    let obj = ObjectRef::new();

    for path in ["", "foo..bar", ".foo", "foo."] {
        let (_fired, method) = counter();
        let err = engine.add_observer(&obj, path, None, method).unwrap_err();
        assert!(matches!(err, ObserveError::InvalidPath(_)), "{path:?}");
    }
    assert!(matches!(engine.get_path(&obj, ""), Err(ObserveError::InvalidPath(_))));
    assert!(matches!(
        engine.set_path(&obj, "a..b", 1),
        Err(ObserveError::InvalidPath(_))
    ));
}

#[test]
fn test_computed_with_malformed_dependency_is_rejected() {
    let engine = Engine::new();
    let obj = ObjectRef::new();
    let cp = ComputedProperty::new(|_, _| Ok(Value::Null)).property(["ok", "bad..key"]);

    let err = engine.define_computed(&obj, "cp", cp).unwrap_err();
    assert!(matches!(err, ObserveError::InvalidPath(_)));
}

// --- Dispatch Errors ---

#[test]
fn test_unresolvable_named_method_errors_at_dispatch() {
    let engine = Engine::new();
    let obj = ObjectRef::new();
    let target = ObjectRef::new();

    engine.add_observer(&obj, "foo", Some(&target), "missing").unwrap();
    let err = engine.set(&obj, "foo", 1).unwrap_err();
    assert_eq!(
        err,
        ObserveError::InvalidObserverTarget {
            key: "foo".into(),
            method: "missing".into(),
        }
    );
    assert_eq!(obj.lookup("foo"), Value::from(1), "the write itself happened");

    // Methods resolve when fired, so defining it later repairs the observer.
    let fired = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&fired);
    target.define_method("missing", move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    engine.set(&obj, "foo", 2).unwrap();
    assert_eq!(count(&fired), 1);
}

#[test]
fn test_named_method_without_target_resolves_on_observed_object() {
    let engine = Engine::new();
    let template = ObjectRef::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&fired);
    template.define_method("fooDidChange", move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let obj = ObjectRef::from_template(&template);

    engine.add_observer(&obj, "foo", None, "fooDidChange").unwrap();
    engine.set(&obj, "foo", "x").unwrap();
    assert_eq!(count(&fired), 1);

    let bare = ObjectRef::new();
    engine.add_observer(&bare, "foo", None, "fooDidChange").unwrap();
    assert!(matches!(
        engine.set(&bare, "foo", "x"),
        Err(ObserveError::InvalidObserverTarget { .. })
    ));
}

#[test]
fn test_failing_observer_stops_pass_but_stays_registered() {
    let engine = Engine::new();
    let obj = ObjectRef::new();
    let (first, first_method) = counter();
    let (last, last_method) = counter();
    let bad = failing("foo");

    engine.add_observer(&obj, "foo", None, first_method).unwrap();
    engine.add_observer(&obj, "foo", None, bad.clone()).unwrap();
    engine.add_observer(&obj, "foo", None, last_method).unwrap();

    assert!(matches!(engine.set(&obj, "foo", 1), Err(ObserveError::Callback { .. })));
    assert_eq!((count(&first), count(&last)), (1, 0));

    assert!(engine.set(&obj, "foo", 2).is_err());
    assert_eq!((count(&first), count(&last)), (2, 0));

    assert!(engine.remove_observer(&obj, "foo", None, bad));
    engine.set(&obj, "foo", 3).unwrap();
    assert_eq!((count(&first), count(&last)), (3, 1));
}

#[test]
fn test_failing_before_observer_aborts_write() {
    let engine = Engine::new();
    let obj = ObjectRef::from_json(json!({"foo": "original"}));
    let (after, after_method) = counter();
    engine.add_before_observer(&obj, "foo", None, failing("foo")).unwrap();
    engine.add_observer(&obj, "foo", None, after_method).unwrap();

    assert!(engine.set(&obj, "foo", "changed").is_err());
    assert_eq!(obj.lookup("foo"), Value::from("original"));
    assert_eq!(count(&after), 0);
}

#[test]
fn test_getter_error_propagates_and_caches_nothing() {
    let engine = Engine::new();
    let obj = ObjectRef::new();
    engine
        .define_computed(
            &obj,
            "broken",
            ComputedProperty::new(|_, _| Err(ObserveError::callback("broken", "no value"))),
        )
        .unwrap();

    let err = engine.get(&obj, "broken").unwrap_err();
    assert_eq!(err.to_string(), "Callback failed for 'broken': no value");
    assert_eq!(engine.cache_for(&obj, "broken"), None);
    assert_eq!(engine.recompute_count(&obj, "broken"), 0);
    assert!(engine.get_path(&obj, "broken.deeper").is_err());
}

#[test]
fn test_dropped_target_is_skipped_silently() {
    let engine = Engine::new();
    let obj = ObjectRef::new();
    let target = ObjectRef::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&fired);
    target.define_method("didChange", move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    engine.add_observer(&obj, "foo", Some(&target), "didChange").unwrap();
    drop(target);

    engine.set(&obj, "foo", 1).unwrap();
    assert_eq!(count(&fired), 0);
}

// --- Path Errors ---

#[test]
fn test_set_path_through_non_object() {
    let engine = Engine::new();
    let obj = ObjectRef::from_json(json!({"foo": "string", "nested": {"inner": null}}));

    for path in ["foo.bar", "missing.bar", "nested.inner.value"] {
        let err = engine.set_path(&obj, path, 1).unwrap_err();
        assert_eq!(err, ObserveError::PathNotFound { path: path.to_string() });
    }
    assert_eq!(engine.get_path(&obj, "foo.bar").unwrap(), Value::Undefined);
    assert_eq!(engine.get_path(&obj, "missing.bar.baz").unwrap(), Value::Undefined);
}

#[test]
fn test_global_path_disabled_resolves_locally() {
    let lookup = ObjectRef::from_json(json!({"App": {"name": "global"}}));
    let config = keywatch::EngineConfig {
        global_paths: false,
        ..Default::default()
    };
    let engine = Engine::with_config(config).with_lookup(lookup);
    let obj = ObjectRef::from_json(json!({"App": {"name": "local"}}));

    assert!(!engine.is_global_path("App.name"));
    assert_eq!(engine.get_path(&obj, "App.name").unwrap(), Value::from("local"));
}

// --- Batching Errors ---

#[test]
fn test_unbalanced_end_property_changes() {
    let engine = Engine::new();
    assert_eq!(engine.end_property_changes(), Err(ObserveError::UnbalancedBatch));

    engine.begin_property_changes();
    engine.end_property_changes().unwrap();
    assert_eq!(engine.end_property_changes(), Err(ObserveError::UnbalancedBatch));
}

#[test]
fn test_deferred_notifications_survive_callback_error() {
    let engine = Engine::new();
    let obj = ObjectRef::from_json(json!({"foo": "foo"}));
    let (fired, method) = counter();
    engine.add_observer(&obj, "foo", None, method).unwrap();

    let result: keywatch::Result<()> = engine.run_exclusive(|| {
        engine.set(&obj, "foo", "BIFF")?;
        engine.set(&obj, "foo", "BAZ")?;
        Err(ObserveError::callback("foo", "Something unexpected happened!"))
    });
    assert!(matches!(result, Err(ObserveError::Callback { .. })));
    assert_eq!(count(&fired), 1);

    let result: keywatch::Result<()> = engine.run_exclusive(|| {
        engine.set(&obj, "foo", "BIFF2")?;
        engine.set(&obj, "foo", "BAZ2")?;
        Err(ObserveError::callback("foo", "Something unexpected happened!"))
    });
    assert!(result.is_err());
    assert_eq!(count(&fired), 2);
    assert!(!engine.is_batching());
}

#[test]
fn test_flush_continues_after_failing_key() {
    init_tracing();
    let engine = Engine::new();
    let obj = ObjectRef::new();
    let (bar, bar_method) = counter();
    engine.add_observer(&obj, "foo", None, failing("foo")).unwrap();
    engine.add_observer(&obj, "bar", None, bar_method).unwrap();

    engine.begin_property_changes();
    engine.set(&obj, "foo", 1).unwrap();
    engine.set(&obj, "bar", 1).unwrap();
    let err = engine.end_property_changes().unwrap_err();

    assert!(matches!(err, ObserveError::Callback { ref key, .. } if key == "foo"));
    assert_eq!(count(&bar), 1);
    assert!(!engine.is_batching());
    assert_eq!(engine.stats().flushes, 1);
}

#[test]
fn test_callback_error_takes_precedence_over_flush_error() {
    let engine = Engine::new();
    let obj = ObjectRef::new();
    engine.add_observer(&obj, "foo", None, failing("foo")).unwrap();

    let result: keywatch::Result<()> = engine.run_exclusive(|| {
        engine.set(&obj, "foo", 1)?;
        Err(ObserveError::callback("body", "first"))
    });
    assert_eq!(result, Err(ObserveError::callback("body", "first")));

    let result = engine.run_exclusive(|| engine.set(&obj, "foo", 2));
    assert!(matches!(result, Err(ObserveError::Callback { ref key, .. }) if key == "foo"));
}

#[test]
fn test_panic_inside_window_discards_pending_changes() {
    init_tracing();
    let engine = Engine::new();
    let obj = ObjectRef::new();
    let (fired, method) = counter();
    engine.add_observer(&obj, "foo", None, method).unwrap();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        engine.run_exclusive(|| -> keywatch::Result<()> {
            engine.set(&obj, "foo", 1)?;
            panic!("boom");
        })
    }));

    assert!(outcome.is_err());
    assert!(!engine.is_batching());
    assert_eq!(engine.stats().pending_changes, 0);
    assert_eq!(count(&fired), 0);

    engine.set(&obj, "foo", 2).unwrap();
    assert_eq!(count(&fired), 1, "later changes are delivered immediately");
}

// --- Suspension Errors ---

#[test]
fn test_suspension_lifted_when_callback_fails() {
    let engine = Engine::new();
    let obj = ObjectRef::new();
    let (fired, method) = counter();
    engine.add_observer(&obj, "foo", None, method.clone()).unwrap();

    let result = engine.suspend_observer(&obj, "foo", None, method, || -> keywatch::Result<()> {
        engine.set(&obj, "foo", 1)?;
        Err(ObserveError::callback("foo", "failed"))
    });
    assert!(result.is_err());
    assert_eq!(count(&fired), 0);

    engine.set(&obj, "foo", 2).unwrap();
    assert_eq!(count(&fired), 1);
}

#[test]
fn test_suspending_unregistered_observer_is_harmless() {
    let engine = Engine::new();
    let obj = ObjectRef::new();
    let (fired, method) = counter();
    let (_other, other_method) = counter();
    engine.add_observer(&obj, "foo", None, method).unwrap();

    engine.suspend_observer(&obj, "foo", None, other_method, || {
        engine.set(&obj, "foo", 1).unwrap();
    });
    assert_eq!(count(&fired), 1);
    assert_eq!(engine.stats().suppressed, 0);
}
