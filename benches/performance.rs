//! Performance benchmarks for observer delivery.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keywatch::{ComputedProperty, Engine, Method, ObjectRef, Value};
use serde_json::json;

fn noop() -> Method {
    Method::function(|_, _| Ok(()))
}

/// Benchmark a plain write with a varying number of observers
fn bench_set_with_observers(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_with_observers");

    for observers in [0, 1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("observers", observers),
            &observers,
            |b, &observers| {
                let engine = Engine::new();
                let obj = ObjectRef::new();
                for _ in 0..observers {
                    engine.add_observer(&obj, "value", None, noop()).unwrap();
                    engine.add_before_observer(&obj, "value", None, noop()).unwrap();
                }

                let mut n = 0i64;
                b.iter(|| {
                    n += 1;
                    engine.set(&obj, "value", black_box(n)).unwrap();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark windows of repeated writes to a handful of keys
fn bench_batched_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_writes");

    for writes in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("writes", writes), &writes, |b, &writes| {
            let engine = Engine::new();
            let obj = ObjectRef::new();
            for key in ["a", "b", "c", "d"] {
                engine.add_observer(&obj, key, None, noop()).unwrap();
            }
            let keys = ["a", "b", "c", "d"];

            let mut n = 0i64;
            b.iter(|| {
                engine
                    .run_exclusive(|| {
                        for i in 0..writes {
                            n += 1;
                            engine.set(&obj, keys[i % keys.len()], n)?;
                        }
                        Ok(())
                    })
                    .unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark leaf writes and intermediate replacement on a deep chain
fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    for depth in [2, 4, 8] {
        let path: Vec<String> = (0..depth).map(|i| format!("k{}", i)).collect();
        let mut nested = json!("leaf");
        for segment in path.iter().rev() {
            nested = json!({ segment.as_str(): nested });
        }
        let path = path.join(".");

        group.bench_with_input(BenchmarkId::new("leaf_write", depth), &depth, |b, _| {
            let engine = Engine::new();
            let root = ObjectRef::from_json(nested.clone());
            engine.add_observer(&root, &path, None, noop()).unwrap();

            let mut n = 0i64;
            b.iter(|| {
                n += 1;
                engine.set_path(&root, &path, black_box(n)).unwrap();
            });
        });

        group.bench_with_input(BenchmarkId::new("reroot", depth), &depth, |b, _| {
            let engine = Engine::new();
            let root = ObjectRef::from_json(nested.clone());
            engine.add_observer(&root, &path, None, noop()).unwrap();
            let first = root.keys().into_iter().next().unwrap_or_default();
            let replacement = root.lookup(&first).to_json();

            b.iter(|| {
                engine
                    .set(&root, &first, Value::from_json(replacement.clone()))
                    .unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark cached and invalidated computed reads
fn bench_computed(c: &mut Criterion) {
    let mut group = c.benchmark_group("computed");

    let engine = Engine::new();
    let obj = ObjectRef::from_json(json!({"first": "Ada", "last": "Lovelace"}));
    let full = ComputedProperty::new(|engine, obj| {
        let first = engine.get(obj, "first")?;
        let last = engine.get(obj, "last")?;
        Ok(format!("{} {}", first.as_str().unwrap_or(""), last.as_str().unwrap_or("")).into())
    })
    .property(["first", "last"]);
    engine.define_computed(&obj, "full", full).unwrap();

    group.bench_function("cached_get", |b| {
        b.iter(|| black_box(engine.get(&obj, "full").unwrap()));
    });

    let mut n = 0i64;
    group.bench_function("invalidate_and_get", |b| {
        b.iter(|| {
            n += 1;
            engine.set(&obj, "last", n).unwrap();
            black_box(engine.get(&obj, "full").unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set_with_observers,
    bench_batched_writes,
    bench_chain,
    bench_computed
);
criterion_main!(benches);
