//! Benchmarks for dependency ordering and push propagation.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use trellis_core::{Address, Args, Cell, Dag, Force, Result, Session};

fn key(i: usize) -> Address {
    Address::from_pairs([("key", json!(i))])
}

/// Layered graph: `width` nodes per layer, each wired to every node of the
/// next layer.
fn layered(layers: usize, width: usize) -> Dag<Address> {
    let mut dag = Dag::new();
    for layer in 0..layers.saturating_sub(1) {
        for i in 0..width {
            for j in 0..width {
                let from = key(layer * width + i);
                let to = key((layer + 1) * width + j);
                let _ = dag.add_edge(from, to, 1.0);
            }
        }
    }
    dag
}

/// Benchmark Kahn ordering on the reachable subgraph
fn bench_topological_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("topological_order");

    for layers in [10, 100, 1000] {
        let dag = layered(layers, 4);
        group.bench_with_input(BenchmarkId::from_parameter(layers), &dag, |b, dag| {
            b.iter(|| dag.generations(&key(0)));
        });
    }

    group.finish();
}

fn add(args: &Args) -> Result<Value> {
    let a = args["a"].as_i64().unwrap_or_default();
    let b = args["b"].as_i64().unwrap_or_default();
    Ok(json!(a + b))
}

/// Benchmark push through a chain of cached cells
fn bench_push_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_chain");

    for n in [10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let session = Session::new();
            let root = Cell::new(add).arg("a", 1).arg("b", 0).arg("key", 0).pk(["key"]);
            let mut tip = root.clone();
            for i in 1..n {
                tip = Cell::new(add)
                    .arg("a", tip)
                    .arg("b", 1)
                    .arg("key", i)
                    .pk(["key"]);
            }
            let _ = tip.evaluate(&session, Force::IfStale);

            let mut input = 0;
            b.iter(|| {
                input += 1;
                session.push(&root.clone().arg("a", input))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_topological_order, bench_push_chain);
criterion_main!(benches);
