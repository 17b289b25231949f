use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use autobind::config::{EngineConfig, RunnerKind};
use autobind::context::{BindingContext, Specifier};
use autobind::schema::{ClassSchema, SchemaRegistry, ValueType};
use autobind::services::Services;
use autobind::value::{ListRef, Record, Value};

// ------------- Fixture -------------
fn registry(members: usize) -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(
        ClassSchema::new("bench.Row")
            .field("name", ValueType::Str)
            .field("qty", ValueType::Int),
    );
    let mut wide = ClassSchema::new("bench.Wide").field("rows", ValueType::list_of(ValueType::Object("bench.Row".into())));
    for n in 0..members {
        wide = wide.field(&format!("f{}", n), ValueType::Int);
    }
    registry.register(wide);
    registry
}

fn wide(members: usize, rows: usize) -> (Record, ListRef) {
    let list = ListRef::new(
        (0..rows)
            .map(|n| {
                Value::Object(
                    Record::new("bench.Row")
                        .with_field("name", format!("row {}", n))
                        .with_field("qty", n as i64)
                        .into_ref(),
                )
            })
            .collect(),
    );
    let mut record = Record::new("bench.Wide").with_field("rows", Value::List(list.clone()));
    for n in 0..members {
        record = record.with_field(&format!("f{}", n), n as i64);
    }
    (record, list)
}

fn bind(runner: RunnerKind, members: usize, rows: usize) -> (Arc<BindingContext>, ListRef) {
    let config = EngineConfig { runner, delay_quantum_ms: 60_000, ..Default::default() };
    let services = Services::new(config).expect("services");
    let (record, list) = wide(members, rows);
    let root = BindingContext::bind_root(
        &services,
        &registry(members),
        &ValueType::Object("bench.Wide".into()),
        Value::Object(record.into_ref()),
    )
    .expect("bind");
    root.refresh_from_root(None);
    (root, list)
}

pub fn criterion_benchmark(c: &mut Criterion) {
    for members in [10, 100, 1000] {
        let (root, _) = bind(RunnerKind::Inline, members, 0);
        c.bench_function(&format!("refresh inline {} members", members), |b| {
            b.iter(|| black_box(root.refresh_from_root(None)))
        });
        root.shutdown();
    }

    let (root, _) = bind(RunnerKind::Pool, 100, 0);
    c.bench_function("refresh pool 100 members", |b| b.iter(|| black_box(root.refresh_from_root(None))));
    root.shutdown();

    let (root, list) = bind(RunnerKind::Inline, 10, 1000);
    let rows = root.find("rows").expect("rows");
    c.bench_function("refresh after list mutation", |b| {
        b.iter(|| {
            let _ = list.set(0, list.get(0).unwrap_or(Value::Null));
            black_box(root.refresh_from_root(None))
        })
    });
    let value = rows.current_value(&Specifier::none()).expect("rows");
    c.bench_function("json 1k rows", |b| b.iter(|| black_box(rows.to_json(&value))));
    c.bench_function("flat text 1k rows", |b| b.iter(|| black_box(rows.to_human_readable(&value))));
    root.shutdown();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
