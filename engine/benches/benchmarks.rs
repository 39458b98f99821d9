//! Performance benchmarks for badger-engine

use badger_engine::token::substitute;
use badger_engine::{Event, EventDispatcher, EventType, ExecutionContext};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

fn context() -> ExecutionContext {
    ExecutionContext::new(
        "pull.store.success",
        "accounts",
        json!({
            "id": 4211,
            "account": {"id": "123", "owner": {"name": "Ada", "tags": ["gold", "west"]}},
            "locations": [{"city": "Leeds"}, {"city": "York"}]
        }),
    )
}

fn bench_token_substitution(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_substitution");
    let ctx = context();

    let inputs = [
        ("plain", "no tokens in this command at all"),
        ("single_path", "notify --id $EVENT_PAYLOAD[account.id]"),
        (
            "nested",
            "$EVENT_PAYLOAD[account.owner.tags[1]] $EVENT_PAYLOAD[locations.0.city] $EVENT_SOURCE",
        ),
        ("whole_payload", "echo '$EVENT_PAYLOAD_JSON' | jq . # $EVENT_TYPE"),
    ];
    for (name, input) in inputs {
        group.bench_with_input(BenchmarkId::from_parameter(name), input, |b, input| {
            b.iter(|| substitute(black_box(input), black_box(&ctx)))
        });
    }

    group.bench_function("env", |b| b.iter(|| black_box(&ctx).env()));
    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    for listeners in [0usize, 1, 10, 100] {
        let dispatcher = EventDispatcher::new();
        for _ in 0..listeners {
            dispatcher.subscribe(EventType::StoreSuccess, |event| {
                black_box(&event.payload);
            });
        }
        group.bench_with_input(
            BenchmarkId::new("listeners", listeners),
            &listeners,
            |b, _| {
                b.iter(|| {
                    dispatcher.dispatch(
                        Event::new(EventType::StoreSuccess, "accounts")
                            .with_payload(json!({"id": 1})),
                    )
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_token_substitution, bench_dispatch);
criterion_main!(benches);
