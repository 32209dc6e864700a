//! Performance benchmarks for livefeed-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use livefeed_engine::{ChangeEvent, CollectionView, Filter, Record, ViewOptions};
use serde_json::json;

fn seeded_view(size: u64) -> CollectionView {
    let mut view = CollectionView::new(
        "messages",
        Filter::All,
        ViewOptions::new().with_correlation_field("token"),
    )
    .unwrap();
    let records = (0..size)
        .map(|i| Record::remote(i.to_string(), i * 2, json!({"content": "hello"})))
        .collect();
    view.seed(records);
    view
}

fn bench_seed(c: &mut Criterion) {
    let mut group = c.benchmark_group("seed");

    for size in [100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let records: Vec<_> = (0..size)
                .rev()
                .map(|i| Record::remote(i.to_string(), i, json!({"content": "hello"})))
                .collect();
            b.iter(|| {
                let mut view =
                    CollectionView::new("messages", Filter::All, ViewOptions::new()).unwrap();
                view.seed(black_box(records.clone()))
            })
        });
    }

    group.finish();
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");

    for size in [100u64, 1_000, 10_000] {
        // Append at the tail, the common case for chat and feeds
        group.bench_with_input(BenchmarkId::new("append", size), &size, |b, &size| {
            let mut view = seeded_view(size);
            let mut next = size * 2;
            b.iter(|| {
                next += 1;
                view.apply(black_box(ChangeEvent::Inserted(Record::remote(
                    next.to_string(),
                    next,
                    json!({"content": "new"}),
                ))))
            })
        });

        // Redelivery of a record already held
        group.bench_with_input(BenchmarkId::new("redeliver", size), &size, |b, &size| {
            let mut view = seeded_view(size);
            let event = ChangeEvent::Inserted(Record::remote(
                (size / 2).to_string(),
                size,
                json!({"content": "hello"}),
            ));
            b.iter(|| view.apply(black_box(event.clone())))
        });

        // Update that moves a record from the head to the tail
        group.bench_with_input(BenchmarkId::new("reorder", size), &size, |b, &size| {
            let mut view = seeded_view(size);
            let mut seq = size * 2;
            b.iter(|| {
                seq += 1;
                let head = view.records()[0].id.clone();
                view.apply(black_box(ChangeEvent::Updated(Record::remote(
                    head,
                    seq,
                    json!({"content": "bumped"}),
                ))))
            })
        });
    }

    group.finish();
}

fn bench_optimistic(c: &mut Criterion) {
    c.bench_function("optimistic_write_and_confirm", |b| {
        let mut view = seeded_view(1_000);
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let token = format!("t{}", n);
            view.write_optimistic(json!({"token": token.clone()}))
                .unwrap();
            view.apply(ChangeEvent::Inserted(Record::remote(
                format!("c{}", n),
                10_000 + n,
                json!({"token": token}),
            )))
        })
    });
}

criterion_group!(benches, bench_seed, bench_apply, bench_optimistic);
criterion_main!(benches);
