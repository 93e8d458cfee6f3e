use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use typed_event_bus::{Bus, Event, Listener, ListenerListFactory, Supertypes};

struct Tick {
    seq: u64,
    symbol: String,
}

impl Event for Tick {
    fn supertypes(types: &mut Supertypes<'_, Self>) {
        types.implements::<u64>(|t| &t.seq).implements(|t| t.symbol.as_str());
    }
}

fn bus_with_listeners(super_listeners: bool, factory: ListenerListFactory) -> (Bus, Arc<AtomicU64>) {
    let bus = Bus::builder()
        .name("bench")
        .super_listeners(super_listeners)
        .list_factory(factory)
        .build()
        .unwrap();
    let hits = Arc::new(AtomicU64::new(0));

    // 8 listeners on the concrete type, 2 on each supertype.
    for priority in 0..8 {
        let counter = Arc::clone(&hits);
        bus.subscribe_listener(Listener::prioritized(
            move |t: &Tick| {
                counter.fetch_add(t.seq & 1, Ordering::Relaxed);
            },
            priority,
        ))
        .unwrap();
    }
    for _ in 0..2 {
        let counter = Arc::clone(&hits);
        bus.subscribe_listener(Listener::new(move |seq: &u64| {
            counter.fetch_add(*seq & 1, Ordering::Relaxed);
        }))
        .unwrap();
        let counter = Arc::clone(&hits);
        bus.subscribe_listener(Listener::new(move |s: &str| {
            counter.fetch_add(s.len() as u64, Ordering::Relaxed);
        }))
        .unwrap();
    }
    (bus, hits)
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    group.throughput(Throughput::Elements(1));

    let cases = [
        ("exact/copy_on_write", false, ListenerListFactory::CopyOnWrite),
        ("exact/read_write_locked", false, ListenerListFactory::ReadWriteLocked),
        ("super/copy_on_write", true, ListenerListFactory::CopyOnWrite),
    ];
    for (name, super_listeners, factory) in cases {
        let (bus, hits) = bus_with_listeners(super_listeners, factory);
        let tick = Tick {
            seq: 1,
            symbol: "ES".to_string(),
        };
        group.bench_function(name, |b| b.iter(|| bus.publish(black_box(&tick)).unwrap()));
        black_box(hits.load(Ordering::Relaxed));
    }
    group.finish();
}

fn bench_subscribe_churn(c: &mut Criterion) {
    let (bus, _hits) = bus_with_listeners(false, ListenerListFactory::CopyOnWrite);
    c.bench_function("subscribe_unsubscribe", |b| {
        b.iter(|| {
            let listener = Listener::prioritized(|_: &Tick| {}, 3);
            bus.subscribe_listener(listener.clone()).unwrap();
            bus.unsubscribe_listener(&listener)
        })
    });
}

criterion_group!(benches, bench_publish, bench_subscribe_churn);
criterion_main!(benches);
