//! Benchmarks the cost of entering and leaving a critical section.

use criterion::{criterion_group, criterion_main, Criterion};
use sebr::{Group, GroupConfig, Pin};

fn pin_uncontended(c: &mut Criterion) {
    let group = Group::new(GroupConfig::default());
    c.bench_function("pin/unpin uncontended", |b| {
        b.iter(|| {
            let pin = Pin::new(&group);
            drop(pin);
        })
    });
}

fn pin_contended(c: &mut Criterion) {
    let group = Group::new(GroupConfig::default());
    c.bench_function("pin/unpin under concurrent pins", |b| {
        std::thread::scope(|scope| {
            let stop = std::sync::atomic::AtomicBool::new(false);
            for _ in 0..3 {
                scope.spawn(|| {
                    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                        let pin = Pin::new(&group);
                        drop(pin);
                    }
                });
            }
            b.iter(|| {
                let pin = Pin::new(&group);
                drop(pin);
            });
            stop.store(true, std::sync::atomic::Ordering::Relaxed);
        });
    });
}

criterion_group!(benches, pin_uncontended, pin_contended);
criterion_main!(benches);
