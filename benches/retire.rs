//! Benchmarks the cost of retiring memory through a pin, including the
//! amortized cost of local reclamation passes.

use criterion::{criterion_group, criterion_main, Criterion};
use sebr::{Group, GroupConfig, Pin};

fn retire_single(c: &mut Criterion) {
    let group = Group::new(GroupConfig::default());
    c.bench_function("retire a single 64-byte allocation", |b| {
        b.iter(|| {
            let pin = Pin::new(&group);
            let boxed = Box::new([0u8; 64]);
            let raw = Box::into_raw(boxed);
            pin.retire(64, move || unsafe {
                drop(Box::from_raw(raw));
            });
        })
    });
}

fn retire_burst(c: &mut Criterion) {
    let group = Group::new(GroupConfig::default());
    c.bench_function("retire 1000 allocations under one pin", |b| {
        b.iter(|| {
            let pin = Pin::new(&group);
            for _ in 0..1000 {
                let boxed = Box::new([0u8; 64]);
                let raw = Box::into_raw(boxed);
                pin.retire(64, move || unsafe {
                    drop(Box::from_raw(raw));
                });
            }
        })
    });
}

criterion_group!(benches, retire_single, retire_burst);
criterion_main!(benches);
