//! RT-path latency benchmarks.
//!
//! Measures the non-blocking operations the control loop calls every cycle.
//! Target: each ≤ 1µs on an idle core.

use criterion::{Criterion, criterion_group, criterion_main};
use evo_rt_sync::{BinarySignal, HandoffContext, Lockstep, RingBuffer, SharedMemoryManager, Usage};
use evo_common::time::Deadline;
use std::hint::black_box;

fn bench_signal_post_try_wait(c: &mut Criterion) {
    let signal = BinarySignal::new();

    c.bench_function("signal_post_try_wait", |b| {
        b.iter(|| {
            signal.post().unwrap();
            black_box(signal.try_wait().unwrap());
        });
    });
}

fn bench_ring_push_pop(c: &mut Criterion) {
    let ring = RingBuffer::<u64>::new(64);

    c.bench_function("ring_push_pop", |b| {
        b.iter(|| {
            ring.push(black_box(42)).unwrap();
            black_box(ring.pop());
        });
    });
}

fn bench_ring_in_place(c: &mut Criterion) {
    let ring = RingBuffer::<[u64; 32]>::new(8);

    c.bench_function("ring_prepare_insert_front", |b| {
        b.iter(|| {
            let mut slot = ring.prepare_insert().unwrap();
            slot[0] = 1;
            slot.finish_insert();
            let front = ring.front().unwrap();
            black_box(front[0]);
            front.drop_front();
        });
    });
}

fn bench_handoff_set_get(c: &mut Criterion) {
    let context = HandoffContext::<u64>::new();
    let mut promise = context.get_promise(Usage::Reusable).unwrap();
    let mut future = context.get_future(Usage::Reusable).unwrap();

    c.bench_function("handoff_set_get", |b| {
        b.iter(|| {
            promise.set(black_box(7)).unwrap();
            black_box(future.get().unwrap());
        });
    });
}

fn bench_lockstep_round(c: &mut Criterion) {
    let mut manager = SharedMemoryManager::new();
    let lockstep = Lockstep::create(&mut manager, "bench_lockstep").unwrap();

    c.bench_function("lockstep_single_thread_round", |b| {
        b.iter(|| {
            lockstep.start_operation_a(Deadline::Infinite).unwrap();
            lockstep.end_operation_a().unwrap();
            lockstep.start_operation_b(Deadline::Infinite).unwrap();
            lockstep.end_operation_b().unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_signal_post_try_wait,
    bench_ring_push_pop,
    bench_ring_in_place,
    bench_handoff_set_get,
    bench_lockstep_round,
);
criterion_main!(benches);
