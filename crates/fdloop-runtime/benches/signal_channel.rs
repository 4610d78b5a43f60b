//! Cost of one watcher -> run loop handoff, minus the kernel wait.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fdloop_core::CallBackTypes;
use fdloop_runtime::SignalChannel;

fn send_recv(c: &mut Criterion) {
    let chan = SignalChannel::new().expect("signal channel");

    c.bench_function("signal_send_recv", |b| {
        b.iter(|| {
            chan.send(black_box(CallBackTypes::READ)).expect("send");
            black_box(chan.try_recv())
        })
    });

    c.bench_function("signal_send_coalesced", |b| {
        b.iter(|| {
            chan.send(black_box(CallBackTypes::READ)).expect("send");
            chan.send(black_box(CallBackTypes::WRITE)).expect("send");
            black_box(chan.try_recv())
        })
    });
}

criterion_group!(benches, send_recv);
criterion_main!(benches);
