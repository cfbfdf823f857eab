use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal_macros::dec;
use uuid::Uuid;

use tillbook::{AccountService, AmountLimits};
use tillbook_memory::MemoryStore;

fn setup() -> (AccountService, Uuid) {
    let store = Arc::new(MemoryStore::new());
    let service = AccountService::new(store, AmountLimits::default());
    let account = service.open_account("bench@example.com", "Bench").unwrap();
    (service, account.id)
}

fn bench_credit(c: &mut Criterion) {
    let (service, id) = setup();
    let counter = AtomicU64::new(0);

    c.bench_function("credit", |b| {
        b.iter(|| {
            let key = format!("credit-{}", counter.fetch_add(1, Ordering::Relaxed));
            service.credit(black_box(id), dec!(1.00), &key).unwrap()
        })
    });
}

fn bench_duplicate_replay(c: &mut Criterion) {
    let (service, id) = setup();
    service.credit(id, dec!(10.00), "replayed").unwrap();

    c.bench_function("duplicate_replay", |b| {
        b.iter(|| service.credit(black_box(id), dec!(10.00), "replayed").unwrap())
    });
}

fn bench_history(c: &mut Criterion) {
    let (service, id) = setup();
    for i in 0..100 {
        service
            .credit(id, dec!(1.00), &format!("seed-{}", i))
            .unwrap();
    }

    c.bench_function("history_100", |b| {
        b.iter(|| service.history(black_box(id)).unwrap())
    });
}

criterion_group!(benches, bench_credit, bench_duplicate_replay, bench_history);
criterion_main!(benches);
