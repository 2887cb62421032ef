//! Benchmarks the identity hasher and wear reinterpretation — the two pure
//! functions on the hot path of every inspect (cache check, fresh-inspect
//! persistence, and the background `unique_id` repair walk all call them).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use inspect_gateway::identity::{reinterpret_wear, signed_to_unsigned_ms, unique_id, IdentityFields};

fn bench_unique_id(c: &mut Criterion) {
    let fields = IdentityFields {
        paint_seed: Some(661),
        paint_index: Some(415),
        paint_wear: Some(1019215872),
        def_index: Some(507),
        origin: Some(8),
        rarity: Some(6),
        quest_id: None,
        quality: Some(3),
        drop_reason: None,
    };
    c.bench_function("unique_id", |b| b.iter(|| unique_id(black_box(&fields))));
}

fn bench_reinterpret_wear(c: &mut Criterion) {
    c.bench_function("reinterpret_wear", |b| b.iter(|| reinterpret_wear(black_box(1019215872))));
}

fn bench_signed_to_unsigned_ms(c: &mut Criterion) {
    c.bench_function("signed_to_unsigned_ms", |b| {
        b.iter(|| signed_to_unsigned_ms(black_box(76561198000000001_i64)))
    });
}

criterion_group!(benches, bench_unique_id, bench_reinterpret_wear, bench_signed_to_unsigned_ms);
criterion_main!(benches);
