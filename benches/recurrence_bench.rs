//! Criterion benchmarks for hot paths in the scheduling core.
//!
//! Run with:
//!   cargo bench
//!
//! Covers:
//!   - next_occurrence date math (all four frequencies)
//!   - event envelope serialization (serde_json)

use chrono::TimeZone as _;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use taskd::events::Event;
use taskd::recurrence::{next_occurrence, Frequency, RecurrenceRule};

fn bench_next_occurrence(c: &mut Criterion) {
    let anchor = chrono::Utc.with_ymd_and_hms(2024, 1, 31, 9, 0, 0).unwrap();

    for (name, frequency) in [
        ("next_occurrence_daily", Frequency::Daily),
        ("next_occurrence_weekly", Frequency::Weekly),
        ("next_occurrence_monthly", Frequency::Monthly),
        ("next_occurrence_yearly", Frequency::Yearly),
    ] {
        let rule = RecurrenceRule::new(frequency, 1);
        c.bench_function(name, |b| {
            b.iter(|| {
                let next = next_occurrence(black_box(anchor), black_box(&rule)).unwrap();
                black_box(next);
            });
        });
    }
}

fn bench_envelope_serialize(c: &mut Criterion) {
    let event = Event::reminder_triggered(
        "3f2a9c41-7e7b-4a83-b1a5-2d9f8f6f4e11",
        "user-42",
        "a4f0b6d2-10c9-4c55-8b77-9b1f2e3d4c5a",
        "2026-08-09T08:00:00Z",
        "due",
    );
    c.bench_function("event_serialize", |b| {
        b.iter(|| {
            let s = serde_json::to_string(black_box(&event)).unwrap();
            black_box(s);
        });
    });
}

criterion_group!(benches, bench_next_occurrence, bench_envelope_serialize);
criterion_main!(benches);
