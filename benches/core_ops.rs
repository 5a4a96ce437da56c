// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Core operation benchmarks: sequential put and random get.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use reedtree::{Btree, BtreeOptions, OpenMode};

fn bench_put(c: &mut Criterion) {
    c.bench_function("put_1000_sequential", |b| {
        b.iter_batched(
            || tempfile::tempdir().unwrap(),
            |dir| {
                let db = Btree::new();
                db.tune(BtreeOptions {
                    lmemb: 128,
                    nmemb: 256,
                    bnum: 4096,
                    ..BtreeOptions::default()
                })
                .unwrap();
                db.open(&dir.path().join("bench.rtd"), OpenMode::writer_create())
                    .unwrap();
                for i in 0..1000u32 {
                    db.put(format!("{:08}", i).as_bytes(), b"benchmark-value")
                        .unwrap();
                }
                db.close().unwrap();
            },
            BatchSize::LargeInput,
        );
    });
}

fn bench_get(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.rtd");
    let db = Btree::new();
    db.open(&path, OpenMode::writer_create()).unwrap();
    for i in 0..1000u32 {
        db.put(format!("{:08}", i).as_bytes(), b"benchmark-value")
            .unwrap();
    }
    c.bench_function("get_1000_scattered", |b| {
        b.iter(|| {
            for i in (0..1000u32).step_by(7) {
                db.get(format!("{:08}", i).as_bytes()).unwrap();
            }
        });
    });
    db.close().unwrap();
}

criterion_group!(benches, bench_put, bench_get);
criterion_main!(benches);
