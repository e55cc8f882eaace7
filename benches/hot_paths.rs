//! Hot path benchmarks for profiling-driven optimization.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! These cover the per-record work that dominates a record stream:
//! line framing, validation, and query evaluation.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use openaccess_walk::codec::{LineCodec, LineFrame};
use openaccess_walk::config::StreamOptions;
use openaccess_walk::query::{FieldPath, QueryMode, QuerySet};
use openaccess_walk::store::InMemoryObjectStore;
use openaccess_walk::RecordStream;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::codec::Decoder;

const RECORD: &str = r#"{"id":"edanmdm-nmah_1234567","title":"Lunar module model","unitCode":"NMAH","content":{"descriptiveNonRepeating":{"record_ID":"nmah_1234567","data_source":"National Museum of American History"},"indexedStructured":{"topic":["Aviation","Space","Models"],"date":["1960s"],"object_type":["Models"]},"freetext":{"notes":[{"label":"Description","content":"Scale model used for training."}]}}}"#;

fn shard(lines: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(lines * (RECORD.len() + 1));
    for _ in 0..lines {
        data.extend_from_slice(RECORD.as_bytes());
        data.push(b'\n');
    }
    data
}

/// Benchmark splitting a shard into line frames
fn bench_line_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_framing");
    let data = shard(1000);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for max_line in [1024, 32 * 1024 * 1024] {
        group.bench_function(format!("max_line_{}", max_line), |b| {
            b.iter(|| {
                let mut codec = LineCodec::new(max_line);
                let mut buf = BytesMut::from(data.as_slice());
                let mut lines = 0usize;
                while let Ok(Some(frame)) = codec.decode_eof(&mut buf) {
                    if let LineFrame::Line(line) = frame {
                        lines += line.len();
                    }
                }
                black_box(lines)
            })
        });
    }

    group.finish();
}

/// Benchmark per-line processing with each option
fn bench_process_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_line");
    group.throughput(Throughput::Elements(1));
    let raw = Bytes::from_static(RECORD.as_bytes());

    let cases = [
        ("passthrough", StreamOptions::default()),
        (
            "validate",
            StreamOptions {
                validate: true,
                ..Default::default()
            },
        ),
        (
            "format",
            StreamOptions {
                format: true,
                ..Default::default()
            },
        ),
        (
            "query",
            StreamOptions {
                query: QuerySet::parse(&["unitCode=^NMAH$"], QueryMode::All).ok(),
                ..Default::default()
            },
        ),
    ];

    for (name, options) in cases {
        let stream = RecordStream::new(Arc::new(InMemoryObjectStore::new()), options, 1 << 20);
        group.bench_function(name, |b| {
            b.iter(|| black_box(stream.process_line("nmah/00.txt", 1, raw.clone())))
        });
    }

    group.finish();
}

/// Benchmark query evaluation against an already parsed record
fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    group.throughput(Throughput::Elements(1));
    let record: Value = match serde_json::from_str(RECORD) {
        Ok(v) => v,
        Err(e) => panic!("bench record must parse: {}", e),
    };

    let specs = ["title=^Lunar", "content.indexedStructured.topic=^Space$"];
    for mode in [QueryMode::All, QueryMode::Any] {
        let query = match QuerySet::parse(&specs, mode) {
            Ok(q) => q,
            Err(e) => panic!("bench query must parse: {}", e),
        };
        group.bench_function(format!("mode_{}", mode), |b| {
            b.iter(|| black_box(query.matches(black_box(&record))))
        });
    }

    let paths = ["unitCode", "content.indexedStructured.topic", "content.freetext.notes.#.label"];
    for raw in paths {
        if let Some(path) = FieldPath::parse(raw) {
            group.bench_function(format!("extract_{}", raw), |b| {
                b.iter(|| black_box(path.extract(black_box(&record)).len()))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_line_framing, bench_process_line, bench_query);
criterion_main!(benches);
