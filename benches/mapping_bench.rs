//! Mapping 벤치마크
//!
//! Catalog loading and per-tick matching cost

use std::hint::black_box;
use std::time::SystemTime;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use jmx_scraper::config::AVAILABLE_TARGET_SYSTEMS;
use jmx_scraper::connection::{parse_bulk_response, ReadResults};
use jmx_scraper::mapping::MappingRegistry;

const JVM_BULK_RESPONSE: &str = r#"[
    {
        "request": {"mbean": "java.lang:type=Threading", "attribute": ["DaemonThreadCount", "ThreadCount"], "type": "read"},
        "value": {"ThreadCount": 42, "DaemonThreadCount": 10},
        "status": 200
    },
    {
        "request": {"mbean": "java.lang:type=Memory", "attribute": ["HeapMemoryUsage", "NonHeapMemoryUsage"], "type": "read"},
        "value": {
            "HeapMemoryUsage": {"init": 268435456, "used": 52428800, "committed": 268435456, "max": 4294967296},
            "NonHeapMemoryUsage": {"init": 2555904, "used": 41943040, "committed": 44040192, "max": -1}
        },
        "status": 200
    },
    {
        "request": {"mbean": "java.lang:type=GarbageCollector,name=*", "attribute": ["CollectionCount", "CollectionTime"], "type": "read"},
        "value": {
            "java.lang:name=G1 Young Generation,type=GarbageCollector": {"CollectionCount": 42, "CollectionTime": 1234},
            "java.lang:name=G1 Old Generation,type=GarbageCollector": {"CollectionCount": 5, "CollectionTime": 567}
        },
        "status": 200
    },
    {
        "request": {"mbean": "java.lang:type=MemoryPool,name=*", "attribute": ["Type", "Usage"], "type": "read"},
        "value": {
            "java.lang:name=G1 Eden Space,type=MemoryPool": {"Type": "HEAP", "Usage": {"used": 1048576, "committed": 2097152, "max": -1}},
            "java.lang:name=Metaspace,type=MemoryPool": {"Type": "NON_HEAP", "Usage": {"used": 31457280, "committed": 32505856, "max": -1}}
        },
        "status": 200
    }
]"#;

fn benchmark_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    let jvm = vec!["jvm".to_string()];
    let all: Vec<String> = AVAILABLE_TARGET_SYSTEMS.iter().map(|s| s.to_string()).collect();

    group.bench_with_input(BenchmarkId::new("builtin", "jvm"), &jvm, |b, targets| {
        b.iter(|| MappingRegistry::resolve(black_box(targets), None))
    });
    group.bench_with_input(BenchmarkId::new("builtin", "all"), &all, |b, targets| {
        b.iter(|| MappingRegistry::resolve(black_box(targets), None))
    });

    group.finish();
}

fn benchmark_match(c: &mut Criterion) {
    let registry = match MappingRegistry::resolve(&["jvm".to_string()], None) {
        Ok(registry) => registry,
        Err(e) => panic!("jvm catalog failed to load: {e}"),
    };
    let responses = match parse_bulk_response(JVM_BULK_RESPONSE) {
        Ok(responses) => responses,
        Err(e) => panic!("invalid bench fixture: {e}"),
    };
    let results = ReadResults::from_responses(responses.clone());
    let now = SystemTime::now();

    let mut group = c.benchmark_group("tick");

    group.bench_function("normalize_responses", |b| {
        b.iter(|| ReadResults::from_responses(black_box(responses.clone())))
    });
    group.bench_function("match_jvm", |b| {
        b.iter(|| registry.match_against_read_results(black_box(&results), now))
    });
    group.bench_function("read_plan_jvm", |b| b.iter(|| registry.attributes_to_read()));

    group.finish();
}

criterion_group!(benches, benchmark_resolve, benchmark_match);
criterion_main!(benches);
