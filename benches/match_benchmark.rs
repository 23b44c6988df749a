//! Benchmarks for dnsrule match performance.
//!
//! Run with: cargo bench
//!
//! Measures:
//! - Match throughput against the domain tables
//! - Shortcut and regex tier overhead
//! - Precedence selection cost

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dnsrule::{Engine, EngineParams, FilterParams, RecordType};

/// Generate a rule list with the given tier mix.
fn generate_rules(domain_count: usize, shortcut_count: usize, regex_count: usize) -> String {
    let mut rules = String::new();

    for i in 0..domain_count {
        rules.push_str(&format!("||domain{}.example.org^\n", i));
    }
    for i in 0..shortcut_count {
        rules.push_str(&format!("*shortcut{}pattern*\n", i));
    }
    for i in 0..regex_count {
        rules.push_str(&format!("/^leftover(er)?{}\\./\n", i));
    }

    rules
}

/// Generate queries with the requested hit ratio against the domain tier.
fn generate_queries(count: usize, hit_ratio: f64) -> Vec<String> {
    let mut queries = Vec::with_capacity(count);
    let hits = (count as f64 * hit_ratio) as usize;

    for i in 0..hits {
        queries.push(format!("sub.domain{}.example.org", i % 1000));
    }
    for i in hits..count {
        queries.push(format!("unknown{}.nonexistent.org", i));
    }

    queries
}

fn build_engine(rules: String) -> Engine {
    let (engine, _) = Engine::load(EngineParams {
        filters: vec![FilterParams {
            id: 1,
            data: rules,
            in_memory: true,
        }],
        mem_limit: 0,
    })
    .unwrap();
    engine
}

fn bench_domain_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain_match");

    for size in [1_000, 10_000, 100_000] {
        let engine = build_engine(generate_rules(size, 0, 0));
        let queries = generate_queries(1_000, 0.5);

        group.throughput(Throughput::Elements(queries.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                for query in &queries {
                    black_box(engine.match_request(black_box(query), RecordType::A));
                }
            });
        });
    }

    group.finish();
}

fn bench_tier_mix(c: &mut Criterion) {
    let mut group = c.benchmark_group("tier_mix");

    let engine = build_engine(generate_rules(10_000, 500, 100));
    let queries = generate_queries(1_000, 0.5);

    group.throughput(Throughput::Elements(queries.len() as u64));
    group.bench_function("mixed_tiers", |b| {
        b.iter(|| {
            for query in &queries {
                black_box(engine.match_request(black_box(query), RecordType::A));
            }
        });
    });

    group.finish();
}

fn bench_select_effective(c: &mut Criterion) {
    let rules = "\
||ads.example.org^\n\
@@||ads.example.org^\n\
||ads.example.org^$important\n\
||ads.example.org^$dnstype=A\n\
1.2.3.4 other.test\n";
    let engine = build_engine(rules.to_string());
    let matched = engine.match_request("ads.example.org", RecordType::A);

    c.bench_function("select_effective_rules", |b| {
        b.iter(|| black_box(engine.select_effective_rules(black_box(&matched.rules))));
    });
}

criterion_group!(
    benches,
    bench_domain_match,
    bench_tier_mix,
    bench_select_effective
);
criterion_main!(benches);
