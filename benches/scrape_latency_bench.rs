//! Scrape latency benchmarks for rJMX-Bridge
//!
//! Measures scrape pipeline performance:
//! - Jolokia JSON parsing into attribute trees
//! - Full walk-classify-expose cycle against the in-process bean server
//! - Text exposition formatting

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rjmx_bridge::collector::{
    parse_bulk_response, to_bean_node, Bean, BeanNode, BeanServer, ObjectName,
};
use rjmx_bridge::config::Config;
use rjmx_bridge::scrape::ScrapeOrchestrator;
use rjmx_bridge::transformer::PrometheusFormatter;

fn generate_bulk_response(num_mbeans: usize) -> String {
    let responses: Vec<String> = (0..num_mbeans)
        .map(|i| {
            format!(
                r#"{{
                    "request": {{"mbean": "com.example:type=Service,name=Service{}", "type": "read"}},
                    "value": {{
                        "RequestCount": {},
                        "ErrorCount": {},
                        "Latency": {{"p50": {}, "p99": {}}}
                    }},
                    "timestamp": 1609459200,
                    "status": 200
                }}"#,
                i,
                i * 1000 + 100,
                i * 10,
                i as f64 * 1.5 + 10.0,
                i as f64 * 4.5 + 30.0
            )
        })
        .collect();
    format!("[{}]", responses.join(","))
}

fn create_bean_server(num_mbeans: usize) -> Arc<BeanServer> {
    let server = Arc::new(BeanServer::new());
    for i in 0..num_mbeans {
        let name = ObjectName::parse(&format!("com.example:type=Service,name=Service{}", i)).unwrap();
        let bean = Bean::new()
            .attribute("RequestCount", BeanNode::number((i * 1000) as f64))
            .attribute("ErrorCount", BeanNode::number((i * 10) as f64))
            .attribute(
                "Latency",
                BeanNode::composite([
                    ("p50", BeanNode::number(i as f64 * 1.5)),
                    ("p99", BeanNode::number(i as f64 * 4.5)),
                ]),
            )
            .attribute(
                "Pools",
                BeanNode::table(
                    &["pool"],
                    [
                        vec![("pool", BeanNode::text("read")), ("size", BeanNode::number(8.0))],
                        vec![("pool", BeanNode::text("write")), ("size", BeanNode::number(4.0))],
                    ],
                ),
            );
        server.register(name, bean).unwrap();
    }
    server
}

const RULES: &str = r#"
rules:
  - pattern: 'com.example<>type=Service, name=(\w+)><>Latency_(\w+)'
    name: app_service_latency_$2
    labels:
      service: $1
  - pattern: 'com.example<>type=Service, name=(\w+)><>(\w+)'
    name: app_service_$2
    type: COUNTER
    labels:
      service: $1
"#;

fn bench_json_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("scrape/json_parsing");

    for size in [10, 100, 500].iter() {
        let json = generate_bulk_response(*size);
        group.throughput(Throughput::Bytes(json.len() as u64));
        group.bench_with_input(BenchmarkId::new("mbeans", size), &json, |b, json| {
            b.iter(|| {
                let nodes: Vec<BeanNode> = parse_bulk_response(json)
                    .unwrap()
                    .into_iter()
                    .filter_map(|r| r.value.map(to_bean_node))
                    .collect();
                std::hint::black_box(nodes);
            })
        });
    }

    group.finish();
}

fn bench_full_scrape(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("scrape/full_cycle");

    for size in [10, 100, 500].iter() {
        let config = Config::from_yaml_str(RULES).unwrap();
        let orchestrator = ScrapeOrchestrator::builder(config)
            .bean_server(create_bean_server(*size))
            .build()
            .unwrap();
        let formatter = PrometheusFormatter::new();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(
            BenchmarkId::new("mbeans", size),
            &orchestrator,
            |b, orchestrator| {
                b.iter(|| {
                    let snapshot = runtime.block_on(orchestrator.collect());
                    std::hint::black_box(formatter.format_snapshot(&snapshot));
                })
            },
        );
    }

    group.finish();
}

fn bench_formatting(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = Config::from_yaml_str(RULES).unwrap();
    let orchestrator = ScrapeOrchestrator::builder(config)
        .bean_server(create_bean_server(500))
        .build()
        .unwrap();
    let snapshot = runtime.block_on(orchestrator.collect());
    let formatter = PrometheusFormatter::new();

    let mut group = c.benchmark_group("scrape/format");
    group.throughput(Throughput::Elements(snapshot.len() as u64));
    group.bench_function("500_mbeans", |b| {
        b.iter(|| std::hint::black_box(formatter.format_snapshot(&snapshot)))
    });
    group.finish();
}

criterion_group!(benches, bench_json_parsing, bench_full_scrape, bench_formatting);
criterion_main!(benches);
