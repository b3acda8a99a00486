use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nanotel::codec::{decode, decode_json, encode, Otlp};
use nanotel::{json, BatchTime, Client, ClientConfig, LogOptions, NullTransport, Value};

fn payload(fields: usize) -> Value {
    let mut map = serde_json::Map::with_capacity(fields);
    for i in 0..fields {
        let value = match i % 4 {
            0 => json!(format!("value-{i}")),
            1 => json!(i),
            2 => json!(i as f64 * 0.5),
            _ => json!({"nested": [i, true, "x"]}),
        };
        map.insert(format!("field_{i}"), value);
    }
    Value::Object(map)
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for fields in [4, 32, 256] {
        let value = payload(fields);
        let encoded = encode(&value).unwrap();
        let wire = serde_json::to_value(&encoded).unwrap();
        group.throughput(Throughput::Elements(fields as u64));

        group.bench_with_input(BenchmarkId::new("encode", fields), &value, |b, value| {
            b.iter(|| encode(black_box(value)));
        });
        group.bench_with_input(BenchmarkId::new("decode", fields), &encoded, |b, encoded| {
            b.iter(|| decode(Otlp::Value(black_box(encoded))));
        });
        group.bench_with_input(BenchmarkId::new("decode_json", fields), &wire, |b, wire| {
            b.iter(|| decode_json(black_box(wire)));
        });
    }

    group.finish();
}

fn bench_log_path(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();
    let config = ClientConfig::new("http://localhost:4318", "bench").with_batch_time(BatchTime::Never);
    let client = Client::new(config, NullTransport::new()).unwrap();
    let body = payload(8);

    let mut group = c.benchmark_group("client");
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("log_and_flush_1000", |b| {
        b.to_async(&runtime).iter(|| async {
            for _ in 0..1_000 {
                client.log(body.clone(), LogOptions::new());
            }
            client.flush().await;
        });
    });
    // Immediate mode: the runtime's workers drain spans as they are produced
    let config = ClientConfig::new("http://localhost:4318", "bench").with_batch_time(BatchTime::Immediate);
    let tracer = Client::new(config, NullTransport::new()).unwrap();
    group.bench_function("trace_nested", |b| {
        b.iter(|| {
            tracer.trace("outer", |scope| scope.trace("inner", |_| black_box(1)));
        });
    });
    group.finish();
}

criterion_group!(benches, bench_codec, bench_log_path);
criterion_main!(benches);
