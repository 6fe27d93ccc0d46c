//! Protocol encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use graphrep_protocol::frame::Frame;
use graphrep_protocol::{Decoder, Encoder, Method, NodeSnapshot, Request, Response, Status, Value};

fn create_test_request(payload_size: usize) -> Request {
    Request::new(Method::Patch, "node")
        .with_arg(7)
        .with_arg(Value::List(vec![Value::from("Person")]))
        .with_arg(Value::Map(
            [("bio".to_string(), Value::from("x".repeat(payload_size)))]
                .into_iter()
                .collect(),
        ))
}

fn create_test_row(payload_size: usize) -> Response {
    let node = NodeSnapshot::new(12345)
        .with_label("Person")
        .with_property("name", "Alice")
        .with_property("bio", "x".repeat(payload_size));
    Response::new(
        Status::Continue,
        vec![Value::Node(node), Value::from(42), Value::Float(0.5)],
    )
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [100, 1000, 10000] {
        let frame = Frame::new(Bytes::from("x".repeat(size)));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [100, 1000, 10000] {
        let encoded = Frame::new(Bytes::from("x".repeat(size))).encode().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut buf = encoded.clone();
                black_box(Frame::decode(&mut buf).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_request_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_parse");

    for size in [100, 1000, 10000] {
        let line = create_test_request(size).encode().unwrap();

        group.throughput(Throughput::Bytes(line.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &line, |b, line| {
            b.iter(|| black_box(Request::parse(line.as_bytes()).unwrap()));
        });
    }

    group.finish();
}

fn bench_request_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_decode");

    for size in [100, 1000, 10000] {
        let encoded = Encoder::encode_request(&create_test_request(size)).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                decoder.extend(encoded);
                black_box(decoder.decode_request().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_row_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_encode");

    for size in [100, 1000, 10000] {
        let response = create_test_row(size);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            &response,
            |b, response| {
                b.iter(|| black_box(Encoder::encode_response(response).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_row_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_decode");

    for size in [100, 1000, 10000] {
        let encoded = Encoder::encode_response(&create_test_row(size)).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                decoder.extend(encoded);
                black_box(decoder.decode_response().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_crc32c(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc32c");

    for size in [100, 1000, 10000, 100000] {
        let data = vec![0x42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(crc32c::crc32c(data)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_request_parse,
    bench_request_decode,
    bench_row_encode,
    bench_row_decode,
    bench_crc32c,
);

criterion_main!(benches);
