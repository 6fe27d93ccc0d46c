//! End-to-end client-server benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use graphrep_client::{Client, ConnectionConfig};
use graphrep_protocol::value::Properties;
use graphrep_protocol::Value;
use graphrep_server::{Server, ServerConfig, WorkerPool};
use graphrep_store::MemoryGraph;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::runtime::Runtime;

struct TestSetup {
    _pool: WorkerPool,
    _server_handle: tokio::task::JoinHandle<()>,
    addr: SocketAddr,
    client: Client,
}

fn setup_server_and_client(rt: &Runtime, workers: usize) -> TestSetup {
    let pool = WorkerPool::start(Arc::new(MemoryGraph::new()), workers, None).unwrap();

    let listener = rt
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Server::new(ServerConfig::new(addr), pool.queue().unwrap());
    let server_handle = rt.spawn(async move {
        let _ = server.serve(listener).await;
    });

    let client = connect(rt, addr);

    TestSetup {
        _pool: pool,
        _server_handle: server_handle,
        addr,
        client,
    }
}

fn connect(rt: &Runtime, addr: SocketAddr) -> Client {
    let client = Client::new(ConnectionConfig::new(addr));
    rt.block_on(client.connect()).unwrap();
    client
}

fn props(name: &str) -> Properties {
    [("name".to_string(), Value::from(name))].into_iter().collect()
}

fn bench_get_node_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server_and_client(&rt, 4);
    let node = rt
        .block_on(setup.client.create_node(&["Person"], props("Alice")))
        .unwrap();

    let mut group = c.benchmark_group("e2e_get_node");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(setup.client.get_node(node.id).await.unwrap()) });
    });

    group.finish();
}

fn bench_create_node_e2e(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server_and_client(&rt, 4);

    let mut group = c.benchmark_group("e2e_create_node");
    group.throughput(Throughput::Elements(1));

    group.bench_function("create", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                setup
                    .client
                    .create_node(&["Item"], Properties::new())
                    .await
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_streamed_query(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server_and_client(&rt, 4);

    rt.block_on(async {
        for i in 0..1000 {
            setup
                .client
                .create_node(&["Person"], props(&format!("person-{}", i)))
                .await
                .unwrap();
        }
    });

    let mut group = c.benchmark_group("e2e_query");

    for limit in [1, 100, 1000] {
        let query = format!("MATCH (n:Person) RETURN n.name LIMIT {}", limit);
        group.throughput(Throughput::Elements(limit as u64));
        group.bench_with_input(BenchmarkId::new("rows", limit), &query, |b, query| {
            b.to_async(&rt).iter(|| async {
                black_box(
                    setup
                        .client
                        .execute(query, Properties::new())
                        .await
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

fn bench_concurrent_clients(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server_and_client(&rt, 8);
    let node = rt
        .block_on(setup.client.create_node(&["Person"], props("Alice")))
        .unwrap();

    let mut group = c.benchmark_group("e2e_concurrent");
    group.sample_size(20);

    for concurrency in [1, 8, 32] {
        let clients: Vec<Client> = (0..concurrency).map(|_| connect(&rt, setup.addr)).collect();

        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("get_node", concurrency),
            &clients,
            |b, clients| {
                b.to_async(&rt).iter(|| async {
                    let futures: Vec<_> = clients.iter().map(|c| c.get_node(node.id)).collect();
                    black_box(futures::future::join_all(futures).await)
                });
            },
        );
    }

    group.finish();
}

fn bench_nodeset_merge(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server_and_client(&rt, 4);

    let mut group = c.benchmark_group("e2e_nodeset");

    group.bench_function("merge_existing", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                setup
                    .client
                    .merge_nodes("Tag", "name", Value::from("rust"))
                    .await
                    .unwrap(),
            )
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_get_node_latency,
    bench_create_node_e2e,
    bench_streamed_query,
    bench_concurrent_clients,
    bench_nodeset_merge,
);

criterion_main!(benches);
