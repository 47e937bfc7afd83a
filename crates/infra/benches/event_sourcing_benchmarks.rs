use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use policystream_core::{AggregateId, TenantId};
use policystream_events::AggregateRoot;
use policystream_infra::config::InfraConfig;
use policystream_infra::event_store::InMemoryEventStore;
use policystream_infra::lock::{AggregateLockService, InMemoryLockCoordinator};
use policystream_infra::projections::{ProjectionRebuilder, Projections};
use policystream_infra::repository::AggregateRepository;
use policystream_infra::services::PolicyServices;
use policystream_quotes::{InitializeQuote, Quote, QuoteCommand, RenameQuote};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn initialize() -> QuoteCommand {
    QuoteCommand::Initialize(InitializeQuote {
        name: "Bench quote".to_string(),
        product_code: "HOME".to_string(),
        premium_cents: 10_000,
        occurred_at: Utc::now(),
    })
}

fn rename(n: u64) -> QuoteCommand {
    QuoteCommand::Rename(RenameQuote {
        name: format!("Bench quote {n}"),
        occurred_at: Utc::now(),
    })
}

fn repository(projections: &Projections) -> (Arc<InMemoryEventStore>, AggregateRepository<Quote>) {
    let store = Arc::new(InMemoryEventStore::new());
    let repository = AggregateRepository::new(store.clone(), Arc::new(projections.quote_dispatcher()));
    (store, repository)
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("command_execution_latency");

    group.bench_function("create_quote_fresh", |b| {
        let services = &PolicyServices::in_memory(&InfraConfig::default());
        let tenant_id = TenantId::new();
        b.to_async(&rt).iter(|| async move {
            services
                .quotes
                .create_with(tenant_id, AggregateId::new(), black_box(initialize()))
                .await
                .expect("create");
        });
    });

    group.bench_function("rename_quote_with_history", |b| {
        let services = &PolicyServices::in_memory(&InfraConfig::default());
        let (tenant_id, quote_id) = (TenantId::new(), AggregateId::new());
        rt.block_on(services.quotes.create_with(tenant_id, quote_id, initialize()))
            .expect("create");
        let counter = &AtomicU64::new(0);

        b.to_async(&rt).iter(|| async move {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            services
                .quotes
                .update_with(tenant_id, quote_id, rename(n))
                .await
                .expect("rename");
        });
    });

    group.finish();
}

fn bench_save_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("save_throughput");

    for batch_size in [1u64, 10, 100] {
        group.throughput(Throughput::Elements(batch_size));
        group.bench_with_input(BenchmarkId::new("batch_save", batch_size), &batch_size, |b, &size| {
            let projections = Projections::in_memory();
            let (_, repository) = repository(&projections);
            let repository = &repository;
            let tenant_id = TenantId::new();

            b.to_async(&rt).iter(|| async move {
                let mut root = AggregateRoot::<Quote>::new(tenant_id, AggregateId::new());
                root.handle(&initialize()).expect("initialize");
                for n in 1..size {
                    root.handle(&rename(n)).expect("rename");
                }
                black_box(repository.save(&mut root).await.expect("save"));
            });
        });
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("projection_rebuild");

    for history in [10u64, 100, 1000] {
        group.throughput(Throughput::Elements(history));
        group.bench_with_input(BenchmarkId::new("rebuild_aggregate", history), &history, |b, &len| {
            let projections = Projections::in_memory();
            let (store, repository) = repository(&projections);
            let (tenant_id, quote_id) = (TenantId::new(), AggregateId::new());

            let mut root = AggregateRoot::<Quote>::new(tenant_id, quote_id);
            root.handle(&initialize()).expect("initialize");
            for n in 1..len {
                root.handle(&rename(n)).expect("rename");
            }
            rt.block_on(repository.save(&mut root)).expect("seed history");

            let locks = AggregateLockService::new(Arc::new(InMemoryLockCoordinator::new()));
            let rebuilder = &ProjectionRebuilder::new(store, Arc::clone(repository.dispatcher()), locks);
            b.to_async(&rt).iter(|| async move {
                black_box(rebuilder.rebuild_aggregate(tenant_id, quote_id).await.expect("rebuild"));
            });
        });
    }

    group.finish();
}

fn bench_load_by_replay(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("get_by_id");

    for history in [10u64, 100, 1000] {
        group.throughput(Throughput::Elements(history));
        group.bench_with_input(BenchmarkId::new("replay", history), &history, |b, &len| {
            let projections = Projections::in_memory();
            let (_, repository) = repository(&projections);
            let (tenant_id, quote_id) = (TenantId::new(), AggregateId::new());

            let mut root = AggregateRoot::<Quote>::new(tenant_id, quote_id);
            root.handle(&initialize()).expect("initialize");
            for n in 1..len {
                root.handle(&rename(n)).expect("rename");
            }
            rt.block_on(repository.save(&mut root)).expect("seed history");
            let repository = &repository;

            b.to_async(&rt).iter(|| async move {
                black_box(repository.get_by_id(tenant_id, quote_id).await.expect("load"));
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_save_throughput,
    bench_projection_rebuild_speed,
    bench_load_by_replay
);
criterion_main!(benches);
