//! Authorization checker benchmarks
//!
//! Cached vs uncached checks over trees of increasing size, plus subtree
//! moves.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use permtree_authz::{
    AuthorizationEngine, CacheConfig, EngineConfig, InMemoryRoleAssignments,
    InMemoryRolePermissionStore, NewPermission, NodeId,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// `modules` top-level categories, each with a wildcard and `leaves` concrete
/// permissions; the principal holds every third module's wildcard and one
/// exact permission per module
async fn build_engine(cache_enabled: bool, modules: usize, leaves: usize) -> AuthorizationEngine {
    let roles = InMemoryRoleAssignments::new();
    let config = EngineConfig {
        cache: CacheConfig {
            enabled: cache_enabled,
            ..Default::default()
        },
        enable_metrics: false,
        ..Default::default()
    };
    let engine = AuthorizationEngine::new(
        config,
        Arc::new(InMemoryRolePermissionStore::new()),
        Arc::new(roles.clone()),
    )
    .unwrap();

    for m in 0..modules {
        let module = engine
            .create_node(NewPermission::new(format!("mod{}", m)).category())
            .await
            .unwrap();
        let wildcard = engine
            .create_node(NewPermission::new(format!("mod{}:*", m)).under(module.id))
            .await
            .unwrap();
        let mut first_leaf = None;
        for l in 0..leaves {
            let leaf = engine
                .create_node(NewPermission::new(format!("mod{}:res:{}", m, l)).under(module.id))
                .await
                .unwrap();
            first_leaf.get_or_insert(leaf.id);
        }

        if m % 3 == 0 {
            engine.grant("bench", wildcard.id, "bench", None).await.unwrap();
        }
        if let Some(leaf) = first_leaf {
            engine.grant("bench", leaf, "bench", None).await.unwrap();
        }
    }

    roles.assign("alice", "bench", None).await;
    engine
}

fn bench_has_permission(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("has_permission");

    for modules in [10usize, 100].iter() {
        for (label, cache_enabled) in [("cached", true), ("uncached", false)] {
            let engine = rt.block_on(build_engine(cache_enabled, *modules, 10));

            group.bench_with_input(BenchmarkId::new(label, modules), modules, |b, &modules| {
                let mut i = 0usize;
                b.to_async(&rt).iter(|| {
                    i += 1;
                    let permission = format!("mod{}:res:{}", i % modules, i % 10);
                    let engine = &engine;
                    async move { black_box(engine.has_permission("alice", &permission).await.unwrap()) }
                });
            });
        }
    }

    group.finish();
}

fn bench_batch_check(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = rt.block_on(build_engine(true, 50, 10));
    let permissions: Vec<String> = (0..20).map(|i| format!("mod{}:res:{}", i, i % 10)).collect();

    c.bench_function("batch_check_20", |b| {
        let (engine, permissions) = (&engine, &permissions);
        b.to_async(&rt).iter(|| async move {
            black_box(engine.batch_check("alice", permissions).await.unwrap())
        });
    });
}

fn bench_move_subtree(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = rt.block_on(build_engine(true, 20, 50));
    let (first, second): (NodeId, NodeId) = rt.block_on(async {
        (
            engine.find_node("mod0").await.unwrap().id,
            engine.find_node("mod1").await.unwrap().id,
        )
    });

    c.bench_function("move_subtree_52_nodes", |b| {
        let mut under_second = false;
        b.to_async(&rt).iter(|| {
            under_second = !under_second;
            let target = if under_second { Some(second) } else { None };
            let engine = &engine;
            async move { black_box(engine.move_node(first, target).await.unwrap()) }
        });
    });
}

criterion_group!(benches, bench_has_permission, bench_batch_check, bench_move_subtree);
criterion_main!(benches);
