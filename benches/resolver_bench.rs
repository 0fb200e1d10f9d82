//! Authorize hot-path benchmarks: cached hit vs. full graph walk

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rbac_engine::{AccessEngine, EngineConfig, InMemoryAssignmentStore, Role};
use std::sync::Arc;

async fn build_engine() -> AccessEngine {
    let store = Arc::new(InMemoryAssignmentStore::new());
    let engine = AccessEngine::new(EngineConfig::default(), store)
        .await
        .expect("engine");

    // Four-level hierarchy with a grant at each level
    let mut parent: Option<String> = None;
    for (idx, slug) in ["root", "division", "team", "member"].iter().enumerate() {
        let mut role = Role::new(*slug, slug.to_uppercase(), 100 - (idx as i32) * 10)
            .with_id(*slug);
        if let Some(parent_id) = &parent {
            role = role.with_parent(parent_id.clone());
        }
        engine.create_role(role).await.expect("role");

        let permission = engine
            .create_permission(&format!("svc{}_*", idx))
            .await
            .expect("permission");
        engine
            .grant_permission(slug, &permission.id, None)
            .await
            .expect("grant");

        parent = Some(slug.to_string());
    }

    engine.assign_role("alice", "member", None, None).await.expect("assign");
    engine
}

fn bench_authorize(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let engine = rt.block_on(build_engine());

    c.bench_function("authorize_cached", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(engine.authorize("alice", "svc3_read").await) })
    });

    c.bench_function("authorize_uncached", |b| {
        b.to_async(&rt).iter(|| async {
            engine.invalidate_user("alice");
            black_box(engine.authorize("alice", "svc3_read").await)
        })
    });

    c.bench_function("authorize_unknown_user", |b| {
        b.to_async(&rt).iter(|| async {
            engine.invalidate_user("ghost");
            black_box(engine.authorize("ghost", "svc3_read").await)
        })
    });
}

criterion_group!(benches, bench_authorize);
criterion_main!(benches);
