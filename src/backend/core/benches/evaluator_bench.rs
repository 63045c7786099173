//! Benchmarks for capability evaluation and permission checks.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;
use warden_core::prelude::*;

struct Fixture {
    facade: PolicyFacade,
    tenant: TenantId,
    user: UserId,
    key: CapabilityKey,
}

async fn fixture(enrolled: bool) -> Fixture {
    let store = MemoryStore::new();
    let tenant = TenantId::new();
    let user = UserId::new();
    store.add_user(user, tenant).await;

    let store: Arc<dyn Store> = Arc::new(store);
    let guard = OperationGuard::default();
    let cancel = CancellationToken::new();
    let root = Actor::system("bench");
    let admin = Actor::tenant_admin("bench-admin", tenant);
    let key = CapabilityKey::parse("totp").unwrap();

    Bootstrapper::new(store.clone(), guard)
        .initialize_tenant(&cancel, tenant, user)
        .await
        .unwrap();

    let service = CapabilityService::new(store.clone(), guard);
    service
        .register_system_capability(&cancel, &root, SystemCapability::new(key.clone(), json!({"digits": 6}), "TOTP"))
        .await
        .unwrap();
    service
        .assign_tenant_capability(&cancel, &root, tenant, &key, true, None)
        .await
        .unwrap();
    service
        .enable_tenant_feature(&cancel, &admin, tenant, &key, Some(json!({"digits": 8})))
        .await
        .unwrap();
    if enrolled {
        service
            .enroll_user(&cancel, &admin, user, &key, json!({"secret_ref": "vault:bench"}))
            .await
            .unwrap();
    }

    Fixture {
        facade: PolicyFacade::new(store, guard),
        tenant,
        user,
        key,
    }
}

fn bench_evaluate(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("evaluate");
    let cancel = CancellationToken::new();

    for enrolled in [false, true] {
        let f = rt.block_on(fixture(enrolled));
        let label = if enrolled { "enrolled" } else { "not_enrolled" };

        group.bench_with_input(BenchmarkId::new("tenant_only", label), &f, |b, f| {
            b.to_async(&rt)
                .iter(|| async { black_box(f.facade.evaluate(&cancel, f.tenant, &f.key, None).await.unwrap()) });
        });
        group.bench_with_input(BenchmarkId::new("with_user", label), &f, |b, f| {
            b.to_async(&rt).iter(|| async {
                black_box(f.facade.evaluate(&cancel, f.tenant, &f.key, Some(f.user)).await.unwrap())
            });
        });
    }
    group.finish();
}

fn bench_permission_check(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let f = rt.block_on(fixture(false));
    let cancel = CancellationToken::new();
    let mut group = c.benchmark_group("check_permission");

    for permission in ["tenant.users.read", "tenant.unknown.read"] {
        group.bench_with_input(BenchmarkId::from_parameter(permission), &permission, |b, permission| {
            b.to_async(&rt).iter(|| async {
                black_box(
                    f.facade
                        .check_permission(&cancel, f.user, f.tenant, permission)
                        .await
                        .unwrap(),
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_evaluate, bench_permission_check);
criterion_main!(benches);
