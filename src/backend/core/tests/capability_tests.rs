//! Integration tests for four-layer capability evaluation.
//!
//! Tests cover:
//! - The layered walk from registry entry to user enrollment
//! - Monotonic flags, including with orphaned rows
//! - Most-specific-wins configuration merging
//! - Enrollment prerequisites and unenrollment
//! - Registry create / get / update round trip
//! - The policy facade's capability-specific errors

use serde_json::json;
use std::sync::Arc;
use warden_core::prelude::*;
use warden_core::store::Fault;

// ============================================================================
// Fixture
// ============================================================================

struct World {
    store: MemoryStore,
    service: CapabilityService,
    facade: PolicyFacade,
    cancel: CancellationToken,
    root: Actor,
    admin: Actor,
    tenant: TenantId,
    user: UserId,
    totp: CapabilityKey,
}

impl World {
    async fn new() -> Self {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let user = UserId::new();
        store.add_user(user, tenant).await;

        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let guard = OperationGuard::default();
        let world = Self {
            service: CapabilityService::new(shared.clone(), guard),
            facade: PolicyFacade::new(shared, guard),
            store,
            cancel: CancellationToken::new(),
            root: Actor::system("platform-operator"),
            admin: Actor::tenant_admin("tenant-admin", tenant),
            tenant,
            user,
            totp: CapabilityKey::parse("totp").unwrap(),
        };

        world
            .service
            .register_system_capability(
                &world.cancel,
                &world.root,
                SystemCapability::new(world.totp.clone(), json!({"digits": 6}), "Time-based one-time passwords"),
            )
            .await
            .unwrap();
        world
    }

    async fn evaluate(&self, user: Option<UserId>) -> EvaluationResult {
        self.facade
            .evaluate(&self.cancel, self.tenant, &self.totp, user)
            .await
            .unwrap()
    }

    async fn assign(&self, enabled: bool, value: Option<serde_json::Value>) {
        self.service
            .assign_tenant_capability(&self.cancel, &self.root, self.tenant, &self.totp, enabled, value)
            .await
            .unwrap();
    }

    async fn enable(&self, configuration: Option<serde_json::Value>) {
        self.service
            .enable_tenant_feature(&self.cancel, &self.admin, self.tenant, &self.totp, configuration)
            .await
            .unwrap();
    }

    async fn enroll(&self) {
        self.service
            .enroll_user(&self.cancel, &self.admin, self.user, &self.totp, json!({"secret_ref": "vault:u1"}))
            .await
            .unwrap();
    }
}

fn assert_monotonic(r: &EvaluationResult) {
    assert!(!r.tenant_allowed || r.system_supported);
    assert!(!r.tenant_enabled || r.tenant_allowed);
    assert!(!r.user_enrolled || r.tenant_enabled);
}

// ============================================================================
// Layered walk
// ============================================================================

#[tokio::test]
async fn test_unassigned_tenant_is_not_allowed() {
    let w = World::new().await;
    let r = w.evaluate(None).await;

    assert!(r.system_supported);
    assert!(!r.tenant_allowed);
    assert!(!r.effective);
    assert_eq!(r.denial, Some(DenialReason::NotAssigned));
    assert_monotonic(&r);
}

#[tokio::test]
async fn test_assigned_but_not_enabled() {
    let w = World::new().await;
    w.assign(true, None).await;
    let r = w.evaluate(None).await;

    assert!(r.tenant_allowed);
    assert!(!r.tenant_enabled);
    assert!(!r.effective);
    assert_eq!(r.denial, Some(DenialReason::NotEnabled));
}

#[tokio::test]
async fn test_enabled_feature_overrides_default() {
    let w = World::new().await;
    w.assign(true, None).await;
    w.enable(Some(json!({"digits": 8}))).await;
    let r = w.evaluate(None).await;

    assert!(r.tenant_enabled);
    assert!(r.effective);
    assert_eq!(r.merged_value["digits"], 8);
    assert_eq!(r.value_source, ValueSource::TenantFeature);
    assert_eq!(r.system_default, Some(json!({"digits": 6})));
}

#[tokio::test]
async fn test_user_needs_enrollment() {
    let w = World::new().await;
    w.assign(true, None).await;
    w.enable(Some(json!({"digits": 8}))).await;

    let before = w.evaluate(Some(w.user)).await;
    assert!(!before.effective);
    assert_eq!(before.denial, Some(DenialReason::NotEnrolled));

    w.enroll().await;
    let after = w.evaluate(Some(w.user)).await;
    assert!(after.user_enrolled);
    assert!(after.effective);
    assert_eq!(after.merged_value["digits"], 8);
    assert_monotonic(&after);
}

#[tokio::test]
async fn test_assignment_value_used_without_feature_configuration() {
    let w = World::new().await;
    w.assign(true, Some(json!({"digits": 7}))).await;
    w.enable(None).await;
    let r = w.evaluate(None).await;

    assert_eq!(r.merged_value, json!({"digits": 7}));
    assert_eq!(r.value_source, ValueSource::TenantAssignment);
}

// ============================================================================
// Orphans stay inert
// ============================================================================

#[tokio::test]
async fn test_revoked_assignment_leaves_inert_rows() {
    let w = World::new().await;
    w.assign(true, None).await;
    w.enable(None).await;
    w.enroll().await;
    assert!(w.evaluate(Some(w.user)).await.effective);

    assert!(w
        .service
        .revoke_tenant_capability(&w.cancel, &w.root, w.tenant, &w.totp)
        .await
        .unwrap());

    let r = w.evaluate(Some(w.user)).await;
    assert!(!r.effective);
    assert!(!r.tenant_enabled);
    assert!(!r.user_enrolled);
    assert_monotonic(&r);

    let orphans = w.service.find_orphans(&w.cancel, w.tenant).await.unwrap();
    assert_eq!(orphans.orphaned_features, vec![w.totp.clone()]);
    assert_eq!(orphans.orphaned_enrollments, vec![(w.user, w.totp.clone())]);
}

#[tokio::test]
async fn test_disabling_system_capability_denies_everyone() {
    let w = World::new().await;
    w.assign(true, None).await;
    w.enable(None).await;
    w.enroll().await;

    w.service
        .update_system_capability(&w.cancel, &w.root, &w.totp, SystemCapabilityUpdate::enabled(false))
        .await
        .unwrap();

    let r = w.evaluate(Some(w.user)).await;
    assert!(!r.system_supported);
    assert!(!r.effective);
    assert_eq!(r.denial, Some(DenialReason::NotSupported));
    assert_monotonic(&r);
}

#[tokio::test]
async fn test_feature_requires_assignment() {
    let w = World::new().await;
    let err = w
        .service
        .enable_tenant_feature(&w.cancel, &w.admin, w.tenant, &w.totp, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PrerequisiteNotEnabled);
    assert!(w.service.list_tenant_features(&w.cancel, w.tenant).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_enrollment_requires_every_tenant_layer() {
    let w = World::new().await;
    w.assign(true, None).await;
    w.enable(None).await;

    // The feature row survives a revoke but no longer counts as enabled.
    w.service
        .revoke_tenant_capability(&w.cancel, &w.root, w.tenant, &w.totp)
        .await
        .unwrap();
    let err = w
        .service
        .enroll_user(&w.cancel, &w.admin, w.user, &w.totp, json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PrerequisiteNotEnabled);
    assert_eq!(err.details().context.get("layer"), Some(&json!("assignment")));

    w.assign(true, None).await;
    w.service
        .update_system_capability(&w.cancel, &w.root, &w.totp, SystemCapabilityUpdate::enabled(false))
        .await
        .unwrap();
    let err = w
        .service
        .enroll_user(&w.cancel, &w.admin, w.user, &w.totp, json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.details().context.get("layer"), Some(&json!("system")));

    assert!(w.service.find_orphans(&w.cancel, w.tenant).await.unwrap().is_empty());
}

// ============================================================================
// Unenroll
// ============================================================================

#[tokio::test]
async fn test_unenroll_removes_enrollment_once() {
    let w = World::new().await;
    w.assign(true, None).await;
    w.enable(None).await;
    w.enroll().await;

    assert!(w
        .service
        .unenroll_user(&w.cancel, &w.admin, w.user, &w.totp)
        .await
        .unwrap());
    assert!(w
        .service
        .list_user_capabilities(&w.cancel, w.user)
        .await
        .unwrap()
        .is_empty());
    assert!(!w.evaluate(Some(w.user)).await.user_enrolled);

    let again = w
        .service
        .unenroll_user(&w.cancel, &w.admin, w.user, &w.totp)
        .await
        .unwrap();
    assert!(!again);
}

#[tokio::test]
async fn test_unenroll_unknown_user() {
    let w = World::new().await;
    let err = w
        .service
        .unenroll_user(&w.cancel, &w.root, UserId::new(), &w.totp)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.code(), ErrorCode::UserNotFound);
}

#[tokio::test]
async fn test_unenroll_from_other_tenant_is_denied() {
    let w = World::new().await;
    w.assign(true, None).await;
    w.enable(None).await;
    w.enroll().await;

    let outsider = Actor::tenant_admin("other-admin", TenantId::new());
    let err = w
        .service
        .unenroll_user(&w.cancel, &outsider, w.user, &w.totp)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(w.evaluate(Some(w.user)).await.user_enrolled);
}

// ============================================================================
// Registry round trip
// ============================================================================

#[tokio::test]
async fn test_registry_round_trip() {
    let w = World::new().await;
    let webauthn = CapabilityKey::parse("webauthn").unwrap();

    let created = w
        .service
        .register_system_capability(
            &w.cancel,
            &w.root,
            SystemCapability::new(webauthn.clone(), json!({"user_verification": "preferred"}), "Passkeys"),
        )
        .await
        .unwrap();
    let fetched = w.service.get_system_capability(&w.cancel, &webauthn).await.unwrap();
    assert_eq!(fetched, created);

    w.service
        .update_system_capability(&w.cancel, &w.root, &webauthn, SystemCapabilityUpdate::enabled(false))
        .await
        .unwrap();
    let updated = w.service.get_system_capability(&w.cancel, &webauthn).await.unwrap();
    assert!(!updated.enabled);
    assert_eq!(updated.default_value, created.default_value);
    assert_eq!(updated.description, created.description);

    let keys: Vec<_> = w
        .service
        .list_system_capabilities(&w.cancel)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.capability_key)
        .collect();
    assert_eq!(keys, vec![w.totp.clone(), webauthn]);
}

#[tokio::test]
async fn test_tenant_admin_cannot_touch_registry() {
    let w = World::new().await;
    let err = w
        .service
        .register_system_capability(
            &w.cancel,
            &w.admin,
            SystemCapability::new(CapabilityKey::parse("sms_otp").unwrap(), json!({}), ""),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

// ============================================================================
// Facade
// ============================================================================

#[tokio::test]
async fn test_require_capability_returns_configuration() {
    let w = World::new().await;
    w.assign(true, None).await;
    w.enable(Some(json!({"digits": 8}))).await;
    w.enroll().await;

    let value = w
        .facade
        .require_capability(&w.cancel, w.tenant, &w.totp, Some(w.user))
        .await
        .unwrap();
    assert_eq!(value, json!({"digits": 8}));
}

#[tokio::test]
async fn test_require_capability_names_denying_layer() {
    let w = World::new().await;
    w.assign(true, None).await;

    let err = w
        .facade
        .require_capability(&w.cancel, w.tenant, &w.totp, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapabilityUnavailable);
    assert_eq!(err.details().context.get("reason"), Some(&json!("not_enabled")));
}

#[tokio::test]
async fn test_record_use_updates_last_used() {
    let w = World::new().await;
    w.assign(true, None).await;
    w.enable(None).await;
    w.enroll().await;

    let state = w
        .service
        .record_capability_use(&w.cancel, w.user, &w.totp)
        .await
        .unwrap();
    assert!(state.last_used_at.is_some());

    let r = w.evaluate(Some(w.user)).await;
    assert_eq!(r.user_state.and_then(|s| s.last_used_at), state.last_used_at);
}

#[tokio::test]
async fn test_unreachable_store_is_dependency_error() {
    let w = World::new().await;
    w.store.inject(Fault::Unavailable);

    let err = w
        .facade
        .evaluate(&w.cancel, w.tenant, &w.totp, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
    assert!(err.is_retryable());

    w.store.clear(Fault::Unavailable);
    assert!(!w.evaluate(None).await.effective);
}
