//! Four-layer capability evaluation.
//!
//! Layers are consulted in order and evaluation stops at the first layer that
//! is absent or disabled, so a dependent layer is never read (or reported)
//! once an enclosing layer has denied. This keeps the reported flags
//! monotonic even when orphaned rows exist below a disabled layer.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::models::{non_null, UserCapabilityState};
use crate::error::Result;
use crate::store::{OperationGuard, Store, Transaction, TransactionMode};
use crate::telemetry::PolicyMetrics;
use crate::types::{CapabilityKey, TenantId, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Result types
// ═══════════════════════════════════════════════════════════════════════════════

/// The first layer that stopped a capability from being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Not in the system registry, or disabled platform-wide.
    NotSupported,
    /// The tenant has no enabled assignment.
    NotAssigned,
    /// The tenant has not turned the feature on.
    NotEnabled,
    /// The user is not enrolled.
    NotEnrolled,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSupported => "not_supported",
            Self::NotAssigned => "not_assigned",
            Self::NotEnabled => "not_enabled",
            Self::NotEnrolled => "not_enrolled",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which layer the merged value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    TenantFeature,
    TenantAssignment,
    SystemDefault,
    /// No layer contributed; the value is `{}`.
    Empty,
}

/// Explainable outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub tenant_id: TenantId,
    pub capability_key: CapabilityKey,
    pub user_id: Option<UserId>,

    pub system_supported: bool,
    pub tenant_allowed: bool,
    pub tenant_enabled: bool,
    /// Always false when no user was supplied.
    pub user_enrolled: bool,
    pub effective: bool,

    /// Raw layer values, as stored.
    pub system_default: Option<Value>,
    pub tenant_value: Option<Value>,
    pub tenant_configuration: Option<Value>,

    pub merged_value: Value,
    pub value_source: ValueSource,
    pub denial: Option<DenialReason>,

    /// Enrollment row for effective user evaluations. Holds secret
    /// references, so it is never serialized.
    #[serde(skip_serializing, default)]
    pub user_state: Option<UserCapabilityState>,
}

impl EvaluationResult {
    fn denied(tenant_id: TenantId, capability_key: CapabilityKey, user_id: Option<UserId>) -> Self {
        Self {
            tenant_id,
            capability_key,
            user_id,
            system_supported: false,
            tenant_allowed: false,
            tenant_enabled: false,
            user_enrolled: false,
            effective: false,
            system_default: None,
            tenant_value: None,
            tenant_configuration: None,
            merged_value: json!({}),
            value_source: ValueSource::Empty,
            denial: Some(DenialReason::NotSupported),
            user_state: None,
        }
    }

    /// Metric label: `effective` or the denying layer.
    pub fn outcome(&self) -> &'static str {
        self.denial.map(|d| d.as_str()).unwrap_or("effective")
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Evaluation
// ═══════════════════════════════════════════════════════════════════════════════

/// Evaluate inside an already open transaction.
pub(crate) async fn evaluate_in(
    tx: &mut dyn Transaction,
    tenant_id: TenantId,
    key: &CapabilityKey,
    user_id: Option<UserId>,
) -> Result<EvaluationResult> {
    let mut result = EvaluationResult::denied(tenant_id, key.clone(), user_id);

    // Layer 1: system registry
    let Some(system) = tx.get_system_capability(key).await? else {
        return Ok(result);
    };
    result.system_default = Some(system.default_value.clone());
    if !system.enabled {
        return Ok(result);
    }
    result.system_supported = true;
    merge(&mut result, Some(&system.default_value), ValueSource::SystemDefault);

    // Layer 2: tenant assignment
    let assignment = tx.get_tenant_assignment(tenant_id, key).await?;
    result.tenant_value = assignment.as_ref().and_then(|a| a.value.clone());
    match assignment {
        Some(a) if a.enabled => {
            result.tenant_allowed = true;
            merge(&mut result, non_null(&a.value), ValueSource::TenantAssignment);
        }
        _ => {
            result.denial = Some(DenialReason::NotAssigned);
            return Ok(result);
        }
    }

    // Layer 3: tenant feature
    let feature = tx.get_tenant_feature(tenant_id, key).await?;
    result.tenant_configuration = feature.as_ref().and_then(|f| f.configuration.clone());
    match feature {
        Some(f) if f.enabled => {
            result.tenant_enabled = true;
            merge(&mut result, non_null(&f.configuration), ValueSource::TenantFeature);
        }
        _ => {
            result.denial = Some(DenialReason::NotEnabled);
            return Ok(result);
        }
    }

    // Layer 4: user enrollment
    let Some(user_id) = user_id else {
        result.effective = true;
        result.denial = None;
        return Ok(result);
    };

    // Enrollment never crosses tenants.
    let state = if tx.user_tenant(user_id).await? == Some(tenant_id) {
        tx.get_user_state(user_id, key).await?
    } else {
        None
    };

    match state {
        Some(s) if s.enrolled => {
            result.user_enrolled = true;
            result.effective = true;
            result.denial = None;
            result.user_state = Some(s);
        }
        _ => result.denial = Some(DenialReason::NotEnrolled),
    }
    Ok(result)
}

fn merge(result: &mut EvaluationResult, value: Option<&Value>, source: ValueSource) {
    if let Some(value) = value.filter(|v| !v.is_null()) {
        result.merged_value = value.clone();
        result.value_source = source;
    }
}

/// Read-only evaluator over a [`Store`].
#[derive(Clone)]
pub struct CapabilityEvaluator {
    store: Arc<dyn Store>,
    guard: OperationGuard,
}

impl CapabilityEvaluator {
    pub fn new(store: Arc<dyn Store>, guard: OperationGuard) -> Self {
        Self { store, guard }
    }

    /// Evaluate `key` for a tenant and, optionally, one of its users.
    ///
    /// Missing rows are denials, not errors. Only store failures,
    /// cancellation and timeouts produce `Err`.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, capability = %key))]
    pub async fn evaluate(
        &self,
        cancel: &CancellationToken,
        tenant_id: TenantId,
        key: &CapabilityKey,
        user_id: Option<UserId>,
    ) -> Result<EvaluationResult> {
        let started = Instant::now();
        let result = self
            .guard
            .run(cancel, "evaluate", self.evaluate_once(tenant_id, key, user_id))
            .await?;

        PolicyMetrics::evaluation(result.outcome(), started.elapsed());
        debug!(
            effective = result.effective,
            outcome = result.outcome(),
            source = ?result.value_source,
            "Capability evaluated"
        );
        Ok(result)
    }

    async fn evaluate_once(
        &self,
        tenant_id: TenantId,
        key: &CapabilityKey,
        user_id: Option<UserId>,
    ) -> Result<EvaluationResult> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;
        let result = evaluate_in(tx.as_mut(), tenant_id, key, user_id).await?;
        tx.rollback().await?;
        Ok(result)
    }
}

impl fmt::Debug for CapabilityEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityEvaluator")
            .field("store", &self.store.name())
            .field("guard", &self.guard)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::models::{
        SystemCapability, TenantCapabilityAssignment, TenantFeatureEnablement,
    };
    use crate::store::MemoryStore;
    use chrono::Utc;

    struct Fixture {
        store: MemoryStore,
        tenant: TenantId,
        user: UserId,
        key: CapabilityKey,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let user = UserId::new();
        store.add_user(user, tenant).await;
        Fixture {
            store,
            tenant,
            user,
            key: CapabilityKey::parse("totp").unwrap(),
        }
    }

    async fn seed(
        f: &Fixture,
        system: Option<SystemCapability>,
        assignment: Option<(bool, Option<Value>)>,
        feature: Option<(bool, Option<Value>)>,
        enrolled: Option<bool>,
    ) {
        let mut tx = f.store.begin(TransactionMode::ReadWrite).await.unwrap();
        if let Some(system) = system {
            tx.insert_system_capability(&system).await.unwrap();
        }
        if let Some((enabled, value)) = assignment {
            tx.upsert_tenant_assignment(&TenantCapabilityAssignment {
                tenant_id: f.tenant,
                capability_key: f.key.clone(),
                enabled,
                value,
                configured_by: "test".into(),
                configured_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        if let Some((enabled, configuration)) = feature {
            tx.upsert_tenant_feature(&TenantFeatureEnablement {
                tenant_id: f.tenant,
                capability_key: f.key.clone(),
                enabled,
                configuration,
                enabled_by: "test".into(),
                enabled_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        if let Some(enrolled) = enrolled {
            tx.upsert_user_state(&UserCapabilityState {
                user_id: f.user,
                capability_key: f.key.clone(),
                enrolled,
                state_data: json!({"secret_ref": "vault://u1"}),
                enrolled_at: Utc::now(),
                last_used_at: None,
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();
    }

    async fn eval(f: &Fixture, user: Option<UserId>) -> EvaluationResult {
        let mut tx = f.store.begin(TransactionMode::ReadOnly).await.unwrap();
        evaluate_in(tx.as_mut(), f.tenant, &f.key, user).await.unwrap()
    }

    fn totp() -> SystemCapability {
        SystemCapability::new(CapabilityKey::parse("totp").unwrap(), json!({"digits": 6}), "")
    }

    #[tokio::test]
    async fn test_unknown_capability_is_unsupported() {
        let f = fixture().await;
        let r = eval(&f, None).await;
        assert!(!r.system_supported);
        assert!(!r.effective);
        assert_eq!(r.denial, Some(DenialReason::NotSupported));
        assert_eq!(r.merged_value, json!({}));
    }

    #[tokio::test]
    async fn test_disabled_system_ignores_lower_layers() {
        let f = fixture().await;
        seed(
            &f,
            Some(totp().disabled()),
            Some((true, None)),
            Some((true, Some(json!({"digits": 8})))),
            Some(true),
        )
        .await;

        let r = eval(&f, Some(f.user)).await;
        assert!(!r.system_supported);
        assert!(!r.tenant_allowed && !r.tenant_enabled && !r.user_enrolled);
        assert!(!r.effective);
        assert_eq!(r.merged_value, json!({}));
    }

    #[tokio::test]
    async fn test_orphaned_feature_is_not_reported() {
        let f = fixture().await;
        seed(&f, Some(totp()), Some((false, None)), Some((true, None)), None).await;

        let r = eval(&f, None).await;
        assert!(!r.tenant_allowed);
        assert!(!r.tenant_enabled);
        assert_eq!(r.denial, Some(DenialReason::NotAssigned));
        assert_eq!(r.merged_value, json!({"digits": 6}));
    }

    #[tokio::test]
    async fn test_most_specific_value_wins() {
        let f = fixture().await;
        seed(
            &f,
            Some(totp()),
            Some((true, Some(json!({"digits": 7})))),
            Some((true, None)),
            None,
        )
        .await;

        let r = eval(&f, None).await;
        assert!(r.effective);
        assert_eq!(r.merged_value, json!({"digits": 7}));
        assert_eq!(r.value_source, ValueSource::TenantAssignment);
    }

    #[tokio::test]
    async fn test_null_value_counts_as_absent() {
        let f = fixture().await;
        seed(
            &f,
            Some(totp()),
            Some((true, Some(Value::Null))),
            Some((true, Some(Value::Null))),
            None,
        )
        .await;

        let r = eval(&f, None).await;
        assert_eq!(r.merged_value, json!({"digits": 6}));
        assert_eq!(r.value_source, ValueSource::SystemDefault);
    }

    #[tokio::test]
    async fn test_user_from_other_tenant_is_not_enrolled() {
        let f = fixture().await;
        seed(&f, Some(totp()), Some((true, None)), Some((true, None)), Some(true)).await;

        let stranger = UserId::new();
        f.store.add_user(stranger, TenantId::new()).await;
        let r = eval(&f, Some(stranger)).await;
        assert!(!r.user_enrolled);
        assert_eq!(r.denial, Some(DenialReason::NotEnrolled));

        let r = eval(&f, Some(f.user)).await;
        assert!(r.effective);
        assert!(r.user_state.is_some());
    }

    #[tokio::test]
    async fn test_state_data_is_not_serialized() {
        let f = fixture().await;
        seed(&f, Some(totp()), Some((true, None)), Some((true, None)), Some(true)).await;

        let r = eval(&f, Some(f.user)).await;
        let doc = serde_json::to_string(&r).unwrap();
        assert!(!doc.contains("secret_ref"));
    }

    #[tokio::test]
    async fn test_evaluator_honours_cancellation() {
        let f = fixture().await;
        let evaluator = CapabilityEvaluator::new(Arc::new(f.store.clone()), OperationGuard::default());
        let token = CancellationToken::new();
        token.cancel();
        let err = evaluator.evaluate(&token, f.tenant, &f.key, None).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
    }
}
