//! Read-only entry point for authentication flows.
//!
//! Login, MFA and OAuth flows never mutate policy state. They ask the facade
//! whether a capability is usable (and with which configuration) and whether
//! a user holds a permission.

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::capability::{CapabilityEvaluator, DenialReason, EvaluationResult};
use crate::error::{ErrorCode, ErrorDetails, Result, WardenError};
use crate::rbac::{PermissionChecker, PolicyDecision};
use crate::store::{OperationGuard, Store};
use crate::types::{CapabilityKey, TenantId, UserId};

/// Single read surface over capability evaluation and RBAC checks.
#[derive(Debug, Clone)]
pub struct PolicyFacade {
    evaluator: CapabilityEvaluator,
    permissions: PermissionChecker,
}

impl PolicyFacade {
    pub fn new(store: Arc<dyn Store>, guard: OperationGuard) -> Self {
        Self {
            evaluator: CapabilityEvaluator::new(store.clone(), guard),
            permissions: PermissionChecker::new(store, guard),
        }
    }

    /// Full explainable evaluation.
    pub async fn evaluate(
        &self,
        cancel: &CancellationToken,
        tenant_id: TenantId,
        key: &CapabilityKey,
        user_id: Option<UserId>,
    ) -> Result<EvaluationResult> {
        self.evaluator.evaluate(cancel, tenant_id, key, user_id).await
    }

    /// The merged configuration when the capability is usable, otherwise a
    /// `CapabilityUnavailable` error naming the capability and the denying
    /// layer.
    pub async fn require_capability(
        &self,
        cancel: &CancellationToken,
        tenant_id: TenantId,
        key: &CapabilityKey,
        user_id: Option<UserId>,
    ) -> Result<Value> {
        let result = self.evaluate(cancel, tenant_id, key, user_id).await?;
        match result.denial {
            None => Ok(result.merged_value),
            Some(reason) => Err(capability_unavailable(key, tenant_id, reason)),
        }
    }

    pub async fn check_permission(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
        tenant_id: TenantId,
        permission: &str,
    ) -> Result<PolicyDecision> {
        self.permissions.check(cancel, user_id, tenant_id, permission).await
    }

    /// `PermissionDenied` unless the user holds `permission` in the tenant.
    pub async fn enforce_permission(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
        tenant_id: TenantId,
        permission: &str,
    ) -> Result<()> {
        self.permissions.enforce(cancel, user_id, tenant_id, permission).await
    }
}

fn capability_unavailable(key: &CapabilityKey, tenant_id: TenantId, reason: DenialReason) -> WardenError {
    debug!(capability = %key, tenant_id = %tenant_id, reason = %reason, "Capability unavailable");
    WardenError::new(
        ErrorCode::CapabilityUnavailable,
        format!("capability '{}' is unavailable: {}", key, reason),
    )
    .with_details(
        ErrorDetails::new()
            .with_entity("capability", key.as_str())
            .with_context("reason", reason)
            .with_context("tenant_id", tenant_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_unknown_capability_is_capability_error() {
        let facade = PolicyFacade::new(Arc::new(MemoryStore::new()), OperationGuard::default());
        let key = CapabilityKey::parse("totp").unwrap();
        let err = facade
            .require_capability(&CancellationToken::new(), TenantId::new(), &key, None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CapabilityUnavailable);
        assert_eq!(err.details().entity_id.as_deref(), Some("totp"));
        assert_eq!(
            err.details().context.get("reason"),
            Some(&serde_json::json!("not_supported"))
        );
    }
}
