//! Permission checks for administrative actions.
//!
//! Answers "may user U perform permission P inside tenant T?" from the user's
//! active roles in T plus any platform roles they hold. Names match exactly;
//! there are no wildcard or prefix grants.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, WardenError};
use crate::store::{OperationGuard, Store, Transaction, TransactionMode};
use crate::types::{TenantId, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The action is allowed.
    Allow,
    /// The action is denied, with a reason.
    Deny(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }

    /// `Ok(())` on allow, `PermissionDenied` otherwise.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(WardenError::permission_denied(reason)),
        }
    }
}

/// Every permission name `user_id` holds inside `tenant_id`.
pub(crate) async fn effective_permissions_in(
    tx: &mut dyn Transaction,
    user_id: UserId,
    tenant_id: TenantId,
) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let roles = tx.list_user_roles(user_id).await?;
    for role in roles
        .iter()
        .filter(|r| r.tenant_id.is_none() || r.tenant_id == Some(tenant_id))
    {
        names.extend(
            tx.list_role_permissions(role.id)
                .await?
                .into_iter()
                .map(|p| p.name),
        );
    }
    Ok(names)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Checker
// ═══════════════════════════════════════════════════════════════════════════════

/// Store-backed RBAC permission checks.
#[derive(Clone)]
pub struct PermissionChecker {
    store: Arc<dyn Store>,
    guard: OperationGuard,
}

impl std::fmt::Debug for PermissionChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionChecker")
            .field("store", &self.store.name())
            .finish()
    }
}

impl PermissionChecker {
    pub fn new(store: Arc<dyn Store>, guard: OperationGuard) -> Self {
        Self { store, guard }
    }

    /// Every permission name the user holds inside `tenant_id`.
    pub async fn effective_permissions(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<BTreeSet<String>> {
        self.guard
            .run(cancel, "effective_permissions", self.effective_once(user_id, tenant_id))
            .await
    }

    async fn effective_once(&self, user_id: UserId, tenant_id: TenantId) -> Result<BTreeSet<String>> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;
        effective_permissions_in(tx.as_mut(), user_id, tenant_id).await
    }

    /// Check a single permission.
    pub async fn check(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
        tenant_id: TenantId,
        permission: &str,
    ) -> Result<PolicyDecision> {
        self.check_all(cancel, user_id, tenant_id, &[permission]).await
    }

    /// Convenience: `Ok(())` if allowed, `PermissionDenied` if denied.
    pub async fn enforce(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
        tenant_id: TenantId,
        permission: &str,
    ) -> Result<()> {
        self.check(cancel, user_id, tenant_id, permission)
            .await?
            .into_result()
    }

    /// `Allow` only if ALL permissions are held.
    pub async fn check_all(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
        tenant_id: TenantId,
        permissions: &[&str],
    ) -> Result<PolicyDecision> {
        let held = self.effective_permissions(cancel, user_id, tenant_id).await?;
        for permission in permissions {
            if !held.contains(*permission) {
                debug!(user_id = %user_id, tenant_id = %tenant_id, permission, "Permission denied");
                return Ok(PolicyDecision::Deny(format!(
                    "user {} does not have permission {} in tenant {}",
                    user_id, permission, tenant_id
                )));
            }
        }
        Ok(PolicyDecision::Allow)
    }

    /// `Allow` if ANY permission is held.
    pub async fn check_any(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
        tenant_id: TenantId,
        permissions: &[&str],
    ) -> Result<PolicyDecision> {
        let held = self.effective_permissions(cancel, user_id, tenant_id).await?;
        if permissions.iter().any(|p| held.contains(*p)) {
            return Ok(PolicyDecision::Allow);
        }
        Ok(PolicyDecision::Deny(format!(
            "user {} does not have any of the required permissions in tenant {}",
            user_id, tenant_id
        )))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::rbac::engine::RbacEngine;
    use crate::rbac::models::NewPermission;
    use crate::store::MemoryStore;
    use crate::types::Actor;

    struct Fixture {
        checker: PermissionChecker,
        tenant: TenantId,
        user: UserId,
    }

    async fn setup() -> Fixture {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let user = UserId::new();
        store.add_user(user, tenant).await;

        let store: Arc<dyn Store> = Arc::new(store);
        let engine = RbacEngine::new(store.clone(), OperationGuard::default());
        let actor = Actor::tenant_admin("alice", tenant);
        let cancel = CancellationToken::new();

        let role = engine.create_role(&cancel, &actor, tenant, "viewer", "").await.unwrap();
        for name in ["tenant.users.read", "tenant.users.write"] {
            let created = engine
                .create_permission(&cancel, &actor, Some(tenant), NewPermission::new(name, "users", "x"))
                .await
                .unwrap();
            if name.ends_with("read") {
                engine
                    .assign_permission_to_role(&cancel, &actor, role.id, created.permission.id)
                    .await
                    .unwrap();
            }
        }
        engine.assign_role_to_user(&cancel, &actor, user, role.id).await.unwrap();

        Fixture {
            checker: PermissionChecker::new(store, OperationGuard::default()),
            tenant,
            user,
        }
    }

    #[tokio::test]
    async fn test_exact_match_only() {
        let f = setup().await;
        let cancel = CancellationToken::new();

        assert!(f.checker.check(&cancel, f.user, f.tenant, "tenant.users.read").await.unwrap().is_allowed());
        assert!(f.checker.check(&cancel, f.user, f.tenant, "tenant.users.write").await.unwrap().is_denied());
        assert!(f.checker.check(&cancel, f.user, f.tenant, "tenant.users").await.unwrap().is_denied());
        assert!(f.checker.check(&cancel, f.user, f.tenant, "tenant.*").await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn test_roles_do_not_leak_across_tenants() {
        let f = setup().await;
        let decision = f
            .checker
            .check(&CancellationToken::new(), f.user, TenantId::new(), "tenant.users.read")
            .await
            .unwrap();
        assert!(decision.is_denied());
    }

    #[tokio::test]
    async fn test_check_all_and_any() {
        let f = setup().await;
        let cancel = CancellationToken::new();
        let both = ["tenant.users.read", "tenant.users.write"];

        assert!(f.checker.check_all(&cancel, f.user, f.tenant, &both).await.unwrap().is_denied());
        assert!(f.checker.check_any(&cancel, f.user, f.tenant, &both).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_enforce_maps_to_permission_denied() {
        let f = setup().await;
        let err = f
            .checker
            .enforce(&CancellationToken::new(), f.user, f.tenant, "tenant.users.write")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }
}
