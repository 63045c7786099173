//! Transactional RBAC mutations guarded by the safety invariants.
//!
//! Every operation runs in a single read-write transaction, except
//! best-effort permission creation, which commits the permission first and
//! then attaches it to `tenant_owner` in a second transaction.
//!
//! Invariants enforced here:
//! - a tenant never loses its last `tenant_owner` holder
//! - system roles are never created, renamed, re-described or deleted
//! - tenant callers only mint permissions in tenant-safe namespaces
//! - every tenant permission ends up granted to `tenant_owner`
//! - grants are explicit rows; nothing is matched by pattern

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::models::{NewPermission, Permission, Role, RolePermission, UserRole, TENANT_OWNER_ROLE};
use super::namespace::NamespacePolicy;
use super::roles::PredefinedRole;
use crate::error::{ErrorCode, Result, WardenError};
use crate::store::{OperationGuard, Store, Transaction, TransactionMode};
use crate::telemetry::PolicyMetrics;
use crate::types::{Actor, PermissionId, RoleId, TenantId, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════════════════════════

/// How a new tenant permission reaches `tenant_owner`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoAttachMode {
    /// Commit the permission, then attach in a second transaction. An attach
    /// failure is reported as an [`AttachWarning`]; the permission stays.
    #[default]
    BestEffort,
    /// Create and attach in one transaction; any failure rolls back both.
    Atomic,
}

/// The attach step failed after the permission was committed.
///
/// Re-running [`RbacEngine::attach_all_permissions_to_tenant_owner`] repairs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachWarning {
    pub tenant_id: TenantId,
    pub permission_id: PermissionId,
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for AttachWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "permission {} was not attached to {} of tenant {}: [{}] {}",
            self.permission_id, TENANT_OWNER_ROLE, self.tenant_id, self.code, self.message
        )
    }
}

/// Outcome of [`RbacEngine::create_permission`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCreated {
    pub permission: Permission,
    pub attach_warning: Option<AttachWarning>,
}

/// Outcome of an owner attach pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachReport {
    pub tenant_id: TenantId,
    /// None when the tenant has not been initialized yet.
    pub owner_role: Option<RoleId>,
    pub permissions: usize,
    pub newly_attached: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transaction-level helpers
// ═══════════════════════════════════════════════════════════════════════════════

fn required(value: &str, field: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(WardenError::missing_field(field));
    }
    Ok(())
}

fn ensure_mutable(role: &Role) -> Result<()> {
    if role.is_system {
        return Err(WardenError::invariant(
            ErrorCode::SystemRoleImmutable,
            format!("role '{}' is a system role and cannot be modified", role.name),
        )
        .with_context("role_id", role.id));
    }
    Ok(())
}

fn ensure_not_reserved_name(name: &str) -> Result<()> {
    if PredefinedRole::all().iter().any(|r| r.name() == name) {
        return Err(WardenError::invariant(
            ErrorCode::SystemRoleImmutable,
            format!("role name '{}' is reserved for system roles", name),
        ));
    }
    Ok(())
}

async fn active_role(tx: &mut dyn Transaction, role_id: RoleId) -> Result<Role> {
    tx.get_role(role_id)
        .await?
        .filter(Role::is_active)
        .ok_or_else(|| WardenError::role_not_found(role_id))
}

/// Like [`active_role`], but holds the role row lock until the transaction
/// ends, so a concurrent delete cannot cascade past rows written here.
async fn lock_active_role(tx: &mut dyn Transaction, role_id: RoleId) -> Result<Role> {
    tx.lock_role(role_id)
        .await?
        .filter(Role::is_active)
        .ok_or_else(|| WardenError::role_not_found(role_id))
}

async fn existing_permission(tx: &mut dyn Transaction, permission_id: PermissionId) -> Result<Permission> {
    tx.get_permission(permission_id)
        .await?
        .ok_or_else(|| WardenError::permission_not_found(permission_id))
}

async fn ensure_unique_role_name(tx: &mut dyn Transaction, tenant_id: Option<TenantId>, name: &str) -> Result<()> {
    if tx.find_role_by_name(tenant_id, name).await?.is_some() {
        return Err(WardenError::duplicate("role", name));
    }
    Ok(())
}

/// Grant every permission of `tenant_id` to its `tenant_owner` role.
pub(crate) async fn attach_owner_permissions_in(
    tx: &mut dyn Transaction,
    tenant_id: TenantId,
) -> Result<AttachReport> {
    let mut report = AttachReport {
        tenant_id,
        owner_role: None,
        permissions: 0,
        newly_attached: 0,
    };

    let Some(owner) = tx.find_role_by_name(Some(tenant_id), TENANT_OWNER_ROLE).await? else {
        debug!(tenant_id = %tenant_id, "Tenant has no owner role yet; nothing to attach");
        return Ok(report);
    };
    report.owner_role = Some(owner.id);

    for permission in tx.list_permissions(Some(tenant_id)).await? {
        report.permissions += 1;
        if tx
            .insert_role_permission(&RolePermission::new(owner.id, permission.id))
            .await?
        {
            report.newly_attached += 1;
        }
    }
    Ok(report)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// Invariant-checked role and permission management.
#[derive(Clone)]
pub struct RbacEngine {
    store: Arc<dyn Store>,
    guard: OperationGuard,
    namespaces: NamespacePolicy,
    auto_attach: AutoAttachMode,
}

impl fmt::Debug for RbacEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RbacEngine")
            .field("store", &self.store.name())
            .field("auto_attach", &self.auto_attach)
            .finish()
    }
}

impl RbacEngine {
    pub fn new(store: Arc<dyn Store>, guard: OperationGuard) -> Self {
        Self {
            store,
            guard,
            namespaces: NamespacePolicy::default(),
            auto_attach: AutoAttachMode::default(),
        }
    }

    pub fn with_namespaces(mut self, namespaces: NamespacePolicy) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_auto_attach(mut self, mode: AutoAttachMode) -> Self {
        self.auto_attach = mode;
        self
    }

    pub fn auto_attach(&self) -> AutoAttachMode {
        self.auto_attach
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a tenant-defined (never system) role.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, role = %name, actor = %actor.id))]
    pub async fn create_role(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        tenant_id: TenantId,
        name: &str,
        description: &str,
    ) -> Result<Role> {
        actor.ensure_can_act_on(Some(tenant_id))?;
        required(name, "role_name")?;
        ensure_not_reserved_name(name)?;

        let role = Role::new(Some(tenant_id), name, description);
        self.guard
            .run(cancel, "create_role", self.create_role_once(role))
            .await
    }

    async fn create_role_once(&self, role: Role) -> Result<Role> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        if let Some(tenant_id) = role.tenant_id {
            if !tx.tenant_exists(tenant_id).await? {
                return Err(WardenError::tenant_not_found(tenant_id));
            }
        }
        ensure_unique_role_name(tx.as_mut(), role.tenant_id, &role.name).await?;
        tx.insert_role(&role).await?;
        tx.commit().await?;
        info!(role_id = %role.id, "Role created");
        Ok(role)
    }

    /// Rename and/or re-describe a non-system role.
    #[instrument(skip_all, fields(role_id = %role_id, actor = %actor.id))]
    pub async fn update_role(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        role_id: RoleId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Role> {
        if let Some(name) = name {
            required(name, "role_name")?;
            ensure_not_reserved_name(name)?;
        }
        self.guard
            .run(cancel, "update_role", self.update_role_once(actor, role_id, name, description))
            .await
    }

    async fn update_role_once(
        &self,
        actor: &Actor,
        role_id: RoleId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Role> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let mut role = lock_active_role(tx.as_mut(), role_id).await?;
        actor.ensure_can_act_on(role.tenant_id)?;
        ensure_mutable(&role)?;

        if let Some(name) = name.filter(|n| *n != role.name) {
            ensure_unique_role_name(tx.as_mut(), role.tenant_id, name).await?;
            role.name = name.to_string();
        }
        if let Some(description) = description {
            role.description = description.to_string();
        }
        role.updated_at = chrono::Utc::now();

        tx.update_role(&role).await?;
        tx.commit().await?;
        info!(role = %role.name, "Role updated");
        Ok(role)
    }

    /// Soft-delete a non-system role and drop its grants and assignments.
    #[instrument(skip_all, fields(role_id = %role_id, actor = %actor.id))]
    pub async fn delete_role(&self, cancel: &CancellationToken, actor: &Actor, role_id: RoleId) -> Result<Role> {
        self.guard
            .run(cancel, "delete_role", self.delete_role_once(actor, role_id))
            .await
    }

    async fn delete_role_once(&self, actor: &Actor, role_id: RoleId) -> Result<Role> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let mut role = lock_active_role(tx.as_mut(), role_id).await?;
        actor.ensure_can_act_on(role.tenant_id)?;
        ensure_mutable(&role)?;

        let grants = tx.delete_role_permissions_for_role(role_id).await?;
        let holders = tx.delete_user_roles_for_role(role_id).await?;
        role.mark_deleted();
        tx.update_role(&role).await?;
        tx.commit().await?;

        info!(role = %role.name, grants, holders, "Role deleted");
        Ok(role)
    }

    /// Fetch a role in any status.
    pub async fn get_role(&self, cancel: &CancellationToken, role_id: RoleId) -> Result<Role> {
        self.guard
            .run(cancel, "get_role", self.get_role_once(role_id))
            .await
    }

    async fn get_role_once(&self, role_id: RoleId) -> Result<Role> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;
        tx.get_role(role_id)
            .await?
            .ok_or_else(|| WardenError::role_not_found(role_id))
    }

    /// Active roles of a tenant, or platform roles for `None`.
    pub async fn list_roles(&self, cancel: &CancellationToken, tenant_id: Option<TenantId>) -> Result<Vec<Role>> {
        self.guard
            .run(cancel, "list_roles", self.list_roles_once(tenant_id))
            .await
    }

    async fn list_roles_once(&self, tenant_id: Option<TenantId>) -> Result<Vec<Role>> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;
        tx.list_roles(tenant_id).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a permission and attach it to the tenant's owner role.
    ///
    /// Global permissions (`tenant_id = None`) require system scope and are
    /// not auto-attached anywhere.
    #[instrument(skip_all, fields(permission = %spec.name, actor = %actor.id))]
    pub async fn create_permission(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        tenant_id: Option<TenantId>,
        spec: NewPermission,
    ) -> Result<PermissionCreated> {
        self.namespaces.validate(&spec.name, &actor.scope)?;
        actor.ensure_can_act_on(tenant_id)?;
        required(&spec.resource, "resource")?;
        required(&spec.action, "action")?;

        let permission = Permission::new(tenant_id, spec);
        let Some(tenant_id) = tenant_id else {
            let permission = self
                .guard
                .run(cancel, "create_permission", self.insert_permission_once(permission, false))
                .await?;
            return Ok(PermissionCreated {
                permission,
                attach_warning: None,
            });
        };

        match self.auto_attach {
            AutoAttachMode::Atomic => {
                let permission = self
                    .guard
                    .run(cancel, "create_permission", self.insert_permission_once(permission, true))
                    .await?;
                Ok(PermissionCreated {
                    permission,
                    attach_warning: None,
                })
            }
            AutoAttachMode::BestEffort => {
                let permission = self
                    .guard
                    .run(cancel, "create_permission", self.insert_permission_once(permission, false))
                    .await?;

                let attach_warning = match self
                    .guard
                    .run(cancel, "attach_permissions", self.attach_once(tenant_id))
                    .await
                {
                    Ok(_) => None,
                    Err(e) => {
                        PolicyMetrics::auto_attach_warning();
                        warn!(
                            tenant_id = %tenant_id,
                            permission_id = %permission.id,
                            error_code = %e.code(),
                            "Permission created but not attached to tenant owner"
                        );
                        Some(AttachWarning {
                            tenant_id,
                            permission_id: permission.id,
                            code: e.code(),
                            message: e.user_message().to_string(),
                        })
                    }
                };
                Ok(PermissionCreated {
                    permission,
                    attach_warning,
                })
            }
        }
    }

    async fn insert_permission_once(&self, permission: Permission, attach: bool) -> Result<Permission> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        if let Some(tenant_id) = permission.tenant_id {
            if !tx.tenant_exists(tenant_id).await? {
                return Err(WardenError::tenant_not_found(tenant_id));
            }
        }
        if tx
            .find_permission_by_name(permission.tenant_id, &permission.name)
            .await?
            .is_some()
        {
            return Err(WardenError::duplicate("permission", &permission.name));
        }
        tx.insert_permission(&permission).await?;

        if let (true, Some(tenant_id)) = (attach, permission.tenant_id) {
            attach_owner_permissions_in(tx.as_mut(), tenant_id).await?;
        }
        tx.commit().await?;
        info!(permission_id = %permission.id, "Permission created");
        Ok(permission)
    }

    /// Idempotently grant every tenant permission to `tenant_owner`.
    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn attach_all_permissions_to_tenant_owner(
        &self,
        cancel: &CancellationToken,
        tenant_id: TenantId,
    ) -> Result<AttachReport> {
        self.guard
            .run(cancel, "attach_permissions", self.attach_once(tenant_id))
            .await
    }

    async fn attach_once(&self, tenant_id: TenantId) -> Result<AttachReport> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let report = attach_owner_permissions_in(tx.as_mut(), tenant_id).await?;
        tx.commit().await?;
        debug!(
            permissions = report.permissions,
            newly_attached = report.newly_attached,
            "Owner permissions attached"
        );
        Ok(report)
    }

    /// Hard-delete a permission together with its grants.
    #[instrument(skip_all, fields(permission_id = %permission_id, actor = %actor.id))]
    pub async fn delete_permission(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        permission_id: PermissionId,
    ) -> Result<Permission> {
        self.guard
            .run(cancel, "delete_permission", self.delete_permission_once(actor, permission_id))
            .await
    }

    async fn delete_permission_once(&self, actor: &Actor, permission_id: PermissionId) -> Result<Permission> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let permission = existing_permission(tx.as_mut(), permission_id).await?;
        actor.ensure_can_act_on(permission.tenant_id)?;

        let grants = tx.delete_role_permissions_for_permission(permission_id).await?;
        tx.delete_permission(permission_id).await?;
        tx.commit().await?;
        info!(permission = %permission.name, grants, "Permission deleted");
        Ok(permission)
    }

    /// Permissions owned by a tenant, or global permissions for `None`.
    pub async fn list_permissions(
        &self,
        cancel: &CancellationToken,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<Permission>> {
        self.guard
            .run(cancel, "list_permissions", self.list_permissions_once(tenant_id))
            .await
    }

    async fn list_permissions_once(&self, tenant_id: Option<TenantId>) -> Result<Vec<Permission>> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;
        tx.list_permissions(tenant_id).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role <-> permission
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant a permission to a role. Returns false if already granted.
    #[instrument(skip_all, fields(role_id = %role_id, permission_id = %permission_id, actor = %actor.id))]
    pub async fn assign_permission_to_role(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> Result<bool> {
        self.guard
            .run(
                cancel,
                "assign_permission_to_role",
                self.grant_once(actor, role_id, permission_id),
            )
            .await
    }

    async fn grant_once(&self, actor: &Actor, role_id: RoleId, permission_id: PermissionId) -> Result<bool> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let role = lock_active_role(tx.as_mut(), role_id).await?;
        let permission = existing_permission(tx.as_mut(), permission_id).await?;
        actor.ensure_can_act_on(role.tenant_id)?;

        if permission.tenant_id != role.tenant_id {
            return Err(WardenError::invariant(
                ErrorCode::CrossTenantAssignment,
                format!(
                    "permission '{}' does not belong to the scope of role '{}'",
                    permission.name, role.name
                ),
            ));
        }

        let granted = tx
            .insert_role_permission(&RolePermission::new(role_id, permission_id))
            .await?;
        tx.commit().await?;
        info!(role = %role.name, permission = %permission.name, granted, "Permission granted to role");
        Ok(granted)
    }

    /// Revoke a permission from a role. Returns false if it was not granted.
    ///
    /// Grants on `tenant_owner` cannot be revoked.
    #[instrument(skip_all, fields(role_id = %role_id, permission_id = %permission_id, actor = %actor.id))]
    pub async fn remove_permission_from_role(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> Result<bool> {
        self.guard
            .run(
                cancel,
                "remove_permission_from_role",
                self.revoke_grant_once(actor, role_id, permission_id),
            )
            .await
    }

    async fn revoke_grant_once(&self, actor: &Actor, role_id: RoleId, permission_id: PermissionId) -> Result<bool> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let role = lock_active_role(tx.as_mut(), role_id).await?;
        let permission = existing_permission(tx.as_mut(), permission_id).await?;
        actor.ensure_can_act_on(role.tenant_id)?;

        if role.is_tenant_owner() {
            return Err(WardenError::invariant(
                ErrorCode::SystemRoleImmutable,
                "permissions cannot be revoked from tenant_owner",
            )
            .with_context("role_id", role_id));
        }

        let removed = tx.delete_role_permission(role_id, permission_id).await?;
        tx.commit().await?;
        info!(role = %role.name, permission = %permission.name, removed, "Permission revoked from role");
        Ok(removed)
    }

    /// Permissions granted to a role.
    pub async fn list_role_permissions(&self, cancel: &CancellationToken, role_id: RoleId) -> Result<Vec<Permission>> {
        self.guard
            .run(cancel, "list_role_permissions", self.list_grants_once(role_id))
            .await
    }

    async fn list_grants_once(&self, role_id: RoleId) -> Result<Vec<Permission>> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;
        active_role(tx.as_mut(), role_id).await?;
        tx.list_role_permissions(role_id).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // User <-> role
    // ─────────────────────────────────────────────────────────────────────────

    /// Give a user a role. Returns false if the user already held it.
    #[instrument(skip_all, fields(user_id = %user_id, role_id = %role_id, actor = %actor.id))]
    pub async fn assign_role_to_user(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool> {
        self.guard
            .run(cancel, "assign_role_to_user", self.assign_role_once(actor, user_id, role_id))
            .await
    }

    async fn assign_role_once(&self, actor: &Actor, user_id: UserId, role_id: RoleId) -> Result<bool> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let role = lock_active_role(tx.as_mut(), role_id).await?;
        actor.ensure_can_act_on(role.tenant_id)?;

        let user_tenant = tx
            .user_tenant(user_id)
            .await?
            .ok_or_else(|| WardenError::user_not_found(user_id))?;
        if let Some(role_tenant) = role.tenant_id {
            if role_tenant != user_tenant {
                return Err(WardenError::invariant(
                    ErrorCode::CrossTenantAssignment,
                    format!("role '{}' belongs to another tenant", role.name),
                )
                .with_context("user_id", user_id));
            }
        }

        let assigned = tx.insert_user_role(&UserRole::new(user_id, role_id)).await?;
        tx.commit().await?;
        info!(role = %role.name, assigned, "Role assigned to user");
        Ok(assigned)
    }

    /// Take a role away from a user. Returns false if the user did not hold it.
    ///
    /// The tenant's last `tenant_owner` can never be removed. The owner role
    /// row is locked before holders are counted, so two concurrent removals
    /// cannot both observe a second owner.
    #[instrument(skip_all, fields(user_id = %user_id, role_id = %role_id, actor = %actor.id))]
    pub async fn remove_role_from_user(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool> {
        self.guard
            .run(cancel, "remove_role_from_user", self.remove_role_once(actor, user_id, role_id))
            .await
    }

    async fn remove_role_once(&self, actor: &Actor, user_id: UserId, role_id: RoleId) -> Result<bool> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let role = tx
            .lock_role(role_id)
            .await?
            .ok_or_else(|| WardenError::role_not_found(role_id))?;
        actor.ensure_can_act_on(role.tenant_id)?;

        if role.is_tenant_owner() {
            let holders = tx.list_role_holders(role_id).await?;
            if holders.contains(&user_id) && holders.len() <= 1 {
                return Err(WardenError::invariant(
                    ErrorCode::LastTenantOwner,
                    "cannot remove the last tenant_owner of a tenant",
                )
                .with_context("user_id", user_id)
                .with_context("role_id", role_id));
            }
        }

        let removed = tx.delete_user_role(user_id, role_id).await?;
        tx.commit().await?;
        info!(role = %role.name, removed, "Role removed from user");
        Ok(removed)
    }

    /// Active roles held by a user.
    pub async fn list_user_roles(&self, cancel: &CancellationToken, user_id: UserId) -> Result<Vec<Role>> {
        self.guard
            .run(cancel, "list_user_roles", self.list_user_roles_once(user_id))
            .await
    }

    async fn list_user_roles_once(&self, user_id: UserId) -> Result<Vec<Role>> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;
        tx.list_user_roles(user_id).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;

    async fn setup() -> (MemoryStore, RbacEngine, TenantId) {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        store.add_tenant(tenant).await;
        let engine = RbacEngine::new(Arc::new(store.clone()), OperationGuard::default());
        (store, engine, tenant)
    }

    #[tokio::test]
    async fn test_create_role_is_never_system() {
        let (_, engine, tenant) = setup().await;
        let actor = Actor::tenant_admin("alice", tenant);
        let role = engine
            .create_role(&CancellationToken::new(), &actor, tenant, "auditor", "Reads audit data")
            .await
            .unwrap();
        assert!(!role.is_system);
        assert_eq!(role.tenant_id, Some(tenant));
    }

    #[tokio::test]
    async fn test_create_role_rejects_reserved_and_duplicate_names() {
        let (_, engine, tenant) = setup().await;
        let actor = Actor::tenant_admin("alice", tenant);
        let cancel = CancellationToken::new();

        let err = engine
            .create_role(&cancel, &actor, tenant, TENANT_OWNER_ROLE, "")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SystemRoleImmutable);

        engine.create_role(&cancel, &actor, tenant, "auditor", "").await.unwrap();
        let err = engine
            .create_role(&cancel, &actor, tenant, "auditor", "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.code(), ErrorCode::DuplicateRecord);
    }

    #[tokio::test]
    async fn test_create_role_in_other_tenant_is_denied() {
        let (_, engine, tenant) = setup().await;
        let actor = Actor::tenant_admin("mallory", TenantId::new());
        let err = engine
            .create_role(&CancellationToken::new(), &actor, tenant, "auditor", "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_update_and_delete_role() {
        let (store, engine, tenant) = setup().await;
        let actor = Actor::tenant_admin("alice", tenant);
        let cancel = CancellationToken::new();
        let user = UserId::new();
        store.add_user(user, tenant).await;

        let role = engine.create_role(&cancel, &actor, tenant, "auditor", "").await.unwrap();
        let updated = engine
            .update_role(&cancel, &actor, role.id, Some("reviewer"), Some("Reviews things"))
            .await
            .unwrap();
        assert_eq!(updated.name, "reviewer");
        assert_eq!(updated.description, "Reviews things");

        engine.assign_role_to_user(&cancel, &actor, user, role.id).await.unwrap();
        let deleted = engine.delete_role(&cancel, &actor, role.id).await.unwrap();
        assert!(!deleted.is_active());
        assert!(store.user_role_rows().await.is_empty());
        assert!(engine.list_roles(&cancel, Some(tenant)).await.unwrap().is_empty());

        // Deleted is terminal.
        let err = engine.delete_role(&cancel, &actor, role.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_assign_role_across_tenants_is_rejected() {
        let (store, engine, tenant) = setup().await;
        let cancel = CancellationToken::new();
        let outsider = UserId::new();
        store.add_user(outsider, TenantId::new()).await;

        let role = engine
            .create_role(&cancel, &Actor::system("ops"), tenant, "auditor", "")
            .await
            .unwrap();
        let err = engine
            .assign_role_to_user(&cancel, &Actor::system("ops"), outsider, role.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CrossTenantAssignment);
    }

    #[tokio::test]
    async fn test_assign_role_is_idempotent() {
        let (store, engine, tenant) = setup().await;
        let actor = Actor::tenant_admin("alice", tenant);
        let cancel = CancellationToken::new();
        let user = UserId::new();
        store.add_user(user, tenant).await;

        let role = engine.create_role(&cancel, &actor, tenant, "auditor", "").await.unwrap();
        assert!(engine.assign_role_to_user(&cancel, &actor, user, role.id).await.unwrap());
        assert!(!engine.assign_role_to_user(&cancel, &actor, user, role.id).await.unwrap());
        assert_eq!(store.user_role_rows().await.len(), 1);

        assert!(engine.remove_role_from_user(&cancel, &actor, user, role.id).await.unwrap());
        assert!(!engine.remove_role_from_user(&cancel, &actor, user, role.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_system_permission_needs_system_scope() {
        let (_, engine, tenant) = setup().await;
        let cancel = CancellationToken::new();

        let err = engine
            .create_permission(
                &cancel,
                &Actor::tenant_admin("alice", tenant),
                Some(tenant),
                NewPermission::new("system.audit.purge", "audit", "purge"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidNamespace);

        let created = engine
            .create_permission(
                &cancel,
                &Actor::system("ops"),
                None,
                NewPermission::new("system.audit.purge", "audit", "purge"),
            )
            .await
            .unwrap();
        assert_eq!(created.permission.tenant_id, None);
        assert!(created.attach_warning.is_none());
    }

    #[tokio::test]
    async fn test_grant_across_scopes_is_rejected() {
        let (_, engine, tenant) = setup().await;
        let cancel = CancellationToken::new();
        let system = Actor::system("ops");

        let role = engine.create_role(&cancel, &system, tenant, "auditor", "").await.unwrap();
        let global = engine
            .create_permission(&cancel, &system, None, NewPermission::new("platform.x.read", "x", "read"))
            .await
            .unwrap();

        let err = engine
            .assign_permission_to_role(&cancel, &system, role.id, global.permission.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CrossTenantAssignment);
    }

    #[tokio::test]
    async fn test_delete_permission_cascades_grants() {
        let (store, engine, tenant) = setup().await;
        let cancel = CancellationToken::new();
        let actor = Actor::tenant_admin("alice", tenant);

        let role = engine.create_role(&cancel, &actor, tenant, "auditor", "").await.unwrap();
        let created = engine
            .create_permission(&cancel, &actor, Some(tenant), NewPermission::new("app.reports.read", "reports", "read"))
            .await
            .unwrap();
        assert!(engine
            .assign_permission_to_role(&cancel, &actor, role.id, created.permission.id)
            .await
            .unwrap());
        assert_eq!(store.role_permission_rows().await.len(), 1);

        engine.delete_permission(&cancel, &actor, created.permission.id).await.unwrap();
        assert!(store.role_permission_rows().await.is_empty());
        assert!(engine.list_role_permissions(&cancel, role.id).await.unwrap().is_empty());
    }
}
