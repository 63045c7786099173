//! PostgreSQL implementation of the repository traits.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction as SqlxTransaction};
use uuid::Uuid;

use super::rows::{
    convert, AssignmentRow, FeatureRow, PermissionRow, RoleRow, SystemCapabilityRow, UserStateRow,
};
use crate::capability::models::{
    SystemCapability, TenantCapabilityAssignment, TenantFeatureEnablement, UserCapabilityState,
};
use crate::error::{Result, WardenError};
use crate::rbac::models::{Permission, Role, RolePermission, UserRole};
use crate::store::{CapabilityRepository, DirectoryRepository, RbacRepository, Transaction, TransactionMode};
use crate::types::{CapabilityKey, PermissionId, RoleId, TenantId, UserId};

const SYSTEM_CAPABILITY_COLUMNS: &str =
    "capability_key, enabled, default_value, description, created_at, updated_at";
const ASSIGNMENT_COLUMNS: &str = "tenant_id, capability_key, enabled, value, configured_by, configured_at";
const FEATURE_COLUMNS: &str = "tenant_id, capability_key, enabled, configuration, enabled_by, enabled_at";
const USER_STATE_COLUMNS: &str = "user_id, capability_key, enrolled, state_data, enrolled_at, last_used_at";
const ROLE_COLUMNS: &str =
    "id, tenant_id, name, description, is_system, status, created_at, updated_at, deleted_at";
const PERMISSION_COLUMNS: &str = "id, tenant_id, name, resource, action, description, created_at";

/// One PostgreSQL transaction. Dropping it without `commit` rolls back.
pub struct PgTransaction {
    tx: SqlxTransaction<'static, Postgres>,
    mode: TransactionMode,
}

impl PgTransaction {
    pub(super) fn new(tx: SqlxTransaction<'static, Postgres>, mode: TransactionMode) -> Self {
        Self { tx, mode }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(WardenError::internal("write attempted in a read-only transaction"));
        }
        Ok(())
    }

    /// Row-lock suffix for single-row layer reads. Read-write transactions
    /// share-lock the row so a concurrent revoke, disable or registry update
    /// waits until this transaction ends. Postgres rejects row locks in
    /// read-only transactions.
    fn share_lock(&self) -> &'static str {
        match self.mode {
            TransactionMode::ReadWrite => " FOR SHARE",
            TransactionMode::ReadOnly => "",
        }
    }
}

fn tenant_uuid(tenant_id: Option<TenantId>) -> Option<Uuid> {
    tenant_id.map(|t| t.0)
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Capability layers
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl CapabilityRepository for PgTransaction {
    async fn get_system_capability(&mut self, key: &CapabilityKey) -> Result<Option<SystemCapability>> {
        let row = sqlx::query_as::<_, SystemCapabilityRow>(&format!(
            "SELECT {SYSTEM_CAPABILITY_COLUMNS} FROM system_capabilities WHERE capability_key = $1{}",
            self.share_lock()
        ))
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(SystemCapability::try_from).transpose()
    }

    async fn lock_system_capability(&mut self, key: &CapabilityKey) -> Result<Option<SystemCapability>> {
        self.ensure_writable()?;
        let row = sqlx::query_as::<_, SystemCapabilityRow>(&format!(
            "SELECT {SYSTEM_CAPABILITY_COLUMNS} FROM system_capabilities WHERE capability_key = $1 FOR UPDATE"
        ))
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(SystemCapability::try_from).transpose()
    }

    async fn list_system_capabilities(&mut self) -> Result<Vec<SystemCapability>> {
        let rows = sqlx::query_as::<_, SystemCapabilityRow>(&format!(
            "SELECT {SYSTEM_CAPABILITY_COLUMNS} FROM system_capabilities ORDER BY capability_key"
        ))
        .fetch_all(&mut *self.tx)
        .await?;

        convert(rows)
    }

    async fn insert_system_capability(&mut self, capability: &SystemCapability) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(
            r#"
            INSERT INTO system_capabilities
                (capability_key, enabled, default_value, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(capability.capability_key.as_str())
        .bind(capability.enabled)
        .bind(&capability.default_value)
        .bind(&capability.description)
        .bind(capability.created_at)
        .bind(capability.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_system_capability(&mut self, capability: &SystemCapability) -> Result<bool> {
        self.ensure_writable()?;
        let result = sqlx::query(
            r#"
            UPDATE system_capabilities
            SET enabled = $2, default_value = $3, description = $4, updated_at = $5
            WHERE capability_key = $1
            "#,
        )
        .bind(capability.capability_key.as_str())
        .bind(capability.enabled)
        .bind(&capability.default_value)
        .bind(&capability.description)
        .bind(capability.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_tenant_assignment(
        &mut self,
        tenant_id: TenantId,
        key: &CapabilityKey,
    ) -> Result<Option<TenantCapabilityAssignment>> {
        let row = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM tenant_capability_assignments
             WHERE tenant_id = $1 AND capability_key = $2{}",
            self.share_lock()
        ))
        .bind(tenant_id.0)
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TenantCapabilityAssignment::try_from).transpose()
    }

    async fn list_tenant_assignments(&mut self, tenant_id: TenantId) -> Result<Vec<TenantCapabilityAssignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM tenant_capability_assignments
             WHERE tenant_id = $1 ORDER BY capability_key"
        ))
        .bind(tenant_id.0)
        .fetch_all(&mut *self.tx)
        .await?;

        convert(rows)
    }

    async fn upsert_tenant_assignment(&mut self, assignment: &TenantCapabilityAssignment) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(
            r#"
            INSERT INTO tenant_capability_assignments
                (tenant_id, capability_key, enabled, value, configured_by, configured_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, capability_key) DO UPDATE
            SET enabled = EXCLUDED.enabled,
                value = EXCLUDED.value,
                configured_by = EXCLUDED.configured_by,
                configured_at = EXCLUDED.configured_at
            "#,
        )
        .bind(assignment.tenant_id.0)
        .bind(assignment.capability_key.as_str())
        .bind(assignment.enabled)
        .bind(&assignment.value)
        .bind(&assignment.configured_by)
        .bind(assignment.configured_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_tenant_assignment(&mut self, tenant_id: TenantId, key: &CapabilityKey) -> Result<bool> {
        self.ensure_writable()?;
        let result = sqlx::query(
            "DELETE FROM tenant_capability_assignments WHERE tenant_id = $1 AND capability_key = $2",
        )
        .bind(tenant_id.0)
        .bind(key.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_tenant_feature(
        &mut self,
        tenant_id: TenantId,
        key: &CapabilityKey,
    ) -> Result<Option<TenantFeatureEnablement>> {
        let row = sqlx::query_as::<_, FeatureRow>(&format!(
            "SELECT {FEATURE_COLUMNS} FROM tenant_feature_enablements
             WHERE tenant_id = $1 AND capability_key = $2{}",
            self.share_lock()
        ))
        .bind(tenant_id.0)
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TenantFeatureEnablement::try_from).transpose()
    }

    async fn list_tenant_features(&mut self, tenant_id: TenantId) -> Result<Vec<TenantFeatureEnablement>> {
        let rows = sqlx::query_as::<_, FeatureRow>(&format!(
            "SELECT {FEATURE_COLUMNS} FROM tenant_feature_enablements
             WHERE tenant_id = $1 ORDER BY capability_key"
        ))
        .bind(tenant_id.0)
        .fetch_all(&mut *self.tx)
        .await?;

        convert(rows)
    }

    async fn upsert_tenant_feature(&mut self, feature: &TenantFeatureEnablement) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(
            r#"
            INSERT INTO tenant_feature_enablements
                (tenant_id, capability_key, enabled, configuration, enabled_by, enabled_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, capability_key) DO UPDATE
            SET enabled = EXCLUDED.enabled,
                configuration = EXCLUDED.configuration,
                enabled_by = EXCLUDED.enabled_by,
                enabled_at = EXCLUDED.enabled_at
            "#,
        )
        .bind(feature.tenant_id.0)
        .bind(feature.capability_key.as_str())
        .bind(feature.enabled)
        .bind(&feature.configuration)
        .bind(&feature.enabled_by)
        .bind(feature.enabled_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_tenant_feature(&mut self, tenant_id: TenantId, key: &CapabilityKey) -> Result<bool> {
        self.ensure_writable()?;
        let result = sqlx::query(
            "DELETE FROM tenant_feature_enablements WHERE tenant_id = $1 AND capability_key = $2",
        )
        .bind(tenant_id.0)
        .bind(key.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_user_state(&mut self, user_id: UserId, key: &CapabilityKey) -> Result<Option<UserCapabilityState>> {
        let row = sqlx::query_as::<_, UserStateRow>(&format!(
            "SELECT {USER_STATE_COLUMNS} FROM user_capability_states
             WHERE user_id = $1 AND capability_key = $2"
        ))
        .bind(user_id.0)
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(UserCapabilityState::try_from).transpose()
    }

    async fn list_user_states(&mut self, user_id: UserId) -> Result<Vec<UserCapabilityState>> {
        let rows = sqlx::query_as::<_, UserStateRow>(&format!(
            "SELECT {USER_STATE_COLUMNS} FROM user_capability_states
             WHERE user_id = $1 ORDER BY capability_key"
        ))
        .bind(user_id.0)
        .fetch_all(&mut *self.tx)
        .await?;

        convert(rows)
    }

    async fn list_tenant_user_states(&mut self, tenant_id: TenantId) -> Result<Vec<UserCapabilityState>> {
        let rows = sqlx::query_as::<_, UserStateRow>(
            r#"
            SELECT s.user_id, s.capability_key, s.enrolled, s.state_data, s.enrolled_at, s.last_used_at
            FROM user_capability_states s
            JOIN users u ON u.id = s.user_id
            WHERE u.tenant_id = $1
            ORDER BY s.user_id, s.capability_key
            "#,
        )
        .bind(tenant_id.0)
        .fetch_all(&mut *self.tx)
        .await?;

        convert(rows)
    }

    async fn upsert_user_state(&mut self, state: &UserCapabilityState) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(
            r#"
            INSERT INTO user_capability_states
                (user_id, capability_key, enrolled, state_data, enrolled_at, last_used_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, capability_key) DO UPDATE
            SET enrolled = EXCLUDED.enrolled,
                state_data = EXCLUDED.state_data,
                enrolled_at = EXCLUDED.enrolled_at,
                last_used_at = EXCLUDED.last_used_at
            "#,
        )
        .bind(state.user_id.0)
        .bind(state.capability_key.as_str())
        .bind(state.enrolled)
        .bind(&state.state_data)
        .bind(state.enrolled_at)
        .bind(state.last_used_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_user_state(&mut self, user_id: UserId, key: &CapabilityKey) -> Result<bool> {
        self.ensure_writable()?;
        let result = sqlx::query(
            "DELETE FROM user_capability_states WHERE user_id = $1 AND capability_key = $2",
        )
        .bind(user_id.0)
        .bind(key.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Directory
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl DirectoryRepository for PgTransaction {
    async fn tenant_exists(&mut self, tenant_id: TenantId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tenants WHERE id = $1)")
            .bind(tenant_id.0)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn user_tenant(&mut self, user_id: UserId) -> Result<Option<TenantId>> {
        let tenant: Option<Uuid> = sqlx::query_scalar("SELECT tenant_id FROM users WHERE id = $1")
            .bind(user_id.0)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(tenant.map(TenantId::from))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RBAC
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl RbacRepository for PgTransaction {
    async fn get_role(&mut self, role_id: RoleId) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(role_id.0)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(Role::try_from).transpose()
    }

    async fn lock_role(&mut self, role_id: RoleId) -> Result<Option<Role>> {
        self.ensure_writable()?;
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1 FOR UPDATE"
        ))
        .bind(role_id.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Role::try_from).transpose()
    }

    async fn find_role_by_name(&mut self, tenant_id: Option<TenantId>, name: &str) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles
             WHERE tenant_id IS NOT DISTINCT FROM $1 AND name = $2 AND status = 'active'"
        ))
        .bind(tenant_uuid(tenant_id))
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Role::try_from).transpose()
    }

    async fn list_roles(&mut self, tenant_id: Option<TenantId>) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles
             WHERE tenant_id IS NOT DISTINCT FROM $1 AND status = 'active'
             ORDER BY name"
        ))
        .bind(tenant_uuid(tenant_id))
        .fetch_all(&mut *self.tx)
        .await?;

        convert(rows)
    }

    async fn insert_role(&mut self, role: &Role) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(
            r#"
            INSERT INTO roles
                (id, tenant_id, name, description, is_system, status, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(role.id.0)
        .bind(tenant_uuid(role.tenant_id))
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_system)
        .bind(role.status.as_str())
        .bind(role.created_at)
        .bind(role.updated_at)
        .bind(role.deleted_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_role(&mut self, role: &Role) -> Result<()> {
        self.ensure_writable()?;
        let result = sqlx::query(
            r#"
            UPDATE roles
            SET name = $2, description = $3, status = $4, updated_at = $5, deleted_at = $6
            WHERE id = $1
            "#,
        )
        .bind(role.id.0)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.status.as_str())
        .bind(role.updated_at)
        .bind(role.deleted_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WardenError::role_not_found(role.id));
        }
        Ok(())
    }

    async fn get_permission(&mut self, permission_id: PermissionId) -> Result<Option<Permission>> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1"
        ))
        .bind(permission_id.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Permission::from))
    }

    async fn find_permission_by_name(
        &mut self,
        tenant_id: Option<TenantId>,
        name: &str,
    ) -> Result<Option<Permission>> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions
             WHERE tenant_id IS NOT DISTINCT FROM $1 AND name = $2"
        ))
        .bind(tenant_uuid(tenant_id))
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Permission::from))
    }

    async fn list_permissions(&mut self, tenant_id: Option<TenantId>) -> Result<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions
             WHERE tenant_id IS NOT DISTINCT FROM $1
             ORDER BY name"
        ))
        .bind(tenant_uuid(tenant_id))
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }

    async fn insert_permission(&mut self, permission: &Permission) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(
            r#"
            INSERT INTO permissions (id, tenant_id, name, resource, action, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(permission.id.0)
        .bind(tenant_uuid(permission.tenant_id))
        .bind(&permission.name)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.description)
        .bind(permission.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_permission(&mut self, permission_id: PermissionId) -> Result<bool> {
        self.ensure_writable()?;
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(permission_id.0)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_role_permission(&mut self, grant: &RolePermission) -> Result<bool> {
        self.ensure_writable()?;
        let result = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id, granted_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(grant.role_id.0)
        .bind(grant.permission_id.0)
        .bind(grant.granted_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_role_permission(&mut self, role_id: RoleId, permission_id: PermissionId) -> Result<bool> {
        self.ensure_writable()?;
        let result = sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
            .bind(role_id.0)
            .bind(permission_id.0)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_role_permissions_for_role(&mut self, role_id: RoleId) -> Result<u64> {
        self.ensure_writable()?;
        let result = sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id.0)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_role_permissions_for_permission(&mut self, permission_id: PermissionId) -> Result<u64> {
        self.ensure_writable()?;
        let result = sqlx::query("DELETE FROM role_permissions WHERE permission_id = $1")
            .bind(permission_id.0)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_role_permissions(&mut self, role_id: RoleId) -> Result<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT p.id, p.tenant_id, p.name, p.resource, p.action, p.description, p.created_at
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = $1
            ORDER BY p.name
            "#,
        )
        .bind(role_id.0)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }

    async fn insert_user_role(&mut self, assignment: &UserRole) -> Result<bool> {
        self.ensure_writable()?;
        let result = sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id, assigned_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, role_id) DO NOTHING
            "#,
        )
        .bind(assignment.user_id.0)
        .bind(assignment.role_id.0)
        .bind(assignment.assigned_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_user_role(&mut self, user_id: UserId, role_id: RoleId) -> Result<bool> {
        self.ensure_writable()?;
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id.0)
            .bind(role_id.0)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_user_roles_for_role(&mut self, role_id: RoleId) -> Result<u64> {
        self.ensure_writable()?;
        let result = sqlx::query("DELETE FROM user_roles WHERE role_id = $1")
            .bind(role_id.0)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_role_holders(&mut self, role_id: RoleId) -> Result<Vec<UserId>> {
        let holders: Vec<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM user_roles WHERE role_id = $1 ORDER BY user_id")
                .bind(role_id.0)
                .fetch_all(&mut *self.tx)
                .await?;

        Ok(holders.into_iter().map(UserId::from).collect())
    }

    async fn list_user_roles(&mut self, user_id: UserId) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT r.id, r.tenant_id, r.name, r.description, r.is_system, r.status,
                   r.created_at, r.updated_at, r.deleted_at
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1 AND r.status = 'active'
            ORDER BY r.name
            "#,
        )
        .bind(user_id.0)
        .fetch_all(&mut *self.tx)
        .await?;

        convert(rows)
    }
}
