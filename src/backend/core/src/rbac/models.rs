//! RBAC data models: Role, Permission and the explicit join records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{PermissionId, RoleId, TenantId, UserId};

/// Name of the per-tenant role that must always have at least one holder.
pub const TENANT_OWNER_ROLE: &str = "tenant_owner";

// ═══════════════════════════════════════════════════════════════════════════════
// Permission
// ═══════════════════════════════════════════════════════════════════════════════

/// A namespaced permission such as `tenant.users.read`.
///
/// Permissions are granted only through explicit [`RolePermission`] rows and
/// matched by exact name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    /// Dot-delimited name, unique within its scope.
    pub name: String,
    /// Owning tenant (None = global/platform permission).
    pub tenant_id: Option<TenantId>,
    /// The resource type (e.g., "users", "roles").
    pub resource: String,
    /// The action (e.g., "read", "write").
    pub action: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    /// Create a new permission.
    pub fn new(tenant_id: Option<TenantId>, spec: NewPermission) -> Self {
        Self {
            id: PermissionId::new(),
            name: spec.name,
            tenant_id,
            resource: spec.resource,
            action: spec.action,
            description: spec.description,
            created_at: Utc::now(),
        }
    }

    /// The namespace prefix (text before the first `.`).
    pub fn namespace(&self) -> &str {
        self.name.split('.').next().unwrap_or_default()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Input for creating a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPermission {
    pub name: String,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub description: String,
}

impl NewPermission {
    pub fn new(
        name: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            action: action.into(),
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle of a role. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleStatus {
    Active,
    Deleted,
}

impl RoleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A named group of permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique role identifier.
    pub id: RoleId,
    /// Owning tenant (None = platform role).
    pub tenant_id: Option<TenantId>,
    /// Human-readable name, unique among active roles of the tenant.
    pub name: String,
    /// Description of the role's purpose.
    pub description: String,
    /// Built-in role created by the initializer. Never mutable.
    pub is_system: bool,
    pub status: RoleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Role {
    /// Create a new, mutable, tenant-defined role.
    pub fn new(
        tenant_id: Option<TenantId>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RoleId::new(),
            tenant_id,
            name: name.into(),
            description: description.into(),
            is_system: false,
            status: RoleStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Mark this as a system role. Only the initializer does this.
    pub(crate) fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == RoleStatus::Active
    }

    /// Whether this is the owner role of some tenant.
    pub fn is_tenant_owner(&self) -> bool {
        self.tenant_id.is_some() && self.name == TENANT_OWNER_ROLE
    }

    /// Transition to the terminal `Deleted` state.
    pub(crate) fn mark_deleted(&mut self) {
        let now = Utc::now();
        self.status = RoleStatus::Deleted;
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Join records
// ═══════════════════════════════════════════════════════════════════════════════

/// Explicit grant of a permission to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    pub granted_at: DateTime<Utc>,
}

impl RolePermission {
    pub fn new(role_id: RoleId, permission_id: PermissionId) -> Self {
        Self {
            role_id,
            permission_id,
            granted_at: Utc::now(),
        }
    }
}

/// Binds a user to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub assigned_at: DateTime<Utc>,
}

impl UserRole {
    pub fn new(user_id: UserId, role_id: RoleId) -> Self {
        Self {
            user_id,
            role_id,
            assigned_at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_namespace() {
        let perm = Permission::new(
            Some(TenantId::new()),
            NewPermission::new("tenant.users.read", "users", "read"),
        );
        assert_eq!(perm.namespace(), "tenant");
        assert_eq!(perm.to_string(), "tenant.users.read");
    }

    #[test]
    fn test_new_role_is_mutable() {
        let role = Role::new(Some(TenantId::new()), "auditor", "Reads audit data");
        assert!(!role.is_system);
        assert!(role.is_active());
        assert!(!role.is_tenant_owner());
    }

    #[test]
    fn test_tenant_owner_detection() {
        let owner = Role::new(Some(TenantId::new()), TENANT_OWNER_ROLE, "").system();
        assert!(owner.is_tenant_owner());

        // A platform role with the same name is not a tenant owner role.
        let platform = Role::new(None, TENANT_OWNER_ROLE, "").system();
        assert!(!platform.is_tenant_owner());
    }

    #[test]
    fn test_mark_deleted_is_terminal_state() {
        let mut role = Role::new(Some(TenantId::new()), "temp", "");
        role.mark_deleted();
        assert_eq!(role.status, RoleStatus::Deleted);
        assert!(role.deleted_at.is_some());
        assert!(!role.is_active());
    }

    #[test]
    fn test_role_status_round_trip() {
        for status in [RoleStatus::Active, RoleStatus::Deleted] {
            assert_eq!(RoleStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RoleStatus::parse("archived"), None);
    }
}
