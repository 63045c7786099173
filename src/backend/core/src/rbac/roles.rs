//! Predefined roles with default permission sets.
//!
//! Every tenant is initialized with three built-in roles and the platform
//! carries one:
//!
//! | Role            | Scope    | Description                                         |
//! |-----------------|----------|-----------------------------------------------------|
//! | tenant_owner    | tenant   | Every tenant permission; at least one holder always |
//! | tenant_admin    | tenant   | Manage users, roles and capabilities                |
//! | tenant_member   | tenant   | Read-only access to the tenant directory            |
//! | platform_admin  | platform | Operate the platform and the capability registry    |
//!
//! All four are system roles and can never be renamed or deleted.

use super::models::{NewPermission, Role, TENANT_OWNER_ROLE};
use crate::types::TenantId;

/// (name, resource, action, description)
type PermissionTemplate = (&'static str, &'static str, &'static str, &'static str);

/// Permissions created in every tenant.
const TENANT_PERMISSIONS: &[PermissionTemplate] = &[
    ("tenant.users.read", "users", "read", "View tenant users"),
    ("tenant.users.write", "users", "write", "Invite, update and remove tenant users"),
    ("tenant.roles.read", "roles", "read", "View tenant roles"),
    ("tenant.roles.write", "roles", "write", "Create, update and delete tenant roles"),
    ("tenant.roles.assign", "roles", "assign", "Grant and revoke tenant roles"),
    ("tenant.capabilities.read", "capabilities", "read", "View enabled capabilities"),
    ("tenant.capabilities.write", "capabilities", "write", "Enable and configure capabilities"),
    ("tenant.settings.write", "settings", "write", "Change tenant settings"),
];

/// Global permissions owned by the platform.
const PLATFORM_PERMISSIONS: &[PermissionTemplate] = &[
    ("platform.tenants.read", "tenants", "read", "View all tenants"),
    ("platform.tenants.write", "tenants", "write", "Create and suspend tenants"),
    ("platform.capabilities.write", "capabilities", "write", "Manage the capability registry and assignments"),
    ("system.roles.write", "roles", "write", "Manage platform roles"),
    ("system.audit.read", "audit", "read", "Read the platform audit trail"),
];

fn build(templates: &[PermissionTemplate]) -> Vec<NewPermission> {
    templates
        .iter()
        .map(|(name, resource, action, description)| {
            NewPermission::new(*name, *resource, *action).describe(*description)
        })
        .collect()
}

/// Every permission created when a tenant is initialized.
pub fn tenant_permissions() -> Vec<NewPermission> {
    build(TENANT_PERMISSIONS)
}

/// Every global permission created by the system bootstrap.
pub fn platform_permissions() -> Vec<NewPermission> {
    build(PLATFORM_PERMISSIONS)
}

/// Predefined role templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredefinedRole {
    TenantOwner,
    TenantAdmin,
    TenantMember,
    PlatformAdmin,
}

impl PredefinedRole {
    /// The stored role name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TenantOwner => TENANT_OWNER_ROLE,
            Self::TenantAdmin => "tenant_admin",
            Self::TenantMember => "tenant_member",
            Self::PlatformAdmin => "platform_admin",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::TenantOwner => "Full control of the tenant",
            Self::TenantAdmin => "Manage users, roles and capabilities",
            Self::TenantMember => "Read-only access to the tenant directory",
            Self::PlatformAdmin => "Operate the platform and the capability registry",
        }
    }

    /// Whether the role lives inside a tenant (as opposed to the platform).
    pub fn is_tenant_role(&self) -> bool {
        !matches!(self, Self::PlatformAdmin)
    }

    /// Names of the permissions granted to this role at initialization.
    ///
    /// The owner additionally receives every later tenant permission through
    /// auto-attach.
    pub fn permission_names(&self) -> Vec<&'static str> {
        let names = |templates: &[PermissionTemplate]| -> Vec<&'static str> {
            templates.iter().map(|(name, ..)| *name).collect()
        };
        match self {
            Self::TenantOwner => names(TENANT_PERMISSIONS),
            Self::TenantAdmin => names(TENANT_PERMISSIONS)
                .into_iter()
                .filter(|n| *n != "tenant.settings.write")
                .collect(),
            Self::TenantMember => vec!["tenant.users.read", "tenant.roles.read", "tenant.capabilities.read"],
            Self::PlatformAdmin => names(PLATFORM_PERMISSIONS),
        }
    }

    /// Build the system `Role` row for `tenant_id` (None for platform roles).
    pub fn to_role(&self, tenant_id: Option<TenantId>) -> Role {
        Role::new(tenant_id, self.name(), self.description()).system()
    }

    /// The roles every tenant starts with.
    pub fn tenant_roles() -> [PredefinedRole; 3] {
        [Self::TenantOwner, Self::TenantAdmin, Self::TenantMember]
    }

    pub fn all() -> [PredefinedRole; 4] {
        [
            Self::TenantOwner,
            Self::TenantAdmin,
            Self::TenantMember,
            Self::PlatformAdmin,
        ]
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::namespace::validate_permission_name;
    use crate::types::CallerScope;

    #[test]
    fn test_tenant_permissions_pass_tenant_namespace_rules() {
        let scope = CallerScope::Tenant(TenantId::new());
        for perm in tenant_permissions() {
            assert!(validate_permission_name(&perm.name, &scope).is_ok(), "{}", perm.name);
        }
    }

    #[test]
    fn test_platform_permissions_are_reserved() {
        let scope = CallerScope::Tenant(TenantId::new());
        for perm in platform_permissions() {
            assert!(validate_permission_name(&perm.name, &scope).is_err(), "{}", perm.name);
            assert!(validate_permission_name(&perm.name, &CallerScope::System).is_ok());
        }
    }

    #[test]
    fn test_role_permissions_exist_in_catalog() {
        let tenant: Vec<String> = tenant_permissions().into_iter().map(|p| p.name).collect();
        let platform: Vec<String> = platform_permissions().into_iter().map(|p| p.name).collect();
        for role in PredefinedRole::all() {
            let catalog = if role.is_tenant_role() { &tenant } else { &platform };
            for name in role.permission_names() {
                assert!(catalog.iter().any(|p| p == name), "{} missing {}", role.name(), name);
            }
        }
    }

    #[test]
    fn test_predefined_roles_are_system_roles() {
        let tenant = TenantId::new();
        let owner = PredefinedRole::TenantOwner.to_role(Some(tenant));
        assert!(owner.is_system);
        assert!(owner.is_tenant_owner());

        let admin = PredefinedRole::PlatformAdmin.to_role(None);
        assert!(admin.is_system);
        assert_eq!(admin.tenant_id, None);
    }

    #[test]
    fn test_admin_cannot_change_settings() {
        let names = PredefinedRole::TenantAdmin.permission_names();
        assert!(names.contains(&"tenant.roles.write"));
        assert!(!names.contains(&"tenant.settings.write"));
    }
}
