//! Internal initializer for the platform and for new tenants.
//!
//! This is the only path that creates system roles. Both entry points are
//! idempotent: re-running them finds the existing rows and changes nothing.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::capability::SystemCapability;
use crate::config::CapabilitySeed;
use crate::error::{ErrorCode, Result, WardenError};
use crate::rbac::engine::attach_owner_permissions_in;
use crate::rbac::roles::{platform_permissions, tenant_permissions};
use crate::rbac::{NewPermission, Permission, PredefinedRole, Role, RolePermission, UserRole};
use crate::store::{OperationGuard, Store, Transaction, TransactionMode};
use crate::types::{CapabilityKey, RoleId, TenantId, UserId};

/// What a bootstrap run created. All zeros on a re-run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub capabilities_registered: usize,
    pub permissions_created: usize,
    pub roles_created: usize,
    pub grants_added: usize,
}

/// Outcome of [`Bootstrapper::initialize_tenant`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantInit {
    pub tenant_id: TenantId,
    pub owner_role: RoleId,
    pub admin_role: RoleId,
    pub member_role: RoleId,
    /// Rows created by this call.
    pub created: BootstrapReport,
    /// Whether the owner assignment was new.
    pub owner_assigned: bool,
}

async fn ensure_role(
    tx: &mut dyn Transaction,
    template: PredefinedRole,
    tenant_id: Option<TenantId>,
    report: &mut BootstrapReport,
) -> Result<Role> {
    if let Some(role) = tx.find_role_by_name(tenant_id, template.name()).await? {
        return Ok(role);
    }
    let role = template.to_role(tenant_id);
    tx.insert_role(&role).await?;
    report.roles_created += 1;
    Ok(role)
}

async fn ensure_permissions(
    tx: &mut dyn Transaction,
    tenant_id: Option<TenantId>,
    catalog: Vec<NewPermission>,
    report: &mut BootstrapReport,
) -> Result<Vec<Permission>> {
    let mut permissions = Vec::with_capacity(catalog.len());
    for spec in catalog {
        let permission = match tx.find_permission_by_name(tenant_id, &spec.name).await? {
            Some(existing) => existing,
            None => {
                let permission = Permission::new(tenant_id, spec);
                tx.insert_permission(&permission).await?;
                report.permissions_created += 1;
                permission
            }
        };
        permissions.push(permission);
    }
    Ok(permissions)
}

async fn grant_template(
    tx: &mut dyn Transaction,
    role: &Role,
    template: PredefinedRole,
    permissions: &[Permission],
    report: &mut BootstrapReport,
) -> Result<()> {
    for name in template.permission_names() {
        let Some(permission) = permissions.iter().find(|p| p.name == name) else {
            return Err(WardenError::internal(format!(
                "role template {} references unknown permission {}",
                template.name(),
                name
            )));
        };
        if tx
            .insert_role_permission(&RolePermission::new(role.id, permission.id))
            .await?
        {
            report.grants_added += 1;
        }
    }
    Ok(())
}

/// Seeds the platform and initializes tenants.
#[derive(Clone)]
pub struct Bootstrapper {
    store: Arc<dyn Store>,
    guard: OperationGuard,
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("store", &self.store.name())
            .finish()
    }
}

impl Bootstrapper {
    pub fn new(store: Arc<dyn Store>, guard: OperationGuard) -> Self {
        Self { store, guard }
    }

    /// Register the seeded capabilities, the platform permissions and the
    /// `platform_admin` role.
    ///
    /// Existing registry entries are left untouched, so operator changes made
    /// after the first run survive restarts.
    #[instrument(skip_all, fields(seeds = seeds.len()))]
    pub async fn bootstrap_system(
        &self,
        cancel: &CancellationToken,
        seeds: &[CapabilitySeed],
    ) -> Result<BootstrapReport> {
        let capabilities = seeds
            .iter()
            .map(|seed| -> Result<SystemCapability> {
                let key = CapabilityKey::parse(seed.key.as_str())?;
                let capability = SystemCapability::new(key, seed.default_value.clone(), seed.description.as_str());
                Ok(if seed.enabled { capability } else { capability.disabled() })
            })
            .collect::<Result<Vec<_>>>()?;

        self.guard
            .run(cancel, "bootstrap_system", self.bootstrap_system_once(capabilities))
            .await
    }

    async fn bootstrap_system_once(&self, capabilities: Vec<SystemCapability>) -> Result<BootstrapReport> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let mut report = BootstrapReport::default();

        for capability in &capabilities {
            if tx.get_system_capability(&capability.capability_key).await?.is_none() {
                tx.insert_system_capability(capability).await?;
                report.capabilities_registered += 1;
            }
        }

        let permissions = ensure_permissions(tx.as_mut(), None, platform_permissions(), &mut report).await?;
        let role = ensure_role(tx.as_mut(), PredefinedRole::PlatformAdmin, None, &mut report).await?;
        grant_template(tx.as_mut(), &role, PredefinedRole::PlatformAdmin, &permissions, &mut report).await?;

        tx.commit().await?;
        info!(
            capabilities = report.capabilities_registered,
            permissions = report.permissions_created,
            roles = report.roles_created,
            grants = report.grants_added,
            "System bootstrap complete"
        );
        Ok(report)
    }

    /// Create the predefined roles and permissions of `tenant_id` and make
    /// `owner` its first `tenant_owner`, all in one transaction.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, owner = %owner))]
    pub async fn initialize_tenant(
        &self,
        cancel: &CancellationToken,
        tenant_id: TenantId,
        owner: UserId,
    ) -> Result<TenantInit> {
        self.guard
            .run(cancel, "initialize_tenant", self.initialize_tenant_once(tenant_id, owner))
            .await
    }

    async fn initialize_tenant_once(&self, tenant_id: TenantId, owner: UserId) -> Result<TenantInit> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        if !tx.tenant_exists(tenant_id).await? {
            return Err(WardenError::tenant_not_found(tenant_id));
        }
        match tx.user_tenant(owner).await? {
            None => return Err(WardenError::user_not_found(owner)),
            Some(home) if home != tenant_id => {
                return Err(WardenError::invariant(
                    ErrorCode::CrossTenantAssignment,
                    "tenant owner must be a user of the tenant",
                )
                .with_context("user_id", owner)
                .with_context("tenant_id", tenant_id));
            }
            Some(_) => {}
        }

        let mut report = BootstrapReport::default();
        let permissions = ensure_permissions(tx.as_mut(), Some(tenant_id), tenant_permissions(), &mut report).await?;

        let mut role_ids = Vec::with_capacity(3);
        for template in PredefinedRole::tenant_roles() {
            let role = ensure_role(tx.as_mut(), template, Some(tenant_id), &mut report).await?;
            grant_template(tx.as_mut(), &role, template, &permissions, &mut report).await?;
            role_ids.push(role.id);
        }
        let (owner_role, admin_role, member_role) = match role_ids.as_slice() {
            [owner, admin, member] => (*owner, *admin, *member),
            _ => return Err(WardenError::internal("expected three predefined tenant roles")),
        };

        let attached = attach_owner_permissions_in(tx.as_mut(), tenant_id).await?;
        report.grants_added += attached.newly_attached;
        let owner_assigned = tx.insert_user_role(&UserRole::new(owner, owner_role)).await?;

        tx.commit().await?;
        if report == BootstrapReport::default() && !owner_assigned {
            debug!("Tenant already initialized");
        } else {
            info!(
                permissions = report.permissions_created,
                roles = report.roles_created,
                grants = report.grants_added,
                "Tenant initialized"
            );
        }

        Ok(TenantInit {
            tenant_id,
            owner_role,
            admin_role,
            member_role,
            created: report,
            owner_assigned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootstrapConfig;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;
    use crate::rbac::TENANT_OWNER_ROLE;

    fn bootstrapper(store: &MemoryStore) -> Bootstrapper {
        Bootstrapper::new(Arc::new(store.clone()), OperationGuard::default())
    }

    #[tokio::test]
    async fn test_bootstrap_system_is_idempotent() {
        let store = MemoryStore::new();
        let boot = bootstrapper(&store);
        let cancel = CancellationToken::new();
        let seeds = BootstrapConfig::default().capabilities;

        let first = boot.bootstrap_system(&cancel, &seeds).await.unwrap();
        assert_eq!(first.capabilities_registered, 4);
        assert_eq!(first.permissions_created, platform_permissions().len());
        assert_eq!(first.roles_created, 1);
        assert_eq!(first.grants_added, platform_permissions().len());

        let second = boot.bootstrap_system(&cancel, &seeds).await.unwrap();
        assert_eq!(second, BootstrapReport::default());
    }

    #[tokio::test]
    async fn test_initialize_tenant_creates_system_roles() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let owner = UserId::new();
        store.add_user(owner, tenant).await;
        let cancel = CancellationToken::new();

        let init = bootstrapper(&store).initialize_tenant(&cancel, tenant, owner).await.unwrap();
        assert!(init.owner_assigned);
        assert_eq!(init.created.roles_created, 3);
        assert_eq!(init.created.permissions_created, tenant_permissions().len());

        let mut tx = store.begin(TransactionMode::ReadOnly).await.unwrap();
        let owner_role = tx
            .find_role_by_name(Some(tenant), TENANT_OWNER_ROLE)
            .await
            .unwrap()
            .unwrap();
        assert!(owner_role.is_system);
        assert_eq!(tx.list_role_holders(owner_role.id).await.unwrap(), vec![owner]);
        assert_eq!(
            tx.list_role_permissions(owner_role.id).await.unwrap().len(),
            tenant_permissions().len()
        );
    }

    #[tokio::test]
    async fn test_initialize_tenant_rerun_is_noop() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let owner = UserId::new();
        store.add_user(owner, tenant).await;
        let cancel = CancellationToken::new();
        let boot = bootstrapper(&store);

        let first = boot.initialize_tenant(&cancel, tenant, owner).await.unwrap();
        let second = boot.initialize_tenant(&cancel, tenant, owner).await.unwrap();

        assert_eq!(first.owner_role, second.owner_role);
        assert_eq!(second.created, BootstrapReport::default());
        assert!(!second.owner_assigned);
    }

    #[tokio::test]
    async fn test_owner_must_belong_to_tenant() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let outsider = UserId::new();
        store.add_tenant(tenant).await;
        store.add_user(outsider, TenantId::new()).await;
        let cancel = CancellationToken::new();
        let boot = bootstrapper(&store);

        let err = boot.initialize_tenant(&cancel, tenant, outsider).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CrossTenantAssignment);

        let err = boot.initialize_tenant(&cancel, tenant, UserId::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut tx = store.begin(TransactionMode::ReadOnly).await.unwrap();
        assert!(tx.list_roles(Some(tenant)).await.unwrap().is_empty());
    }
}
