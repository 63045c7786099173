//! In-process store with serializable transactions.
//!
//! Read-write transactions hold the write half of a `tokio::sync::RwLock`
//! and stage their changes on a private copy of the state, so concurrent
//! invariant checks are fully serialized and an uncommitted transaction
//! leaves no trace. Read-only transactions share the read half.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

use super::{
    CapabilityRepository, DirectoryRepository, RbacRepository, Store, Transaction, TransactionMode,
};
use crate::capability::models::{
    SystemCapability, TenantCapabilityAssignment, TenantFeatureEnablement, UserCapabilityState,
};
use crate::error::{Result, WardenError};
use crate::rbac::models::{Permission, Role, RolePermission, UserRole};
use crate::types::{CapabilityKey, PermissionId, RoleId, TenantId, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tenants: HashSet<TenantId>,
    users: HashMap<UserId, TenantId>,

    system_capabilities: BTreeMap<CapabilityKey, SystemCapability>,
    assignments: BTreeMap<(TenantId, CapabilityKey), TenantCapabilityAssignment>,
    features: BTreeMap<(TenantId, CapabilityKey), TenantFeatureEnablement>,
    user_states: BTreeMap<(UserId, CapabilityKey), UserCapabilityState>,

    roles: HashMap<RoleId, Role>,
    permissions: HashMap<PermissionId, Permission>,
    role_permissions: BTreeMap<(RoleId, PermissionId), RolePermission>,
    user_roles: BTreeMap<(UserId, RoleId), UserRole>,
}

/// Failures the memory store can be told to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `begin` fails as if the store were unreachable.
    Unavailable,
    /// Inserting a role-permission grant fails.
    GrantPermission,
    /// `commit` fails.
    Commit,
    /// `commit` never completes; only cancellation or a timeout ends it.
    StallCommit,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory [`Store`] implementation.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    faults: Arc<Mutex<HashSet<Fault>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tenant in the directory.
    pub async fn add_tenant(&self, tenant_id: TenantId) {
        self.state.write().await.tenants.insert(tenant_id);
    }

    /// Register a user of `tenant_id` in the directory.
    pub async fn add_user(&self, user_id: UserId, tenant_id: TenantId) {
        let mut state = self.state.write().await;
        state.tenants.insert(tenant_id);
        state.users.insert(user_id, tenant_id);
    }

    /// Make the given fault fire until cleared.
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().insert(fault);
    }

    pub fn clear(&self, fault: Fault) {
        self.faults.lock().remove(&fault);
    }

    /// Every committed role-permission row.
    pub async fn role_permission_rows(&self) -> Vec<RolePermission> {
        self.state.read().await.role_permissions.values().cloned().collect()
    }

    /// Every committed user-role row.
    pub async fn user_role_rows(&self) -> Vec<UserRole> {
        self.state.read().await.user_roles.values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, mode: TransactionMode) -> Result<Box<dyn Transaction>> {
        check_fault(&self.faults, Fault::Unavailable)?;

        let access = match mode {
            TransactionMode::ReadOnly => Access::Read(self.state.clone().read_owned().await),
            TransactionMode::ReadWrite => {
                let guard = self.state.clone().write_owned().await;
                let working = (*guard).clone();
                Access::Write { guard, working }
            }
        };

        Ok(Box::new(MemoryTransaction {
            access,
            faults: self.faults.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn check_fault(faults: &Mutex<HashSet<Fault>>, fault: Fault) -> Result<()> {
    if faults.lock().contains(&fault) {
        return Err(WardenError::unavailable(format!("injected fault: {:?}", fault)));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transaction
// ═══════════════════════════════════════════════════════════════════════════════

enum Access {
    Read(OwnedRwLockReadGuard<MemoryState>),
    Write {
        guard: OwnedRwLockWriteGuard<MemoryState>,
        working: MemoryState,
    },
}

struct MemoryTransaction {
    access: Access,
    faults: Arc<Mutex<HashSet<Fault>>>,
}

impl MemoryTransaction {
    fn state(&self) -> &MemoryState {
        match &self.access {
            Access::Read(guard) => guard,
            Access::Write { working, .. } => working,
        }
    }

    fn state_mut(&mut self) -> Result<&mut MemoryState> {
        match &mut self.access {
            Access::Read(_) => Err(WardenError::internal("write attempted in a read-only transaction")),
            Access::Write { working, .. } => Ok(working),
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        check_fault(&self.faults, Fault::Commit)?;
        if self.faults.lock().contains(&Fault::StallCommit) {
            std::future::pending::<()>().await;
        }
        if let Access::Write { mut guard, working } = self.access {
            *guard = working;
            debug!("memory transaction committed");
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CapabilityRepository for MemoryTransaction {
    async fn get_system_capability(&mut self, key: &CapabilityKey) -> Result<Option<SystemCapability>> {
        Ok(self.state().system_capabilities.get(key).cloned())
    }

    async fn lock_system_capability(&mut self, key: &CapabilityKey) -> Result<Option<SystemCapability>> {
        // Read-write transactions already hold the exclusive state lock.
        self.state_mut()?;
        Ok(self.state().system_capabilities.get(key).cloned())
    }

    async fn list_system_capabilities(&mut self) -> Result<Vec<SystemCapability>> {
        Ok(self.state().system_capabilities.values().cloned().collect())
    }

    async fn insert_system_capability(&mut self, capability: &SystemCapability) -> Result<()> {
        let state = self.state_mut()?;
        if state.system_capabilities.contains_key(&capability.capability_key) {
            return Err(WardenError::duplicate("capability", &capability.capability_key));
        }
        state
            .system_capabilities
            .insert(capability.capability_key.clone(), capability.clone());
        Ok(())
    }

    async fn update_system_capability(&mut self, capability: &SystemCapability) -> Result<bool> {
        let state = self.state_mut()?;
        match state.system_capabilities.get_mut(&capability.capability_key) {
            Some(existing) => {
                *existing = capability.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_tenant_assignment(
        &mut self,
        tenant_id: TenantId,
        key: &CapabilityKey,
    ) -> Result<Option<TenantCapabilityAssignment>> {
        Ok(self.state().assignments.get(&(tenant_id, key.clone())).cloned())
    }

    async fn list_tenant_assignments(&mut self, tenant_id: TenantId) -> Result<Vec<TenantCapabilityAssignment>> {
        Ok(self
            .state()
            .assignments
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn upsert_tenant_assignment(&mut self, assignment: &TenantCapabilityAssignment) -> Result<()> {
        self.state_mut()?.assignments.insert(
            (assignment.tenant_id, assignment.capability_key.clone()),
            assignment.clone(),
        );
        Ok(())
    }

    async fn delete_tenant_assignment(&mut self, tenant_id: TenantId, key: &CapabilityKey) -> Result<bool> {
        Ok(self
            .state_mut()?
            .assignments
            .remove(&(tenant_id, key.clone()))
            .is_some())
    }

    async fn get_tenant_feature(
        &mut self,
        tenant_id: TenantId,
        key: &CapabilityKey,
    ) -> Result<Option<TenantFeatureEnablement>> {
        Ok(self.state().features.get(&(tenant_id, key.clone())).cloned())
    }

    async fn list_tenant_features(&mut self, tenant_id: TenantId) -> Result<Vec<TenantFeatureEnablement>> {
        Ok(self
            .state()
            .features
            .values()
            .filter(|f| f.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn upsert_tenant_feature(&mut self, feature: &TenantFeatureEnablement) -> Result<()> {
        self.state_mut()?
            .features
            .insert((feature.tenant_id, feature.capability_key.clone()), feature.clone());
        Ok(())
    }

    async fn delete_tenant_feature(&mut self, tenant_id: TenantId, key: &CapabilityKey) -> Result<bool> {
        Ok(self
            .state_mut()?
            .features
            .remove(&(tenant_id, key.clone()))
            .is_some())
    }

    async fn get_user_state(&mut self, user_id: UserId, key: &CapabilityKey) -> Result<Option<UserCapabilityState>> {
        Ok(self.state().user_states.get(&(user_id, key.clone())).cloned())
    }

    async fn list_user_states(&mut self, user_id: UserId) -> Result<Vec<UserCapabilityState>> {
        Ok(self
            .state()
            .user_states
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_tenant_user_states(&mut self, tenant_id: TenantId) -> Result<Vec<UserCapabilityState>> {
        let state = self.state();
        Ok(state
            .user_states
            .values()
            .filter(|s| state.users.get(&s.user_id) == Some(&tenant_id))
            .cloned()
            .collect())
    }

    async fn upsert_user_state(&mut self, user_state: &UserCapabilityState) -> Result<()> {
        self.state_mut()?.user_states.insert(
            (user_state.user_id, user_state.capability_key.clone()),
            user_state.clone(),
        );
        Ok(())
    }

    async fn delete_user_state(&mut self, user_id: UserId, key: &CapabilityKey) -> Result<bool> {
        Ok(self
            .state_mut()?
            .user_states
            .remove(&(user_id, key.clone()))
            .is_some())
    }
}

#[async_trait]
impl DirectoryRepository for MemoryTransaction {
    async fn tenant_exists(&mut self, tenant_id: TenantId) -> Result<bool> {
        Ok(self.state().tenants.contains(&tenant_id))
    }

    async fn user_tenant(&mut self, user_id: UserId) -> Result<Option<TenantId>> {
        Ok(self.state().users.get(&user_id).copied())
    }
}

fn sorted_by_name<T>(mut items: Vec<T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    items.sort_by(|a, b| name(a).cmp(name(b)));
    items
}

#[async_trait]
impl RbacRepository for MemoryTransaction {
    async fn get_role(&mut self, role_id: RoleId) -> Result<Option<Role>> {
        Ok(self.state().roles.get(&role_id).cloned())
    }

    async fn lock_role(&mut self, role_id: RoleId) -> Result<Option<Role>> {
        // Read-write transactions already hold the exclusive state lock.
        self.state_mut()?;
        Ok(self.state().roles.get(&role_id).cloned())
    }

    async fn find_role_by_name(&mut self, tenant_id: Option<TenantId>, name: &str) -> Result<Option<Role>> {
        Ok(self
            .state()
            .roles
            .values()
            .find(|r| r.is_active() && r.tenant_id == tenant_id && r.name == name)
            .cloned())
    }

    async fn list_roles(&mut self, tenant_id: Option<TenantId>) -> Result<Vec<Role>> {
        let roles = self
            .state()
            .roles
            .values()
            .filter(|r| r.is_active() && r.tenant_id == tenant_id)
            .cloned()
            .collect();
        Ok(sorted_by_name(roles, |r: &Role| &r.name))
    }

    async fn insert_role(&mut self, role: &Role) -> Result<()> {
        let state = self.state_mut()?;
        if state.roles.contains_key(&role.id) {
            return Err(WardenError::duplicate("role", role.id));
        }
        state.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn update_role(&mut self, role: &Role) -> Result<()> {
        let state = self.state_mut()?;
        match state.roles.get_mut(&role.id) {
            Some(existing) => {
                *existing = role.clone();
                Ok(())
            }
            None => Err(WardenError::role_not_found(role.id)),
        }
    }

    async fn get_permission(&mut self, permission_id: PermissionId) -> Result<Option<Permission>> {
        Ok(self.state().permissions.get(&permission_id).cloned())
    }

    async fn find_permission_by_name(
        &mut self,
        tenant_id: Option<TenantId>,
        name: &str,
    ) -> Result<Option<Permission>> {
        Ok(self
            .state()
            .permissions
            .values()
            .find(|p| p.tenant_id == tenant_id && p.name == name)
            .cloned())
    }

    async fn list_permissions(&mut self, tenant_id: Option<TenantId>) -> Result<Vec<Permission>> {
        let perms = self
            .state()
            .permissions
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect();
        Ok(sorted_by_name(perms, |p: &Permission| &p.name))
    }

    async fn insert_permission(&mut self, permission: &Permission) -> Result<()> {
        let state = self.state_mut()?;
        let clash = state
            .permissions
            .values()
            .any(|p| p.tenant_id == permission.tenant_id && p.name == permission.name);
        if clash {
            return Err(WardenError::duplicate("permission", &permission.name));
        }
        state.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn delete_permission(&mut self, permission_id: PermissionId) -> Result<bool> {
        Ok(self.state_mut()?.permissions.remove(&permission_id).is_some())
    }

    async fn insert_role_permission(&mut self, grant: &RolePermission) -> Result<bool> {
        check_fault(&self.faults, Fault::GrantPermission)?;
        let key = (grant.role_id, grant.permission_id);
        let state = self.state_mut()?;
        if state.role_permissions.contains_key(&key) {
            return Ok(false);
        }
        state.role_permissions.insert(key, grant.clone());
        Ok(true)
    }

    async fn delete_role_permission(&mut self, role_id: RoleId, permission_id: PermissionId) -> Result<bool> {
        Ok(self
            .state_mut()?
            .role_permissions
            .remove(&(role_id, permission_id))
            .is_some())
    }

    async fn delete_role_permissions_for_role(&mut self, role_id: RoleId) -> Result<u64> {
        let state = self.state_mut()?;
        let before = state.role_permissions.len();
        state.role_permissions.retain(|(r, _), _| *r != role_id);
        Ok((before - state.role_permissions.len()) as u64)
    }

    async fn delete_role_permissions_for_permission(&mut self, permission_id: PermissionId) -> Result<u64> {
        let state = self.state_mut()?;
        let before = state.role_permissions.len();
        state.role_permissions.retain(|(_, p), _| *p != permission_id);
        Ok((before - state.role_permissions.len()) as u64)
    }

    async fn list_role_permissions(&mut self, role_id: RoleId) -> Result<Vec<Permission>> {
        let state = self.state();
        let perms = state
            .role_permissions
            .keys()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, p)| state.permissions.get(p).cloned())
            .collect();
        Ok(sorted_by_name(perms, |p: &Permission| &p.name))
    }

    async fn insert_user_role(&mut self, assignment: &UserRole) -> Result<bool> {
        let key = (assignment.user_id, assignment.role_id);
        let state = self.state_mut()?;
        if state.user_roles.contains_key(&key) {
            return Ok(false);
        }
        state.user_roles.insert(key, assignment.clone());
        Ok(true)
    }

    async fn delete_user_role(&mut self, user_id: UserId, role_id: RoleId) -> Result<bool> {
        Ok(self
            .state_mut()?
            .user_roles
            .remove(&(user_id, role_id))
            .is_some())
    }

    async fn delete_user_roles_for_role(&mut self, role_id: RoleId) -> Result<u64> {
        let state = self.state_mut()?;
        let before = state.user_roles.len();
        state.user_roles.retain(|(_, r), _| *r != role_id);
        Ok((before - state.user_roles.len()) as u64)
    }

    async fn list_role_holders(&mut self, role_id: RoleId) -> Result<Vec<UserId>> {
        Ok(self
            .state()
            .user_roles
            .keys()
            .filter(|(_, r)| *r == role_id)
            .map(|(u, _)| *u)
            .collect())
    }

    async fn list_user_roles(&mut self, user_id: UserId) -> Result<Vec<Role>> {
        let state = self.state();
        let roles = state
            .user_roles
            .keys()
            .filter(|(u, _)| *u == user_id)
            .filter_map(|(_, r)| state.roles.get(r))
            .filter(|r| r.is_active())
            .cloned()
            .collect();
        Ok(sorted_by_name(roles, |r: &Role| &r.name))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
