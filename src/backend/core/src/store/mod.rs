//! Persistence contracts consumed by the policy engine.
//!
//! The engine never talks to a database directly. It opens a [`Transaction`]
//! from a [`Store`] for every logical operation, performs all reads and
//! invariant checks through the repository traits, and either commits or
//! drops the transaction. Dropping an uncommitted transaction must discard
//! every staged write; this is how cancellation rolls back.
//!
//! Implementations:
//! - [`MemoryStore`]: in-process, serializable, used by tests and embedders
//! - [`crate::db::Database`]: PostgreSQL via sqlx

use async_trait::async_trait;

use crate::capability::models::{
    SystemCapability, TenantCapabilityAssignment, TenantFeatureEnablement, UserCapabilityState,
};
use crate::error::Result;
use crate::rbac::models::{Permission, Role, RolePermission, UserRole};
use crate::types::{CapabilityKey, PermissionId, RoleId, TenantId, UserId};

pub mod guard;
pub mod memory;

pub use guard::OperationGuard;
pub use memory::{Fault, MemoryStore};

/// Isolation requested for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Point-in-time reads. Writes are rejected.
    ReadOnly,
    /// Reads and writes; invariant checks inside see a consistent view.
    ReadWrite,
}

/// Entry point of a persistence backend.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Begin a new unit of work.
    async fn begin(&self, mode: TransactionMode) -> Result<Box<dyn Transaction>>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// A unit of work spanning every repository.
#[async_trait]
pub trait Transaction: CapabilityRepository + DirectoryRepository + RbacRepository + Send {
    /// Make all staged writes durable.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all staged writes. Dropping has the same effect.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Capability layers
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-layer CRUD for the four capability record types.
#[async_trait]
pub trait CapabilityRepository: Send {
    /// Single-row layer reads (`get_*`) share-lock the row inside read-write
    /// transactions, so a concurrent revoke, disable or registry change waits
    /// for the reader to finish.
    async fn get_system_capability(&mut self, key: &CapabilityKey) -> Result<Option<SystemCapability>>;
    /// Fetch a registry entry and hold an exclusive lock on it until the
    /// transaction ends.
    async fn lock_system_capability(&mut self, key: &CapabilityKey) -> Result<Option<SystemCapability>>;
    async fn list_system_capabilities(&mut self) -> Result<Vec<SystemCapability>>;
    /// Insert a new registry entry. Fails with `DuplicateRecord` if the key exists.
    async fn insert_system_capability(&mut self, capability: &SystemCapability) -> Result<()>;
    /// Overwrite an existing registry entry. Returns false if absent.
    async fn update_system_capability(&mut self, capability: &SystemCapability) -> Result<bool>;

    async fn get_tenant_assignment(
        &mut self,
        tenant_id: TenantId,
        key: &CapabilityKey,
    ) -> Result<Option<TenantCapabilityAssignment>>;
    async fn list_tenant_assignments(&mut self, tenant_id: TenantId) -> Result<Vec<TenantCapabilityAssignment>>;
    async fn upsert_tenant_assignment(&mut self, assignment: &TenantCapabilityAssignment) -> Result<()>;
    async fn delete_tenant_assignment(&mut self, tenant_id: TenantId, key: &CapabilityKey) -> Result<bool>;

    async fn get_tenant_feature(
        &mut self,
        tenant_id: TenantId,
        key: &CapabilityKey,
    ) -> Result<Option<TenantFeatureEnablement>>;
    async fn list_tenant_features(&mut self, tenant_id: TenantId) -> Result<Vec<TenantFeatureEnablement>>;
    async fn upsert_tenant_feature(&mut self, feature: &TenantFeatureEnablement) -> Result<()>;
    async fn delete_tenant_feature(&mut self, tenant_id: TenantId, key: &CapabilityKey) -> Result<bool>;

    async fn get_user_state(&mut self, user_id: UserId, key: &CapabilityKey) -> Result<Option<UserCapabilityState>>;
    async fn list_user_states(&mut self, user_id: UserId) -> Result<Vec<UserCapabilityState>>;
    /// Every enrollment held by users of `tenant_id`.
    async fn list_tenant_user_states(&mut self, tenant_id: TenantId) -> Result<Vec<UserCapabilityState>>;
    async fn upsert_user_state(&mut self, state: &UserCapabilityState) -> Result<()>;
    async fn delete_user_state(&mut self, user_id: UserId, key: &CapabilityKey) -> Result<bool>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Directory (owned by the identity subsystem)
// ═══════════════════════════════════════════════════════════════════════════════

/// Read-only view of tenants and users.
#[async_trait]
pub trait DirectoryRepository: Send {
    async fn tenant_exists(&mut self, tenant_id: TenantId) -> Result<bool>;
    /// The tenant a user belongs to, or None for unknown users.
    async fn user_tenant(&mut self, user_id: UserId) -> Result<Option<TenantId>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// RBAC
// ═══════════════════════════════════════════════════════════════════════════════

/// Roles, permissions and their join rows.
#[async_trait]
pub trait RbacRepository: Send {
    /// Fetch a role in any status.
    async fn get_role(&mut self, role_id: RoleId) -> Result<Option<Role>>;
    /// Fetch a role and hold an exclusive lock on it until the transaction ends.
    async fn lock_role(&mut self, role_id: RoleId) -> Result<Option<Role>>;
    /// Active role with `name` in the given scope (None = platform roles).
    async fn find_role_by_name(&mut self, tenant_id: Option<TenantId>, name: &str) -> Result<Option<Role>>;
    /// Active roles in the given scope.
    async fn list_roles(&mut self, tenant_id: Option<TenantId>) -> Result<Vec<Role>>;
    async fn insert_role(&mut self, role: &Role) -> Result<()>;
    async fn update_role(&mut self, role: &Role) -> Result<()>;

    async fn get_permission(&mut self, permission_id: PermissionId) -> Result<Option<Permission>>;
    async fn find_permission_by_name(
        &mut self,
        tenant_id: Option<TenantId>,
        name: &str,
    ) -> Result<Option<Permission>>;
    /// Permissions owned by the given scope (None = global permissions).
    async fn list_permissions(&mut self, tenant_id: Option<TenantId>) -> Result<Vec<Permission>>;
    async fn insert_permission(&mut self, permission: &Permission) -> Result<()>;
    async fn delete_permission(&mut self, permission_id: PermissionId) -> Result<bool>;

    /// Idempotent insert. Returns true if the pair was new.
    async fn insert_role_permission(&mut self, grant: &RolePermission) -> Result<bool>;
    async fn delete_role_permission(&mut self, role_id: RoleId, permission_id: PermissionId) -> Result<bool>;
    async fn delete_role_permissions_for_role(&mut self, role_id: RoleId) -> Result<u64>;
    async fn delete_role_permissions_for_permission(&mut self, permission_id: PermissionId) -> Result<u64>;
    /// Permissions granted to a role.
    async fn list_role_permissions(&mut self, role_id: RoleId) -> Result<Vec<Permission>>;

    /// Idempotent insert. Returns true if the pair was new.
    async fn insert_user_role(&mut self, assignment: &UserRole) -> Result<bool>;
    async fn delete_user_role(&mut self, user_id: UserId, role_id: RoleId) -> Result<bool>;
    async fn delete_user_roles_for_role(&mut self, role_id: RoleId) -> Result<u64>;
    /// Users currently holding a role.
    async fn list_role_holders(&mut self, role_id: RoleId) -> Result<Vec<UserId>>;
    /// Active roles held by a user.
    async fn list_user_roles(&mut self, user_id: UserId) -> Result<Vec<Role>>;
}
