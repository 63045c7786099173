#![allow(clippy::result_large_err)]
//! # Warden Core
//!
//! Multi-tenant capability and RBAC policy engine.
//!
//! ## Architecture
//!
//! - **Capabilities**: four-layer evaluation (system, assignment, feature, user)
//!   with an explainable result and most-specific-wins configuration
//! - **RBAC**: tenant roles and namespaced permissions, with owner auto-attach
//!   and the last-owner safeguard enforced transactionally
//! - **Policy Facade**: the read-only entry point for login, MFA and OAuth flows
//! - **Bootstrap**: seeds the platform registry and initializes tenants
//! - **Store**: transactional persistence contract, with in-memory and
//!   PostgreSQL implementations
//! - **Telemetry**: structured logging and policy metrics

pub mod bootstrap;
pub mod capability;
pub mod config;
pub mod db;
pub mod error;
pub mod policy;
pub mod rbac;
pub mod store;
pub mod telemetry;
pub mod types;

pub use error::{ErrorCode, ErrorDetails, ErrorKind, ErrorSeverity, Result, WardenError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bootstrap::{BootstrapReport, Bootstrapper, TenantInit};
    pub use crate::capability::{
        CapabilityEvaluator, CapabilityService, DenialReason, EvaluationResult, OrphanReport,
        SystemCapability, SystemCapabilityUpdate, TenantCapabilityAssignment,
        TenantFeatureEnablement, UserCapabilityState, ValueSource,
    };
    pub use crate::config::WardenConfig;
    pub use crate::error::{ErrorCode, ErrorKind, Result, WardenError};
    pub use crate::policy::PolicyFacade;
    pub use crate::rbac::{
        AttachReport, AttachWarning, AutoAttachMode, NamespacePolicy, NewPermission, Permission,
        PermissionChecker, PermissionCreated, PolicyDecision, PredefinedRole, RbacEngine, Role,
    };
    pub use crate::store::{MemoryStore, OperationGuard, Store, TransactionMode};
    pub use crate::types::{Actor, CallerScope, CapabilityKey, PermissionId, RoleId, TenantId, UserId};
    pub use tokio_util::sync::CancellationToken;
}
