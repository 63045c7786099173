//! Role-Based Access Control for tenant administration.
//!
//! This module provides:
//! - **Models**: Role, Permission and the explicit join rows
//! - **Namespaces**: which permission prefixes each caller scope may mint
//! - **Invariant Engine**: transactional mutations that keep every tenant owned
//! - **Permission Checker**: exact-match authorization decisions
//! - **Predefined Roles**: tenant_owner, tenant_admin, tenant_member, platform_admin
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::rbac::{NewPermission, RbacEngine};
//!
//! let created = engine
//!     .create_permission(&cancel, &actor, Some(tenant_id), NewPermission::new("app.reports.export", "reports", "export"))
//!     .await?;
//! if let Some(warning) = created.attach_warning {
//!     tracing::warn!(%warning, "retry attach later");
//! }
//! ```

pub mod engine;
pub mod models;
pub mod namespace;
pub mod policy;
pub mod roles;

pub use engine::{AttachReport, AttachWarning, AutoAttachMode, PermissionCreated, RbacEngine};
pub use models::{NewPermission, Permission, Role, RolePermission, RoleStatus, UserRole, TENANT_OWNER_ROLE};
pub use namespace::{validate_permission_name, NamespacePolicy, RESERVED_NAMESPACES, TENANT_NAMESPACES};
pub use policy::{PermissionChecker, PolicyDecision};
pub use roles::PredefinedRole;
