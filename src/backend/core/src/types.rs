//! Identifiers and caller identity shared by the capability and RBAC engines.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Strongly-typed tenant identifier.
    TenantId
);
uuid_id!(
    /// Strongly-typed user identifier.
    UserId
);
uuid_id!(
    /// Strongly-typed role identifier.
    RoleId
);
uuid_id!(
    /// Strongly-typed permission identifier.
    PermissionId
);

/// Name of a capability in the system registry (e.g. `totp`).
///
/// Keys are opaque and matched exactly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityKey(String);

impl CapabilityKey {
    /// Build a key, rejecting empty or whitespace-only input.
    pub fn parse(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(WardenError::missing_field("capability_key"));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for CapabilityKey {
    type Error = WardenError;

    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CapabilityKey {
    type Error = WardenError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Caller Identity
// ═══════════════════════════════════════════════════════════════════════════════

/// The scope an administrative caller acts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "tenant_id", rename_all = "snake_case")]
pub enum CallerScope {
    /// Platform operators and the internal initializer.
    System,
    /// Administrators of a single tenant.
    Tenant(TenantId),
}

impl CallerScope {
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    /// The tenant this scope is bound to, if any.
    pub fn tenant(&self) -> Option<TenantId> {
        match self {
            Self::System => None,
            Self::Tenant(t) => Some(*t),
        }
    }

    /// Whether this scope may act on resources owned by `tenant`.
    ///
    /// `None` means a platform-wide resource, reachable only from the system scope.
    pub fn can_act_on(&self, tenant: Option<TenantId>) -> bool {
        match (self, tenant) {
            (Self::System, _) => true,
            (Self::Tenant(own), Some(target)) => *own == target,
            (Self::Tenant(_), None) => false,
        }
    }
}

impl fmt::Display for CallerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Tenant(t) => write!(f, "tenant:{}", t),
        }
    }
}

/// Who is performing an administrative mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable identifier recorded in `configured_by` / `enabled_by`.
    pub id: String,
    pub scope: CallerScope,
}

impl Actor {
    pub fn system(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope: CallerScope::System,
        }
    }

    pub fn tenant_admin(id: impl Into<String>, tenant_id: TenantId) -> Self {
        Self {
            id: id.into(),
            scope: CallerScope::Tenant(tenant_id),
        }
    }

    /// Fail with `PermissionDenied` unless this actor may act on `tenant`.
    pub fn ensure_can_act_on(&self, tenant: Option<TenantId>) -> Result<()> {
        if self.scope.can_act_on(tenant) {
            return Ok(());
        }
        let target = tenant
            .map(|t| t.to_string())
            .unwrap_or_else(|| "platform".to_string());
        Err(WardenError::permission_denied(format!(
            "{} may not act on {}",
            self.scope, target
        ))
        .with_context("actor", &self.id))
    }

    /// Fail with `PermissionDenied` unless this actor is system-scoped.
    pub fn ensure_system(&self) -> Result<()> {
        if self.scope.is_system() {
            return Ok(());
        }
        Err(WardenError::permission_denied("operation requires system scope")
            .with_context("actor", &self.id))
    }
}
