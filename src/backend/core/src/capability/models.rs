//! Capability layer records: system registry, tenant assignment, tenant
//! feature enablement and per-user enrollment state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CapabilityKey, TenantId, UserId};

/// Treat JSON `null` as an absent document.
pub(crate) fn non_null(value: &Option<Value>) -> Option<&Value> {
    value.as_ref().filter(|v| !v.is_null())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Layer 1: System registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Global registry entry. Absence means the capability is unsupported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemCapability {
    pub capability_key: CapabilityKey,
    pub enabled: bool,
    /// Default configuration document for every tenant.
    pub default_value: Value,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SystemCapability {
    pub fn new(capability_key: CapabilityKey, default_value: Value, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            capability_key,
            enabled: true,
            default_value,
            description: description.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Register the capability disabled platform-wide.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Partial update for a system registry entry. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemCapabilityUpdate {
    pub enabled: Option<bool>,
    pub default_value: Option<Value>,
    pub description: Option<String>,
}

impl SystemCapabilityUpdate {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, capability: &mut SystemCapability) {
        if let Some(enabled) = self.enabled {
            capability.enabled = enabled;
        }
        if let Some(default_value) = self.default_value {
            capability.default_value = default_value;
        }
        if let Some(description) = self.description {
            capability.description = description;
        }
        capability.updated_at = Utc::now();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Layer 2: Tenant assignment
// ═══════════════════════════════════════════════════════════════════════════════

/// A system administrator's grant making a capability available to a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantCapabilityAssignment {
    pub tenant_id: TenantId,
    pub capability_key: CapabilityKey,
    /// Whether the tenant is allowed to use the capability.
    pub enabled: bool,
    /// Tenant-level override of the system default.
    pub value: Option<Value>,
    pub configured_by: String,
    pub configured_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Layer 3: Tenant feature enablement
// ═══════════════════════════════════════════════════════════════════════════════

/// A tenant administrator's decision to turn on an assigned capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantFeatureEnablement {
    pub tenant_id: TenantId,
    pub capability_key: CapabilityKey,
    /// Whether the tenant opted in.
    pub enabled: bool,
    pub configuration: Option<Value>,
    pub enabled_by: String,
    pub enabled_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Layer 4: User enrollment
// ═══════════════════════════════════════════════════════════════════════════════

/// A user's enrollment in an enabled capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCapabilityState {
    pub user_id: UserId,
    pub capability_key: CapabilityKey,
    pub enrolled: bool,
    /// Opaque enrollment material (e.g. a reference to an MFA secret).
    pub state_data: Value,
    pub enrolled_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Orphans
// ═══════════════════════════════════════════════════════════════════════════════

/// Rows whose prerequisite layer is gone or disabled.
///
/// They are inert because evaluation re-checks every layer; operators may
/// delete them through the normal disable/unenroll operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrphanReport {
    pub tenant_id: Option<TenantId>,
    /// Features enabled without an allowed assignment.
    pub orphaned_features: Vec<CapabilityKey>,
    /// Enrollments whose tenant feature is disabled, missing or itself orphaned.
    pub orphaned_enrollments: Vec<(UserId, CapabilityKey)>,
}

impl OrphanReport {
    pub fn is_empty(&self) -> bool {
        self.orphaned_features.is_empty() && self.orphaned_enrollments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_applies_only_set_fields() {
        let mut cap = SystemCapability::new(
            CapabilityKey::parse("totp").unwrap(),
            json!({"digits": 6}),
            "Time-based one-time passwords",
        );
        let before = cap.clone();

        SystemCapabilityUpdate::enabled(false).apply(&mut cap);

        assert!(!cap.enabled);
        assert_eq!(cap.default_value, before.default_value);
        assert_eq!(cap.description, before.description);
        assert_eq!(cap.created_at, before.created_at);
    }

    #[test]
    fn test_non_null() {
        assert!(non_null(&None).is_none());
        assert!(non_null(&Some(Value::Null)).is_none());
        assert_eq!(non_null(&Some(json!({"a": 1}))), Some(&json!({"a": 1})));
    }
}
