//! Row types returned by policy queries.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::capability::models::{
    SystemCapability, TenantCapabilityAssignment, TenantFeatureEnablement, UserCapabilityState,
};
use crate::error::{Result, WardenError};
use crate::rbac::models::{Permission, Role, RoleStatus};
use crate::types::CapabilityKey;

#[derive(Debug, sqlx::FromRow)]
pub(super) struct SystemCapabilityRow {
    pub capability_key: String,
    pub enabled: bool,
    pub default_value: Value,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SystemCapabilityRow> for SystemCapability {
    type Error = WardenError;

    fn try_from(row: SystemCapabilityRow) -> Result<Self> {
        Ok(Self {
            capability_key: CapabilityKey::parse(row.capability_key)?,
            enabled: row.enabled,
            default_value: row.default_value,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct AssignmentRow {
    pub tenant_id: Uuid,
    pub capability_key: String,
    pub enabled: bool,
    pub value: Option<Value>,
    pub configured_by: String,
    pub configured_at: DateTime<Utc>,
}

impl TryFrom<AssignmentRow> for TenantCapabilityAssignment {
    type Error = WardenError;

    fn try_from(row: AssignmentRow) -> Result<Self> {
        Ok(Self {
            tenant_id: row.tenant_id.into(),
            capability_key: CapabilityKey::parse(row.capability_key)?,
            enabled: row.enabled,
            value: row.value,
            configured_by: row.configured_by,
            configured_at: row.configured_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct FeatureRow {
    pub tenant_id: Uuid,
    pub capability_key: String,
    pub enabled: bool,
    pub configuration: Option<Value>,
    pub enabled_by: String,
    pub enabled_at: DateTime<Utc>,
}

impl TryFrom<FeatureRow> for TenantFeatureEnablement {
    type Error = WardenError;

    fn try_from(row: FeatureRow) -> Result<Self> {
        Ok(Self {
            tenant_id: row.tenant_id.into(),
            capability_key: CapabilityKey::parse(row.capability_key)?,
            enabled: row.enabled,
            configuration: row.configuration,
            enabled_by: row.enabled_by,
            enabled_at: row.enabled_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct UserStateRow {
    pub user_id: Uuid,
    pub capability_key: String,
    pub enrolled: bool,
    pub state_data: Value,
    pub enrolled_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserStateRow> for UserCapabilityState {
    type Error = WardenError;

    fn try_from(row: UserStateRow) -> Result<Self> {
        Ok(Self {
            user_id: row.user_id.into(),
            capability_key: CapabilityKey::parse(row.capability_key)?,
            enrolled: row.enrolled,
            state_data: row.state_data,
            enrolled_at: row.enrolled_at,
            last_used_at: row.last_used_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct RoleRow {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub description: String,
    pub is_system: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<RoleRow> for Role {
    type Error = WardenError;

    fn try_from(row: RoleRow) -> Result<Self> {
        let status = RoleStatus::parse(&row.status)
            .ok_or_else(|| WardenError::internal(format!("unknown role status '{}'", row.status)))?;
        Ok(Self {
            id: row.id.into(),
            tenant_id: row.tenant_id.map(Into::into),
            name: row.name,
            description: row.description,
            is_system: row.is_system,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct PermissionRow {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub resource: String,
    pub action: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Self {
            id: row.id.into(),
            tenant_id: row.tenant_id.map(Into::into),
            name: row.name,
            resource: row.resource,
            action: row.action,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

/// Convert every row, failing on the first malformed one.
pub(super) fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = WardenError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn role_row(status: &str) -> RoleRow {
        let now = Utc::now();
        RoleRow {
            id: Uuid::new_v4(),
            tenant_id: None,
            name: "platform_admin".into(),
            description: String::new(),
            is_system: true,
            status: status.into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_role_row_status() {
        let role = Role::try_from(role_row("active")).unwrap();
        assert!(role.is_active());
        assert!(role.tenant_id.is_none());

        let err = Role::try_from(role_row("archived")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[test]
    fn test_blank_capability_key_is_rejected() {
        let row = UserStateRow {
            user_id: Uuid::new_v4(),
            capability_key: " ".into(),
            enrolled: true,
            state_data: Value::Null,
            enrolled_at: Utc::now(),
            last_used_at: None,
        };
        assert!(UserCapabilityState::try_from(row).is_err());
    }
}
