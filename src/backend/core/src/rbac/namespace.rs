//! Permission name grammar and caller-scoped namespace rules.
//!
//! A permission name is two or more non-empty, whitespace-free segments joined
//! by `.`. The first segment is its namespace. Tenant-scoped callers may only
//! mint names in the tenant-safe namespaces; `system` and `platform` are
//! reserved for the system scope.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::error::{ErrorCode, Result, WardenError};
use crate::types::CallerScope;

/// Namespaces every tenant may create permissions in.
pub const TENANT_NAMESPACES: [&str; 3] = ["tenant", "app", "resource"];

/// Namespaces that only the system scope may create permissions in.
pub const RESERVED_NAMESPACES: [&str; 2] = ["system", "platform"];

fn grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| Regex::new(r"^[^.\s]+(\.[^.\s]+)+$").expect("static regex"))
}

/// Which namespaces tenant-scoped callers may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespacePolicy {
    tenant_namespaces: BTreeSet<String>,
}

impl Default for NamespacePolicy {
    fn default() -> Self {
        Self {
            tenant_namespaces: TENANT_NAMESPACES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl NamespacePolicy {
    /// Extend the default tenant namespaces.
    ///
    /// Reserved namespaces cannot be opened to tenants.
    pub fn with_tenant_namespaces<I, S>(extra: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut policy = Self::default();
        for ns in extra {
            let ns = ns.into();
            if ns.is_empty() || ns.contains('.') || ns.chars().any(char::is_whitespace) {
                return Err(WardenError::new(
                    ErrorCode::ConfigurationError,
                    format!("invalid namespace prefix: {:?}", ns),
                ));
            }
            if RESERVED_NAMESPACES.contains(&ns.as_str()) {
                return Err(WardenError::new(
                    ErrorCode::ConfigurationError,
                    format!("namespace '{}' is reserved for the system scope", ns),
                ));
            }
            policy.tenant_namespaces.insert(ns);
        }
        Ok(policy)
    }

    pub fn tenant_namespaces(&self) -> impl Iterator<Item = &str> {
        self.tenant_namespaces.iter().map(String::as_str)
    }

    /// Check `name` against the grammar and the caller's allowed namespaces.
    pub fn validate(&self, name: &str, scope: &CallerScope) -> Result<()> {
        if name.is_empty() {
            return Err(WardenError::missing_field("permission_name"));
        }
        if !grammar().is_match(name) {
            return Err(invalid(
                name,
                "expected dot-delimited segments such as 'tenant.users.read'",
            ));
        }

        let namespace = name.split('.').next().unwrap_or_default();
        match scope {
            CallerScope::System => Ok(()),
            CallerScope::Tenant(_) if self.tenant_namespaces.contains(namespace) => Ok(()),
            CallerScope::Tenant(_) if RESERVED_NAMESPACES.contains(&namespace) => Err(invalid(
                name,
                "namespace is reserved for the system scope",
            )),
            CallerScope::Tenant(_) => Err(invalid(name, "namespace is not allowed for tenants")),
        }
    }
}

fn invalid(name: &str, reason: &str) -> WardenError {
    WardenError::new(
        ErrorCode::InvalidNamespace,
        format!("invalid permission name '{}': {}", name, reason),
    )
    .with_context("permission_name", name)
}

/// Validate against the default namespace policy.
pub fn validate_permission_name(name: &str, scope: &CallerScope) -> Result<()> {
    NamespacePolicy::default().validate(name, scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::TenantId;

    fn tenant() -> CallerScope {
        CallerScope::Tenant(TenantId::new())
    }

    #[test]
    fn test_tenant_scope_accepts_tenant_namespaces() {
        for name in ["tenant.users.read", "app.reports.export", "resource.invoice.view"] {
            assert!(validate_permission_name(name, &tenant()).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_tenant_scope_rejects_reserved_namespaces() {
        for name in ["system.admin", "platform.billing.write"] {
            let err = validate_permission_name(name, &tenant()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationError);
            assert_eq!(err.code(), ErrorCode::InvalidNamespace);
        }
    }

    #[test]
    fn test_tenant_scope_rejects_unknown_namespace() {
        let err = validate_permission_name("billing.read", &tenant()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidNamespace);
    }

    #[test]
    fn test_system_scope_accepts_any_namespace() {
        for name in ["system.admin", "platform.billing.write", "tenant.users.read", "billing.read"] {
            assert!(validate_permission_name(name, &CallerScope::System).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_malformed_names() {
        for name in ["tenant", "tenant.", ".users", "tenant..read", "tenant.users read", " tenant.read"] {
            let err = validate_permission_name(name, &CallerScope::System).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidNamespace, "{:?}", name);
        }
        assert_eq!(
            validate_permission_name("", &CallerScope::System).unwrap_err().code(),
            ErrorCode::MissingRequiredField
        );
    }

    #[test]
    fn test_policy_extension() {
        let policy = NamespacePolicy::with_tenant_namespaces(["billing"]).unwrap();
        assert!(policy.validate("billing.read", &tenant()).is_ok());
        assert!(policy.validate("system.read", &tenant()).is_err());
    }

    #[test]
    fn test_policy_cannot_open_reserved_namespace() {
        let err = NamespacePolicy::with_tenant_namespaces(["platform"]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
        assert!(NamespacePolicy::with_tenant_namespaces(["a.b"]).is_err());
    }
}
