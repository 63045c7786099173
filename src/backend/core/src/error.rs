//! Error handling for the Warden policy engine.
//!
//! Every fallible operation returns [`WardenError`], which carries:
//! - a fine-grained, stable [`ErrorCode`]
//! - the coarse [`ErrorKind`] callers branch on (not found, validation,
//!   invariant violation, dependency unavailable, ...)
//! - a user-facing message plus an optional internal message for logs
//! - structured [`ErrorDetails`] and an optional source error
//!
//! The core never retries. Errors are returned to the caller immediately.
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::error::{ErrorKind, Result, WardenError};
//!
//! fn lookup() -> Result<()> {
//!     Err(WardenError::role_not_found(role_id))
//! }
//!
//! match lookup() {
//!     Err(e) if e.kind() == ErrorKind::NotFound => { /* 404 upstream */ }
//!     _ => {}
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Kind
// ═══════════════════════════════════════════════════════════════════════════════

/// Coarse error taxonomy exposed to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A referenced capability, tenant, user, role or permission does not exist.
    NotFound,
    /// Malformed input: bad namespace, empty required field, duplicate name.
    ValidationError,
    /// The operation would break a safety invariant.
    InvariantViolation,
    /// The underlying store is unreachable or timed out.
    DependencyUnavailable,
    /// The caller's scope or roles do not allow the operation.
    PermissionDenied,
    /// A capability is not usable for the tenant/user.
    CapabilityUnavailable,
    /// The caller cancelled the operation.
    Cancelled,
    /// Bugs and misconfiguration.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::ValidationError => "validation_error",
            Self::InvariantViolation => "invariant_violation",
            Self::DependencyUnavailable => "dependency_unavailable",
            Self::PermissionDenied => "permission_denied",
            Self::CapabilityUnavailable => "capability_unavailable",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Not Found (1000-1099)
    CapabilityNotFound,
    TenantNotFound,
    UserNotFound,
    RoleNotFound,
    PermissionNotFound,
    RecordNotFound,

    // Validation (1100-1199)
    ValidationError,
    InvalidNamespace,
    MissingRequiredField,
    DuplicateRecord,

    // Invariants (1200-1299)
    LastTenantOwner,
    SystemRoleImmutable,
    PrerequisiteNotEnabled,
    CrossTenantAssignment,

    // Dependencies (2000-2099)
    DependencyUnavailable,
    DatabaseError,
    StoreTimeout,

    // Policy (4000-4099)
    PermissionDenied,
    CapabilityUnavailable,

    // Operation (5000-5099)
    Cancelled,

    // Internal (9000-9099)
    InternalError,
    ConfigurationError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::CapabilityNotFound => 1000,
            Self::TenantNotFound => 1001,
            Self::UserNotFound => 1002,
            Self::RoleNotFound => 1003,
            Self::PermissionNotFound => 1004,
            Self::RecordNotFound => 1005,

            Self::ValidationError => 1100,
            Self::InvalidNamespace => 1101,
            Self::MissingRequiredField => 1102,
            Self::DuplicateRecord => 1103,

            Self::LastTenantOwner => 1200,
            Self::SystemRoleImmutable => 1201,
            Self::PrerequisiteNotEnabled => 1202,
            Self::CrossTenantAssignment => 1203,

            Self::DependencyUnavailable => 2000,
            Self::DatabaseError => 2001,
            Self::StoreTimeout => 2002,

            Self::PermissionDenied => 4000,
            Self::CapabilityUnavailable => 4001,

            Self::Cancelled => 5000,

            Self::InternalError => 9000,
            Self::ConfigurationError => 9001,
        }
    }

    /// The taxonomy bucket this code belongs to.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CapabilityNotFound
            | Self::TenantNotFound
            | Self::UserNotFound
            | Self::RoleNotFound
            | Self::PermissionNotFound
            | Self::RecordNotFound => ErrorKind::NotFound,

            Self::ValidationError
            | Self::InvalidNamespace
            | Self::MissingRequiredField
            | Self::DuplicateRecord => ErrorKind::ValidationError,

            Self::LastTenantOwner
            | Self::SystemRoleImmutable
            | Self::PrerequisiteNotEnabled
            | Self::CrossTenantAssignment => ErrorKind::InvariantViolation,

            Self::DependencyUnavailable | Self::DatabaseError | Self::StoreTimeout => {
                ErrorKind::DependencyUnavailable
            }

            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::CapabilityUnavailable => ErrorKind::CapabilityUnavailable,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InternalError | Self::ConfigurationError => ErrorKind::Internal,
        }
    }

    /// Check if a caller may reasonably retry the operation.
    ///
    /// The engine itself never retries.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DependencyUnavailable | Self::DatabaseError | Self::StoreTimeout
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "not_found",
            1100..=1199 => "validation",
            1200..=1299 => "invariant",
            2000..=2099 => "dependency",
            4000..=4099 => "policy",
            5000..=5099 => "operation",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, missing rows, denied capability)
    Low,
    /// Rejected mutations that protect an invariant
    Medium,
    /// Store failures
    High,
    /// Bugs and misconfiguration
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code.kind() {
            ErrorKind::NotFound
            | ErrorKind::ValidationError
            | ErrorKind::PermissionDenied
            | ErrorKind::CapabilityUnavailable
            | ErrorKind::Cancelled => Self::Low,
            ErrorKind::InvariantViolation => Self::Medium,
            ErrorKind::DependencyUnavailable => Self::High,
            ErrorKind::Internal => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (role, permission, capability key, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Warden.
#[derive(Error, Debug)]
pub struct WardenError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for WardenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl WardenError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a generic not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::entity_not_found(ErrorCode::RecordNotFound, entity_type, entity_id)
    }

    fn entity_not_found(
        code: ErrorCode,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(code, format!("{} not found: {}", entity_type, entity_id))
            .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// A required field was empty.
    pub fn missing_field(field: &'static str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} must not be empty", field),
        )
        .with_context("field", field)
    }

    /// Create an invariant violation with a specific code.
    pub fn invariant(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        debug_assert_eq!(code.kind(), ErrorKind::InvariantViolation);
        crate::telemetry::PolicyMetrics::invariant_violation(code);
        let error = Self::new(code, message);
        error.log();
        error
    }

    /// Create a permission denied error.
    pub fn permission_denied(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    /// Create a dependency unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::DependencyUnavailable,
            "The policy store is unavailable",
            message,
        )
    }

    /// Create a cancellation error for the named operation.
    pub fn cancelled(operation: &'static str) -> Self {
        Self::new(ErrorCode::Cancelled, format!("{} was cancelled", operation))
            .with_context("operation", operation)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the taxonomy bucket.
    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Check if this error is retryable by the caller.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "Policy engine error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Invariant rejected operation"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Request rejected"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "warden_errors_total",
            "code" => self.code.to_string(),
            "kind" => self.code.kind().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl WardenError {
    pub fn capability_not_found(key: impl fmt::Display) -> Self {
        Self::entity_not_found(ErrorCode::CapabilityNotFound, "capability", key.to_string())
    }

    pub fn tenant_not_found(tenant_id: impl fmt::Display) -> Self {
        Self::entity_not_found(ErrorCode::TenantNotFound, "tenant", tenant_id.to_string())
    }

    pub fn user_not_found(user_id: impl fmt::Display) -> Self {
        Self::entity_not_found(ErrorCode::UserNotFound, "user", user_id.to_string())
    }

    pub fn role_not_found(role_id: impl fmt::Display) -> Self {
        Self::entity_not_found(ErrorCode::RoleNotFound, "role", role_id.to_string())
    }

    pub fn permission_not_found(permission: impl fmt::Display) -> Self {
        Self::entity_not_found(
            ErrorCode::PermissionNotFound,
            "permission",
            permission.to_string(),
        )
    }

    pub fn duplicate(entity_type: &'static str, name: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::DuplicateRecord,
            format!("{} already exists: {}", entity_type, name),
        )
        .with_details(ErrorDetails::new().with_entity(entity_type, name.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for WardenError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (
                ErrorCode::RecordNotFound,
                "The requested record was not found",
            ),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    return Self::with_internal(
                        ErrorCode::DuplicateRecord,
                        "A record with this identifier already exists",
                        format!("Constraint violation: {:?}", db_err.constraint()),
                    )
                    .with_source(error);
                }
                (ErrorCode::DatabaseError, "A database error occurred")
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => (
                ErrorCode::DependencyUnavailable,
                "Unable to reach the policy store",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<sqlx::migrate::MigrateError> for WardenError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::with_internal(
            ErrorCode::DatabaseError,
            "Failed to apply schema migrations",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::ValidationError,
            "Failed to process JSON document",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for WardenError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(
            ErrorCode::StoreTimeout,
            "The policy store did not respond in time",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for WardenError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error occurred",
            error.to_string(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
