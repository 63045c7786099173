//! The cascading capability model.
//!
//! A capability (an MFA method, an OAuth feature, ...) is usable only when all
//! four layers agree:
//!
//! 1. **System**: the platform supports it ([`SystemCapability`])
//! 2. **Tenant assignment**: a system administrator made it available to the
//!    tenant ([`TenantCapabilityAssignment`])
//! 3. **Tenant feature**: the tenant's administrator turned it on
//!    ([`TenantFeatureEnablement`])
//! 4. **User enrollment**: the user enrolled ([`UserCapabilityState`]),
//!    consulted only when a user is supplied
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::capability::CapabilityEvaluator;
//!
//! let result = evaluator.evaluate(&cancel, tenant_id, &key, Some(user_id)).await?;
//! if !result.effective {
//!     println!("denied at {:?}", result.denial);
//! }
//! ```

pub mod evaluator;
pub mod models;
pub mod service;

pub use evaluator::{CapabilityEvaluator, DenialReason, EvaluationResult, ValueSource};
pub use models::{
    OrphanReport, SystemCapability, SystemCapabilityUpdate, TenantCapabilityAssignment,
    TenantFeatureEnablement, UserCapabilityState,
};
pub use service::CapabilityService;
