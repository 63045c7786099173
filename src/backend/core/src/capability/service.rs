//! Administrative mutations and reads over the four capability layers.
//!
//! Every write checks its prerequisite layers inside the same read-write
//! transaction that performs the write. The store keeps those prerequisite
//! rows stable until commit: the memory store holds its exclusive state lock,
//! and the Postgres adapter share-locks every row it reads, so a concurrent
//! revoke or disable waits for the write to finish.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::models::{
    OrphanReport, SystemCapability, SystemCapabilityUpdate, TenantCapabilityAssignment,
    TenantFeatureEnablement, UserCapabilityState,
};
use crate::error::{ErrorCode, Result, WardenError};
use crate::store::{OperationGuard, Store, Transaction, TransactionMode};
use crate::types::{Actor, CapabilityKey, TenantId, UserId};

/// The first layer above the user that keeps `key` from being usable in
/// `tenant_id`, or None when the tenant has it fully enabled.
///
/// Matches what [`CapabilityService::find_orphans`] and the evaluator treat
/// as enabled, so a fresh enrollment is never reported as an orphan.
async fn first_disabled_tenant_layer(
    tx: &mut dyn Transaction,
    tenant_id: TenantId,
    key: &CapabilityKey,
) -> Result<Option<&'static str>> {
    if !tx.get_system_capability(key).await?.is_some_and(|c| c.enabled) {
        return Ok(Some("system"));
    }
    if !tx
        .get_tenant_assignment(tenant_id, key)
        .await?
        .is_some_and(|a| a.enabled)
    {
        return Ok(Some("assignment"));
    }
    if !tx
        .get_tenant_feature(tenant_id, key)
        .await?
        .is_some_and(|f| f.enabled)
    {
        return Ok(Some("feature"));
    }
    Ok(None)
}

/// Capability layer CRUD with write-time prerequisite checks.
#[derive(Clone)]
pub struct CapabilityService {
    store: Arc<dyn Store>,
    guard: OperationGuard,
}

impl std::fmt::Debug for CapabilityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityService")
            .field("store", &self.store.name())
            .finish()
    }
}

async fn require_tenant(tx: &mut dyn Transaction, tenant_id: TenantId) -> Result<()> {
    if tx.tenant_exists(tenant_id).await? {
        Ok(())
    } else {
        Err(WardenError::tenant_not_found(tenant_id))
    }
}

async fn require_user(tx: &mut dyn Transaction, user_id: UserId) -> Result<TenantId> {
    tx.user_tenant(user_id)
        .await?
        .ok_or_else(|| WardenError::user_not_found(user_id))
}

impl CapabilityService {
    pub fn new(store: Arc<dyn Store>, guard: OperationGuard) -> Self {
        Self { store, guard }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // System registry
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a capability to the system registry.
    #[instrument(skip_all, fields(capability = %capability.capability_key, actor = %actor.id))]
    pub async fn register_system_capability(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        capability: SystemCapability,
    ) -> Result<SystemCapability> {
        actor.ensure_system()?;
        self.guard
            .run(cancel, "register_system_capability", self.register_once(capability))
            .await
    }

    async fn register_once(&self, capability: SystemCapability) -> Result<SystemCapability> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        tx.insert_system_capability(&capability).await?;
        tx.commit().await?;
        info!(enabled = capability.enabled, "System capability registered");
        Ok(capability)
    }

    /// Partially update a registry entry.
    #[instrument(skip_all, fields(capability = %key, actor = %actor.id))]
    pub async fn update_system_capability(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        key: &CapabilityKey,
        update: SystemCapabilityUpdate,
    ) -> Result<SystemCapability> {
        actor.ensure_system()?;
        self.guard
            .run(cancel, "update_system_capability", self.update_system_once(key, update))
            .await
    }

    async fn update_system_once(
        &self,
        key: &CapabilityKey,
        update: SystemCapabilityUpdate,
    ) -> Result<SystemCapability> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let mut capability = tx
            .lock_system_capability(key)
            .await?
            .ok_or_else(|| WardenError::capability_not_found(key))?;
        update.apply(&mut capability);
        tx.update_system_capability(&capability).await?;
        tx.commit().await?;
        info!(enabled = capability.enabled, "System capability updated");
        Ok(capability)
    }

    pub async fn get_system_capability(
        &self,
        cancel: &CancellationToken,
        key: &CapabilityKey,
    ) -> Result<SystemCapability> {
        self.guard
            .run(cancel, "get_system_capability", self.get_system_once(key))
            .await
    }

    async fn get_system_once(&self, key: &CapabilityKey) -> Result<SystemCapability> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;
        tx.get_system_capability(key)
            .await?
            .ok_or_else(|| WardenError::capability_not_found(key))
    }

    pub async fn list_system_capabilities(&self, cancel: &CancellationToken) -> Result<Vec<SystemCapability>> {
        self.guard
            .run(cancel, "list_system_capabilities", self.list_system_once())
            .await
    }

    async fn list_system_once(&self) -> Result<Vec<SystemCapability>> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;
        tx.list_system_capabilities().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Layer 2: tenant assignment
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant (or update) a tenant's access to a supported capability.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, capability = %key, actor = %actor.id))]
    pub async fn assign_tenant_capability(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        tenant_id: TenantId,
        key: &CapabilityKey,
        enabled: bool,
        value: Option<Value>,
    ) -> Result<TenantCapabilityAssignment> {
        actor.ensure_system()?;
        let assignment = TenantCapabilityAssignment {
            tenant_id,
            capability_key: key.clone(),
            enabled,
            value,
            configured_by: actor.id.clone(),
            configured_at: Utc::now(),
        };
        self.guard
            .run(cancel, "assign_tenant_capability", self.assign_once(assignment))
            .await
    }

    async fn assign_once(&self, assignment: TenantCapabilityAssignment) -> Result<TenantCapabilityAssignment> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        require_tenant(tx.as_mut(), assignment.tenant_id).await?;

        let supported = tx
            .get_system_capability(&assignment.capability_key)
            .await?
            .is_some_and(|c| c.enabled);
        if !supported {
            return Err(WardenError::capability_not_found(&assignment.capability_key));
        }

        tx.upsert_tenant_assignment(&assignment).await?;
        tx.commit().await?;
        info!(enabled = assignment.enabled, "Tenant capability assigned");
        Ok(assignment)
    }

    /// Remove a tenant's assignment.
    ///
    /// Feature and enrollment rows are left in place; they become inert and
    /// show up in [`find_orphans`](Self::find_orphans).
    #[instrument(skip_all, fields(tenant_id = %tenant_id, capability = %key, actor = %actor.id))]
    pub async fn revoke_tenant_capability(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        tenant_id: TenantId,
        key: &CapabilityKey,
    ) -> Result<bool> {
        actor.ensure_system()?;
        self.guard
            .run(cancel, "revoke_tenant_capability", self.revoke_once(tenant_id, key))
            .await
    }

    async fn revoke_once(&self, tenant_id: TenantId, key: &CapabilityKey) -> Result<bool> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let removed = tx.delete_tenant_assignment(tenant_id, key).await?;
        tx.commit().await?;
        info!(removed, "Tenant capability revoked");
        Ok(removed)
    }

    pub async fn list_tenant_capabilities(
        &self,
        cancel: &CancellationToken,
        tenant_id: TenantId,
    ) -> Result<Vec<TenantCapabilityAssignment>> {
        self.guard
            .run(cancel, "list_tenant_capabilities", self.list_assignments_once(tenant_id))
            .await
    }

    async fn list_assignments_once(&self, tenant_id: TenantId) -> Result<Vec<TenantCapabilityAssignment>> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;
        tx.list_tenant_assignments(tenant_id).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Layer 3: tenant feature
    // ─────────────────────────────────────────────────────────────────────────

    /// Turn on an assigned capability for a tenant.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, capability = %key, actor = %actor.id))]
    pub async fn enable_tenant_feature(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        tenant_id: TenantId,
        key: &CapabilityKey,
        configuration: Option<Value>,
    ) -> Result<TenantFeatureEnablement> {
        actor.ensure_can_act_on(Some(tenant_id))?;
        let feature = TenantFeatureEnablement {
            tenant_id,
            capability_key: key.clone(),
            enabled: true,
            configuration,
            enabled_by: actor.id.clone(),
            enabled_at: Utc::now(),
        };
        self.guard
            .run(cancel, "enable_tenant_feature", self.enable_once(feature))
            .await
    }

    async fn enable_once(&self, feature: TenantFeatureEnablement) -> Result<TenantFeatureEnablement> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let allowed = tx
            .get_tenant_assignment(feature.tenant_id, &feature.capability_key)
            .await?
            .is_some_and(|a| a.enabled);
        if !allowed {
            return Err(WardenError::invariant(
                ErrorCode::PrerequisiteNotEnabled,
                format!(
                    "capability '{}' is not assigned to tenant {}",
                    feature.capability_key, feature.tenant_id
                ),
            ));
        }

        tx.upsert_tenant_feature(&feature).await?;
        tx.commit().await?;
        info!("Tenant feature enabled");
        Ok(feature)
    }

    /// Turn a feature off. Its configuration is discarded.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, capability = %key, actor = %actor.id))]
    pub async fn disable_tenant_feature(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        tenant_id: TenantId,
        key: &CapabilityKey,
    ) -> Result<bool> {
        actor.ensure_can_act_on(Some(tenant_id))?;
        self.guard
            .run(cancel, "disable_tenant_feature", self.disable_once(tenant_id, key))
            .await
    }

    async fn disable_once(&self, tenant_id: TenantId, key: &CapabilityKey) -> Result<bool> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let removed = tx.delete_tenant_feature(tenant_id, key).await?;
        tx.commit().await?;
        info!(removed, "Tenant feature disabled");
        Ok(removed)
    }

    pub async fn list_tenant_features(
        &self,
        cancel: &CancellationToken,
        tenant_id: TenantId,
    ) -> Result<Vec<TenantFeatureEnablement>> {
        self.guard
            .run(cancel, "list_tenant_features", self.list_features_once(tenant_id))
            .await
    }

    async fn list_features_once(&self, tenant_id: TenantId) -> Result<Vec<TenantFeatureEnablement>> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;
        tx.list_tenant_features(tenant_id).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Layer 4: user enrollment
    // ─────────────────────────────────────────────────────────────────────────

    /// Enroll a user in a capability their tenant has enabled.
    #[instrument(skip_all, fields(user_id = %user_id, capability = %key, actor = %actor.id))]
    pub async fn enroll_user(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        user_id: UserId,
        key: &CapabilityKey,
        state_data: Value,
    ) -> Result<UserCapabilityState> {
        let state = UserCapabilityState {
            user_id,
            capability_key: key.clone(),
            enrolled: true,
            state_data,
            enrolled_at: Utc::now(),
            last_used_at: None,
        };
        self.guard
            .run(cancel, "enroll_user", self.enroll_once(actor, state))
            .await
    }

    async fn enroll_once(&self, actor: &Actor, state: UserCapabilityState) -> Result<UserCapabilityState> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let tenant_id = require_user(tx.as_mut(), state.user_id).await?;
        actor.ensure_can_act_on(Some(tenant_id))?;

        if let Some(layer) = first_disabled_tenant_layer(tx.as_mut(), tenant_id, &state.capability_key).await? {
            return Err(WardenError::invariant(
                ErrorCode::PrerequisiteNotEnabled,
                format!(
                    "capability '{}' is not enabled for tenant {}",
                    state.capability_key, tenant_id
                ),
            )
            .with_context("layer", layer));
        }

        tx.upsert_user_state(&state).await?;
        tx.commit().await?;
        info!(tenant_id = %tenant_id, "User enrolled");
        Ok(state)
    }

    /// Remove a user's enrollment row.
    ///
    /// Secrets referenced from `state_data` belong to the subsystem that
    /// issued them and are not touched here.
    #[instrument(skip_all, fields(user_id = %user_id, capability = %key, actor = %actor.id))]
    pub async fn unenroll_user(
        &self,
        cancel: &CancellationToken,
        actor: &Actor,
        user_id: UserId,
        key: &CapabilityKey,
    ) -> Result<bool> {
        self.guard
            .run(cancel, "unenroll_user", self.unenroll_once(actor, user_id, key))
            .await
    }

    async fn unenroll_once(&self, actor: &Actor, user_id: UserId, key: &CapabilityKey) -> Result<bool> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let tenant_id = require_user(tx.as_mut(), user_id).await?;
        actor.ensure_can_act_on(Some(tenant_id))?;

        let removed = tx.delete_user_state(user_id, key).await?;
        tx.commit().await?;
        if removed {
            warn!("User unenrolled; externally held secrets were not revoked");
        }
        Ok(removed)
    }

    /// Stamp `last_used_at` after a successful use of the capability.
    pub async fn record_capability_use(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
        key: &CapabilityKey,
    ) -> Result<UserCapabilityState> {
        self.guard
            .run(cancel, "record_capability_use", self.record_use_once(user_id, key))
            .await
    }

    async fn record_use_once(&self, user_id: UserId, key: &CapabilityKey) -> Result<UserCapabilityState> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite).await?;
        let mut state = tx
            .get_user_state(user_id, key)
            .await?
            .filter(|s| s.enrolled)
            .ok_or_else(|| WardenError::not_found("enrollment", format!("{}/{}", user_id, key)))?;
        state.last_used_at = Some(Utc::now());
        tx.upsert_user_state(&state).await?;
        tx.commit().await?;
        debug!(user_id = %user_id, capability = %key, "Capability use recorded");
        Ok(state)
    }

    pub async fn list_user_capabilities(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
    ) -> Result<Vec<UserCapabilityState>> {
        self.guard
            .run(cancel, "list_user_capabilities", self.list_user_states_once(user_id))
            .await
    }

    async fn list_user_states_once(&self, user_id: UserId) -> Result<Vec<UserCapabilityState>> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;
        require_user(tx.as_mut(), user_id).await?;
        tx.list_user_states(user_id).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Orphans
    // ─────────────────────────────────────────────────────────────────────────

    /// Report rows left behind by a revoke or a disable.
    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn find_orphans(&self, cancel: &CancellationToken, tenant_id: TenantId) -> Result<OrphanReport> {
        self.guard
            .run(cancel, "find_orphans", self.find_orphans_once(tenant_id))
            .await
    }

    async fn find_orphans_once(&self, tenant_id: TenantId) -> Result<OrphanReport> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly).await?;

        let allowed: HashMap<CapabilityKey, bool> = tx
            .list_tenant_assignments(tenant_id)
            .await?
            .into_iter()
            .map(|a| (a.capability_key, a.enabled))
            .collect();
        let features = tx.list_tenant_features(tenant_id).await?;
        let is_allowed = |key: &CapabilityKey| allowed.get(key).copied().unwrap_or(false);

        // A feature without an allowed assignment does not count as enabled.
        let enabled: HashMap<&CapabilityKey, bool> = features
            .iter()
            .map(|f| (&f.capability_key, f.enabled && is_allowed(&f.capability_key)))
            .collect();

        let orphaned_features = features
            .iter()
            .filter(|f| f.enabled && !is_allowed(&f.capability_key))
            .map(|f| f.capability_key.clone())
            .collect();

        let orphaned_enrollments = tx
            .list_tenant_user_states(tenant_id)
            .await?
            .into_iter()
            .filter(|s| s.enrolled && !enabled.get(&s.capability_key).copied().unwrap_or(false))
            .map(|s| (s.user_id, s.capability_key))
            .collect();

        let report = OrphanReport {
            tenant_id: Some(tenant_id),
            orphaned_features,
            orphaned_enrollments,
        };
        if !report.is_empty() {
            warn!(
                features = report.orphaned_features.len(),
                enrollments = report.orphaned_enrollments.len(),
                "Orphaned capability rows found"
            );
        }
        Ok(report)
    }
}
