//! Authorization checker and tree/association write facade
//!
//! Orchestrates effective-set resolution, wildcard matching and caching.
//! Every write goes through the engine so the cache is invalidated before
//! the write call returns.

pub mod cache;
pub mod decision;
pub mod metrics;

pub use cache::{CacheConfig, CacheStats, PermissionCache};
pub use decision::EffectivePermissions;
pub use metrics::{EngineMetrics, MetricsCollector};

use crate::config::EngineConfig;
use crate::error::{AuthzError, Result};
use crate::store::{
    GrantOutcome, RoleAssignmentChange, RoleAssignmentSource, RolePermissionStore,
};
use crate::tree::{IntegrityViolation, PermissionTree, TreeNode};
use crate::types::{
    Decision, NewPermission, NodeId, PermissionNode, RoleId, RolePermissionAssociation,
    WildcardExpansion,
};
use crate::wildcard::{self, WildcardMatcher};

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Hierarchical permission authorization engine
///
/// # Architecture
///
/// ```text
/// has_permission → [cache] ─hit──────────────────────────┐
///                     │ miss                              ↓
///                     └→ RoleAssignmentSource → RolePermissionStore
///                          → PermissionTree (grantable names) → EffectivePermissions → Decision
/// ```
pub struct AuthorizationEngine {
    tree: Arc<PermissionTree>,
    associations: Arc<dyn RolePermissionStore>,
    roles: Arc<dyn RoleAssignmentSource>,
    cache: Arc<PermissionCache>,
    /// Serializes writes that pair a tree lookup with an association write
    association_writes: Mutex<()>,
    metrics: Option<Arc<MetricsCollector>>,
    matcher: WildcardMatcher,
    config: EngineConfig,
}

impl AuthorizationEngine {
    /// Create an engine over an empty permission tree
    pub fn new(
        config: EngineConfig,
        associations: Arc<dyn RolePermissionStore>,
        roles: Arc<dyn RoleAssignmentSource>,
    ) -> Result<Self> {
        let matcher = WildcardMatcher::new(config.separator);
        let tree = Arc::new(PermissionTree::with_matcher(matcher));
        Self::with_tree(config, tree, associations, roles)
    }

    /// Create an engine over an existing tree
    pub fn with_tree(
        config: EngineConfig,
        tree: Arc<PermissionTree>,
        associations: Arc<dyn RolePermissionStore>,
        roles: Arc<dyn RoleAssignmentSource>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = config
            .enable_metrics
            .then(|| Arc::new(MetricsCollector::new()));

        let cache = Arc::new(PermissionCache::new(config.cache.clone()));
        let hook = Arc::downgrade(&cache);
        roles.subscribe(Arc::new(move |change: &RoleAssignmentChange| {
            if let Some(cache) = hook.upgrade() {
                match change {
                    RoleAssignmentChange::Principal(principal_id) => cache.invalidate(principal_id),
                    RoleAssignmentChange::Role(_) => cache.invalidate_all(),
                }
            }
        }));

        info!(
            "AuthorizationEngine initialized with cache={}, ttl={}s, metrics={}",
            config.cache.enabled, config.cache.ttl_secs, config.enable_metrics
        );

        Ok(Self {
            tree,
            associations,
            roles,
            cache,
            association_writes: Mutex::new(()),
            metrics,
            matcher: WildcardMatcher::new(config.separator),
            config,
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Wildcard matcher configured with the engine's separator
    pub fn matcher(&self) -> &WildcardMatcher {
        &self.matcher
    }

    // ------------------------------------------------------------------
    // Authorization checks
    // ------------------------------------------------------------------

    /// Decides whether `principal_id` holds `permission`
    ///
    /// Unknown principals are denied, never rejected.
    pub async fn has_permission(&self, principal_id: &str, permission: &str) -> Result<Decision> {
        let start = Instant::now();
        let effective = self.effective_permissions(principal_id).await?;
        let decision = effective.decide(permission, &self.matcher);

        debug!(
            principal = %principal_id,
            permission = %permission,
            granted = decision.granted,
            matched_by = ?decision.matched_by,
            "Permission check"
        );

        self.record(&[decision.granted], start);
        Ok(decision)
    }

    /// Checks several permissions against one effective-set resolution
    pub async fn batch_check<S: AsRef<str>>(
        &self,
        principal_id: &str,
        permissions: &[S],
    ) -> Result<BTreeMap<String, Decision>> {
        let start = Instant::now();
        let effective = self.effective_permissions(principal_id).await?;

        let decisions: BTreeMap<String, Decision> = permissions
            .iter()
            .map(|permission| {
                let permission = permission.as_ref();
                (
                    permission.to_string(),
                    effective.decide(permission, &self.matcher),
                )
            })
            .collect();

        let outcomes: Vec<bool> = decisions.values().map(|decision| decision.granted).collect();
        self.record(&outcomes, start);

        debug!(
            principal = %principal_id,
            checked = decisions.len(),
            "Batch permission check"
        );
        Ok(decisions)
    }

    /// Effective permission set of a principal, from cache when fresh
    pub async fn effective_permissions(&self, principal_id: &str) -> Result<Arc<EffectivePermissions>> {
        if let Some(cached) = self.cache.get(principal_id) {
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_hit();
            }
            debug!(principal = %principal_id, "Cache hit for effective permissions");
            return Ok(cached);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_cache_miss();
        }

        let generation = self.cache.generation();
        let effective = Arc::new(self.resolve_effective(principal_id, Utc::now()).await?);

        if !self.cache.put(principal_id, effective.clone(), generation) && self.cache.is_enabled() {
            debug!(principal = %principal_id, "Discarded effective set resolved before an invalidation");
        }

        Ok(effective)
    }

    /// Resolves a principal's effective set from the stores, bypassing the cache
    ///
    /// The set is valid until the earliest expiry among the role assignments
    /// and associations that fed it.
    async fn resolve_effective(&self, principal_id: &str, at: DateTime<Utc>) -> Result<EffectivePermissions> {
        let mut roles: Vec<(RoleId, Option<DateTime<Utc>>)> = self
            .roles
            .active_roles_for_principal(principal_id, at)
            .await?
            .into_iter()
            .collect();
        roles.sort();

        let mut effective = EffectivePermissions::new();
        for (role, role_expires_at) in &roles {
            if let Some(expires_at) = role_expires_at {
                effective.note_expiry(*expires_at);
            }

            let associations = self.associations.associations_for_role(role, at).await?;
            let ids: Vec<NodeId> = associations.iter().map(|assoc| assoc.permission_id).collect();
            let names = self.tree.grantable_names(&ids).await;

            for assoc in &associations {
                if let Some(name) = names.get(&assoc.permission_id) {
                    effective.insert(name.clone(), role.clone());
                    if let Some(expires_at) = assoc.expires_at {
                        effective.note_expiry(expires_at);
                    }
                }
            }
        }

        debug!(
            principal = %principal_id,
            roles = roles.len(),
            permissions = effective.len(),
            "Resolved effective permissions"
        );

        Ok(effective.finish(&self.matcher))
    }

    /// Diagnostic view resolving each held wildcard to the concrete
    /// permissions it implies
    ///
    /// Walks the whole tree; not meant for the authorization hot path.
    pub async fn expand_wildcards(&self, principal_id: &str) -> Result<WildcardExpansion> {
        let effective = self.resolve_effective(principal_id, Utc::now()).await?;
        let original = effective.names();

        let wildcards: Vec<&String> = original
            .iter()
            .filter(|name| wildcard::is_wildcard(name))
            .collect();

        let mut expanded: BTreeSet<String> = original
            .iter()
            .filter(|name| !wildcard::is_wildcard(name))
            .cloned()
            .collect();

        for concrete in self.tree.concrete_names().await {
            if wildcards
                .iter()
                .any(|pattern| self.matcher.matches(pattern, &concrete))
            {
                expanded.insert(concrete);
            }
        }

        Ok(WildcardExpansion { original, expanded })
    }

    // ------------------------------------------------------------------
    // Tree management
    // ------------------------------------------------------------------

    /// Create a permission node
    pub async fn create_node(&self, new: NewPermission) -> Result<PermissionNode> {
        let node = self.tree.create_node(new).await?;
        self.invalidate_all();
        Ok(node)
    }

    /// Re-parent a node; see [`PermissionTree::move_node`]
    pub async fn move_node(&self, id: NodeId, new_parent: Option<NodeId>) -> Result<Vec<NodeId>> {
        let recomputed = self.tree.move_node(id, new_parent).await?;
        self.invalidate_all();
        Ok(recomputed)
    }

    /// Delete a node (and with `cascade` its subtree) together with every
    /// association referencing a removed node
    pub async fn delete_node(&self, id: NodeId, cascade: bool) -> Result<Vec<NodeId>> {
        let (removed, dropped) = {
            let _writes = self.association_writes.lock().await;
            let removed = self.tree.delete_node(id, cascade).await?;
            let dropped = self.associations.remove_permissions(&removed).await?;
            (removed, dropped)
        };
        self.invalidate_all();

        info!(node = %id, nodes = removed.len(), associations = dropped, "Removed permission subtree");
        Ok(removed)
    }

    /// Rename a node
    pub async fn rename_node(&self, id: NodeId, new_name: impl Into<String>) -> Result<PermissionNode> {
        let node = self.tree.rename_node(id, new_name).await?;
        self.invalidate_all();
        Ok(node)
    }

    /// Soft (de)activate a node
    pub async fn set_node_active(&self, id: NodeId, active: bool) -> Result<PermissionNode> {
        let node = self.tree.set_active(id, active).await?;
        self.invalidate_all();
        Ok(node)
    }

    /// Flag or unflag a node as a category
    pub async fn set_node_category(&self, id: NodeId, is_category: bool) -> Result<PermissionNode> {
        let node = self.tree.set_category(id, is_category).await?;
        self.invalidate_all();
        Ok(node)
    }

    pub async fn get_node(&self, id: NodeId) -> Option<PermissionNode> {
        self.tree.get_node(id).await
    }

    /// Active node by name
    pub async fn find_node(&self, name: &str) -> Option<PermissionNode> {
        self.tree.find_by_name(name).await
    }

    pub async fn list_nodes(&self, include_inactive: bool) -> Vec<PermissionNode> {
        self.tree.list_nodes(include_inactive).await
    }

    pub async fn children(&self, id: NodeId) -> Result<Vec<PermissionNode>> {
        self.tree.children(id).await
    }

    pub async fn get_ancestors(&self, id: NodeId) -> Result<Vec<PermissionNode>> {
        self.tree.get_ancestors(id).await
    }

    pub async fn get_descendants(&self, id: NodeId) -> Result<Vec<PermissionNode>> {
        self.tree.get_descendants(id).await
    }

    /// Nested view of the active tree, optionally rooted at `root`
    pub async fn get_tree(&self, root: Option<NodeId>) -> Result<Vec<TreeNode>> {
        self.tree.get_tree(root).await
    }

    pub async fn verify_integrity(&self) -> Vec<IntegrityViolation> {
        self.tree.verify_integrity().await
    }

    // ------------------------------------------------------------------
    // Association management
    // ------------------------------------------------------------------

    /// Grant a permission node to a role
    ///
    /// Re-granting a live association is a no-op; an expired one is refreshed.
    pub async fn grant(
        &self,
        role_id: &str,
        permission_id: NodeId,
        granted_by: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<GrantOutcome> {
        let outcome = {
            let _writes = self.association_writes.lock().await;
            if !self.tree.contains(permission_id).await {
                return Err(AuthzError::NodeNotFound(permission_id));
            }

            self.associations
                .grant(role_id, permission_id, granted_by, expires_at)
                .await?
        };

        if outcome != GrantOutcome::Unchanged {
            self.invalidate_all();
        }

        info!(role = %role_id, permission = %permission_id, ?outcome, "Granted permission");
        Ok(outcome)
    }

    /// Revoke a permission from a role; silently succeeds if not granted
    pub async fn revoke(&self, role_id: &str, permission_id: NodeId) -> Result<bool> {
        let removed = self.associations.revoke(role_id, permission_id).await?;

        if removed {
            self.invalidate_all();
            info!(role = %role_id, permission = %permission_id, "Revoked permission");
        }

        Ok(removed)
    }

    /// Active permission nodes granted to a role at `at`
    pub async fn get_permissions_for_role(
        &self,
        role_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<PermissionNode>> {
        let associations = self.associations.associations_for_role(role_id, at).await?;
        let ids: Vec<NodeId> = associations.iter().map(|assoc| assoc.permission_id).collect();
        Ok(self.tree.active_nodes(&ids).await)
    }

    /// Grant records of a role, expired ones included
    pub async fn get_role_associations(&self, role_id: &str) -> Result<Vec<RolePermissionAssociation>> {
        self.associations.all_associations_for_role(role_id).await
    }

    /// Deletes associations that elapsed at or before `at`
    pub async fn purge_expired_grants(&self, at: DateTime<Utc>) -> Result<usize> {
        let purged = self.associations.purge_expired(at).await?;
        if purged > 0 {
            self.invalidate_all();
            info!(purged, "Purged expired grants");
        }
        Ok(purged)
    }

    // ------------------------------------------------------------------
    // Cache control
    // ------------------------------------------------------------------

    /// Signals that a principal's role assignments changed
    pub fn role_assignments_changed(&self, principal_id: &str) {
        self.cache.invalidate(principal_id);
    }

    /// Drops every cached effective set
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Metrics snapshot, if metrics are enabled
    pub fn metrics(&self) -> Option<EngineMetrics> {
        self.metrics.as_ref().map(|metrics| metrics.get_metrics())
    }

    fn record(&self, outcomes: &[bool], start: Instant) {
        if let Some(metrics) = &self.metrics {
            for granted in outcomes {
                metrics.record_decision(*granted);
            }
            metrics.record_latency(start.elapsed());
        }
    }
}
