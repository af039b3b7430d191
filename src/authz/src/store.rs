//! Role-permission association storage and principal role lookup
//!
//! Both concerns are external to the engine. The traits here are the access
//! contract; the in-memory implementations back tests, the CLI and embedded
//! use.

use crate::error::Result;
use crate::types::{NodeId, PrincipalId, Role, RoleId, RolePermissionAssociation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use parking_lot::RwLock as ListenerLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Effect of a grant call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantOutcome {
    /// No association existed
    Created,
    /// An expired association was replaced
    Refreshed,
    /// A live association already existed; nothing changed
    Unchanged,
}

/// Role-permission association store
#[async_trait]
pub trait RolePermissionStore: Send + Sync {
    /// Grants `permission_id` to `role_id`
    ///
    /// Idempotent: a live association is left untouched, an expired one is
    /// refreshed with the new metadata.
    async fn grant(
        &self,
        role_id: &str,
        permission_id: NodeId,
        granted_by: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<GrantOutcome>;

    /// Removes an association. Returns whether one existed.
    async fn revoke(&self, role_id: &str, permission_id: NodeId) -> Result<bool>;

    /// Live associations of a role at `at` (`expires_at <= at` excluded)
    async fn associations_for_role(
        &self,
        role_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<RolePermissionAssociation>>;

    /// Every association of a role, expired ones included
    async fn all_associations_for_role(&self, role_id: &str) -> Result<Vec<RolePermissionAssociation>>;

    /// Drops every association referencing any of `permission_ids`
    async fn remove_permissions(&self, permission_ids: &[NodeId]) -> Result<usize>;

    /// Deletes associations that elapsed at or before `at`
    async fn purge_expired(&self, at: DateTime<Utc>) -> Result<usize>;
}

/// Live roles of a principal, each with the instant its assignment lapses
pub type ActiveRoles = HashMap<RoleId, Option<DateTime<Utc>>>;

/// Role assignment write reported by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleAssignmentChange {
    /// Assignments of one principal changed
    Principal(PrincipalId),
    /// A role definition changed, affecting every holder
    Role(RoleId),
}

/// Callback run synchronously after a role assignment write
pub type RoleChangeListener = Arc<dyn Fn(&RoleAssignmentChange) + Send + Sync>;

/// Source of principal role assignments
#[async_trait]
pub trait RoleAssignmentSource: Send + Sync {
    /// Active roles of a principal at `at`, with their assignment expiry
    ///
    /// Unknown principals have no roles. Expired assignments and inactive
    /// roles are excluded.
    async fn active_roles_for_principal(
        &self,
        principal_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ActiveRoles>;

    /// Registers a listener for assignment writes
    ///
    /// Sources that cannot report their writes keep this no-op; their callers
    /// signal changes with `AuthorizationEngine::role_assignments_changed`.
    fn subscribe(&self, _listener: RoleChangeListener) {}
}

type AssociationKey = (RoleId, NodeId);

/// In-memory association store
#[derive(Clone, Default)]
pub struct InMemoryRolePermissionStore {
    associations: Arc<RwLock<HashMap<AssociationKey, RolePermissionAssociation>>>,
}

impl InMemoryRolePermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored associations, expired ones included
    pub async fn len(&self) -> usize {
        self.associations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.associations.read().await.is_empty()
    }
}

#[async_trait]
impl RolePermissionStore for InMemoryRolePermissionStore {
    async fn grant(
        &self,
        role_id: &str,
        permission_id: NodeId,
        granted_by: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<GrantOutcome> {
        let now = Utc::now();
        let mut associations = self.associations.write().await;
        let key = (role_id.to_string(), permission_id);

        let outcome = match associations.get(&key) {
            Some(existing) if !existing.is_expired(now) => return Ok(GrantOutcome::Unchanged),
            Some(_) => GrantOutcome::Refreshed,
            None => GrantOutcome::Created,
        };

        associations.insert(
            key,
            RolePermissionAssociation {
                role_id: role_id.to_string(),
                permission_id,
                granted_by: granted_by.to_string(),
                granted_at: now,
                expires_at,
            },
        );

        Ok(outcome)
    }

    async fn revoke(&self, role_id: &str, permission_id: NodeId) -> Result<bool> {
        let mut associations = self.associations.write().await;
        Ok(associations
            .remove(&(role_id.to_string(), permission_id))
            .is_some())
    }

    async fn associations_for_role(
        &self,
        role_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<RolePermissionAssociation>> {
        let associations = self.associations.read().await;
        let mut live: Vec<RolePermissionAssociation> = associations
            .values()
            .filter(|assoc| assoc.role_id == role_id && !assoc.is_expired(at))
            .cloned()
            .collect();

        live.sort_by_key(|assoc| assoc.permission_id);
        Ok(live)
    }

    async fn all_associations_for_role(&self, role_id: &str) -> Result<Vec<RolePermissionAssociation>> {
        let associations = self.associations.read().await;
        let mut all: Vec<RolePermissionAssociation> = associations
            .values()
            .filter(|assoc| assoc.role_id == role_id)
            .cloned()
            .collect();

        all.sort_by_key(|assoc| assoc.permission_id);
        Ok(all)
    }

    async fn remove_permissions(&self, permission_ids: &[NodeId]) -> Result<usize> {
        let doomed: HashSet<NodeId> = permission_ids.iter().copied().collect();
        let mut associations = self.associations.write().await;
        let before = associations.len();
        associations.retain(|(_, permission_id), _| !doomed.contains(permission_id));
        Ok(before - associations.len())
    }

    async fn purge_expired(&self, at: DateTime<Utc>) -> Result<usize> {
        let mut associations = self.associations.write().await;
        let before = associations.len();
        associations.retain(|_, assoc| !assoc.is_expired(at));
        Ok(before - associations.len())
    }
}

/// Role assignment of a principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role_id: RoleId,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct AssignmentState {
    roles: HashMap<RoleId, Role>,
    assignments: HashMap<PrincipalId, HashMap<RoleId, RoleAssignment>>,
}

/// In-memory role registry and principal role assignments
///
/// Assignments referencing a role that was never registered are treated as
/// active; registering the role later lets it be deactivated. Every write
/// notifies subscribed listeners once the new state is visible to readers.
#[derive(Clone, Default)]
pub struct InMemoryRoleAssignments {
    state: Arc<RwLock<AssignmentState>>,
    listeners: Arc<ListenerLock<Vec<RoleChangeListener>>>,
}

impl InMemoryRoleAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, change: RoleAssignmentChange) {
        for listener in self.listeners.read().iter() {
            listener(&change);
        }
    }

    /// Registers or replaces a role
    pub async fn upsert_role(&self, role: Role) {
        let role_id = role.id.clone();
        self.state.write().await.roles.insert(role_id.clone(), role);
        self.notify(RoleAssignmentChange::Role(role_id));
    }

    /// Activates or deactivates a registered role. Returns false if unknown.
    pub async fn set_role_active(&self, role_id: &str, active: bool) -> bool {
        let found = match self.state.write().await.roles.get_mut(role_id) {
            Some(role) => {
                role.is_active = active;
                true
            }
            None => false,
        };

        if found {
            self.notify(RoleAssignmentChange::Role(role_id.to_string()));
        }
        found
    }

    /// Assigns a role to a principal, replacing any previous expiry
    pub async fn assign(
        &self,
        principal_id: &str,
        role_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.state
            .write()
            .await
            .assignments
            .entry(principal_id.to_string())
            .or_default()
            .insert(
                role_id.to_string(),
                RoleAssignment {
                    role_id: role_id.to_string(),
                    expires_at,
                },
            );
        self.notify(RoleAssignmentChange::Principal(principal_id.to_string()));
    }

    /// Removes a role from a principal. Returns whether it was assigned.
    pub async fn unassign(&self, principal_id: &str, role_id: &str) -> bool {
        let removed = match self.state.write().await.assignments.get_mut(principal_id) {
            Some(roles) => roles.remove(role_id).is_some(),
            None => false,
        };

        if removed {
            self.notify(RoleAssignmentChange::Principal(principal_id.to_string()));
        }
        removed
    }

    /// Principals holding `role_id`, regardless of expiry
    pub async fn principals_with_role(&self, role_id: &str) -> Vec<PrincipalId> {
        let state = self.state.read().await;
        let mut principals: Vec<PrincipalId> = state
            .assignments
            .iter()
            .filter(|(_, roles)| roles.contains_key(role_id))
            .map(|(principal, _)| principal.clone())
            .collect();
        principals.sort();
        principals
    }
}

#[async_trait]
impl RoleAssignmentSource for InMemoryRoleAssignments {
    async fn active_roles_for_principal(
        &self,
        principal_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ActiveRoles> {
        let state = self.state.read().await;

        let Some(assignments) = state.assignments.get(principal_id) else {
            return Ok(ActiveRoles::new());
        };

        Ok(assignments
            .values()
            .filter(|assignment| assignment.expires_at.map_or(true, |expires_at| expires_at > at))
            .filter(|assignment| {
                state
                    .roles
                    .get(&assignment.role_id)
                    .map_or(true, |role| role.is_active)
            })
            .map(|assignment| (assignment.role_id.clone(), assignment.expires_at))
            .collect())
    }

    fn subscribe(&self, listener: RoleChangeListener) {
        self.listeners.write().push(listener);
    }
}
