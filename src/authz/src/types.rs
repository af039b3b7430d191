//! Core authorization types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unique role identifier
pub type RoleId = String;

/// Unique principal identifier (user or service identity)
pub type PrincipalId = String;

/// Permission node identifier
///
/// Ids are allocated by the node store and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A node in the permission tree
///
/// `level` and `path` are derived from the parent chain and maintained by the
/// node store. They have no public setters; a cloned node handed out by the
/// store is a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionNode {
    /// Immutable identifier
    pub id: NodeId,

    /// Unique (among active nodes) permission name, e.g. `user:info:read` or `user:*`
    pub name: String,

    /// Parent node, `None` for top-level nodes
    pub parent_id: Option<NodeId>,

    /// Depth in the tree, top-level nodes are at level 0
    pub(crate) level: u32,

    /// Ancestor ids from the root down to and including this node
    pub(crate) path: Vec<NodeId>,

    /// Pure grouping node
    pub is_category: bool,

    /// True iff `name` ends in `*`
    pub(crate) is_wildcard: bool,

    /// Inactive nodes keep their position but never match
    pub is_active: bool,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Owning module (`user` in `user:info:read`), absent for global nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    /// Resource the permission guards, absent for module-wide nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Action granted. Category nodes legitimately carry no action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PermissionNode {
    /// Depth of this node (0 for top-level nodes)
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Ancestor ids, root first, ending with this node's own id
    pub fn path(&self) -> &[NodeId] {
        &self.path
    }

    /// Path encoded as `/1/2/3`
    pub fn path_string(&self) -> String {
        self.path.iter().map(|id| format!("/{}", id)).collect()
    }

    /// Whether the name is a wildcard pattern
    pub fn is_wildcard(&self) -> bool {
        self.is_wildcard
    }

    /// Whether the node is a top-level node
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Leaf permissions that can be granted and checked on their own
    pub fn is_concrete(&self) -> bool {
        !self.is_category && !self.is_wildcard
    }
}

/// Input for creating a permission node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPermission {
    pub name: String,

    #[serde(default)]
    pub parent_id: Option<NodeId>,

    #[serde(default)]
    pub is_category: bool,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub module: Option<String>,

    #[serde(default)]
    pub resource: Option<String>,

    #[serde(default)]
    pub action: Option<String>,
}

impl NewPermission {
    /// Create a top-level leaf permission
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Place the node under `parent`
    pub fn under(mut self, parent: NodeId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// Mark the node as a grouping category
    pub fn category(mut self) -> Self {
        self.is_category = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Role record, owned by the principal/role domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Role {
    pub fn new(id: impl Into<RoleId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_active: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Grant of a permission node to a role
///
/// Unique on `(role_id, permission_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissionAssociation {
    pub role_id: RoleId,
    pub permission_id: NodeId,
    pub granted_by: PrincipalId,
    pub granted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RolePermissionAssociation {
    /// An association has elapsed once `expires_at <= at`
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| expires_at <= at)
    }
}

/// Authorization decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the permission is held
    pub granted: bool,

    /// Permission or wildcard pattern from the effective set that matched
    pub matched_by: Option<String>,

    /// Role that contributed the matching permission
    pub via_role: Option<RoleId>,
}

impl Decision {
    /// Grant decision
    pub fn grant(matched_by: impl Into<String>, via_role: impl Into<RoleId>) -> Self {
        Self {
            granted: true,
            matched_by: Some(matched_by.into()),
            via_role: Some(via_role.into()),
        }
    }

    /// Deny decision
    pub fn deny() -> Self {
        Self {
            granted: false,
            matched_by: None,
            via_role: None,
        }
    }
}

/// Diagnostic view of a principal's wildcard grants
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WildcardExpansion {
    /// Permission names held directly, wildcards included
    pub original: BTreeSet<String>,

    /// Concrete permissions implied by `original`
    pub expanded: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_permission_builder() {
        let perm = NewPermission::new("user:info")
            .under(NodeId(1))
            .category()
            .with_module("user")
            .with_resource("info");

        assert_eq!(perm.name, "user:info");
        assert_eq!(perm.parent_id, Some(NodeId(1)));
        assert!(perm.is_category);
        assert_eq!(perm.module.as_deref(), Some("user"));
        assert!(perm.action.is_none());
    }

    #[test]
    fn test_association_expiry_is_inclusive() {
        let now = Utc::now();
        let mut assoc = RolePermissionAssociation {
            role_id: "editor".to_string(),
            permission_id: NodeId(7),
            granted_by: "admin".to_string(),
            granted_at: now,
            expires_at: None,
        };
        assert!(!assoc.is_expired(now));

        assoc.expires_at = Some(now);
        assert!(assoc.is_expired(now));

        assoc.expires_at = Some(now + Duration::seconds(10));
        assert!(!assoc.is_expired(now));
    }

    #[test]
    fn test_decision_creation() {
        let decision = Decision::grant("user:*", "editor");
        assert!(decision.granted);
        assert_eq!(decision.matched_by.as_deref(), Some("user:*"));
        assert_eq!(decision.via_role.as_deref(), Some("editor"));

        let deny = Decision::deny();
        assert!(!deny.granted);
        assert!(deny.matched_by.is_none());
    }

    #[test]
    fn test_node_id_serializes_transparently() {
        let json = serde_json::to_string(&NodeId(42)).unwrap();
        assert_eq!(json, "42");
    }
}
