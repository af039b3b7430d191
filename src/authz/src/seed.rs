//! Declarative seed documents
//!
//! A seed describes a permission tree, roles, grants and principal role
//! assignments in TOML. Nodes reference their parent by name and are created
//! in document order, so a parent must appear before its children.
//!
//! ```toml
//! [[permissions]]
//! name = "user"
//! category = true
//!
//! [[permissions]]
//! name = "user:*"
//! parent = "user"
//!
//! [[roles]]
//! id = "editor"
//! name = "Editor"
//!
//! [[grants]]
//! role = "editor"
//! permission = "user:*"
//!
//! [[principals]]
//! id = "alice"
//! roles = ["editor"]
//! ```

use crate::engine::AuthorizationEngine;
use crate::error::{AuthzError, Result};
use crate::store::InMemoryRoleAssignments;
use crate::types::{NewPermission, NodeId, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedDocument {
    #[serde(default)]
    pub permissions: Vec<SeedPermission>,
    #[serde(default)]
    pub roles: Vec<SeedRole>,
    #[serde(default)]
    pub grants: Vec<SeedGrant>,
    #[serde(default)]
    pub principals: Vec<SeedPrincipal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPermission {
    pub name: String,
    /// Name of an earlier permission in the document
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub category: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRole {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedGrant {
    pub role: String,
    pub permission: String,
    #[serde(default = "default_granted_by")]
    pub granted_by: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPrincipal {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

fn default_active() -> bool {
    true
}

fn default_granted_by() -> String {
    "seed".to_string()
}

/// Counts of what a seed created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub permissions: usize,
    pub roles: usize,
    pub grants: usize,
    pub principals: usize,
}

impl SeedDocument {
    /// Load a seed document from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
            .map_err(|e| AuthzError::Seed(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| AuthzError::Seed(format!("Failed to parse seed: {}", e)))
    }

    /// Creates every node, role, grant and assignment in the document
    ///
    /// Stops at the first failure; whatever was applied before stays applied.
    pub async fn apply(
        &self,
        engine: &AuthorizationEngine,
        assignments: &InMemoryRoleAssignments,
    ) -> Result<SeedSummary> {
        let mut ids: HashMap<&str, NodeId> = HashMap::new();

        for permission in &self.permissions {
            let mut new = NewPermission::new(permission.name.clone());

            if let Some(parent) = &permission.parent {
                let parent_id = ids.get(parent.as_str()).ok_or_else(|| {
                    AuthzError::Seed(format!(
                        "permission '{}' references unknown parent '{}'",
                        permission.name, parent
                    ))
                })?;
                new = new.under(*parent_id);
            }
            if permission.category {
                new = new.category();
            }
            if let Some(description) = &permission.description {
                new = new.with_description(description.clone());
            }
            if let Some(module) = &permission.module {
                new = new.with_module(module.clone());
            }
            if let Some(resource) = &permission.resource {
                new = new.with_resource(resource.clone());
            }
            if let Some(action) = &permission.action {
                new = new.with_action(action.clone());
            }

            let node = engine.create_node(new).await?;
            ids.insert(permission.name.as_str(), node.id);
        }

        for role in &self.roles {
            let name = role.name.clone().unwrap_or_else(|| role.id.clone());
            let mut registered = Role::new(role.id.clone(), name);
            registered.is_active = role.active;
            assignments.upsert_role(registered).await;
        }

        for grant in &self.grants {
            let permission_id = ids.get(grant.permission.as_str()).ok_or_else(|| {
                AuthzError::Seed(format!(
                    "grant to role '{}' references unknown permission '{}'",
                    grant.role, grant.permission
                ))
            })?;
            engine
                .grant(&grant.role, *permission_id, &grant.granted_by, grant.expires_at)
                .await?;
        }

        for principal in &self.principals {
            for role in &principal.roles {
                assignments.assign(&principal.id, role, None).await;
            }
            engine.role_assignments_changed(&principal.id);
        }

        let summary = SeedSummary {
            permissions: self.permissions.len(),
            roles: self.roles.len(),
            grants: self.grants.len(),
            principals: self.principals.len(),
        };

        info!(
            permissions = summary.permissions,
            roles = summary.roles,
            grants = summary.grants,
            principals = summary.principals,
            "Applied seed document"
        );

        Ok(summary)
    }
}
