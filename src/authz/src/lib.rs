//! # Permission Tree Authorization Engine
//!
//! Hierarchical permission store with wildcard inheritance and cached
//! per-principal authorization checks.
//!
//! ## Features
//!
//! - **Permission tree** with derived levels and paths, kept consistent
//!   across re-parenting
//! - **Wildcard grants** (`user:*`, `*`) resolved most specific first
//! - **Time-bounded grants** that expire without a write
//! - **Per-principal cache** invalidated on every tree or grant write
//! - **Async-first design** using Tokio runtime
//!
//! ## Example
//!
//! ```rust
//! use permtree_authz::{
//!     AuthorizationEngine, EngineConfig, InMemoryRoleAssignments,
//!     InMemoryRolePermissionStore, NewPermission,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let roles = InMemoryRoleAssignments::new();
//!     let engine = AuthorizationEngine::new(
//!         EngineConfig::default(),
//!         Arc::new(InMemoryRolePermissionStore::new()),
//!         Arc::new(roles.clone()),
//!     )?;
//!
//!     let user = engine.create_node(NewPermission::new("user").category()).await?;
//!     let all = engine.create_node(NewPermission::new("user:*").under(user.id)).await?;
//!     engine.grant("editor", all.id, "admin", None).await?;
//!     roles.assign("alice", "editor", None).await;
//!
//!     let decision = engine.has_permission("alice", "user:delete").await?;
//!     assert!(decision.granted);
//!     assert_eq!(decision.matched_by.as_deref(), Some("user:*"));
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod seed;
pub mod store;
pub mod tree;
pub mod types;
pub mod wildcard;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{AuthorizationEngine, CacheConfig, CacheStats, EngineMetrics};
pub use error::{AuthzError, Result};
pub use store::{
    ActiveRoles, GrantOutcome, InMemoryRoleAssignments, InMemoryRolePermissionStore,
    RoleAssignmentChange, RoleAssignmentSource, RoleChangeListener, RolePermissionStore,
};
pub use tree::{PermissionTree, TreeNode};
pub use types::{
    Decision, NewPermission, NodeId, PermissionNode, PrincipalId, Role, RoleId,
    RolePermissionAssociation, WildcardExpansion,
};
pub use wildcard::WildcardMatcher;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
