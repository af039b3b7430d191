//! Authorization checker tests
//!
//! Role resolution → association lookup → tree name resolution → wildcard decision

use chrono::{Duration as ChronoDuration, Utc};
use permtree_authz::{
    AuthorizationEngine, AuthzError, CacheConfig, Decision, EngineConfig, GrantOutcome,
    InMemoryRoleAssignments, InMemoryRolePermissionStore, NewPermission, NodeId, Role,
};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

struct Fixture {
    engine: AuthorizationEngine,
    roles: InMemoryRoleAssignments,
    user: NodeId,
    info: NodeId,
    info_read: NodeId,
    read: NodeId,
    all: NodeId,
}

async fn fixture_with(config: EngineConfig) -> Fixture {
    let roles = InMemoryRoleAssignments::new();
    let engine = AuthorizationEngine::new(
        config,
        Arc::new(InMemoryRolePermissionStore::new()),
        Arc::new(roles.clone()),
    )
    .unwrap();

    let user = engine
        .create_node(NewPermission::new("user").category())
        .await
        .unwrap()
        .id;
    let info = engine
        .create_node(NewPermission::new("user:info").under(user).category())
        .await
        .unwrap()
        .id;
    let info_read = engine
        .create_node(NewPermission::new("user:info:read").under(info))
        .await
        .unwrap()
        .id;
    let read = engine
        .create_node(NewPermission::new("user:read").under(user))
        .await
        .unwrap()
        .id;
    let all = engine
        .create_node(NewPermission::new("user:*").under(user))
        .await
        .unwrap()
        .id;

    Fixture {
        engine,
        roles,
        user,
        info,
        info_read,
        read,
        all,
    }
}

async fn fixture() -> Fixture {
    fixture_with(EngineConfig::default()).await
}

// ============================================================================
// WILDCARD AND EXACT DECISIONS
// ============================================================================

#[tokio::test]
async fn test_wildcard_grant_covers_descendants() {
    let f = fixture().await;
    f.engine.grant("editor", f.all, "admin", None).await.unwrap();
    f.roles.assign("alice", "editor", None).await;

    let decision = f.engine.has_permission("alice", "user:info:read").await.unwrap();
    assert!(decision.granted);
    assert_eq!(decision.matched_by.as_deref(), Some("user:*"));
    assert_eq!(decision.via_role.as_deref(), Some("editor"));

    // Wildcards cover names with no node behind them
    assert!(f.engine.has_permission("alice", "user:export").await.unwrap().granted);
    assert!(!f.engine.has_permission("alice", "billing:read").await.unwrap().granted);
}

#[tokio::test]
async fn test_revoke_is_visible_immediately() {
    let f = fixture().await;
    f.engine.grant("editor", f.all, "admin", None).await.unwrap();
    f.roles.assign("alice", "editor", None).await;

    assert!(f.engine.has_permission("alice", "user:info:read").await.unwrap().granted);

    assert!(f.engine.revoke("editor", f.all).await.unwrap());
    let decision = f.engine.has_permission("alice", "user:info:read").await.unwrap();
    assert_eq!(decision, Decision::deny());

    // Second revoke is a silent no-op
    assert!(!f.engine.revoke("editor", f.all).await.unwrap());
}

#[tokio::test]
async fn test_exact_grant_preferred_over_wildcard_across_roles() {
    let f = fixture().await;
    f.engine.grant("role-a", f.read, "admin", None).await.unwrap();
    f.engine.grant("role-b", f.all, "admin", None).await.unwrap();
    f.roles.assign("alice", "role-a", None).await;
    f.roles.assign("alice", "role-b", None).await;

    let decision = f.engine.has_permission("alice", "user:read").await.unwrap();
    assert!(decision.granted);
    assert_eq!(decision.matched_by.as_deref(), Some("user:read"));
    assert_eq!(decision.via_role.as_deref(), Some("role-a"));

    let decision = f.engine.has_permission("alice", "user:write").await.unwrap();
    assert_eq!(decision.matched_by.as_deref(), Some("user:*"));
    assert_eq!(decision.via_role.as_deref(), Some("role-b"));
}

#[tokio::test]
async fn test_most_specific_wildcard_wins() {
    let f = fixture().await;
    let info_all = f
        .engine
        .create_node(NewPermission::new("user:info:*").under(f.info))
        .await
        .unwrap();
    let global = f.engine.create_node(NewPermission::new("*")).await.unwrap();

    f.engine.grant("root", global.id, "admin", None).await.unwrap();
    f.engine.grant("editor", f.all, "admin", None).await.unwrap();
    f.engine.grant("viewer", info_all.id, "admin", None).await.unwrap();
    for role in ["root", "editor", "viewer"] {
        f.roles.assign("alice", role, None).await;
    }

    let decision = f.engine.has_permission("alice", "user:info:read").await.unwrap();
    assert_eq!(decision.matched_by.as_deref(), Some("user:info:*"));
    assert_eq!(decision.via_role.as_deref(), Some("viewer"));

    let decision = f.engine.has_permission("alice", "billing").await.unwrap();
    assert_eq!(decision.matched_by.as_deref(), Some("*"));
}

#[tokio::test]
async fn test_unknown_principal_and_permission_deny() {
    let f = fixture().await;
    assert_eq!(
        f.engine.has_permission("nobody", "user:read").await.unwrap(),
        Decision::deny()
    );

    f.engine.grant("editor", f.read, "admin", None).await.unwrap();
    f.roles.assign("alice", "editor", None).await;
    assert!(!f.engine.has_permission("alice", "does:not:exist").await.unwrap().granted);
}

#[tokio::test]
async fn test_category_grant_confers_nothing() {
    let f = fixture().await;
    f.engine.grant("editor", f.user, "admin", None).await.unwrap();
    f.engine.grant("editor", f.info, "admin", None).await.unwrap();
    f.roles.assign("alice", "editor", None).await;

    assert!(!f.engine.has_permission("alice", "user").await.unwrap().granted);
    assert!(!f.engine.has_permission("alice", "user:info").await.unwrap().granted);
    assert!(!f.engine.has_permission("alice", "user:read").await.unwrap().granted);
    assert!(f.engine.effective_permissions("alice").await.unwrap().is_empty());
}

// ============================================================================
// BATCH CHECKS
// ============================================================================

#[tokio::test]
async fn test_batch_check_matches_single_checks() {
    let f = fixture().await;
    f.engine.grant("editor", f.read, "admin", None).await.unwrap();
    f.engine.grant("editor", f.info_read, "admin", None).await.unwrap();
    f.roles.assign("alice", "editor", None).await;

    let requested = ["user:read", "user:info:read", "user:delete", "billing:read"];
    let batch = f.engine.batch_check("alice", &requested).await.unwrap();

    assert_eq!(batch.len(), requested.len());
    for permission in requested {
        let single = f.engine.has_permission("alice", permission).await.unwrap();
        assert_eq!(batch[permission], single, "mismatch for {}", permission);
    }
}

#[tokio::test]
async fn test_batch_check_empty_request() {
    let f = fixture().await;
    let batch = f.engine.batch_check::<&str>("alice", &[]).await.unwrap();
    assert!(batch.is_empty());
}

// ============================================================================
// EXPIRY AND ROLE STATE
// ============================================================================

#[tokio::test]
async fn test_expired_grant_denies_without_write() {
    let f = fixture().await;
    let expires_at = Utc::now() + ChronoDuration::milliseconds(150);
    f.engine
        .grant("contractor", f.read, "admin", Some(expires_at))
        .await
        .unwrap();
    f.roles.assign("bob", "contractor", None).await;

    assert!(f.engine.has_permission("bob", "user:read").await.unwrap().granted);

    sleep(Duration::from_millis(250)).await;

    // The cached set is bounded by the association expiry
    assert!(!f.engine.has_permission("bob", "user:read").await.unwrap().granted);
}

#[tokio::test]
async fn test_expired_role_assignment_denies_without_write() {
    let f = fixture().await;
    f.engine.grant("temp", f.read, "admin", None).await.unwrap();
    let expires_at = Utc::now() + ChronoDuration::milliseconds(150);
    f.roles.assign("bob", "temp", Some(expires_at)).await;

    assert!(f.engine.has_permission("bob", "user:read").await.unwrap().granted);

    sleep(Duration::from_millis(300)).await;

    // The cached set is bounded by the role assignment expiry too
    assert!(!f.engine.has_permission("bob", "user:read").await.unwrap().granted);
}

#[tokio::test]
async fn test_regrant_refreshes_expired_association() {
    let f = fixture().await;
    let past = Utc::now() - ChronoDuration::minutes(1);
    f.engine.grant("contractor", f.read, "admin", Some(past)).await.unwrap();
    f.roles.assign("bob", "contractor", None).await;
    assert!(!f.engine.has_permission("bob", "user:read").await.unwrap().granted);

    let outcome = f.engine.grant("contractor", f.read, "admin", None).await.unwrap();
    assert_eq!(outcome, GrantOutcome::Refreshed);
    assert!(f.engine.has_permission("bob", "user:read").await.unwrap().granted);

    let outcome = f.engine.grant("contractor", f.read, "admin", None).await.unwrap();
    assert_eq!(outcome, GrantOutcome::Unchanged);
}

#[tokio::test]
async fn test_purge_expired_grants() {
    let f = fixture().await;
    let past = Utc::now() - ChronoDuration::minutes(1);
    f.engine.grant("contractor", f.read, "admin", Some(past)).await.unwrap();
    f.engine.grant("contractor", f.all, "admin", None).await.unwrap();

    assert_eq!(f.engine.purge_expired_grants(Utc::now()).await.unwrap(), 1);
    let remaining = f.engine.get_role_associations("contractor").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].permission_id, f.all);
}

#[tokio::test]
async fn test_inactive_role_contributes_nothing() {
    let f = fixture().await;
    f.roles.upsert_role(Role::new("editor", "Editor")).await;
    f.engine.grant("editor", f.all, "admin", None).await.unwrap();
    f.roles.assign("alice", "editor", None).await;
    assert!(f.engine.has_permission("alice", "user:read").await.unwrap().granted);

    f.roles.set_role_active("editor", false).await;
    assert!(!f.engine.has_permission("alice", "user:read").await.unwrap().granted);
}

#[tokio::test]
async fn test_unassign_denies_immediately() {
    let f = fixture().await;
    f.engine.grant("editor", f.read, "admin", None).await.unwrap();
    f.roles.assign("alice", "editor", None).await;
    assert!(f.engine.has_permission("alice", "user:read").await.unwrap().granted);

    f.roles.unassign("alice", "editor").await;
    assert!(!f.engine.has_permission("alice", "user:read").await.unwrap().granted);

    f.roles.assign("alice", "editor", None).await;
    assert!(f.engine.has_permission("alice", "user:read").await.unwrap().granted);
}

// ============================================================================
// TREE WRITES THROUGH THE ENGINE
// ============================================================================

#[tokio::test]
async fn test_deactivated_node_stops_matching() {
    let f = fixture().await;
    f.engine.grant("editor", f.read, "admin", None).await.unwrap();
    f.roles.assign("alice", "editor", None).await;
    assert!(f.engine.has_permission("alice", "user:read").await.unwrap().granted);

    f.engine.set_node_active(f.read, false).await.unwrap();
    assert!(!f.engine.has_permission("alice", "user:read").await.unwrap().granted);

    f.engine.set_node_active(f.read, true).await.unwrap();
    assert!(f.engine.has_permission("alice", "user:read").await.unwrap().granted);
}

#[tokio::test]
async fn test_rename_changes_effective_name() {
    let f = fixture().await;
    f.engine.grant("editor", f.read, "admin", None).await.unwrap();
    f.roles.assign("alice", "editor", None).await;
    assert!(f.engine.has_permission("alice", "user:read").await.unwrap().granted);

    f.engine.rename_node(f.read, "user:view").await.unwrap();
    assert!(!f.engine.has_permission("alice", "user:read").await.unwrap().granted);
    assert!(f.engine.has_permission("alice", "user:view").await.unwrap().granted);
}

#[tokio::test]
async fn test_cascade_delete_removes_associations() {
    let f = fixture().await;
    f.engine.grant("editor", f.info_read, "admin", None).await.unwrap();
    f.engine.grant("editor", f.read, "admin", None).await.unwrap();
    f.roles.assign("alice", "editor", None).await;
    assert!(f.engine.has_permission("alice", "user:info:read").await.unwrap().granted);

    let result = f.engine.delete_node(f.info, false).await;
    assert!(matches!(result, Err(AuthzError::HasChildren(id)) if id == f.info));

    let removed = f.engine.delete_node(f.info, true).await.unwrap();
    assert_eq!(removed.len(), 2);
    assert!(f.engine.get_node(f.info_read).await.is_none());

    let associations = f.engine.get_role_associations("editor").await.unwrap();
    assert_eq!(associations.len(), 1);
    assert!(!f.engine.has_permission("alice", "user:info:read").await.unwrap().granted);
    assert!(f.engine.has_permission("alice", "user:read").await.unwrap().granted);
}

#[tokio::test]
async fn test_grant_unknown_node_fails() {
    let f = fixture().await;
    let result = f.engine.grant("editor", NodeId(999), "admin", None).await;
    assert!(matches!(result, Err(AuthzError::NodeNotFound(NodeId(999)))));
}

// ============================================================================
// DIAGNOSTICS
// ============================================================================

#[tokio::test]
async fn test_expand_wildcards() {
    let f = fixture().await;
    f.engine.grant("editor", f.all, "admin", None).await.unwrap();
    f.engine.grant("editor", f.info, "admin", None).await.unwrap();
    f.roles.assign("alice", "editor", None).await;

    let expansion = f.engine.expand_wildcards("alice").await.unwrap();
    assert!(expansion.original.contains("user:*"));
    assert!(!expansion.original.contains("user:info"));
    assert!(expansion.expanded.contains("user:read"));
    assert!(expansion.expanded.contains("user:info:read"));
    assert!(!expansion.expanded.contains("user:*"));
    assert!(!expansion.expanded.contains("user:info"));
}

#[tokio::test]
async fn test_permissions_for_role() {
    let f = fixture().await;
    f.engine.grant("editor", f.read, "admin", None).await.unwrap();
    f.engine.grant("editor", f.all, "admin", None).await.unwrap();

    let nodes = f.engine.get_permissions_for_role("editor", Utc::now()).await.unwrap();
    let names: Vec<&str> = nodes.iter().map(|node| node.name.as_str()).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"user:read"));
    assert!(names.contains(&"user:*"));
}

#[tokio::test]
async fn test_disabled_cache_still_decides() {
    let f = fixture_with(EngineConfig {
        cache: CacheConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;
    f.engine.grant("editor", f.read, "admin", None).await.unwrap();
    f.roles.assign("alice", "editor", None).await;

    assert!(f.engine.has_permission("alice", "user:read").await.unwrap().granted);
    assert!(f.engine.has_permission("alice", "user:read").await.unwrap().granted);

    let stats = f.engine.cache_stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.entries, 0);
}
