//! Permission node store and tree path maintenance
//!
//! Nodes live in a flat arena keyed by [`NodeId`]. Edges are parent ids, so
//! the tree itself can never hold a reference cycle; the only cycle hazard is
//! a bad re-parent, which [`PermissionTree::move_node`] rejects by walking the
//! ancestor chain of the target.
//!
//! Every node carries a derived `level` and `path`. Whenever a node is
//! created or moved, the node and its whole subtree are recomputed
//! breadth-first while the tree write lock is held, so readers never see a
//! subtree where some nodes reflect the old parent and some the new one.
//!
//! # Example
//!
//! ```
//! use permtree_authz::tree::PermissionTree;
//! use permtree_authz::types::NewPermission;
//!
//! # async fn example() -> permtree_authz::Result<()> {
//! let tree = PermissionTree::new();
//! let user = tree.create_node(NewPermission::new("user").category()).await?;
//! let read = tree.create_node(NewPermission::new("user:read").under(user.id)).await?;
//!
//! assert_eq!(read.level(), 1);
//! assert_eq!(read.path(), &[user.id, read.id]);
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthzError, Result};
use crate::types::{NewPermission, NodeId, PermissionNode};
use crate::wildcard::{self, WildcardMatcher};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Nested view of a subtree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub node: PermissionNode,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of nodes in this subtree, including this one
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }
}

/// A node whose stored level/path disagree with its parent chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityViolation {
    pub node: NodeId,
    pub expected_level: u32,
    pub actual_level: u32,
    pub expected_path: Vec<NodeId>,
    pub actual_path: Vec<NodeId>,
}

/// Arena holding all nodes plus the indexes kept in step with it
#[derive(Debug, Default)]
struct TreeState {
    nodes: BTreeMap<NodeId, PermissionNode>,
    children: HashMap<NodeId, BTreeSet<NodeId>>,
    roots: BTreeSet<NodeId>,
    /// Name index over active nodes only
    active_names: HashMap<String, NodeId>,
    last_id: u64,
}

impl TreeState {
    fn get(&self, id: NodeId) -> Result<&PermissionNode> {
        self.nodes.get(&id).ok_or(AuthzError::NodeNotFound(id))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut PermissionNode> {
        self.nodes.get_mut(&id).ok_or(AuthzError::NodeNotFound(id))
    }

    fn ensure_name_free(&self, name: &str, owner: Option<NodeId>) -> Result<()> {
        match self.active_names.get(name) {
            Some(existing) if Some(*existing) != owner => {
                Err(AuthzError::DuplicateName(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn siblings_mut(&mut self, parent: Option<NodeId>) -> &mut BTreeSet<NodeId> {
        match parent {
            Some(parent) => self.children.entry(parent).or_default(),
            None => &mut self.roots,
        }
    }

    fn detach(&mut self, id: NodeId, parent: Option<NodeId>) {
        match parent {
            Some(parent) => {
                if let Some(siblings) = self.children.get_mut(&parent) {
                    siblings.remove(&id);
                    if siblings.is_empty() {
                        self.children.remove(&parent);
                    }
                }
            }
            None => {
                self.roots.remove(&id);
            }
        }
    }

    fn has_children(&self, id: NodeId) -> bool {
        self.children.get(&id).map_or(false, |kids| !kids.is_empty())
    }

    fn create(&mut self, new: NewPermission, matcher: &WildcardMatcher) -> Result<PermissionNode> {
        matcher.validate_name(&new.name)?;
        self.ensure_name_free(&new.name, None)?;

        let (level, mut path) = match new.parent_id {
            Some(parent_id) => {
                let parent = self
                    .nodes
                    .get(&parent_id)
                    .ok_or(AuthzError::ParentNotFound(parent_id))?;
                (parent.level + 1, parent.path.clone())
            }
            None => (0, Vec::new()),
        };

        self.last_id += 1;
        let id = NodeId(self.last_id);
        path.push(id);

        let now = Utc::now();
        let node = PermissionNode {
            id,
            is_wildcard: wildcard::is_wildcard(&new.name),
            name: new.name,
            parent_id: new.parent_id,
            level,
            path,
            is_category: new.is_category,
            is_active: true,
            description: new.description,
            module: new.module,
            resource: new.resource,
            action: new.action,
            created_at: now,
            updated_at: now,
        };

        self.siblings_mut(node.parent_id).insert(id);
        self.active_names.insert(node.name.clone(), id);
        self.nodes.insert(id, node.clone());

        Ok(node)
    }

    /// Whether `candidate` is `of` or one of its ancestors
    fn is_self_or_ancestor(&self, candidate: NodeId, of: NodeId) -> bool {
        let mut cursor = Some(of);
        while let Some(id) = cursor {
            if id == candidate {
                return true;
            }
            cursor = self.nodes.get(&id).and_then(|node| node.parent_id);
        }
        false
    }

    fn move_node(&mut self, id: NodeId, new_parent: Option<NodeId>) -> Result<Vec<NodeId>> {
        let old_parent = self.get(id)?.parent_id;

        if let Some(target) = new_parent {
            if !self.nodes.contains_key(&target) {
                return Err(AuthzError::ParentNotFound(target));
            }
            if self.is_self_or_ancestor(id, target) {
                return Err(AuthzError::Cycle { node: id, target });
            }
        }

        if old_parent == new_parent {
            return Ok(Vec::new());
        }

        self.detach(id, old_parent);
        self.siblings_mut(new_parent).insert(id);
        self.get_mut(id)?.parent_id = new_parent;

        Ok(self.recompute_subtree(id))
    }

    /// Recomputes level/path for `start` and every descendant, top-down
    fn recompute_subtree(&mut self, start: NodeId) -> Vec<NodeId> {
        let now = Utc::now();
        let mut visited = Vec::new();
        let mut queue = VecDeque::from([start]);

        while let Some(id) = queue.pop_front() {
            let parent_id = self.nodes.get(&id).and_then(|node| node.parent_id);
            let (level, mut path) = parent_id
                .and_then(|parent| self.nodes.get(&parent))
                .map(|parent| (parent.level + 1, parent.path.clone()))
                .unwrap_or((0, Vec::new()));
            path.push(id);

            if let Some(node) = self.nodes.get_mut(&id) {
                node.level = level;
                node.path = path;
                node.updated_at = now;
            }

            visited.push(id);
            if let Some(kids) = self.children.get(&id) {
                queue.extend(kids.iter().copied());
            }
        }

        visited
    }

    fn subtree_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            ids.push(current);
            if let Some(kids) = self.children.get(&current) {
                queue.extend(kids.iter().copied());
            }
        }
        ids
    }

    fn delete(&mut self, id: NodeId, cascade: bool) -> Result<Vec<NodeId>> {
        let parent = self.get(id)?.parent_id;

        if self.has_children(id) && !cascade {
            return Err(AuthzError::HasChildren(id));
        }

        let removed = self.subtree_ids(id);
        self.detach(id, parent);

        for node_id in &removed {
            self.children.remove(node_id);
            if let Some(node) = self.nodes.remove(node_id) {
                if self.active_names.get(&node.name) == Some(node_id) {
                    self.active_names.remove(&node.name);
                }
            }
        }

        Ok(removed)
    }

    fn rename(&mut self, id: NodeId, new_name: String, matcher: &WildcardMatcher) -> Result<PermissionNode> {
        matcher.validate_name(&new_name)?;

        let (old_name, is_active) = {
            let node = self.get(id)?;
            (node.name.clone(), node.is_active)
        };

        if is_active {
            self.ensure_name_free(&new_name, Some(id))?;
            self.active_names.remove(&old_name);
            self.active_names.insert(new_name.clone(), id);
        }

        let node = self.get_mut(id)?;
        node.is_wildcard = wildcard::is_wildcard(&new_name);
        node.name = new_name;
        node.updated_at = Utc::now();

        Ok(node.clone())
    }

    fn set_active(&mut self, id: NodeId, active: bool) -> Result<PermissionNode> {
        let (name, was_active) = {
            let node = self.get(id)?;
            (node.name.clone(), node.is_active)
        };

        if active && !was_active {
            self.ensure_name_free(&name, Some(id))?;
            self.active_names.insert(name, id);
        } else if !active && was_active {
            self.active_names.remove(&name);
        }

        let node = self.get_mut(id)?;
        node.is_active = active;
        node.updated_at = Utc::now();
        Ok(node.clone())
    }

    fn ancestors(&self, id: NodeId) -> Result<Vec<PermissionNode>> {
        let node = self.get(id)?;
        let mut ancestors = Vec::with_capacity(node.level as usize);
        let mut cursor = node.parent_id;
        while let Some(parent_id) = cursor {
            let parent = self.get(parent_id)?;
            ancestors.push(parent.clone());
            cursor = parent.parent_id;
        }
        ancestors.reverse();
        Ok(ancestors)
    }

    fn build_subtree(&self, id: NodeId) -> Option<TreeNode> {
        let node = self.nodes.get(&id).filter(|node| node.is_active)?;
        let children = self
            .children
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|child| self.build_subtree(*child))
            .collect();

        Some(TreeNode {
            node: node.clone(),
            children,
        })
    }

    fn verify(&self) -> Vec<IntegrityViolation> {
        let mut violations = Vec::new();

        for node in self.nodes.values() {
            let mut expected_path = vec![node.id];
            let mut cursor = node.parent_id;
            while let Some(parent_id) = cursor {
                if expected_path.contains(&parent_id) || expected_path.len() > self.nodes.len() {
                    break;
                }
                expected_path.push(parent_id);
                cursor = self.nodes.get(&parent_id).and_then(|parent| parent.parent_id);
            }
            expected_path.reverse();
            let expected_level = (expected_path.len() - 1) as u32;

            if expected_level != node.level || expected_path != node.path {
                violations.push(IntegrityViolation {
                    node: node.id,
                    expected_level,
                    actual_level: node.level,
                    expected_path,
                    actual_path: node.path.clone(),
                });
            }
        }

        violations
    }
}

/// Permission node store
///
/// All mutations take a single tree-wide write lock. Reads share the lock and
/// run in parallel with each other.
pub struct PermissionTree {
    state: RwLock<TreeState>,
    matcher: WildcardMatcher,
}

impl Default for PermissionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionTree {
    /// Creates an empty tree using the `:` separator
    pub fn new() -> Self {
        Self::with_matcher(WildcardMatcher::default())
    }

    /// Creates an empty tree validating names with `matcher`
    pub fn with_matcher(matcher: WildcardMatcher) -> Self {
        Self {
            state: RwLock::new(TreeState::default()),
            matcher,
        }
    }

    /// Creates a node and returns it with its derived level and path
    ///
    /// # Errors
    ///
    /// - `DuplicateName` if an active node already has the name
    /// - `ParentNotFound` if `parent_id` is set and unknown
    /// - `InvalidName` if the name is malformed
    pub async fn create_node(&self, new: NewPermission) -> Result<PermissionNode> {
        let mut state = self.state.write().await;
        let node = state.create(new, &self.matcher)?;

        debug!(node = %node.id, name = %node.name, level = node.level, "Created permission node");
        Ok(node)
    }

    /// Re-parents `id` under `new_parent` (`None` moves it to the top level)
    ///
    /// Returns the ids whose level/path were recomputed: the node and its
    /// entire subtree. Moving a node to its current parent is a no-op.
    ///
    /// # Errors
    ///
    /// - `Cycle` if `new_parent` is the node itself or one of its descendants
    /// - `NodeNotFound` / `ParentNotFound` for unknown ids
    pub async fn move_node(&self, id: NodeId, new_parent: Option<NodeId>) -> Result<Vec<NodeId>> {
        let mut state = self.state.write().await;

        match state.move_node(id, new_parent) {
            Ok(recomputed) => {
                info!(
                    node = %id,
                    parent = ?new_parent,
                    recomputed = recomputed.len(),
                    "Moved permission node"
                );
                Ok(recomputed)
            }
            Err(err) => {
                warn!(node = %id, parent = ?new_parent, "Rejected move: {}", err);
                Err(err)
            }
        }
    }

    /// Deletes a node, and with `cascade` its whole subtree
    ///
    /// Returns the removed ids so callers can drop associations referencing
    /// them.
    pub async fn delete_node(&self, id: NodeId, cascade: bool) -> Result<Vec<NodeId>> {
        let mut state = self.state.write().await;
        let removed = state.delete(id, cascade)?;

        info!(node = %id, cascade, removed = removed.len(), "Deleted permission node");
        Ok(removed)
    }

    /// Renames a node, re-deriving its wildcard flag
    pub async fn rename_node(&self, id: NodeId, new_name: impl Into<String>) -> Result<PermissionNode> {
        let mut state = self.state.write().await;
        let node = state.rename(id, new_name.into(), &self.matcher)?;

        debug!(node = %id, name = %node.name, "Renamed permission node");
        Ok(node)
    }

    /// Soft (de)activation; level and path are left untouched
    pub async fn set_active(&self, id: NodeId, active: bool) -> Result<PermissionNode> {
        let mut state = self.state.write().await;
        let node = state.set_active(id, active)?;

        debug!(node = %id, active, "Changed permission node activation");
        Ok(node)
    }

    /// Flags or unflags a node as a grouping category
    pub async fn set_category(&self, id: NodeId, is_category: bool) -> Result<PermissionNode> {
        let mut state = self.state.write().await;
        let node = state.get_mut(id)?;
        node.is_category = is_category;
        node.updated_at = Utc::now();
        Ok(node.clone())
    }

    /// Gets a node by id, active or not
    pub async fn get_node(&self, id: NodeId) -> Option<PermissionNode> {
        self.state.read().await.nodes.get(&id).cloned()
    }

    /// Looks up an active node by name
    pub async fn find_by_name(&self, name: &str) -> Option<PermissionNode> {
        let state = self.state.read().await;
        state
            .active_names
            .get(name)
            .and_then(|id| state.nodes.get(id))
            .cloned()
    }

    /// Whether a node with this id exists
    pub async fn contains(&self, id: NodeId) -> bool {
        self.state.read().await.nodes.contains_key(&id)
    }

    /// All nodes ordered by id
    pub async fn list_nodes(&self, include_inactive: bool) -> Vec<PermissionNode> {
        self.state
            .read()
            .await
            .nodes
            .values()
            .filter(|node| include_inactive || node.is_active)
            .cloned()
            .collect()
    }

    /// Number of stored nodes, inactive ones included
    pub async fn len(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.nodes.is_empty()
    }

    /// Direct children of a node
    pub async fn children(&self, id: NodeId) -> Result<Vec<PermissionNode>> {
        let state = self.state.read().await;
        state.get(id)?;
        Ok(state
            .children
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|child| state.nodes.get(child))
            .cloned()
            .collect())
    }

    /// Ancestors ordered from the root down to the immediate parent
    pub async fn get_ancestors(&self, id: NodeId) -> Result<Vec<PermissionNode>> {
        self.state.read().await.ancestors(id)
    }

    /// Every node below `id`, excluding `id` itself
    pub async fn get_descendants(&self, id: NodeId) -> Result<Vec<PermissionNode>> {
        let state = self.state.read().await;
        state.get(id)?;
        Ok(state
            .subtree_ids(id)
            .into_iter()
            .skip(1)
            .filter_map(|child| state.nodes.get(&child))
            .cloned()
            .collect())
    }

    /// Nested view of the active tree
    ///
    /// With `root` set, returns that node's subtree (empty if it is
    /// inactive). Inactive nodes are omitted along with everything under them.
    pub async fn get_tree(&self, root: Option<NodeId>) -> Result<Vec<TreeNode>> {
        let state = self.state.read().await;

        let roots: Vec<NodeId> = match root {
            Some(id) => {
                state.get(id)?;
                vec![id]
            }
            None => state.roots.iter().copied().collect(),
        };

        Ok(roots
            .into_iter()
            .filter_map(|id| state.build_subtree(id))
            .collect())
    }

    /// Names a grant on `ids` contributes to an effective set
    ///
    /// Missing, inactive and category ids are skipped: categories only group
    /// nodes and carry no grant of their own.
    pub async fn grantable_names(&self, ids: &[NodeId]) -> HashMap<NodeId, String> {
        let state = self.state.read().await;
        ids.iter()
            .filter_map(|id| state.nodes.get(id))
            .filter(|node| node.is_active && !node.is_category)
            .map(|node| (node.id, node.name.clone()))
            .collect()
    }

    /// Active nodes among `ids`, in the order given
    pub async fn active_nodes(&self, ids: &[NodeId]) -> Vec<PermissionNode> {
        let state = self.state.read().await;
        ids.iter()
            .filter_map(|id| state.nodes.get(id))
            .filter(|node| node.is_active)
            .cloned()
            .collect()
    }

    /// Names of every active concrete (non-category, non-wildcard) node
    pub async fn concrete_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .nodes
            .values()
            .filter(|node| node.is_active && node.is_concrete())
            .map(|node| node.name.clone())
            .collect()
    }

    /// Checks every node's level/path against its live parent chain
    pub async fn verify_integrity(&self) -> Vec<IntegrityViolation> {
        self.state.read().await.verify()
    }
}
