//! Error types for the permission authorization engine

use crate::types::NodeId;
use thiserror::Error;

/// Authorization engine errors
///
/// Structural errors are raised by tree mutations and describe caller input
/// that will fail again unchanged. Unknown principals or roles are never
/// errors: they resolve to an empty effective set and deny.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// An active node already carries this name
    #[error("Duplicate permission name: {0}")]
    DuplicateName(String),

    /// Parent referenced by a create or move does not exist
    #[error("Parent node not found: {0}")]
    ParentNotFound(NodeId),

    /// Node referenced by an operation does not exist
    #[error("Permission node not found: {0}")]
    NodeNotFound(NodeId),

    /// Re-parenting would make a node its own ancestor
    #[error("Cannot move node {node} under {target}: target is the node or one of its descendants")]
    Cycle { node: NodeId, target: NodeId },

    /// Non-cascading delete of a node that still has children
    #[error("Permission node {0} has children")]
    HasChildren(NodeId),

    /// Malformed permission name
    #[error("Invalid permission name: {0}")]
    InvalidName(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Seed document error
    #[error("Seed error: {0}")]
    Seed(String),

    /// External store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Whether this error was caused by caller input on a tree mutation
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName(_)
                | Self::ParentNotFound(_)
                | Self::NodeNotFound(_)
                | Self::Cycle { .. }
                | Self::HasChildren(_)
                | Self::InvalidName(_)
        )
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
