//! DOM operation errors

/// Result type for DOM operations
pub type DomResult<T> = Result<T, DomError>;

/// DOM operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    /// Node not found (or the owning document is gone)
    #[error("Node not found")]
    NotFound,
    /// Hierarchy error (e.g., inserting an ancestor into its descendant)
    #[error("Hierarchy request error")]
    HierarchyRequest,
    /// Reference node is not a child of the parent
    #[error("Node is not a child")]
    NotAChild,
    /// Operation not valid for this node type
    #[error("Invalid node type")]
    InvalidNodeType,
    /// Selector could not be parsed
    #[error("Invalid selector: {0:?}")]
    InvalidSelector(String),
    /// Observer options select no mutation type
    #[error("Observer options must enable childList, attributes or characterData")]
    InvalidObserverOptions,
}
