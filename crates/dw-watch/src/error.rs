//! Watch layer errors

use dw_dom::DomError;

/// Result type for watch operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Watch layer errors
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Event specification such as `".ns"` with nothing before the dot
    #[error("Event specification {0:?} has no event type")]
    MissingEventType(String),

    /// Namespace-wide removal needs `".ns"` or `"type.ns"`
    #[error("Event specification {0:?} has no namespace")]
    MissingNamespace(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Dom(#[from] DomError),
}
