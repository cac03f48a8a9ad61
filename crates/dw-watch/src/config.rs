//! Watch configuration
//!
//! Which element to observe and at what granularity. Every field has a
//! default, so an empty JSON object is a valid configuration.

use dw_dom::{Document, MutationObserverInit, NodeId};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Id of the application mount point observed by default
pub const DEFAULT_ROOT_ID: &str = "app-mount";

/// Configuration for a [`DomWatch`](crate::DomWatch)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Id of the observed root element; falls back to the document element
    pub root_id: Option<String>,
    /// Observation granularity
    pub options: MutationObserverInit,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root_id: Some(DEFAULT_ROOT_ID.to_string()),
            options: MutationObserverInit::subtree_changes(),
        }
    }
}

impl WatchConfig {
    /// Parse from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolve the root to observe in `document`
    ///
    /// The configured id wins when such an element is connected; otherwise
    /// the document element, then the document node itself.
    pub fn resolve_root(&self, document: &Document) -> NodeId {
        if let Some(root) = self.root_id.as_deref().and_then(|id| document.get_element_by_id(id)) {
            return root;
        }
        let html = document.document_element();
        if html.is_valid() {
            html
        } else {
            NodeId::ROOT
        }
    }
}
