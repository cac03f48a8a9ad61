//! domwatch DOM - Document Object Model substrate
//!
//! Arena-allocated document tree with the two platform primitives the
//! watch layer builds on:
//! - `MutationObserver`: batched change records for an observed root
//! - event listeners keyed by node + event type, with bubbling dispatch

mod node;
mod tree;
mod document;
mod selector;
mod mutation;
mod event;
mod error;

pub use node::{Attribute, ElementData, Node, NodeData, TextData};
pub use tree::{Ancestors, Children, DomTree};
pub use document::Document;
pub use selector::{CompoundSelector, Selector, SimpleSelector};
pub use mutation::{
    MutationCallbackFn, MutationObserver, MutationObserverInit, MutationRecord, MutationType,
    ObserverId,
};
pub use event::{Event, EventListener, bubbles_by_default, same_listener};
pub use error::{DomError, DomResult};

use std::fmt;

/// Node identifier (index into arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Root (document) node ID
    pub const ROOT: NodeId = NodeId(0);
    /// Sentinel for "no node"
    pub const NONE: NodeId = NodeId(u32::MAX);

    /// Check that this is not the sentinel
    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::NONE
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            f.write_str("#none")
        }
    }
}
