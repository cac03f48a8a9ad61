//! Mutation Observer API
//!
//! Observe DOM changes. Records are queued when the document mutates and
//! handed to each observer's callback in one batch per observer when the
//! host calls [`Document::notify_mutation_observers`].

use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::{Document, DomError, DomResult, DomTree, NodeId};

/// Observer identifier, unique per document
pub type ObserverId = u64;

/// Callback receiving one batch of records
pub type MutationCallbackFn = Rc<dyn Fn(&[MutationRecord])>;

/// Mutation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationType {
    Attributes,
    CharacterData,
    ChildList,
}

/// Mutation record
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub mutation_type: MutationType,
    pub target: NodeId,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
    pub previous_sibling: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
    pub attribute_name: Option<String>,
    pub old_value: Option<String>,
}

impl MutationRecord {
    /// Child list change on `target`
    pub fn child_list(
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
        previous_sibling: Option<NodeId>,
        next_sibling: Option<NodeId>,
    ) -> Self {
        Self {
            mutation_type: MutationType::ChildList,
            target,
            added_nodes: added,
            removed_nodes: removed,
            previous_sibling,
            next_sibling,
            attribute_name: None,
            old_value: None,
        }
    }

    /// Attribute change on `target`
    pub fn attributes(target: NodeId, name: &str, old_value: Option<String>) -> Self {
        Self {
            mutation_type: MutationType::Attributes,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
            attribute_name: Some(name.to_string()),
            old_value,
        }
    }

    /// Text/comment data change on `target`
    pub fn character_data(target: NodeId, old_value: String) -> Self {
        Self {
            mutation_type: MutationType::CharacterData,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
            attribute_name: None,
            old_value: Some(old_value),
        }
    }
}

/// Mutation observer options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MutationObserverInit {
    pub child_list: bool,
    pub attributes: bool,
    pub character_data: bool,
    pub subtree: bool,
    pub attribute_old_value: bool,
    pub character_data_old_value: bool,
    pub attribute_filter: Option<Vec<String>>,
}

impl MutationObserverInit {
    /// Attributes, child list and whole-subtree observation
    pub fn subtree_changes() -> Self {
        Self {
            child_list: true,
            attributes: true,
            subtree: true,
            ..Default::default()
        }
    }

    /// Child list only, whole subtree
    pub fn child_list_subtree() -> Self {
        Self {
            child_list: true,
            subtree: true,
            ..Default::default()
        }
    }

    /// Check that these options observe something
    pub fn validate(&self) -> DomResult<()> {
        self.clone().normalized().map(drop)
    }

    /// Apply implied flags and reject option sets that observe nothing
    pub(crate) fn normalized(mut self) -> DomResult<Self> {
        if self.attribute_old_value || self.attribute_filter.is_some() {
            self.attributes = true;
        }
        if self.character_data_old_value {
            self.character_data = true;
        }
        if !(self.child_list || self.attributes || self.character_data) {
            return Err(DomError::InvalidObserverOptions);
        }
        Ok(self)
    }

    fn accepts(&self, mutation: &MutationRecord) -> bool {
        match mutation.mutation_type {
            MutationType::ChildList => self.child_list,
            MutationType::CharacterData => self.character_data,
            MutationType::Attributes => {
                self.attributes
                    && match (&self.attribute_filter, &mutation.attribute_name) {
                        (Some(filter), Some(attr)) => filter.contains(attr),
                        _ => true,
                    }
            }
        }
    }

    fn wants_old_value(&self, mutation: &MutationRecord) -> bool {
        match mutation.mutation_type {
            MutationType::Attributes => self.attribute_old_value,
            MutationType::CharacterData => self.character_data_old_value,
            MutationType::ChildList => false,
        }
    }
}

/// Per-observer state held by the document
pub(crate) struct ObserverRegistration {
    pub(crate) id: ObserverId,
    pub(crate) callback: MutationCallbackFn,
    observations: Vec<(NodeId, MutationObserverInit)>,
    pub(crate) pending: Vec<MutationRecord>,
}

impl ObserverRegistration {
    pub(crate) fn new(id: ObserverId, callback: MutationCallbackFn) -> Self {
        Self {
            id,
            callback,
            observations: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Observe a target; re-observing a target replaces its options
    pub(crate) fn observe(&mut self, target: NodeId, options: MutationObserverInit) {
        match self.observations.iter_mut().find(|(node, _)| *node == target) {
            Some(entry) => entry.1 = options,
            None => self.observations.push((target, options)),
        }
    }

    pub(crate) fn disconnect(&mut self) {
        self.observations.clear();
        self.pending.clear();
    }

    pub(crate) fn is_observing(&self, node: NodeId) -> bool {
        self.observations.iter().any(|(n, _)| *n == node)
    }

    /// Queue `mutation` once if any observation covers it
    pub(crate) fn record(&mut self, tree: &DomTree, mutation: &MutationRecord) {
        let mut interested = false;
        let mut old_value = false;

        for node in std::iter::once(mutation.target).chain(tree.ancestors(mutation.target)) {
            for (observed, options) in &self.observations {
                if *observed != node {
                    continue;
                }
                if node != mutation.target && !options.subtree {
                    continue;
                }
                if !options.accepts(mutation) {
                    continue;
                }
                interested = true;
                old_value |= options.wants_old_value(mutation);
            }
        }

        if interested {
            let mut record = mutation.clone();
            if !old_value {
                record.old_value = None;
            }
            self.pending.push(record);
        }
    }
}

/// Mutation observer
///
/// Handle to an observer registered with a document. Dropping the handle
/// unregisters the observer and discards its pending records.
#[derive(Debug)]
pub struct MutationObserver {
    id: ObserverId,
    document: Weak<Document>,
}

impl MutationObserver {
    pub fn new(document: &Rc<Document>, callback: MutationCallbackFn) -> Self {
        let id = document.register_observer(callback);
        Self {
            id,
            document: Rc::downgrade(document),
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Observe a target
    pub fn observe(&self, target: NodeId, options: MutationObserverInit) -> DomResult<()> {
        let document = self.document.upgrade().ok_or(DomError::NotFound)?;
        document.observe_node(self.id, target, options)
    }

    /// Stop observing all targets and drop pending records
    pub fn disconnect(&self) {
        if let Some(document) = self.document.upgrade() {
            document.disconnect_observer(self.id);
        }
    }

    /// Take pending records without invoking the callback
    pub fn take_records(&self) -> Vec<MutationRecord> {
        self.document
            .upgrade()
            .map(|d| d.take_observer_records(self.id))
            .unwrap_or_default()
    }

    /// Check if observing node
    pub fn is_observing(&self, node: NodeId) -> bool {
        self.document
            .upgrade()
            .is_some_and(|d| d.observer_is_observing(self.id, node))
    }
}

impl Drop for MutationObserver {
    fn drop(&mut self) {
        if let Some(document) = self.document.upgrade() {
            document.unregister_observer(self.id);
        }
    }
}
