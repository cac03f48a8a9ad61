//! DOM Events
//!
//! Event objects and the per-node listener table. Listener identity is
//! allocation identity: adding the same `Rc` twice for one node and type is
//! a no-op, and removal needs the same `Rc`.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::NodeId;

/// Native event listener
pub type EventListener = Rc<dyn Fn(&Event)>;

/// Check if two listeners are the same allocation
pub fn same_listener(a: &EventListener, b: &EventListener) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

/// Whether events of this type bubble unless told otherwise
pub fn bubbles_by_default(event_type: &str) -> bool {
    !matches!(
        event_type,
        "focus" | "blur" | "load" | "unload" | "mouseenter" | "mouseleave" | "scroll"
    )
}

/// DOM event
#[derive(Debug)]
pub struct Event {
    event_type: String,
    target: NodeId,
    current_target: Cell<NodeId>,
    bubbles: bool,
    cancelable: bool,
    default_prevented: Cell<bool>,
    propagation_stopped: Cell<bool>,
    immediate_propagation_stopped: Cell<bool>,
}

impl Event {
    /// Create an event with the type's default bubbling behaviour
    pub fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: Cell::new(target),
            bubbles: bubbles_by_default(event_type),
            cancelable: true,
            default_prevented: Cell::new(false),
            propagation_stopped: Cell::new(false),
            immediate_propagation_stopped: Cell::new(false),
        }
    }

    /// Override bubbling
    pub fn with_bubbles(mut self, bubbles: bool) -> Self {
        self.bubbles = bubbles;
        self
    }

    /// Override cancelability
    pub fn with_cancelable(mut self, cancelable: bool) -> Self {
        self.cancelable = cancelable;
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Node the event was dispatched to
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// Node whose listeners are currently running
    pub fn current_target(&self) -> NodeId {
        self.current_target.get()
    }

    pub(crate) fn set_current_target(&self, node: NodeId) {
        self.current_target.set(node);
    }

    pub fn bubbles(&self) -> bool {
        self.bubbles
    }

    /// Prevent default action
    pub fn prevent_default(&self) {
        if self.cancelable {
            self.default_prevented.set(true);
        }
    }

    /// Check if default was prevented
    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    /// Stop propagation after the current node
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    /// Stop propagation, skipping remaining listeners on the current node too
    pub fn stop_immediate_propagation(&self) {
        self.propagation_stopped.set(true);
        self.immediate_propagation_stopped.set(true);
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }

    pub fn is_immediate_propagation_stopped(&self) -> bool {
        self.immediate_propagation_stopped.get()
    }
}

/// Event listeners by (node, event type)
#[derive(Default)]
pub(crate) struct ListenerTable {
    listeners: HashMap<(NodeId, String), Vec<EventListener>>,
}

impl ListenerTable {
    /// Add listener; false if already present
    pub(crate) fn add(&mut self, node: NodeId, event_type: &str, listener: EventListener) -> bool {
        let list = self.listeners.entry((node, event_type.to_string())).or_default();
        if list.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        list.push(listener);
        true
    }

    /// Remove listener, handing back the stored `Rc` if it was registered
    pub(crate) fn remove(&mut self, node: NodeId, event_type: &str, listener: &EventListener) -> Option<EventListener> {
        let key = (node, event_type.to_string());
        let list = self.listeners.get_mut(&key)?;
        let index = list.iter().position(|l| same_listener(l, listener))?;
        let removed = list.remove(index);
        if list.is_empty() {
            self.listeners.remove(&key);
        }
        Some(removed)
    }

    pub(crate) fn contains(&self, node: NodeId, event_type: &str, listener: &EventListener) -> bool {
        self.listeners
            .get(&(node, event_type.to_string()))
            .is_some_and(|list| list.iter().any(|l| same_listener(l, listener)))
    }

    /// Copy of the current listeners, in registration order
    pub(crate) fn snapshot(&self, node: NodeId, event_type: &str) -> Vec<EventListener> {
        self.listeners
            .get(&(node, event_type.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, node: NodeId, event_type: &str) -> usize {
        self.listeners
            .get(&(node, event_type.to_string()))
            .map_or(0, Vec::len)
    }

    pub(crate) fn total(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }
}
