//! Document - High-level document API
//!
//! Owns the tree, the registered mutation observers and the event listener
//! table. All methods take `&self`; no internal borrow is held while an
//! observer callback or event listener runs, so callbacks may freely mutate
//! the document, observe, disconnect or add and remove listeners.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::event::ListenerTable;
use crate::mutation::ObserverRegistration;
use crate::{
    DomError, DomResult, DomTree, Event, EventListener, MutationCallbackFn, MutationObserverInit,
    MutationRecord, Node, NodeId, ObserverId, Selector,
};

/// HTML Document
pub struct Document {
    url: String,
    tree: RefCell<DomTree>,
    observers: RefCell<Vec<ObserverRegistration>>,
    listeners: RefCell<ListenerTable>,
    next_observer_id: Cell<ObserverId>,
    html_element: NodeId,
    head_element: NodeId,
    body_element: NodeId,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("url", &self.url)
            .field("nodes", &self.tree.borrow().len())
            .field("observers", &self.observers.borrow().len())
            .finish()
    }
}

impl Document {
    /// Create a document with `<html><head></head><body></body></html>`
    pub fn new(url: &str) -> Rc<Self> {
        let mut tree = DomTree::new();

        let html = tree.create_element("html");
        let head = tree.create_element("head");
        let body = tree.create_element("body");

        let linked = tree
            .append_child(tree.root(), html)
            .and_then(|_| tree.append_child(html, head))
            .and_then(|_| tree.append_child(html, body));
        debug_assert!(linked.is_ok(), "fresh elements always link");

        Rc::new(Self::with_tree(url, tree, html, head, body))
    }

    /// Create an empty document (no structure)
    pub fn empty(url: &str) -> Rc<Self> {
        Rc::new(Self::with_tree(url, DomTree::new(), NodeId::NONE, NodeId::NONE, NodeId::NONE))
    }

    fn with_tree(url: &str, tree: DomTree, html: NodeId, head: NodeId, body: NodeId) -> Self {
        Self {
            url: url.to_string(),
            tree: RefCell::new(tree),
            observers: RefCell::new(Vec::new()),
            listeners: RefCell::new(ListenerTable::default()),
            next_observer_id: Cell::new(1),
            html_element: html,
            head_element: head,
            body_element: body,
        }
    }

    /// Get document URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get <html> element
    pub fn document_element(&self) -> NodeId {
        self.html_element
    }

    /// Get <head> element
    pub fn head(&self) -> NodeId {
        self.head_element
    }

    /// Get <body> element
    pub fn body(&self) -> NodeId {
        self.body_element
    }

    /// Access the DOM tree
    ///
    /// Do not hold the returned guard across calls that mutate the document.
    pub fn tree(&self) -> Ref<'_, DomTree> {
        self.tree.borrow()
    }

    // === Tree construction and mutation ===

    /// Create a detached element
    pub fn create_element(&self, tag_name: &str) -> NodeId {
        self.tree.borrow_mut().create_element(tag_name)
    }

    /// Create a detached text node
    pub fn create_text(&self, content: &str) -> NodeId {
        self.tree.borrow_mut().create_text(content)
    }

    /// Append `child` to `parent`
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` before `reference` (or append when `None`)
    ///
    /// Moving a node that already has a parent queues a removal record on
    /// the old parent before the insertion record.
    pub fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> DomResult<()> {
        let (removal, insertion) = {
            let mut tree = self.tree.borrow_mut();
            tree.check_insert(parent, child, reference)?;

            let removal = tree.parent(child).map(|old_parent| {
                MutationRecord::child_list(
                    old_parent,
                    Vec::new(),
                    vec![child],
                    tree.prev_sibling(child),
                    tree.next_sibling(child),
                )
            });

            tree.insert_before(parent, child, reference)?;

            let insertion = MutationRecord::child_list(
                parent,
                vec![child],
                Vec::new(),
                tree.prev_sibling(child),
                tree.next_sibling(child),
            );
            (removal, insertion)
        };

        if let Some(removal) = removal {
            self.queue_mutation(removal);
        }
        self.queue_mutation(insertion);
        Ok(())
    }

    /// Remove `child` from `parent`
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        let record = {
            let mut tree = self.tree.borrow_mut();
            let prev = tree.prev_sibling(child);
            let next = tree.next_sibling(child);
            tree.remove_child(parent, child)?;
            MutationRecord::child_list(parent, Vec::new(), vec![child], prev, next)
        };
        self.queue_mutation(record);
        Ok(())
    }

    /// Remove `node` from its parent, if it has one
    pub fn remove(&self, node: NodeId) -> DomResult<()> {
        let parent = {
            let tree = self.tree.borrow();
            tree.get(node).ok_or(DomError::NotFound)?;
            tree.parent(node)
        };
        match parent {
            Some(parent) => self.remove_child(parent, node),
            None => Ok(()),
        }
    }

    /// Set an attribute on an element
    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> DomResult<()> {
        let old = {
            let mut tree = self.tree.borrow_mut();
            let elem = tree
                .get_mut(node)
                .ok_or(DomError::NotFound)?
                .as_element_mut()
                .ok_or(DomError::InvalidNodeType)?;
            elem.set_attr(name, value)
        };
        self.queue_mutation(MutationRecord::attributes(node, name, old));
        Ok(())
    }

    /// Remove an attribute; no record when it was absent
    pub fn remove_attribute(&self, node: NodeId, name: &str) -> DomResult<()> {
        let old = {
            let mut tree = self.tree.borrow_mut();
            let elem = tree
                .get_mut(node)
                .ok_or(DomError::NotFound)?
                .as_element_mut()
                .ok_or(DomError::InvalidNodeType)?;
            elem.remove_attr(name)
        };
        if let Some(old) = old {
            self.queue_mutation(MutationRecord::attributes(node, name, Some(old)));
        }
        Ok(())
    }

    /// Replace the data of a text or comment node
    pub fn set_text(&self, node: NodeId, text: &str) -> DomResult<()> {
        let old = {
            let mut tree = self.tree.borrow_mut();
            let data = tree
                .get_mut(node)
                .ok_or(DomError::NotFound)?
                .character_data_mut()
                .ok_or(DomError::InvalidNodeType)?;
            std::mem::replace(data, text.to_string())
        };
        self.queue_mutation(MutationRecord::character_data(node, old));
        Ok(())
    }

    // === Queries ===

    /// Get connected element by id attribute
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.tree.borrow().find_by_id(NodeId::ROOT, id)
    }

    /// Inclusive descendant check
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.tree.borrow().contains(ancestor, node)
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.tree.borrow().is_connected(node)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.borrow().parent(node)
    }

    /// Check if element matches selector
    pub fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        self.tree.borrow().matches(node, selector)
    }

    /// First matching descendant, parsing `selector` first
    pub fn query_selector(&self, root: NodeId, selector: &str) -> DomResult<Option<NodeId>> {
        let selector = Selector::parse(selector)?;
        Ok(self.tree.borrow().query_selector(root, &selector))
    }

    /// Tag name of an element
    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        self.tree
            .borrow()
            .get(node)
            .and_then(Node::as_element)
            .map(|e| e.tag_name().to_string())
    }

    /// Attribute value of an element
    pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.tree
            .borrow()
            .get(node)
            .and_then(Node::as_element)
            .and_then(|e| e.get_attr(name))
            .map(str::to_string)
    }

    // === Mutation observers ===

    pub(crate) fn register_observer(&self, callback: MutationCallbackFn) -> ObserverId {
        let id = self.next_observer_id.get();
        self.next_observer_id.set(id + 1);
        self.observers
            .borrow_mut()
            .push(ObserverRegistration::new(id, callback));
        id
    }

    pub(crate) fn unregister_observer(&self, id: ObserverId) {
        // Dropping the callback may run arbitrary destructors; do it unborrowed
        let removed = {
            let mut observers = self.observers.borrow_mut();
            observers
                .iter()
                .position(|o| o.id == id)
                .map(|index| observers.remove(index))
        };
        drop(removed);
    }

    pub(crate) fn observe_node(
        &self,
        id: ObserverId,
        target: NodeId,
        options: MutationObserverInit,
    ) -> DomResult<()> {
        if self.tree.borrow().get(target).is_none() {
            return Err(DomError::NotFound);
        }
        let options = options.normalized()?;

        let mut observers = self.observers.borrow_mut();
        let registration = observers
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(DomError::NotFound)?;
        registration.observe(target, options);
        tracing::debug!("Observer {} observing {}", id, target);
        Ok(())
    }

    pub(crate) fn disconnect_observer(&self, id: ObserverId) {
        if let Some(registration) = self.observers.borrow_mut().iter_mut().find(|o| o.id == id) {
            registration.disconnect();
            tracing::debug!("Observer {} disconnected", id);
        }
    }

    pub(crate) fn take_observer_records(&self, id: ObserverId) -> Vec<MutationRecord> {
        self.observers
            .borrow_mut()
            .iter_mut()
            .find(|o| o.id == id)
            .map(|o| std::mem::take(&mut o.pending))
            .unwrap_or_default()
    }

    pub(crate) fn observer_is_observing(&self, id: ObserverId, node: NodeId) -> bool {
        self.observers
            .borrow()
            .iter()
            .any(|o| o.id == id && o.is_observing(node))
    }

    fn queue_mutation(&self, record: MutationRecord) {
        let tree = self.tree.borrow();
        for registration in self.observers.borrow_mut().iter_mut() {
            registration.record(&tree, &record);
        }
    }

    /// Whether any observer has undelivered records
    pub fn has_pending_mutations(&self) -> bool {
        self.observers.borrow().iter().any(|o| !o.pending.is_empty())
    }

    /// Deliver queued records, one batch per observer in creation order
    ///
    /// Repeats until no observer has pending records, so mutations made by
    /// callbacks are delivered in a following round. Returns the number of
    /// batches delivered.
    pub fn notify_mutation_observers(&self) -> usize {
        let mut delivered = 0;
        loop {
            let ready: Vec<ObserverId> = self
                .observers
                .borrow()
                .iter()
                .filter(|o| !o.pending.is_empty())
                .map(|o| o.id)
                .collect();
            if ready.is_empty() {
                break;
            }

            for id in ready {
                // Re-check: an earlier callback may have disconnected this one
                let batch = {
                    let mut observers = self.observers.borrow_mut();
                    observers
                        .iter_mut()
                        .find(|o| o.id == id)
                        .filter(|o| !o.pending.is_empty())
                        .map(|o| (o.callback.clone(), std::mem::take(&mut o.pending)))
                };
                if let Some((callback, records)) = batch {
                    tracing::debug!("Delivering {} mutation records to observer {}", records.len(), id);
                    callback(&records);
                    delivered += 1;
                }
            }
        }
        delivered
    }

    // === Events ===

    /// Add event listener; false if this exact listener is already present
    pub fn add_event_listener(&self, node: NodeId, event_type: &str, listener: EventListener) -> DomResult<bool> {
        if self.tree.borrow().get(node).is_none() {
            return Err(DomError::NotFound);
        }
        Ok(self.listeners.borrow_mut().add(node, event_type, listener))
    }

    /// Remove event listener; false if it was not registered
    pub fn remove_event_listener(&self, node: NodeId, event_type: &str, listener: &EventListener) -> bool {
        // The removed listener is dropped only after the table borrow ends
        let removed = self.listeners.borrow_mut().remove(node, event_type, listener);
        removed.is_some()
    }

    /// Number of listeners for a node and type
    pub fn listener_count(&self, node: NodeId, event_type: &str) -> usize {
        self.listeners.borrow().count(node, event_type)
    }

    /// Number of listeners across the whole document
    pub fn total_listener_count(&self) -> usize {
        self.listeners.borrow().total()
    }

    /// Dispatch an event at its target, then bubble through ancestors
    ///
    /// Listeners removed during dispatch are not invoked; listeners added
    /// during dispatch run from the next dispatch on. Returns `false` if a
    /// listener prevented the default action.
    pub fn dispatch_event(&self, event: &Event) -> DomResult<bool> {
        let path: Vec<NodeId> = {
            let tree = self.tree.borrow();
            if tree.get(event.target()).is_none() {
                return Err(DomError::NotFound);
            }
            let ancestors: Vec<NodeId> = if event.bubbles() {
                tree.ancestors(event.target()).collect()
            } else {
                Vec::new()
            };
            std::iter::once(event.target()).chain(ancestors).collect()
        };

        for node in path {
            event.set_current_target(node);
            let listeners = self.listeners.borrow().snapshot(node, event.event_type());
            for listener in listeners {
                if event.is_immediate_propagation_stopped() {
                    break;
                }
                if !self.listeners.borrow().contains(node, event.event_type(), &listener) {
                    continue;
                }
                listener(event);
            }
            if event.is_propagation_stopped() {
                break;
            }
        }

        Ok(!event.is_default_prevented())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MutationObserver, MutationType};

    fn recorder(document: &Rc<Document>) -> (MutationObserver, Rc<RefCell<Vec<Vec<MutationRecord>>>>) {
        let batches = Rc::new(RefCell::new(Vec::new()));
        let sink = batches.clone();
        let observer = MutationObserver::new(
            document,
            Rc::new(move |records: &[MutationRecord]| sink.borrow_mut().push(records.to_vec())),
        );
        (observer, batches)
    }

    #[test]
    fn test_document_structure() {
        let doc = Document::new("about:blank");
        let tree = doc.tree();
        assert_eq!(tree.parent(doc.body()), Some(doc.document_element()));
        assert!(tree.is_connected(doc.head()));
    }

    #[test]
    fn test_debug_shows_url() {
        let doc = Document::new("about:blank");
        let text = format!("{doc:?}");
        assert!(text.starts_with("Document"));
        assert!(text.contains("about:blank"));
    }

    #[test]
    fn test_batch_delivery() {
        let doc = Document::new("about:blank");
        let (observer, batches) = recorder(&doc);
        observer.observe(doc.body(), MutationObserverInit::subtree_changes()).unwrap();

        let div = doc.create_element("div");
        doc.append_child(doc.body(), div).unwrap();
        doc.set_attribute(div, "class", "x").unwrap();
        assert!(batches.borrow().is_empty());

        assert_eq!(doc.notify_mutation_observers(), 1);
        let batches = batches.borrow();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0][0].mutation_type, MutationType::ChildList);
        assert_eq!(batches[0][0].added_nodes, vec![div]);
        assert_eq!(batches[0][1].mutation_type, MutationType::Attributes);
    }

    #[test]
    fn test_move_queues_removal_then_insertion() {
        let doc = Document::new("about:blank");
        let a = doc.create_element("div");
        let b = doc.create_element("div");
        let item = doc.create_element("span");
        doc.append_child(doc.body(), a).unwrap();
        doc.append_child(doc.body(), b).unwrap();
        doc.append_child(a, item).unwrap();

        let (observer, batches) = recorder(&doc);
        observer.observe(doc.body(), MutationObserverInit::child_list_subtree()).unwrap();
        doc.append_child(b, item).unwrap();
        doc.notify_mutation_observers();

        let batches = batches.borrow();
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0][0].target, a);
        assert_eq!(batches[0][0].removed_nodes, vec![item]);
        assert_eq!(batches[0][1].target, b);
        assert_eq!(batches[0][1].added_nodes, vec![item]);
    }

    #[test]
    fn test_disconnect_drops_pending() {
        let doc = Document::new("about:blank");
        let (observer, batches) = recorder(&doc);
        observer.observe(doc.body(), MutationObserverInit::subtree_changes()).unwrap();

        let div = doc.create_element("div");
        doc.append_child(doc.body(), div).unwrap();
        observer.disconnect();
        assert!(!doc.has_pending_mutations());
        assert_eq!(doc.notify_mutation_observers(), 0);
        assert!(batches.borrow().is_empty());
        assert!(!observer.is_observing(doc.body()));
    }

    #[test]
    fn test_dropped_observer_unregisters() {
        let doc = Document::new("about:blank");
        let (observer, batches) = recorder(&doc);
        observer.observe(doc.body(), MutationObserverInit::subtree_changes()).unwrap();
        drop(observer);

        let div = doc.create_element("div");
        doc.append_child(doc.body(), div).unwrap();
        assert_eq!(doc.notify_mutation_observers(), 0);
        assert!(batches.borrow().is_empty());
    }

    #[test]
    fn test_old_values() {
        let doc = Document::new("about:blank");
        let (observer, _) = recorder(&doc);
        observer
            .observe(doc.body(), MutationObserverInit {
                attribute_old_value: true,
                subtree: true,
                ..Default::default()
            })
            .unwrap();

        doc.set_attribute(doc.body(), "class", "a").unwrap();
        doc.set_attribute(doc.body(), "class", "b").unwrap();
        doc.remove_attribute(doc.body(), "missing").unwrap();

        let records = observer.take_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].old_value, None);
        assert_eq!(records[1].old_value.as_deref(), Some("a"));
    }

    #[test]
    fn test_dispatch_bubbles_and_stops() {
        let doc = Document::new("about:blank");
        let button = doc.create_element("button");
        doc.append_child(doc.body(), button).unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        let on_button = {
            let log = log.clone();
            Rc::new(move |e: &Event| log.borrow_mut().push(("button", e.current_target())))
        };
        let on_body = {
            let log = log.clone();
            Rc::new(move |e: &Event| {
                log.borrow_mut().push(("body", e.current_target()));
                e.stop_propagation();
            })
        };
        let on_html = {
            let log = log.clone();
            Rc::new(move |_: &Event| log.borrow_mut().push(("html", NodeId::NONE)))
        };
        doc.add_event_listener(button, "click", on_button).unwrap();
        doc.add_event_listener(doc.body(), "click", on_body).unwrap();
        doc.add_event_listener(doc.document_element(), "click", on_html).unwrap();

        assert!(doc.dispatch_event(&Event::new("click", button)).unwrap());
        assert_eq!(*log.borrow(), vec![("button", button), ("body", doc.body())]);
    }

    #[test]
    fn test_listener_removed_during_dispatch_is_skipped() {
        let doc = Document::new("about:blank");
        let node = doc.body();
        let hits = Rc::new(Cell::new(0));

        let second: EventListener = {
            let hits = hits.clone();
            Rc::new(move |_: &Event| hits.set(hits.get() + 10))
        };
        let first: EventListener = {
            let doc = Rc::downgrade(&doc);
            let second = second.clone();
            let hits = hits.clone();
            Rc::new(move |_: &Event| {
                hits.set(hits.get() + 1);
                if let Some(doc) = doc.upgrade() {
                    doc.remove_event_listener(node, "click", &second);
                }
            })
        };
        doc.add_event_listener(node, "click", first).unwrap();
        doc.add_event_listener(node, "click", second).unwrap();

        doc.dispatch_event(&Event::new("click", node)).unwrap();
        assert_eq!(hits.get(), 1);
        assert_eq!(doc.listener_count(node, "click"), 1);
    }
}
