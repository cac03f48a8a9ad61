//! Mount lifecycle tracking
//!
//! One-shot watches for a node becoming attached to, or detached from, the
//! observed root. Each watch is a fanout subscription that removes itself
//! the first time its condition holds, then runs the callback.

use std::cell::{OnceCell, RefCell};
use std::rc::Rc;

use dw_dom::{Document, MutationRecord, NodeId};

use crate::Result;
use crate::fanout::{MutationCallback, MutationFanout, MutationFilter, Subscription, WeakSubscription};

type PendingCallback = RefCell<Option<Box<dyn FnOnce()>>>;

/// Attach/detach notifications built on a [`MutationFanout`]
#[derive(Debug, Clone)]
pub struct MountTracker {
    fanout: MutationFanout,
}

impl MountTracker {
    pub fn new(fanout: MutationFanout) -> Self {
        Self { fanout }
    }

    pub fn fanout(&self) -> &MutationFanout {
        &self.fanout
    }

    /// Run `callback` once when `node` is added (`on_mount`) or removed
    ///
    /// A record satisfies the watch when `node` itself, or one of its
    /// ancestors, is among the record's added (or removed) nodes.
    pub fn on_mount_change(
        &self,
        node: NodeId,
        callback: impl FnOnce() + 'static,
        on_mount: bool,
    ) -> Result<Subscription> {
        let filter: MutationFilter = Rc::new(move |document: &Document, record: &MutationRecord| {
            let nodes = if on_mount { &record.added_nodes } else { &record.removed_nodes };
            let tree = document.tree();
            nodes.iter().any(|&listed| tree.contains(listed, node))
        });

        let pending: PendingCallback = RefCell::new(Some(Box::new(callback)));
        let this: Rc<OnceCell<WeakSubscription>> = Rc::default();
        let fanout = self.fanout.downgrade();
        let slot = this.clone();
        let fire: MutationCallback = Rc::new(move |_: &[MutationRecord]| -> anyhow::Result<()> {
            let Some(callback) = pending.borrow_mut().take() else {
                return Ok(());
            };
            if let (Some(fanout), Some(subscription)) =
                (fanout.upgrade(), slot.get().and_then(WeakSubscription::upgrade))
            {
                fanout.unsubscribe(&subscription);
            }
            tracing::debug!("{} {}", node, if on_mount { "mounted" } else { "unmounted" });
            callback();
            Ok(())
        });

        let subscription = self.fanout.subscribe(fire, Some(filter), false)?;
        let _ = this.set(subscription.downgrade());
        Ok(subscription)
    }

    /// Run `callback` once when `node` is attached
    pub fn on_mount(&self, node: NodeId, callback: impl FnOnce() + 'static) -> Result<Subscription> {
        self.on_mount_change(node, callback, true)
    }

    /// Run `callback` once when `node` is detached
    pub fn on_unmount(&self, node: NodeId, callback: impl FnOnce() + 'static) -> Result<Subscription> {
        self.on_mount_change(node, callback, false)
    }

    /// Alias of [`on_mount`](Self::on_mount)
    pub fn on_added(&self, node: NodeId, callback: impl FnOnce() + 'static) -> Result<Subscription> {
        self.on_mount(node, callback)
    }

    /// Alias of [`on_unmount`](Self::on_unmount)
    pub fn on_removed(&self, node: NodeId, callback: impl FnOnce() + 'static) -> Result<Subscription> {
        self.on_unmount(node, callback)
    }

    /// Drop a pending watch; false if it already fired or was cancelled
    pub fn cancel(&self, watch: &Subscription) -> bool {
        self.fanout.unsubscribe(watch)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use dw_dom::MutationObserverInit;

    use super::*;

    fn tracker() -> (Rc<Document>, MountTracker) {
        let doc = Document::new("about:blank");
        let fanout = MutationFanout::new(&doc, doc.body(), MutationObserverInit::child_list_subtree());
        (doc, MountTracker::new(fanout))
    }

    fn flag() -> (Rc<Cell<usize>>, impl FnOnce() + 'static) {
        let count = Rc::new(Cell::new(0));
        let inner = count.clone();
        (count, move || inner.set(inner.get() + 1))
    }

    #[test]
    fn test_mount_fires_for_descendant_of_added_node() {
        let (doc, mounts) = tracker();
        let wrapper = doc.create_element("div");
        let node = doc.create_element("span");
        doc.append_child(wrapper, node).unwrap();
        let (count, callback) = flag();

        let watch = mounts.on_mount(node, callback).unwrap();
        doc.append_child(doc.body(), wrapper).unwrap();
        doc.notify_mutation_observers();

        assert_eq!(count.get(), 1);
        assert!(!watch.is_live());
        assert!(!mounts.fanout().is_active());
    }

    #[test]
    fn test_unrelated_insert_does_not_fire() {
        let (doc, mounts) = tracker();
        let node = doc.create_element("span");
        let other = doc.create_element("div");
        let (count, callback) = flag();

        let watch = mounts.on_mount(node, callback).unwrap();
        doc.append_child(doc.body(), other).unwrap();
        doc.notify_mutation_observers();

        assert_eq!(count.get(), 0);
        assert!(watch.is_live());
    }

    #[test]
    fn test_unmount() {
        let (doc, mounts) = tracker();
        let node = doc.create_element("span");
        doc.append_child(doc.body(), node).unwrap();
        let (count, callback) = flag();

        mounts.on_removed(node, callback).unwrap();
        doc.remove(node).unwrap();
        doc.notify_mutation_observers();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_several_matching_records_fire_once() {
        let (doc, mounts) = tracker();
        let node = doc.create_element("span");
        let (count, callback) = flag();

        mounts.on_added(node, callback).unwrap();
        doc.append_child(doc.body(), node).unwrap();
        doc.remove(node).unwrap();
        doc.append_child(doc.body(), node).unwrap();
        doc.notify_mutation_observers();

        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_cancel_pending_watch() {
        let (doc, mounts) = tracker();
        let node = doc.create_element("span");
        let (count, callback) = flag();

        let watch = mounts.on_mount(node, callback).unwrap();
        assert!(mounts.cancel(&watch));
        assert!(!mounts.cancel(&watch));
        assert!(!mounts.fanout().is_active());

        doc.append_child(doc.body(), node).unwrap();
        doc.notify_mutation_observers();
        assert_eq!(count.get(), 0);
    }
}
