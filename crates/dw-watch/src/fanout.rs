//! # MutationFanout: one mutation observer, many subscribers
//!
//! [`MutationFanout`] owns the single [`MutationObserver`] attached to a
//! root and distributes each delivered batch of records to every live
//! [`Subscription`].
//!
//! ## What it guarantees
//! - The observer is attached exactly while at least one subscription
//!   exists (no idle observation).
//! - Subscribers are notified in registration order; records within one
//!   subscriber follow batch order.
//! - A callback returning `Err` or panicking is logged and skipped; other
//!   subscribers and remaining records are still delivered.
//! - Unsubscribing from inside a callback takes effect immediately and never
//!   causes another subscriber to be skipped or called twice in that pass.
//!
//! ## Delivery
//! ```text
//!   batch ──► snapshot [S1, S2, S3]
//!               │
//!               ├─► S1 live? ─► filter ─► group ? cb(all) : cb(r1), cb(r2) ...
//!               ├─► S2 live? ─► ...
//!               └─► S3 live? ─► ...
//! ```

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use dw_dom::{Document, DomError, MutationObserver, MutationObserverInit, MutationRecord, NodeId, Selector};

use crate::Result;

/// Subscriber callback; ungrouped subscribers receive one record at a time
pub type MutationCallback = Rc<dyn Fn(&[MutationRecord]) -> anyhow::Result<()>>;

/// Record filter, evaluated against the live document
pub type MutationFilter = Rc<dyn Fn(&Document, &MutationRecord) -> bool>;

struct SubscriptionInner {
    callback: MutationCallback,
    filter: Option<MutationFilter>,
    group: bool,
    live: Cell<bool>,
}

/// Handle to one subscription
///
/// Equality is identity: two handles are equal only if they refer to the
/// same registration.
#[derive(Clone)]
pub struct Subscription {
    inner: Rc<SubscriptionInner>,
}

impl Subscription {
    /// Still registered with its fanout
    pub fn is_live(&self) -> bool {
        self.inner.live.get()
    }

    /// Receives filtered records as one batch
    pub fn is_grouped(&self) -> bool {
        self.inner.group
    }

    pub fn callback(&self) -> &MutationCallback {
        &self.inner.callback
    }

    /// Non-owning handle, for callbacks that need to refer to their own
    /// subscription without keeping it alive
    pub fn downgrade(&self) -> WeakSubscription {
        WeakSubscription {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn same_callback(&self, callback: &MutationCallback) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.inner.callback), Rc::as_ptr(callback))
    }

    fn deliver(&self, document: &Document, records: &[MutationRecord]) {
        let matched: Vec<&MutationRecord> = match &self.inner.filter {
            Some(filter) => records.iter().filter(|&r| filter(document, r)).collect(),
            None => records.iter().collect(),
        };

        if self.inner.group {
            if matched.is_empty() {
                return;
            }
            let batch: Vec<MutationRecord> = matched.into_iter().cloned().collect();
            invoke(&self.inner.callback, &batch);
        } else {
            for record in matched {
                if !self.is_live() {
                    break;
                }
                invoke(&self.inner.callback, std::slice::from_ref(record));
            }
        }
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Subscription {}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("filtered", &self.inner.filter.is_some())
            .field("group", &self.inner.group)
            .field("live", &self.inner.live.get())
            .finish()
    }
}

/// Non-owning [`Subscription`] handle
#[derive(Clone, Default)]
pub struct WeakSubscription {
    inner: Weak<SubscriptionInner>,
}

impl WeakSubscription {
    pub fn upgrade(&self) -> Option<Subscription> {
        self.inner.upgrade().map(|inner| Subscription { inner })
    }
}

/// Run one callback, containing its failure
fn invoke(callback: &MutationCallback, records: &[MutationRecord]) {
    match catch_unwind(AssertUnwindSafe(|| callback(records))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(component = "MutationFanout", error = %err, "Error in observer callback");
        }
        Err(panic) => {
            tracing::warn!(
                component = "MutationFanout",
                panic = panic_message(panic.as_ref()),
                "Observer callback panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

struct FanoutState {
    root: NodeId,
    options: MutationObserverInit,
    active: bool,
    subscriptions: Vec<Subscription>,
}

struct FanoutInner {
    document: Rc<Document>,
    observer: MutationObserver,
    state: RefCell<FanoutState>,
}

impl FanoutInner {
    fn deliver(&self, records: &[MutationRecord]) {
        let snapshot = self.state.borrow().subscriptions.clone();
        for subscription in &snapshot {
            if subscription.is_live() {
                subscription.deliver(&self.document, records);
            }
        }
    }
}

/// Shared mutation observer for one root
///
/// Cloning yields another handle to the same fanout.
#[derive(Clone)]
pub struct MutationFanout {
    inner: Rc<FanoutInner>,
}

impl MutationFanout {
    /// Create an idle fanout for `root`; observation starts with the first
    /// subscription
    pub fn new(document: &Rc<Document>, root: NodeId, options: MutationObserverInit) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<FanoutInner>| {
            let weak = weak.clone();
            let observer = MutationObserver::new(
                document,
                Rc::new(move |records: &[MutationRecord]| {
                    if let Some(inner) = weak.upgrade() {
                        inner.deliver(records);
                    }
                }),
            );
            FanoutInner {
                document: document.clone(),
                observer,
                state: RefCell::new(FanoutState {
                    root,
                    options,
                    active: false,
                    subscriptions: Vec::new(),
                }),
            }
        });
        Self { inner }
    }

    pub fn document(&self) -> &Rc<Document> {
        &self.inner.document
    }

    /// Non-owning handle for use inside subscriber callbacks
    pub fn downgrade(&self) -> WeakFanout {
        WeakFanout {
            inner: Rc::downgrade(&self.inner),
        }
    }

    // === Observation lifecycle ===

    /// Start observing; no-op if already active
    pub fn observe(&self) -> Result<()> {
        let mut state = self.inner.state.borrow_mut();
        if state.active {
            return Ok(());
        }
        self.inner.observer.observe(state.root, state.options.clone())?;
        state.active = true;
        tracing::debug!("MutationFanout observing {}", state.root);
        Ok(())
    }

    /// Stop observing without dropping subscriptions; no-op if inactive
    pub fn disconnect(&self) {
        let mut state = self.inner.state.borrow_mut();
        if !state.active {
            return;
        }
        self.inner.observer.disconnect();
        state.active = false;
        tracing::debug!("MutationFanout disconnected from {}", state.root);
    }

    /// Re-observe after a root or options change; on failure `restore` puts
    /// the previous state back so the fanout keeps observing
    fn reconnect(&self, restore: impl FnOnce(&mut FanoutState)) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.disconnect();
        if let Err(err) = self.observe() {
            restore(&mut self.inner.state.borrow_mut());
            if let Err(retry) = self.observe() {
                tracing::warn!(component = "MutationFanout", error = %retry, "Failed to restore observation");
            }
            return Err(err);
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.borrow().active
    }

    pub fn root(&self) -> NodeId {
        self.inner.state.borrow().root
    }

    pub fn options(&self) -> MutationObserverInit {
        self.inner.state.borrow().options.clone()
    }

    /// Change the observed root, reconnecting only if currently active
    ///
    /// An unknown root is rejected and the current one kept.
    pub fn set_root(&self, root: NodeId) -> Result<()> {
        if self.inner.document.tree().get(root).is_none() {
            return Err(DomError::NotFound.into());
        }
        let previous = std::mem::replace(&mut self.inner.state.borrow_mut().root, root);
        self.reconnect(|state| state.root = previous)
    }

    /// Change observation options, reconnecting only if currently active
    ///
    /// Options that observe nothing are rejected and the current ones kept.
    pub fn set_options(&self, options: MutationObserverInit) -> Result<()> {
        options.validate()?;
        let previous = std::mem::replace(&mut self.inner.state.borrow_mut().options, options);
        self.reconnect(|state| state.options = previous)
    }

    // === Subscriptions ===

    /// Subscribe to mutations
    ///
    /// With a `filter`, only records it accepts are delivered. With `group`,
    /// the callback gets all accepted records of a batch at once and is not
    /// called for batches where nothing matched.
    pub fn subscribe(
        &self,
        callback: MutationCallback,
        filter: Option<MutationFilter>,
        group: bool,
    ) -> Result<Subscription> {
        let subscription = Subscription {
            inner: Rc::new(SubscriptionInner {
                callback,
                filter,
                group,
                live: Cell::new(true),
            }),
        };
        self.observe()?;
        self.inner
            .state
            .borrow_mut()
            .subscriptions
            .push(subscription.clone());
        Ok(subscription)
    }

    /// Subscribe with a context value handed to every call
    pub fn subscribe_with<C, F>(
        &self,
        context: Rc<C>,
        callback: F,
        filter: Option<MutationFilter>,
        group: bool,
    ) -> Result<Subscription>
    where
        C: 'static,
        F: Fn(&C, &[MutationRecord]) -> anyhow::Result<()> + 'static,
    {
        self.subscribe(Rc::new(move |records: &[MutationRecord]| callback(&*context, records)), filter, group)
    }

    /// Subscribe to records that touch an element matching `selector`
    ///
    /// See [`selector_filter`] for the matching rule.
    pub fn subscribe_to_selector(
        &self,
        callback: MutationCallback,
        selector: &str,
        group: bool,
    ) -> Result<Subscription> {
        let selector = Selector::parse(selector)?;
        self.subscribe(callback, Some(selector_filter(selector)), group)
    }

    /// Remove a subscription; disconnects when none remain
    ///
    /// Unknown or already removed handles are ignored. Returns whether
    /// anything was removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.remove_where(|s| s == subscription)
    }

    /// Remove the earliest subscription registered with `callback`
    pub fn unsubscribe_callback(&self, callback: &MutationCallback) -> bool {
        self.remove_where(|s| s.same_callback(callback))
    }

    fn remove_where(&self, pred: impl Fn(&Subscription) -> bool) -> bool {
        let (removed, now_empty) = {
            let mut state = self.inner.state.borrow_mut();
            match state.subscriptions.iter().position(|s| pred(s)) {
                Some(index) => {
                    let removed = state.subscriptions.remove(index);
                    removed.inner.live.set(false);
                    (Some(removed), state.subscriptions.is_empty())
                }
                None => (None, false),
            }
        };
        if now_empty {
            self.disconnect();
        }
        removed.is_some()
    }

    /// Remove every subscription and disconnect
    pub fn unsubscribe_all(&self) {
        let removed = std::mem::take(&mut self.inner.state.borrow_mut().subscriptions);
        for subscription in &removed {
            subscription.inner.live.set(false);
        }
        self.disconnect();
        tracing::debug!("MutationFanout dropped {} subscriptions", removed.len());
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.inner.state.borrow().subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live subscriptions in registration order
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.state.borrow().subscriptions.clone()
    }
}

impl fmt::Debug for MutationFanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("MutationFanout")
            .field("root", &state.root)
            .field("active", &state.active)
            .field("subscriptions", &state.subscriptions.len())
            .finish()
    }
}

/// Non-owning [`MutationFanout`] handle
#[derive(Clone)]
pub struct WeakFanout {
    inner: Weak<FanoutInner>,
}

impl WeakFanout {
    pub fn upgrade(&self) -> Option<MutationFanout> {
        self.inner.upgrade().map(|inner| MutationFanout { inner })
    }
}

/// Filter for records affecting elements that match `selector`
///
/// A record matches when its target matches, or when any added or removed
/// element matches or contains a matching descendant. One match is enough;
/// several matches in the same record mean nothing more.
pub fn selector_filter(selector: Selector) -> MutationFilter {
    Rc::new(move |document: &Document, record: &MutationRecord| {
        let tree = document.tree();
        tree.matches(record.target, &selector)
            || record
                .added_nodes
                .iter()
                .chain(&record.removed_nodes)
                .any(|&node| {
                    tree.is_element(node)
                        && (tree.matches(node, &selector) || tree.query_selector(node, &selector).is_some())
                })
    })
}
