//! # Namespaced event registry
//!
//! Attaches direct or delegated listeners to document nodes. An event
//! specification is `"type"` or `"type.namespace"`; namespaced listeners are
//! tracked so they can be removed in bulk.
//!
//! ```text
//! namespaces: "foo" ─► [ click @#5, keyup @#5, click @#9 ]
//!             "bar" ─► [ scroll @#2 ]
//! wrapped:           [ delegated/once listeners without a namespace ]
//! ```
//!
//! Plain listeners without a namespace are not tracked at all: the native
//! listener is the caller's own callback and only its [`CancelListener`] or a
//! matching [`EventRegistry::off`] removes it.

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use dw_dom::{Document, Event, EventListener, NodeId, Selector, same_listener};

use crate::{Result, WatchError};

/// Caller-supplied event callback
pub type EventCallback = EventListener;

/// Parsed `"type.namespace"` specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpec {
    /// Event type; empty for `".namespace"`
    pub event_type: String,
    /// Text after the first dot, if any
    pub namespace: Option<String>,
}

impl EventSpec {
    /// Split at the first dot; an empty namespace counts as none
    ///
    /// The namespace is the whole remainder, so `"click.a.b"` has namespace
    /// `"a.b"` rather than `"a"`.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('.') {
            Some((event_type, namespace)) => Self {
                event_type: event_type.to_string(),
                namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
            },
            None => Self {
                event_type: spec.to_string(),
                namespace: None,
            },
        }
    }
}

/// Where a listener's bookkeeping record lives
#[derive(Debug, Clone, PartialEq, Eq)]
enum RecordLocation {
    Namespace(String),
    Wrapped,
}

struct ListenerRecord {
    id: u64,
    event_type: String,
    target: NodeId,
    /// The caller's callback, not the native wrapper
    callback: EventCallback,
    delegate: Option<String>,
    cancel: CancelListener,
}

#[derive(Default)]
struct RegistryState {
    namespaces: HashMap<String, Vec<ListenerRecord>>,
    wrapped: Vec<ListenerRecord>,
    next_id: u64,
}

impl RegistryState {
    fn push(&mut self, location: &RecordLocation, record: ListenerRecord) {
        match location {
            RecordLocation::Namespace(ns) => self.namespaces.entry(ns.clone()).or_default().push(record),
            RecordLocation::Wrapped => self.wrapped.push(record),
        }
    }

    fn remove(&mut self, location: &RecordLocation, id: u64) -> Option<ListenerRecord> {
        match location {
            RecordLocation::Namespace(ns) => {
                let records = self.namespaces.get_mut(ns)?;
                let index = records.iter().position(|r| r.id == id)?;
                let record = records.remove(index);
                if records.is_empty() {
                    self.namespaces.remove(ns);
                }
                Some(record)
            }
            RecordLocation::Wrapped => {
                let index = self.wrapped.iter().position(|r| r.id == id)?;
                Some(self.wrapped.remove(index))
            }
        }
    }

    fn records(&self) -> impl Iterator<Item = &ListenerRecord> {
        self.wrapped.iter().chain(self.namespaces.values().flatten())
    }
}

struct CancelInner {
    document: Weak<Document>,
    target: NodeId,
    event_type: String,
    /// Native listener; `None` once cancelled
    listener: RefCell<Option<EventCallback>>,
    record: Option<(RecordLocation, u64)>,
    state: Weak<RefCell<RegistryState>>,
}

/// Cancels one registered listener
///
/// Detaches the native listener and removes its bookkeeping record.
/// Cancelling more than once has no further effect.
#[derive(Clone)]
pub struct CancelListener {
    inner: Rc<CancelInner>,
}

impl CancelListener {
    pub fn cancel(&self) {
        let Some(listener) = self.inner.listener.borrow_mut().take() else {
            return;
        };
        if let Some(document) = self.inner.document.upgrade() {
            document.remove_event_listener(self.inner.target, &self.inner.event_type, &listener);
        }
        if let (Some((location, id)), Some(state)) = (&self.inner.record, self.inner.state.upgrade()) {
            let removed = state.borrow_mut().remove(location, *id);
            drop(removed);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.listener.borrow().is_none()
    }

    pub fn target(&self) -> NodeId {
        self.inner.target
    }

    pub fn event_type(&self) -> &str {
        &self.inner.event_type
    }

    fn downgrade(&self) -> Weak<CancelInner> {
        Rc::downgrade(&self.inner)
    }
}

impl fmt::Debug for CancelListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelListener")
            .field("target", &self.inner.target)
            .field("event_type", &self.inner.event_type)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Registry of direct, delegated and namespaced listeners for one document
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct EventRegistry {
    document: Rc<Document>,
    state: Rc<RefCell<RegistryState>>,
}

impl EventRegistry {
    pub fn new(document: &Rc<Document>) -> Self {
        Self {
            document: document.clone(),
            state: Rc::default(),
        }
    }

    pub fn document(&self) -> &Rc<Document> {
        &self.document
    }

    /// Listen for `spec` on `node`
    ///
    /// With a `delegate` selector the callback runs only for events whose
    /// target matches it.
    pub fn on(
        &self,
        node: NodeId,
        spec: &str,
        delegate: Option<&str>,
        callback: EventCallback,
    ) -> Result<CancelListener> {
        self.register(node, spec, delegate, callback, false)
    }

    /// Like [`on`](Self::on), but detaches after the first qualifying event
    pub fn once(
        &self,
        node: NodeId,
        spec: &str,
        delegate: Option<&str>,
        callback: EventCallback,
    ) -> Result<CancelListener> {
        self.register(node, spec, delegate, callback, true)
    }

    fn register(
        &self,
        node: NodeId,
        spec: &str,
        delegate: Option<&str>,
        callback: EventCallback,
        once: bool,
    ) -> Result<CancelListener> {
        let parsed = EventSpec::parse(spec);
        if parsed.event_type.is_empty() {
            return Err(WatchError::MissingEventType(spec.to_string()));
        }
        let selector = delegate.map(Selector::parse).transpose()?;

        let slot: Rc<OnceCell<Weak<CancelInner>>> = Rc::default();
        // Namespaced listeners get their own allocation even without a
        // delegate, so removing them never detaches a plain registration of
        // the same callback.
        let plain = selector.is_none() && !once && parsed.namespace.is_none();
        let native: EventCallback = if plain {
            callback.clone()
        } else {
            wrap(&self.document, selector, once, slot.clone(), callback.clone())
        };

        if !self.document.add_event_listener(node, &parsed.event_type, native.clone())? {
            tracing::debug!("Listener for {} on {} was already attached", parsed.event_type, node);
        }

        let location = match &parsed.namespace {
            Some(ns) => Some(RecordLocation::Namespace(ns.clone())),
            None if !plain => Some(RecordLocation::Wrapped),
            None => None,
        };

        let mut state = self.state.borrow_mut();
        let record = location.map(|location| {
            state.next_id += 1;
            (location, state.next_id)
        });
        let cancel = CancelListener {
            inner: Rc::new(CancelInner {
                document: Rc::downgrade(&self.document),
                target: node,
                event_type: parsed.event_type.clone(),
                listener: RefCell::new(Some(native)),
                record: record.clone(),
                state: Rc::downgrade(&self.state),
            }),
        };
        let _ = slot.set(cancel.downgrade());

        if let Some((location, id)) = record {
            state.push(
                &location,
                ListenerRecord {
                    id,
                    event_type: parsed.event_type,
                    target: node,
                    callback,
                    delegate: delegate.map(str::to_string),
                    cancel: cancel.clone(),
                },
            );
        }
        Ok(cancel)
    }

    /// Remove listeners from `node`
    ///
    /// - `"type.ns"`: every `type` listener of namespace `ns` on `node`
    /// - `".ns"`: every listener of namespace `ns` on `node`
    /// - `"type"` with a callback: the one listener registered with that
    ///   callback and delegate, preferring a plain registration over a
    ///   namespaced one
    ///
    /// Anything else matches nothing. Returns the number of listeners removed.
    pub fn off(
        &self,
        node: NodeId,
        spec: &str,
        delegate: Option<&str>,
        callback: Option<&EventCallback>,
    ) -> usize {
        let parsed = EventSpec::parse(spec);
        if let Some(namespace) = &parsed.namespace {
            return self.cancel_namespace(namespace, |r| {
                r.target == node && (parsed.event_type.is_empty() || r.event_type == parsed.event_type)
            });
        }

        let Some(callback) = callback else {
            tracing::debug!("off({}, {:?}) without callback or namespace matches nothing", node, spec);
            return 0;
        };
        if parsed.event_type.is_empty() {
            return 0;
        }

        if delegate.is_none() && self.document.remove_event_listener(node, &parsed.event_type, callback) {
            return 1;
        }

        let tracked = self
            .state
            .borrow()
            .records()
            .find(|r| {
                r.target == node
                    && r.event_type == parsed.event_type
                    && same_listener(&r.callback, callback)
                    && r.delegate.as_deref() == delegate
            })
            .map(|r| r.cancel.clone());

        match tracked {
            Some(cancel) => {
                cancel.cancel();
                1
            }
            None => 0,
        }
    }

    /// Remove every listener of a namespace, across all nodes
    ///
    /// `".ns"` removes the whole namespace, `"type.ns"` only its `type`
    /// listeners. Unknown namespaces are a no-op.
    pub fn off_namespace(&self, spec: &str) -> Result<usize> {
        let parsed = EventSpec::parse(spec);
        let namespace = parsed
            .namespace
            .ok_or_else(|| WatchError::MissingNamespace(spec.to_string()))?;
        let removed = self.cancel_namespace(&namespace, |r| {
            parsed.event_type.is_empty() || r.event_type == parsed.event_type
        });
        tracing::debug!("Removed {} listeners from namespace {:?}", removed, namespace);
        Ok(removed)
    }

    fn cancel_namespace(&self, namespace: &str, pred: impl Fn(&ListenerRecord) -> bool) -> usize {
        let cancels: Vec<CancelListener> = self
            .state
            .borrow()
            .namespaces
            .get(namespace)
            .map(|records| records.iter().filter(|r| pred(*r)).map(|r| r.cancel.clone()).collect())
            .unwrap_or_default();
        for cancel in &cancels {
            cancel.cancel();
        }
        cancels.len()
    }

    /// Cancel every namespaced listener
    ///
    /// Listeners registered without a namespace stay attached.
    pub fn teardown(&self) -> usize {
        let cancels: Vec<CancelListener> = self
            .state
            .borrow()
            .namespaces
            .values()
            .flatten()
            .map(|r| r.cancel.clone())
            .collect();
        for cancel in &cancels {
            cancel.cancel();
        }
        tracing::debug!("Event registry torn down, {} listeners removed", cancels.len());
        cancels.len()
    }

    /// Number of tracked listeners in a namespace
    pub fn namespace_len(&self, namespace: &str) -> usize {
        self.state.borrow().namespaces.get(namespace).map_or(0, Vec::len)
    }

    /// Namespaces with at least one listener
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.borrow().namespaces.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventRegistry")
            .field("namespaces", &state.namespaces.len())
            .field("wrapped", &state.wrapped.len())
            .finish()
    }
}

/// Native listener applying the delegate check and the once rule
fn wrap(
    document: &Rc<Document>,
    selector: Option<Selector>,
    once: bool,
    slot: Rc<OnceCell<Weak<CancelInner>>>,
    callback: EventCallback,
) -> EventCallback {
    let document = Rc::downgrade(document);
    let fired = Cell::new(false);
    Rc::new(move |event: &Event| {
        if let Some(selector) = &selector {
            let Some(document) = document.upgrade() else {
                return;
            };
            if !document.matches(event.target(), selector) {
                return;
            }
        }
        if once {
            if fired.replace(true) {
                return;
            }
            if let Some(inner) = slot.get().and_then(Weak::upgrade) {
                CancelListener { inner }.cancel();
            }
        }
        callback(event);
    })
}
