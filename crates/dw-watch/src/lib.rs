//! domwatch - mutation fan-out and event subscription layer
//!
//! Lets many independent call sites react to changes in one shared document
//! without each creating its own observer:
//! - [`MutationFanout`]: one mutation observer per root, many subscribers
//! - [`EventRegistry`]: delegated listeners grouped by namespace for bulk removal
//! - [`MountTracker`]: one-shot attach/detach notifications
//! - [`Tooltip`]: hover tooltips that hide when their node is unmounted
//!
//! [`DomWatch`] bundles the three core components for one document.

pub mod config;
pub mod error;
pub mod events;
pub mod fanout;
pub mod lifecycle;
pub mod tooltip;

pub use config::{DEFAULT_ROOT_ID, WatchConfig};
pub use error::{Result, WatchError};
pub use events::{CancelListener, EventCallback, EventRegistry, EventSpec};
pub use fanout::{
    MutationCallback, MutationFanout, MutationFilter, Subscription, WeakFanout, WeakSubscription,
    selector_filter,
};
pub use lifecycle::MountTracker;
pub use tooltip::{Tooltip, TooltipAttributes, TooltipOptions, TooltipRenderer, TooltipSide};

use std::cell::Cell;
use std::rc::Rc;

use dw_dom::Document;

/// Shared observer, event registry and mount tracker for one document
#[derive(Debug, Clone)]
pub struct DomWatch {
    document: Rc<Document>,
    observer: MutationFanout,
    events: EventRegistry,
    mounts: MountTracker,
    /// Next tooltip number; clones share it
    next_tooltip: Rc<Cell<u64>>,
}

impl DomWatch {
    /// Create the components; nothing is observed until someone subscribes
    pub fn new(document: &Rc<Document>, config: &WatchConfig) -> Self {
        let root = config.resolve_root(document);
        let observer = MutationFanout::new(document, root, config.options.clone());
        tracing::debug!("DomWatch created for {} with root {}", document.url(), root);
        Self {
            document: document.clone(),
            events: EventRegistry::new(document),
            mounts: MountTracker::new(observer.clone()),
            observer,
            next_tooltip: Rc::new(Cell::new(1)),
        }
    }

    /// Tooltip number unique within this watch
    pub(crate) fn next_tooltip_id(&self) -> u64 {
        let id = self.next_tooltip.get();
        self.next_tooltip.set(id + 1);
        id
    }

    pub fn document(&self) -> &Rc<Document> {
        &self.document
    }

    /// The shared mutation fanout
    pub fn observer(&self) -> &MutationFanout {
        &self.observer
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    pub fn mounts(&self) -> &MountTracker {
        &self.mounts
    }

    /// Drop every subscription and namespaced listener
    pub fn teardown(&self) {
        self.observer.unsubscribe_all();
        let removed = self.events.teardown();
        tracing::info!("DomWatch torn down ({} listeners removed)", removed);
    }
}
