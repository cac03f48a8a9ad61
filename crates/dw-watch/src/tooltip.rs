//! Hover tooltips
//!
//! A [`Tooltip`] shows itself through a [`TooltipRenderer`] on `mouseenter`
//! and hides on `mouseleave`. While shown it also watches its node for
//! removal, so a node unmounted under the pointer does not leave a stale
//! tooltip behind.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use dw_dom::{Event, NodeId};
use serde::{Deserialize, Serialize};

use crate::events::{EventCallback, EventRegistry};
use crate::fanout::Subscription;
use crate::lifecycle::MountTracker;
use crate::{DomWatch, Result};

/// Overlay service that draws tooltips
pub trait TooltipRenderer {
    fn show(&self, id: &str, attributes: &TooltipAttributes);
    fn hide(&self, id: &str);
}

/// Preferred side of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TooltipSide {
    #[default]
    Top,
    Right,
    Bottom,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TooltipOptions {
    /// Color style name understood by the renderer
    pub style: String,
    pub side: TooltipSide,
    /// Start disabled; hovering shows nothing until enabled
    pub disabled: bool,
}

impl Default for TooltipOptions {
    fn default() -> Self {
        Self {
            style: "black".to_string(),
            side: TooltipSide::Top,
            disabled: false,
        }
    }
}

/// What the renderer is asked to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TooltipAttributes {
    pub text: String,
    pub style: String,
    pub side: TooltipSide,
    pub target: NodeId,
}

struct TooltipInner {
    id: String,
    node: NodeId,
    text: RefCell<String>,
    style: String,
    side: TooltipSide,
    disabled: Cell<bool>,
    renderer: Rc<dyn TooltipRenderer>,
    events: EventRegistry,
    mounts: MountTracker,
    /// Pending unmount watch while shown
    unmount_watch: RefCell<Option<Subscription>>,
}

impl TooltipInner {
    fn namespace(&self) -> String {
        format!(".{}", self.id)
    }

    fn show(&self) {
        let attributes = TooltipAttributes {
            text: self.text.borrow().clone(),
            style: self.style.clone(),
            side: self.side,
            target: self.node,
        };
        self.renderer.show(&self.id, &attributes);
    }

    fn hide(&self) {
        self.renderer.hide(&self.id);
    }

    fn cancel_watch(&self) {
        let watch = self.unmount_watch.borrow_mut().take();
        if let Some(watch) = watch {
            self.mounts.cancel(&watch);
        }
    }

    fn on_enter(self: &Rc<Self>) {
        if self.disabled.get() {
            return;
        }
        self.show();

        let weak = Rc::downgrade(self);
        let watch = self.mounts.on_unmount(self.node, move || {
            if let Some(inner) = weak.upgrade() {
                inner.unmount_watch.borrow_mut().take();
                inner.hide();
            }
        });
        match watch {
            Ok(watch) => {
                let previous = self.unmount_watch.borrow_mut().replace(watch);
                if let Some(previous) = previous {
                    self.mounts.cancel(&previous);
                }
            }
            Err(err) => tracing::warn!(tooltip = %self.id, error = %err, "Failed to watch tooltip target"),
        }
    }

    fn on_leave(&self) {
        self.hide();
        self.cancel_watch();
    }

    fn detach(&self) {
        if let Err(err) = self.events.off_namespace(&self.namespace()) {
            tracing::warn!(tooltip = %self.id, error = %err, "Failed to remove tooltip listeners");
        }
        self.cancel_watch();
    }
}

impl Drop for TooltipInner {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Tooltip bound to one node
///
/// Listeners stay attached until [`detach`](Self::detach) or drop.
pub struct Tooltip {
    inner: Rc<TooltipInner>,
}

impl Tooltip {
    pub fn attach(
        watch: &DomWatch,
        node: NodeId,
        text: &str,
        options: TooltipOptions,
        renderer: Rc<dyn TooltipRenderer>,
    ) -> Result<Self> {
        let id = format!("tooltip-{}", watch.next_tooltip_id());
        let inner = Rc::new(TooltipInner {
            id,
            node,
            text: RefCell::new(text.to_string()),
            style: options.style,
            side: options.side,
            disabled: Cell::new(options.disabled),
            renderer,
            events: watch.events().clone(),
            mounts: watch.mounts().clone(),
            unmount_watch: RefCell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        let enter: EventCallback = Rc::new(move |_: &Event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_enter();
            }
        });
        let weak = Rc::downgrade(&inner);
        let leave: EventCallback = Rc::new(move |_: &Event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_leave();
            }
        });

        let namespace = inner.namespace();
        inner.events.on(node, &format!("mouseenter{namespace}"), None, enter)?;
        inner.events.on(node, &format!("mouseleave{namespace}"), None, leave)?;
        tracing::debug!("Tooltip {} attached to {}", inner.id, node);

        Ok(Self { inner })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn node(&self) -> NodeId {
        self.inner.node
    }

    pub fn text(&self) -> String {
        self.inner.text.borrow().clone()
    }

    /// Replace the label; takes effect on the next show
    pub fn set_text(&self, text: &str) {
        *self.inner.text.borrow_mut() = text.to_string();
    }

    pub fn show(&self) {
        self.inner.show();
    }

    pub fn hide(&self) {
        self.inner.hide();
    }

    pub fn enable(&self) {
        self.inner.disabled.set(false);
    }

    /// Stop showing on hover; a tooltip already shown stays until hidden
    pub fn disable(&self) {
        self.inner.disabled.set(true);
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.get()
    }

    /// Whether an unmount watch is pending
    pub fn is_watching(&self) -> bool {
        self.inner.unmount_watch.borrow().is_some()
    }

    /// Remove the hover listeners and any pending watch
    pub fn detach(&self) {
        self.inner.detach();
    }
}

impl fmt::Debug for Tooltip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tooltip")
            .field("id", &self.inner.id)
            .field("node", &self.inner.node)
            .field("disabled", &self.inner.disabled.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use dw_dom::Document;

    use super::*;
    use crate::WatchConfig;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl TooltipRenderer for Recorder {
        fn show(&self, _id: &str, attributes: &TooltipAttributes) {
            self.calls.borrow_mut().push(format!("show {}", attributes.text));
        }

        fn hide(&self, _id: &str) {
            self.calls.borrow_mut().push("hide".to_string());
        }
    }

    fn setup() -> (Rc<Document>, DomWatch, NodeId, Rc<Recorder>) {
        let doc = Document::new("about:blank");
        let watch = DomWatch::new(&doc, &WatchConfig::default());
        let node = doc.create_element("button");
        doc.append_child(doc.body(), node).unwrap();
        (doc, watch, node, Rc::new(Recorder::default()))
    }

    fn hover(doc: &Document, node: NodeId, event_type: &str) {
        doc.dispatch_event(&Event::new(event_type, node)).unwrap();
    }

    #[test]
    fn test_options_defaults() {
        let options = TooltipOptions::default();
        assert_eq!(options.style, "black");
        assert_eq!(options.side, TooltipSide::Top);
        assert!(!options.disabled);

        let options: TooltipOptions = serde_json::from_str(r#"{"side": "left"}"#).unwrap();
        assert_eq!(options.side, TooltipSide::Left);
        assert_eq!(options.style, "black");
    }

    #[test]
    fn test_ids_are_unique() {
        let (_doc, watch, node, recorder) = setup();
        let a = Tooltip::attach(&watch, node, "a", TooltipOptions::default(), recorder.clone()).unwrap();
        let b = Tooltip::attach(&watch, node, "b", TooltipOptions::default(), recorder).unwrap();
        assert_eq!(a.id(), "tooltip-1");
        assert_eq!(b.id(), "tooltip-2");
    }

    #[test]
    fn test_ids_restart_per_watch() {
        let (doc, watch, node, recorder) = setup();
        let other = DomWatch::new(&doc, &WatchConfig::default());
        let shared = watch.clone();

        let a = Tooltip::attach(&watch, node, "a", TooltipOptions::default(), recorder.clone()).unwrap();
        let b = Tooltip::attach(&other, node, "b", TooltipOptions::default(), recorder.clone()).unwrap();
        let c = Tooltip::attach(&shared, node, "c", TooltipOptions::default(), recorder).unwrap();
        assert_eq!(a.id(), "tooltip-1");
        assert_eq!(b.id(), "tooltip-1");
        assert_eq!(c.id(), "tooltip-2");
    }

    #[test]
    fn test_enter_and_leave() {
        let (doc, watch, node, recorder) = setup();
        let tooltip = Tooltip::attach(&watch, node, "Save", TooltipOptions::default(), recorder.clone()).unwrap();

        hover(&doc, node, "mouseenter");
        assert!(tooltip.is_watching());
        assert!(watch.observer().is_active());

        hover(&doc, node, "mouseleave");
        assert!(!tooltip.is_watching());
        assert!(!watch.observer().is_active());
        assert_eq!(*recorder.calls.borrow(), vec!["show Save", "hide"]);
    }

    #[test]
    fn test_disabled_does_not_show() {
        let (doc, watch, node, recorder) = setup();
        let options = TooltipOptions {
            disabled: true,
            ..Default::default()
        };
        let tooltip = Tooltip::attach(&watch, node, "Save", options, recorder.clone()).unwrap();

        hover(&doc, node, "mouseenter");
        assert!(recorder.calls.borrow().is_empty());

        tooltip.enable();
        tooltip.set_text("Saved");
        hover(&doc, node, "mouseenter");
        assert_eq!(*recorder.calls.borrow(), vec!["show Saved"]);
    }

    #[test]
    fn test_repeated_enter_keeps_one_watch() {
        let (doc, watch, node, recorder) = setup();
        let _tooltip = Tooltip::attach(&watch, node, "x", TooltipOptions::default(), recorder).unwrap();

        hover(&doc, node, "mouseenter");
        hover(&doc, node, "mouseenter");
        assert_eq!(watch.observer().len(), 1);
    }

    #[test]
    fn test_drop_detaches() {
        let (doc, watch, node, recorder) = setup();
        let tooltip = Tooltip::attach(&watch, node, "x", TooltipOptions::default(), recorder).unwrap();
        hover(&doc, node, "mouseenter");
        assert_eq!(doc.listener_count(node, "mouseenter"), 1);

        drop(tooltip);
        assert_eq!(doc.listener_count(node, "mouseenter"), 0);
        assert_eq!(doc.listener_count(node, "mouseleave"), 0);
        assert!(!watch.observer().is_active());
    }
}
