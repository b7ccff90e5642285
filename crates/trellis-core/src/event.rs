//! Event dispatch and delegation.
//!
//! Events bubble synchronously from a target element up to the document
//! root. Listeners are bound either *directly* to an element (fires whenever
//! the event bubbles through it) or *delegated* (bound at an ancestor,
//! fires when a descendant matching a selector is on the bubble path). Every
//! binding carries a namespace string so a whole group can be removed at
//! once - the framework namespaces bindings per instance identity.
//!
//! Dispatch snapshots the listener table and the bubble path before any
//! handler runs, so handlers are free to mutate the tree or the listener
//! table; their changes take effect on the next dispatch.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use slotmap::{new_key_type, SlotMap};

use crate::document::{Document, ElementId};
use crate::selector::Selector;

new_key_type! {
    /// A unique identifier for one listener binding.
    pub struct ListenerId;
}

/// Keyboard modifier state carried by an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    /// The platform "open in new tab" chord: ctrl-click (or cmd-click).
    ///
    /// Delegated activation handlers ignore events carrying this chord so
    /// the hosting environment's default navigation stays intact.
    pub fn open_in_new_tab(&self) -> bool {
        self.ctrl || self.meta
    }
}

/// A dispatched event, delivered by shared reference to each listener.
///
/// Clones share the `default_prevented` flag; `current_target` is stamped
/// per delivery while `target` stays fixed at the dispatch origin.
#[derive(Clone)]
pub struct Event {
    name: String,
    target: ElementId,
    current_target: ElementId,
    modifiers: Modifiers,
    default_prevented: Arc<AtomicBool>,
}

impl Event {
    /// Create an event aimed at `target`.
    pub fn new(name: impl Into<String>, target: ElementId, modifiers: Modifiers) -> Self {
        Self {
            name: name.into(),
            target,
            current_target: target,
            modifiers,
            default_prevented: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The event name (`"click"`, `"submit"`, ...).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The element the event was dispatched at.
    pub fn target(&self) -> ElementId {
        self.target
    }

    /// The element whose binding is currently being delivered: the matched
    /// descendant for delegated listeners, the bind point for direct ones.
    pub fn current_target(&self) -> ElementId {
        self.current_target
    }

    /// Modifier state at dispatch time.
    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// Mark the event's default action as suppressed.
    pub fn prevent_default(&self) {
        self.default_prevented.store(true, Ordering::Relaxed);
    }

    /// Whether any listener called [`Event::prevent_default`].
    pub fn default_prevented(&self) -> bool {
        self.default_prevented.load(Ordering::Relaxed)
    }

    fn at(&self, current_target: ElementId) -> Self {
        let mut event = self.clone();
        event.current_target = current_target;
        event
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("current_target", &self.current_target)
            .field("modifiers", &self.modifiers)
            .field("default_prevented", &self.default_prevented())
            .finish()
    }
}

/// Handler invoked for each delivery.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Listener {
    element: ElementId,
    event: String,
    /// `Some` for delegated bindings, `None` for direct ones.
    selector: Option<Selector>,
    namespace: String,
    handler: EventHandler,
}

pub(crate) struct ListenerStore {
    listeners: SlotMap<ListenerId, Listener>,
    /// Insertion order; SlotMap iteration order is not stable under reuse.
    order: Vec<ListenerId>,
}

impl ListenerStore {
    pub(crate) fn new() -> Self {
        Self {
            listeners: SlotMap::with_key(),
            order: Vec::new(),
        }
    }

    fn insert(&mut self, listener: Listener) -> ListenerId {
        let id = self.listeners.insert(listener);
        self.order.push(id);
        id
    }

    fn remove(&mut self, id: ListenerId) -> bool {
        if self.listeners.remove(id).is_some() {
            self.order.retain(|&l| l != id);
            true
        } else {
            false
        }
    }

    fn remove_namespace(&mut self, namespace: &str) -> usize {
        let doomed: Vec<ListenerId> = self
            .order
            .iter()
            .copied()
            .filter(|&id| self.listeners[id].namespace == namespace)
            .collect();
        for id in &doomed {
            self.listeners.remove(*id);
        }
        self.order.retain(|id| !doomed.contains(id));
        doomed.len()
    }

    pub(crate) fn prune(&mut self, live: impl Fn(ElementId) -> bool) {
        let doomed: Vec<ListenerId> = self
            .order
            .iter()
            .copied()
            .filter(|&id| !live(self.listeners[id].element))
            .collect();
        for id in &doomed {
            self.listeners.remove(*id);
        }
        self.order.retain(|id| !doomed.contains(id));
    }
}

/// One planned delivery: handler plus the element to stamp as current target.
struct Delivery {
    handler: EventHandler,
    current_target: ElementId,
}

impl Document {
    /// Bind a handler directly to an element.
    ///
    /// Fires whenever a matching event bubbles through the element, with
    /// `current_target` set to the element itself.
    pub fn on(
        &self,
        element: ElementId,
        event: impl Into<String>,
        namespace: impl Into<String>,
        handler: EventHandler,
    ) -> ListenerId {
        self.listeners.lock().insert(Listener {
            element,
            event: event.into(),
            selector: None,
            namespace: namespace.into(),
            handler,
        })
    }

    /// Bind a delegated handler at an ancestor element.
    ///
    /// Fires when the bubble path contains a descendant of `element`
    /// matching `selector`; `current_target` is stamped to the closest such
    /// descendant.
    pub fn on_delegated(
        &self,
        element: ElementId,
        event: impl Into<String>,
        selector: Selector,
        namespace: impl Into<String>,
        handler: EventHandler,
    ) -> ListenerId {
        self.listeners.lock().insert(Listener {
            element,
            event: event.into(),
            selector: Some(selector),
            namespace: namespace.into(),
            handler,
        })
    }

    /// Remove one binding. Unknown IDs are ignored.
    pub fn off(&self, id: ListenerId) {
        self.listeners.lock().remove(id);
    }

    /// Remove every binding registered under `namespace`.
    ///
    /// Returns the number of bindings removed.
    pub fn off_namespace(&self, namespace: &str) -> usize {
        let removed = self.listeners.lock().remove_namespace(namespace);
        if removed > 0 {
            tracing::trace!(
                target: "trellis_core::event",
                namespace,
                removed,
                "removed listener namespace"
            );
        }
        removed
    }

    /// Dispatch an event at `target` and let it bubble to the root.
    ///
    /// Returns the event so callers can inspect `default_prevented`.
    pub fn dispatch(
        &self,
        name: impl Into<String>,
        target: ElementId,
        modifiers: Modifiers,
    ) -> Event {
        let event = Event::new(name, target, modifiers);
        if !self.contains(target) {
            return event;
        }

        // Bubble path, target first, root last.
        let mut path = vec![target];
        path.extend(self.ancestors(target));

        // Plan all deliveries before running any handler: ordered by the
        // listener's bind point along the bubble path, delegated before
        // direct at the same level (matching the closest-descendant rule).
        let deliveries = self.plan_deliveries(&event, &path);
        tracing::trace!(
            target: "trellis_core::event",
            name = event.name(),
            ?target,
            deliveries = deliveries.len(),
            "dispatching event"
        );
        for delivery in deliveries {
            let scoped = event.at(delivery.current_target);
            (delivery.handler)(&scoped);
        }
        event
    }

    fn plan_deliveries(&self, event: &Event, path: &[ElementId]) -> Vec<Delivery> {
        let store = self.listeners.lock();
        let mut out = Vec::new();
        for (depth, &bind_point) in path.iter().enumerate() {
            for &id in &store.order {
                let listener = &store.listeners[id];
                if listener.element != bind_point || listener.event != event.name() {
                    continue;
                }
                match &listener.selector {
                    None => out.push(Delivery {
                        handler: Arc::clone(&listener.handler),
                        current_target: bind_point,
                    }),
                    Some(selector) => {
                        // Closest matching descendant strictly below the
                        // bind point on the bubble path.
                        if let Some(&matched) = path[..depth]
                            .iter()
                            .find(|&&el| selector.matches(self, el))
                        {
                            out.push(Delivery {
                                handler: Arc::clone(&listener.handler),
                                current_target: matched,
                            });
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ElementNode;
    use parking_lot::Mutex;

    fn record(log: &Arc<Mutex<Vec<String>>>, entry: impl Into<String>) {
        log.lock().push(entry.into());
    }

    #[test]
    fn direct_listener_fires_on_bubble() {
        let doc = Document::new();
        let outer = doc.mount(doc.root(), ElementNode::new("div"));
        let inner = doc.mount(outer, ElementNode::new("button"));

        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        doc.on(
            outer,
            "click",
            "t",
            Arc::new(move |event| {
                assert_eq!(event.current_target(), outer);
                assert_ne!(event.target(), outer);
                record(&log2, "outer");
            }),
        );

        doc.dispatch("click", inner, Modifiers::default());
        assert_eq!(*log.lock(), vec!["outer"]);
    }

    #[test]
    fn delegated_listener_stamps_matched_descendant() {
        let doc = Document::new();
        let list = doc.mount(doc.root(), ElementNode::new("ul"));
        let item = doc.mount(list, ElementNode::new("li").attr("class", "row"));
        let label = doc.mount(item, ElementNode::new("span"));

        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let expected = item;
        doc.on_delegated(
            list,
            "click",
            Selector::parse(".row").unwrap(),
            "t",
            Arc::new(move |event| {
                assert_eq!(event.current_target(), expected);
                record(&log2, "row");
            }),
        );

        doc.dispatch("click", label, Modifiers::default());
        assert_eq!(*log.lock(), vec!["row"]);

        // Non-matching target path: nothing fires.
        let other = doc.mount(list, ElementNode::new("div"));
        doc.dispatch("click", other, Modifiers::default());
        assert_eq!(*log.lock(), vec!["row"]);
    }

    #[test]
    fn delivery_order_follows_bubble_path() {
        let doc = Document::new();
        let outer = doc.mount(doc.root(), ElementNode::new("div"));
        let inner = doc.mount(outer, ElementNode::new("button"));

        let log = Arc::new(Mutex::new(Vec::new()));
        for (el, tag) in [(inner, "inner"), (outer, "outer"), (doc.root(), "root")] {
            let log = Arc::clone(&log);
            doc.on(
                el,
                "click",
                "t",
                Arc::new(move |_| record(&log, tag)),
            );
        }

        doc.dispatch("click", inner, Modifiers::default());
        assert_eq!(*log.lock(), vec!["inner", "outer", "root"]);
    }

    #[test]
    fn namespace_removal_is_bulk() {
        let doc = Document::new();
        let el = doc.mount(doc.root(), ElementNode::new("div"));

        let log = Arc::new(Mutex::new(Vec::new()));
        for ns in ["a", "a", "b"] {
            let log = Arc::clone(&log);
            let ns_owned = ns.to_owned();
            doc.on(
                el,
                "click",
                ns,
                Arc::new(move |_| record(&log, ns_owned.clone())),
            );
        }

        assert_eq!(doc.off_namespace("a"), 2);
        doc.dispatch("click", el, Modifiers::default());
        assert_eq!(*log.lock(), vec!["b"]);
        assert_eq!(doc.off_namespace("a"), 0);
    }

    #[test]
    fn prevent_default_is_shared_across_deliveries() {
        let doc = Document::new();
        let el = doc.mount(doc.root(), ElementNode::new("a"));
        doc.on(el, "click", "t", Arc::new(|event| event.prevent_default()));

        let event = doc.dispatch("click", el, Modifiers::default());
        assert!(event.default_prevented());
    }

    #[test]
    fn handlers_may_mutate_listeners_mid_dispatch() {
        let doc = Document::new();
        let el = doc.mount(doc.root(), ElementNode::new("div"));

        let count = Arc::new(Mutex::new(0usize));
        let count2 = Arc::clone(&count);
        let doc2 = Arc::new(doc);
        let doc3 = Arc::clone(&doc2);
        doc2.on(
            el,
            "click",
            "self-removing",
            Arc::new(move |_| {
                *count2.lock() += 1;
                doc3.off_namespace("self-removing");
            }),
        );

        doc2.dispatch("click", el, Modifiers::default());
        doc2.dispatch("click", el, Modifiers::default());
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn open_in_new_tab_chord() {
        assert!(Modifiers { ctrl: true, ..Default::default() }.open_in_new_tab());
        assert!(Modifiers { meta: true, ..Default::default() }.open_in_new_tab());
        assert!(!Modifiers { shift: true, ..Default::default() }.open_in_new_tab());
    }
}
