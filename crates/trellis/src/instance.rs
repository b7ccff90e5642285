//! Module instances: one live behavior object per (type, element) pair.
//!
//! An instance is constructed by the registry, wired to its resolved
//! [`DependencyBundle`] and merged options, then driven through the
//! lifecycle `created → running → (updated)* → removed`. The terminal
//! state is final: a removed instance is discarded, never reused.
//!
//! Lifecycle signals (`update`, `remove`, plus anything user code emits)
//! are delivered locally to connected listeners and, when a `hub` handle
//! was resolved, republished on the shared hub under a `module:` prefix -
//! the only cross-module broadcast path.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{json, Value};

use trellis_core::{Document, ElementId, Event, Fragment, Selector};

use crate::behavior::{slots, CapabilityTable, MethodCall};
use crate::error::{Error, Result};
use crate::library::DependencyBundle;

/// Lifecycle states of a module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed and wired, `initialize` not yet complete.
    Created,
    /// `run` has been invoked at least once.
    Running,
    /// Removed from the document and the registry. Terminal.
    Removed,
}

type SignalHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Per-instance signal connections (`update`, `remove`, user signals).
#[derive(Default)]
pub struct InstanceSignals {
    handlers: Mutex<Vec<(String, SignalHandler)>>,
}

impl InstanceSignals {
    /// Connect a listener to a named signal.
    pub fn connect(&self, signal: impl Into<String>, handler: impl Fn(&Value) + Send + Sync + 'static) {
        self.handlers.lock().push((signal.into(), Arc::new(handler)));
    }

    fn emit(&self, signal: &str, payload: &Value) {
        // Snapshot before invoking; listeners may connect more listeners.
        let matching: Vec<SignalHandler> = self
            .handlers
            .lock()
            .iter()
            .filter(|(name, _)| name == signal)
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in matching {
            handler(payload);
        }
    }
}

/// Handler for an instance-scoped event binding.
pub type InstanceEventHandler = Arc<dyn Fn(&ModuleInstance, &Event) + Send + Sync>;

/// One live behavior object bound to exactly one element of exactly one
/// module type.
pub struct ModuleInstance {
    document: Arc<Document>,
    element: ElementId,
    /// Process-unique: type name + monotonic counter (`"tooltip-3"`).
    identity: String,
    type_name: String,
    table: Arc<CapabilityTable>,
    bundle: DependencyBundle,
    /// Merged configuration; immutable after construction.
    options: Value,
    signals: InstanceSignals,
    state: Mutex<LifecycleState>,
    initialized: AtomicBool,
}

impl ModuleInstance {
    pub(crate) fn new(
        document: Arc<Document>,
        element: ElementId,
        identity: String,
        table: Arc<CapabilityTable>,
        bundle: DependencyBundle,
        options: Value,
    ) -> Arc<Self> {
        let type_name = table.type_name().to_owned();
        Arc::new(Self {
            document,
            element,
            identity,
            type_name,
            table,
            bundle,
            options,
            signals: InstanceSignals::default(),
            state: Mutex::new(LifecycleState::Created),
            initialized: AtomicBool::new(false),
        })
    }

    /// The bound element.
    pub fn element(&self) -> ElementId {
        self.element
    }

    /// The process-unique instance identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The owning module type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The document this instance is bound into.
    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// The compiled capability table this instance was constructed from.
    pub fn table(&self) -> &Arc<CapabilityTable> {
        &self.table
    }

    /// The resolved dependency bundle.
    pub fn bundle(&self) -> &DependencyBundle {
        &self.bundle
    }

    /// Fetch a resolved library handle by name.
    pub fn library<T: std::any::Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.bundle.handle::<T>(name)
    }

    /// The merged options (defaults ⊕ extracted attributes ⊕ overrides).
    pub fn options(&self) -> &Value {
        &self.options
    }

    /// One option by key.
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// The instance's signal connections.
    pub fn signals(&self) -> &InstanceSignals {
        &self.signals
    }

    fn invoke_slot(&self, slot: &str, call: MethodCall<'_>) -> Result<()> {
        if let Some(method) = self.table.method(slot) {
            method(self, call).map_err(|e| Error::hook(&self.type_name, slot, e))?;
        }
        Ok(())
    }

    /// Invoke a named (non-slot) method.
    ///
    /// Returns `Ok(true)` if the method exists, `Ok(false)` if it does not.
    /// Hook failures propagate as [`Error::Hook`].
    pub fn invoke(&self, name: &str, call: MethodCall<'_>) -> Result<bool> {
        match self.table.method(name) {
            Some(method) => {
                method(self, call).map_err(|e| Error::hook(&self.type_name, name, e))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run the `initialize` hook. Invoked exactly once, after construction
    /// wiring, before the instance is registered as live; a second call is
    /// a no-op.
    ///
    /// Hook failures propagate; construction is not transactional and
    /// partial state is not rolled back.
    pub fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::trace!(
            target: "trellis::instance",
            identity = %self.identity,
            "initializing"
        );
        self.invoke_slot(slots::INITIALIZE, MethodCall::empty())
    }

    /// Run the `run` hook, moving the instance into `Running`.
    ///
    /// Invoked once right after `initialize`, and again each time a
    /// deferred type is re-triggered on an element with a live instance.
    /// Absent hook is a no-op. Ignored once removed.
    pub fn run(&self, trigger: Option<&Event>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == LifecycleState::Removed {
                return Ok(());
            }
            *state = LifecycleState::Running;
        }
        self.invoke_slot(slots::RUN, MethodCall::with_trigger(trigger))
    }

    /// Replace the bound element's content and emit the `update` signal.
    ///
    /// The registry listens for `update` to re-scan the replaced content
    /// for nested module matches.
    pub fn update_content(&self, fragment: Fragment) -> Result<()> {
        if self.state() == LifecycleState::Removed {
            return Ok(());
        }
        // A detached element means removal is already in flight; skip.
        if self.document.replace_children(self.element, fragment).is_ok() {
            self.emit("update", json!({ "identity": self.identity.as_str() }));
        }
        Ok(())
    }

    /// Run the `teardown` hook: release state that would otherwise survive
    /// element removal (subscriptions, timers).
    pub fn teardown(&self) -> Result<()> {
        self.invoke_slot(slots::TEARDOWN, MethodCall::empty())
    }

    /// Orchestrate removal: `teardown`, drop event bindings, detach the
    /// element, emit the `remove` signal.
    ///
    /// Returns `Ok(false)` if the instance was already removed; the state
    /// moves to `Removed` before any side effect so a second call - from
    /// the program and from element detachment racing - is a no-op and
    /// `remove` is emitted exactly once.
    pub fn remove(&self) -> Result<bool> {
        {
            let mut state = self.state.lock();
            if *state == LifecycleState::Removed {
                return Ok(false);
            }
            *state = LifecycleState::Removed;
        }
        tracing::debug!(
            target: "trellis::instance",
            identity = %self.identity,
            "removing"
        );
        self.teardown()?;
        self.undelegate_events();
        // The element may already be gone when removal was driven by an
        // external detach.
        let _ = self.document.detach(self.element);
        self.emit("remove", json!({ "identity": self.identity.as_str() }));
        Ok(true)
    }

    /// Emit a signal: deliver locally, then republish on the shared hub as
    /// `module:<signal>` when a `hub` dependency was supplied.
    pub fn emit(&self, signal: &str, payload: Value) {
        self.signals.emit(signal, &payload);
        if let Some(hub) = self.bundle.hub() {
            hub.publish(
                &format!("module:{signal}"),
                json!({
                    "module": self.type_name.as_str(),
                    "identity": self.identity.as_str(),
                    "data": payload,
                }),
            );
        }
    }

    /// Bind event handlers scoped under this instance's identity namespace.
    ///
    /// A binding key of the form `"event selector"` delegates to descendant
    /// matches of the bound element; a bare `"event"` binds directly. All
    /// bindings are removed en masse by [`ModuleInstance::undelegate_events`]
    /// (and automatically during [`ModuleInstance::remove`]).
    pub fn delegate_events(self: &Arc<Self>, bindings: Vec<(String, InstanceEventHandler)>) {
        for (key, handler) in bindings {
            let weak: Weak<ModuleInstance> = Arc::downgrade(self);
            let wrapped: trellis_core::EventHandler = Arc::new(move |event: &Event| {
                if let Some(instance) = weak.upgrade() {
                    handler(&instance, event);
                }
            });
            match key.split_once(' ') {
                Some((event, selector)) => {
                    let Some(selector) = Selector::parse(selector) else {
                        tracing::warn!(
                            target: "trellis::instance",
                            identity = %self.identity,
                            %key,
                            "ignoring binding with malformed selector"
                        );
                        continue;
                    };
                    self.document.on_delegated(
                        self.element,
                        event,
                        selector,
                        self.identity.as_str(),
                        wrapped,
                    );
                }
                None => {
                    self.document.on(self.element, key, self.identity.as_str(), wrapped);
                }
            }
        }
    }

    /// Remove every event binding registered under this instance's
    /// identity namespace.
    pub fn undelegate_events(&self) {
        self.document.off_namespace(&self.identity);
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("identity", &self.identity)
            .field("type_name", &self.type_name)
            .field("element", &self.element)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorMap;
    use crate::library::LibraryRegistry;
    use indexmap::IndexSet;
    use trellis_core::{ElementNode, Hub, Modifiers};

    fn harness(map: BehaviorMap) -> (Arc<Document>, Arc<Hub>, Arc<ModuleInstance>) {
        let doc = Arc::new(Document::new());
        let hub = Arc::new(Hub::new());
        let element = doc.mount(doc.root(), ElementNode::new("div").attr("data-widget", ""));

        let libraries = LibraryRegistry::new();
        libraries.register("hub", hub.clone()).unwrap();
        let deps: IndexSet<String> = ["hub".to_owned()].into_iter().collect();
        let bundle = libraries.require(&deps).unwrap();

        let own = map.into_methods();
        let table = Arc::new(CapabilityTable::flatten(
            "widget",
            &Default::default(),
            None,
            &own,
        ));
        let instance = ModuleInstance::new(
            doc.clone(),
            element,
            "widget-1".to_owned(),
            table,
            bundle,
            json!({"delay": 100}),
        );
        (doc, hub, instance)
    }

    #[test]
    fn lifecycle_states_progress_and_terminate() {
        let (_doc, _hub, instance) = harness(BehaviorMap::new());
        assert_eq!(instance.state(), LifecycleState::Created);
        instance.initialize().unwrap();
        instance.run(None).unwrap();
        assert_eq!(instance.state(), LifecycleState::Running);
        assert!(instance.remove().unwrap());
        assert_eq!(instance.state(), LifecycleState::Removed);
        // Terminal: run after removal is ignored.
        instance.run(None).unwrap();
        assert_eq!(instance.state(), LifecycleState::Removed);
    }

    #[test]
    fn initialize_runs_exactly_once() {
        let count = Arc::new(Mutex::new(0usize));
        let count2 = Arc::clone(&count);
        let map = BehaviorMap::new().with("initialize", move |_, _| {
            *count2.lock() += 1;
            Ok(())
        });
        let (_doc, _hub, instance) = harness(map);
        instance.initialize().unwrap();
        instance.initialize().unwrap();
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn remove_is_guarded_against_double_invocation() {
        let teardowns = Arc::new(Mutex::new(0usize));
        let teardowns2 = Arc::clone(&teardowns);
        let map = BehaviorMap::new().with("teardown", move |_, _| {
            *teardowns2.lock() += 1;
            Ok(())
        });
        let (_doc, _hub, instance) = harness(map);

        let removes = Arc::new(Mutex::new(0usize));
        let removes2 = Arc::clone(&removes);
        instance.signals().connect("remove", move |_| *removes2.lock() += 1);

        assert!(instance.remove().unwrap());
        assert!(!instance.remove().unwrap());
        assert_eq!(*teardowns.lock(), 1);
        assert_eq!(*removes.lock(), 1);
    }

    #[test]
    fn remove_detaches_element_and_drops_bindings() {
        let (doc, _hub, instance) = harness(BehaviorMap::new());
        let fired = Arc::new(Mutex::new(0usize));
        let fired2 = Arc::clone(&fired);
        let element = instance.element();
        instance.delegate_events(vec![(
            "click".to_owned(),
            Arc::new(move |_: &ModuleInstance, _: &Event| *fired2.lock() += 1) as InstanceEventHandler,
        )]);

        doc.dispatch("click", element, Modifiers::default());
        assert_eq!(*fired.lock(), 1);

        instance.remove().unwrap();
        assert!(!doc.contains(element));
        doc.dispatch("click", element, Modifiers::default());
        assert_eq!(*fired.lock(), 1);
    }

    #[test]
    fn signals_republish_on_hub_with_module_prefix() {
        let (_doc, hub, instance) = harness(BehaviorMap::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        hub.subscribe("module:opened", move |payload| {
            seen2.lock().push(payload.clone());
        });

        instance.emit("opened", json!({"from": "test"}));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["module"], "widget");
        assert_eq!(seen[0]["identity"], "widget-1");
        assert_eq!(seen[0]["data"]["from"], "test");
    }

    #[test]
    fn update_content_replaces_and_signals() {
        let (doc, _hub, instance) = harness(BehaviorMap::new());
        let updates = Arc::new(Mutex::new(0usize));
        let updates2 = Arc::clone(&updates);
        instance.signals().connect("update", move |_| *updates2.lock() += 1);

        instance
            .update_content(Fragment::new().node(ElementNode::new("span")))
            .unwrap();
        assert_eq!(*updates.lock(), 1);
        assert_eq!(doc.children(instance.element()).len(), 1);
    }

    #[test]
    fn failing_hook_propagates_as_hook_error() {
        let map = BehaviorMap::new().with("initialize", |_, _| Err("boom".into()));
        let (_doc, _hub, instance) = harness(map);
        let err = instance.initialize().unwrap_err();
        assert!(matches!(err, Error::Hook { module, slot, .. }
            if module == "widget" && slot == "initialize"));
    }

    #[test]
    fn delegated_binding_scopes_to_descendant_selector() {
        let (doc, _hub, instance) = harness(BehaviorMap::new());
        let button = doc.mount(
            instance.element(),
            ElementNode::new("button").attr("class", "close"),
        );

        let hits = Arc::new(Mutex::new(0usize));
        let hits2 = Arc::clone(&hits);
        instance.delegate_events(vec![(
            "click .close".to_owned(),
            Arc::new(move |instance: &ModuleInstance, event: &Event| {
                assert_eq!(instance.type_name(), "widget");
                assert_eq!(event.current_target(), event.target());
                *hits2.lock() += 1;
            }) as InstanceEventHandler,
        )]);

        doc.dispatch("click", button, Modifiers::default());
        // Direct click on the host element does not match the selector.
        doc.dispatch("click", instance.element(), Modifiers::default());
        assert_eq!(*hits.lock(), 1);
    }
}
