//! The module registry: discovery, instantiation, and instance tracking.
//!
//! The registry is the top-level coordinator. It owns one
//! [`ModuleFactory`] per defined type, discovers matching elements when
//! [`ModuleRegistry::initialize`] scans a subtree, resolves dependencies
//! through the [`LibraryRegistry`], and tracks every live
//! [`ModuleInstance`] in a per-type cache holding at most one instance per
//! (type, element) pair.
//!
//! Deferred types are not instantiated at scan time; instead one delegated
//! listener per deferral rule is installed at the document root. A
//! delegated trigger and a direct programmatic create both funnel into the
//! single idempotent [`ModuleRegistry::instance`] entry point.
//!
//! Everything is synchronous and run-to-completion: within one
//! instantiation, dependency resolution precedes configuration merge,
//! which precedes construction, which precedes `run`. No lock is held
//! while user hooks or signal listeners execute.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use trellis_core::{Document, ElementId, Event, Hub};

use crate::behavior::{BaseTable, BehaviorMap, CapabilityTable};
use crate::error::{Error, Result};
use crate::factory::{DeferConfig, ModuleFactory};
use crate::instance::ModuleInstance;
use crate::library::LibraryRegistry;

struct RegistryShared {
    document: Arc<Document>,
    hub: Arc<Hub>,
    libraries: Arc<LibraryRegistry>,
    base: Arc<Mutex<BaseTable>>,
    factories: RwLock<IndexMap<String, Arc<ModuleFactory>>>,
    /// type name → live instances. At most one per (type, element),
    /// enforced at instantiation time.
    cache: Mutex<HashMap<String, Vec<Arc<ModuleInstance>>>>,
    counter: AtomicU64,
}

/// The central registry coordinating module types over one document.
pub struct ModuleRegistry {
    shared: Arc<RegistryShared>,
}

impl ModuleRegistry {
    /// Create a registry over a document, with a fresh hub pre-registered
    /// in the library registry under `"hub"`.
    pub fn new(document: Arc<Document>) -> Self {
        let hub = Arc::new(Hub::new());
        let libraries = Arc::new(LibraryRegistry::new());
        libraries
            .register("hub", hub.clone())
            .expect("fresh library registry cannot hold 'hub'");
        Self {
            shared: Arc::new(RegistryShared {
                document,
                hub,
                libraries,
                base: Arc::new(Mutex::new(BaseTable::default())),
                factories: RwLock::new(IndexMap::new()),
                cache: Mutex::new(HashMap::new()),
                counter: AtomicU64::new(0),
            }),
        }
    }

    /// The document this registry scans.
    pub fn document(&self) -> &Arc<Document> {
        &self.shared.document
    }

    /// The shared hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.shared.hub
    }

    /// The library registry dependencies are resolved through.
    pub fn libraries(&self) -> &Arc<LibraryRegistry> {
        &self.shared.libraries
    }

    /// Define a new module type.
    ///
    /// Fails with [`Error::DuplicateType`] if the name is taken, leaving
    /// the existing registration untouched. Returns the factory for
    /// chained configuration.
    pub fn define(&self, type_name: impl Into<String>) -> Result<Arc<ModuleFactory>> {
        let type_name = type_name.into();
        let mut factories = self.shared.factories.write();
        if factories.contains_key(&type_name) {
            return Err(Error::DuplicateType(type_name));
        }
        let weak = Arc::downgrade(&self.shared);
        let lookup = Arc::new(move |name: &str| -> Option<Arc<CapabilityTable>> {
            let shared = weak.upgrade()?;
            let factory = shared.factories.read().get(name).cloned()?;
            Some(factory.build(false))
        });
        let factory = Arc::new(ModuleFactory::new(
            type_name.clone(),
            Arc::clone(&self.shared.base),
            lookup,
        ));
        tracing::debug!(target: "trellis::registry", module = %type_name, "defined module type");
        factories.insert(type_name, Arc::clone(&factory));
        Ok(factory)
    }

    /// Define a type and apply methods in one call.
    pub fn define_with(
        &self,
        type_name: impl Into<String>,
        methods: BehaviorMap,
    ) -> Result<Arc<ModuleFactory>> {
        let factory = self.define(type_name)?;
        factory.methods(methods)?;
        Ok(factory)
    }

    /// Find a defined type's factory. Never errors.
    pub fn find(&self, type_name: &str) -> Option<Arc<ModuleFactory>> {
        self.shared.factories.read().get(type_name).cloned()
    }

    /// Scan a subtree: install delegation for deferred types (idempotent
    /// per factory) and instantiate every match of each eager type.
    ///
    /// Instantiation failures propagate; delegation installs cannot fail.
    pub fn initialize(&self, root: ElementId) -> Result<()> {
        self.shared.initialize(root)
    }

    /// The idempotent instantiation entry point.
    ///
    /// A live instance for (type, element) is re-run with `trigger` and
    /// returned as-is: no re-construction, no re-resolution. Otherwise the
    /// dependency bundle is resolved, configuration merged
    /// (`overrides > extracted attributes > defaults`), the cached
    /// constructor fetched (or compiled), the instance constructed, its
    /// `update`/`remove` listeners attached, `initialize` and `run`
    /// invoked, and the instance registered and returned.
    pub fn instance(
        &self,
        factory: &Arc<ModuleFactory>,
        element: ElementId,
        overrides: Option<Value>,
        trigger: Option<&Event>,
    ) -> Result<Arc<ModuleInstance>> {
        self.shared.instance(factory, element, overrides, trigger)
    }

    /// Programmatic create by type name.
    ///
    /// Returns `None` for an undefined type; otherwise funnels into
    /// [`ModuleRegistry::instance`].
    pub fn create(
        &self,
        type_name: &str,
        element: ElementId,
        overrides: Option<Value>,
    ) -> Option<Result<Arc<ModuleInstance>>> {
        let factory = self.find(type_name)?;
        Some(self.instance(&factory, element, overrides, None))
    }

    /// The live instance for (type, element), if any.
    pub fn find_instance(
        &self,
        factory: &ModuleFactory,
        element: ElementId,
    ) -> Option<Arc<ModuleInstance>> {
        self.shared.find_instance(factory.type_name(), element)
    }

    /// Delist an instance by reference identity.
    ///
    /// Returns whether anything was evicted; an absent instance (double
    /// removal, foreign instance) is a silent no-op.
    pub fn remove_instance(&self, instance: &Arc<ModuleInstance>) -> bool {
        self.shared.remove_instance(instance)
    }

    /// Every live instance bound to `element`.
    pub fn lookup(&self, element: ElementId) -> Vec<Arc<ModuleInstance>> {
        let cache = self.shared.cache.lock();
        let mut out = Vec::new();
        for instances in cache.values() {
            for instance in instances {
                if instance.element() == element {
                    out.push(Arc::clone(instance));
                }
            }
        }
        out
    }

    /// The live instance of one type bound to `element`, if any.
    pub fn lookup_type(
        &self,
        element: ElementId,
        type_name: &str,
    ) -> Option<Arc<ModuleInstance>> {
        self.shared.find_instance(type_name, element)
    }

    /// Extend the base lifecycle contract shared by every module type.
    ///
    /// Fails with [`Error::DuplicateBaseMethod`] on an existing name and
    /// with [`Error::BaseSealed`] once any type has been compiled.
    pub fn mixin(&self, map: BehaviorMap) -> Result<()> {
        self.shared.base.lock().add(map)
    }

    /// Invalidate exactly one type's compiled constructor and recompile.
    ///
    /// Existing instances are unaffected; only future instantiations see
    /// the new shape. Returns `None` for an undefined type.
    pub fn rebuild(&self, type_name: &str) -> Option<Arc<CapabilityTable>> {
        let factory = self.find(type_name)?;
        factory.invalidate();
        Some(factory.build(false))
    }
}

impl RegistryShared {
    fn initialize(self: &Arc<Self>, root: ElementId) -> Result<()> {
        let factories: Vec<Arc<ModuleFactory>> =
            self.factories.read().values().cloned().collect();
        for factory in factories {
            if factory.is_deferred() {
                self.install_delegation(&factory);
            } else {
                for element in self.document.query(root, &factory.selector()) {
                    self.instance(&factory, element, None, None)?;
                }
            }
        }
        Ok(())
    }

    /// Install one document-level listener per deferral rule, once per
    /// factory regardless of how many times `initialize` runs.
    fn install_delegation(self: &Arc<Self>, factory: &Arc<ModuleFactory>) {
        if !factory.mark_delegated() {
            return;
        }
        let namespace = format!("trellis:{}", factory.type_name());
        for rule in factory.deferral_rules() {
            let weak = Arc::downgrade(self);
            let factory = Arc::clone(factory);
            let handler_rule = rule.clone();
            self.document.on_delegated(
                self.document.root(),
                rule.on.clone(),
                factory.selector(),
                namespace.clone(),
                Arc::new(move |event: &Event| {
                    if let Some(shared) = weak.upgrade() {
                        shared.delegated_trigger(&factory, &handler_rule, event);
                    }
                }),
            );
        }
        tracing::debug!(
            target: "trellis::registry",
            module = factory.type_name(),
            rules = factory.deferral_rules().len(),
            "installed deferred delegation"
        );
    }

    /// Listener body for a delegated trigger.
    fn delegated_trigger(
        self: &Arc<Self>,
        factory: &Arc<ModuleFactory>,
        rule: &DeferConfig,
        event: &Event,
    ) {
        if event.modifiers().open_in_new_tab() {
            return;
        }
        if rule.prevent_default {
            event.prevent_default();
        }
        if let Err(error) =
            self.instance(factory, event.current_target(), None, Some(event))
        {
            // A delegated trigger has no caller to propagate to.
            tracing::error!(
                target: "trellis::registry",
                module = factory.type_name(),
                %error,
                "deferred instantiation failed"
            );
        }
    }

    fn instance(
        self: &Arc<Self>,
        factory: &Arc<ModuleFactory>,
        element: ElementId,
        overrides: Option<Value>,
        trigger: Option<&Event>,
    ) -> Result<Arc<ModuleInstance>> {
        if let Some(existing) = self.find_instance(factory.type_name(), element) {
            existing.run(trigger)?;
            return Ok(existing);
        }

        // Resolution strictly precedes merge, merge precedes construction,
        // construction precedes run.
        let bundle = self.libraries.require(&factory.dependencies())?;

        let mut options = factory.extract(&self.document, element);
        if let (Some(merged), Some(Value::Object(over))) = (options.as_object_mut(), overrides)
        {
            for (key, value) in over {
                merged.insert(key, value);
            }
        }

        let table = factory.build(false);
        let serial = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let identity = format!("{}-{}", factory.type_name(), serial);
        let instance = ModuleInstance::new(
            Arc::clone(&self.document),
            element,
            identity,
            table,
            bundle,
            options,
        );

        // `update` re-scans the replaced content for nested matches;
        // `remove` evicts from the cache and releases the bundle.
        {
            let weak = Arc::downgrade(self);
            instance.signals().connect("update", move |_| {
                if let Some(shared) = weak.upgrade() {
                    if let Err(error) = shared.initialize(element) {
                        tracing::error!(
                            target: "trellis::registry",
                            %error,
                            "re-scan after content update failed"
                        );
                    }
                }
            });
        }
        {
            let weak_shared = Arc::downgrade(self);
            let weak_instance = Arc::downgrade(&instance);
            instance.signals().connect("remove", move |_| {
                let Some(instance) = weak_instance.upgrade() else {
                    return;
                };
                if let Some(shared) = weak_shared.upgrade() {
                    shared.remove_instance(&instance);
                }
                instance.bundle().teardown();
            });
        }

        instance.initialize()?;
        instance.run(trigger)?;
        self.add_instance(&instance);
        tracing::debug!(
            target: "trellis::registry",
            identity = instance.identity(),
            "instantiated module"
        );
        Ok(instance)
    }

    fn find_instance(&self, type_name: &str, element: ElementId) -> Option<Arc<ModuleInstance>> {
        self.cache
            .lock()
            .get(type_name)?
            .iter()
            .find(|i| i.element() == element)
            .cloned()
    }

    fn add_instance(&self, instance: &Arc<ModuleInstance>) {
        self.cache
            .lock()
            .entry(instance.type_name().to_owned())
            .or_default()
            .push(Arc::clone(instance));
    }

    fn remove_instance(&self, instance: &Arc<ModuleInstance>) -> bool {
        let mut cache = self.cache.lock();
        let Some(instances) = cache.get_mut(instance.type_name()) else {
            return false;
        };
        let before = instances.len();
        instances.retain(|i| !Arc::ptr_eq(i, instance));
        instances.len() != before
    }
}
