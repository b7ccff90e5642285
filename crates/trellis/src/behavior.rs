//! Behavior tables: the compiled shape of a module type.
//!
//! Module behavior is declared as named methods. At build time a type's
//! methods are flattened into one [`CapabilityTable`] from three layers,
//! later layers overriding earlier ones:
//!
//! 1. the registry-wide [`BaseTable`] (the base lifecycle contract),
//! 2. the parent type's already-flattened table, if any,
//! 3. the type's own accumulated methods.
//!
//! The flattened table, wrapped in an `Arc`, *is* the type's constructor:
//! callers compare tables by `Arc` identity, so a non-forced rebuild must
//! hand back the same allocation.
//!
//! The slot names `initialize`, `run`, and `teardown` are invoked by the
//! lifecycle machinery; every other name is reachable through
//! [`ModuleInstance::invoke`](crate::ModuleInstance::invoke).

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use trellis_core::Event;

use crate::error::{BehaviorError, Error, Result};
use crate::instance::ModuleInstance;

/// Well-known method slot names.
pub mod slots {
    /// Invoked exactly once, after wiring, before registration.
    pub const INITIALIZE: &str = "initialize";
    /// Invoked after `initialize`, and again on every repeated deferred
    /// trigger against a live instance.
    pub const RUN: &str = "run";
    /// Invoked once during removal, before bindings are cleaned up.
    pub const TEARDOWN: &str = "teardown";
}

static NULL: Value = Value::Null;

/// Arguments passed to a method invocation.
#[derive(Clone, Copy, Default)]
pub struct MethodCall<'a> {
    trigger: Option<&'a Event>,
    payload: Option<&'a Value>,
}

impl<'a> MethodCall<'a> {
    /// A call with no trigger and a null payload.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A call carrying the event that triggered it.
    pub fn with_trigger(trigger: Option<&'a Event>) -> Self {
        Self {
            trigger,
            payload: None,
        }
    }

    /// A call carrying a structured payload.
    pub fn with_payload(payload: &'a Value) -> Self {
        Self {
            trigger: None,
            payload: Some(payload),
        }
    }

    /// The triggering event, when the call came from a delegated trigger.
    pub fn trigger(&self) -> Option<&'a Event> {
        self.trigger
    }

    /// The structured payload; null when none was supplied.
    pub fn payload(&self) -> &'a Value {
        self.payload.unwrap_or(&NULL)
    }
}

/// One module method: a shared closure over the instance and call.
pub type Method =
    Arc<dyn Fn(&ModuleInstance, MethodCall<'_>) -> std::result::Result<(), BehaviorError> + Send + Sync>;

/// An ordered collection of named methods, the unit of staged definition.
///
/// Within one map a repeated name overwrites (mirroring a literal); the
/// duplicate check the framework guarantees applies *across* staged
/// definition calls on a factory, where the module type name is known.
#[derive(Clone, Default)]
pub struct BehaviorMap {
    methods: IndexMap<String, Method>,
}

impl BehaviorMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method, chaining.
    pub fn with<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&ModuleInstance, MethodCall<'_>) -> std::result::Result<(), BehaviorError>
            + Send
            + Sync
            + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    /// Number of methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Iterate methods in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Method)> {
        self.methods.iter().map(|(n, m)| (n.as_str(), m))
    }

    pub(crate) fn into_methods(self) -> IndexMap<String, Method> {
        self.methods
    }
}

/// The flattened capability table of one compiled module type.
///
/// Tagged with the type name; `Arc<CapabilityTable>` identity is the
/// "constructor identity" contract of the staged builder.
pub struct CapabilityTable {
    type_name: String,
    methods: IndexMap<String, Method>,
}

impl CapabilityTable {
    /// Flatten base, parent, and own layers into one table.
    pub(crate) fn flatten(
        type_name: impl Into<String>,
        base: &IndexMap<String, Method>,
        parent: Option<&CapabilityTable>,
        own: &IndexMap<String, Method>,
    ) -> Self {
        let mut methods = base.clone();
        if let Some(parent) = parent {
            for (name, method) in &parent.methods {
                methods.insert(name.clone(), Arc::clone(method));
            }
        }
        for (name, method) in own {
            methods.insert(name.clone(), Arc::clone(method));
        }
        Self {
            type_name: type_name.into(),
            methods,
        }
    }

    /// The module type this table was compiled for.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Whether a method name is present.
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Method names in flattened order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// The registry-wide base contract shared by every module type.
///
/// Mutable only until the first type is compiled; after that the table is
/// sealed and further mixins fail, so flattening never depends on call
/// ordering.
#[derive(Default)]
pub(crate) struct BaseTable {
    methods: IndexMap<String, Method>,
    sealed: bool,
}

impl BaseTable {
    /// Merge methods into the base contract.
    pub(crate) fn add(&mut self, map: BehaviorMap) -> Result<()> {
        if self.sealed {
            return Err(Error::BaseSealed);
        }
        for (name, _) in map.iter() {
            if self.methods.contains_key(name) {
                return Err(Error::DuplicateBaseMethod(name.to_owned()));
            }
        }
        for (name, method) in map.into_methods() {
            self.methods.insert(name, method);
        }
        Ok(())
    }

    /// Seal the table; called on first compile.
    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    pub(crate) fn methods(&self) -> &IndexMap<String, Method> {
        &self.methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> BehaviorMap {
        BehaviorMap::new().with("noop", |_, _| Ok(()))
    }

    #[test]
    fn flatten_layers_override_in_order() {
        let base = noop().into_methods();
        let parent_own = BehaviorMap::new()
            .with("run", |_, _| Ok(()))
            .with("noop", |_, _| Ok(()))
            .into_methods();
        let parent = CapabilityTable::flatten("parent", &base, None, &parent_own);
        assert!(parent.has_method("noop"));
        assert!(parent.has_method("run"));

        let own = BehaviorMap::new().with("run", |_, _| Ok(())).into_methods();
        let child = CapabilityTable::flatten("child", &base, Some(&parent), &own);
        assert_eq!(child.type_name(), "child");
        // Child's run overrides the parent's.
        assert!(!Arc::ptr_eq(
            child.method("run").unwrap(),
            parent_own.get("run").unwrap()
        ));
        assert!(Arc::ptr_eq(child.method("run").unwrap(), own.get("run").unwrap()));
    }

    #[test]
    fn base_table_rejects_duplicates() {
        let mut base = BaseTable::default();
        base.add(noop()).unwrap();
        let err = base.add(noop()).unwrap_err();
        assert!(matches!(err, Error::DuplicateBaseMethod(name) if name == "noop"));
    }

    #[test]
    fn base_table_rejects_mixin_after_seal() {
        let mut base = BaseTable::default();
        base.seal();
        assert!(matches!(base.add(noop()), Err(Error::BaseSealed)));
    }

    #[test]
    fn method_call_defaults() {
        let call = MethodCall::empty();
        assert!(call.trigger().is_none());
        assert!(call.payload().is_null());
    }
}
