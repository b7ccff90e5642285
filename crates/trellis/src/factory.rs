//! Staged module-type factories.
//!
//! A [`ModuleFactory`] accumulates a module type's configuration across
//! chained calls - parent type, methods, option defaults, dependency
//! names, deferral rules - and compiles it on demand into one flattened
//! [`CapabilityTable`]. Compilation is deterministic and cached: repeated
//! non-forced [`ModuleFactory::build`] calls return the *identical*
//! `Arc`, which is the constructor-identity contract callers rely on.
//!
//! Factories are created by [`ModuleRegistry::define`](crate::ModuleRegistry::define)
//! and mutated through `&self` chaining:
//!
//! ```ignore
//! registry
//!     .define("tooltip")?
//!     .options(json!({"delay": 100}))
//!     .requires(["i18n"])
//!     .methods(BehaviorMap::new().with("run", |instance, call| { ... }))?
//!     .defer(DeferConfig::new("click"))?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use trellis_core::{literal, Document, ElementId, Selector};

use crate::behavior::{BaseTable, BehaviorMap, CapabilityTable, Method};
use crate::error::{Error, Result};

/// The implicit dependency every module type receives.
pub const HUB_DEPENDENCY: &str = "hub";

/// Configuration for one deferral rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferConfig {
    /// The triggering event name.
    pub on: String,
    /// Whether the framework suppresses the event's default action when
    /// the rule fires. Defaults to `true`.
    pub prevent_default: bool,
}

impl DeferConfig {
    /// A rule triggered by `on`, suppressing the default action.
    pub fn new(on: impl Into<String>) -> Self {
        Self {
            on: on.into(),
            prevent_default: true,
        }
    }

    /// Keep the event's default action when the rule fires.
    pub fn keep_default(mut self) -> Self {
        self.prevent_default = false;
        self
    }
}

/// A parent to build on: an already-compiled table, or a type name
/// resolved through the registry's lookup.
pub enum Parent {
    /// A compiled capability table.
    Table(Arc<CapabilityTable>),
    /// A module type name.
    Named(String),
}

impl From<Arc<CapabilityTable>> for Parent {
    fn from(table: Arc<CapabilityTable>) -> Self {
        Self::Table(table)
    }
}

impl From<&str> for Parent {
    fn from(name: &str) -> Self {
        Self::Named(name.to_owned())
    }
}

impl From<String> for Parent {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

/// Resolves a type name to its compiled table; injected by the registry.
pub(crate) type ParentLookup =
    Arc<dyn Fn(&str) -> Option<Arc<CapabilityTable>> + Send + Sync>;

struct FactoryState {
    parent: Option<Arc<CapabilityTable>>,
    properties: IndexMap<String, Method>,
    defaults: Map<String, Value>,
    dependencies: IndexSet<String>,
    defer_rules: Vec<DeferConfig>,
    compiled: Option<Arc<CapabilityTable>>,
}

/// Staged builder for one module type; owned by the registry.
pub struct ModuleFactory {
    type_name: String,
    /// Derived attribute-prefix: `"data-" + type_name`.
    namespace: String,
    base: Arc<Mutex<BaseTable>>,
    lookup: ParentLookup,
    state: Mutex<FactoryState>,
    /// Guard so `initialize` installs delegation at most once per factory.
    delegated: AtomicBool,
}

impl fmt::Debug for ModuleFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleFactory")
            .field("type_name", &self.type_name)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ModuleFactory {
    pub(crate) fn new(
        type_name: impl Into<String>,
        base: Arc<Mutex<BaseTable>>,
        lookup: ParentLookup,
    ) -> Self {
        let type_name = type_name.into();
        let namespace = format!("data-{type_name}");
        let mut dependencies = IndexSet::new();
        dependencies.insert(HUB_DEPENDENCY.to_owned());
        Self {
            type_name,
            namespace,
            base,
            lookup,
            state: Mutex::new(FactoryState {
                parent: None,
                properties: IndexMap::new(),
                defaults: Map::new(),
                dependencies,
                defer_rules: Vec::new(),
                compiled: None,
            }),
            delegated: AtomicBool::new(false),
        }
    }

    /// The module type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The attribute namespace marking elements of this type.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The query matching elements carrying this type's namespace.
    pub fn selector(&self) -> Selector {
        Selector::attribute(&self.namespace)
    }

    /// Set the parent to build on.
    ///
    /// Accepts a compiled table or a type name resolved through the
    /// registry; an unresolvable name fails with [`Error::InvalidParent`].
    /// Resolving a named parent compiles it (and thereby seals the base
    /// contract).
    pub fn extend(&self, parent: impl Into<Parent>) -> Result<&Self> {
        let table = match parent.into() {
            Parent::Table(table) => table,
            Parent::Named(name) => (self.lookup)(&name).ok_or_else(|| {
                Error::invalid_parent(
                    &self.type_name,
                    format!("'{name}' is not a defined module type"),
                )
            })?,
        };
        self.state.lock().parent = Some(table);
        Ok(self)
    }

    /// Copy methods into the type's property table.
    ///
    /// A name already accumulated by an earlier staged call fails with
    /// [`Error::DuplicateProperty`] - silent shadowing across definition
    /// calls is never allowed. Overriding *inherited* parent behavior is.
    pub fn methods(&self, map: BehaviorMap) -> Result<&Self> {
        let mut state = self.state.lock();
        for (name, _) in map.iter() {
            if state.properties.contains_key(name) {
                return Err(Error::duplicate_property(&self.type_name, name));
            }
        }
        for (name, method) in map.into_methods() {
            state.properties.insert(name, method);
        }
        Ok(self)
    }

    /// Alias of [`ModuleFactory::methods`].
    pub fn mixin(&self, map: BehaviorMap) -> Result<&Self> {
        self.methods(map)
    }

    /// Merge option defaults; later calls extend and override earlier
    /// ones, never replace wholesale. Non-object values are ignored.
    pub fn options(&self, defaults: Value) -> &Self {
        match defaults {
            Value::Object(map) => {
                let mut state = self.state.lock();
                for (key, value) in map {
                    state.defaults.insert(key, value);
                }
            }
            other => {
                tracing::warn!(
                    target: "trellis::factory",
                    module = %self.type_name,
                    ?other,
                    "ignoring non-object option defaults"
                );
            }
        }
        self
    }

    /// Declare required libraries. Duplicates collapse; the `hub`
    /// dependency is always implicitly present.
    pub fn requires<I, S>(&self, names: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        for name in names {
            state.dependencies.insert(name.into());
        }
        self
    }

    /// Append a deferral rule; its presence makes the type deferred.
    ///
    /// A rule with an empty trigger event fails with
    /// [`Error::InvalidDeferConfig`]. A type may carry several rules
    /// (separate triggers for touch and click, say).
    pub fn defer(&self, config: DeferConfig) -> Result<&Self> {
        if config.on.trim().is_empty() {
            return Err(Error::invalid_defer(
                &self.type_name,
                "missing trigger event name",
            ));
        }
        self.state.lock().defer_rules.push(config);
        Ok(self)
    }

    /// Whether at least one deferral rule is present.
    pub fn is_deferred(&self) -> bool {
        !self.state.lock().defer_rules.is_empty()
    }

    /// The deferral rules, in declaration order.
    pub fn deferral_rules(&self) -> Vec<DeferConfig> {
        self.state.lock().defer_rules.clone()
    }

    /// The declared dependency set, `hub` included.
    pub fn dependencies(&self) -> IndexSet<String> {
        self.state.lock().dependencies.clone()
    }

    /// The accumulated option defaults.
    pub fn defaults(&self) -> Map<String, Value> {
        self.state.lock().defaults.clone()
    }

    /// Extract declarative configuration from an element's attributes.
    ///
    /// Every attribute under this type's namespace prefix contributes an
    /// option: the prefix is stripped, the remainder camel-cased, and the
    /// raw value parsed as a structured literal with string fallback (an
    /// empty value reads as `true`). The result is layered over the
    /// defaults, extracted values winning. The bare marker attribute is
    /// membership, not configuration.
    pub fn extract(&self, document: &Document, element: ElementId) -> Value {
        let prefix = format!("{}-", self.namespace);
        let mut merged = self.state.lock().defaults.clone();
        for (name, raw) in document.attributes(element) {
            if let Some(suffix) = name.strip_prefix(&prefix) {
                if suffix.is_empty() {
                    continue;
                }
                merged.insert(literal::option_key(suffix), literal::parse_literal(&raw));
            }
        }
        Value::Object(merged)
    }

    /// Compile (or fetch the cached) capability table for this type.
    ///
    /// Flattens base contract, parent table, and own properties into one
    /// table tagged with the type name. Without `force`, repeated calls
    /// return the identical `Arc`; with `force`, a fresh table is compiled
    /// and cached. The first compile anywhere seals the base contract.
    pub fn build(&self, force: bool) -> Arc<CapabilityTable> {
        let mut state = self.state.lock();
        if !force {
            if let Some(compiled) = &state.compiled {
                return Arc::clone(compiled);
            }
        }
        let table = {
            let mut base = self.base.lock();
            base.seal();
            Arc::new(CapabilityTable::flatten(
                self.type_name.as_str(),
                base.methods(),
                state.parent.as_deref(),
                &state.properties,
            ))
        };
        tracing::debug!(
            target: "trellis::factory",
            module = %self.type_name,
            force,
            methods = table.method_names().count(),
            "compiled module type"
        );
        state.compiled = Some(Arc::clone(&table));
        table
    }

    /// Drop the cached table so the next [`ModuleFactory::build`] recompiles.
    ///
    /// Existing instances are unaffected; only future instantiations see
    /// the new shape.
    pub fn invalidate(&self) {
        self.state.lock().compiled = None;
    }

    /// Flip the delegation-installed guard; returns `true` the first time.
    pub(crate) fn mark_delegated(&self) -> bool {
        !self.delegated.swap(true, Ordering::SeqCst)
    }
}
