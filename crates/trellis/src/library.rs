//! Dependency injection: named library handles and per-instance bundles.
//!
//! Module types declare the libraries they need by name. At instantiation
//! time the registry resolves the declared set through a
//! [`LibraryRegistry`] into one [`DependencyBundle`] owned by the instance;
//! removal releases the bundle through its paired [`DependencyBundle::teardown`].
//!
//! Resolution happens exactly once per instantiation and teardown exactly
//! once per removal; both are observable through counters so callers can
//! assert the pairing.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;

use trellis_core::Hub;

use crate::error::{Error, Result};

/// A type-erased library handle.
pub type LibraryHandle = Arc<dyn Any + Send + Sync>;

/// The resolved set of library handles for one module instance, plus the
/// paired teardown call.
pub struct DependencyBundle {
    handles: IndexMap<String, LibraryHandle>,
    torn_down: AtomicBool,
    release: Arc<dyn Fn() + Send + Sync>,
}

impl fmt::Debug for DependencyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyBundle")
            .field("handles", &self.handles.keys().collect::<Vec<_>>())
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}

impl DependencyBundle {
    /// Fetch a handle by name, downcast to its concrete type.
    ///
    /// Returns `None` if the name is absent or the type does not match.
    pub fn handle<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let handle = self.handles.get(name)?;
        Arc::clone(handle).downcast::<T>().ok()
    }

    /// The shared hub, when a `hub` handle was resolved.
    pub fn hub(&self) -> Option<Arc<Hub>> {
        self.handle::<Hub>("hub")
    }

    /// The resolved library names, in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    /// Release the bundle. Idempotent: only the first call runs the
    /// registry's release hook.
    pub fn teardown(&self) {
        if !self.torn_down.swap(true, Ordering::SeqCst) {
            (self.release)();
        }
    }

    /// Whether [`DependencyBundle::teardown`] has run.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

/// The external registry of named library handles.
///
/// Handles are registered once and shared; [`LibraryRegistry::require`]
/// snapshots the requested subset into a bundle.
pub struct LibraryRegistry {
    libraries: RwLock<IndexMap<String, LibraryHandle>>,
    resolutions: Arc<AtomicU64>,
    teardowns: Arc<AtomicU64>,
}

impl LibraryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            libraries: RwLock::new(IndexMap::new()),
            resolutions: Arc::new(AtomicU64::new(0)),
            teardowns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a handle under a name.
    ///
    /// Fails with [`Error::DuplicateLibrary`] if the name is taken.
    pub fn register(&self, name: impl Into<String>, handle: LibraryHandle) -> Result<()> {
        let name = name.into();
        let mut libraries = self.libraries.write();
        if libraries.contains_key(&name) {
            return Err(Error::DuplicateLibrary(name));
        }
        tracing::trace!(target: "trellis::library", %name, "registered library");
        libraries.insert(name, handle);
        Ok(())
    }

    /// Whether a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.libraries.read().contains_key(name)
    }

    /// Resolve a set of names into a bundle.
    ///
    /// Fails with [`Error::UnknownLibrary`] naming the first missing
    /// library; the failure is propagated unwrapped by the instantiation
    /// path.
    pub fn require(&self, names: &IndexSet<String>) -> Result<DependencyBundle> {
        let libraries = self.libraries.read();
        let mut handles = IndexMap::with_capacity(names.len());
        for name in names {
            let handle = libraries
                .get(name)
                .ok_or_else(|| Error::UnknownLibrary(name.clone()))?;
            handles.insert(name.clone(), Arc::clone(handle));
        }
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        let teardowns = Arc::clone(&self.teardowns);
        Ok(DependencyBundle {
            handles,
            torn_down: AtomicBool::new(false),
            release: Arc::new(move || {
                teardowns.fetch_add(1, Ordering::SeqCst);
            }),
        })
    }

    /// Number of successful [`LibraryRegistry::require`] calls.
    pub fn resolution_count(&self) -> u64 {
        self.resolutions.load(Ordering::SeqCst)
    }

    /// Number of bundle teardowns that have run.
    pub fn teardown_count(&self) -> u64 {
        self.teardowns.load(Ordering::SeqCst)
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> IndexSet<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    #[test]
    fn resolves_registered_handles() {
        let registry = LibraryRegistry::new();
        registry.register("hub", Arc::new(Hub::new())).unwrap();
        registry
            .register("config", Arc::new("production".to_owned()))
            .unwrap();

        let bundle = registry.require(&names(&["hub", "config"])).unwrap();
        assert!(bundle.hub().is_some());
        assert_eq!(*bundle.handle::<String>("config").unwrap(), "production");
        assert_eq!(registry.resolution_count(), 1);
    }

    #[test]
    fn missing_library_fails_unwrapped() {
        let registry = LibraryRegistry::new();
        let err = registry.require(&names(&["nope"])).unwrap_err();
        assert!(matches!(err, Error::UnknownLibrary(name) if name == "nope"));
        assert_eq!(registry.resolution_count(), 0);
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = LibraryRegistry::new();
        registry.register("hub", Arc::new(Hub::new())).unwrap();
        let err = registry.register("hub", Arc::new(Hub::new())).unwrap_err();
        assert!(matches!(err, Error::DuplicateLibrary(name) if name == "hub"));
    }

    #[test]
    fn teardown_runs_exactly_once() {
        let registry = LibraryRegistry::new();
        registry.register("hub", Arc::new(Hub::new())).unwrap();
        let bundle = registry.require(&names(&["hub"])).unwrap();

        bundle.teardown();
        bundle.teardown();
        assert!(bundle.is_torn_down());
        assert_eq!(registry.teardown_count(), 1);
    }

    #[test]
    fn mismatched_downcast_returns_none() {
        let registry = LibraryRegistry::new();
        registry.register("config", Arc::new(42u32)).unwrap();
        let bundle = registry.require(&names(&["config"])).unwrap();
        assert!(bundle.handle::<String>("config").is_none());
        assert!(bundle.handle::<u32>("config").is_some());
    }
}
