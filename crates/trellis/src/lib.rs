//! Trellis: a declarative module framework for a document tree.
//!
//! Authors register named module *types* against a staged factory builder;
//! the framework discovers matching elements (`data-<type>` attributes),
//! instantiates one behavior object per element, wires it to shared
//! dependencies, and tears it down when the element disappears.
//!
//! The crate is organized around four pieces:
//!
//! - **Factory Builder** ([`ModuleFactory`]): accumulates a type's
//!   configuration - parent, methods, option defaults, dependency names,
//!   deferral rules - and compiles it on demand into a cached
//!   [`CapabilityTable`]
//! - **Module Registry** ([`ModuleRegistry`]): discovers elements, resolves
//!   dependencies, creates/tracks/evicts instances, and manages deferred
//!   (event-delegated) initialization
//! - **Lifecycle Instance** ([`ModuleInstance`]): the runtime object bound
//!   to one element, obeying `created → running → (updated)* → removed`
//! - **Dependency Bundle** ([`DependencyBundle`]): the resolved set of
//!   named library handles plus a paired teardown, supplied per instance
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use trellis::{BehaviorMap, ModuleRegistry};
//! use trellis_core::{Document, ElementNode};
//!
//! # fn main() -> trellis::Result<()> {
//! let doc = Arc::new(Document::new());
//! let registry = ModuleRegistry::new(doc.clone());
//!
//! registry
//!     .define("tooltip")?
//!     .options(json!({"delay": 100}))
//!     .methods(BehaviorMap::new().with("run", |instance, _call| {
//!         println!("tooltip on {:?} with {:?}", instance.element(), instance.options());
//!         Ok(())
//!     }))?;
//!
//! doc.mount(
//!     doc.root(),
//!     ElementNode::new("div")
//!         .attr("data-tooltip", "")
//!         .attr("data-tooltip-delay", "250"),
//! );
//!
//! registry.initialize(doc.root())?;
//! # Ok(())
//! # }
//! ```

pub mod behavior;
mod error;
pub mod factory;
pub mod instance;
pub mod library;
pub mod registry;

pub use behavior::{slots, BehaviorMap, CapabilityTable, Method, MethodCall};
pub use error::{BehaviorError, Error, Result};
pub use factory::{DeferConfig, ModuleFactory, Parent, HUB_DEPENDENCY};
pub use instance::{InstanceEventHandler, InstanceSignals, LifecycleState, ModuleInstance};
pub use library::{DependencyBundle, LibraryHandle, LibraryRegistry};
pub use registry::ModuleRegistry;

// Re-export the collaborator layer users always touch alongside the
// framework types.
pub use trellis_core::{Document, ElementId, ElementNode, Event, Fragment, Hub, Modifiers, Selector};
