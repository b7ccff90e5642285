//! Collaborator primitives for the Trellis framework.
//!
//! This crate provides the substrate the module framework binds behavior to:
//!
//! - **Document Tree**: arena-backed element tree with ordered attributes,
//!   subtree queries, content replacement, and cascade detach
//! - **Selectors**: the small CSS-like grammar used for discovery and
//!   event delegation (`[data-tooltip]`, `button.close`)
//! - **Events**: synchronous bubbling dispatch with namespaced direct and
//!   delegated listener bindings
//! - **Hub**: string-topic publish/subscribe used for cross-module
//!   broadcast
//! - **Literals**: total parsing of attribute strings into structured
//!   values
//!
//! Nothing in this crate knows about module types, factories, or
//! lifecycles; the `trellis` crate builds those on top of exactly these
//! primitives.
//!
//! # Example
//!
//! ```
//! use trellis_core::{Document, ElementNode, Modifiers, Selector};
//! use std::sync::Arc;
//!
//! let doc = Arc::new(Document::new());
//! let button = doc.mount(
//!     doc.root(),
//!     ElementNode::new("button").attr("data-menu", ""),
//! );
//!
//! doc.on_delegated(
//!     doc.root(),
//!     "click",
//!     Selector::attribute("data-menu"),
//!     "app",
//!     Arc::new(|event| println!("menu clicked: {:?}", event.current_target())),
//! );
//!
//! doc.dispatch("click", button, Modifiers::default());
//! ```

pub mod document;
mod error;
pub mod event;
pub mod hub;
pub mod literal;
pub mod logging;
pub mod selector;

pub use document::{Document, ElementId, ElementNode, Fragment};
pub use error::{DocumentError, DocumentResult};
pub use event::{Event, EventHandler, ListenerId, Modifiers};
pub use hub::{Hub, SubscriptionId};
pub use literal::{option_key, parse_literal};
pub use logging::{DocumentTreeDebug, TreeStyle};
pub use selector::Selector;
