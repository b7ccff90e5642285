//! In-memory document tree.
//!
//! Provides the element tree the framework binds behavior to:
//!
//! - Arena-based element storage with stable IDs
//! - Parent-child relationships with cascade detach
//! - Ordered attribute storage and enumeration
//! - Selector queries scoped to a subtree
//! - Content replacement from owned [`Fragment`] values
//!
//! The tree knows nothing about module types or lifecycles; it supplies
//! exactly the primitives the framework layer consumes: selection, attribute
//! enumeration, content replacement, and removal.
//!
//! # Key Types
//!
//! - [`Document`] - The tree and its event listener store
//! - [`ElementId`] - Stable arena key for one element
//! - [`ElementNode`] / [`Fragment`] - Owned builders for mounting subtrees
//!
//! # Example
//!
//! ```
//! use trellis_core::{Document, ElementNode, Selector};
//!
//! let doc = Document::new();
//! let panel = doc.mount(
//!     doc.root(),
//!     ElementNode::new("div")
//!         .attr("data-tooltip", "")
//!         .attr("data-tooltip-delay", "250"),
//! );
//!
//! let matches = doc.query(doc.root(), &Selector::attribute("data-tooltip"));
//! assert_eq!(matches, vec![panel]);
//! ```

use parking_lot::{Mutex, RwLock};
use slotmap::{new_key_type, SlotMap};
use static_assertions::assert_eq_size;

use crate::error::{DocumentError, DocumentResult};
use crate::event::ListenerStore;
use crate::selector::Selector;

new_key_type! {
    /// A unique identifier for an element in the document tree.
    ///
    /// IDs are stable handles that remain valid until the element is
    /// detached; a detached element's ID never matches anything again.
    pub struct ElementId;
}

assert_eq_size!(ElementId, u64);

/// An owned, not-yet-mounted element description.
///
/// Built with a chaining API and turned into arena elements by
/// [`Document::mount`] or [`Document::replace_children`].
#[derive(Debug, Clone, Default)]
pub struct ElementNode {
    tag: String,
    attributes: Vec<(String, String)>,
    children: Vec<ElementNode>,
}

impl ElementNode {
    /// Create a node with the given tag name.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Add an attribute.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Add a child node.
    pub fn child(mut self, child: ElementNode) -> Self {
        self.children.push(child);
        self
    }
}

/// An ordered sequence of [`ElementNode`]s, used for content replacement.
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    nodes: Vec<ElementNode>,
}

impl Fragment {
    /// Create an empty fragment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node.
    pub fn node(mut self, node: ElementNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// The nodes in this fragment, in mount order.
    pub fn nodes(&self) -> &[ElementNode] {
        &self.nodes
    }
}

impl From<ElementNode> for Fragment {
    fn from(node: ElementNode) -> Self {
        Self { nodes: vec![node] }
    }
}

impl FromIterator<ElementNode> for Fragment {
    fn from_iter<I: IntoIterator<Item = ElementNode>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

/// Internal per-element data.
struct ElementData {
    tag: String,
    /// Attributes in insertion order; updates rewrite in place.
    attributes: Vec<(String, String)>,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
}

impl ElementData {
    fn new(tag: String) -> Self {
        Self {
            tag,
            attributes: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }
}

pub(crate) struct Tree {
    elements: SlotMap<ElementId, ElementData>,
    root: ElementId,
}

/// The document: an element arena plus the event listener store.
///
/// All methods take `&self`; interior locks make the document shareable
/// behind an `Arc`. Locks are never held while user callbacks run.
pub struct Document {
    pub(crate) tree: RwLock<Tree>,
    pub(crate) listeners: Mutex<ListenerStore>,
}

impl Document {
    /// Create a document with a fresh root element.
    pub fn new() -> Self {
        let mut elements = SlotMap::with_key();
        let root = elements.insert(ElementData::new("root".to_owned()));
        Self {
            tree: RwLock::new(Tree { elements, root }),
            listeners: Mutex::new(ListenerStore::new()),
        }
    }

    /// The root element. Always valid; cannot be detached.
    pub fn root(&self) -> ElementId {
        self.tree.read().root
    }

    /// Create a detached element with the given tag.
    pub fn create_element(&self, tag: impl Into<String>) -> ElementId {
        let tag = tag.into();
        let id = self.tree.write().elements.insert(ElementData::new(tag.clone()));
        tracing::trace!(target: "trellis_core::document", ?id, %tag, "created element");
        id
    }

    /// Append `child` as the last child of `parent`.
    ///
    /// Re-appending an already-parented element moves it. Fails with
    /// [`DocumentError::CycleDetected`] if `parent` is `child` or one of its
    /// descendants.
    pub fn append_child(&self, parent: ElementId, child: ElementId) -> DocumentResult<()> {
        let mut tree = self.tree.write();
        if !tree.elements.contains_key(parent) || !tree.elements.contains_key(child) {
            return Err(DocumentError::InvalidElement);
        }
        // Walk up from `parent`; finding `child` means a cycle.
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(DocumentError::CycleDetected);
            }
            cursor = tree.elements[id].parent;
        }
        if let Some(old_parent) = tree.elements[child].parent {
            let siblings = &mut tree.elements[old_parent].children;
            siblings.retain(|&c| c != child);
        }
        tree.elements[child].parent = Some(parent);
        tree.elements[parent].children.push(child);
        Ok(())
    }

    /// Whether the element is live in this document.
    pub fn contains(&self, id: ElementId) -> bool {
        self.tree.read().elements.contains_key(id)
    }

    /// The element's tag name, or `None` if detached.
    pub fn tag(&self, id: ElementId) -> Option<String> {
        self.tree.read().elements.get(id).map(|e| e.tag.clone())
    }

    /// The element's parent, if any.
    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.tree.read().elements.get(id).and_then(|e| e.parent)
    }

    /// The element's children, in order.
    pub fn children(&self, id: ElementId) -> Vec<ElementId> {
        self.tree
            .read()
            .elements
            .get(id)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    /// The element's ancestors, closest first, ending at the root.
    pub fn ancestors(&self, id: ElementId) -> Vec<ElementId> {
        let tree = self.tree.read();
        let mut out = Vec::new();
        let mut cursor = tree.elements.get(id).and_then(|e| e.parent);
        while let Some(ancestor) = cursor {
            out.push(ancestor);
            cursor = tree.elements.get(ancestor).and_then(|e| e.parent);
        }
        out
    }

    /// Whether `id` sits somewhere below `ancestor`.
    pub fn is_descendant_of(&self, id: ElementId, ancestor: ElementId) -> bool {
        let tree = self.tree.read();
        let mut cursor = tree.elements.get(id).and_then(|e| e.parent);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = tree.elements.get(current).and_then(|e| e.parent);
        }
        false
    }

    /// Set (or overwrite) an attribute.
    pub fn set_attribute(
        &self,
        id: ElementId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> DocumentResult<()> {
        let name = name.into();
        let value = value.into();
        let mut tree = self.tree.write();
        let element = tree.elements.get_mut(id).ok_or(DocumentError::InvalidElement)?;
        if let Some(entry) = element.attributes.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            element.attributes.push((name, value));
        }
        Ok(())
    }

    /// Remove an attribute. Missing attributes are ignored.
    pub fn remove_attribute(&self, id: ElementId, name: &str) -> DocumentResult<()> {
        let mut tree = self.tree.write();
        let element = tree.elements.get_mut(id).ok_or(DocumentError::InvalidElement)?;
        element.attributes.retain(|(n, _)| n != name);
        Ok(())
    }

    /// An attribute's value, or `None` if absent or the element is detached.
    pub fn attribute(&self, id: ElementId, name: &str) -> Option<String> {
        self.tree.read().elements.get(id).and_then(|e| {
            e.attributes
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        })
    }

    /// Whether the element carries an attribute, including empty-valued ones.
    pub fn has_attribute(&self, id: ElementId, name: &str) -> bool {
        self.tree
            .read()
            .elements
            .get(id)
            .map(|e| e.attributes.iter().any(|(n, _)| n == name))
            .unwrap_or(false)
    }

    /// Every attribute on the element, in insertion order.
    pub fn attributes(&self, id: ElementId) -> Vec<(String, String)> {
        self.tree
            .read()
            .elements
            .get(id)
            .map(|e| e.attributes.clone())
            .unwrap_or_default()
    }

    /// All elements in the subtree rooted at `root` (inclusive) matching
    /// `selector`, in depth-first document order.
    pub fn query(&self, root: ElementId, selector: &Selector) -> Vec<ElementId> {
        let mut out = Vec::new();
        for id in self.descendants_inclusive(root) {
            if selector.matches(self, id) {
                out.push(id);
            }
        }
        out
    }

    /// Like [`Document::query`] but excluding `root` itself.
    pub fn query_descendants(&self, root: ElementId, selector: &Selector) -> Vec<ElementId> {
        self.query(root, selector)
            .into_iter()
            .filter(|&id| id != root)
            .collect()
    }

    /// Depth-first traversal of the subtree rooted at `root`, inclusive.
    pub fn descendants_inclusive(&self, root: ElementId) -> Vec<ElementId> {
        let tree = self.tree.read();
        if !tree.elements.contains_key(root) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(element) = tree.elements.get(id) {
                // Reverse so the first child is visited first.
                for &child in element.children.iter().rev() {
                    stack.push(child);
                }
            }
        }
        out
    }

    /// Mount a node (and its subtree) as the last child of `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not a live element; mounting only ever targets
    /// elements the caller just looked up.
    pub fn mount(&self, parent: ElementId, node: ElementNode) -> ElementId {
        let mut tree = self.tree.write();
        assert!(tree.elements.contains_key(parent), "mount target is detached");
        Self::mount_locked(&mut tree, parent, node)
    }

    fn mount_locked(tree: &mut Tree, parent: ElementId, node: ElementNode) -> ElementId {
        let mut data = ElementData::new(node.tag);
        data.attributes = node.attributes;
        data.parent = Some(parent);
        let id = tree.elements.insert(data);
        tree.elements[parent].children.push(id);
        for child in node.children {
            Self::mount_locked(tree, id, child);
        }
        id
    }

    /// Replace the element's children with the fragment's subtrees.
    ///
    /// The previous children are detached and their arena slots freed.
    /// Returns the IDs of the newly mounted top-level nodes.
    pub fn replace_children(
        &self,
        id: ElementId,
        fragment: Fragment,
    ) -> DocumentResult<Vec<ElementId>> {
        let mut tree = self.tree.write();
        if !tree.elements.contains_key(id) {
            return Err(DocumentError::InvalidElement);
        }
        let old_children = std::mem::take(&mut tree.elements[id].children);
        for child in old_children {
            Self::detach_locked(&mut tree, child);
        }
        let mut mounted = Vec::with_capacity(fragment.nodes.len());
        for node in fragment.nodes {
            mounted.push(Self::mount_locked(&mut tree, id, node));
        }
        drop(tree);
        self.listeners.lock().prune(|el| self.contains_unlocked(el));
        Ok(mounted)
    }

    /// Detach the element and its whole subtree from the document.
    ///
    /// Frees the arena slots; the IDs become invalid. Listeners bound to
    /// detached elements are pruned.
    pub fn detach(&self, id: ElementId) -> DocumentResult<()> {
        {
            let mut tree = self.tree.write();
            if !tree.elements.contains_key(id) {
                return Err(DocumentError::InvalidElement);
            }
            if id == tree.root {
                return Err(DocumentError::CannotDetachRoot);
            }
            if let Some(parent) = tree.elements[id].parent {
                let siblings = &mut tree.elements[parent].children;
                siblings.retain(|&c| c != id);
            }
            Self::detach_locked(&mut tree, id);
        }
        self.listeners.lock().prune(|el| self.contains_unlocked(el));
        tracing::trace!(target: "trellis_core::document", ?id, "detached element");
        Ok(())
    }

    fn detach_locked(tree: &mut Tree, id: ElementId) {
        let children = tree
            .elements
            .get(id)
            .map(|e| e.children.clone())
            .unwrap_or_default();
        for child in children {
            Self::detach_locked(tree, child);
        }
        tree.elements.remove(id);
    }

    fn contains_unlocked(&self, id: ElementId) -> bool {
        self.tree.read().elements.contains_key(id)
    }

    /// Number of live elements, including the root.
    pub fn len(&self) -> usize {
        self.tree.read().elements.len()
    }

    /// True when only the root element exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
