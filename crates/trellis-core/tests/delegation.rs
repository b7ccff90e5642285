//! Integration tests for delegated dispatch against a mutating tree.

use std::sync::Arc;

use parking_lot::Mutex;
use trellis_core::{Document, DocumentTreeDebug, ElementNode, Fragment, Modifiers, Selector, TreeStyle};

#[test]
fn delegation_survives_content_replacement() {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();

    let doc = Arc::new(Document::new());
    let list = doc.mount(doc.root(), ElementNode::new("ul"));

    let clicks = Arc::new(Mutex::new(0usize));
    let clicks2 = Arc::clone(&clicks);
    doc.on_delegated(
        list,
        "click",
        Selector::parse(".row").unwrap(),
        "app",
        Arc::new(move |_| *clicks2.lock() += 1),
    );

    let first = doc.mount(list, ElementNode::new("li").attr("class", "row"));
    doc.dispatch("click", first, Modifiers::default());
    assert_eq!(*clicks.lock(), 1);

    // Replace the rows wholesale; the delegated binding at the list keeps
    // working for the new content.
    doc.replace_children(
        list,
        Fragment::new()
            .node(ElementNode::new("li").attr("class", "row"))
            .node(ElementNode::new("li")),
    )
    .unwrap();

    let rows = doc.children(list);
    doc.dispatch("click", rows[0], Modifiers::default());
    doc.dispatch("click", rows[1], Modifiers::default());
    assert_eq!(*clicks.lock(), 2);
}

#[test]
fn direct_bindings_die_with_their_element() {
    let doc = Arc::new(Document::new());
    let button = doc.mount(doc.root(), ElementNode::new("button"));

    let clicks = Arc::new(Mutex::new(0usize));
    let clicks2 = Arc::clone(&clicks);
    doc.on(button, "click", "app", Arc::new(move |_| *clicks2.lock() += 1));

    doc.dispatch("click", button, Modifiers::default());
    doc.detach(button).unwrap();
    doc.dispatch("click", button, Modifiers::default());
    assert_eq!(*clicks.lock(), 1);
}

#[test]
fn tree_debug_reflects_structure() {
    let doc = Document::new();
    doc.mount(
        doc.root(),
        ElementNode::new("section")
            .attr("data-panel", "")
            .child(ElementNode::new("button").attr("class", "close")),
    );

    let dump = DocumentTreeDebug::new(&doc)
        .with_style(TreeStyle::Unicode)
        .format_tree();
    assert!(dump.contains("section [data-panel]"));
    assert!(dump.contains("button [class=\"close\"]"));
}
