//! Logging and debugging facilities.
//!
//! Trellis uses the `tracing` crate for instrumentation. Install a
//! subscriber in the host application to see output:
//!
//! ```ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! This module also provides [`DocumentTreeDebug`] for dumping the element
//! tree while debugging discovery or delegation problems.

use std::fmt::Write as FmtWrite;

use crate::document::{Document, ElementId};

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Document tree target.
    pub const DOCUMENT: &str = "trellis_core::document";
    /// Event dispatch target.
    pub const EVENT: &str = "trellis_core::event";
    /// Hub target.
    pub const HUB: &str = "trellis_core::hub";
}

/// Style options for document tree visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    Unicode,
}

/// Formats the element tree for debug output.
pub struct DocumentTreeDebug<'a> {
    document: &'a Document,
    style: TreeStyle,
}

impl<'a> DocumentTreeDebug<'a> {
    /// Create a formatter over a document, using Unicode branches.
    pub fn new(document: &'a Document) -> Self {
        Self {
            document,
            style: TreeStyle::Unicode,
        }
    }

    /// Select the branch style.
    pub fn with_style(mut self, style: TreeStyle) -> Self {
        self.style = style;
        self
    }

    /// Render the whole tree, one element per line.
    pub fn format_tree(&self) -> String {
        let mut out = String::new();
        self.format_element(&mut out, self.document.root(), "", true, true);
        out
    }

    fn format_element(
        &self,
        out: &mut String,
        id: ElementId,
        prefix: &str,
        is_last: bool,
        is_root: bool,
    ) {
        let (branch, pipe) = match self.style {
            TreeStyle::Ascii => (if is_last { "`-- " } else { "|-- " }, "|   "),
            TreeStyle::Unicode => (if is_last { "└── " } else { "├── " }, "│   "),
        };

        let tag = self.document.tag(id).unwrap_or_else(|| "?".to_owned());
        let attrs = self
            .document
            .attributes(id)
            .iter()
            .map(|(n, v)| {
                if v.is_empty() {
                    n.clone()
                } else {
                    format!("{n}={v:?}")
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        if is_root {
            let _ = writeln!(out, "{tag}");
        } else if attrs.is_empty() {
            let _ = writeln!(out, "{prefix}{branch}{tag}");
        } else {
            let _ = writeln!(out, "{prefix}{branch}{tag} [{attrs}]");
        }

        let children = self.document.children(id);
        let child_prefix = if is_root {
            String::new()
        } else if is_last {
            format!("{prefix}    ")
        } else {
            format!("{prefix}{pipe}")
        };
        for (i, child) in children.iter().enumerate() {
            let last = i + 1 == children.len();
            self.format_element(out, *child, &child_prefix, last, false);
        }
    }
}
