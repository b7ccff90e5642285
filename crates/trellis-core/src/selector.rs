//! CSS-like selectors for element queries.
//!
//! A much smaller grammar than a browser's: a selector is a single compound
//! part made of an optional tag name, `.class` constraints, and `[attr]`
//! presence constraints. That is the whole vocabulary the framework queries
//! on (`[data-tooltip]` for type discovery, `button.close` for event
//! delegation); combinators are expressed structurally by scoping a query
//! to a subtree instead.

use std::fmt;

use crate::document::{Document, ElementId};

/// A compound selector: every present constraint must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    /// Tag name constraint (`button`), `None` matches any tag.
    pub tag: Option<String>,
    /// Class constraints (`.close`); matched against the whitespace-separated
    /// `class` attribute.
    pub classes: Vec<String>,
    /// Attribute presence constraints (`[data-tooltip]`).
    pub attributes: Vec<String>,
}

impl Selector {
    /// Selector matching a tag name.
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    /// Selector matching elements carrying an attribute.
    pub fn attribute(name: impl Into<String>) -> Self {
        Self {
            attributes: vec![name.into()],
            ..Self::default()
        }
    }

    /// Selector matching elements carrying a class.
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            classes: vec![name.into()],
            ..Self::default()
        }
    }

    /// Parse a compound selector string like `"button.close[data-x]"`.
    ///
    /// The grammar is `tag? ('.' class | '[' attr ']')*`. Returns `None`
    /// for an empty or malformed string.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        let mut selector = Selector::default();
        let mut rest = input;

        // Leading tag name, if any.
        let tag_end = rest
            .find(|c| c == '.' || c == '[')
            .unwrap_or(rest.len());
        if tag_end > 0 {
            let tag = &rest[..tag_end];
            if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return None;
            }
            selector.tag = Some(tag.to_owned());
        }
        rest = &rest[tag_end..];

        while !rest.is_empty() {
            if let Some(stripped) = rest.strip_prefix('.') {
                let end = stripped
                    .find(|c| c == '.' || c == '[')
                    .unwrap_or(stripped.len());
                if end == 0 {
                    return None;
                }
                selector.classes.push(stripped[..end].to_owned());
                rest = &stripped[end..];
            } else if let Some(stripped) = rest.strip_prefix('[') {
                let end = stripped.find(']')?;
                if end == 0 {
                    return None;
                }
                selector.attributes.push(stripped[..end].to_owned());
                rest = &stripped[end + 1..];
            } else {
                return None;
            }
        }
        Some(selector)
    }

    /// Check whether an element satisfies every constraint of this selector.
    ///
    /// A detached or invalid element never matches.
    pub fn matches(&self, document: &Document, element: ElementId) -> bool {
        if !document.contains(element) {
            return false;
        }
        if let Some(tag) = &self.tag {
            match document.tag(element) {
                Some(t) if &t == tag => {}
                _ => return false,
            }
        }
        if !self.classes.is_empty() {
            let class_attr = document.attribute(element, "class").unwrap_or_default();
            for class in &self.classes {
                if !class_attr.split_whitespace().any(|c| c == class) {
                    return false;
                }
            }
        }
        for attr in &self.attributes {
            if !document.has_attribute(element, attr) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tag) = &self.tag {
            write!(f, "{tag}")?;
        }
        for class in &self.classes {
            write!(f, ".{class}")?;
        }
        for attr in &self.attributes {
            write!(f, "[{attr}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    #[test]
    fn parses_compound_selectors() {
        let sel = Selector::parse("button.close[data-x]").unwrap();
        assert_eq!(sel.tag.as_deref(), Some("button"));
        assert_eq!(sel.classes, vec!["close".to_owned()]);
        assert_eq!(sel.attributes, vec!["data-x".to_owned()]);
    }

    #[test]
    fn parses_attribute_only() {
        let sel = Selector::parse("[data-tooltip]").unwrap();
        assert_eq!(sel.tag, None);
        assert_eq!(sel.attributes, vec!["data-tooltip".to_owned()]);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Selector::parse("").is_none());
        assert!(Selector::parse("[unclosed").is_none());
        assert!(Selector::parse("a..b").is_none());
        assert!(Selector::parse("div>span").is_none());
    }

    #[test]
    fn matches_tag_class_and_attribute() {
        let doc = Document::new();
        let el = doc.create_element("button");
        doc.append_child(doc.root(), el).unwrap();
        doc.set_attribute(el, "class", "primary close").unwrap();
        doc.set_attribute(el, "data-x", "1").unwrap();

        assert!(Selector::parse("button").unwrap().matches(&doc, el));
        assert!(Selector::parse(".close").unwrap().matches(&doc, el));
        assert!(Selector::parse("button.primary[data-x]")
            .unwrap()
            .matches(&doc, el));
        assert!(!Selector::parse("div").unwrap().matches(&doc, el));
        assert!(!Selector::parse(".missing").unwrap().matches(&doc, el));
        assert!(!Selector::parse("[data-y]").unwrap().matches(&doc, el));
    }

    #[test]
    fn display_round_trips() {
        let sel = Selector::parse("button.close[data-x]").unwrap();
        assert_eq!(sel.to_string(), "button.close[data-x]");
    }
}
