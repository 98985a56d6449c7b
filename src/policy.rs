//! Recording policies: what the serializer blocks, masks, inlines, and
//! collapses. Matching is by tag name and marker attribute; CSS selector
//! matching is deliberately out of scope.

use crate::tree::{DocTree, NodeData, NodeKey};

/// Marker attribute that opts an element's subtree out of capture.
pub const BLOCK_ATTR: &str = "data-capture-block";

#[derive(Clone, Debug)]
pub struct RecordPolicy {
    /// Elements with these tags are blocked: captured as an opaque
    /// placeholder that preserves only the bounding box.
    pub block_tags: Vec<String>,
    /// Replace input values with a same-length mask.
    pub mask_inputs: bool,
    /// Inline resolved stylesheet content in place of external links.
    pub inline_stylesheets: bool,
    /// Drop boilerplate head elements (meta, base) from the description.
    pub slim_head: bool,
    /// Drop whitespace-only text nodes outside of pre-formatted content.
    pub collapse_whitespace: bool,
    /// Capture canvas pixel snapshots supplied by the host.
    pub capture_canvas: bool,
}

impl Default for RecordPolicy {
    fn default() -> Self {
        Self {
            block_tags: Vec::new(),
            mask_inputs: false,
            inline_stylesheets: true,
            slim_head: true,
            collapse_whitespace: true,
            capture_canvas: false,
        }
    }
}

impl RecordPolicy {
    /// Whether this element itself is blocked from content capture.
    pub fn is_blocked_element(&self, tree: &DocTree, key: NodeKey) -> bool {
        let Ok(NodeData::Element { tag, attrs, .. }) = tree.data(key) else {
            return false;
        };
        attrs.contains_key(BLOCK_ATTR) || self.block_tags.iter().any(|t| t == tag)
    }

    /// Whether `key` or any of its current ancestors is blocked.
    pub fn in_blocked_subtree(&self, tree: &DocTree, key: NodeKey) -> bool {
        let mut current = Some(key);
        while let Some(node) = current {
            if self.is_blocked_element(tree, node) {
                return true;
            }
            current = tree.parent(node);
        }
        false
    }

    /// Boilerplate head elements excluded under the slim policy. Excluded
    /// nodes get the exclusion sentinel and never enter a mirror.
    pub fn is_slim_excluded(&self, tree: &DocTree, key: NodeKey) -> bool {
        if !self.slim_head {
            return false;
        }
        let Ok(NodeData::Element { tag, .. }) = tree.data(key) else {
            return false;
        };
        matches!(tag.as_str(), "meta" | "base")
    }

    /// Whitespace-only text nodes excluded under the collapse policy.
    pub fn is_collapsed_whitespace(&self, tree: &DocTree, key: NodeKey) -> bool {
        if !self.collapse_whitespace {
            return false;
        }
        let Some(content) = tree.text_content(key) else {
            return false;
        };
        if !matches!(tree.data(key), Ok(NodeData::Text { .. })) {
            return false;
        }
        if !content.chars().all(char::is_whitespace) || content.is_empty() {
            return false;
        }
        // Whitespace is significant inside pre-formatted containers.
        match tree.parent(key).and_then(|p| tree.tag(p)) {
            Some("pre") | Some("textarea") => false,
            _ => true,
        }
    }

    /// Nodes the serializer drops outright. They never acquire an id, so
    /// they cannot serve as a sibling anchor either.
    pub fn is_excluded(&self, tree: &DocTree, key: NodeKey) -> bool {
        self.is_slim_excluded(tree, key) || self.is_collapsed_whitespace(tree, key)
    }

    pub fn mask_value(&self, value: &str) -> String {
        "*".repeat(value.chars().count())
    }
}
