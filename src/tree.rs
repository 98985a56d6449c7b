//! Arena-backed document tree.
//!
//! The same structure serves as the live tree on the recording side and as
//! the real target tree on the replaying side. Nodes are addressed by
//! `NodeKey` (an arena index); structural operations validate their
//! arguments and return `TreeError` instead of corrupting state.
//!
//! Every structural and character-data mutation is appended to an internal
//! change buffer; `take_changes` drains the buffer as one batch. This stands
//! in for the host environment's batched change-notification facility: a
//! batch is delivered atomically, and the tree can be queried for *current*
//! structure at any point afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Arena index of a tree node. Valid only for the tree that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u32);

/// Path of host-element keys leading from the root tree to a nested
/// document. The empty path names the root tree itself.
pub type TreePath = Vec<NodeKey>;

#[derive(Debug)]
pub enum TreeError {
    InvalidKey(NodeKey),
    NotAContainer(NodeKey),
    NotAnElement(NodeKey),
    NotCharacterData(NodeKey),
    /// The stated child is not a child of the stated parent.
    NotAChild { parent: NodeKey, child: NodeKey },
    /// The reference node for an insert-before belongs to a different parent.
    ForeignReference { parent: NodeKey, reference: NodeKey },
    RootDetach(NodeKey),
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::InvalidKey(key) => write!(f, "invalid node key {key:?}"),
            TreeError::NotAContainer(key) => write!(f, "node {key:?} cannot have children"),
            TreeError::NotAnElement(key) => write!(f, "node {key:?} is not an element"),
            TreeError::NotCharacterData(key) => {
                write!(f, "node {key:?} does not carry character data")
            }
            TreeError::NotAChild { parent, child } => {
                write!(f, "node {child:?} is not a child of {parent:?}")
            }
            TreeError::ForeignReference { parent, reference } => {
                write!(f, "reference node {reference:?} is not a child of {parent:?}")
            }
            TreeError::RootDetach(key) => write!(f, "cannot detach the root document {key:?}"),
        }
    }
}

impl std::error::Error for TreeError {}

/// Captured playback state of a media element.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaState {
    pub paused: bool,
    pub current_time: f64,
    pub volume: f64,
    pub muted: bool,
    pub playback_rate: f64,
    pub looping: bool,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            paused: true,
            current_time: 0.0,
            volume: 1.0,
            muted: false,
            playback_rate: 1.0,
            looping: false,
        }
    }
}

/// One edit to an element-owned style sheet, applied in arrival order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SheetRuleEdit {
    Insert { index: usize, rule: String },
    Delete { index: usize },
}

/// Side state captured opportunistically for an element, next to its
/// attributes: scroll offsets, pending input value, media playback state,
/// style-sheet rule edits, and buffered drawing-surface operations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ElementState {
    pub scroll: Option<(i32, i32)>,
    pub value: Option<String>,
    pub checked: Option<bool>,
    pub media: Option<MediaState>,
    pub sheet_rules: Vec<SheetRuleEdit>,
    pub canvas_ops: Vec<String>,
    /// Last captured pixel snapshot of a canvas, as a data URL.
    pub canvas_snapshot: Option<String>,
    /// Resolved content of an external resource (e.g. a stylesheet link),
    /// supplied by the host when inlining is enabled.
    pub resolved_content: Option<String>,
}

#[derive(Debug)]
pub enum NodeData {
    Document {
        compat_mode: Option<String>,
    },
    Doctype {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        is_svg: bool,
        state: ElementState,
        /// Content document of a nested browsing context (iframe) or an
        /// attached shadow tree. Nested trees keep their own change buffer.
        content_doc: Option<Box<DocTree>>,
    },
    Text {
        content: String,
    },
    Cdata,
    Comment {
        content: String,
    },
}

impl NodeData {
    pub fn is_container(&self) -> bool {
        matches!(self, NodeData::Document { .. } | NodeData::Element { .. })
    }
}

/// Raw change notification, as delivered by the host observer.
#[derive(Clone, Debug)]
pub enum ChangeRecord {
    /// Character data of `node` changed.
    Text { node: NodeKey },
    /// The named attribute of `node` changed or was removed.
    Attribute { node: NodeKey, name: String },
    /// The child list of `parent` changed.
    ChildList {
        parent: NodeKey,
        added: Vec<NodeKey>,
        removed: Vec<NodeKey>,
    },
}

#[derive(Debug)]
struct TreeNode {
    data: NodeData,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
}

#[derive(Debug)]
pub struct DocTree {
    nodes: Vec<TreeNode>,
    root: NodeKey,
    changes: Vec<ChangeRecord>,
}

impl Default for DocTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DocTree {
    pub fn new() -> Self {
        let root_node = TreeNode {
            data: NodeData::Document { compat_mode: None },
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![root_node],
            root: NodeKey(0),
            changes: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    fn node(&self, key: NodeKey) -> Result<&TreeNode, TreeError> {
        self.nodes
            .get(key.0 as usize)
            .ok_or(TreeError::InvalidKey(key))
    }

    fn node_mut(&mut self, key: NodeKey) -> Result<&mut TreeNode, TreeError> {
        self.nodes
            .get_mut(key.0 as usize)
            .ok_or(TreeError::InvalidKey(key))
    }

    fn push(&mut self, data: NodeData) -> NodeKey {
        let key = NodeKey(self.nodes.len() as u32);
        self.nodes.push(TreeNode {
            data,
            parent: None,
            children: Vec::new(),
        });
        key
    }

    // -- node construction (detached until attached) --

    pub fn create_element(&mut self, tag: &str) -> NodeKey {
        self.push(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            is_svg: false,
            state: ElementState::default(),
            content_doc: None,
        })
    }

    pub fn create_svg_element(&mut self, tag: &str) -> NodeKey {
        let key = self.create_element(tag);
        if let NodeData::Element { is_svg, .. } = &mut self.nodes[key.0 as usize].data {
            *is_svg = true;
        }
        key
    }

    pub fn create_text(&mut self, content: &str) -> NodeKey {
        self.push(NodeData::Text {
            content: content.to_string(),
        })
    }

    pub fn create_comment(&mut self, content: &str) -> NodeKey {
        self.push(NodeData::Comment {
            content: content.to_string(),
        })
    }

    pub fn create_cdata(&mut self) -> NodeKey {
        self.push(NodeData::Cdata)
    }

    pub fn create_doctype(&mut self, name: &str, public_id: &str, system_id: &str) -> NodeKey {
        self.push(NodeData::Doctype {
            name: name.to_string(),
            public_id: public_id.to_string(),
            system_id: system_id.to_string(),
        })
    }

    // -- structural operations --

    pub fn append_child(&mut self, parent: NodeKey, child: NodeKey) -> Result<(), TreeError> {
        self.attach(parent, child, None)
    }

    pub fn insert_before(
        &mut self,
        parent: NodeKey,
        child: NodeKey,
        reference: NodeKey,
    ) -> Result<(), TreeError> {
        self.attach(parent, child, Some(reference))
    }

    fn attach(
        &mut self,
        parent: NodeKey,
        child: NodeKey,
        reference: Option<NodeKey>,
    ) -> Result<(), TreeError> {
        if !self.node(parent)?.data.is_container() {
            return Err(TreeError::NotAContainer(parent));
        }
        self.node(child)?;
        if let Some(reference) = reference {
            if self.node(reference)?.parent != Some(parent) {
                return Err(TreeError::ForeignReference { parent, reference });
            }
        }
        // A node already in the tree moves: detach first, as the host does.
        if self.node(child)?.parent.is_some() {
            self.remove(child)?;
        }
        let position = match reference {
            Some(reference) => {
                let siblings = &self.node(parent)?.children;
                siblings
                    .iter()
                    .position(|&k| k == reference)
                    .ok_or(TreeError::ForeignReference { parent, reference })?
            }
            None => self.node(parent)?.children.len(),
        };
        self.node_mut(parent)?.children.insert(position, child);
        self.node_mut(child)?.parent = Some(parent);
        self.changes.push(ChangeRecord::ChildList {
            parent,
            added: vec![child],
            removed: Vec::new(),
        });
        Ok(())
    }

    /// Detach `child` from its parent. The subtree stays queryable so that
    /// removal batches can still be classified after the fact.
    pub fn remove(&mut self, child: NodeKey) -> Result<(), TreeError> {
        let parent = self
            .node(child)?
            .parent
            .ok_or(TreeError::RootDetach(child))?;
        self.remove_child(parent, child)
    }

    pub fn remove_child(&mut self, parent: NodeKey, child: NodeKey) -> Result<(), TreeError> {
        if self.node(child)?.parent != Some(parent) {
            return Err(TreeError::NotAChild { parent, child });
        }
        self.node_mut(parent)?.children.retain(|&k| k != child);
        self.node_mut(child)?.parent = None;
        self.changes.push(ChangeRecord::ChildList {
            parent,
            added: Vec::new(),
            removed: vec![child],
        });
        Ok(())
    }

    pub fn clear_children(&mut self, parent: NodeKey) -> Result<(), TreeError> {
        let children = self.node(parent)?.children.clone();
        for child in children {
            self.remove_child(parent, child)?;
        }
        Ok(())
    }

    // -- content operations --

    pub fn set_text(&mut self, node: NodeKey, value: &str) -> Result<(), TreeError> {
        match &mut self.node_mut(node)?.data {
            NodeData::Text { content } | NodeData::Comment { content } => {
                *content = value.to_string();
            }
            _ => return Err(TreeError::NotCharacterData(node)),
        }
        self.changes.push(ChangeRecord::Text { node });
        Ok(())
    }

    pub fn set_attr(&mut self, node: NodeKey, name: &str, value: &str) -> Result<(), TreeError> {
        match &mut self.node_mut(node)?.data {
            NodeData::Element { attrs, .. } => {
                attrs.insert(name.to_string(), value.to_string());
            }
            _ => return Err(TreeError::NotAnElement(node)),
        }
        self.changes.push(ChangeRecord::Attribute {
            node,
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn remove_attr(&mut self, node: NodeKey, name: &str) -> Result<(), TreeError> {
        match &mut self.node_mut(node)?.data {
            NodeData::Element { attrs, .. } => {
                attrs.remove(name);
            }
            _ => return Err(TreeError::NotAnElement(node)),
        }
        self.changes.push(ChangeRecord::Attribute {
            node,
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn set_compat_mode(&mut self, mode: Option<&str>) {
        if let NodeData::Document { compat_mode } = &mut self.nodes[self.root.0 as usize].data {
            *compat_mode = mode.map(str::to_string);
        }
    }

    // -- element side state (captured out of band, not change-recorded) --

    pub fn element_state(&self, node: NodeKey) -> Result<&ElementState, TreeError> {
        match &self.node(node)?.data {
            NodeData::Element { state, .. } => Ok(state),
            _ => Err(TreeError::NotAnElement(node)),
        }
    }

    pub fn element_state_mut(&mut self, node: NodeKey) -> Result<&mut ElementState, TreeError> {
        match &mut self.node_mut(node)?.data {
            NodeData::Element { state, .. } => Ok(state),
            _ => Err(TreeError::NotAnElement(node)),
        }
    }

    // -- nested documents --

    /// Attach an empty content document to an element (iframe / shadow host).
    pub fn attach_document(&mut self, host: NodeKey) -> Result<(), TreeError> {
        match &mut self.node_mut(host)?.data {
            NodeData::Element { content_doc, .. } => {
                *content_doc = Some(Box::new(DocTree::new()));
                Ok(())
            }
            _ => Err(TreeError::NotAnElement(host)),
        }
    }

    pub fn nested_document(&self, host: NodeKey) -> Option<&DocTree> {
        match &self.node(host).ok()?.data {
            NodeData::Element { content_doc, .. } => content_doc.as_deref(),
            _ => None,
        }
    }

    pub fn nested_document_mut(&mut self, host: NodeKey) -> Option<&mut DocTree> {
        match &mut self.node_mut(host).ok()?.data {
            NodeData::Element { content_doc, .. } => content_doc.as_deref_mut(),
            _ => None,
        }
    }

    pub fn tree_at_path(&self, path: &[NodeKey]) -> Option<&DocTree> {
        let mut current = self;
        for &host in path {
            current = current.nested_document(host)?;
        }
        Some(current)
    }

    pub fn tree_at_path_mut(&mut self, path: &[NodeKey]) -> Option<&mut DocTree> {
        let mut current = self;
        for &host in path {
            current = current.nested_document_mut(host)?;
        }
        Some(current)
    }

    // -- queries --

    pub fn data(&self, key: NodeKey) -> Result<&NodeData, TreeError> {
        Ok(&self.node(key)?.data)
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.node(key).ok()?.parent
    }

    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.node(key).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn next_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        let parent = self.parent(key)?;
        let siblings = self.children(parent);
        let position = siblings.iter().position(|&k| k == key)?;
        siblings.get(position + 1).copied()
    }

    pub fn prev_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        let parent = self.parent(key)?;
        let siblings = self.children(parent);
        let position = siblings.iter().position(|&k| k == key)?;
        position.checked_sub(1).and_then(|p| siblings.get(p)).copied()
    }

    pub fn tag(&self, key: NodeKey) -> Option<&str> {
        match &self.node(key).ok()?.data {
            NodeData::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn attr(&self, key: NodeKey, name: &str) -> Option<&str> {
        match &self.node(key).ok()?.data {
            NodeData::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            _ => None,
        }
    }

    pub fn text_content(&self, key: NodeKey) -> Option<&str> {
        match &self.node(key).ok()?.data {
            NodeData::Text { content } | NodeData::Comment { content } => Some(content),
            _ => None,
        }
    }

    /// Pre-order traversal of `key` and everything below it, following the
    /// current child links (works for detached subtrees too).
    pub fn descendants(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            if self.node(current).is_err() {
                continue;
            }
            out.push(current);
            for &child in self.children(current).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    // -- change buffer --

    pub fn take_changes(&mut self) -> Vec<ChangeRecord> {
        std::mem::take(&mut self.changes)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_sibling_queries() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        let a = tree.create_text("a");
        let b = tree.create_text("b");
        tree.append_child(root, div).unwrap();
        tree.append_child(div, a).unwrap();
        tree.append_child(div, b).unwrap();

        assert_eq!(tree.children(div), &[a, b]);
        assert_eq!(tree.next_sibling(a), Some(b));
        assert_eq!(tree.prev_sibling(b), Some(a));
        assert_eq!(tree.parent(a), Some(div));
    }

    #[test]
    fn insert_before_foreign_reference_is_an_error() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        let other = tree.create_element("span");
        let child = tree.create_text("x");
        tree.append_child(root, div).unwrap();
        tree.append_child(root, other).unwrap();

        let err = tree.insert_before(div, child, other).unwrap_err();
        assert!(matches!(err, TreeError::ForeignReference { .. }));
        // The tree is untouched.
        assert!(tree.children(div).is_empty());
        assert_eq!(tree.parent(child), None);
    }

    #[test]
    fn reattaching_a_node_records_removal_then_addition() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        let a = tree.create_element("span");
        let b = tree.create_element("span");
        tree.append_child(root, div).unwrap();
        tree.append_child(div, a).unwrap();
        tree.append_child(div, b).unwrap();
        tree.take_changes();

        // Move b before a within the same parent.
        tree.insert_before(div, b, a).unwrap();
        assert_eq!(tree.children(div), &[b, a]);

        let changes = tree.take_changes();
        assert_eq!(changes.len(), 2);
        assert!(matches!(
            &changes[0],
            ChangeRecord::ChildList { removed, .. } if removed == &[b]
        ));
        assert!(matches!(
            &changes[1],
            ChangeRecord::ChildList { added, .. } if added == &[b]
        ));
    }

    #[test]
    fn removed_subtree_stays_queryable() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        let text = tree.create_text("x");
        tree.append_child(root, div).unwrap();
        tree.append_child(div, text).unwrap();

        tree.remove(div).unwrap();
        assert_eq!(tree.parent(div), None);
        assert_eq!(tree.children(div), &[text]);
        assert_eq!(tree.parent(text), Some(div));
        assert_eq!(tree.descendants(div), vec![div, text]);
    }

    #[test]
    fn nested_document_is_reachable_by_path() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let iframe = tree.create_element("iframe");
        tree.append_child(root, iframe).unwrap();
        tree.attach_document(iframe).unwrap();

        let inner = tree.nested_document_mut(iframe).unwrap();
        let inner_root = inner.root();
        let p = inner.create_element("p");
        inner.append_child(inner_root, p).unwrap();

        let found = tree.tree_at_path(&[iframe]).unwrap();
        assert_eq!(found.children(found.root()).len(), 1);
    }

    #[test]
    fn set_text_on_element_is_an_error() {
        let mut tree = DocTree::new();
        let div = tree.create_element("div");
        assert!(matches!(
            tree.set_text(div, "x").unwrap_err(),
            TreeError::NotCharacterData(_)
        ));
    }
}
