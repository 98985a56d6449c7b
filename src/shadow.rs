//! Replay-side virtual tree.
//!
//! A `ShadowTree` is the structural state a replayer believes the recorded
//! document is in: a direct, owned rendition of the described node tree,
//! addressed by serialized id. Diff payloads are applied here first; the
//! reconciler then diffs two shadow states against each other to patch a
//! real tree.
//!
//! Application order within one payload is fixed: removals, additions,
//! text updates, attribute updates. Additions whose anchors are not yet
//! present are retried after the rest of the payload's additions have been
//! applied; an addition whose anchor never materializes is appended at the
//! end of its parent rather than dropped.

use crate::protocol::{Addition, AttrMap, DescribedNode, DiffPayload, SerializedId};

#[derive(Clone, Debug, PartialEq)]
pub enum ShadowKind {
    Document {
        compat_mode: Option<String>,
    },
    Doctype {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element {
        tag_name: String,
        attributes: AttrMap,
        is_svg: bool,
        need_block: bool,
    },
    Text {
        content: String,
        is_style_owner: bool,
    },
    Cdata,
    Comment {
        content: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShadowNode {
    pub id: SerializedId,
    pub kind: ShadowKind,
    pub children: Vec<ShadowNode>,
}

impl ShadowNode {
    pub fn from_described(node: &DescribedNode) -> Self {
        let children = node.children().iter().map(Self::from_described).collect();
        let kind = match node {
            DescribedNode::Document { compat_mode, .. } => ShadowKind::Document {
                compat_mode: compat_mode.clone(),
            },
            DescribedNode::DocumentType {
                name,
                public_id,
                system_id,
                ..
            } => ShadowKind::Doctype {
                name: name.clone(),
                public_id: public_id.clone(),
                system_id: system_id.clone(),
            },
            DescribedNode::Element {
                tag_name,
                attributes,
                is_svg,
                need_block,
                ..
            } => ShadowKind::Element {
                tag_name: tag_name.clone(),
                attributes: attributes.clone(),
                is_svg: *is_svg,
                need_block: *need_block,
            },
            DescribedNode::Text {
                content,
                is_style_owner,
                ..
            } => ShadowKind::Text {
                content: content.clone(),
                is_style_owner: *is_style_owner,
            },
            DescribedNode::Cdata { .. } => ShadowKind::Cdata,
            DescribedNode::Comment { content, .. } => ShadowKind::Comment {
                content: content.clone(),
            },
        };
        Self {
            id: node.id(),
            kind,
            children,
        }
    }

    fn find(&self, id: SerializedId) -> Option<&ShadowNode> {
        if self.id == id {
            return Some(self);
        }
        for child in &self.children {
            if let Some(found) = child.find(id) {
                return Some(found);
            }
        }
        None
    }

    fn find_mut(&mut self, id: SerializedId) -> Option<&mut ShadowNode> {
        if self.id == id {
            return Some(self);
        }
        for child in &mut self.children {
            if let Some(found) = child.find_mut(id) {
                return Some(found);
            }
        }
        None
    }

    fn detach(&mut self, id: SerializedId) -> Option<ShadowNode> {
        if let Some(position) = self.children.iter().position(|c| c.id == id) {
            return Some(self.children.remove(position));
        }
        for child in &mut self.children {
            if let Some(found) = child.detach(id) {
                return Some(found);
            }
        }
        None
    }

    fn contains(&self, id: SerializedId) -> bool {
        self.find(id).is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShadowTree {
    root: ShadowNode,
}

impl ShadowTree {
    pub fn from_snapshot(node: &DescribedNode) -> Self {
        Self {
            root: ShadowNode::from_described(node),
        }
    }

    pub fn root(&self) -> &ShadowNode {
        &self.root
    }

    pub fn find(&self, id: SerializedId) -> Option<&ShadowNode> {
        self.root.find(id)
    }

    /// Apply one diff payload in the fixed order: removes, adds, texts,
    /// attributes. Inconsistencies are logged and skipped; the rest of the
    /// payload still applies.
    pub fn apply(&mut self, diff: &DiffPayload) {
        for removal in &diff.removes {
            if removal.id == self.root.id {
                log::warn!(target: "treecast.shadow", "ignoring removal of the root document");
                continue;
            }
            if self.root.detach(removal.id).is_none() {
                log::warn!(
                    target: "treecast.shadow",
                    "removal targets unknown id {:?}",
                    removal.id
                );
            }
        }

        // Additions may arrive before their anchors within one payload;
        // retry until a full pass makes no progress.
        let mut pending: Vec<&Addition> = diff.adds.iter().collect();
        loop {
            let before = pending.len();
            let mut still_pending = Vec::new();
            for add in pending {
                if !self.try_insert(add) {
                    still_pending.push(add);
                }
            }
            pending = still_pending;
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }
        for add in pending {
            // Anchor never materialized: keep the node, lose the position.
            log::warn!(
                target: "treecast.shadow",
                "unresolved anchor for added node {:?}; appending at end of parent",
                add.node.id()
            );
            let node = self
                .root
                .detach(add.node.id())
                .unwrap_or_else(|| ShadowNode::from_described(&add.node));
            match self.root.find_mut(add.parent_id) {
                Some(parent) => parent.children.push(node),
                None => log::warn!(
                    target: "treecast.shadow",
                    "dropping added node {:?}: parent {:?} unknown",
                    add.node.id(),
                    add.parent_id
                ),
            }
        }

        for text in &diff.texts {
            match self.root.find_mut(text.id) {
                Some(node) => match &mut node.kind {
                    ShadowKind::Text { content, .. } | ShadowKind::Comment { content } => {
                        *content = text.value.clone();
                    }
                    _ => log::warn!(
                        target: "treecast.shadow",
                        "text update targets non-character node {:?}",
                        text.id
                    ),
                },
                None => log::warn!(
                    target: "treecast.shadow",
                    "text update targets unknown id {:?}",
                    text.id
                ),
            }
        }

        for update in &diff.attributes {
            match self.root.find_mut(update.id) {
                Some(node) => match &mut node.kind {
                    ShadowKind::Element { attributes, .. } => {
                        for (name, value) in &update.attributes {
                            if value.is_null() {
                                attributes.remove(name);
                            } else {
                                attributes.insert(name.clone(), value.clone());
                            }
                        }
                    }
                    _ => log::warn!(
                        target: "treecast.shadow",
                        "attribute update targets non-element {:?}",
                        update.id
                    ),
                },
                None => log::warn!(
                    target: "treecast.shadow",
                    "attribute update targets unknown id {:?}",
                    update.id
                ),
            }
        }
    }

    fn try_insert(&mut self, add: &Addition) -> bool {
        let id = add.node.id();
        // Feasibility first: the node is only detached once the insertion
        // is known to succeed.
        let Some(parent) = self.root.find(add.parent_id) else {
            return false;
        };
        if let Some(next) = add.next_id {
            if !parent.children.iter().any(|c| c.id == next) {
                return false;
            }
        }
        if self
            .root
            .find(id)
            .is_some_and(|existing| existing.contains(add.parent_id))
        {
            // A node cannot adopt its own ancestor.
            log::warn!(
                target: "treecast.shadow",
                "addition of {id:?} would create a cycle; skipped"
            );
            return true;
        }

        // A known id reappearing is a move: take the existing instance,
        // subtree and all, instead of rebuilding it from the description.
        let node = match self.root.detach(id) {
            Some(existing) => existing,
            None => ShadowNode::from_described(&add.node),
        };
        let Some(parent) = self.root.find_mut(add.parent_id) else {
            // The detach cannot remove the parent unless the payload was
            // cyclic, which the check above rejects.
            log::warn!(
                target: "treecast.shadow",
                "parent {:?} vanished while inserting {id:?}",
                add.parent_id
            );
            return true;
        };
        // The anchor index is looked up after the detach: moving a node
        // within its own parent shifts the sibling positions.
        let position = match add.next_id {
            None => parent.children.len(),
            Some(next) => parent
                .children
                .iter()
                .position(|c| c.id == next)
                .unwrap_or(parent.children.len()),
        };
        parent.children.insert(position, node);
        true
    }
}
