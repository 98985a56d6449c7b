//! Patches a real tree from one shadow state to the next.
//!
//! Invariants:
//! - Before a pass, the target tree structurally matches the old shadow and
//!   the mirror maps every shadow id to its target node. Both hold again for
//!   the new shadow when the pass returns.
//! - Matching is by id. A same-id, same-kind node is patched in place; a
//!   kind or tag change replaces the node wholesale (new subtree built,
//!   inserted before the old node, old node removed, id rebound).
//! - A compatibility-mode change resets the document: the old children are
//!   cleared and the new ones rebuilt, never patched across modes.
//! - Child lists are reconciled with head/head, tail/tail, head/tail and
//!   tail/head comparisons plus an id-indexed fallback, so a reversal of N
//!   siblings costs O(N) moves and zero rebuilds.
//! - Reserved `rr_*` attributes are routed into element side state, never
//!   set as literal attributes.
//! - Structural inconsistencies (unknown ids, vanished nodes) are logged
//!   and skipped; the rest of the pass still applies.
//! - Document nodes only ever root a tree. A document child of an element
//!   is reconciled recursively as that element's content document.

use crate::mirror::MirrorPool;
use crate::protocol::{reserved, AttrValue, SerializedId};
use crate::shadow::{ShadowKind, ShadowNode};
use crate::tree::{DocTree, NodeKey, TreeError, TreePath};
use std::collections::HashMap;

/// What one reconciliation pass did to the target tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub creates: usize,
    pub moves: usize,
    pub removes: usize,
    pub updates: usize,
}

/// Reconcile `target` from the `old` shadow state to the `new` one.
/// Nested content documents are reconciled after their host tree, each
/// against its own mirror in `pool`.
pub fn reconcile(
    target: &mut DocTree,
    pool: &mut MirrorPool,
    old: &ShadowNode,
    new: &ShadowNode,
) -> Result<DiffStats, TreeError> {
    let mut stats = DiffStats::default();
    let mut work: Vec<(TreePath, ShadowNode, ShadowNode)> =
        vec![(Vec::new(), old.clone(), new.clone())];
    while let Some((path, old, new)) = work.pop() {
        let Some(tree) = target.tree_at_path_mut(&path) else {
            log::warn!(target: "treecast.reconcile", "no tree at path {path:?}");
            continue;
        };
        let root = tree.root();
        let mut pass = Pass {
            tree,
            mirror: pool.mirror_mut(&path),
            stats: &mut stats,
            nested: Vec::new(),
        };
        pass.patch(&old, &new, root)?;
        for (host, nested_old, nested_new) in pass.nested {
            let mut nested_path = path.clone();
            nested_path.push(host);
            work.push((nested_path, nested_old, nested_new));
        }
    }
    Ok(stats)
}

struct Pass<'a> {
    tree: &'a mut DocTree,
    mirror: &'a mut crate::mirror::Mirror,
    stats: &'a mut DiffStats,
    /// Content documents discovered during this pass, reconciled afterwards.
    nested: Vec<(NodeKey, ShadowNode, ShadowNode)>,
}

fn empty_document(id: SerializedId) -> ShadowNode {
    ShadowNode {
        id,
        kind: ShadowKind::Document { compat_mode: None },
        children: Vec::new(),
    }
}

fn content_document(children: &[ShadowNode]) -> Option<&ShadowNode> {
    children
        .first()
        .filter(|c| matches!(c.kind, ShadowKind::Document { .. }))
}

fn stringify(value: &AttrValue) -> String {
    match value {
        AttrValue::Str(s) => s.clone(),
        AttrValue::Num(n) => n.to_string(),
        AttrValue::Bool(b) => b.to_string(),
        AttrValue::Null => String::new(),
    }
}

fn as_num(value: &AttrValue) -> Option<f64> {
    match value {
        AttrValue::Num(n) => Some(*n),
        _ => None,
    }
}

impl Pass<'_> {
    fn patch(&mut self, old: &ShadowNode, new: &ShadowNode, key: NodeKey) -> Result<(), TreeError> {
        if old.id != new.id && !matches!(new.kind, ShadowKind::Document { .. }) {
            return self.replace(new, key);
        }
        match (&old.kind, &new.kind) {
            (
                ShadowKind::Document {
                    compat_mode: old_mode,
                },
                ShadowKind::Document {
                    compat_mode: new_mode,
                },
            ) => {
                // Ids change across full snapshots; the root binding follows.
                self.mirror.add(key, new.id, None);
                if old_mode != new_mode {
                    // The compatibility mode is fixed when a document comes
                    // into being, so the document resets: the old children
                    // are cleared and the new ones built under the new mode.
                    let children = self.tree.children(key).to_vec();
                    for child in children {
                        self.mirror.remove_subtree(self.tree, child);
                        self.tree.remove_child(key, child)?;
                        self.stats.removes += 1;
                    }
                    self.tree.set_compat_mode(new_mode.as_deref());
                    self.stats.updates += 1;
                    return self.diff_children(&[], &new.children, key);
                }
                self.diff_children(&old.children, &new.children, key)
            }
            (
                ShadowKind::Element {
                    tag_name: old_tag,
                    attributes: old_attrs,
                    ..
                },
                ShadowKind::Element {
                    tag_name: new_tag,
                    attributes: new_attrs,
                    ..
                },
            ) => {
                if old_tag != new_tag {
                    return self.replace(new, key);
                }
                for (name, value) in new_attrs {
                    if old_attrs.get(name) != Some(value) {
                        self.apply_attribute(key, name, value)?;
                        self.stats.updates += 1;
                    }
                }
                for name in old_attrs.keys() {
                    if !new_attrs.contains_key(name) {
                        self.clear_attribute(key, name)?;
                        self.stats.updates += 1;
                    }
                }
                match (
                    content_document(&old.children),
                    content_document(&new.children),
                ) {
                    (Some(old_doc), Some(new_doc)) => {
                        self.nested.push((key, old_doc.clone(), new_doc.clone()));
                        Ok(())
                    }
                    (None, Some(new_doc)) => {
                        self.tree.attach_document(key)?;
                        self.nested
                            .push((key, empty_document(new_doc.id), new_doc.clone()));
                        Ok(())
                    }
                    (Some(_), None) => {
                        log::warn!(
                            target: "treecast.reconcile",
                            "content document disappeared from {:?}; leaving it in place",
                            new.id
                        );
                        Ok(())
                    }
                    (None, None) => self.diff_children(&old.children, &new.children, key),
                }
            }
            (ShadowKind::Text { content: old_c, .. }, ShadowKind::Text { content: new_c, .. })
            | (ShadowKind::Comment { content: old_c }, ShadowKind::Comment { content: new_c }) => {
                if old_c != new_c {
                    self.tree.set_text(key, new_c)?;
                    self.stats.updates += 1;
                }
                Ok(())
            }
            (ShadowKind::Doctype { .. }, ShadowKind::Doctype { .. })
            | (ShadowKind::Cdata, ShadowKind::Cdata) => {
                if old.kind != new.kind {
                    return self.replace(new, key);
                }
                Ok(())
            }
            _ => self.replace(new, key),
        }
    }

    /// Swap the node at `key` for a freshly built rendition of `new`.
    fn replace(&mut self, new: &ShadowNode, key: NodeKey) -> Result<(), TreeError> {
        let Some(parent) = self.tree.parent(key) else {
            log::warn!(
                target: "treecast.reconcile",
                "cannot replace the root with {:?}",
                new.id
            );
            return Ok(());
        };
        self.mirror.remove_subtree(self.tree, key);
        let fresh = self.build(new)?;
        self.tree.insert_before(parent, fresh, key)?;
        self.tree.remove_child(parent, key)?;
        self.stats.removes += 1;
        Ok(())
    }

    /// Build a detached real subtree for `shadow`, binding ids as it goes.
    fn build(&mut self, shadow: &ShadowNode) -> Result<NodeKey, TreeError> {
        let key = match &shadow.kind {
            ShadowKind::Document { .. } => {
                // Documents never appear here: element children carrying a
                // content document are intercepted below.
                log::warn!(
                    target: "treecast.reconcile",
                    "document {:?} in child position; substituting a comment",
                    shadow.id
                );
                self.tree.create_comment("")
            }
            ShadowKind::Doctype {
                name,
                public_id,
                system_id,
            } => self.tree.create_doctype(name, public_id, system_id),
            ShadowKind::Element {
                tag_name,
                attributes,
                is_svg,
                ..
            } => {
                let key = if *is_svg {
                    self.tree.create_svg_element(tag_name)
                } else {
                    self.tree.create_element(tag_name)
                };
                for (name, value) in attributes {
                    self.apply_attribute(key, name, value)?;
                }
                key
            }
            ShadowKind::Text { content, .. } => self.tree.create_text(content),
            ShadowKind::Cdata => self.tree.create_cdata(),
            ShadowKind::Comment { content } => self.tree.create_comment(content),
        };
        self.mirror.add(key, shadow.id, None);
        self.stats.creates += 1;
        for child in &shadow.children {
            if matches!(child.kind, ShadowKind::Document { .. }) {
                self.tree.attach_document(key)?;
                self.nested
                    .push((key, empty_document(child.id), child.clone()));
                continue;
            }
            let child_key = self.build(child)?;
            self.tree.append_child(key, child_key)?;
        }
        Ok(key)
    }

    /// Build `shadow` fresh, evicting any stale instance still bound to its
    /// id (a cross-tree or cross-parent reappearance).
    fn create_fresh(&mut self, shadow: &ShadowNode) -> Result<NodeKey, TreeError> {
        if let Some(existing) = self.mirror.get_node(shadow.id) {
            if let Some(parent) = self.tree.parent(existing) {
                self.tree.remove_child(parent, existing)?;
            }
            self.mirror.remove_subtree(self.tree, existing);
        }
        self.build(shadow)
    }

    fn place(
        &mut self,
        parent: NodeKey,
        key: NodeKey,
        before: Option<NodeKey>,
    ) -> Result<(), TreeError> {
        match before {
            Some(reference) => self.tree.insert_before(parent, key, reference),
            None => self.tree.append_child(parent, key),
        }
    }

    fn patch_known(&mut self, old: &ShadowNode, new: &ShadowNode) -> Result<(), TreeError> {
        match self.mirror.get_node(old.id) {
            Some(key) => self.patch(old, new, key),
            None => {
                log::warn!(
                    target: "treecast.reconcile",
                    "shadow node {:?} has no target counterpart",
                    old.id
                );
                Ok(())
            }
        }
    }

    fn diff_children(
        &mut self,
        old: &[ShadowNode],
        new: &[ShadowNode],
        parent: NodeKey,
    ) -> Result<(), TreeError> {
        let mut old_slots: Vec<Option<&ShadowNode>> = old.iter().map(Some).collect();
        let mut old_start = 0usize;
        let mut old_end = old_slots.len();
        let mut new_start = 0usize;
        let mut new_end = new.len();
        let mut index: Option<HashMap<SerializedId, usize>> = None;

        while old_start < old_end && new_start < new_end {
            let Some(old_s) = old_slots[old_start] else {
                old_start += 1;
                continue;
            };
            let Some(old_e) = old_slots[old_end - 1] else {
                old_end -= 1;
                continue;
            };
            let new_s = &new[new_start];
            let new_e = &new[new_end - 1];

            if old_s.id == new_s.id {
                self.patch_known(old_s, new_s)?;
                old_start += 1;
                new_start += 1;
            } else if old_e.id == new_e.id {
                self.patch_known(old_e, new_e)?;
                old_end -= 1;
                new_end -= 1;
            } else if old_s.id == new_e.id {
                // Head moved to the tail end of the window.
                self.patch_known(old_s, new_e)?;
                if let Some(key) = self.mirror.get_node(old_s.id) {
                    let anchor = self
                        .mirror
                        .get_node(old_e.id)
                        .and_then(|k| self.tree.next_sibling(k));
                    self.place(parent, key, anchor)?;
                    self.stats.moves += 1;
                }
                old_start += 1;
                new_end -= 1;
            } else if old_e.id == new_s.id {
                // Tail moved to the head end of the window.
                self.patch_known(old_e, new_s)?;
                if let Some(key) = self.mirror.get_node(old_e.id) {
                    let anchor = self.mirror.get_node(old_s.id);
                    self.place(parent, key, anchor)?;
                    self.stats.moves += 1;
                }
                old_end -= 1;
                new_start += 1;
            } else {
                let by_id = index
                    .get_or_insert_with(|| old.iter().enumerate().map(|(i, n)| (n.id, i)).collect());
                let found = by_id
                    .get(&new_s.id)
                    .copied()
                    .filter(|&i| i >= old_start && i < old_end)
                    .and_then(|i| old_slots[i].take());
                let anchor = self.mirror.get_node(old_s.id);
                match found {
                    Some(old_match) => {
                        self.patch_known(old_match, new_s)?;
                        if let Some(key) = self.mirror.get_node(old_match.id) {
                            self.place(parent, key, anchor)?;
                            self.stats.moves += 1;
                        }
                    }
                    None => {
                        let key = self.create_fresh(new_s)?;
                        self.place(parent, key, anchor)?;
                    }
                }
                new_start += 1;
            }
        }

        if new_start < new_end {
            // Everything left in the new window is inserted before the first
            // already-placed successor (or appended when there is none).
            let anchor = new
                .get(new_end)
                .and_then(|successor| self.mirror.get_node(successor.id));
            for shadow in &new[new_start..new_end] {
                let key = self.create_fresh(shadow)?;
                self.place(parent, key, anchor)?;
            }
        }
        while old_start < old_end {
            if let Some(gone) = old_slots[old_start] {
                if let Some(key) = self.mirror.get_node(gone.id) {
                    // A node that already moved elsewhere is not ours to
                    // remove.
                    if self.tree.parent(key) == Some(parent) {
                        self.mirror.remove_subtree(self.tree, key);
                        self.tree.remove_child(parent, key)?;
                        self.stats.removes += 1;
                    }
                }
            }
            old_start += 1;
        }
        Ok(())
    }

    fn apply_attribute(
        &mut self,
        key: NodeKey,
        name: &str,
        value: &AttrValue,
    ) -> Result<(), TreeError> {
        match name {
            reserved::SCROLL_LEFT => {
                if let Some(left) = as_num(value) {
                    let state = self.tree.element_state_mut(key)?;
                    let top = state.scroll.map(|(_, t)| t).unwrap_or(0);
                    state.scroll = Some((left as i32, top));
                }
            }
            reserved::SCROLL_TOP => {
                if let Some(top) = as_num(value) {
                    let state = self.tree.element_state_mut(key)?;
                    let left = state.scroll.map(|(l, _)| l).unwrap_or(0);
                    state.scroll = Some((left, top as i32));
                }
            }
            reserved::CANVAS_DATA => {
                self.tree.element_state_mut(key)?.canvas_snapshot =
                    value.as_str().map(str::to_string);
            }
            reserved::MEDIA_STATE => {
                let media = self.media_state(key)?;
                media.paused = value.as_str() == Some("paused");
            }
            reserved::MEDIA_CURRENT_TIME => {
                if let Some(time) = as_num(value) {
                    self.media_state(key)?.current_time = time;
                }
            }
            reserved::MEDIA_VOLUME => {
                if let Some(volume) = as_num(value) {
                    self.media_state(key)?.volume = volume;
                }
            }
            reserved::MEDIA_MUTED => {
                if let AttrValue::Bool(muted) = value {
                    self.media_state(key)?.muted = *muted;
                }
            }
            reserved::MEDIA_PLAYBACK_RATE => {
                if let Some(rate) = as_num(value) {
                    self.media_state(key)?.playback_rate = rate;
                }
            }
            reserved::MEDIA_LOOP => {
                if let AttrValue::Bool(looping) = value {
                    self.media_state(key)?.looping = *looping;
                }
            }
            reserved::SHEET_RULES => {
                if let Some(json) = value.as_str() {
                    match serde_json::from_str(json) {
                        Ok(edits) => self.tree.element_state_mut(key)?.sheet_rules = edits,
                        Err(err) => log::warn!(
                            target: "treecast.reconcile",
                            "unreadable sheet rule edits: {err}"
                        ),
                    }
                }
            }
            reserved::CANVAS_OPS => {
                if let Some(json) = value.as_str() {
                    match serde_json::from_str(json) {
                        Ok(ops) => self.tree.element_state_mut(key)?.canvas_ops = ops,
                        Err(err) => log::warn!(
                            target: "treecast.reconcile",
                            "unreadable drawing operations: {err}"
                        ),
                    }
                }
            }
            // Blocked placeholders keep only their box size.
            reserved::BLOCK_WIDTH => self.tree.set_attr(key, "width", &stringify(value))?,
            reserved::BLOCK_HEIGHT => self.tree.set_attr(key, "height", &stringify(value))?,
            "value" => {
                let text = stringify(value);
                self.tree.element_state_mut(key)?.value = Some(text.clone());
                self.tree.set_attr(key, "value", &text)?;
            }
            "checked" => {
                if let AttrValue::Bool(checked) = value {
                    self.tree.element_state_mut(key)?.checked = Some(*checked);
                }
            }
            _ if reserved::is_reserved(name) => {
                log::warn!(target: "treecast.reconcile", "unknown reserved attribute {name}");
            }
            _ => self.tree.set_attr(key, name, &stringify(value))?,
        }
        Ok(())
    }

    fn clear_attribute(&mut self, key: NodeKey, name: &str) -> Result<(), TreeError> {
        match name {
            reserved::SCROLL_LEFT | reserved::SCROLL_TOP => {
                self.tree.element_state_mut(key)?.scroll = None;
            }
            reserved::CANVAS_DATA => {
                self.tree.element_state_mut(key)?.canvas_snapshot = None;
            }
            reserved::MEDIA_STATE => {
                self.tree.element_state_mut(key)?.media = None;
            }
            reserved::SHEET_RULES => {
                self.tree.element_state_mut(key)?.sheet_rules.clear();
            }
            reserved::CANVAS_OPS => {
                self.tree.element_state_mut(key)?.canvas_ops.clear();
            }
            name if reserved::is_reserved(name) => {}
            "value" => {
                self.tree.element_state_mut(key)?.value = None;
                self.tree.remove_attr(key, "value")?;
            }
            "checked" => {
                self.tree.element_state_mut(key)?.checked = None;
            }
            _ => self.tree.remove_attr(key, name)?,
        }
        Ok(())
    }

    fn media_state(&mut self, key: NodeKey) -> Result<&mut crate::tree::MediaState, TreeError> {
        Ok(self
            .tree
            .element_state_mut(key)?
            .media
            .get_or_insert_with(Default::default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AttrMap;

    fn document(id: u32, children: Vec<ShadowNode>) -> ShadowNode {
        ShadowNode {
            id: SerializedId(id),
            kind: ShadowKind::Document { compat_mode: None },
            children,
        }
    }

    fn element(id: u32, tag: &str, children: Vec<ShadowNode>) -> ShadowNode {
        ShadowNode {
            id: SerializedId(id),
            kind: ShadowKind::Element {
                tag_name: tag.to_string(),
                attributes: AttrMap::new(),
                is_svg: false,
                need_block: false,
            },
            children,
        }
    }

    fn element_with_attrs(id: u32, tag: &str, attrs: AttrMap) -> ShadowNode {
        ShadowNode {
            id: SerializedId(id),
            kind: ShadowKind::Element {
                tag_name: tag.to_string(),
                attributes: attrs,
                is_svg: false,
                need_block: false,
            },
            children: Vec::new(),
        }
    }

    fn text(id: u32, content: &str) -> ShadowNode {
        ShadowNode {
            id: SerializedId(id),
            kind: ShadowKind::Text {
                content: content.to_string(),
                is_style_owner: false,
            },
            children: Vec::new(),
        }
    }

    /// Target tree plus pool, materialized to match `initial`.
    fn build_target(initial: &ShadowNode) -> (DocTree, MirrorPool) {
        let mut target = DocTree::new();
        let mut pool = MirrorPool::new();
        let empty = document(initial.id.0, Vec::new());
        reconcile(&mut target, &mut pool, &empty, initial).expect("materialize");
        (target, pool)
    }

    fn child_tags(tree: &DocTree, key: NodeKey) -> Vec<String> {
        tree.children(key)
            .iter()
            .filter_map(|&c| tree.tag(c).map(str::to_string))
            .collect()
    }

    #[test]
    fn materializing_from_empty_is_all_creates() {
        let snapshot = document(1, vec![element(2, "div", vec![text(3, "hi")])]);
        let (target, pool) = build_target(&snapshot);
        let root = target.root();
        assert_eq!(child_tags(&target, root), vec!["div"]);
        let div = target.children(root)[0];
        assert_eq!(target.text_content(target.children(div)[0]), Some("hi"));
        assert_eq!(pool.root().unwrap().get_id(div), Some(SerializedId(2)));
    }

    #[test]
    fn sibling_reversal_is_all_moves() {
        let children: Vec<ShadowNode> = (0..6)
            .map(|i| element(10 + i, &format!("t{i}"), Vec::new()))
            .collect();
        let old = document(1, vec![element(2, "div", children.clone())]);
        let mut reversed = children;
        reversed.reverse();
        let new = document(1, vec![element(2, "div", reversed)]);

        let (mut target, mut pool) = build_target(&old);
        let stats = reconcile(&mut target, &mut pool, &old, &new).expect("reconcile");
        assert_eq!(stats.creates, 0);
        assert_eq!(stats.removes, 0);
        assert!(stats.moves <= 6, "reversal stays linear: {}", stats.moves);

        let div = target.children(target.root())[0];
        assert_eq!(
            child_tags(&target, div),
            vec!["t5", "t4", "t3", "t2", "t1", "t0"]
        );
    }

    #[test]
    fn text_and_attributes_patch_in_place() {
        let old = document(
            1,
            vec![
                element_with_attrs(
                    2,
                    "div",
                    AttrMap::from([("class".to_string(), AttrValue::from("a"))]),
                ),
                text(3, "hello"),
            ],
        );
        let new = document(
            1,
            vec![
                element_with_attrs(
                    2,
                    "div",
                    AttrMap::from([("id".to_string(), AttrValue::from("x"))]),
                ),
                text(3, "goodbye"),
            ],
        );
        let (mut target, mut pool) = build_target(&old);
        let stats = reconcile(&mut target, &mut pool, &old, &new).expect("reconcile");
        assert_eq!(stats.creates, 0);
        assert_eq!(stats.removes, 0);

        let root = target.root();
        let div = target.children(root)[0];
        assert_eq!(target.attr(div, "id"), Some("x"));
        assert_eq!(target.attr(div, "class"), None);
        assert_eq!(target.text_content(target.children(root)[1]), Some("goodbye"));
    }

    #[test]
    fn kind_change_replaces_the_node() {
        let old = document(1, vec![element(2, "div", vec![element(3, "span", vec![])])]);
        let new = document(1, vec![element(2, "div", vec![text(4, "now text")])]);
        let (mut target, mut pool) = build_target(&old);
        let stats = reconcile(&mut target, &mut pool, &old, &new).expect("reconcile");
        assert_eq!(stats.creates, 1);
        assert_eq!(stats.removes, 1);

        let div = target.children(target.root())[0];
        let child = target.children(div)[0];
        assert_eq!(target.text_content(child), Some("now text"));
        let mirror = pool.root().unwrap();
        assert!(!mirror.has(SerializedId(3)));
        assert_eq!(mirror.get_node(SerializedId(4)), Some(child));
    }

    #[test]
    fn compat_mode_change_resets_the_document() {
        let old = document(1, vec![element(2, "div", vec![text(3, "x")])]);
        let new = ShadowNode {
            id: SerializedId(1),
            kind: ShadowKind::Document {
                compat_mode: Some("BackCompat".to_string()),
            },
            children: vec![element(4, "div", vec![text(5, "x")])],
        };
        let (mut target, mut pool) = build_target(&old);
        let stats = reconcile(&mut target, &mut pool, &old, &new).expect("reconcile");
        assert!(stats.removes >= 1, "old children are cleared");
        assert_eq!(stats.creates, 2, "children are rebuilt, not patched");

        let root = target.root();
        let Ok(crate::tree::NodeData::Document { compat_mode }) = target.data(root) else {
            panic!("expected document root");
        };
        assert_eq!(compat_mode.as_deref(), Some("BackCompat"));
        let mirror = pool.root().unwrap();
        assert!(!mirror.has(SerializedId(2)));
        assert!(mirror.has(SerializedId(4)));
    }

    #[test]
    fn dropped_children_leave_tree_and_mirror() {
        let old = document(
            1,
            vec![element(2, "div", vec![element(3, "a", vec![text(4, "x")])])],
        );
        let new = document(1, vec![element(2, "div", vec![])]);
        let (mut target, mut pool) = build_target(&old);
        let stats = reconcile(&mut target, &mut pool, &old, &new).expect("reconcile");
        assert_eq!(stats.removes, 1);

        let div = target.children(target.root())[0];
        assert!(target.children(div).is_empty());
        let mirror = pool.root().unwrap();
        assert!(!mirror.has(SerializedId(3)));
        assert!(!mirror.has(SerializedId(4)), "subtree entries go too");
    }

    #[test]
    fn reserved_attributes_route_to_element_state() {
        let attrs = AttrMap::from([
            (reserved::SCROLL_LEFT.to_string(), AttrValue::Num(10.0)),
            (reserved::SCROLL_TOP.to_string(), AttrValue::Num(300.0)),
        ]);
        let snapshot = document(1, vec![element_with_attrs(2, "div", attrs)]);
        let (target, _pool) = build_target(&snapshot);

        let div = target.children(target.root())[0];
        assert_eq!(target.element_state(div).unwrap().scroll, Some((10, 300)));
        assert_eq!(target.attr(div, reserved::SCROLL_LEFT), None);
    }

    #[test]
    fn nested_content_document_is_reconciled() {
        let old = document(1, vec![element(2, "iframe", vec![])]);
        let new = document(
            1,
            vec![element(
                2,
                "iframe",
                vec![document(5, vec![element(6, "p", vec![text(7, "inner")])])],
            )],
        );
        let (mut target, mut pool) = build_target(&old);
        reconcile(&mut target, &mut pool, &old, &new).expect("reconcile");

        let iframe = target.children(target.root())[0];
        let inner = target.nested_document(iframe).expect("content document");
        let p = inner.children(inner.root())[0];
        assert_eq!(inner.tag(p), Some("p"));
        let nested_mirror = pool.mirror(&[iframe]).expect("nested mirror");
        assert_eq!(nested_mirror.get_node(SerializedId(6)), Some(p));
    }
}
