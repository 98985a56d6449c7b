//! Mutation coalescing: raw change notifications in, one consistent diff out.
//!
//! Contract:
//! - A batch of `ChangeRecord`s is processed to completion in one call;
//!   anchors (parent, next sibling) are resolved against the live tree at
//!   emission time, not at notification time.
//! - Additions are classified first, then removals, so that a node removed
//!   and re-added within one batch is recognized as a move (same id, no
//!   removal for a pure reorder).
//! - A node added and removed within the same batch never appears in the
//!   payload and never leaks a mirror entry.
//! - A node added, removed, and re-added in one batch is judged by its
//!   final attachment: still connected means the addition stands.
//! - Next-sibling anchors skip policy-excluded siblings, which never carry
//!   an id. Nodes whose anchors cannot be resolved are deferred into the
//!   pending list and retried in bounded back-to-front passes; whatever
//!   still lacks a next-sibling anchor at the end is emitted with a
//!   parent-only anchor rather than dropped.
//! - A moved node the consumer still holds is described shallow; its
//!   subtree travels intact on the consumer side.
//! - Every collection is filtered against current mirror membership before
//!   emission; an empty payload emits nothing.
//! - `freeze` suspends emission but not buffering; `unfreeze` emits the
//!   buffered batch immediately.

use crate::mirror::{IdAllocator, MirrorPool};
use crate::pending::PendingList;
use crate::policy::RecordPolicy;
use crate::protocol::{
    Addition, AttrMap, AttrValue, AttributeUpdate, DescribedNode, DiffPayload, Removal,
    SerializedId, TextUpdate,
};
use crate::snapshot::{serialize_node, SerializeCtx};
use crate::tree::{ChangeRecord, DocTree, NodeKey, TreePath};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Default)]
pub struct Coalescer {
    frozen: bool,
    buffered: Vec<ChangeRecord>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Suspend emission while a full re-snapshot is in progress. Incoming
    /// batches keep buffering.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Resume emission; any buffered batch is emitted immediately.
    pub fn unfreeze(
        &mut self,
        tree: &DocTree,
        pool: &mut MirrorPool,
        ids: &mut IdAllocator,
        policy: &RecordPolicy,
    ) -> Option<DiffPayload> {
        self.frozen = false;
        if self.buffered.is_empty() {
            return None;
        }
        let buffered = std::mem::take(&mut self.buffered);
        self.process_batch(buffered, tree, pool, ids, policy)
    }

    /// Coalesce one delivered batch into a diff payload. Returns `None`
    /// when the batch nets out to nothing (or while frozen).
    pub fn process_batch(
        &mut self,
        records: Vec<ChangeRecord>,
        tree: &DocTree,
        pool: &mut MirrorPool,
        ids: &mut IdAllocator,
        policy: &RecordPolicy,
    ) -> Option<DiffPayload> {
        if self.frozen {
            self.buffered.extend(records);
            return None;
        }
        let records = if self.buffered.is_empty() {
            records
        } else {
            let mut all = std::mem::take(&mut self.buffered);
            all.extend(records);
            all
        };
        let mut batch = Batch {
            tree,
            policy,
            ids,
            pool,
            path: Vec::new(),
            texts: Vec::new(),
            texts_seen: HashSet::new(),
            attr_order: Vec::new(),
            attr_names: HashMap::new(),
            removes: Vec::new(),
            removed_keys: HashSet::new(),
            purge: Vec::new(),
            added: Vec::new(),
            added_set: HashSet::new(),
            moved: Vec::new(),
            moved_set: HashSet::new(),
            moved_map: HashSet::new(),
            dropped: HashSet::new(),
        };
        batch.run(&records)
    }
}

struct Batch<'a> {
    tree: &'a DocTree,
    policy: &'a RecordPolicy,
    ids: &'a mut IdAllocator,
    pool: &'a mut MirrorPool,
    path: TreePath,

    texts: Vec<NodeKey>,
    texts_seen: HashSet<NodeKey>,
    attr_order: Vec<NodeKey>,
    attr_names: HashMap<NodeKey, BTreeSet<String>>,
    removes: Vec<Removal>,
    removed_keys: HashSet<NodeKey>,
    purge: Vec<NodeKey>,
    added: Vec<NodeKey>,
    added_set: HashSet<NodeKey>,
    moved: Vec<NodeKey>,
    moved_set: HashSet<NodeKey>,
    /// (node id, id of its current parent) for nodes that reappeared: a
    /// removal from that exact location is a reorder, not a removal.
    moved_map: HashSet<(SerializedId, SerializedId)>,
    dropped: HashSet<NodeKey>,
}

impl<'a> Batch<'a> {
    fn run(&mut self, records: &[ChangeRecord]) -> Option<DiffPayload> {
        // Additions first: moves must be known before removals are judged.
        for record in records {
            if let ChangeRecord::ChildList { added, .. } = record {
                for &node in added {
                    self.classify_addition(node);
                }
            }
        }
        for record in records {
            match record {
                ChangeRecord::Text { node } => self.classify_text(*node),
                ChangeRecord::Attribute { node, name } => self.classify_attribute(*node, name),
                ChangeRecord::ChildList {
                    parent, removed, ..
                } => {
                    for &node in removed {
                        self.classify_removal(*parent, node);
                    }
                }
            }
        }
        self.emit()
    }

    fn mirror_id(&mut self, key: NodeKey) -> Option<SerializedId> {
        self.pool.mirror_mut(&self.path).get_id(key)
    }

    // -- classification --

    fn classify_addition(&mut self, node: NodeKey) {
        let known = self.pool.mirror_mut(&self.path).has_key(node);
        if known {
            // Previously described node reappearing: a move, id reused.
            if self.moved_set.insert(node) {
                self.moved.push(node);
            }
            let id = self.mirror_id(node);
            let parent_id = self.tree.parent(node).and_then(|p| self.mirror_id(p));
            if let (Some(id), Some(parent_id)) = (id, parent_id) {
                self.moved_map.insert((id, parent_id));
            }
        } else {
            if self.added_set.insert(node) {
                self.added.push(node);
            }
            self.dropped.remove(&node);
        }
        // An added subtree can itself contain moved nodes.
        if !self.policy.is_blocked_element(self.tree, node) {
            for &child in self.tree.children(node) {
                if known && self.pool.mirror_mut(&self.path).has_key(child) {
                    // Both ends already described: the child sits where the
                    // consumer left it, and a relocation carries its own
                    // child-list record.
                    continue;
                }
                self.classify_addition(child);
            }
        }
    }

    fn classify_text(&mut self, node: NodeKey) {
        if self.policy.in_blocked_subtree(self.tree, node) {
            return;
        }
        if self.texts_seen.insert(node) {
            self.texts.push(node);
        }
    }

    fn classify_attribute(&mut self, node: NodeKey, name: &str) {
        if self.policy.in_blocked_subtree(self.tree, node) {
            return;
        }
        let names = self.attr_names.entry(node).or_default();
        if names.is_empty() {
            self.attr_order.push(node);
        }
        names.insert(name.to_string());
    }

    fn classify_removal(&mut self, parent: NodeKey, node: NodeKey) {
        if self.added_set.contains(&node) {
            if self.is_attached(node) {
                // Removed and re-added within the batch; the staged
                // addition already covers the final state.
                return;
            }
            // Added and removed within this batch: it never happened.
            self.added_set.remove(&node);
            self.added.retain(|&k| k != node);
            self.dropped.insert(node);
            return;
        }
        let Some(id) = self.mirror_id(node) else {
            // Never described; nothing to retract.
            self.dropped.insert(node);
            return;
        };
        if self.chain_contains_removed(Some(parent)) {
            // The ancestor removal subsumes this one; only the mirror entry
            // needs cleaning, since the node is already detached from the
            // ancestor's subtree.
            self.purge.push(node);
            return;
        }
        let Some(parent_id) = self.mirror_id(parent) else {
            log::warn!(target: "treecast.coalesce", "removal under undescribed parent {parent:?}");
            self.purge.push(node);
            return;
        };
        if self.moved_set.contains(&node) && self.moved_map.contains(&(id, parent_id)) {
            // Reorder within the same parent: the node reappears, skip the
            // removal entirely.
            return;
        }
        self.removes.push(Removal { parent_id, id });
        if !self.moved_set.contains(&node) {
            // A moved node is still alive elsewhere; only genuinely gone
            // nodes subsume descendant removals and leave the mirror.
            self.removed_keys.insert(node);
            self.purge.push(node);
        }
    }

    /// Whether `node` is connected to the document root in the batch's
    /// final state.
    fn is_attached(&self, node: NodeKey) -> bool {
        let mut current = node;
        while let Some(parent) = self.tree.parent(current) {
            current = parent;
        }
        current == self.tree.root()
    }

    fn chain_contains_removed(&self, start: Option<NodeKey>) -> bool {
        let mut current = start;
        while let Some(node) = current {
            if self.removed_keys.contains(&node) {
                return true;
            }
            current = self.tree.parent(node);
        }
        false
    }

    fn ancestor_in(&self, set: &HashSet<NodeKey>, node: NodeKey) -> bool {
        let mut current = self.tree.parent(node);
        while let Some(ancestor) = current {
            if set.contains(&ancestor) {
                return true;
            }
            current = self.tree.parent(ancestor);
        }
        false
    }

    // -- emission --

    fn emit(&mut self) -> Option<DiffPayload> {
        // Retract staged removals from the mirror first; moved nodes are no
        // longer linked below the removed roots, so they survive.
        let purge = std::mem::take(&mut self.purge);
        for node in purge {
            self.pool
                .mirror_mut(&self.path)
                .remove_subtree(self.tree, node);
        }

        let mut adds = Vec::new();
        let mut pending = PendingList::new();
        let mut emitted: HashSet<NodeKey> = HashSet::new();
        let removed_ids: HashSet<SerializedId> = self.removes.iter().map(|r| r.id).collect();

        let moved = self.moved.clone();
        for node in moved {
            if self.chain_contains_removed(self.tree.parent(node))
                && !self
                    .tree
                    .parent(node)
                    .is_some_and(|p| self.moved_set.contains(&p))
            {
                // Moved into a subtree that is itself gone this batch.
                continue;
            }
            self.push_add(node, &removed_ids, &mut adds, &mut pending, &mut emitted);
        }
        let added = self.added.clone();
        for node in added {
            let under_dropped = self.ancestor_in(&self.dropped, node) || self.dropped.contains(&node);
            let parent_removed = self.chain_contains_removed(self.tree.parent(node));
            if !under_dropped && !parent_removed {
                self.push_add(node, &removed_ids, &mut adds, &mut pending, &mut emitted);
            } else if self.ancestor_in(&self.moved_set, node) {
                // Reachable through a moved ancestor: still live.
                self.push_add(node, &removed_ids, &mut adds, &mut pending, &mut emitted);
            } else {
                self.dropped.insert(node);
            }
        }

        // Fixed-point retry over the deferred nodes, newest first. Every
        // round either resolves one node (shrinking the list) or stops.
        loop {
            if pending.is_empty() {
                break;
            }
            let mut resolved_any = false;
            let mut index = pending.len();
            while index > 0 {
                index -= 1;
                let Some(node) = pending.get(index) else {
                    break;
                };
                if emitted.contains(&node) {
                    // Covered by an ancestor's serialized subtree.
                    pending.remove(node);
                    resolved_any = true;
                    break;
                }
                if self.anchors_resolved(node) {
                    pending.remove(node);
                    self.push_add(node, &removed_ids, &mut adds, &mut pending, &mut emitted);
                    resolved_any = true;
                    break;
                }
            }
            if !resolved_any {
                break;
            }
        }

        // Whatever never resolved is emitted with the best anchor we have,
        // to preserve data over strict ordering.
        for node in pending.drain() {
            if emitted.contains(&node) {
                continue;
            }
            let Some(parent_id) = self.tree.parent(node).and_then(|p| self.mirror_id(p)) else {
                log::warn!(
                    target: "treecast.coalesce",
                    "dropping addition with no identifiable anchor: {node:?}"
                );
                continue;
            };
            log::warn!(
                target: "treecast.coalesce",
                "anchor never resolved for {node:?}; emitting at end of parent"
            );
            if let Some(described) = self.describe_for_add(node, &removed_ids, &mut emitted) {
                adds.push(Addition {
                    parent_id,
                    next_id: None,
                    node: described,
                });
            }
        }

        let texts = self.resolve_texts();
        let attributes = self.resolve_attributes();

        let payload = DiffPayload {
            texts,
            attributes,
            removes: std::mem::take(&mut self.removes),
            adds,
        };
        if payload.is_empty() {
            None
        } else {
            Some(payload)
        }
    }

    fn anchors_resolved(&mut self, node: NodeKey) -> bool {
        let parent_ok = self
            .tree
            .parent(node)
            .is_some_and(|p| self.pool.mirror_mut(&self.path).has_key(p));
        if !parent_ok {
            return false;
        }
        match self.anchor_sibling(node) {
            None => true,
            Some(sibling) => self.pool.mirror_mut(&self.path).has_key(sibling),
        }
    }

    /// First following sibling that can carry an id. Policy-excluded
    /// siblings (collapsed whitespace, slim-head boilerplate) never enter
    /// a mirror, so they are skipped; only a describable sibling that is
    /// merely not yet described defers a node.
    fn anchor_sibling(&self, node: NodeKey) -> Option<NodeKey> {
        let mut current = self.tree.next_sibling(node);
        while let Some(sibling) = current {
            if !self.policy.is_excluded(self.tree, sibling) {
                return Some(sibling);
            }
            current = self.tree.next_sibling(sibling);
        }
        None
    }

    fn push_add(
        &mut self,
        node: NodeKey,
        removed_ids: &HashSet<SerializedId>,
        adds: &mut Vec<Addition>,
        pending: &mut PendingList,
        emitted: &mut HashSet<NodeKey>,
    ) {
        if emitted.contains(&node) {
            return;
        }
        let parent_id = self.tree.parent(node).and_then(|p| self.mirror_id(p));
        let next_sibling = self.anchor_sibling(node);
        let next_id = match next_sibling {
            None => None,
            Some(sibling) => match self.mirror_id(sibling) {
                Some(id) => Some(id),
                None => {
                    // Sibling not yet describable: defer until it is.
                    pending.add_node(node, self.tree.prev_sibling(node), next_sibling);
                    return;
                }
            },
        };
        let Some(parent_id) = parent_id else {
            pending.add_node(node, self.tree.prev_sibling(node), next_sibling);
            return;
        };
        if let Some(described) = self.describe_for_add(node, removed_ids, emitted) {
            adds.push(Addition {
                parent_id,
                next_id,
                node: described,
            });
        }
    }

    /// Description riding an addition. A node the consumer still holds (a
    /// reorder of a known node, no removal in this batch) keeps its subtree
    /// on the consumer side, so only the shallow node is described. A node
    /// removed in the same batch is re-described in full, same ids.
    fn describe_for_add(
        &mut self,
        node: NodeKey,
        removed_ids: &HashSet<SerializedId>,
        emitted: &mut HashSet<NodeKey>,
    ) -> Option<DescribedNode> {
        let held = self
            .mirror_id(node)
            .is_some_and(|id| !removed_ids.contains(&id));
        if !held {
            return self.describe_subtree(node, emitted);
        }
        let mut ctx = SerializeCtx {
            policy: self.policy,
            ids: &mut *self.ids,
            pool: &mut *self.pool,
            path: self.path.clone(),
        };
        let described = serialize_node(self.tree, node, true, &mut ctx);
        if described.is_some() {
            emitted.insert(node);
        }
        described
    }

    /// Serialize the subtree rooted at `node`, registering every described
    /// descendant as emitted so later passes skip them.
    fn describe_subtree(
        &mut self,
        node: NodeKey,
        emitted: &mut HashSet<NodeKey>,
    ) -> Option<DescribedNode> {
        let mut ctx = SerializeCtx {
            policy: self.policy,
            ids: &mut *self.ids,
            pool: &mut *self.pool,
            path: self.path.clone(),
        };
        let described = serialize_node(self.tree, node, false, &mut ctx);
        if described.is_none() {
            log::trace!(target: "treecast.coalesce", "addition excluded by policy: {node:?}");
            return None;
        }
        for descendant in self.tree.descendants(node) {
            if self.pool.mirror_mut(&self.path).has_key(descendant) {
                emitted.insert(descendant);
            }
        }
        described
    }

    fn resolve_texts(&mut self) -> Vec<TextUpdate> {
        let mut out = Vec::new();
        let texts = std::mem::take(&mut self.texts);
        for node in texts {
            let Some(id) = self.mirror_id(node) else {
                // Raced to removal before the batch closed.
                continue;
            };
            let previous = self
                .pool
                .mirror_mut(&self.path)
                .meta(node)
                .and_then(|meta| match meta {
                    DescribedNode::Text { content, .. }
                    | DescribedNode::Comment { content, .. } => Some(content.clone()),
                    _ => None,
                });
            // Re-describe to refresh the mirror metadata for later batches.
            let mut ctx = SerializeCtx {
                policy: self.policy,
                ids: &mut *self.ids,
                pool: &mut *self.pool,
                path: self.path.clone(),
            };
            let Some(described) = serialize_node(self.tree, node, true, &mut ctx) else {
                continue;
            };
            let value = match described {
                DescribedNode::Text { content, .. } | DescribedNode::Comment { content, .. } => {
                    content
                }
                _ => continue,
            };
            if previous.as_deref() == Some(value.as_str()) {
                // The description already carries this value.
                continue;
            }
            out.push(TextUpdate { id, value });
        }
        out
    }

    fn resolve_attributes(&mut self) -> Vec<AttributeUpdate> {
        let mut out = Vec::new();
        let order = std::mem::take(&mut self.attr_order);
        let names = std::mem::take(&mut self.attr_names);
        for node in order {
            let Some(id) = self.mirror_id(node) else {
                continue;
            };
            let Some(changed) = names.get(&node) else {
                continue;
            };
            let mut attributes = AttrMap::new();
            for name in changed {
                match self.tree.attr(node, name) {
                    Some(value) => {
                        attributes.insert(name.clone(), AttrValue::from(value));
                    }
                    None => {
                        attributes.insert(name.clone(), AttrValue::Null);
                    }
                }
            }
            if attributes.is_empty() {
                continue;
            }
            // Keep the mirror's shallow description current.
            let mut ctx = SerializeCtx {
                policy: self.policy,
                ids: &mut *self.ids,
                pool: &mut *self.pool,
                path: self.path.clone(),
            };
            let _ = serialize_node(self.tree, node, true, &mut ctx);
            out.push(AttributeUpdate { id, attributes });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::serialize_tree;

    struct Harness {
        tree: DocTree,
        policy: RecordPolicy,
        ids: IdAllocator,
        pool: MirrorPool,
        coalescer: Coalescer,
    }

    impl Harness {
        fn new(tree: DocTree) -> Self {
            Self {
                tree,
                policy: RecordPolicy::default(),
                ids: IdAllocator::new(),
                pool: MirrorPool::new(),
                coalescer: Coalescer::new(),
            }
        }

        fn snapshot(&mut self) -> DescribedNode {
            self.tree.take_changes();
            let mut ctx = SerializeCtx::new(&self.policy, &mut self.ids, &mut self.pool);
            serialize_tree(&self.tree, &mut ctx).expect("snapshot")
        }

        fn emit(&mut self) -> Option<DiffPayload> {
            let records = self.tree.take_changes();
            self.coalescer.process_batch(
                records,
                &self.tree,
                &mut self.pool,
                &mut self.ids,
                &self.policy,
            )
        }

        fn id_of(&self, key: NodeKey) -> SerializedId {
            self.pool
                .mirror(&[])
                .and_then(|m| m.get_id(key))
                .expect("id")
        }
    }

    #[test]
    fn text_change_emits_exactly_one_update() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let p = tree.create_element("p");
        let text = tree.create_text("hello");
        tree.append_child(root, p).unwrap();
        tree.append_child(p, text).unwrap();

        let mut h = Harness::new(tree);
        h.snapshot();
        let text_id = h.id_of(text);

        h.tree.set_text(text, "goodbye").unwrap();
        let diff = h.emit().expect("diff");
        assert_eq!(
            diff.texts,
            vec![TextUpdate {
                id: text_id,
                value: "goodbye".to_string()
            }]
        );
        assert!(diff.attributes.is_empty());
        assert!(diff.removes.is_empty());
        assert!(diff.adds.is_empty());
    }

    #[test]
    fn unchanged_text_nets_out_to_nothing() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let text = tree.create_text("same");
        tree.append_child(root, text).unwrap();

        let mut h = Harness::new(tree);
        h.snapshot();
        h.tree.set_text(text, "same").unwrap();
        assert!(h.emit().is_none());
    }

    #[test]
    fn attribute_update_carries_only_named_attributes() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        tree.append_child(root, div).unwrap();
        tree.set_attr(div, "class", "a").unwrap();
        tree.set_attr(div, "title", "t").unwrap();

        let mut h = Harness::new(tree);
        h.snapshot();
        let div_id = h.id_of(div);

        h.tree.set_attr(div, "class", "b").unwrap();
        h.tree.remove_attr(div, "title").unwrap();
        let diff = h.emit().expect("diff");
        assert_eq!(diff.attributes.len(), 1);
        let update = &diff.attributes[0];
        assert_eq!(update.id, div_id);
        assert_eq!(update.attributes.get("class"), Some(&AttrValue::from("b")));
        assert_eq!(update.attributes.get("title"), Some(&AttrValue::Null));
        assert!(diff.adds.is_empty());
    }

    #[test]
    fn sibling_reorder_emits_one_add_and_no_removes() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        let a = tree.create_element("span");
        let b = tree.create_element("span");
        tree.append_child(root, div).unwrap();
        tree.append_child(div, a).unwrap();
        tree.append_child(div, b).unwrap();

        let mut h = Harness::new(tree);
        h.snapshot();
        let a_id = h.id_of(a);
        let b_id = h.id_of(b);

        // Reverse the two spans in one batch.
        h.tree.insert_before(div, b, a).unwrap();
        let diff = h.emit().expect("diff");
        assert!(diff.removes.is_empty());
        assert_eq!(diff.adds.len(), 1);
        let add = &diff.adds[0];
        assert_eq!(add.node.id(), b_id, "moved node keeps its id");
        assert_eq!(add.next_id, Some(a_id), "anchored before its new next sibling");
    }

    #[test]
    fn added_subtree_is_emitted_as_one_addition() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let mut h = Harness::new(tree);
        h.snapshot();

        let div = h.tree.create_element("div");
        let span = h.tree.create_element("span");
        let text = h.tree.create_text("x");
        h.tree.append_child(root, div).unwrap();
        h.tree.append_child(div, span).unwrap();
        h.tree.append_child(span, text).unwrap();

        let diff = h.emit().expect("diff");
        assert_eq!(diff.adds.len(), 1);
        let node = &diff.adds[0].node;
        assert_eq!(node.children().len(), 1);
        assert_eq!(node.children()[0].children().len(), 1);
    }

    #[test]
    fn add_then_remove_in_one_batch_nets_out() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let mut h = Harness::new(tree);
        h.snapshot();

        let div = h.tree.create_element("div");
        h.tree.append_child(root, div).unwrap();
        h.tree.remove(div).unwrap();

        assert!(h.emit().is_none());
        assert!(!h.pool.mirror(&[]).unwrap().has_key(div));
    }

    #[test]
    fn add_remove_readd_in_one_batch_still_emits() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let mut h = Harness::new(tree);
        h.snapshot();

        let div = h.tree.create_element("div");
        h.tree.append_child(root, div).unwrap();
        h.tree.remove(div).unwrap();
        h.tree.append_child(root, div).unwrap();

        let diff = h.emit().expect("node is attached at batch end");
        assert_eq!(diff.adds.len(), 1);
        assert!(diff.removes.is_empty());
        assert!(h.pool.mirror(&[]).unwrap().has_key(div));
    }

    #[test]
    fn insertion_before_excluded_whitespace_anchors_past_it() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        let ws = tree.create_text("\n   ");
        let b = tree.create_element("b");
        tree.append_child(root, div).unwrap();
        tree.append_child(div, ws).unwrap();
        tree.append_child(div, b).unwrap();

        let mut h = Harness::new(tree);
        h.snapshot();
        let b_id = h.id_of(b);

        // The new element lands before the collapsed whitespace, which
        // never carries an id.
        let a = h.tree.create_element("a");
        h.tree.insert_before(div, a, ws).unwrap();
        let diff = h.emit().expect("diff");
        assert_eq!(diff.adds.len(), 1);
        assert_eq!(
            diff.adds[0].next_id,
            Some(b_id),
            "anchor skips the excluded sibling"
        );
    }

    #[test]
    fn reorder_of_a_subtree_is_described_shallow() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        let a = tree.create_element("a");
        let b = tree.create_element("b");
        let label = tree.create_text("kept");
        tree.append_child(root, div).unwrap();
        tree.append_child(div, a).unwrap();
        tree.append_child(div, b).unwrap();
        tree.append_child(b, label).unwrap();

        let mut h = Harness::new(tree);
        h.snapshot();
        let b_id = h.id_of(b);

        h.tree.insert_before(div, b, a).unwrap();
        let diff = h.emit().expect("diff");
        assert_eq!(diff.adds.len(), 1);
        assert_eq!(diff.adds[0].node.id(), b_id);
        assert!(
            diff.adds[0].node.children().is_empty(),
            "the consumer keeps the subtree of a held node"
        );
    }

    #[test]
    fn removal_purges_mirror_but_keeps_moved_descendants() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let old_home = tree.create_element("div");
        let survivor = tree.create_element("span");
        let new_home = tree.create_element("section");
        tree.append_child(root, old_home).unwrap();
        tree.append_child(old_home, survivor).unwrap();
        tree.append_child(root, new_home).unwrap();

        let mut h = Harness::new(tree);
        h.snapshot();
        let survivor_id = h.id_of(survivor);
        let old_home_id = h.id_of(old_home);

        // Move the span out, then drop its old parent, all in one batch.
        h.tree.append_child(new_home, survivor).unwrap();
        h.tree.remove(old_home).unwrap();

        let diff = h.emit().expect("diff");
        assert_eq!(diff.removes.len(), 2, "old location + old parent");
        assert!(diff.removes.iter().any(|r| r.id == old_home_id));
        assert_eq!(diff.adds.len(), 1);
        assert_eq!(diff.adds[0].node.id(), survivor_id);
        let mirror = h.pool.mirror(&[]).unwrap();
        assert!(mirror.has(survivor_id), "moved node survives the purge");
        assert!(!mirror.has(old_home_id));
    }

    #[test]
    fn deferred_anchor_resolves_in_later_pass() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        tree.append_child(root, div).unwrap();

        let mut h = Harness::new(tree);
        h.snapshot();

        // Insert three spans so that the first-classified node's next
        // sibling is described only later in the same batch.
        let a = h.tree.create_element("a");
        let b = h.tree.create_element("b");
        let c = h.tree.create_element("c");
        h.tree.append_child(div, a).unwrap();
        h.tree.append_child(div, b).unwrap();
        h.tree.insert_before(div, c, b).unwrap();
        assert_eq!(h.tree.children(div), &[a, c, b]);

        let diff = h.emit().expect("diff");
        assert_eq!(diff.adds.len(), 3);
        // Every add is anchored on an id that appears earlier in the list
        // (or is null), so in-order application reconstructs [a, c, b].
        let mut known: Vec<SerializedId> = Vec::new();
        for add in &diff.adds {
            if let Some(next) = add.next_id {
                assert!(known.contains(&next), "next anchor emitted earlier");
            }
            known.push(add.node.id());
        }
    }

    #[test]
    fn freeze_buffers_until_unfreeze() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let text = tree.create_text("x");
        tree.append_child(root, text).unwrap();

        let mut h = Harness::new(tree);
        h.snapshot();
        h.coalescer.freeze();

        h.tree.set_text(text, "y").unwrap();
        assert!(h.emit().is_none(), "frozen coalescer emits nothing");

        let diff = h
            .coalescer
            .unfreeze(&h.tree, &mut h.pool, &mut h.ids, &h.policy)
            .expect("buffered batch emitted on unfreeze");
        assert_eq!(diff.texts.len(), 1);
        assert_eq!(diff.texts[0].value, "y");
    }

    #[test]
    fn blocked_subtree_changes_are_suppressed() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        let text = tree.create_text("secret");
        tree.append_child(root, div).unwrap();
        tree.append_child(div, text).unwrap();
        tree.set_attr(div, crate::policy::BLOCK_ATTR, "").unwrap();

        let mut h = Harness::new(tree);
        h.snapshot();
        h.tree.set_text(text, "still secret").unwrap();
        assert!(h.emit().is_none());
    }
}
