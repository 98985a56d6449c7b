//! Id <-> node association for one tracked tree.
//!
//! A `Mirror` owns the bidirectional map between wire ids and arena keys for
//! exactly one tree instance, plus the last shallow description of each
//! node. Nested documents get their own `Mirror`; the id allocator is
//! shared session-wide so ids stay unique across the whole recording.

use crate::protocol::{DescribedNode, SerializedId};
use crate::tree::{DocTree, NodeKey, TreePath};
use std::collections::HashMap;

/// Session-wide id counter. Ids are assigned in traversal order the first
/// time a node is observed and are never reused within a session.
#[derive(Debug)]
pub struct IdAllocator {
    next: u32,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next(&mut self) -> SerializedId {
        let id = SerializedId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Debug)]
struct MirrorEntry {
    id: SerializedId,
    meta: Option<DescribedNode>,
}

#[derive(Debug, Default)]
pub struct Mirror {
    id_to_key: HashMap<SerializedId, NodeKey>,
    key_to_entry: HashMap<NodeKey, MirrorEntry>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_id(&self, key: NodeKey) -> Option<SerializedId> {
        self.key_to_entry.get(&key).map(|entry| entry.id)
    }

    pub fn get_node(&self, id: SerializedId) -> Option<NodeKey> {
        self.id_to_key.get(&id).copied()
    }

    pub fn has(&self, id: SerializedId) -> bool {
        self.id_to_key.contains_key(&id)
    }

    pub fn has_key(&self, key: NodeKey) -> bool {
        self.key_to_entry.contains_key(&key)
    }

    /// Last shallow description recorded for `key`.
    pub fn meta(&self, key: NodeKey) -> Option<&DescribedNode> {
        self.key_to_entry.get(&key)?.meta.as_ref()
    }

    /// Bind `id` to `key`. An existing binding for either side is
    /// overwritten; callers must reach for `replace` instead when rebinding
    /// an id to a reconstructed node.
    pub fn add(&mut self, key: NodeKey, id: SerializedId, meta: Option<DescribedNode>) {
        debug_assert!(id.is_valid(), "excluded sentinel must never enter a mirror");
        if let Some(previous_key) = self.id_to_key.insert(id, key) {
            self.key_to_entry.remove(&previous_key);
        }
        if let Some(previous) = self.key_to_entry.insert(key, MirrorEntry { id, meta }) {
            if previous.id != id {
                self.id_to_key.remove(&previous.id);
            }
        }
    }

    /// Rebind an id to a different node instance, preserving its metadata.
    pub fn replace(&mut self, id: SerializedId, key: NodeKey) {
        let meta = self
            .id_to_key
            .get(&id)
            .and_then(|old_key| self.key_to_entry.remove(old_key))
            .and_then(|entry| entry.meta);
        self.id_to_key.remove(&id);
        self.add(key, id, meta);
    }

    /// Remove `key` and every descendant currently tracked, following the
    /// tree's current child links (detached subtrees keep theirs).
    pub fn remove_subtree(&mut self, tree: &DocTree, key: NodeKey) {
        for descendant in tree.descendants(key) {
            if let Some(entry) = self.key_to_entry.remove(&descendant) {
                self.id_to_key.remove(&entry.id);
            }
        }
    }

    pub fn reset(&mut self) {
        self.id_to_key.clear();
        self.key_to_entry.clear();
    }

    pub fn len(&self) -> usize {
        self.key_to_entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_to_entry.is_empty()
    }
}

/// Mirrors for a root tree and its nested documents, keyed by host-element
/// path. Owned by one session object; never shared across sessions.
#[derive(Debug, Default)]
pub struct MirrorPool {
    mirrors: HashMap<TreePath, Mirror>,
}

impl MirrorPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mirror(&self, path: &[NodeKey]) -> Option<&Mirror> {
        self.mirrors.get(path)
    }

    pub fn mirror_mut(&mut self, path: &[NodeKey]) -> &mut Mirror {
        self.mirrors.entry(path.to_vec()).or_default()
    }

    pub fn root(&self) -> Option<&Mirror> {
        self.mirrors.get(&Vec::new())
    }

    pub fn root_mut(&mut self) -> &mut Mirror {
        self.mirror_mut(&[])
    }

    /// Tear down every mirror, e.g. ahead of a fresh full snapshot.
    pub fn reset(&mut self) {
        self.mirrors.clear();
    }
}
