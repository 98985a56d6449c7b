//! Pending-insertion list: nodes awaiting resolvable structural anchors.
//!
//! A doubly linked list over node keys. When a node is added while one of
//! its live siblings is already a member, it is linked next to that sibling
//! so several not-yet-anchorable siblings keep their relative order. The
//! coalescer scans the list back to front, since the most recently added
//! node is the one most likely to have a resolvable anchor.

use crate::tree::NodeKey;
use std::collections::HashMap;

#[derive(Debug)]
struct Slot {
    node: NodeKey,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
pub struct PendingList {
    slots: Vec<Slot>,
    head: Option<usize>,
    tail: Option<usize>,
    positions: HashMap<NodeKey, usize>,
    len: usize,
}

impl PendingList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, node: NodeKey) -> bool {
        self.positions.contains_key(&node)
    }

    /// Insert `node`, anchored next to whichever of its live siblings is
    /// already a member: after `prev_sibling` if present, else before
    /// `next_sibling`, else at the tail.
    pub fn add_node(
        &mut self,
        node: NodeKey,
        prev_sibling: Option<NodeKey>,
        next_sibling: Option<NodeKey>,
    ) {
        if self.contains(node) {
            return;
        }
        let slot = self.slots.len();
        self.slots.push(Slot {
            node,
            prev: None,
            next: None,
        });
        self.positions.insert(node, slot);
        self.len += 1;

        if let Some(anchor) = prev_sibling.and_then(|s| self.positions.get(&s).copied()) {
            if anchor != slot {
                self.link_after(anchor, slot);
                return;
            }
        }
        if let Some(anchor) = next_sibling.and_then(|s| self.positions.get(&s).copied()) {
            if anchor != slot {
                self.link_before(anchor, slot);
                return;
            }
        }
        self.link_tail(slot);
    }

    fn link_after(&mut self, anchor: usize, slot: usize) {
        let next = self.slots[anchor].next;
        self.slots[slot].prev = Some(anchor);
        self.slots[slot].next = next;
        self.slots[anchor].next = Some(slot);
        match next {
            Some(next) => self.slots[next].prev = Some(slot),
            None => self.tail = Some(slot),
        }
    }

    fn link_before(&mut self, anchor: usize, slot: usize) {
        let prev = self.slots[anchor].prev;
        self.slots[slot].next = Some(anchor);
        self.slots[slot].prev = prev;
        self.slots[anchor].prev = Some(slot);
        match prev {
            Some(prev) => self.slots[prev].next = Some(slot),
            None => self.head = Some(slot),
        }
    }

    fn link_tail(&mut self, slot: usize) {
        match self.tail {
            Some(tail) => {
                self.slots[tail].next = Some(slot);
                self.slots[slot].prev = Some(tail);
                self.tail = Some(slot);
            }
            None => {
                self.head = Some(slot);
                self.tail = Some(slot);
            }
        }
    }

    /// Node at `position`, counted from the head.
    pub fn get(&self, position: usize) -> Option<NodeKey> {
        let mut current = self.head;
        let mut index = 0;
        while let Some(slot) = current {
            if index == position {
                return Some(self.slots[slot].node);
            }
            current = self.slots[slot].next;
            index += 1;
        }
        None
    }

    pub fn remove(&mut self, node: NodeKey) -> bool {
        let Some(slot) = self.positions.remove(&node) else {
            return false;
        };
        let Slot { prev, next, .. } = self.slots[slot];
        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next].prev = prev,
            None => self.tail = prev,
        }
        self.slots[slot].prev = None;
        self.slots[slot].next = None;
        self.len -= 1;
        true
    }

    /// Drain the remaining members, head to tail.
    pub fn drain(&mut self) -> Vec<NodeKey> {
        let mut out = Vec::with_capacity(self.len);
        let mut current = self.head;
        while let Some(slot) = current {
            out.push(self.slots[slot].node);
            current = self.slots[slot].next;
        }
        self.slots.clear();
        self.positions.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
        out
    }
}
