//! Recording and replaying sessions.
//!
//! A `Recorder` owns the observed tree and turns its buffered change
//! batches into an event stream: one full snapshot up front (or whenever
//! requested), incremental diffs afterwards. A `Replayer` consumes that
//! stream and maintains a real tree that tracks the recorded one.

use crate::coalesce::Coalescer;
use crate::mirror::{IdAllocator, MirrorPool};
use crate::policy::RecordPolicy;
use crate::protocol::EventRecord;
use crate::reconcile::{reconcile, DiffStats};
use crate::shadow::{ShadowKind, ShadowNode, ShadowTree};
use crate::snapshot::{serialize_tree, SerializeCtx};
use crate::tree::{DocTree, TreeError};
use std::fmt;

#[derive(Debug)]
pub enum SessionError {
    /// An incremental diff arrived before any full snapshot.
    NoSnapshot,
    Tree(TreeError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NoSnapshot => {
                write!(f, "incremental diff received before a full snapshot")
            }
            SessionError::Tree(err) => write!(f, "target tree rejected a patch: {err}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<TreeError> for SessionError {
    fn from(err: TreeError) -> Self {
        SessionError::Tree(err)
    }
}

pub struct Recorder {
    tree: DocTree,
    policy: RecordPolicy,
    ids: IdAllocator,
    pool: MirrorPool,
    coalescer: Coalescer,
}

impl Recorder {
    pub fn new(policy: RecordPolicy) -> Self {
        Self::with_tree(DocTree::new(), policy)
    }

    pub fn with_tree(tree: DocTree, policy: RecordPolicy) -> Self {
        Self {
            tree,
            policy,
            ids: IdAllocator::new(),
            pool: MirrorPool::new(),
            coalescer: Coalescer::new(),
        }
    }

    pub fn tree(&self) -> &DocTree {
        &self.tree
    }

    /// The observed tree. The host mutates it here; `flush` picks the
    /// buffered changes up.
    pub fn tree_mut(&mut self) -> &mut DocTree {
        &mut self.tree
    }

    pub fn policy(&self) -> &RecordPolicy {
        &self.policy
    }

    /// Describe the whole tree from scratch. Existing mirrors are torn
    /// down and pending change batches discarded, since the snapshot
    /// supersedes them; emission stays frozen while serializing.
    pub fn take_full_snapshot(&mut self) -> Option<EventRecord> {
        self.coalescer.freeze();
        self.tree.take_changes();
        self.pool.reset();
        let mut ctx = SerializeCtx::new(&self.policy, &mut self.ids, &mut self.pool);
        let node = serialize_tree(&self.tree, &mut ctx);
        let leftover =
            self.coalescer
                .unfreeze(&self.tree, &mut self.pool, &mut self.ids, &self.policy);
        debug_assert!(leftover.is_none(), "nothing buffers while snapshotting");
        Some(EventRecord::FullSnapshot { node: node? })
    }

    /// Coalesce the buffered change batch into one diff event. `None` when
    /// the batch nets out to nothing.
    pub fn flush(&mut self) -> Option<EventRecord> {
        let records = self.tree.take_changes();
        self.coalescer
            .process_batch(
                records,
                &self.tree,
                &mut self.pool,
                &mut self.ids,
                &self.policy,
            )
            .map(|diff| EventRecord::IncrementalDiff { diff })
    }
}

#[derive(Default)]
pub struct Replayer {
    target: DocTree,
    pool: MirrorPool,
    shadow: Option<ShadowTree>,
}

impl Replayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The reconstructed tree.
    pub fn target(&self) -> &DocTree {
        &self.target
    }

    /// Apply one event from the stream: update the shadow state, then
    /// patch the target tree to match it.
    pub fn apply(&mut self, event: &EventRecord) -> Result<DiffStats, SessionError> {
        match event {
            EventRecord::FullSnapshot { node } => {
                let new_shadow = ShadowTree::from_snapshot(node);
                let old_root = match &self.shadow {
                    Some(shadow) => shadow.root().clone(),
                    None => ShadowNode {
                        id: new_shadow.root().id,
                        kind: ShadowKind::Document { compat_mode: None },
                        children: Vec::new(),
                    },
                };
                let stats = reconcile(
                    &mut self.target,
                    &mut self.pool,
                    &old_root,
                    &new_shadow.root().clone(),
                )?;
                self.shadow = Some(new_shadow);
                self.target.take_changes();
                Ok(stats)
            }
            EventRecord::IncrementalDiff { diff } => {
                let Some(shadow) = &mut self.shadow else {
                    return Err(SessionError::NoSnapshot);
                };
                let old_root = shadow.root().clone();
                shadow.apply(diff);
                let new_root = shadow.root().clone();
                let stats = reconcile(&mut self.target, &mut self.pool, &old_root, &new_root)?;
                // The target's own change buffer is an artifact of patching.
                self.target.take_changes();
                Ok(stats)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_before_snapshot_is_an_error() {
        let mut replayer = Replayer::new();
        let event = EventRecord::IncrementalDiff {
            diff: crate::protocol::DiffPayload::default(),
        };
        assert!(matches!(
            replayer.apply(&event),
            Err(SessionError::NoSnapshot)
        ));
    }

    #[test]
    fn snapshot_then_quiet_flush_emits_nothing() {
        let mut recorder = Recorder::new(RecordPolicy::default());
        let root = recorder.tree().root();
        let div = recorder.tree_mut().create_element("div");
        recorder.tree_mut().append_child(root, div).unwrap();

        assert!(recorder.take_full_snapshot().is_some());
        assert!(recorder.flush().is_none());
    }

    #[test]
    fn resnapshot_discards_pending_changes() {
        let mut recorder = Recorder::new(RecordPolicy::default());
        let root = recorder.tree().root();
        let text = recorder.tree_mut().create_text("x");
        recorder.tree_mut().append_child(root, text).unwrap();
        recorder.take_full_snapshot().unwrap();

        recorder.tree_mut().set_text(text, "y").unwrap();
        // The snapshot describes the current state; the buffered text
        // change must not surface as a diff afterwards.
        recorder.take_full_snapshot().unwrap();
        assert!(recorder.flush().is_none());
    }
}
