//! Record-and-replay core for document trees.
//!
//! The recording side watches a live tree and emits a stream of events: a
//! full snapshot (the whole tree described with session-unique ids) and
//! incremental diffs (coalesced change batches). The replaying side applies
//! the stream to a shadow state and reconciles a real tree against it, so
//! the target converges on the recorded structure after every event.

pub mod coalesce;
pub mod mirror;
pub mod pending;
pub mod policy;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod shadow;
pub mod snapshot;
pub mod tree;
#[cfg(any(test, feature = "tree-snapshot"))]
pub mod tree_snapshot;

pub use crate::coalesce::Coalescer;
pub use crate::mirror::{IdAllocator, Mirror, MirrorPool};
pub use crate::pending::PendingList;
pub use crate::policy::RecordPolicy;
pub use crate::protocol::{
    Addition, AttrMap, AttrValue, AttributeUpdate, DescribedNode, DiffPayload, EventRecord,
    Removal, SerializedId, TextUpdate,
};
pub use crate::reconcile::{reconcile, DiffStats};
pub use crate::session::{Recorder, Replayer, SessionError};
pub use crate::shadow::{ShadowKind, ShadowNode, ShadowTree};
pub use crate::snapshot::{serialize_node, serialize_tree, SerializeCtx};
pub use crate::tree::{
    ChangeRecord, DocTree, ElementState, MediaState, NodeData, NodeKey, SheetRuleEdit, TreeError,
    TreePath,
};
