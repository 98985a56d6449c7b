//! Wire/event-stream contract shared by the recording and replaying sides.
//!
//! This module defines the stable record format: full snapshots (a complete
//! described tree) and incremental diffs (four ordered collections per batch).
//!
//! Invariants:
//! - Ids are strictly positive and unique within one recording session.
//!   `SerializedId::EXCLUDED` (0) never appears on the wire.
//! - The root document of a session is conventionally id 1.
//! - Every id referenced by a text/attribute update or removal exists in the
//!   recording-side mirror at emission time.
//! - An addition whose node id was seen before in the session is a *move* of
//!   a known node, not a fresh node. When the consumer still holds the node
//!   the addition carries only a shallow description and the subtree travels
//!   intact; a node removed in the same payload is re-described in full,
//!   with the same ids.
//! - Adding payload fields or node kinds must not change the meaning of
//!   existing ones; consumers tolerate unknown optional fields.
//! - In an attribute update, `AttrValue::Null` means "attribute removed".
//!   Described elements never carry `Null` values directly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable node identity within one recording session.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct SerializedId(pub u32);

impl SerializedId {
    /// Reserved sentinel for "observed but deliberately excluded".
    pub const EXCLUDED: SerializedId = SerializedId(0);
    /// Conventional id of the root document.
    pub const ROOT: SerializedId = SerializedId(1);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Attribute value as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Num(f64),
    Str(String),
    Null,
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

pub type AttrMap = BTreeMap<String, AttrValue>;

/// Reserved attribute names carrying captured side state. Appliers route
/// these to node state instead of setting literal attributes.
pub mod reserved {
    pub const SCROLL_LEFT: &str = "rr_scroll_left";
    pub const SCROLL_TOP: &str = "rr_scroll_top";
    pub const CANVAS_DATA: &str = "rr_canvas_data";
    pub const MEDIA_STATE: &str = "rr_media_state";
    pub const MEDIA_CURRENT_TIME: &str = "rr_media_current_time";
    pub const MEDIA_VOLUME: &str = "rr_media_volume";
    pub const MEDIA_MUTED: &str = "rr_media_muted";
    pub const MEDIA_PLAYBACK_RATE: &str = "rr_media_playback_rate";
    pub const MEDIA_LOOP: &str = "rr_media_loop";
    pub const BLOCK_WIDTH: &str = "rr_width";
    pub const BLOCK_HEIGHT: &str = "rr_height";
    /// JSON list of style-sheet rule edits, in arrival order.
    pub const SHEET_RULES: &str = "rr_sheet_rules";
    /// JSON list of buffered drawing-surface operations, in arrival order.
    pub const CANVAS_OPS: &str = "rr_canvas_ops";

    pub fn is_reserved(name: &str) -> bool {
        name.starts_with("rr_")
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Serialized representation of one tree node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DescribedNode {
    #[serde(rename_all = "camelCase")]
    Document {
        id: SerializedId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compat_mode: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        child_nodes: Vec<DescribedNode>,
    },
    #[serde(rename_all = "camelCase")]
    DocumentType {
        id: SerializedId,
        name: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        public_id: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        system_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Element {
        id: SerializedId,
        tag_name: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: AttrMap,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        child_nodes: Vec<DescribedNode>,
        #[serde(default, skip_serializing_if = "is_false")]
        is_svg: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        need_block: bool,
    },
    #[serde(rename_all = "camelCase")]
    Text {
        id: SerializedId,
        content: String,
        #[serde(default, skip_serializing_if = "is_false")]
        is_style_owner: bool,
    },
    #[serde(rename_all = "camelCase")]
    Cdata { id: SerializedId },
    #[serde(rename_all = "camelCase")]
    Comment { id: SerializedId, content: String },
}

impl DescribedNode {
    pub fn id(&self) -> SerializedId {
        match self {
            DescribedNode::Document { id, .. }
            | DescribedNode::DocumentType { id, .. }
            | DescribedNode::Element { id, .. }
            | DescribedNode::Text { id, .. }
            | DescribedNode::Cdata { id }
            | DescribedNode::Comment { id, .. } => *id,
        }
    }

    pub fn children(&self) -> &[DescribedNode] {
        match self {
            DescribedNode::Document { child_nodes, .. }
            | DescribedNode::Element { child_nodes, .. } => child_nodes,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<DescribedNode>> {
        match self {
            DescribedNode::Document { child_nodes, .. }
            | DescribedNode::Element { child_nodes, .. } => Some(child_nodes),
            _ => None,
        }
    }

    /// Copy of this node with its child list cleared. Used for per-node
    /// mirror metadata, where the subtree is tracked separately.
    pub fn shallow(&self) -> DescribedNode {
        let mut copy = self.clone();
        if let Some(children) = copy.children_mut() {
            children.clear();
        }
        copy
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextUpdate {
    pub id: SerializedId,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeUpdate {
    pub id: SerializedId,
    /// Only the attributes that changed; `AttrValue::Null` marks a removal.
    pub attributes: AttrMap,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Removal {
    pub parent_id: SerializedId,
    pub id: SerializedId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Addition {
    pub parent_id: SerializedId,
    /// Sibling the node is inserted before; `None` means "insert at end".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<SerializedId>,
    pub node: DescribedNode,
}

/// The four ordered collections emitted for one coalesced notification batch.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct DiffPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub texts: Vec<TextUpdate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeUpdate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removes: Vec<Removal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adds: Vec<Addition>,
}

impl DiffPayload {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
            && self.attributes.is_empty()
            && self.removes.is_empty()
            && self.adds.is_empty()
    }
}

/// One record of the event stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventRecord {
    FullSnapshot { node: DescribedNode },
    IncrementalDiff { diff: DiffPayload },
}
