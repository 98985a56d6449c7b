//! Order-preserving tree serializer.
//!
//! Walks a live tree pre-order and produces a fully described node tree
//! with ids, consulting the mirror so that re-serializing an already known
//! node reuses its id. Policy-excluded nodes (collapsed whitespace, slim
//! head boilerplate) get the exclusion sentinel: they are never mirrored
//! and never appear in the output. Blocked elements are captured as opaque
//! placeholders that keep only the bounding box.

use crate::mirror::{IdAllocator, MirrorPool};
use crate::policy::RecordPolicy;
use crate::protocol::{reserved, AttrMap, AttrValue, DescribedNode, SerializedId};
use crate::tree::{DocTree, ElementState, NodeData, NodeKey, TreePath};

pub struct SerializeCtx<'a> {
    pub policy: &'a RecordPolicy,
    pub ids: &'a mut IdAllocator,
    pub pool: &'a mut MirrorPool,
    pub path: TreePath,
}

impl<'a> SerializeCtx<'a> {
    pub fn new(
        policy: &'a RecordPolicy,
        ids: &'a mut IdAllocator,
        pool: &'a mut MirrorPool,
    ) -> Self {
        Self {
            policy,
            ids,
            pool,
            path: Vec::new(),
        }
    }
}

/// Serialize a whole tree starting at its root document.
pub fn serialize_tree(tree: &DocTree, ctx: &mut SerializeCtx<'_>) -> Option<DescribedNode> {
    serialize_node(tree, tree.root(), false, ctx)
}

/// Serialize one node. `skip_child` re-describes the node without its
/// subtree. Returns `None` for excluded or unrecognizable nodes; callers
/// skip those and continue.
pub fn serialize_node(
    tree: &DocTree,
    key: NodeKey,
    skip_child: bool,
    ctx: &mut SerializeCtx<'_>,
) -> Option<DescribedNode> {
    let data = match tree.data(key) {
        Ok(data) => data,
        Err(err) => {
            log::warn!(target: "treecast.snapshot", "skipping unreadable node: {err}");
            return None;
        }
    };

    let node = match data {
        NodeData::Document { compat_mode } => {
            let id = assign_id(key, ctx);
            let child_nodes = if skip_child {
                Vec::new()
            } else {
                serialize_children(tree, key, ctx)
            };
            DescribedNode::Document {
                id,
                compat_mode: compat_mode.clone(),
                child_nodes,
            }
        }
        NodeData::Doctype {
            name,
            public_id,
            system_id,
        } => {
            let id = assign_id(key, ctx);
            DescribedNode::DocumentType {
                id,
                name: name.clone(),
                public_id: public_id.clone(),
                system_id: system_id.clone(),
            }
        }
        NodeData::Element {
            tag,
            attrs,
            is_svg,
            state,
            content_doc,
        } => {
            if ctx.policy.is_slim_excluded(tree, key) {
                // Exclusion sentinel: not mirrored, not emitted.
                return None;
            }
            if ctx.policy.is_blocked_element(tree, key) {
                let id = assign_id(key, ctx);
                let node = blocked_placeholder(id, tag, attrs, *is_svg);
                remember(key, &node, ctx);
                return Some(node);
            }
            if let Some(inlined) = inline_stylesheet(key, tag, attrs, state, ctx) {
                return Some(inlined);
            }

            let id = assign_id(key, ctx);
            let attributes = captured_attributes(tag, attrs, state, ctx.policy);
            let child_nodes = if skip_child {
                Vec::new()
            } else if let Some(nested) = content_doc.as_deref() {
                // Nested document: a separate sub-serialization with its
                // own mirror, so the reconciler recurses structurally.
                ctx.path.push(key);
                let described = serialize_tree(nested, ctx);
                ctx.path.pop();
                described.into_iter().collect()
            } else {
                serialize_children(tree, key, ctx)
            };
            DescribedNode::Element {
                id,
                tag_name: tag.clone(),
                attributes,
                child_nodes,
                is_svg: *is_svg,
                need_block: false,
            }
        }
        NodeData::Text { content } => {
            if ctx.policy.is_collapsed_whitespace(tree, key) {
                return None;
            }
            let id = assign_id(key, ctx);
            let is_style_owner = tree.parent(key).and_then(|p| tree.tag(p)) == Some("style");
            DescribedNode::Text {
                id,
                content: content.clone(),
                is_style_owner,
            }
        }
        NodeData::Cdata => {
            let id = assign_id(key, ctx);
            DescribedNode::Cdata { id }
        }
        NodeData::Comment { content } => {
            let id = assign_id(key, ctx);
            DescribedNode::Comment {
                id,
                content: content.clone(),
            }
        }
    };

    remember(key, &node, ctx);
    Some(node)
}

fn serialize_children(
    tree: &DocTree,
    key: NodeKey,
    ctx: &mut SerializeCtx<'_>,
) -> Vec<DescribedNode> {
    let mut out = Vec::new();
    for &child in tree.children(key) {
        if let Some(described) = serialize_node(tree, child, false, ctx) {
            out.push(described);
        }
    }
    out
}

/// Reuse the live mirror id when the node is already known; otherwise
/// allocate the next session id. This makes re-serialization idempotent.
fn assign_id(key: NodeKey, ctx: &mut SerializeCtx<'_>) -> SerializedId {
    if let Some(id) = ctx.pool.mirror_mut(&ctx.path).get_id(key) {
        return id;
    }
    ctx.ids.next()
}

fn remember(key: NodeKey, node: &DescribedNode, ctx: &mut SerializeCtx<'_>) {
    ctx.pool
        .mirror_mut(&ctx.path)
        .add(key, node.id(), Some(node.shallow()));
}

/// Opaque stand-in for a blocked element: same tag, bounding box only, no
/// content. The replay side renders an empty box of the same size.
fn blocked_placeholder(
    id: SerializedId,
    tag: &str,
    attrs: &std::collections::BTreeMap<String, String>,
    is_svg: bool,
) -> DescribedNode {
    let mut attributes = AttrMap::new();
    if let Some(width) = attrs.get("width") {
        attributes.insert(
            reserved::BLOCK_WIDTH.to_string(),
            AttrValue::from(width.as_str()),
        );
    }
    if let Some(height) = attrs.get("height") {
        attributes.insert(
            reserved::BLOCK_HEIGHT.to_string(),
            AttrValue::from(height.as_str()),
        );
    }
    DescribedNode::Element {
        id,
        tag_name: tag.to_string(),
        attributes,
        child_nodes: Vec::new(),
        is_svg,
        need_block: true,
    }
}

/// Replace `<link rel="stylesheet">` with an inline `<style>` element when
/// the host has supplied the resolved content.
fn inline_stylesheet(
    key: NodeKey,
    tag: &str,
    attrs: &std::collections::BTreeMap<String, String>,
    state: &ElementState,
    ctx: &mut SerializeCtx<'_>,
) -> Option<DescribedNode> {
    if !ctx.policy.inline_stylesheets || tag != "link" {
        return None;
    }
    let is_stylesheet = attrs
        .get("rel")
        .is_some_and(|rel| rel.split_whitespace().any(|t| t.eq_ignore_ascii_case("stylesheet")));
    let content = state.resolved_content.as_ref()?;
    if !is_stylesheet {
        return None;
    }

    let id = assign_id(key, ctx);
    // The inlined text has no live counterpart; it gets a fresh id but no
    // mirror entry, so it can never be targeted by a later update.
    let text_id = ctx.ids.next();
    let mut attributes = AttrMap::new();
    for (name, value) in attrs {
        if name == "rel" || name == "href" {
            continue;
        }
        attributes.insert(name.clone(), AttrValue::from(value.as_str()));
    }
    let node = DescribedNode::Element {
        id,
        tag_name: "style".to_string(),
        attributes,
        child_nodes: vec![DescribedNode::Text {
            id: text_id,
            content: content.clone(),
            is_style_owner: true,
        }],
        is_svg: false,
        need_block: false,
    };
    remember(key, &node, ctx);
    Some(node)
}

/// Element attributes plus the captured side state folded into the
/// description: input value/checked, canvas pixel snapshot, media playback
/// state, scroll offsets.
fn captured_attributes(
    tag: &str,
    attrs: &std::collections::BTreeMap<String, String>,
    state: &ElementState,
    policy: &RecordPolicy,
) -> AttrMap {
    let mut out = AttrMap::new();
    for (name, value) in attrs {
        out.insert(name.clone(), AttrValue::from(value.as_str()));
    }

    if matches!(tag, "input" | "textarea" | "select" | "option") {
        if let Some(value) = &state.value {
            let value = if policy.mask_inputs {
                policy.mask_value(value)
            } else {
                value.clone()
            };
            out.insert("value".to_string(), AttrValue::Str(value));
        }
        if let Some(checked) = state.checked {
            out.insert("checked".to_string(), AttrValue::Bool(checked));
        }
    }

    if tag == "canvas" && policy.capture_canvas {
        if let Some(snapshot) = &state.canvas_snapshot {
            out.insert(
                reserved::CANVAS_DATA.to_string(),
                AttrValue::from(snapshot.as_str()),
            );
        }
        if !state.canvas_ops.is_empty() {
            match serde_json::to_string(&state.canvas_ops) {
                Ok(json) => {
                    out.insert(reserved::CANVAS_OPS.to_string(), AttrValue::Str(json));
                }
                Err(err) => log::warn!(
                    target: "treecast.snapshot",
                    "unserializable drawing operations: {err}"
                ),
            }
        }
    }

    if !state.sheet_rules.is_empty() {
        match serde_json::to_string(&state.sheet_rules) {
            Ok(json) => {
                out.insert(reserved::SHEET_RULES.to_string(), AttrValue::Str(json));
            }
            Err(err) => log::warn!(
                target: "treecast.snapshot",
                "unserializable sheet rule edits: {err}"
            ),
        }
    }

    if matches!(tag, "audio" | "video") {
        if let Some(media) = &state.media {
            out.insert(
                reserved::MEDIA_STATE.to_string(),
                AttrValue::from(if media.paused { "paused" } else { "played" }),
            );
            out.insert(
                reserved::MEDIA_CURRENT_TIME.to_string(),
                AttrValue::Num(media.current_time),
            );
            out.insert(
                reserved::MEDIA_VOLUME.to_string(),
                AttrValue::Num(media.volume),
            );
            out.insert(
                reserved::MEDIA_MUTED.to_string(),
                AttrValue::Bool(media.muted),
            );
            out.insert(
                reserved::MEDIA_PLAYBACK_RATE.to_string(),
                AttrValue::Num(media.playback_rate),
            );
            out.insert(
                reserved::MEDIA_LOOP.to_string(),
                AttrValue::Bool(media.looping),
            );
        }
    }

    if let Some((left, top)) = state.scroll {
        out.insert(
            reserved::SCROLL_LEFT.to_string(),
            AttrValue::Num(left as f64),
        );
        out.insert(reserved::SCROLL_TOP.to_string(), AttrValue::Num(top as f64));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::BLOCK_ATTR;

    fn ctx_parts() -> (RecordPolicy, IdAllocator, MirrorPool) {
        (RecordPolicy::default(), IdAllocator::new(), MirrorPool::new())
    }

    #[test]
    fn root_document_gets_id_one() {
        let tree = DocTree::new();
        let (policy, mut ids, mut pool) = ctx_parts();
        let mut ctx = SerializeCtx::new(&policy, &mut ids, &mut pool);
        let described = serialize_tree(&tree, &mut ctx).expect("serialize");
        assert_eq!(described.id(), SerializedId::ROOT);
    }

    #[test]
    fn ids_are_stable_across_reserialization() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        let text = tree.create_text("hi");
        tree.append_child(root, div).unwrap();
        tree.append_child(div, text).unwrap();

        let (policy, mut ids, mut pool) = ctx_parts();
        let mut ctx = SerializeCtx::new(&policy, &mut ids, &mut pool);
        let first = serialize_tree(&tree, &mut ctx).expect("serialize");
        let second = serialize_tree(&tree, &mut ctx).expect("serialize");
        assert_eq!(first, second);
    }

    #[test]
    fn whitespace_between_siblings_is_excluded() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        let a = tree.create_element("a");
        let ws = tree.create_text("\n   ");
        let b = tree.create_element("b");
        tree.append_child(root, div).unwrap();
        tree.append_child(div, a).unwrap();
        tree.append_child(div, ws).unwrap();
        tree.append_child(div, b).unwrap();

        let (policy, mut ids, mut pool) = ctx_parts();
        let mut ctx = SerializeCtx::new(&policy, &mut ids, &mut pool);
        let described = serialize_tree(&tree, &mut ctx).expect("serialize");
        let div_node = &described.children()[0];
        assert_eq!(div_node.children().len(), 2);
        assert!(!pool.root().unwrap().has_key(ws));
    }

    #[test]
    fn blocked_element_becomes_placeholder() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        let secret = tree.create_text("secret");
        tree.append_child(root, div).unwrap();
        tree.append_child(div, secret).unwrap();
        tree.set_attr(div, BLOCK_ATTR, "").unwrap();
        tree.set_attr(div, "width", "120").unwrap();
        tree.set_attr(div, "height", "40").unwrap();

        let (policy, mut ids, mut pool) = ctx_parts();
        let mut ctx = SerializeCtx::new(&policy, &mut ids, &mut pool);
        let described = serialize_tree(&tree, &mut ctx).expect("serialize");
        let DescribedNode::Element {
            attributes,
            child_nodes,
            need_block,
            ..
        } = &described.children()[0]
        else {
            panic!("expected element");
        };
        assert!(*need_block);
        assert!(child_nodes.is_empty());
        assert_eq!(
            attributes.get(reserved::BLOCK_WIDTH),
            Some(&AttrValue::from("120"))
        );
        assert!(!pool.root().unwrap().has_key(secret));
    }

    #[test]
    fn input_value_is_masked_when_policy_says_so() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let input = tree.create_element("input");
        tree.append_child(root, input).unwrap();
        tree.element_state_mut(input).unwrap().value = Some("hunter2".to_string());

        let mut policy = RecordPolicy::default();
        policy.mask_inputs = true;
        let mut ids = IdAllocator::new();
        let mut pool = MirrorPool::new();
        let mut ctx = SerializeCtx::new(&policy, &mut ids, &mut pool);
        let described = serialize_tree(&tree, &mut ctx).expect("serialize");
        let DescribedNode::Element { attributes, .. } = &described.children()[0] else {
            panic!("expected element");
        };
        assert_eq!(attributes.get("value"), Some(&AttrValue::from("*******")));
    }

    #[test]
    fn stylesheet_link_is_inlined() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let link = tree.create_element("link");
        tree.append_child(root, link).unwrap();
        tree.set_attr(link, "rel", "stylesheet").unwrap();
        tree.set_attr(link, "href", "/app.css").unwrap();
        tree.element_state_mut(link).unwrap().resolved_content =
            Some("body { margin: 0 }".to_string());

        let (policy, mut ids, mut pool) = ctx_parts();
        let mut ctx = SerializeCtx::new(&policy, &mut ids, &mut pool);
        let described = serialize_tree(&tree, &mut ctx).expect("serialize");
        let DescribedNode::Element {
            tag_name,
            attributes,
            child_nodes,
            ..
        } = &described.children()[0]
        else {
            panic!("expected element");
        };
        assert_eq!(tag_name, "style");
        assert!(!attributes.contains_key("href"));
        let DescribedNode::Text {
            content,
            is_style_owner,
            ..
        } = &child_nodes[0]
        else {
            panic!("expected text");
        };
        assert_eq!(content, "body { margin: 0 }");
        assert!(is_style_owner);
    }

    #[test]
    fn nested_document_uses_its_own_mirror() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let iframe = tree.create_element("iframe");
        tree.append_child(root, iframe).unwrap();
        tree.attach_document(iframe).unwrap();
        let inner = tree.nested_document_mut(iframe).unwrap();
        let inner_root = inner.root();
        let p = inner.create_element("p");
        inner.append_child(inner_root, p).unwrap();

        let (policy, mut ids, mut pool) = ctx_parts();
        let mut ctx = SerializeCtx::new(&policy, &mut ids, &mut pool);
        let described = serialize_tree(&tree, &mut ctx).expect("serialize");

        let DescribedNode::Element { child_nodes, .. } = &described.children()[0] else {
            panic!("expected iframe element");
        };
        let DescribedNode::Document { id: inner_id, .. } = &child_nodes[0] else {
            panic!("expected nested document");
        };
        // Ids stay session-unique across trees.
        assert_ne!(*inner_id, described.id());
        let nested_mirror = pool.mirror(&[iframe]).expect("nested mirror");
        assert_eq!(nested_mirror.get_id(inner_root), Some(*inner_id));
        assert!(pool.root().unwrap().has_key(iframe));
    }

    #[test]
    fn sheet_rules_and_canvas_ops_ride_reserved_attributes() {
        use crate::tree::SheetRuleEdit;

        let mut tree = DocTree::new();
        let root = tree.root();
        let style = tree.create_element("style");
        let canvas = tree.create_element("canvas");
        tree.append_child(root, style).unwrap();
        tree.append_child(root, canvas).unwrap();
        tree.element_state_mut(style).unwrap().sheet_rules = vec![
            SheetRuleEdit::Insert {
                index: 0,
                rule: ".a { color: red }".to_string(),
            },
            SheetRuleEdit::Delete { index: 1 },
        ];
        tree.element_state_mut(canvas).unwrap().canvas_ops =
            vec!["fillRect(0,0,8,8)".to_string()];

        let mut policy = RecordPolicy::default();
        policy.capture_canvas = true;
        let mut ids = IdAllocator::new();
        let mut pool = MirrorPool::new();
        let mut ctx = SerializeCtx::new(&policy, &mut ids, &mut pool);
        let described = serialize_tree(&tree, &mut ctx).expect("serialize");

        let DescribedNode::Element { attributes, .. } = &described.children()[0] else {
            panic!("expected style element");
        };
        let rules = attributes
            .get(reserved::SHEET_RULES)
            .and_then(AttrValue::as_str)
            .expect("sheet rule edits");
        assert!(rules.contains("insert"), "edits ride as JSON: {rules}");
        let DescribedNode::Element { attributes, .. } = &described.children()[1] else {
            panic!("expected canvas element");
        };
        let ops = attributes
            .get(reserved::CANVAS_OPS)
            .and_then(AttrValue::as_str)
            .expect("drawing operations");
        assert!(ops.contains("fillRect"));
    }

    #[test]
    fn scroll_offsets_ride_reserved_attributes() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let div = tree.create_element("div");
        tree.append_child(root, div).unwrap();
        tree.element_state_mut(div).unwrap().scroll = Some((4, 250));

        let (policy, mut ids, mut pool) = ctx_parts();
        let mut ctx = SerializeCtx::new(&policy, &mut ids, &mut pool);
        let described = serialize_tree(&tree, &mut ctx).expect("serialize");
        let DescribedNode::Element { attributes, .. } = &described.children()[0] else {
            panic!("expected element");
        };
        assert_eq!(
            attributes.get(reserved::SCROLL_TOP),
            Some(&AttrValue::Num(250.0))
        );
    }
}
