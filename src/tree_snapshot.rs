//! Deterministic tree rendering and equality rules for round-trip tests.
//! Not a public stable format; intended for internal test comparisons.
//!
//! Equivalence rules:
//! - Node kinds must match.
//! - Element tags must match; attributes compare as sorted name/value pairs.
//! - Text, comment, and doctype content must match exactly.
//! - Arena keys never compare: two trees built independently are equal when
//!   their structure and content are.
//! - Element side state (scroll, value, media) compares only when the
//!   options ask for it.

use crate::tree::{DocTree, NodeData, NodeKey};
use std::fmt::{self, Write};

#[derive(Clone, Copy, Debug)]
pub struct TreeSnapshotOptions {
    pub include_state: bool,
    pub include_nested: bool,
}

impl Default for TreeSnapshotOptions {
    fn default() -> Self {
        Self {
            include_state: false,
            include_nested: true,
        }
    }
}

#[derive(Debug)]
pub struct TreeSnapshot {
    lines: Vec<String>,
}

impl TreeSnapshot {
    pub fn new(tree: &DocTree, options: TreeSnapshotOptions) -> Self {
        let mut lines = Vec::new();
        walk_snapshot(tree, tree.root(), &options, 0, &mut lines);
        Self { lines }
    }

    pub fn as_lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

impl fmt::Display for TreeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            if i != 0 {
                f.write_str("\n")?;
            }
            f.write_str(line)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct TreeMismatch {
    path: String,
    detail: String,
    expected: String,
    actual: String,
}

impl fmt::Display for TreeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "tree mismatch at {}: {}", self.path, self.detail)?;
        writeln!(f, "expected: {}", self.expected)?;
        writeln!(f, "actual:   {}", self.actual)?;
        Ok(())
    }
}

impl std::error::Error for TreeMismatch {}

pub fn assert_tree_eq(expected: &DocTree, actual: &DocTree, options: TreeSnapshotOptions) {
    if let Err(mismatch) = compare_trees(expected, actual, options) {
        panic!("{mismatch}");
    }
}

pub fn compare_trees(
    expected: &DocTree,
    actual: &DocTree,
    options: TreeSnapshotOptions,
) -> Result<(), Box<TreeMismatch>> {
    let mut path = vec![node_label(expected, expected.root())];
    compare_nodes(
        expected,
        expected.root(),
        actual,
        actual.root(),
        &options,
        &mut path,
    )
}

fn compare_nodes(
    expected: &DocTree,
    expected_key: NodeKey,
    actual: &DocTree,
    actual_key: NodeKey,
    options: &TreeSnapshotOptions,
    path: &mut Vec<String>,
) -> Result<(), Box<TreeMismatch>> {
    let expected_data = expected
        .data(expected_key)
        .map_err(|err| mismatch(path, &err.to_string(), "", ""))?;
    let actual_data = actual
        .data(actual_key)
        .map_err(|err| mismatch(path, &err.to_string(), "", ""))?;

    let expected_line = node_line(expected, expected_key, options);
    let actual_line = node_line(actual, actual_key, options);
    match (expected_data, actual_data) {
        (NodeData::Document { .. }, NodeData::Document { .. })
        | (NodeData::Cdata, NodeData::Cdata) => {}
        (NodeData::Doctype { .. }, NodeData::Doctype { .. })
        | (NodeData::Text { .. }, NodeData::Text { .. })
        | (NodeData::Comment { .. }, NodeData::Comment { .. })
        | (NodeData::Element { .. }, NodeData::Element { .. }) => {}
        _ => {
            return Err(mismatch(path, "node kind", &expected_line, &actual_line));
        }
    }
    if expected_line != actual_line {
        return Err(mismatch(path, "node content", &expected_line, &actual_line));
    }

    if options.include_nested {
        match (
            expected.nested_document(expected_key),
            actual.nested_document(actual_key),
        ) {
            (Some(expected_doc), Some(actual_doc)) => {
                path.push("#content-document".to_string());
                let result = compare_nodes(
                    expected_doc,
                    expected_doc.root(),
                    actual_doc,
                    actual_doc.root(),
                    options,
                    path,
                );
                path.pop();
                result?;
            }
            (None, None) => {}
            _ => {
                return Err(mismatch(
                    path,
                    "content document presence",
                    &expected_line,
                    &actual_line,
                ));
            }
        }
    }

    let expected_children = expected.children(expected_key);
    let actual_children = actual.children(actual_key);
    if expected_children.len() != actual_children.len() {
        return Err(mismatch(
            path,
            &format!(
                "child count (expected {}, actual {})",
                expected_children.len(),
                actual_children.len()
            ),
            &expected_line,
            &actual_line,
        ));
    }
    for (idx, (&exp, &act)) in expected_children.iter().zip(actual_children.iter()).enumerate() {
        path.push(format!("{}[{}]", node_label(expected, exp), idx));
        let result = compare_nodes(expected, exp, actual, act, options, path);
        path.pop();
        result?;
    }
    Ok(())
}

fn mismatch(path: &[String], detail: &str, expected: &str, actual: &str) -> Box<TreeMismatch> {
    Box::new(TreeMismatch {
        path: format!("/{}", path.join("/")),
        detail: detail.to_string(),
        expected: truncate_line(expected.to_string(), 160),
        actual: truncate_line(actual.to_string(), 160),
    })
}

fn truncate_line(mut line: String, max_len: usize) -> String {
    if line.len() > max_len {
        line.truncate(max_len.saturating_sub(3));
        line.push_str("...");
    }
    line
}

fn node_label(tree: &DocTree, key: NodeKey) -> String {
    match tree.data(key) {
        Ok(NodeData::Document { .. }) => "#document".to_string(),
        Ok(NodeData::Doctype { .. }) => "#doctype".to_string(),
        Ok(NodeData::Element { tag, attrs, .. }) => {
            let mut label = tag.clone();
            if let Some(id) = attrs.get("id").filter(|v| !v.is_empty()) {
                label.push('#');
                write_escaped(&mut label, id);
            }
            label
        }
        Ok(NodeData::Text { .. }) => "#text".to_string(),
        Ok(NodeData::Cdata) => "#cdata".to_string(),
        Ok(NodeData::Comment { .. }) => "#comment".to_string(),
        Err(_) => "#invalid".to_string(),
    }
}

fn walk_snapshot(
    tree: &DocTree,
    key: NodeKey,
    options: &TreeSnapshotOptions,
    indent: usize,
    out: &mut Vec<String>,
) {
    let mut line = " ".repeat(indent * 2);
    line.push_str(&node_line(tree, key, options));
    out.push(line);
    if options.include_nested {
        if let Some(doc) = tree.nested_document(key) {
            walk_snapshot(doc, doc.root(), options, indent + 1, out);
        }
    }
    for &child in tree.children(key) {
        walk_snapshot(tree, child, options, indent + 1, out);
    }
}

fn node_line(tree: &DocTree, key: NodeKey, options: &TreeSnapshotOptions) -> String {
    let mut out = String::new();
    match tree.data(key) {
        Ok(NodeData::Document { compat_mode }) => {
            out.push_str("#document");
            if let Some(mode) = compat_mode {
                let _ = write!(out, " compat=\"{mode}\"");
            }
        }
        Ok(NodeData::Doctype {
            name,
            public_id,
            system_id,
        }) => {
            let _ = write!(out, "<!DOCTYPE {name}");
            if !public_id.is_empty() || !system_id.is_empty() {
                let _ = write!(out, " \"{public_id}\" \"{system_id}\"");
            }
            out.push('>');
        }
        Ok(NodeData::Element {
            tag, attrs, state, ..
        }) => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                write_escaped(&mut out, value);
                out.push('"');
            }
            out.push('>');
            if options.include_state {
                if let Some((left, top)) = state.scroll {
                    let _ = write!(out, " scroll=({left},{top})");
                }
                if let Some(value) = &state.value {
                    out.push_str(" value=\"");
                    write_escaped(&mut out, value);
                    out.push('"');
                }
                if let Some(checked) = state.checked {
                    let _ = write!(out, " checked={checked}");
                }
            }
        }
        Ok(NodeData::Text { content }) => {
            out.push('"');
            write_escaped(&mut out, content);
            out.push('"');
        }
        Ok(NodeData::Cdata) => out.push_str("#cdata"),
        Ok(NodeData::Comment { content }) => {
            out.push_str("<!-- ");
            write_escaped(&mut out, content);
            out.push_str(" -->");
        }
        Err(_) => out.push_str("#invalid"),
    }
    out
}

fn write_escaped(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ if ch.is_ascii() => out.push(ch),
            _ => {
                let _ = write!(out, "\\u{{{:X}}}", ch as u32);
            }
        }
    }
}
