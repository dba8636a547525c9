//! Append-only output tree.
//!
//! An arena of nodes rooted at a render target. Instructions only ever append
//! to the tree; the single exception is empty-paragraph pruning, which detaches
//! a node and tombstones it. Tombstoned slots are never reused, so a `NodeId`
//! handed out once stays unambiguous for the lifetime of the tree.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::Serialize;

/// Index into the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

/// Structural node kinds, mirroring the instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Root,
    Raw,
    Heading,
    Paragraph,
    CodeBlock,
    List,
    ListItem,
    Blockquote,
    Rule,
    Table,
    TableRow,
    TableCell,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    text: String,
    attrs: BTreeMap<String, String>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    removed: bool,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            text: String::new(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
            parent: None,
            removed: false,
        }
    }
}

/// The persistent output tree mutated by the renderer.
#[derive(Debug)]
pub struct OutputTree {
    nodes: Vec<Node>,
}

impl Default for OutputTree {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Root)],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Discards all content, leaving a fresh root. Previously issued ids are
    /// invalidated.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(Node::new(NodeKind::Root));
    }

    pub fn create_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(kind));
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.live(parent)?;
        self.live(child)?;
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        Ok(())
    }

    pub fn push_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        self.live(id)?;
        self.nodes[id.0].text.push_str(text);
        Ok(())
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        self.live(id)?;
        self.nodes[id.0].text.clear();
        self.nodes[id.0].text.push_str(text);
        Ok(())
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        self.live(id)?;
        self.nodes[id.0]
            .attrs
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// Detaches the node from its parent and tombstones it. The slot is not
    /// reused.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        self.live(id)?;
        if id == self.root() {
            bail!("cannot remove the root node");
        }
        if let Some(parent) = self.nodes[id.0].parent {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
        self.nodes[id.0].removed = true;
        Ok(())
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.get(id).map(|n| n.kind)
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.get(id).map(|n| n.text.as_str())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.get(id).and_then(|n| n.attrs.get(name)).map(String::as_str)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map_or(&[], |n| n.children.as_slice())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    pub fn is_removed(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_none_or(|n| n.removed)
    }

    /// Ids of all live nodes of the given kind, in document order.
    pub fn ids_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_kind(self.root(), kind, &mut out);
        out
    }

    fn collect_kind(&self, id: NodeId, kind: NodeKind, out: &mut Vec<NodeId>) {
        if let Some(node) = self.get(id) {
            if node.kind == kind {
                out.push(id);
            }
            for child in &node.children {
                self.collect_kind(*child, kind, out);
            }
        }
    }

    /// Plain-text serialization of the tree, used for output plausibility
    /// checks and test assertions.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for child in self.children(self.root()).to_vec() {
            self.write_node(child, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else { return };
        match node.kind {
            NodeKind::Root | NodeKind::List | NodeKind::Table => {
                for child in &node.children {
                    self.write_node(*child, out);
                }
            }
            NodeKind::Raw => out.push_str(&node.text),
            NodeKind::Heading | NodeKind::Paragraph => {
                out.push_str(&node.text);
                out.push('\n');
            }
            NodeKind::CodeBlock => out.push_str(&node.text),
            NodeKind::ListItem => {
                match node.attrs.get("value") {
                    Some(value) => {
                        out.push_str(value);
                        out.push_str(". ");
                    }
                    None => out.push_str("- "),
                }
                out.push_str(&node.text);
                out.push('\n');
            }
            NodeKind::Blockquote => {
                out.push_str("> ");
                out.push_str(&node.text);
                out.push('\n');
            }
            NodeKind::Rule => out.push_str("---\n"),
            NodeKind::TableRow => {
                let cells: Vec<&str> = node
                    .children
                    .iter()
                    .filter_map(|c| self.text(*c))
                    .collect();
                out.push_str(&cells.join(" | "));
                out.push('\n');
            }
            NodeKind::TableCell => out.push_str(&node.text),
        }
    }

    fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).filter(|n| !n.removed)
    }

    fn live(&self, id: NodeId) -> Result<()> {
        if self.get(id).is_none() {
            bail!("node {id:?} is removed or unknown");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_serialize() {
        let mut tree = OutputTree::new();
        let root = tree.root();
        let heading = tree.create_node(NodeKind::Heading);
        tree.append_child(root, heading).unwrap();
        tree.push_text(heading, "Title").unwrap();
        let paragraph = tree.create_node(NodeKind::Paragraph);
        tree.append_child(root, paragraph).unwrap();
        tree.push_text(paragraph, "Body text").unwrap();

        assert_eq!(tree.to_text(), "Title\nBody text\n");
    }

    #[test]
    fn remove_detaches_and_tombstones() {
        let mut tree = OutputTree::new();
        let paragraph = tree.create_node(NodeKind::Paragraph);
        tree.append_child(tree.root(), paragraph).unwrap();
        tree.remove(paragraph).unwrap();

        assert!(tree.is_removed(paragraph));
        assert!(tree.children(tree.root()).is_empty());
        assert!(tree.push_text(paragraph, "late").is_err());
    }

    #[test]
    fn ordered_item_serializes_with_source_value() {
        let mut tree = OutputTree::new();
        let list = tree.create_node(NodeKind::List);
        tree.append_child(tree.root(), list).unwrap();
        let item = tree.create_node(NodeKind::ListItem);
        tree.append_child(list, item).unwrap();
        tree.set_attr(item, "value", "5").unwrap();
        tree.push_text(item, "fifth").unwrap();

        assert_eq!(tree.to_text(), "5. fifth\n");
    }

    #[test]
    fn clear_invalidates_previous_ids() {
        let mut tree = OutputTree::new();
        let node = tree.create_node(NodeKind::Paragraph);
        tree.append_child(tree.root(), node).unwrap();
        tree.clear();

        assert!(tree.to_text().is_empty());
        // The old id points past the fresh arena now.
        assert!(tree.is_removed(node));
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut tree = OutputTree::new();
        assert!(tree.remove(tree.root()).is_err());
    }
}
