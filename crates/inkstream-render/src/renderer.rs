//! The instruction interpreter.
//!
//! Applies an ordered instruction stream to the output tree. Owns the render
//! cursor, the current list, the current table and the open code container.
//! Nodes are only ever appended; once the cursor moves away from a node it is
//! never structurally reopened (a pending reveal may still be writing text
//! into it).
//!
//! Security invariant: content handed to a code container goes through the
//! literal-text path only, never through the sanitizer or any markup
//! interpretation, regardless of what characters it contains.

use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::sync::Mutex;

use crate::collab::{
    self, Highlighter, MarkdownSanitizer, PassthroughHighlighter, Sanitizer,
};
use crate::instruction::Instruction;
use crate::reveal::{RevealPacing, RevealQueue};
use crate::tree::{NodeId, NodeKind, OutputTree};

#[derive(Debug, Clone, Copy)]
struct OpenList {
    node: NodeId,
    ordered: bool,
}

#[derive(Debug, Clone)]
struct OpenCode {
    node: NodeId,
    language: Option<String>,
}

/// Interprets instructions into mutations of a persistent output tree.
///
/// One renderer is owned by exactly one output target/session; concurrent
/// instruction streams need separate instances. Construction spawns the
/// reveal worker and therefore requires a tokio runtime.
pub struct Renderer {
    tree: Arc<Mutex<OutputTree>>,
    reveal: RevealQueue,
    sanitizer: Arc<dyn Sanitizer>,
    highlighter: Arc<dyn Highlighter>,
    cursor: Option<NodeId>,
    list: Option<OpenList>,
    table: Option<NodeId>,
    code: Option<OpenCode>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self::with_collaborators(
            Arc::new(MarkdownSanitizer),
            Arc::new(PassthroughHighlighter),
            RevealPacing::default(),
        )
    }

    pub fn with_pacing(pacing: RevealPacing) -> Self {
        Self::with_collaborators(
            Arc::new(MarkdownSanitizer),
            Arc::new(PassthroughHighlighter),
            pacing,
        )
    }

    pub fn with_collaborators(
        sanitizer: Arc<dyn Sanitizer>,
        highlighter: Arc<dyn Highlighter>,
        pacing: RevealPacing,
    ) -> Self {
        let tree = Arc::new(Mutex::new(OutputTree::new()));
        let reveal = RevealQueue::new(Arc::clone(&tree), pacing);
        Self {
            tree,
            reveal,
            sanitizer,
            highlighter,
            cursor: None,
            list: None,
            table: None,
            code: None,
        }
    }

    /// Shared handle to the output tree.
    pub fn tree(&self) -> Arc<Mutex<OutputTree>> {
        Arc::clone(&self.tree)
    }

    /// Applies each instruction in order. Instructions already applied stay
    /// committed if a later one fails.
    pub async fn render(&mut self, instructions: Vec<Instruction>) -> Result<()> {
        for instruction in instructions {
            tracing::debug!(kind = %instruction.kind(), "applying instruction");
            self.apply(instruction).await?;
        }
        Ok(())
    }

    /// Discards all tree content and resets cursor/list/table state and the
    /// pending reveal queue. Queued reveal text is aborted, not rolled back.
    pub async fn clear(&mut self) {
        self.reveal.clear().await;
        self.tree.lock().await.clear();
        self.cursor = None;
        self.list = None;
        self.table = None;
        self.code = None;
    }

    /// Stops the reveal worker. The tree keeps whatever was already revealed.
    pub fn dispose(&self) {
        self.reveal.shutdown();
    }

    /// Waits until every reveal queued so far has landed in the tree.
    pub async fn flush(&self) {
        self.reveal.flush().await;
    }

    /// Plain-text serialization of the current tree.
    pub async fn serialize(&self) -> String {
        self.tree.lock().await.to_text()
    }

    async fn apply(&mut self, instruction: Instruction) -> Result<()> {
        match instruction {
            Instruction::RawText { content } => self.raw_text(&content).await,
            Instruction::AppendText { content } => self.append_text(&content).await,
            Instruction::Heading { level, content } => {
                self.open_block(NodeKind::Heading, Some(level), &content).await
            }
            Instruction::Paragraph { content } => {
                self.open_block(NodeKind::Paragraph, None, &content).await
            }
            Instruction::Blockquote { content } => {
                self.open_block(NodeKind::Blockquote, None, &content).await
            }
            Instruction::StartCodeBlock { language } => self.start_code_block(language).await,
            Instruction::CodeLine { content } => self.code_line(&content).await,
            Instruction::EndCodeBlock => self.end_code_block().await,
            Instruction::UnorderedListItem { content } => {
                self.list_item(false, None, &content).await
            }
            Instruction::OrderedListItem { number, content } => {
                self.list_item(true, Some(number), &content).await
            }
            Instruction::HorizontalRule => self.horizontal_rule().await,
            Instruction::StartTable { headers } => self.start_table(&headers).await,
            Instruction::TableRow { cells } => self.table_row(&cells).await,
            Instruction::EndTable => {
                // The table node itself stays in the tree.
                self.table = None;
                Ok(())
            }
        }
    }

    /// Appends literal text to a dedicated raw node, creating one only when
    /// the cursor is not already on a raw node. Repeated calls accumulate.
    async fn raw_text(&mut self, content: &str) -> Result<()> {
        let mut tree = self.tree.lock().await;
        if let Some(node) = self.cursor
            && tree.kind(node) == Some(NodeKind::Raw)
        {
            return tree.push_text(node, content);
        }
        let root = tree.root();
        let node = tree.create_node(NodeKind::Raw);
        tree.append_child(root, node)?;
        tree.push_text(node, content)?;
        self.cursor = Some(node);
        Ok(())
    }

    /// Appends into the current cursor node when one is open, otherwise
    /// degrades to raw-text accumulation. Routed through the reveal queue so
    /// it cannot overtake text still being revealed into the same node.
    async fn append_text(&mut self, content: &str) -> Result<()> {
        let Some(node) = self.cursor else {
            return self.raw_text(content).await;
        };
        let is_raw = self.tree.lock().await.kind(node) == Some(NodeKind::Raw);
        if is_raw {
            return self.tree.lock().await.push_text(node, content);
        }
        let (text, _) = self.safe_or_literal(content);
        self.reveal.enqueue(node, text).await;
        Ok(())
    }

    /// Opens a heading/paragraph/blockquote node and streams content into it.
    /// Finishes the previous cursor node without breaking the current list.
    async fn open_block(
        &mut self,
        kind: NodeKind,
        level: Option<u8>,
        content: &str,
    ) -> Result<()> {
        self.finish_cursor().await?;
        let node = {
            let mut tree = self.tree.lock().await;
            let root = tree.root();
            let node = tree.create_node(kind);
            if let Some(level) = level {
                tree.set_attr(node, "level", &level.to_string())?;
            }
            tree.append_child(root, node)?;
            node
        };
        self.cursor = Some(node);
        self.stream_into(node, content).await
    }

    async fn start_code_block(&mut self, language: Option<String>) -> Result<()> {
        self.finish_cursor().await?;
        // Code blocks break list continuity.
        self.list = None;
        let language = language.filter(|tag| collab::is_valid_language_tag(tag));
        let mut tree = self.tree.lock().await;
        let root = tree.root();
        let node = tree.create_node(NodeKind::CodeBlock);
        if let Some(lang) = &language {
            tree.set_attr(node, "language", lang)?;
        }
        tree.append_child(root, node)?;
        drop(tree);
        self.cursor = Some(node);
        self.code = Some(OpenCode { node, language });
        Ok(())
    }

    async fn code_line(&mut self, content: &str) -> Result<()> {
        let Some(code) = &self.code else {
            tracing::warn!("code_line with no open code container; kept as raw text");
            return self.raw_text(content).await;
        };
        // Literal text only; the security invariant lives here.
        self.tree.lock().await.push_text(code.node, content)
    }

    async fn end_code_block(&mut self) -> Result<()> {
        let Some(OpenCode { node, language }) = self.code.take() else {
            tracing::warn!("end_code_block with no open code container; ignored");
            return Ok(());
        };
        {
            let mut tree = self.tree.lock().await;
            self.apply_highlight(&mut tree, node, language.as_deref())?;
        }
        self.cursor = self.tree.lock().await.parent(node);
        self.finish_cursor().await
    }

    /// Re-applies highlighting to an already-rendered code container, e.g.
    /// after constructing the renderer with a different highlighter.
    pub async fn rehighlight_code(&self, node: NodeId) -> Result<()> {
        let mut tree = self.tree.lock().await;
        if tree.kind(node) != Some(NodeKind::CodeBlock) {
            bail!("node {node:?} is not a code container");
        }
        let language = tree.attr(node, "language").map(str::to_string);
        self.apply_highlight(&mut tree, node, language.as_deref())
    }

    /// Runs the highlighter over a code node: language-specific when the tag
    /// is recognized, auto-detection otherwise. Failure keeps the plain text.
    fn apply_highlight(
        &self,
        tree: &mut OutputTree,
        node: NodeId,
        language: Option<&str>,
    ) -> Result<()> {
        let source = tree.text(node).unwrap_or_default().to_string();
        let recognized = language.filter(|lang| self.highlighter.supports_language(lang));
        match self.highlighter.highlight(&source, recognized) {
            Ok(highlighted) => {
                tree.set_text(node, &highlighted.value)?;
                if let Some(lang) = highlighted.language {
                    tree.set_attr(node, "language", &lang)?;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "highlighter failed; code left plain");
            }
        }
        Ok(())
    }

    async fn list_item(
        &mut self,
        ordered: bool,
        number: Option<u64>,
        content: &str,
    ) -> Result<()> {
        self.finish_cursor().await?;
        let list = self.ensure_list(ordered).await?;
        let (text, was_markup) = self.safe_or_literal(content);
        let mut tree = self.tree.lock().await;
        let item = tree.create_node(NodeKind::ListItem);
        if let Some(number) = number {
            // Source numbering survives chunk boundaries verbatim.
            tree.set_attr(item, "value", &number.to_string())?;
        }
        if was_markup {
            tree.set_attr(item, "markup", "inline")?;
        }
        tree.set_text(item, &text)?;
        tree.append_child(list, item)
    }

    /// Reuses the open list when the kind matches; otherwise the open list is
    /// closed for good and a fresh list node starts.
    async fn ensure_list(&mut self, ordered: bool) -> Result<NodeId> {
        if let Some(open) = &self.list
            && open.ordered == ordered
        {
            return Ok(open.node);
        }
        let mut tree = self.tree.lock().await;
        let root = tree.root();
        let node = tree.create_node(NodeKind::List);
        tree.set_attr(node, "ordered", if ordered { "true" } else { "false" })?;
        tree.append_child(root, node)?;
        self.list = Some(OpenList { node, ordered });
        Ok(node)
    }

    async fn horizontal_rule(&mut self) -> Result<()> {
        self.finish_cursor().await?;
        // A rule does not by itself close the current list.
        let mut tree = self.tree.lock().await;
        let root = tree.root();
        let node = tree.create_node(NodeKind::Rule);
        tree.append_child(root, node)
    }

    async fn start_table(&mut self, headers: &[String]) -> Result<()> {
        self.finish_cursor().await?;
        // Tables break list continuity, same as code blocks.
        self.list = None;
        let cells: Vec<(String, bool)> = headers
            .iter()
            .map(|cell| self.safe_or_literal(cell))
            .collect();
        let mut tree = self.tree.lock().await;
        let root = tree.root();
        let table = tree.create_node(NodeKind::Table);
        tree.append_child(root, table)?;
        if !cells.is_empty() {
            let row = tree.create_node(NodeKind::TableRow);
            tree.set_attr(row, "header", "true")?;
            tree.append_child(table, row)?;
            Self::append_cells(&mut tree, row, &cells)?;
        }
        drop(tree);
        self.table = Some(table);
        Ok(())
    }

    async fn table_row(&mut self, row_cells: &[String]) -> Result<()> {
        let Some(table) = self.table else {
            tracing::warn!("table_row with no open table; skipped");
            return Ok(());
        };
        let cells: Vec<(String, bool)> = row_cells
            .iter()
            .map(|cell| self.safe_or_literal(cell))
            .collect();
        let mut tree = self.tree.lock().await;
        let row = tree.create_node(NodeKind::TableRow);
        tree.append_child(table, row)?;
        Self::append_cells(&mut tree, row, &cells)
    }

    fn append_cells(
        tree: &mut OutputTree,
        row: NodeId,
        cells: &[(String, bool)],
    ) -> Result<()> {
        for (text, was_markup) in cells {
            let cell = tree.create_node(NodeKind::TableCell);
            if *was_markup {
                tree.set_attr(cell, "markup", "inline")?;
            }
            tree.set_text(cell, text)?;
            tree.append_child(row, cell)?;
        }
        Ok(())
    }

    /// Finishes the current cursor node: prunes a whitespace-only paragraph,
    /// clears the cursor, and deliberately leaves the current list open.
    async fn finish_cursor(&mut self) -> Result<()> {
        let Some(node) = self.cursor.take() else {
            return Ok(());
        };
        let prunable = {
            let tree = self.tree.lock().await;
            tree.kind(node) == Some(NodeKind::Paragraph)
                && tree.text(node).is_some_and(|text| text.trim().is_empty())
                && tree.children(node).is_empty()
        };
        if prunable && !self.reveal.is_pending(node).await {
            self.tree.lock().await.remove(node)?;
        }
        Ok(())
    }

    /// Streams block content: markup-bearing text is sanitized and inserted
    /// atomically, everything else is queued for character reveal.
    async fn stream_into(&self, node: NodeId, content: &str) -> Result<()> {
        if content.is_empty() {
            return Ok(());
        }
        if collab::contains_markup(content) {
            let (text, was_markup) = self.safe_or_literal(content);
            let mut tree = self.tree.lock().await;
            tree.set_text(node, &text)?;
            if was_markup {
                tree.set_attr(node, "markup", "inline")?;
            }
            return Ok(());
        }
        self.reveal.enqueue(node, content.to_string()).await;
        Ok(())
    }

    /// Sanitizes markup-bearing content; keeps the literal text when the
    /// content is plain, the sanitizer is unavailable, or sanitizing fails.
    fn safe_or_literal(&self, content: &str) -> (String, bool) {
        if collab::contains_markup(content) && self.sanitizer.is_ready() {
            match self.sanitizer.sanitize(content) {
                Ok(safe) => return (safe, true),
                Err(err) => {
                    tracing::warn!(error = %err, "sanitizer failed; keeping literal content");
                }
            }
        }
        (content.to_string(), false)
    }
}
