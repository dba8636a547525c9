//! Render instructions produced by the chunk parser.

use serde::{Deserialize, Serialize};

/// A single structural or textual command describing one unit of content.
///
/// Instructions are produced by a [`ChunkParser`](crate::parser::ChunkParser),
/// applied exactly once by the [`Renderer`](crate::renderer::Renderer) and
/// never retained afterwards. The enum is closed: dispatch is an exhaustive
/// `match`, so a malformed or unrecognized command cannot reach the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    /// Literal text outside any structural element.
    RawText { content: String },
    /// Text appended to whatever node the cursor currently targets.
    AppendText { content: String },
    /// Heading with level 1..=6. Empty content is valid (chunk-boundary
    /// artifact) and produces an empty heading node.
    Heading { level: u8, content: String },
    Paragraph { content: String },
    /// Opens a code container. The language tag is advisory and is dropped
    /// unless it matches a strict identifier pattern.
    StartCodeBlock { language: Option<String> },
    /// One literal line of code, only meaningful while a code container is
    /// open. Content is never interpreted as markup.
    CodeLine { content: String },
    EndCodeBlock,
    UnorderedListItem { content: String },
    /// Ordered item carrying its source numbering, which is preserved
    /// verbatim regardless of the item's index in the list node.
    OrderedListItem { number: u64, content: String },
    Blockquote { content: String },
    HorizontalRule,
    StartTable { headers: Vec<String> },
    TableRow { cells: Vec<String> },
    EndTable,
}

impl Instruction {
    pub fn kind(&self) -> InstructionKind {
        match self {
            Instruction::RawText { .. } => InstructionKind::RawText,
            Instruction::AppendText { .. } => InstructionKind::AppendText,
            Instruction::Heading { .. } => InstructionKind::Heading,
            Instruction::Paragraph { .. } => InstructionKind::Paragraph,
            Instruction::StartCodeBlock { .. } => InstructionKind::StartCodeBlock,
            Instruction::CodeLine { .. } => InstructionKind::CodeLine,
            Instruction::EndCodeBlock => InstructionKind::EndCodeBlock,
            Instruction::UnorderedListItem { .. } => InstructionKind::UnorderedListItem,
            Instruction::OrderedListItem { .. } => InstructionKind::OrderedListItem,
            Instruction::Blockquote { .. } => InstructionKind::Blockquote,
            Instruction::HorizontalRule => InstructionKind::HorizontalRule,
            Instruction::StartTable { .. } => InstructionKind::StartTable,
            Instruction::TableRow { .. } => InstructionKind::TableRow,
            Instruction::EndTable => InstructionKind::EndTable,
        }
    }

    /// Short single-line preview of the instruction's content, truncated for
    /// diagnostic capture.
    pub fn preview(&self, max_chars: usize) -> String {
        let content = match self {
            Instruction::RawText { content }
            | Instruction::AppendText { content }
            | Instruction::Heading { content, .. }
            | Instruction::Paragraph { content }
            | Instruction::CodeLine { content }
            | Instruction::UnorderedListItem { content }
            | Instruction::OrderedListItem { content, .. }
            | Instruction::Blockquote { content } => content.as_str(),
            Instruction::StartCodeBlock { language } => language.as_deref().unwrap_or(""),
            Instruction::StartTable { headers } => {
                return truncate_chars(&headers.join("|"), max_chars);
            }
            Instruction::TableRow { cells } => {
                return truncate_chars(&cells.join("|"), max_chars);
            }
            Instruction::EndCodeBlock
            | Instruction::HorizontalRule
            | Instruction::EndTable => "",
        };
        truncate_chars(content, max_chars)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.replace('\n', "\\n");
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}…", truncated.replace('\n', "\\n"))
}

/// Discriminant-only view of an instruction, used for histograms, operation
/// sequences and pattern rules.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    RawText,
    AppendText,
    Heading,
    Paragraph,
    StartCodeBlock,
    CodeLine,
    EndCodeBlock,
    UnorderedListItem,
    OrderedListItem,
    Blockquote,
    HorizontalRule,
    StartTable,
    TableRow,
    EndTable,
}

impl InstructionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InstructionKind::RawText => "raw_text",
            InstructionKind::AppendText => "append_text",
            InstructionKind::Heading => "heading",
            InstructionKind::Paragraph => "paragraph",
            InstructionKind::StartCodeBlock => "start_code_block",
            InstructionKind::CodeLine => "code_line",
            InstructionKind::EndCodeBlock => "end_code_block",
            InstructionKind::UnorderedListItem => "unordered_list_item",
            InstructionKind::OrderedListItem => "ordered_list_item",
            InstructionKind::Blockquote => "blockquote",
            InstructionKind::HorizontalRule => "horizontal_rule",
            InstructionKind::StartTable => "start_table",
            InstructionKind::TableRow => "table_row",
            InstructionKind::EndTable => "end_table",
        }
    }
}

impl std::fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let instruction = Instruction::OrderedListItem {
            number: 7,
            content: "seven".to_string(),
        };
        assert_eq!(instruction.kind(), InstructionKind::OrderedListItem);
        assert_eq!(instruction.kind().as_str(), "ordered_list_item");
    }

    #[test]
    fn serde_round_trip_uses_snake_case_tags() {
        let instruction = Instruction::StartCodeBlock {
            language: Some("rust".to_string()),
        };
        let json = serde_json::to_string(&instruction).expect("serialize");
        assert!(json.contains("\"start_code_block\""), "got {json}");
        let back: Instruction = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, instruction);
    }

    #[test]
    fn preview_truncates_and_escapes_newlines() {
        let instruction = Instruction::CodeLine {
            content: "let x = 1;\n".to_string(),
        };
        assert_eq!(instruction.preview(40), "let x = 1;\\n");

        let long = Instruction::Paragraph {
            content: "a".repeat(50),
        };
        let preview = long.preview(10);
        assert_eq!(preview.chars().count(), 11); // 10 chars + ellipsis
    }
}
