//! Chunk-parser contract and the reference line parser.
//!
//! The renderer consumes instructions and does not care where they come from;
//! this module defines the producing contract plus a newline-buffered
//! reference implementation used by the diagnostic runner and the end-to-end
//! tests. Chunks may split tokens anywhere; the parser only ever acts on
//! complete lines, everything else waits in the pending buffer.

use serde::Serialize;

use crate::instruction::Instruction;

/// Read-only state snapshot exposed for diagnostics. Lengths only: content
/// is redacted at the source so traces stay shareable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParserSnapshot {
    pub mode: String,
    pub state: String,
    pub pending_buffer_len: usize,
    pub pending_paragraph_len: usize,
}

/// Converts raw text chunks into ordered instruction sequences.
pub trait ChunkParser {
    /// Consumes one chunk; returns the instructions it completed. An empty
    /// result is normal whenever the chunk ended mid-element.
    fn process_chunk(&mut self, text: &str) -> Vec<Instruction>;

    /// Drains any pending partial element at end of stream.
    fn finalize(&mut self) -> Vec<Instruction>;

    /// Diagnostic snapshot of the parser's internal state.
    fn state(&self) -> ParserSnapshot;

    /// Resets to a pristine state so the parser can be reused across runs.
    fn reset(&mut self);
}

/// Newline-buffered markdown-line parser.
#[derive(Debug, Default)]
pub struct LineParser {
    /// Partial line waiting for its newline.
    buffer: String,
    /// Paragraph text accumulated across consecutive plain lines.
    paragraph: String,
    in_code: bool,
    table_open: bool,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_line(&mut self, line: &str, out: &mut Vec<Instruction>) {
        if self.in_code {
            if line.trim_start().starts_with("```") {
                out.push(Instruction::EndCodeBlock);
                self.in_code = false;
            } else {
                out.push(Instruction::CodeLine {
                    content: format!("{line}\n"),
                });
            }
            return;
        }

        if let Some(rest) = line.trim_start().strip_prefix("```") {
            self.flush_paragraph(out);
            self.close_table(out);
            let language = rest.trim();
            out.push(Instruction::StartCodeBlock {
                language: (!language.is_empty()).then(|| language.to_string()),
            });
            self.in_code = true;
            return;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            self.flush_paragraph(out);
            self.close_table(out);
            return;
        }

        if let Some((level, rest)) = heading(trimmed) {
            self.flush_paragraph(out);
            self.close_table(out);
            out.push(Instruction::Heading {
                level,
                content: rest.to_string(),
            });
            return;
        }

        if matches!(trimmed, "---" | "***" | "___") {
            self.flush_paragraph(out);
            self.close_table(out);
            out.push(Instruction::HorizontalRule);
            return;
        }

        if let Some(rest) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        {
            self.flush_paragraph(out);
            self.close_table(out);
            out.push(Instruction::UnorderedListItem {
                content: rest.to_string(),
            });
            return;
        }

        if let Some((number, rest)) = ordered_item(trimmed) {
            self.flush_paragraph(out);
            self.close_table(out);
            out.push(Instruction::OrderedListItem {
                number,
                content: rest.to_string(),
            });
            return;
        }

        if let Some(rest) = trimmed.strip_prefix('>') {
            self.flush_paragraph(out);
            self.close_table(out);
            out.push(Instruction::Blockquote {
                content: rest.trim_start().to_string(),
            });
            return;
        }

        if trimmed.len() > 1 && trimmed.starts_with('|') && trimmed.ends_with('|') {
            self.flush_paragraph(out);
            let cells = split_table_cells(trimmed);
            if is_separator_row(&cells) {
                return;
            }
            if self.table_open {
                out.push(Instruction::TableRow { cells });
            } else {
                out.push(Instruction::StartTable { headers: cells });
                self.table_open = true;
            }
            return;
        }

        // Plain line: accumulate into the pending paragraph.
        self.close_table(out);
        if !self.paragraph.is_empty() {
            self.paragraph.push(' ');
        }
        self.paragraph.push_str(trimmed);
    }

    fn flush_paragraph(&mut self, out: &mut Vec<Instruction>) {
        if !self.paragraph.is_empty() {
            out.push(Instruction::Paragraph {
                content: std::mem::take(&mut self.paragraph),
            });
        }
    }

    fn close_table(&mut self, out: &mut Vec<Instruction>) {
        if self.table_open {
            out.push(Instruction::EndTable);
            self.table_open = false;
        }
    }
}

impl ChunkParser for LineParser {
    fn process_chunk(&mut self, text: &str) -> Vec<Instruction> {
        self.buffer.push_str(text);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.strip_suffix('\n').unwrap_or(&line).to_string();
            self.handle_line(&line, &mut out);
        }
        out
    }

    fn finalize(&mut self) -> Vec<Instruction> {
        let mut out = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.handle_line(&line, &mut out);
        }
        self.flush_paragraph(&mut out);
        self.close_table(&mut out);
        if self.in_code {
            out.push(Instruction::EndCodeBlock);
            self.in_code = false;
        }
        out
    }

    fn state(&self) -> ParserSnapshot {
        let state = if self.in_code {
            "code"
        } else if self.table_open {
            "table"
        } else {
            "text"
        };
        ParserSnapshot {
            mode: "markdown".to_string(),
            state: state.to_string(),
            pending_buffer_len: self.buffer.len(),
            pending_paragraph_len: self.paragraph.len(),
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

fn heading(line: &str) -> Option<(u8, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&level) {
        if let Some(rest) = line[level..].strip_prefix(' ') {
            return Some((level as u8, rest.trim()));
        }
        // A bare `#` line is a heading with empty content (chunk artifact).
        if line.len() == level {
            return Some((level as u8, ""));
        }
    }
    None
}

fn ordered_item(line: &str) -> Option<(u64, &str)> {
    let digits: String = line.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let rest = line[digits.len()..].strip_prefix(". ")?;
    let number = digits.parse().ok()?;
    Some((number, rest.trim()))
}

fn split_table_cells(line: &str) -> Vec<String> {
    line.trim_matches('|')
        .split('|')
        .map(|cell| cell.trim().to_string())
        .collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|cell| {
            !cell.is_empty() && cell.chars().all(|c| matches!(c, '-' | ':'))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::InstructionKind;

    fn feed(parser: &mut LineParser, chunks: &[&str]) -> Vec<Instruction> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(parser.process_chunk(chunk));
        }
        out.extend(parser.finalize());
        out
    }

    #[test]
    fn heading_split_across_chunks() {
        let mut parser = LineParser::new();
        let out = feed(&mut parser, &["# He", "adi", "ng\n"]);
        assert_eq!(
            out,
            vec![Instruction::Heading {
                level: 1,
                content: "Heading".to_string()
            }]
        );
    }

    #[test]
    fn chunks_without_newline_emit_nothing() {
        let mut parser = LineParser::new();
        assert!(parser.process_chunk("no newline yet").is_empty());
        assert_eq!(parser.state().pending_buffer_len, "no newline yet".len());
    }

    #[test]
    fn paragraph_accumulates_until_blank_line() {
        let mut parser = LineParser::new();
        let mut out = parser.process_chunk("first line\nsecond line\n");
        assert!(out.is_empty(), "paragraph still accumulating: {out:?}");
        out = parser.process_chunk("\n");
        assert_eq!(
            out,
            vec![Instruction::Paragraph {
                content: "first line second line".to_string()
            }]
        );
    }

    #[test]
    fn fence_with_language_and_literal_code_lines() {
        let mut parser = LineParser::new();
        let out = feed(&mut parser, &["```js\nlet x = `tpl`;\n```\n"]);
        assert_eq!(
            out,
            vec![
                Instruction::StartCodeBlock {
                    language: Some("js".to_string())
                },
                Instruction::CodeLine {
                    content: "let x = `tpl`;\n".to_string()
                },
                Instruction::EndCodeBlock,
            ]
        );
    }

    #[test]
    fn unclosed_fence_is_drained_by_finalize() {
        let mut parser = LineParser::new();
        let out = feed(&mut parser, &["```\ndangling\n"]);
        assert_eq!(out.last(), Some(&Instruction::EndCodeBlock));
    }

    #[test]
    fn ordered_numbering_is_preserved() {
        let mut parser = LineParser::new();
        let out = feed(&mut parser, &["5. fifth\n10. tenth\n"]);
        assert_eq!(
            out,
            vec![
                Instruction::OrderedListItem {
                    number: 5,
                    content: "fifth".to_string()
                },
                Instruction::OrderedListItem {
                    number: 10,
                    content: "tenth".to_string()
                },
            ]
        );
    }

    #[test]
    fn table_header_separator_and_rows() {
        let mut parser = LineParser::new();
        let out = feed(
            &mut parser,
            &["| a | b |\n| --- | --- |\n| 1 | 2 |\n\nafter\n"],
        );
        let kinds: Vec<InstructionKind> = out.iter().map(Instruction::kind).collect();
        assert_eq!(
            kinds,
            vec![
                InstructionKind::StartTable,
                InstructionKind::TableRow,
                InstructionKind::EndTable,
                InstructionKind::Paragraph,
            ]
        );
    }

    #[test]
    fn blockquote_and_rule() {
        let mut parser = LineParser::new();
        let out = feed(&mut parser, &["> quoted words\n---\n"]);
        assert_eq!(
            out,
            vec![
                Instruction::Blockquote {
                    content: "quoted words".to_string()
                },
                Instruction::HorizontalRule,
            ]
        );
    }

    #[test]
    fn finalize_flushes_partial_paragraph() {
        let mut parser = LineParser::new();
        let out = feed(&mut parser, &["tail without newline"]);
        assert_eq!(
            out,
            vec![Instruction::Paragraph {
                content: "tail without newline".to_string()
            }]
        );
    }

    #[test]
    fn reset_returns_to_pristine_state() {
        let mut parser = LineParser::new();
        parser.process_chunk("```\ncode");
        parser.reset();
        let snapshot = parser.state();
        assert_eq!(snapshot.state, "text");
        assert_eq!(snapshot.pending_buffer_len, 0);
    }
}
