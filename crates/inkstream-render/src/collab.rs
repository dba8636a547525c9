//! Sanitizer and highlighter collaborators.
//!
//! Both are trait seams: the renderer only depends on the contracts here.
//! Failures are degraded-fidelity events, never fatal: the renderer catches
//! them, logs, and keeps the plain content.

use anyhow::Result;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

/// Characters that route non-code content through the sanitizer instead of
/// the literal-text path.
const MARKUP_METACHARS: &[char] = &['*', '_', '`', '[', ']', '<', '>', '~'];

/// True when the content carries markup metacharacters and must not be
/// inserted verbatim as markup-bearing text.
pub fn contains_markup(text: &str) -> bool {
    text.contains(MARKUP_METACHARS)
}

/// Strict identifier check for code-fence language tags: letters, digits,
/// hyphen and underscore only. Anything else is dropped rather than carried
/// into an attribute.
pub fn is_valid_language_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Produces safe markup from content containing markup metacharacters.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, markup: &str) -> Result<String>;

    fn is_ready(&self) -> bool {
        true
    }
}

/// Default sanitizer: re-emits inline markdown through pulldown-cmark,
/// dropping raw HTML events entirely. The output is safe by construction;
/// nothing that parses as an HTML tag survives the round trip.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownSanitizer;

impl Sanitizer for MarkdownSanitizer {
    fn sanitize(&self, markup: &str) -> Result<String> {
        let mut out = String::with_capacity(markup.len());
        for event in Parser::new_ext(markup, Options::ENABLE_STRIKETHROUGH) {
            match event {
                Event::Text(text) => out.push_str(&text),
                Event::Code(code) => {
                    out.push('`');
                    out.push_str(&code);
                    out.push('`');
                }
                Event::Start(Tag::Emphasis) | Event::End(TagEnd::Emphasis) => out.push('*'),
                Event::Start(Tag::Strong) | Event::End(TagEnd::Strong) => out.push_str("**"),
                Event::Start(Tag::Strikethrough) | Event::End(TagEnd::Strikethrough) => {
                    out.push_str("~~");
                }
                Event::SoftBreak | Event::HardBreak => out.push(' '),
                // Raw HTML is dropped, not escaped.
                Event::Html(_) | Event::InlineHtml(_) => {}
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Result of a highlight call.
#[derive(Debug, Clone)]
pub struct Highlighted {
    pub value: String,
    pub language: Option<String>,
}

/// Applies syntax highlighting to finished code containers.
pub trait Highlighter: Send + Sync {
    /// Highlights `code`. `language` is `Some` only when the tag was
    /// recognized via [`Highlighter::supports_language`]; `None` requests
    /// auto-detection.
    fn highlight(&self, code: &str, language: Option<&str>) -> Result<Highlighted>;

    fn supports_language(&self, name: &str) -> bool;
}

/// Default highlighter: recognizes no languages and echoes code verbatim, so
/// the code container's text stays byte-identical to what was streamed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughHighlighter;

impl Highlighter for PassthroughHighlighter {
    fn highlight(&self, code: &str, language: Option<&str>) -> Result<Highlighted> {
        Ok(Highlighted {
            value: code.to_string(),
            language: language.map(str::to_string),
        })
    }

    fn supports_language(&self, _name: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_detection() {
        assert!(contains_markup("**bold**"));
        assert!(contains_markup("a <script> tag"));
        assert!(!contains_markup("plain text, punctuation. and digits 123"));
    }

    #[test]
    fn language_tags_are_strict_identifiers() {
        assert!(is_valid_language_tag("rust"));
        assert!(is_valid_language_tag("objective-c"));
        assert!(is_valid_language_tag("c_2024"));
        assert!(!is_valid_language_tag(""));
        assert!(!is_valid_language_tag("java script"));
        assert!(!is_valid_language_tag("x;rm -rf"));
    }

    #[test]
    fn sanitizer_drops_raw_html() {
        let safe = MarkdownSanitizer
            .sanitize("hello <script>alert(1)</script> **world**")
            .unwrap();
        assert!(!safe.contains("<script>"));
        assert!(safe.contains("hello"));
        assert!(safe.contains("**world**"));
    }

    #[test]
    fn sanitizer_keeps_inline_code_markers() {
        let safe = MarkdownSanitizer.sanitize("use `cargo test` here").unwrap();
        assert_eq!(safe, "use `cargo test` here");
    }

    #[test]
    fn passthrough_highlighter_echoes() {
        let out = PassthroughHighlighter
            .highlight("let x = 1;\n", Some("rust"))
            .unwrap();
        assert_eq!(out.value, "let x = 1;\n");
        assert!(!PassthroughHighlighter.supports_language("rust"));
    }
}
