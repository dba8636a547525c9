//! The fixed matrix of adversarial inputs the systematic runner drives.
//!
//! Every input is a literal string; the runner chops it into fixed-size
//! chunks, so the interesting boundaries (split fences, split list markers,
//! half-arrived table rows) happen on their own.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BoundaryConditions,
    StateTransitions,
    ComplexCombinations,
    PerformanceStress,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::BoundaryConditions => "boundary_conditions",
            Category::StateTransitions => "state_transitions",
            Category::ComplexCombinations => "complex_combinations",
            Category::PerformanceStress => "performance_stress",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TestCase {
    pub category: Category,
    pub name: &'static str,
    pub description: &'static str,
    pub input: &'static str,
}

pub fn cases() -> &'static [TestCase] {
    CASES
}

const CASES: &[TestCase] = &[
    // ------------------------------------------------------------------
    // Boundary conditions: chunking splits a marker mid-token.
    // ------------------------------------------------------------------
    TestCase {
        category: Category::BoundaryConditions,
        name: "split_heading_marker",
        description: "heading marker and text arrive in separate chunks",
        input: "# A heading that arrives three bytes at a time\n\nAnd a following paragraph.\n",
    },
    TestCase {
        category: Category::BoundaryConditions,
        name: "split_code_fence",
        description: "opening and closing fences straddle chunk boundaries",
        input: "Intro paragraph before code.\n\n```rust\nfn main() {}\n```\n\nOutro text.\n",
    },
    TestCase {
        category: Category::BoundaryConditions,
        name: "split_list_marker",
        description: "list markers split from their content",
        input: "- first entry in the list\n- second entry in the list\n- third entry in the list\n",
    },
    TestCase {
        category: Category::BoundaryConditions,
        name: "partial_table_row",
        description: "table cells arrive column by column",
        input: "| name | value |\n| --- | --- |\n| alpha | 1 |\n| beta | 2 |\n\ndone\n",
    },
    // ------------------------------------------------------------------
    // State transitions: cross-call state machines switch modes.
    // ------------------------------------------------------------------
    TestCase {
        category: Category::StateTransitions,
        name: "paragraph_into_code",
        description: "paragraph immediately followed by a fenced block",
        input: "Text paragraph\n```js\ncode\n```\n",
    },
    TestCase {
        category: Category::StateTransitions,
        name: "list_kind_switch",
        description: "unordered items switch to ordered mid-stream",
        input: "- bullet one\n- bullet two\n1. numbered one\n2. numbered two\n",
    },
    TestCase {
        category: Category::StateTransitions,
        name: "code_interrupts_list",
        description: "a fenced block lands between numbered items",
        input: "1. Before the block\n```\ninner code line\n```\n2. After the block\n",
    },
    TestCase {
        category: Category::StateTransitions,
        name: "blockquote_run",
        description: "blockquotes interleaved with paragraphs",
        input: "> first quote line\nplain paragraph between quotes\n> second quote line\n",
    },
    // ------------------------------------------------------------------
    // Complex combinations: several element kinds in one stream.
    // ------------------------------------------------------------------
    TestCase {
        category: Category::ComplexCombinations,
        name: "full_document",
        description: "heading, list, code, table and rule in one document",
        input: "# Document title\n\nOpening paragraph with enough words to wrap.\n\n- point one\n- point two\n\n```python\nprint(\"hi\")\n```\n\n| k | v |\n| --- | --- |\n| a | 1 |\n\n---\n\nClosing words.\n",
    },
    TestCase {
        category: Category::ComplexCombinations,
        name: "adjacent_structures",
        description: "structures with no blank lines between them",
        input: "# Tight heading\n- immediate list item\n> immediate quote\nTrailing paragraph line.\n",
    },
    TestCase {
        category: Category::ComplexCombinations,
        name: "markup_in_cells_and_items",
        description: "inline markup routed through sanitization",
        input: "- item with `inline code` inside\n- item with **bold** text\n\n| col |\n| --- |\n| `cell` |\n",
    },
    TestCase {
        category: Category::ComplexCombinations,
        name: "numbering_across_interruptions",
        description: "explicit ordered values survive a code interruption",
        input: "5. fifth item keeps its number\n```\nbreak\n```\n10. tenth item keeps its number\n",
    },
    // ------------------------------------------------------------------
    // Performance stress: volume rather than trickiness.
    // ------------------------------------------------------------------
    TestCase {
        category: Category::PerformanceStress,
        name: "sustained_prose",
        description: "long prose stream with sparse structural breaks",
        input: "A first paragraph that keeps going with clause after clause because streams love to produce prose in one breath.\n\nA second paragraph follows after a single blank line and keeps the parser busy for a while longer.\n\nA third paragraph closes the stream out.\n",
    },
    TestCase {
        category: Category::PerformanceStress,
        name: "many_list_items",
        description: "a dozen consecutive items reuse one list node",
        input: "- item 01\n- item 02\n- item 03\n- item 04\n- item 05\n- item 06\n- item 07\n- item 08\n- item 09\n- item 10\n- item 11\n- item 12\n",
    },
    TestCase {
        category: Category::PerformanceStress,
        name: "rapid_headings",
        description: "headings of every level in quick succession",
        input: "# one\n## two\n### three\n#### four\n##### five\n###### six\n",
    },
    TestCase {
        category: Category::PerformanceStress,
        name: "large_code_block",
        description: "a code block with many literal lines",
        input: "```c\nint a0 = 0;\nint a1 = 1;\nint a2 = 2;\nint a3 = 3;\nint a4 = 4;\nint a5 = 5;\nint a6 = 6;\nint a7 = 7;\nint a8 = 8;\nint a9 = 9;\n```\n",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_case_is_well_formed() {
        assert!(!cases().is_empty());
        for case in cases() {
            assert!(!case.name.is_empty());
            assert!(!case.description.is_empty());
            assert!(
                case.input.len() >= 20,
                "{} input too small to exercise anything",
                case.name
            );
        }
    }

    #[test]
    fn all_categories_are_covered() {
        for category in [
            Category::BoundaryConditions,
            Category::StateTransitions,
            Category::ComplexCombinations,
            Category::PerformanceStress,
        ] {
            assert!(
                cases().iter().any(|case| case.category == category),
                "no case in {category}"
            );
        }
    }

    #[test]
    fn case_names_are_unique() {
        let mut names: Vec<&str> = cases().iter().map(|case| case.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), cases().len());
    }
}
