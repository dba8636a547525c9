//! Failure classifier: turns a session analysis plus expected/actual output
//! into a stage-attributed, pattern-labeled failure record.
//!
//! Stage and failure-type rules are strict first-match-wins chains; pattern
//! identification is an ordered rule table over the parse-trace instruction
//! sequence. A malformed or empty trace falls through to the default
//! branches instead of erroring.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use inkstream_render::instruction::InstructionKind;

use crate::config::Thresholds;
use crate::inspector::{IssueKind, SessionAnalysis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    BufferOverflow,
    ParseIncompleteElement,
    ParseStateLoss,
    ParseBoundaryMiss,
    StageMismatch,
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureType::BufferOverflow => "BUFFER_OVERFLOW",
            FailureType::ParseIncompleteElement => "PARSE_INCOMPLETE_ELEMENT",
            FailureType::ParseStateLoss => "PARSE_STATE_LOSS",
            FailureType::ParseBoundaryMiss => "PARSE_BOUNDARY_MISS",
            FailureType::StageMismatch => "STAGE_MISMATCH",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Buffer,
    Parse,
    Replay,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureStage::Buffer => "buffer",
            FailureStage::Parse => "parse",
            FailureStage::Replay => "replay",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePattern {
    CodeBlockTransition,
    ListTransition,
    TableDetection,
    ParagraphAccumulation,
    UnknownPattern,
}

impl FailurePattern {
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePattern::CodeBlockTransition => "code-block-transition",
            FailurePattern::ListTransition => "list-transition",
            FailurePattern::TableDetection => "table-detection",
            FailurePattern::ParagraphAccumulation => "paragraph-accumulation",
            FailurePattern::UnknownPattern => "unknown-pattern",
        }
    }
}

impl std::fmt::Display for FailurePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condensed trace data carried on every record for later inspection.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticSummary {
    pub session: String,
    pub timing_violations: usize,
    pub empty_decisions: usize,
    pub state_transitions: usize,
    pub parse_instructions: usize,
    pub replay_operations: usize,
    pub expected_len: usize,
    pub actual_len: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub id: Uuid,
    pub failure_type: FailureType,
    pub stage: FailureStage,
    pub pattern: FailurePattern,
    pub diagnostic: DiagnosticSummary,
    pub at: DateTime<Utc>,
    /// How often this pattern has been seen so far, this record included.
    pub frequency: usize,
}

/// Aggregated per-pattern statistics, derived on demand from the history.
#[derive(Debug, Clone, Serialize)]
pub struct PatternStats {
    pub pattern: FailurePattern,
    pub frequency: usize,
    pub percentage: f64,
    pub stages: BTreeSet<FailureStage>,
    pub failure_types: BTreeSet<FailureType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub pattern: FailurePattern,
    pub priority: Priority,
    pub suggestion: &'static str,
}

/// Inputs for the ordered pattern rule table.
struct PatternInput<'a> {
    sequence: &'a [InstructionKind],
    empty_decisions: usize,
    table_starts: usize,
    table_ends: usize,
}

/// Ordered rule table, first match wins. Order is load-bearing: it preserves
/// the precedence of the heuristics it was tuned against.
const PATTERN_RULES: &[(FailurePattern, fn(&PatternInput) -> bool)] = &[
    (FailurePattern::CodeBlockTransition, |input| {
        input.sequence.windows(2).any(|pair| {
            pair[0] == InstructionKind::Paragraph && pair[1] == InstructionKind::StartCodeBlock
        })
    }),
    (FailurePattern::ListTransition, |input| {
        input.sequence.windows(2).any(|pair| {
            let kinds = [pair[0], pair[1]];
            kinds.contains(&InstructionKind::UnorderedListItem)
                && kinds.contains(&InstructionKind::OrderedListItem)
        })
    }),
    (FailurePattern::TableDetection, |input| {
        input.table_starts != input.table_ends
    }),
    (FailurePattern::ParagraphAccumulation, |input| {
        input.empty_decisions > 2
    }),
];

/// Fixed recommendation table, in priority order.
const RECOMMENDATIONS: &[(FailurePattern, Priority, &str)] = &[
    (
        FailurePattern::CodeBlockTransition,
        Priority::High,
        "improve boundary detection before code blocks",
    ),
    (
        FailurePattern::ListTransition,
        Priority::Medium,
        "preserve list kind across adjacent items of different kinds",
    ),
    (
        FailurePattern::TableDetection,
        Priority::Medium,
        "balance table start/end emission across chunk boundaries",
    ),
    (
        FailurePattern::ParagraphAccumulation,
        Priority::Medium,
        "flush the paragraph accumulator on structural boundaries",
    ),
    (
        FailurePattern::UnknownPattern,
        Priority::Low,
        "capture a fuller trace to narrow the failure down",
    ),
];

/// Classifies failures and accumulates frequency statistics until `reset`.
#[derive(Debug)]
pub struct FailureClassifier {
    thresholds: Thresholds,
    history: Vec<FailureRecord>,
    counts: HashMap<FailurePattern, usize>,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

impl FailureClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            history: Vec::new(),
            counts: HashMap::new(),
        }
    }

    pub fn classify(
        &mut self,
        analysis: &SessionAnalysis,
        expected: &str,
        actual: &str,
    ) -> FailureRecord {
        let stage = self.determine_stage(analysis);
        let failure_type = self.determine_type(analysis);
        let pattern = identify_pattern(analysis);

        let frequency = {
            let count = self.counts.entry(pattern).or_insert(0);
            *count += 1;
            *count
        };
        let record = FailureRecord {
            id: Uuid::new_v4(),
            failure_type,
            stage,
            pattern,
            diagnostic: DiagnosticSummary {
                session: analysis.session.clone(),
                timing_violations: analysis.timing_violations(),
                empty_decisions: analysis.empty_decisions(),
                state_transitions: analysis.state_transitions(),
                parse_instructions: analysis.parse_instructions(),
                replay_operations: analysis.replay_operations(),
                expected_len: expected.len(),
                actual_len: actual.len(),
            },
            at: Utc::now(),
            frequency,
        };
        tracing::debug!(
            %failure_type, %stage, %pattern, frequency,
            "classified pipeline failure"
        );
        self.history.push(record.clone());
        record
    }

    fn determine_stage(&self, analysis: &SessionAnalysis) -> FailureStage {
        if analysis.empty_decisions() > 0
            || analysis.state_transitions() > self.thresholds.classifier_state_changes
        {
            return FailureStage::Parse;
        }
        if analysis.timing_violations() > 0 {
            return FailureStage::Buffer;
        }
        if analysis.has_issue(IssueKind::StageMismatch) {
            if analysis.parse_decisions() > analysis.replay_operations() {
                return FailureStage::Replay;
            }
            return FailureStage::Parse;
        }
        FailureStage::Parse
    }

    fn determine_type(&self, analysis: &SessionAnalysis) -> FailureType {
        if analysis.timing_violations() > 0 {
            return FailureType::BufferOverflow;
        }
        if analysis.empty_decisions() > 0 {
            return FailureType::ParseIncompleteElement;
        }
        if analysis.state_transitions() > self.thresholds.classifier_state_changes {
            return FailureType::ParseStateLoss;
        }
        if analysis.has_issue(IssueKind::UnclosedCodeBlock) {
            return FailureType::ParseBoundaryMiss;
        }
        if analysis.has_issue(IssueKind::StageMismatch) {
            return FailureType::StageMismatch;
        }
        FailureType::ParseBoundaryMiss
    }

    pub fn history(&self) -> &[FailureRecord] {
        &self.history
    }

    /// Per-pattern statistics over the whole history, sorted by descending
    /// frequency.
    pub fn pattern_stats(&self) -> Vec<PatternStats> {
        let total = self.history.len();
        let mut stats: HashMap<FailurePattern, PatternStats> = HashMap::new();
        for record in &self.history {
            let entry = stats
                .entry(record.pattern)
                .or_insert_with(|| PatternStats {
                    pattern: record.pattern,
                    frequency: 0,
                    percentage: 0.0,
                    stages: BTreeSet::new(),
                    failure_types: BTreeSet::new(),
                });
            entry.frequency += 1;
            entry.stages.insert(record.stage);
            entry.failure_types.insert(record.failure_type);
        }
        let mut stats: Vec<PatternStats> = stats.into_values().collect();
        for entry in &mut stats {
            entry.percentage = if total == 0 {
                0.0
            } else {
                entry.frequency as f64 * 100.0 / total as f64
            };
        }
        stats.sort_by(|a, b| b.frequency.cmp(&a.frequency).then(a.pattern.cmp(&b.pattern)));
        stats
    }

    /// Maps the observed patterns to the fixed suggestion table, most
    /// frequent pattern first.
    pub fn recommendations(&self) -> Vec<Recommendation> {
        self.pattern_stats()
            .iter()
            .filter_map(|stats| {
                RECOMMENDATIONS
                    .iter()
                    .find(|(pattern, ..)| *pattern == stats.pattern)
                    .map(|(pattern, priority, suggestion)| Recommendation {
                        pattern: *pattern,
                        priority: *priority,
                        suggestion,
                    })
            })
            .collect()
    }

    /// Clears history and frequency counters.
    pub fn reset(&mut self) {
        self.history.clear();
        self.counts.clear();
    }
}

fn identify_pattern(analysis: &SessionAnalysis) -> FailurePattern {
    let input = PatternInput {
        sequence: analysis.parse_sequence(),
        empty_decisions: analysis.empty_decisions(),
        table_starts: analysis.parse_kind_count(InstructionKind::StartTable),
        table_ends: analysis.parse_kind_count(InstructionKind::EndTable),
    };
    for (pattern, rule) in PATTERN_RULES {
        if rule(&input) {
            return *pattern;
        }
    }
    FailurePattern::UnknownPattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::StageInspector;
    use inkstream_render::instruction::Instruction;
    use inkstream_render::parser::ParserSnapshot;

    fn snapshot(state: &str) -> ParserSnapshot {
        ParserSnapshot {
            mode: "markdown".to_string(),
            state: state.to_string(),
            pending_buffer_len: 0,
            pending_paragraph_len: 0,
        }
    }

    fn analysis_with(instructions: Vec<Instruction>, empties: usize) -> SessionAnalysis {
        let mut inspector = StageInspector::default();
        inspector.start_session("case");
        inspector.capture_parse(&instructions, &snapshot("text"));
        for _ in 0..empties {
            inspector.capture_parse(&[], &snapshot("text"));
        }
        for instruction in &instructions {
            inspector.capture_replay(instruction);
        }
        inspector.end_session().expect("analysis")
    }

    #[tokio::test]
    async fn classify_is_deterministic_and_counts_frequency() {
        let analysis = analysis_with(
            vec![
                Instruction::Paragraph {
                    content: "before".to_string(),
                },
                Instruction::StartCodeBlock { language: None },
                Instruction::EndCodeBlock,
            ],
            1,
        );
        let mut classifier = FailureClassifier::default();
        let first = classifier.classify(&analysis, "expected", "actual");
        let second = classifier.classify(&analysis, "expected", "actual");

        assert_eq!(first.failure_type, second.failure_type);
        assert_eq!(first.stage, second.stage);
        assert_eq!(first.pattern, second.pattern);
        assert_eq!(first.frequency, 1);
        assert_eq!(second.frequency, 2);
        assert_eq!(first.pattern, FailurePattern::CodeBlockTransition);
    }

    #[tokio::test]
    async fn empty_decisions_pin_stage_and_type_to_parse() {
        let analysis = analysis_with(
            vec![Instruction::Paragraph {
                content: "text".to_string(),
            }],
            3,
        );
        let mut classifier = FailureClassifier::default();
        let record = classifier.classify(&analysis, "", "");
        assert_eq!(record.stage, FailureStage::Parse);
        assert_eq!(record.failure_type, FailureType::ParseIncompleteElement);
        // >2 empty captures with no earlier rule matching.
        assert_eq!(record.pattern, FailurePattern::ParagraphAccumulation);
    }

    #[tokio::test]
    async fn adjacent_list_kinds_label_list_transition() {
        let analysis = analysis_with(
            vec![
                Instruction::OrderedListItem {
                    number: 1,
                    content: "one".to_string(),
                },
                Instruction::UnorderedListItem {
                    content: "bullet".to_string(),
                },
            ],
            0,
        );
        let mut classifier = FailureClassifier::default();
        let record = classifier.classify(&analysis, "", "");
        assert_eq!(record.pattern, FailurePattern::ListTransition);
    }

    #[tokio::test]
    async fn unbalanced_tables_label_table_detection() {
        let analysis = analysis_with(
            vec![Instruction::StartTable {
                headers: vec!["h".to_string()],
            }],
            0,
        );
        let mut classifier = FailureClassifier::default();
        let record = classifier.classify(&analysis, "", "");
        assert_eq!(record.pattern, FailurePattern::TableDetection);
    }

    #[tokio::test]
    async fn bare_trace_falls_through_to_defaults() {
        let mut inspector = StageInspector::default();
        inspector.start_session("bare");
        let analysis = inspector.end_session().expect("analysis");
        let mut classifier = FailureClassifier::default();
        let record = classifier.classify(&analysis, "", "");
        assert_eq!(record.stage, FailureStage::Parse);
        assert_eq!(record.failure_type, FailureType::ParseBoundaryMiss);
        assert_eq!(record.pattern, FailurePattern::UnknownPattern);
    }

    #[tokio::test]
    async fn stats_sort_by_frequency_and_reset_clears() {
        let list = analysis_with(
            vec![
                Instruction::OrderedListItem {
                    number: 1,
                    content: "one".to_string(),
                },
                Instruction::UnorderedListItem {
                    content: "two".to_string(),
                },
            ],
            0,
        );
        let code = analysis_with(
            vec![
                Instruction::Paragraph {
                    content: "p".to_string(),
                },
                Instruction::StartCodeBlock { language: None },
            ],
            0,
        );
        let mut classifier = FailureClassifier::default();
        classifier.classify(&list, "", "");
        classifier.classify(&list, "", "");
        classifier.classify(&code, "", "");

        let stats = classifier.pattern_stats();
        assert_eq!(stats[0].pattern, FailurePattern::ListTransition);
        assert_eq!(stats[0].frequency, 2);
        assert!((stats[0].percentage - 66.666).abs() < 0.1);

        let recommendations = classifier.recommendations();
        assert_eq!(recommendations[0].pattern, FailurePattern::ListTransition);
        assert!(
            recommendations
                .iter()
                .any(|r| r.pattern == FailurePattern::CodeBlockTransition
                    && r.priority == Priority::High)
        );

        classifier.reset();
        assert!(classifier.pattern_stats().is_empty());
        assert!(classifier.history().is_empty());
        let record = classifier.classify(&list, "", "");
        assert_eq!(record.frequency, 1, "counters restart after reset");
    }
}
