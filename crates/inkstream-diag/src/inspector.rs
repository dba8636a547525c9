//! Stage inspector: timestamped capture of the buffer → parse → replay
//! pipeline and per-session analysis.
//!
//! A session is bounded by explicit start/end calls. Captures are appended
//! only while recording; ending a session freezes the buffers and produces a
//! [`SessionAnalysis`]. The next `start_session` discards everything. Pattern
//! detection is purely descriptive; issue detection is what the runner's
//! failure gate keys on.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use inkstream_render::instruction::{Instruction, InstructionKind};
use inkstream_render::parser::ParserSnapshot;

use crate::config::Thresholds;

/// Max characters of replayed content kept in a capture preview.
const PREVIEW_CHARS: usize = 40;

#[derive(Debug, Clone)]
struct BufferCapture {
    offset: Duration,
    chunk_len: usize,
    total_len: usize,
}

#[derive(Debug, Clone)]
struct ParseCapture {
    offset: Duration,
    kinds: Vec<InstructionKind>,
    state: ParserSnapshot,
}

#[derive(Debug, Clone)]
struct ReplayCapture {
    offset: Duration,
    op: InstructionKind,
    preview: String,
}

#[derive(Debug)]
struct SessionBuffers {
    name: String,
    started: Instant,
    buffer: Vec<BufferCapture>,
    parse: Vec<ParseCapture>,
    replay: Vec<ReplayCapture>,
}

/// Captures stage records during a pipeline run and analyzes them on demand.
#[derive(Debug)]
pub struct StageInspector {
    thresholds: Thresholds,
    session: Option<SessionBuffers>,
}

impl Default for StageInspector {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

impl StageInspector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            session: None,
        }
    }

    /// Begins a fresh session, discarding any previous captures.
    pub fn start_session(&mut self, name: &str) {
        self.session = Some(SessionBuffers {
            name: name.to_string(),
            started: Instant::now(),
            buffer: Vec::new(),
            parse: Vec::new(),
            replay: Vec::new(),
        });
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Records buffer growth for one incoming chunk.
    pub fn capture_chunk(&mut self, chunk: &str, total_len: usize) {
        let Some(session) = &mut self.session else { return };
        session.buffer.push(BufferCapture {
            offset: session.started.elapsed(),
            chunk_len: chunk.len(),
            total_len,
        });
    }

    /// Records one parser decision: the instruction kinds it produced and a
    /// redacted state snapshot.
    pub fn capture_parse(&mut self, instructions: &[Instruction], state: &ParserSnapshot) {
        let Some(session) = &mut self.session else { return };
        session.parse.push(ParseCapture {
            offset: session.started.elapsed(),
            kinds: instructions.iter().map(Instruction::kind).collect(),
            state: state.clone(),
        });
    }

    /// Records one replayed render operation with a truncated preview.
    pub fn capture_replay(&mut self, instruction: &Instruction) {
        let Some(session) = &mut self.session else { return };
        session.replay.push(ReplayCapture {
            offset: session.started.elapsed(),
            op: instruction.kind(),
            preview: instruction.preview(PREVIEW_CHARS),
        });
    }

    /// Stops recording and returns the frozen analysis, or `None` when no
    /// session was active.
    pub fn end_session(&mut self) -> Option<SessionAnalysis> {
        let session = self.session.take()?;
        Some(analyze(&session, &self.thresholds))
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// Per-stage report: `no_data` instead of an error when a stage saw nothing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageReport<T> {
    NoData,
    Ready(T),
}

impl<T> StageReport<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            StageReport::NoData => None,
            StageReport::Ready(metrics) => Some(metrics),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferMetrics {
    pub chunks: usize,
    pub total_bytes: usize,
    pub avg_chunk_bytes: f64,
    pub avg_gap_ms: f64,
    pub max_gap_ms: u64,
    pub timing_violations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseMetrics {
    /// One decision per `process_chunk`/`finalize` call.
    pub decisions: usize,
    /// Total instructions across all decisions.
    pub instructions: usize,
    pub by_kind: BTreeMap<InstructionKind, usize>,
    /// Flattened instruction-kind sequence across the trace.
    pub sequence: Vec<InstructionKind>,
    /// Consecutive captures whose parser state name differed.
    pub state_transitions: usize,
    /// Captures that produced zero instructions.
    pub empty_decisions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayMetrics {
    pub operations: usize,
    pub by_kind: BTreeMap<InstructionKind, usize>,
    pub sequence: Vec<InstructionKind>,
    /// Truncated content previews, one per operation in `sequence` order.
    pub previews: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternKind {
    BufferTiming,
    ParseEmpty,
    ParseStateThrash,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PatternKind::BufferTiming => "BUFFER_TIMING",
            PatternKind::ParseEmpty => "PARSE_EMPTY",
            PatternKind::ParseStateThrash => "PARSE_STATE_THRASH",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedPattern {
    pub pattern: PatternKind,
    pub description: String,
    /// True when the pattern denotes a real defect rather than ordinary
    /// streaming silence.
    pub critical: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    StageMismatch,
    UnclosedCodeBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedIssue {
    pub issue: IssueKind,
    pub severity: Severity,
    pub detail: String,
}

/// Frozen analysis of one diagnostic session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionAnalysis {
    pub session: String,
    pub duration_ms: u64,
    pub buffer: StageReport<BufferMetrics>,
    pub parse: StageReport<ParseMetrics>,
    pub replay: StageReport<ReplayMetrics>,
    pub patterns: Vec<DetectedPattern>,
    pub issues: Vec<DetectedIssue>,
}

impl SessionAnalysis {
    pub fn timing_violations(&self) -> usize {
        self.buffer.ready().map_or(0, |b| b.timing_violations)
    }

    pub fn parse_decisions(&self) -> usize {
        self.parse.ready().map_or(0, |p| p.decisions)
    }

    pub fn parse_instructions(&self) -> usize {
        self.parse.ready().map_or(0, |p| p.instructions)
    }

    pub fn empty_decisions(&self) -> usize {
        self.parse.ready().map_or(0, |p| p.empty_decisions)
    }

    pub fn state_transitions(&self) -> usize {
        self.parse.ready().map_or(0, |p| p.state_transitions)
    }

    pub fn replay_operations(&self) -> usize {
        self.replay.ready().map_or(0, |r| r.operations)
    }

    pub fn parse_sequence(&self) -> &[InstructionKind] {
        self.parse.ready().map_or(&[], |p| p.sequence.as_slice())
    }

    pub fn parse_kind_count(&self, kind: InstructionKind) -> usize {
        self.parse
            .ready()
            .and_then(|p| p.by_kind.get(&kind).copied())
            .unwrap_or(0)
    }

    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|issue| issue.issue == kind)
    }

    pub fn has_pattern(&self, kind: PatternKind) -> bool {
        self.patterns.iter().any(|pattern| pattern.pattern == kind)
    }

    pub fn max_issue_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|issue| issue.severity).max()
    }
}

fn analyze(session: &SessionBuffers, thresholds: &Thresholds) -> SessionAnalysis {
    let buffer = analyze_buffer(&session.buffer, thresholds);
    let parse = analyze_parse(&session.parse);
    let replay = analyze_replay(&session.replay);
    let patterns = detect_patterns(&buffer, &parse, &replay, thresholds);
    let issues = detect_issues(&parse, &replay, &session.parse, thresholds);

    SessionAnalysis {
        session: session.name.clone(),
        duration_ms: session.started.elapsed().as_millis() as u64,
        buffer,
        parse,
        replay,
        patterns,
        issues,
    }
}

fn analyze_buffer(
    captures: &[BufferCapture],
    thresholds: &Thresholds,
) -> StageReport<BufferMetrics> {
    if captures.is_empty() {
        return StageReport::NoData;
    }
    let gaps: Vec<u64> = captures
        .windows(2)
        .map(|pair| (pair[1].offset - pair[0].offset).as_millis() as u64)
        .collect();
    let max_gap_ms = gaps.iter().copied().max().unwrap_or(0);
    let avg_gap_ms = if gaps.is_empty() {
        0.0
    } else {
        gaps.iter().sum::<u64>() as f64 / gaps.len() as f64
    };
    StageReport::Ready(BufferMetrics {
        chunks: captures.len(),
        total_bytes: captures.last().map_or(0, |c| c.total_len),
        avg_chunk_bytes: captures.iter().map(|c| c.chunk_len).sum::<usize>() as f64
            / captures.len() as f64,
        avg_gap_ms,
        max_gap_ms,
        timing_violations: gaps
            .iter()
            .filter(|gap| **gap > thresholds.buffer_gap_ms)
            .count(),
    })
}

fn analyze_parse(captures: &[ParseCapture]) -> StageReport<ParseMetrics> {
    if captures.is_empty() {
        return StageReport::NoData;
    }
    let mut by_kind = BTreeMap::new();
    let mut sequence = Vec::new();
    for capture in captures {
        for kind in &capture.kinds {
            *by_kind.entry(*kind).or_insert(0) += 1;
            sequence.push(*kind);
        }
    }
    let state_transitions = captures
        .windows(2)
        .filter(|pair| pair[0].state.state != pair[1].state.state)
        .count();
    StageReport::Ready(ParseMetrics {
        decisions: captures.len(),
        instructions: sequence.len(),
        by_kind,
        sequence,
        state_transitions,
        empty_decisions: captures.iter().filter(|c| c.kinds.is_empty()).count(),
    })
}

fn analyze_replay(captures: &[ReplayCapture]) -> StageReport<ReplayMetrics> {
    if captures.is_empty() {
        return StageReport::NoData;
    }
    let mut by_kind = BTreeMap::new();
    let sequence: Vec<InstructionKind> = captures.iter().map(|c| c.op).collect();
    for op in &sequence {
        *by_kind.entry(*op).or_insert(0) += 1;
    }
    StageReport::Ready(ReplayMetrics {
        operations: captures.len(),
        by_kind,
        sequence,
        previews: captures.iter().map(|c| c.preview.clone()).collect(),
    })
}

fn detect_patterns(
    buffer: &StageReport<BufferMetrics>,
    parse: &StageReport<ParseMetrics>,
    replay: &StageReport<ReplayMetrics>,
    thresholds: &Thresholds,
) -> Vec<DetectedPattern> {
    let mut patterns = Vec::new();

    if let Some(buffer) = buffer.ready()
        && buffer.timing_violations > 0
    {
        patterns.push(DetectedPattern {
            pattern: PatternKind::BufferTiming,
            description: format!(
                "{} inter-arrival gap(s) exceeded {} ms (max {} ms)",
                buffer.timing_violations, thresholds.buffer_gap_ms, buffer.max_gap_ms
            ),
            critical: true,
        });
    }

    if let Some(parse) = parse.ready() {
        let replay_ops = replay.ready().map_or(0, |r| r.operations);
        let empty_ratio = parse.empty_decisions as f64 / parse.decisions as f64;
        // Guarded: empty decisions alone are normal streaming silence. Only
        // the combination of a saturated empty ratio, almost no downstream
        // activity and a meaningful number of attempts marks a real stall.
        if empty_ratio >= thresholds.empty_parse_ratio
            && parse.instructions + replay_ops < thresholds.max_low_activity_ops
            && parse.decisions > thresholds.min_empty_parse_attempts
        {
            patterns.push(DetectedPattern {
                pattern: PatternKind::ParseEmpty,
                description: format!(
                    "critical: {}/{} parse attempts produced nothing with {} downstream op(s)",
                    parse.empty_decisions, parse.decisions, replay_ops
                ),
                critical: true,
            });
        }

        let thrash_by_count = parse.state_transitions > thresholds.state_thrash_count;
        let thrash_by_ratio = parse.decisions > thresholds.min_thrash_decisions
            && parse.state_transitions as f64 / parse.decisions as f64
                > thresholds.state_thrash_ratio;
        if thrash_by_count || thrash_by_ratio {
            patterns.push(DetectedPattern {
                pattern: PatternKind::ParseStateThrash,
                description: format!(
                    "{} state transitions across {} decisions",
                    parse.state_transitions, parse.decisions
                ),
                critical: true,
            });
        }
    }

    patterns
}

fn detect_issues(
    parse: &StageReport<ParseMetrics>,
    replay: &StageReport<ReplayMetrics>,
    parse_captures: &[ParseCapture],
    thresholds: &Thresholds,
) -> Vec<DetectedIssue> {
    let mut issues = Vec::new();

    let parse_instructions = parse.ready().map_or(0, |p| p.instructions);
    let replay_ops = replay.ready().map_or(0, |r| r.operations);
    if parse_instructions != 0 {
        let larger = parse_instructions.max(replay_ops).max(1);
        let diff = parse_instructions.abs_diff(replay_ops);
        if diff as f64 / larger as f64 > thresholds.stage_mismatch_ratio {
            issues.push(DetectedIssue {
                issue: IssueKind::StageMismatch,
                severity: Severity::Medium,
                detail: format!(
                    "{parse_instructions} parsed instruction(s) vs {replay_ops} replayed op(s)"
                ),
            });
        }
    }

    let starts: usize = parse_captures
        .iter()
        .flat_map(|c| &c.kinds)
        .filter(|kind| **kind == InstructionKind::StartCodeBlock)
        .count();
    let ends: usize = parse_captures
        .iter()
        .flat_map(|c| &c.kinds)
        .filter(|kind| **kind == InstructionKind::EndCodeBlock)
        .count();
    if starts > thresholds.unclosed_fence_min_starts && ends == 0 {
        issues.push(DetectedIssue {
            issue: IssueKind::UnclosedCodeBlock,
            severity: Severity::Medium,
            detail: format!("{starts} code-block start(s) with no end"),
        });
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkstream_render::instruction::Instruction;
    use std::time::Duration;

    fn snapshot(state: &str) -> ParserSnapshot {
        ParserSnapshot {
            mode: "markdown".to_string(),
            state: state.to_string(),
            pending_buffer_len: 0,
            pending_paragraph_len: 0,
        }
    }

    fn paragraph() -> Instruction {
        Instruction::Paragraph {
            content: "text".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_slow_gap_reports_one_violation_and_pattern() {
        let mut inspector = StageInspector::default();
        inspector.start_session("timing");
        inspector.capture_chunk("abc", 3);
        for total in [6, 9, 12] {
            tokio::time::advance(Duration::from_millis(50)).await;
            inspector.capture_chunk("abc", total);
        }
        tokio::time::advance(Duration::from_millis(200)).await;
        inspector.capture_chunk("abc", 15);

        let analysis = inspector.end_session().expect("analysis");
        let buffer = analysis.buffer.ready().expect("buffer metrics");
        assert_eq!(buffer.timing_violations, 1);
        assert_eq!(buffer.max_gap_ms, 200);
        assert!(analysis.has_pattern(PatternKind::BufferTiming));
    }

    #[tokio::test]
    async fn parse_empty_fires_only_under_composite_guard() {
        // 25 empty attempts, 2 replay ops: pattern fires.
        let mut inspector = StageInspector::default();
        inspector.start_session("empty");
        for _ in 0..25 {
            inspector.capture_parse(&[], &snapshot("text"));
        }
        inspector.capture_replay(&paragraph());
        inspector.capture_replay(&paragraph());
        let analysis = inspector.end_session().expect("analysis");
        assert!(analysis.has_pattern(PatternKind::ParseEmpty));
        let pattern = analysis
            .patterns
            .iter()
            .find(|p| p.pattern == PatternKind::ParseEmpty)
            .expect("pattern");
        assert!(pattern.critical);
        assert!(pattern.description.contains("critical"));

        // Same ratio with only 10 attempts: guard holds it back.
        inspector.start_session("quiet");
        for _ in 0..10 {
            inspector.capture_parse(&[], &snapshot("text"));
        }
        let analysis = inspector.end_session().expect("analysis");
        assert!(!analysis.has_pattern(PatternKind::ParseEmpty));
    }

    #[tokio::test]
    async fn state_thrash_by_count_and_by_ratio() {
        let mut inspector = StageInspector::default();
        inspector.start_session("thrash-count");
        for i in 0..12 {
            let state = if i % 2 == 0 { "text" } else { "code" };
            inspector.capture_parse(&[paragraph()], &snapshot(state));
        }
        let analysis = inspector.end_session().expect("analysis");
        assert!(analysis.has_pattern(PatternKind::ParseStateThrash));

        // 8 decisions, 4 transitions: 50% ratio over the 30% limit.
        inspector.start_session("thrash-ratio");
        for state in ["text", "text", "code", "code", "text", "text", "code", "code"] {
            inspector.capture_parse(&[paragraph()], &snapshot(state));
        }
        let analysis = inspector.end_session().expect("analysis");
        assert_eq!(analysis.state_transitions(), 3);
        // 3/8 = 37.5%, above the ratio threshold with enough decisions.
        assert!(analysis.has_pattern(PatternKind::ParseStateThrash));
    }

    #[tokio::test]
    async fn stage_mismatch_issue_requires_large_normalized_difference() {
        let mut inspector = StageInspector::default();
        inspector.start_session("mismatch");
        let many: Vec<Instruction> = (0..10).map(|_| paragraph()).collect();
        inspector.capture_parse(&many, &snapshot("text"));
        inspector.capture_replay(&paragraph());
        let analysis = inspector.end_session().expect("analysis");
        assert!(analysis.has_issue(IssueKind::StageMismatch));

        // Balanced counts: no issue.
        inspector.start_session("balanced");
        inspector.capture_parse(&many, &snapshot("text"));
        for _ in 0..10 {
            inspector.capture_replay(&paragraph());
        }
        let analysis = inspector.end_session().expect("analysis");
        assert!(!analysis.has_issue(IssueKind::StageMismatch));
    }

    #[tokio::test]
    async fn unclosed_code_block_needs_three_starts_and_zero_ends() {
        let mut inspector = StageInspector::default();
        inspector.start_session("unclosed");
        let start = Instruction::StartCodeBlock { language: None };
        inspector.capture_parse(
            &[start.clone(), start.clone(), start.clone()],
            &snapshot("code"),
        );
        let analysis = inspector.end_session().expect("analysis");
        assert!(analysis.has_issue(IssueKind::UnclosedCodeBlock));

        inspector.start_session("closed");
        inspector.capture_parse(
            &[start.clone(), start.clone(), start, Instruction::EndCodeBlock],
            &snapshot("text"),
        );
        let analysis = inspector.end_session().expect("analysis");
        assert!(!analysis.has_issue(IssueKind::UnclosedCodeBlock));
    }

    #[tokio::test]
    async fn stage_without_captures_reports_no_data() {
        let mut inspector = StageInspector::default();
        inspector.start_session("sparse");
        inspector.capture_parse(&[paragraph()], &snapshot("text"));
        let analysis = inspector.end_session().expect("analysis");
        assert!(analysis.buffer.ready().is_none());
        assert!(analysis.replay.ready().is_none());
        assert!(analysis.parse.ready().is_some());

        let json = serde_json::to_value(&analysis).expect("serialize");
        assert_eq!(json["buffer"]["status"], "no_data");
    }

    #[tokio::test]
    async fn captures_outside_a_session_are_ignored() {
        let mut inspector = StageInspector::default();
        inspector.capture_chunk("orphan", 6);
        assert!(!inspector.is_recording());
        assert!(inspector.end_session().is_none());
    }
}
