//! Systematic test runner: drives every matrix case through an instrumented
//! parser + renderer pair and aggregates classifier verdicts.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::time::Instant;

use inkstream_render::parser::{ChunkParser, LineParser};
use inkstream_render::renderer::Renderer;
use inkstream_render::reveal::RevealPacing;

use crate::classifier::{FailureClassifier, FailureRecord, PatternStats, Recommendation};
use crate::config::{DiagConfig, RunnerPacing};
use crate::inspector::{PatternKind, SessionAnalysis, Severity, StageInspector};
use crate::matrix::{self, Category, TestCase};

/// A live parser + renderer pair under instrumentation. One pipeline is
/// shared across all cases, so cases run strictly sequentially.
pub struct Pipeline {
    pub parser: Box<dyn ChunkParser + Send>,
    pub renderer: Renderer,
}

impl Pipeline {
    /// Reference pipeline: line parser plus a renderer with default pacing.
    pub fn with_line_parser() -> Self {
        Self {
            parser: Box::new(LineParser::new()),
            renderer: Renderer::new(),
        }
    }

    /// Reference pipeline with instant reveal, for fast diagnostic runs.
    pub fn with_line_parser_instant() -> Self {
        Self {
            parser: Box::new(LineParser::new()),
            renderer: Renderer::with_pacing(RevealPacing::instant()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub category: Category,
    pub name: &'static str,
    pub passed: bool,
    pub duration_ms: u64,
    pub output_chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
}

/// Duration statistics over successful cases only.
#[derive(Debug, Clone, Serialize)]
pub struct PerfStats {
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub failure_rate: f64,
    pub cases: Vec<CaseResult>,
    pub pattern_stats: Vec<PatternStats>,
    pub recommendations: Vec<Recommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perf: Option<PerfStats>,
}

/// Runs the fixed matrix sequentially through one instrumented pipeline.
pub struct SuiteRunner {
    inspector: StageInspector,
    classifier: FailureClassifier,
    pacing: RunnerPacing,
}

impl SuiteRunner {
    pub fn new(config: &DiagConfig) -> Self {
        Self {
            inspector: StageInspector::new(config.thresholds.clone()),
            classifier: FailureClassifier::new(config.thresholds.clone()),
            pacing: config.pacing.clone(),
        }
    }

    /// Runs every matrix case and aggregates the report. Classifier history
    /// is reset first so repeated invocations start clean.
    pub async fn run_all(&mut self, pipeline: &mut Pipeline) -> Result<SuiteReport> {
        self.classifier.reset();
        let mut results = Vec::new();
        for (index, case) in matrix::cases().iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.pacing.case_pause()).await;
            }
            tracing::debug!(case = case.name, "running matrix case");
            results.push(self.run_case(pipeline, case).await?);
        }

        let total = results.len();
        let failed = results.iter().filter(|result| !result.passed).count();
        let durations: Vec<u64> = results
            .iter()
            .filter(|result| result.passed)
            .map(|result| result.duration_ms)
            .collect();
        let perf = (!durations.is_empty()).then(|| PerfStats {
            avg_ms: durations.iter().sum::<u64>() as f64 / durations.len() as f64,
            min_ms: durations.iter().copied().min().unwrap_or(0),
            max_ms: durations.iter().copied().max().unwrap_or(0),
        });

        Ok(SuiteReport {
            total,
            passed: total - failed,
            failed,
            failure_rate: if total == 0 {
                0.0
            } else {
                failed as f64 * 100.0 / total as f64
            },
            cases: results,
            pattern_stats: self.classifier.pattern_stats(),
            recommendations: self.classifier.recommendations(),
            perf,
        })
    }

    async fn run_case(&mut self, pipeline: &mut Pipeline, case: &TestCase) -> Result<CaseResult> {
        self.inspector.start_session(case.name);
        pipeline.renderer.clear().await;
        pipeline.parser.reset();

        let started = Instant::now();
        let mut total_len = 0;
        for chunk in chunk_chars(case.input, self.pacing.chunk_size) {
            total_len += chunk.len();
            // Every pipeline entry point is mirrored into the inspector.
            self.inspector.capture_chunk(chunk, total_len);
            let instructions = pipeline.parser.process_chunk(chunk);
            self.inspector
                .capture_parse(&instructions, &pipeline.parser.state());
            if !instructions.is_empty() {
                for instruction in &instructions {
                    self.inspector.capture_replay(instruction);
                }
                pipeline.renderer.render(instructions).await?;
            }
            tokio::time::sleep(self.pacing.chunk_delay()).await;
        }

        let tail = pipeline.parser.finalize();
        self.inspector.capture_parse(&tail, &pipeline.parser.state());
        if !tail.is_empty() {
            for instruction in &tail {
                self.inspector.capture_replay(instruction);
            }
            pipeline.renderer.render(tail).await?;
        }
        // Let queued reveals land before the output is judged.
        pipeline.renderer.flush().await;

        let analysis = self
            .inspector
            .end_session()
            .context("diagnostic session vanished mid-case")?;
        let output = pipeline.renderer.serialize().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let output_chars = output.chars().count();
        let failed = is_failure(&analysis, output_chars, &self.pacing);
        let failure = failed.then(|| self.classifier.classify(&analysis, case.input, &output));

        Ok(CaseResult {
            category: case.category,
            name: case.name,
            passed: !failed,
            duration_ms,
            output_chars,
            failure,
        })
    }
}

/// Composite failure gate. Ordinary streaming-silence patterns do not count;
/// only high-severity issues, implausibly short output, or defect-marking
/// patterns fail a case.
fn is_failure(analysis: &SessionAnalysis, output_chars: usize, pacing: &RunnerPacing) -> bool {
    if analysis.max_issue_severity() == Some(Severity::High) {
        return true;
    }
    if output_chars < pacing.min_plausible_output {
        return true;
    }
    analysis.patterns.iter().any(|pattern| match pattern.pattern {
        PatternKind::ParseEmpty => pattern.critical,
        PatternKind::BufferTiming | PatternKind::ParseStateThrash => true,
    })
}

/// Splits `input` into chunks of `size` characters, never inside a char.
pub fn chunk_chars(input: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (offset, _) in input.char_indices() {
        if count == size {
            chunks.push(&input[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    if start < input.len() {
        chunks.push(&input[start..]);
    }
    chunks
}
