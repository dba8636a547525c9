//! Diagnostic thresholds and runner pacing.
//!
//! All limits are empirically tuned rather than formally derived; they are
//! plain named fields so a config file can override any of them. Loaded from
//! TOML with per-field defaults, the same shape the rest of the workspace
//! uses for configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Detection thresholds for the stage inspector and classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Inter-chunk gap above which a buffer timing violation is recorded.
    pub buffer_gap_ms: u64,
    /// Empty-decision ratio at or above which PARSE_EMPTY may fire.
    pub empty_parse_ratio: f64,
    /// PARSE_EMPTY needs more attempts than this before it can fire; empty
    /// decisions are normal during legitimate streaming silence.
    pub min_empty_parse_attempts: usize,
    /// PARSE_EMPTY also requires combined parse-instruction + replay-op
    /// activity below this count.
    pub max_low_activity_ops: usize,
    /// Absolute state-transition count above which PARSE_STATE_THRASH fires.
    pub state_thrash_count: usize,
    /// Transition/decision ratio above which PARSE_STATE_THRASH fires, given
    /// enough decisions.
    pub state_thrash_ratio: f64,
    /// Minimum decisions before the thrash ratio test applies.
    pub min_thrash_decisions: usize,
    /// Normalized parse/replay difference above which STAGE_MISMATCH fires.
    pub stage_mismatch_ratio: f64,
    /// UNCLOSED_CODE_BLOCK needs more code-block starts than this (and zero
    /// ends) before firing.
    pub unclosed_fence_min_starts: usize,
    /// State-change count above which the classifier attributes the failure
    /// to the parse stage.
    pub classifier_state_changes: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            buffer_gap_ms: 150,
            empty_parse_ratio: 0.98,
            min_empty_parse_attempts: 20,
            max_low_activity_ops: 5,
            state_thrash_count: 10,
            state_thrash_ratio: 0.30,
            min_thrash_decisions: 5,
            stage_mismatch_ratio: 0.8,
            unclosed_fence_min_starts: 2,
            classifier_state_changes: 5,
        }
    }
}

/// Pacing for the systematic runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerPacing {
    /// Characters per chunk fed to the parser.
    pub chunk_size: usize,
    /// Delay between chunks.
    pub chunk_delay_ms: u64,
    /// Pause between test cases.
    pub case_pause_ms: u64,
    /// Serialized output shorter than this is implausible and counts as a
    /// failure.
    pub min_plausible_output: usize,
}

impl Default for RunnerPacing {
    fn default() -> Self {
        Self {
            chunk_size: 3,
            chunk_delay_ms: 10,
            case_pause_ms: 500,
            min_plausible_output: 10,
        }
    }
}

impl RunnerPacing {
    /// Zero delays everywhere; used by tests and `--fast` runs.
    pub fn instant() -> Self {
        Self {
            chunk_delay_ms: 0,
            case_pause_ms: 0,
            ..Self::default()
        }
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn case_pause(&self) -> Duration {
        Duration::from_millis(self.case_pause_ms)
    }
}

/// Top-level diagnostics configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagConfig {
    pub thresholds: Thresholds,
    pub pacing: RunnerPacing,
}

impl DiagConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Missing file falls back to defaults; a present-but-broken file is an
    /// error worth surfacing.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }
}
