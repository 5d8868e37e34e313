//! Run domain types: evaluation units, scored results and run state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Scenario;
use crate::parser::CheckResult;

/// Lifecycle of a scored run. Transitions are monotonic:
/// `Pending -> Running -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Per-unit cell in the progress grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    Pending,
    Running,
    Ok,
    Error,
}

/// One (scenario, target skill, model) combination — the unit of concurrent
/// work. A run is exactly the cross-product built at start time.
#[derive(Debug, Clone)]
pub struct EvaluationUnit {
    pub scenario: Scenario,
    pub target: String,
    pub model: String,
}

/// Outcome of one evaluation unit. Appended once to the run accumulator and
/// never mutated afterwards. `checks` always covers the full scored
/// vocabulary; a unit-level failure sets `error` and leaves every check
/// `unclear`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredResult {
    pub scenario_id: String,
    /// The skill that was evaluated.
    pub skill: String,
    pub model: String,
    pub checks: Vec<CheckResult>,
    pub risk_level: String,
    /// Markdown analysis preceding the scoring block.
    pub markdown_response: String,
    pub duration_secs: f64,
    pub cost_info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request metadata persisted with every report snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
    pub concurrency: usize,
}

/// Progress grid: `scenario_id -> target skill -> model -> cell status`.
pub type ProgressGrid = BTreeMap<String, BTreeMap<String, BTreeMap<String, CellStatus>>>;

/// Point-in-time snapshot of a run, as returned by status queries. External
/// readers only ever see clones; the orchestrator owns the live state.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub run_id: String,
    pub status: RunStatus,
    pub models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
    pub concurrency: usize,
    pub total_units: usize,
    pub progress: ProgressGrid,
    pub result_count: usize,
    pub results: Vec<ScoredResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
