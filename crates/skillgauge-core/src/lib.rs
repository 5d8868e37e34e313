//! Skillgauge Core Library
//!
//! Orchestrates scored evaluation runs over a catalog of scenarios and skill
//! documents:
//! - taxonomy: the fixed check vocabulary (WF/DK/APF/SEC groups)
//! - catalog: domain scenario files and the skill manifest
//! - prompts: scoring system prompt and per-unit user prompt
//! - invoke: the external model CLI boundary
//! - parser: semi-structured scoring response parsing with total fallbacks
//! - orchestrator: bounded-concurrency run execution with progress events
//! - report: crash-safe incremental JSON report snapshots

pub mod catalog;
pub mod error;
pub mod events;
pub mod invoke;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod report;
pub mod run;
pub mod taxonomy;

pub use catalog::{load_domain_scenarios, resolve_targets, Scenario, SkillEntry, SkillManifest};
pub use error::{CatalogError, CoreError, Result};
pub use events::{ProgressBus, RunEvent};
pub use invoke::{CliInvoker, Invocation, InvokeError, ModelInvoker};
pub use orchestrator::{
    CatalogConfig, RunManager, StartedRun, DEFAULT_CONCURRENCY, DEFAULT_MODELS,
};
pub use parser::{
    checks_in_display_order, parse_scoring_response, CheckResult, CheckVerdict, ParsedScoring,
};
pub use report::{ReportWriter, ScoredReport};
pub use run::{
    CellStatus, EvaluationUnit, ProgressGrid, RunMetadata, RunState, RunStatus, ScoredResult,
};
pub use taxonomy::{
    check_group, group_checks, scored_check_ids, scored_checks, vocabulary_size, CheckDefinition,
    Severity, DEV_EXCLUDED_CHECKS, GROUPS,
};

/// Skillgauge core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
