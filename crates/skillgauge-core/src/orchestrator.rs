//! Scored-run orchestration.
//!
//! [`RunManager`] owns every run for its lifetime: it validates the request,
//! builds the (scenario × target skill × model) cross-product, pre-populates
//! the progress grid, then drives all units concurrently behind a counting
//! semaphore. Unit failures (invocation errors, missing skill files) are
//! folded into errored results and never abort the run; only defects on the
//! persistence path or panics escaping a unit fail the whole run, after a
//! best-effort emergency save.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::{self, SkillManifest};
use crate::error::{CoreError, Result};
use crate::events::{ProgressBus, RunEvent};
use crate::invoke::{InvokeError, ModelInvoker};
use crate::parser::{self, CheckResult};
use crate::prompts;
use crate::report::ReportWriter;
use crate::run::{
    CellStatus, EvaluationUnit, ProgressGrid, RunMetadata, RunState, RunStatus, ScoredResult,
};
use crate::taxonomy::DEV_EXCLUDED_CHECKS;

pub const DEFAULT_MODELS: &[&str] = &["sonnet", "opus", "haiku"];
pub const DEFAULT_CONCURRENCY: usize = 3;

/// How many terminal runs are retained in memory before the oldest-finished
/// ones are evicted. Live runs are never evicted.
const DEFAULT_RETAINED_RUNS: usize = 64;

/// Where to find the scenario catalog and skill manifest.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub scenarios_dir: PathBuf,
    pub manifest_path: PathBuf,
}

/// Returned by [`RunManager::start_scored_run`]. The receiver was attached
/// before the run loop was spawned, so it observes the full event stream.
#[derive(Debug)]
pub struct StartedRun {
    pub run_id: String,
    pub total_units: usize,
    pub events: broadcast::Receiver<RunEvent>,
}

/// A unit-level failure, caught inside the unit boundary.
#[derive(Error, Debug)]
enum UnitError {
    #[error(transparent)]
    Catalog(#[from] crate::error::CatalogError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

struct RunInner {
    status: RunStatus,
    progress: ProgressGrid,
    results: Vec<ScoredResult>,
    error: Option<String>,
    started_at: chrono::DateTime<Utc>,
    completed_at: Option<chrono::DateTime<Utc>>,
}

/// Live state of one run. The run loop is the only mutator; status queries
/// and event subscribers read cloned snapshots.
struct RunHandle {
    run_id: String,
    metadata: RunMetadata,
    total_units: usize,
    bus: ProgressBus,
    inner: StdMutex<RunInner>,
    /// Serializes report snapshots so concurrent units never interleave
    /// writes; a unit's semaphore slot is held until its snapshot lands.
    save_lock: Mutex<()>,
}

impl RunHandle {
    fn new(run_id: String, metadata: RunMetadata, total_units: usize, progress: ProgressGrid) -> Self {
        Self {
            run_id,
            metadata,
            total_units,
            bus: ProgressBus::new(),
            inner: StdMutex::new(RunInner {
                status: RunStatus::Pending,
                progress,
                results: Vec::new(),
                error: None,
                started_at: Utc::now(),
                completed_at: None,
            }),
            save_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunInner> {
        self.inner.lock().expect("run state lock poisoned")
    }

    /// Status transitions are monotonic; terminal states are never left.
    fn transition(&self, status: RunStatus, error: Option<String>) {
        let mut inner = self.lock();
        if inner.status.is_terminal() {
            return;
        }
        inner.status = status;
        if status.is_terminal() {
            inner.completed_at = Some(Utc::now());
            inner.error = error;
        }
    }

    fn set_cell(&self, unit: &EvaluationUnit, status: CellStatus) {
        let mut inner = self.lock();
        if let Some(cell) = inner
            .progress
            .get_mut(&unit.scenario.id)
            .and_then(|targets| targets.get_mut(&unit.target))
            .and_then(|models| models.get_mut(&unit.model))
        {
            *cell = status;
        }
    }

    /// Append one result and return the accumulator for persistence.
    fn push_result(&self, result: ScoredResult) -> Vec<ScoredResult> {
        let mut inner = self.lock();
        inner.results.push(result);
        inner.results.clone()
    }

    fn results_snapshot(&self) -> Vec<ScoredResult> {
        self.lock().results.clone()
    }

    fn snapshot(&self) -> RunState {
        let inner = self.lock();
        RunState {
            run_id: self.run_id.clone(),
            status: inner.status,
            models: self.metadata.models.clone(),
            domains: self.metadata.domains.clone(),
            concurrency: self.metadata.concurrency,
            total_units: self.total_units,
            progress: inner.progress.clone(),
            result_count: inner.results.len(),
            results: inner.results.clone(),
            error: inner.error.clone(),
            started_at: inner.started_at,
            completed_at: inner.completed_at,
        }
    }
}

/// Owns all scored runs in the process. One instance per service.
pub struct RunManager {
    catalog: CatalogConfig,
    invoker: Arc<dyn ModelInvoker>,
    writer: ReportWriter,
    runs: StdMutex<HashMap<String, Arc<RunHandle>>>,
    retained_runs: usize,
}

impl RunManager {
    pub fn new(catalog: CatalogConfig, invoker: Arc<dyn ModelInvoker>, writer: ReportWriter) -> Self {
        Self {
            catalog,
            invoker,
            writer,
            runs: StdMutex::new(HashMap::new()),
            retained_runs: DEFAULT_RETAINED_RUNS,
        }
    }

    /// Override the terminal-run retention bound (mainly for tests).
    pub fn with_retained_runs(mut self, retained: usize) -> Self {
        self.retained_runs = retained;
        self
    }

    /// Start a scored run and return immediately; execution proceeds on a
    /// spawned task. Structural problems with the request (unknown domains,
    /// empty unit set, targets missing from the manifest or from disk) are
    /// reported here and no run is created.
    #[instrument(skip(self))]
    pub fn start_scored_run(
        &self,
        domains: Option<Vec<String>>,
        models: Vec<String>,
        concurrency: usize,
    ) -> Result<StartedRun> {
        if models.is_empty() {
            return Err(CoreError::InvalidRequest("no models requested".into()));
        }
        if concurrency == 0 {
            return Err(CoreError::InvalidRequest(
                "concurrency must be at least 1".into(),
            ));
        }

        let manifest = SkillManifest::load(&self.catalog.manifest_path)?;
        let by_domain = catalog::load_domain_scenarios(&self.catalog.scenarios_dir)?;

        let scenarios: Vec<_> = match &domains {
            Some(requested) => {
                let unknown: Vec<String> = requested
                    .iter()
                    .filter(|d| !by_domain.contains_key(*d))
                    .cloned()
                    .collect();
                if !unknown.is_empty() {
                    return Err(CoreError::UnknownDomains(unknown));
                }
                requested
                    .iter()
                    .flat_map(|d| by_domain[d].iter().cloned())
                    .collect()
            }
            None => by_domain.values().flatten().cloned().collect(),
        };
        if scenarios.is_empty() {
            return Err(CoreError::InvalidRequest(
                "no scenarios match the request".into(),
            ));
        }

        // Build the full unit cross-product up front; every target must be
        // structurally sound before anything is scheduled.
        let mut units = Vec::new();
        let mut progress: ProgressGrid = ProgressGrid::new();
        for scenario in &scenarios {
            let targets = catalog::resolve_targets(scenario, &manifest);
            for target in &targets {
                let entry = manifest.get(target).ok_or_else(|| {
                    crate::error::CatalogError::UnknownSkill {
                        name: target.clone(),
                    }
                })?;
                if !entry.path.exists() {
                    return Err(crate::error::CatalogError::SkillFileMissing {
                        path: entry.path.clone(),
                    }
                    .into());
                }
                for model in &models {
                    progress
                        .entry(scenario.id.clone())
                        .or_default()
                        .entry(target.clone())
                        .or_default()
                        .insert(model.clone(), CellStatus::Pending);
                    units.push(EvaluationUnit {
                        scenario: scenario.clone(),
                        target: target.clone(),
                        model: model.clone(),
                    });
                }
            }
        }

        let run_id = new_run_id();
        let metadata = RunMetadata {
            models,
            domains,
            concurrency,
        };
        let handle = Arc::new(RunHandle::new(
            run_id.clone(),
            metadata,
            units.len(),
            progress,
        ));
        // Subscribe before spawning so the caller sees the whole stream.
        let events = handle.bus.subscribe();

        {
            let mut runs = self.runs.lock().expect("run registry lock poisoned");
            runs.insert(run_id.clone(), Arc::clone(&handle));
        }
        self.evict_stale_runs();

        info!(run_id = %run_id, total_units = units.len(), "scored run registered");

        let invoker = Arc::clone(&self.invoker);
        let writer = self.writer.clone();
        let manifest = Arc::new(manifest);
        let task_handle = Arc::clone(&handle);
        tokio::spawn(async move {
            execute_run(task_handle, units, manifest, invoker, writer).await;
        });

        Ok(StartedRun {
            run_id,
            total_units: handle.total_units,
            events,
        })
    }

    /// Snapshot of a run's current state.
    pub fn get_run(&self, run_id: &str) -> Option<RunState> {
        let runs = self.runs.lock().expect("run registry lock poisoned");
        runs.get(run_id).map(|h| h.snapshot())
    }

    /// Attach a progress subscriber to a live (or finished) run.
    pub fn subscribe(&self, run_id: &str) -> Option<broadcast::Receiver<RunEvent>> {
        let runs = self.runs.lock().expect("run registry lock poisoned");
        runs.get(run_id).map(|h| h.bus.subscribe())
    }

    /// Number of runs currently held in the registry.
    pub fn run_count(&self) -> usize {
        self.runs.lock().expect("run registry lock poisoned").len()
    }

    /// Drop the oldest-finished terminal runs beyond the retention bound.
    fn evict_stale_runs(&self) {
        let mut runs = self.runs.lock().expect("run registry lock poisoned");
        let mut terminal: Vec<(String, chrono::DateTime<Utc>)> = runs
            .iter()
            .filter_map(|(id, handle)| {
                let inner = handle.lock();
                inner
                    .status
                    .is_terminal()
                    .then(|| (id.clone(), inner.completed_at.unwrap_or(inner.started_at)))
            })
            .collect();
        if terminal.len() <= self.retained_runs {
            return;
        }
        terminal.sort_by_key(|(_, finished)| *finished);
        let excess = terminal.len() - self.retained_runs;
        for (id, _) in terminal.into_iter().take(excess) {
            runs.remove(&id);
            info!(run_id = %id, "evicted terminal run from registry");
        }
    }
}

fn new_run_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..12].to_string()
}

#[instrument(skip_all, fields(run_id = %handle.run_id))]
async fn execute_run(
    handle: Arc<RunHandle>,
    units: Vec<EvaluationUnit>,
    manifest: Arc<SkillManifest>,
    invoker: Arc<dyn ModelInvoker>,
    writer: ReportWriter,
) {
    handle.transition(RunStatus::Running, None);
    handle.bus.publish(RunEvent::Started {
        run_id: handle.run_id.clone(),
        total: handle.total_units,
    });
    info!(total = handle.total_units, "scored run started");

    let semaphore = Arc::new(Semaphore::new(handle.metadata.concurrency));
    let mut tasks = JoinSet::new();
    for unit in units {
        let handle = Arc::clone(&handle);
        let manifest = Arc::clone(&manifest);
        let invoker = Arc::clone(&invoker);
        let writer = writer.clone();
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            run_unit(handle, unit, manifest, invoker, writer, semaphore).await
        });
    }

    let mut defect: Option<String> = None;
    while let Some(joined) = tasks.join_next().await {
        let message = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err.to_string(),
            Err(join_err) if join_err.is_cancelled() => continue,
            Err(join_err) => format!("evaluation task panicked: {join_err}"),
        };
        if defect.is_none() {
            // A defect, not a unit failure: abort the rest of the run.
            defect = Some(message);
            tasks.abort_all();
        }
    }

    match defect {
        None => {
            handle.transition(RunStatus::Completed, None);
            let report = writer.report_path(&handle.run_id);
            let total_results = handle.results_snapshot().len();
            info!(total_results, report = %report.display(), "scored run completed");
            handle.bus.publish(RunEvent::Completed {
                run_id: handle.run_id.clone(),
                report: report.display().to_string(),
                total_results,
            });
        }
        Some(mut message) => {
            // Emergency save of whatever finished before the defect.
            let _save = handle.save_lock.lock().await;
            let results = handle.results_snapshot();
            if let Err(save_err) =
                writer.persist(&handle.run_id, &results, &handle.metadata)
            {
                warn!(error = %save_err, "emergency save failed");
                message = format!("{message}; emergency save failed: {save_err}");
            }
            drop(_save);

            error!(error = %message, "scored run failed");
            handle.transition(RunStatus::Failed, Some(message.clone()));
            handle.bus.publish(RunEvent::Error {
                run_id: handle.run_id.clone(),
                message,
            });
        }
    }

    handle.bus.publish(RunEvent::Closed);
}

/// Drive one unit: invoke, parse, append, persist. Returns `Err` only for
/// defects (persistence failures); unit-level trouble becomes an errored
/// [`ScoredResult`].
async fn run_unit(
    handle: Arc<RunHandle>,
    unit: EvaluationUnit,
    manifest: Arc<SkillManifest>,
    invoker: Arc<dyn ModelInvoker>,
    writer: ReportWriter,
    semaphore: Arc<Semaphore>,
) -> Result<()> {
    let _permit = semaphore.acquire_owned().await.ok();

    handle.set_cell(&unit, CellStatus::Running);
    handle.bus.publish(RunEvent::Progress {
        scenario_id: unit.scenario.id.clone(),
        skill: unit.target.clone(),
        model: unit.model.clone(),
        status: CellStatus::Running,
        duration_secs: None,
        error: None,
    });

    let result = evaluate_unit(&unit, &manifest, invoker.as_ref()).await;
    let cell = if result.error.is_some() {
        CellStatus::Error
    } else {
        CellStatus::Ok
    };
    let duration_secs = result.duration_secs;
    let unit_error = result.error.clone();

    {
        let _save = handle.save_lock.lock().await;
        let results = handle.push_result(result);
        writer.persist(&handle.run_id, &results, &handle.metadata)?;
    }

    handle.set_cell(&unit, cell);
    handle.bus.publish(RunEvent::Progress {
        scenario_id: unit.scenario.id.clone(),
        skill: unit.target.clone(),
        model: unit.model.clone(),
        status: cell,
        duration_secs: Some(duration_secs),
        error: unit_error,
    });
    Ok(())
}

/// Evaluate one unit, converting any failure into an errored result.
async fn evaluate_unit(
    unit: &EvaluationUnit,
    manifest: &SkillManifest,
    invoker: &dyn ModelInvoker,
) -> ScoredResult {
    match try_evaluate_unit(unit, manifest, invoker).await {
        Ok(result) => result,
        Err(err) => {
            warn!(
                scenario = %unit.scenario.id,
                skill = %unit.target,
                model = %unit.model,
                error = %err,
                "evaluation unit failed"
            );
            errored_result(unit, &err)
        }
    }
}

async fn try_evaluate_unit(
    unit: &EvaluationUnit,
    manifest: &SkillManifest,
    invoker: &dyn ModelInvoker,
) -> std::result::Result<ScoredResult, UnitError> {
    let skill_content = manifest.read_skill(&unit.target)?;
    let user_prompt = prompts::unit_user_prompt(&skill_content, &unit.scenario.prompt);
    let invocation = invoker
        .invoke(&unit.model, prompts::scoring_system_prompt(), &user_prompt)
        .await?;

    let parsed = parser::parse_scoring_response(&invocation.text);
    let mut checks = parsed.checks;
    if manifest.is_dev(&unit.scenario.target_skill) {
        for id in DEV_EXCLUDED_CHECKS {
            if let Some(slot) = checks.get_mut(*id) {
                *slot = CheckResult::not_applicable(id, "Not applicable for dev skills");
            }
        }
    }

    Ok(ScoredResult {
        scenario_id: unit.scenario.id.clone(),
        skill: unit.target.clone(),
        model: unit.model.clone(),
        checks: parser::checks_in_display_order(checks),
        risk_level: parsed.risk_level,
        markdown_response: parsed.narrative,
        duration_secs: (invocation.duration_secs * 10.0).round() / 10.0,
        cost_info: invocation.cost,
        error: None,
    })
}

fn errored_result(unit: &EvaluationUnit, err: &UnitError) -> ScoredResult {
    ScoredResult {
        scenario_id: unit.scenario.id.clone(),
        skill: unit.target.clone(),
        model: unit.model.clone(),
        checks: parser::checks_in_display_order(parser::unclear_for_all(&format!("Error: {err}"))),
        risk_level: "UNKNOWN".to_string(),
        markdown_response: String::new(),
        duration_secs: 0.0,
        cost_info: String::new(),
        error: Some(err.to_string()),
    }
}
