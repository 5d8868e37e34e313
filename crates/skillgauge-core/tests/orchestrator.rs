//! End-to-end orchestrator tests with stub invokers and a real tempdir
//! catalog: cross-product execution, unit-failure capture, event streams,
//! persistence defects and registry eviction.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

use skillgauge_core::{
    scored_check_ids, CatalogConfig, CellStatus, CheckVerdict, CoreError, Invocation, InvokeError,
    ModelInvoker, ReportWriter, RunEvent, RunManager, RunStatus, DEV_EXCLUDED_CHECKS,
};

/// A response that passes every check in the vocabulary.
fn full_pass_response() -> String {
    let checks: serde_json::Map<String, serde_json::Value> = scored_check_ids()
        .into_iter()
        .map(|id| {
            (
                id.to_string(),
                serde_json::json!({"result": "pass", "evidence": "covered", "summary": "ok"}),
            )
        })
        .collect();
    let body = serde_json::json!({"checks": checks, "risk_level": "LOW"});
    format!("## Analysis\n\nLooks solid.\n\n```json\n{body}\n```")
}

struct StubInvoker {
    response: String,
}

#[async_trait]
impl ModelInvoker for StubInvoker {
    async fn invoke(
        &self,
        _model: &str,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<Invocation, InvokeError> {
        Ok(Invocation {
            text: self.response.clone(),
            duration_secs: 0.1,
            cost: "input=10, output=20".to_string(),
        })
    }
}

/// Fails every invocation for one model; succeeds for the rest.
struct FailingModelInvoker {
    bad_model: String,
    response: String,
}

#[async_trait]
impl ModelInvoker for FailingModelInvoker {
    async fn invoke(
        &self,
        model: &str,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<Invocation, InvokeError> {
        if model == self.bad_model {
            return Err(InvokeError::NonZeroExit {
                binary: "claude".to_string(),
                code: 1,
                stderr: "simulated CLI failure".to_string(),
            });
        }
        Ok(Invocation {
            text: self.response.clone(),
            duration_secs: 0.1,
            cost: String::new(),
        })
    }
}

/// Records the high-water mark of concurrent invocations.
struct SlowInvoker {
    in_flight: AtomicUsize,
    max_seen: AtomicUsize,
    response: String,
}

impl SlowInvoker {
    fn new(response: String) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            response,
        }
    }
}

#[async_trait]
impl ModelInvoker for SlowInvoker {
    async fn invoke(
        &self,
        _model: &str,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<Invocation, InvokeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Invocation {
            text: self.response.clone(),
            duration_secs: 0.025,
            cost: String::new(),
        })
    }
}

struct Fixture {
    _dir: TempDir,
    reports_dir: PathBuf,
    manager: RunManager,
}

/// Tempdir catalog: two news scenarios (dispatcher + one generalist fan-out)
/// and one dev scenario (specialist only).
fn fixture(invoker: Arc<dyn ModelInvoker>) -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let skills = dir.path().join("skills");
    fs::create_dir_all(&skills).expect("skills dir");
    for name in ["news-digest", "scraper", "dev-helper"] {
        fs::write(skills.join(format!("{name}.md")), format!("# {name} skill")).expect("skill");
    }

    let manifest_path = dir.path().join("skills_manifest.yaml");
    fs::write(
        &manifest_path,
        format!(
            r#"
skills:
  news-digest:
    path: {news}
    category: dispatcher
  scraper:
    path: {scraper}
    category: generalist
  dev-helper:
    path: {dev}
    category: dev
"#,
            news = skills.join("news-digest.md").display(),
            scraper = skills.join("scraper.md").display(),
            dev = skills.join("dev-helper.md").display(),
        ),
    )
    .expect("manifest");

    let scenarios_dir = dir.path().join("scenarios");
    fs::create_dir_all(&scenarios_dir).expect("scenarios dir");
    fs::write(
        scenarios_dir.join("news.yaml"),
        r#"
domain: news-monitoring
target_skill: news-digest
scenarios:
  - id: news-1
    name: Daily digest
    prompt: Summarize today's tech news
  - id: news-2
    name: Breaking alert
    prompt: Alert on breaking stories
"#,
    )
    .expect("news scenarios");
    fs::write(
        scenarios_dir.join("dev.yaml"),
        r#"
domain: dev-tools
target_skill: dev-helper
scenarios:
  - id: dev-1
    name: Scaffold helper
    prompt: Scaffold a new helper project
"#,
    )
    .expect("dev scenarios");

    let reports_dir = dir.path().join("reports");
    let manager = RunManager::new(
        CatalogConfig {
            scenarios_dir,
            manifest_path,
        },
        invoker,
        ReportWriter::new(&reports_dir),
    );
    Fixture {
        _dir: dir,
        reports_dir,
        manager,
    }
}

/// Collect every event through the `closed` sentinel.
async fn drain(mut rx: broadcast::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("event stream stalled")
            .expect("bus dropped before closed");
        let done = matches!(event, RunEvent::Closed);
        events.push(event);
        if done {
            return events;
        }
    }
}

fn models(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn full_run_covers_cross_product_and_persists_report() {
    let fx = fixture(Arc::new(StubInvoker {
        response: full_pass_response(),
    }));

    // 2 scenarios x (specialist + 1 generalist) x 2 models.
    let started = fx
        .manager
        .start_scored_run(
            Some(vec!["news-monitoring".to_string()]),
            models(&["sonnet", "haiku"]),
            3,
        )
        .expect("start");
    assert_eq!(started.total_units, 8);

    let events = drain(started.events).await;
    assert!(matches!(events[0], RunEvent::Started { total: 8, .. }));
    match events.last() {
        Some(RunEvent::Closed) => {}
        other => panic!("stream must end with closed, got {other:?}"),
    }
    match &events[events.len() - 2] {
        RunEvent::Completed { total_results, .. } => assert_eq!(*total_results, 8),
        other => panic!("expected completed before closed, got {other:?}"),
    }
    // One running and one terminal progress event per unit.
    let progress = events
        .iter()
        .filter(|e| matches!(e, RunEvent::Progress { .. }))
        .count();
    assert_eq!(progress, 16);

    let state = fx.manager.get_run(&started.run_id).expect("run state");
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.results.len(), 8);
    assert!(state.error.is_none());
    assert!(state.completed_at.is_some());
    for targets in state.progress.values() {
        for cells in targets.values() {
            for cell in cells.values() {
                assert_eq!(*cell, CellStatus::Ok);
            }
        }
    }

    let writer = ReportWriter::new(&fx.reports_dir);
    let report = writer
        .load(&writer.report_path(&started.run_id))
        .expect("report on disk");
    assert_eq!(report.run_id, started.run_id);
    assert_eq!(report.result_count, 8);
    // Checks are carried in taxonomy display order, not key order.
    for result in &report.results {
        let ids: Vec<&str> = result.checks.iter().map(|c| c.check_id.as_str()).collect();
        assert_eq!(ids, scored_check_ids());
    }
    assert!(!fx
        .reports_dir
        .join(format!("scored_run_{}.json.tmp", started.run_id))
        .exists());
}

#[tokio::test]
async fn grid_is_fully_populated_from_the_start() {
    let fx = fixture(Arc::new(StubInvoker {
        response: full_pass_response(),
    }));
    let started = fx
        .manager
        .start_scored_run(Some(vec!["news-monitoring".to_string()]), models(&["sonnet"]), 1)
        .expect("start");

    // Every cell exists as soon as the run is registered, whatever its state.
    let state = fx.manager.get_run(&started.run_id).expect("run state");
    let cells: usize = state
        .progress
        .values()
        .flat_map(|t| t.values())
        .map(|m| m.len())
        .sum();
    assert_eq!(cells, started.total_units);

    drain(started.events).await;
}

#[tokio::test]
async fn dev_scenarios_stay_specialist_only_with_na_rewrites() {
    let fx = fixture(Arc::new(StubInvoker {
        response: full_pass_response(),
    }));
    let started = fx
        .manager
        .start_scored_run(Some(vec!["dev-tools".to_string()]), models(&["sonnet"]), 2)
        .expect("start");
    // No generalist fan-out for dev-category specialists.
    assert_eq!(started.total_units, 1);
    drain(started.events).await;

    let state = fx.manager.get_run(&started.run_id).expect("run state");
    let result = &state.results[0];
    assert_eq!(result.skill, "dev-helper");
    for check in &result.checks {
        let expected = if DEV_EXCLUDED_CHECKS.contains(&check.check_id.as_str()) {
            CheckVerdict::Na
        } else {
            CheckVerdict::Pass
        };
        assert_eq!(check.result, expected, "check {}", check.check_id);
    }
}

#[tokio::test]
async fn unit_failures_are_captured_not_fatal() {
    let fx = fixture(Arc::new(FailingModelInvoker {
        bad_model: "haiku".to_string(),
        response: full_pass_response(),
    }));
    let started = fx
        .manager
        .start_scored_run(
            Some(vec!["news-monitoring".to_string()]),
            models(&["sonnet", "haiku"]),
            2,
        )
        .expect("start");
    let events = drain(started.events).await;
    assert!(matches!(
        events[events.len() - 2],
        RunEvent::Completed { .. }
    ));

    let state = fx.manager.get_run(&started.run_id).expect("run state");
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.results.len(), 8);

    let errored: Vec<_> = state.results.iter().filter(|r| r.error.is_some()).collect();
    assert_eq!(errored.len(), 4);
    for result in &errored {
        assert_eq!(result.model, "haiku");
        assert_eq!(result.risk_level, "UNKNOWN");
        assert!(result
            .checks
            .iter()
            .all(|c| c.result == CheckVerdict::Unclear));
    }
    for targets in state.progress.values() {
        for cells in targets.values() {
            assert_eq!(cells["sonnet"], CellStatus::Ok);
            assert_eq!(cells["haiku"], CellStatus::Error);
        }
    }
}

#[tokio::test]
async fn structural_problems_are_rejected_before_any_run_exists() {
    let fx = fixture(Arc::new(StubInvoker {
        response: full_pass_response(),
    }));

    let err = fx
        .manager
        .start_scored_run(Some(vec!["no-such-domain".to_string()]), models(&["sonnet"]), 1)
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownDomains(domains) if domains == ["no-such-domain"]));

    let err = fx
        .manager
        .start_scored_run(None, vec![], 1)
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidRequest(_)));

    let err = fx
        .manager
        .start_scored_run(None, models(&["sonnet"]), 0)
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidRequest(_)));

    assert_eq!(fx.manager.run_count(), 0);
}

#[tokio::test]
async fn missing_skill_file_is_rejected_at_start() {
    let fx = fixture(Arc::new(StubInvoker {
        response: full_pass_response(),
    }));
    // Remove a skill document the news scenarios fan out to.
    let state_err = {
        let skills_file = fx._dir.path().join("skills").join("scraper.md");
        fs::remove_file(skills_file).expect("remove skill");
        fx.manager
            .start_scored_run(Some(vec!["news-monitoring".to_string()]), models(&["sonnet"]), 1)
            .unwrap_err()
    };
    assert!(matches!(state_err, CoreError::Catalog(_)));
    assert_eq!(fx.manager.run_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_stays_within_the_requested_bound() {
    let invoker = Arc::new(SlowInvoker::new(full_pass_response()));
    let fx = fixture(Arc::clone(&invoker) as Arc<dyn ModelInvoker>);

    let started = fx
        .manager
        .start_scored_run(
            Some(vec!["news-monitoring".to_string()]),
            models(&["sonnet", "haiku"]),
            2,
        )
        .expect("start");
    drain(started.events).await;

    let max_seen = invoker.max_seen.load(Ordering::SeqCst);
    assert!(max_seen <= 2, "semaphore exceeded: {max_seen}");
    assert!(max_seen > 1, "units never overlapped");
}

#[tokio::test]
async fn persistence_defect_fails_the_run() {
    let dir = TempDir::new().expect("tempdir");
    let blocked = dir.path().join("reports");
    fs::write(&blocked, "a file where the reports dir should be").expect("block");

    let fx = fixture(Arc::new(StubInvoker {
        response: full_pass_response(),
    }));
    // Same catalog, but reports must land where a plain file already sits.
    let manager = RunManager::new(
        CatalogConfig {
            scenarios_dir: fx._dir.path().join("scenarios"),
            manifest_path: fx._dir.path().join("skills_manifest.yaml"),
        },
        Arc::new(StubInvoker {
            response: full_pass_response(),
        }),
        ReportWriter::new(&blocked),
    );

    let started = manager
        .start_scored_run(Some(vec!["news-monitoring".to_string()]), models(&["sonnet"]), 1)
        .expect("start");
    let events = drain(started.events).await;

    match &events[events.len() - 2] {
        RunEvent::Error { message, .. } => {
            assert!(message.contains("emergency save failed"), "{message}")
        }
        other => panic!("expected error event before closed, got {other:?}"),
    }
    let state = manager.get_run(&started.run_id).expect("run state");
    assert_eq!(state.status, RunStatus::Failed);
    assert!(state.error.is_some());
}

#[tokio::test]
async fn terminal_runs_are_evicted_beyond_the_retention_bound() {
    let fx = fixture(Arc::new(StubInvoker {
        response: full_pass_response(),
    }));
    let manager = fx.manager.with_retained_runs(1);

    let first = manager
        .start_scored_run(Some(vec!["dev-tools".to_string()]), models(&["sonnet"]), 1)
        .expect("first");
    let first_id = first.run_id.clone();
    drain(first.events).await;

    let second = manager
        .start_scored_run(Some(vec!["dev-tools".to_string()]), models(&["sonnet"]), 1)
        .expect("second");
    let second_id = second.run_id.clone();
    drain(second.events).await;

    // Registering a third run trims the oldest-finished terminal run.
    let third = manager
        .start_scored_run(Some(vec!["dev-tools".to_string()]), models(&["sonnet"]), 1)
        .expect("third");
    assert_eq!(manager.run_count(), 2);
    assert!(manager.get_run(&first_id).is_none());
    assert!(manager.get_run(&second_id).is_some());
    drain(third.events).await;
}

#[tokio::test]
async fn extra_subscribers_see_the_remainder_of_the_stream() {
    let fx = fixture(Arc::new(StubInvoker {
        response: full_pass_response(),
    }));
    let started = fx
        .manager
        .start_scored_run(Some(vec!["news-monitoring".to_string()]), models(&["sonnet"]), 2)
        .expect("start");
    let late = fx.manager.subscribe(&started.run_id).expect("subscribe");

    let events = drain(started.events).await;
    assert!(matches!(events[0], RunEvent::Started { .. }));

    // The late receiver still terminates with the sentinel.
    let late_events = drain(late).await;
    assert!(matches!(late_events.last(), Some(RunEvent::Closed)));
}
