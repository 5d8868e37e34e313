//! Atomic scored-report persistence.
//!
//! Every snapshot is a complete, valid JSON document written to a temporary
//! path and renamed onto `scored_run_<run_id>.json`. Readers therefore never
//! observe a half-written file; after a crash the canonical path holds the
//! last snapshot that completed. The writer has no internal locking — the
//! orchestrator serializes concurrent calls for the same run.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::run::{RunMetadata, ScoredResult};

/// On-disk shape of one scored report snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredReport {
    #[serde(rename = "type")]
    pub kind: String,
    pub generated: DateTime<Utc>,
    pub run_id: String,
    #[serde(flatten)]
    pub metadata: RunMetadata,
    pub result_count: usize,
    pub results: Vec<ScoredResult>,
}

/// Writes and reads scored-run report files under one directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    reports_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Canonical report path for a run id.
    pub fn report_path(&self, run_id: &str) -> PathBuf {
        self.reports_dir.join(format!("scored_run_{run_id}.json"))
    }

    /// Overwrite the run's report with the current accumulator (atomic).
    ///
    /// Safe to call repeatedly; each call replaces the previous snapshot in
    /// one rename. Callers must serialize concurrent calls per run id.
    pub fn persist(
        &self,
        run_id: &str,
        results: &[ScoredResult],
        metadata: &RunMetadata,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.reports_dir)?;
        let path = self.report_path(run_id);
        let tmp_path = path.with_extension("json.tmp");

        let report = ScoredReport {
            kind: "scored".to_string(),
            generated: Utc::now(),
            run_id: run_id.to_string(),
            metadata: metadata.clone(),
            result_count: results.len(),
            results: results.to_vec(),
        };
        let body = serde_json::to_string_pretty(&report)?;
        fs::write(&tmp_path, body)?;
        // Atomic on the same filesystem; readers see old or new, never a mix.
        fs::rename(&tmp_path, &path)?;
        debug!(run_id, result_count = results.len(), path = %path.display(), "report snapshot persisted");
        Ok(path)
    }

    /// Load one report file.
    pub fn load(&self, path: &Path) -> Result<ScoredReport> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load every readable scored report, newest first by generation time.
    /// Unreadable or foreign files are skipped with a warning.
    pub fn load_all(&self) -> Vec<(PathBuf, ScoredReport)> {
        let Ok(entries) = fs::read_dir(&self.reports_dir) else {
            return Vec::new();
        };
        let mut reports: Vec<(PathBuf, ScoredReport)> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("scored_run_") && n.ends_with(".json"))
            })
            .filter_map(|path| match self.load(&path) {
                Ok(report) => Some((path, report)),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable report");
                    None
                }
            })
            .collect();
        reports.sort_by(|a, b| b.1.generated.cmp(&a.1.generated));
        reports
    }
}
