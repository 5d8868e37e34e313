//! Per-run progress event bus.
//!
//! Single producer (the run loop), any number of consumers. Built on
//! `tokio::sync::broadcast`: a consumer that attaches late only observes the
//! remainder of the stream, which is all the contract requires. The stream
//! always ends with a terminal event (`completed` or `error`) followed by the
//! `closed` sentinel.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::run::CellStatus;

/// Discriminated progress events emitted over a run's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        run_id: String,
        total: usize,
    },
    Progress {
        scenario_id: String,
        skill: String,
        model: String,
        status: CellStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_secs: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Completed {
        run_id: String,
        report: String,
        total_results: usize,
    },
    Error {
        run_id: String,
        message: String,
    },
    /// End-of-stream sentinel; no further events follow.
    Closed,
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Completed { .. } | RunEvent::Error { .. })
    }
}

const BUS_CAPACITY: usize = 256;

/// Broadcast channel for one run's events.
#[derive(Debug)]
pub struct ProgressBus {
    tx: broadcast::Sender<RunEvent>,
}

impl ProgressBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Attach a new consumer. Only events published after this call are
    /// observed.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no live subscribers is not an error.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}
