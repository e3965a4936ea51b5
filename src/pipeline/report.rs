//! Per-stage and per-run accounting.

use serde::Serialize;
use std::fmt;
use tracing::warn;

use super::StageName;
use crate::error::StoreError;
use crate::feeds::FetchReport;

/// What happened to one item in one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The stage produced a new artifact and the item advanced (or was refreshed).
    Succeeded,
    /// An artifact from an earlier, interrupted run was reused.
    Reused,
    /// A recoverable failure was recorded; the item stays at its stage.
    Retried,
    /// The item is now `Failed`, or a forced re-run could not replace its artifact.
    Failed,
}

/// Counters for one stage of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: StageName,
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retried: usize,
    pub reused: usize,
}

impl StageReport {
    pub fn new(stage: StageName) -> Self {
        Self {
            stage,
            selected: 0,
            succeeded: 0,
            failed: 0,
            retried: 0,
            reused: 0,
        }
    }

    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded => self.succeeded += 1,
            ItemOutcome::Reused => self.reused += 1,
            ItemOutcome::Retried => self.retried += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }

    /// Fold the per-item results of a stage into a report.
    ///
    /// Fatal store errors abort the stage. Any other store error (a stale
    /// transition, a vanished artifact) is logged and counted as a failure for
    /// that item only.
    pub fn tally(
        stage: StageName,
        results: Vec<(String, Result<ItemOutcome, StoreError>)>,
    ) -> Result<Self, StoreError> {
        let mut report = Self::new(stage);
        report.selected = results.len();
        for (id, result) in results {
            match result {
                Ok(outcome) => report.record(outcome),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(stage = %stage, %id, error = %e, "State transition rejected");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} selected={} succeeded={} reused={} retried={} failed={}",
            self.stage, self.selected, self.succeeded, self.reused, self.retried, self.failed
        )
    }
}

/// Everything a run did, in stage order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub stages: Vec<StageReport>,
    /// Feed-level counts, when the fetch stage ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch: Option<FetchReport>,
    /// Ids of the items that reached (or refreshed) `Summarized` in this run.
    pub summarized: Vec<String>,
}

impl RunReport {
    pub fn stage(&self, name: StageName) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }
}
