//! ETL run tracker.
//!
//! A run is created RUNNING and completed exactly once. Completion is guarded
//! on the RUNNING status. When the completion write itself fails, a second
//! write marks the run FAILED with that error; when that fails too the run is
//! left RUNNING and reported as orphaned. `reap_stale` is the only way such a
//! run is ever closed, and it only runs when a caller asks for it.

use crate::error::{EngineError, EngineResult};
use crate::scope;
use retaildwh_core::{EtlRun, RunCompletion, RunId, RunStatus, RunStore};
use std::time::Duration;
use tracing::{error, info, warn};

/// How a completion ended up being recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The requested status was written
    Recorded(RunStatus),
    /// The requested write failed; the run was marked FAILED with this error
    FellBack { error: String },
}

impl CompletionOutcome {
    /// The terminal status the run now has.
    pub fn status(&self) -> RunStatus {
        match self {
            CompletionOutcome::Recorded(status) => *status,
            CompletionOutcome::FellBack { .. } => RunStatus::Failed,
        }
    }
}

pub struct RunTracker<'a, S> {
    store: &'a mut S,
}

impl<'a, S: RunStore> RunTracker<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        RunTracker { store }
    }

    /// Insert a RUNNING run starting now.
    pub async fn start(&mut self, source_name: &str) -> EngineResult<RunId> {
        self.store.begin().await?;
        let result = self.store.insert_run(source_name).await.map_err(Into::into);
        let run_id = scope::finish(self.store, result).await?;
        info!(run_id, source_name, "Started ETL run");
        Ok(run_id)
    }

    /// Move a RUNNING run to its terminal state.
    ///
    /// **Run not RUNNING:** `EngineError::RunNotRunning`, nothing written.
    ///
    /// **Write failure:** fallback write of FAILED with the error message.
    ///
    /// **Fallback failure:** `EngineError::OrphanedRun`; the run stays RUNNING.
    pub async fn complete(
        &mut self,
        run_id: RunId,
        completion: &RunCompletion,
    ) -> EngineResult<CompletionOutcome> {
        let write_error = match self.write(run_id, completion).await {
            Ok(true) => {
                info!(run_id, status = %completion.status, "Completed ETL run");
                return Ok(CompletionOutcome::Recorded(completion.status));
            }
            Ok(false) => return Err(EngineError::RunNotRunning(run_id)),
            Err(err) => err.to_string(),
        };

        warn!(run_id, error = %write_error, "Completion write failed, recording failure instead");
        let fallback = RunCompletion {
            status: RunStatus::Failed,
            counters: completion.counters,
            error_message: Some(write_error.clone()),
        };
        match self.write(run_id, &fallback).await {
            Ok(true) => Ok(CompletionOutcome::FellBack { error: write_error }),
            Ok(false) => Err(EngineError::RunNotRunning(run_id)),
            Err(err) => {
                let reason = err.to_string();
                error!(run_id, error = %reason, "Could not record run failure, run left RUNNING");
                retaildwh_observability::record_run_orphaned(run_id, &reason);
                Err(EngineError::OrphanedRun { run_id, reason })
            }
        }
    }

    async fn write(&mut self, run_id: RunId, completion: &RunCompletion) -> EngineResult<bool> {
        self.store.begin().await?;
        let result = self
            .store
            .finish_run(run_id, completion)
            .await
            .map_err(Into::into);
        scope::finish(self.store, result).await
    }

    pub async fn fetch(&mut self, run_id: RunId) -> EngineResult<Option<EtlRun>> {
        Ok(self.store.fetch_run(run_id).await?)
    }

    /// Mark RUNNING runs started more than `older_than` ago as FAILED.
    pub async fn reap_stale(&mut self, older_than: Duration) -> EngineResult<u64> {
        let message = stale_run_message(older_than);
        self.store.begin().await?;
        let result = self
            .store
            .fail_stale_runs(older_than, &message)
            .await
            .map_err(Into::into);
        let reaped = scope::finish(self.store, result).await?;
        if reaped > 0 {
            warn!(reaped, older_than_secs = older_than.as_secs(), "Marked stale runs FAILED");
        }
        Ok(reaped)
    }
}

/// Error message written on reaped runs.
pub fn stale_run_message(older_than: Duration) -> String {
    format!(
        "Marked FAILED by stale run reaper: still RUNNING after {}s without a recorded completion",
        older_than.as_secs()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_outcome_is_failed() {
        let outcome = CompletionOutcome::FellBack {
            error: "connection reset".to_string(),
        };
        assert_eq!(outcome.status(), RunStatus::Failed);
        assert_eq!(
            CompletionOutcome::Recorded(RunStatus::Success).status(),
            RunStatus::Success
        );
    }

    #[test]
    fn test_stale_message_mentions_cutoff() {
        assert!(stale_run_message(Duration::from_secs(7200)).contains("7200s"));
    }
}
