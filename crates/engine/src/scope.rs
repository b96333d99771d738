//! Closing transaction scopes.
//!
//! Components open a scope with `Session::begin`, do their work, and hand the
//! result to `finish`, so no scope outlives the call that opened it.

use crate::error::EngineResult;
use retaildwh_core::Session;
use tracing::warn;

/// Commit on success, roll back on failure.
///
/// A failed commit is also rolled back so the session is left without a scope.
pub(crate) async fn finish<S, T>(store: &mut S, result: EngineResult<T>) -> EngineResult<T>
where
    S: Session,
{
    match result {
        Ok(value) => match store.commit().await {
            Ok(()) => Ok(value),
            Err(err) => {
                abandon(store).await;
                Err(err.into())
            }
        },
        Err(err) => {
            abandon(store).await;
            Err(err)
        }
    }
}

/// Roll back whatever scope is open, logging a failed rollback.
pub(crate) async fn abandon<S: Session>(store: &mut S) {
    if let Err(err) = store.rollback().await {
        warn!(error = %err, "Rollback failed");
    }
}
