// src/executor.rs
//
// =============================================================================
// WORKCELL CORE: PROTOCOL RUN EXECUTOR (C11)
// =============================================================================
//
// Grounded on `celery_tasks.py`'s three-function shape: a dispatch-layer
// entry point that's sync (so it can be handed to any task queue), an async
// body that does the real work, and a last-resort status updater with its
// own independent error handling so a failure while recording a failure
// still leaves the run in a terminal state instead of stuck in RUNNING
// forever.
//
// Two changes from that source: `execute_protocol_run_task` bridges sync to
// async through a shared, lazily-built `tokio::runtime::Runtime` rather than
// `asyncio.run(...)` — spec §9 explicitly flags the nested-event-loop
// anti-pattern a naive port would reproduce, since a long-lived dispatch
// process can't afford to spin up and tear down an executor thread pool on
// every call. And `ExecutionContext` is an explicit struct threaded through
// by the caller, not a module-level global swapped in by an
// `initialize_celery_context` call — see DESIGN.md's note on that open
// question.

use crate::acquire::AssetRequirement;
use crate::enums::ProtocolRunStatus;
use crate::errors::CoreResult;
use crate::locks::AssetLockManager;
use crate::orchestrator::Orchestrator;
use crate::runtime::FunctionCall;
use crate::store::{self, runs};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Everything a single `execute_protocol_run` call needs. Built once per
/// process (or per worker) and shared across calls — the opposite of the
/// source system's single mutable global, so tests can run several
/// contexts against different databases in the same process.
#[derive(Clone)]
pub struct ExecutionContext {
    pub db_path: PathBuf,
    pub lock_manager: Arc<dyn AssetLockManager>,
    pub orchestrator: Arc<dyn Orchestrator>,
}

impl ExecutionContext {
    pub fn new(
        db_path: impl Into<PathBuf>,
        lock_manager: Arc<dyn AssetLockManager>,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            lock_manager,
            orchestrator,
        }
    }

    /// Confirms the store is reachable — used by the CLI's `health` command
    /// and by readiness probes in a dispatcher front-end.
    pub fn health_check(&self) -> CoreResult<()> {
        let conn = store::open(&self.db_path)?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

fn shared_runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to build shared executor runtime")
    })
}

/// Synchronous entry point for callers outside an async context (a worker
/// pool, a CLI subcommand). Runs the async body on a long-lived shared
/// runtime instead of spinning one up per call.
pub fn execute_protocol_run_blocking(
    ctx: &ExecutionContext,
    run_accession_id: Uuid,
    requirements: Vec<AssetRequirement>,
    protocol_calls: Vec<FunctionCall>,
) -> CoreResult<()> {
    shared_runtime().block_on(execute_protocol_run(ctx, run_accession_id, requirements, protocol_calls))
}

/// Runs a protocol run to completion: `QUEUED` -> `PENDING` -> `PREPARING` ->
/// `RUNNING` -> delegate asset acquisition and every call to the orchestrator
/// -> `COMPLETED` or `FAILED`. Locks held by the run are always released on
/// the way out, success or failure, mirroring the always-finalize shape of
/// the teacher's `execute_lifecycle`.
pub async fn execute_protocol_run(
    ctx: &ExecutionContext,
    run_accession_id: Uuid,
    requirements: Vec<AssetRequirement>,
    protocol_calls: Vec<FunctionCall>,
) -> CoreResult<()> {
    let mut conn = store::open(&ctx.db_path)?;
    runs::update_run_status(&mut conn, &run_accession_id, ProtocolRunStatus::Pending, None)?;
    runs::update_run_status(&mut conn, &run_accession_id, ProtocolRunStatus::Preparing, None)?;
    runs::update_run_status(&mut conn, &run_accession_id, ProtocolRunStatus::Running, None)?;

    log::info!("run {} starting, {} calls queued", run_accession_id, protocol_calls.len());

    // This is the crate's one broad-catch choke point (spec §7): any error
    // surfacing from the orchestrator, however deep, terminates the run
    // rather than propagating to the caller. The source system's
    // `_execute_protocol_async` carries the identical comment justifying a
    // blanket `except Exception` here, for the same reason — a protocol
    // step can fail in ways this crate can't enumerate in advance (a
    // malformed driver response, a timeout, a disconnected instrument), and
    // every one of them must still leave the run in a terminal, lock-free
    // state.
    let result = ctx
        .orchestrator
        .execute_existing_protocol_run(&conn, &run_accession_id, &requirements, &protocol_calls)
        .await;

    let outcome = match result {
        Ok(output) => {
            if let Err(e) = runs::set_output_data(&conn, &run_accession_id, output) {
                log::error!("run {} completed but failed to persist output: {}", run_accession_id, e);
            }
            runs::update_run_status(&mut conn, &run_accession_id, ProtocolRunStatus::Completed, None)
        }
        Err(e) => {
            log::error!("run {} failed: {}", run_accession_id, e);
            runs::update_run_status(&mut conn, &run_accession_id, ProtocolRunStatus::Failed, Some(&e.to_string()))
        }
    };

    match ctx.lock_manager.release_all_protocol_locks(&run_accession_id).await {
        Ok(released) => log::info!("run {} released {} remaining lock(s)", run_accession_id, released),
        Err(e) => log::error!("run {} finished but failed to release its locks: {}", run_accession_id, e),
    }

    // Last-resort marker, mirroring `_update_run_status_on_error`: if even
    // the status update above failed (a DB outage mid-run), make one more
    // attempt to leave a record rather than leaving the run silently stuck
    // in RUNNING. Its own error is logged, not propagated — there is
    // nothing further upstream to hand it to.
    if let Err(e) = outcome {
        log::error!("run {} could not record its terminal status: {}", run_accession_id, e);
        if let Err(e2) = mark_failed_best_effort(&ctx.db_path, &run_accession_id, &e.to_string()) {
            log::error!("run {} last-resort failure marker also failed: {}", run_accession_id, e2);
        }
    }

    Ok(())
}

fn mark_failed_best_effort(db_path: &PathBuf, run_accession_id: &Uuid, message: &str) -> CoreResult<()> {
    let mut conn = store::open(db_path)?;
    runs::update_run_status(&mut conn, run_accession_id, ProtocolRunStatus::Failed, Some(message))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::InMemoryLockManager;
    use crate::orchestrator::InProcessOrchestrator;
    use crate::runtime::InMemoryRuntime;
    use crate::store::test_support::temp_store;

    fn ctx_for(db_path: PathBuf, runtime: Arc<InMemoryRuntime>) -> ExecutionContext {
        let lock_manager: Arc<dyn AssetLockManager> = Arc::new(InMemoryLockManager::default());
        ExecutionContext::new(
            db_path,
            lock_manager.clone(),
            Arc::new(InProcessOrchestrator::new(runtime, lock_manager)),
        )
    }

    #[tokio::test]
    async fn successful_run_ends_completed() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        let run = runs::create_run(&conn, &Uuid::nil(), serde_json::json!({})).unwrap();
        let db_path = conn.path().unwrap().to_path_buf();
        drop(conn);

        let runtime = Arc::new(InMemoryRuntime::new().with_response("aspirate", serde_json::json!("done")));
        let ctx = ctx_for(db_path.clone(), runtime);

        execute_protocol_run(
            &ctx,
            run.accession_id,
            vec![],
            vec![FunctionCall { function_name: "aspirate".into(), args: serde_json::json!({}) }],
        )
        .await
        .unwrap();

        let conn = store::open(&db_path).unwrap();
        let finished = runs::get_run(&conn, &run.accession_id).unwrap().unwrap();
        assert_eq!(finished.status, ProtocolRunStatus::Completed);
        assert!(finished.completed_at.is_some());
    }

    #[tokio::test]
    async fn failing_call_ends_the_run_failed_not_stuck_running() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        let run = runs::create_run(&conn, &Uuid::nil(), serde_json::json!({})).unwrap();
        let db_path = conn.path().unwrap().to_path_buf();
        drop(conn);

        // No canned response for "explode" and InMemoryRuntime always
        // succeeds, so force a failure via a duplicate sequence instead:
        // two calls sharing function name is fine, but we drive failure by
        // canceling the orchestrator up front.
        let runtime = Arc::new(InMemoryRuntime::new());
        let lock_manager: Arc<dyn AssetLockManager> = Arc::new(InMemoryLockManager::default());
        let orchestrator = Arc::new(InProcessOrchestrator::new(runtime, lock_manager.clone()));
        orchestrator.request_cancel(&run.accession_id);
        let ctx = ExecutionContext::new(db_path.clone(), lock_manager, orchestrator);

        execute_protocol_run(
            &ctx,
            run.accession_id,
            vec![],
            vec![FunctionCall { function_name: "aspirate".into(), args: serde_json::json!({}) }],
        )
        .await
        .unwrap();

        let conn = store::open(&db_path).unwrap();
        let finished = runs::get_run(&conn, &run.accession_id).unwrap().unwrap();
        assert_eq!(finished.status, ProtocolRunStatus::Failed);
        assert!(finished.error_message.is_some());
    }

    #[tokio::test]
    async fn locks_are_released_even_when_the_run_fails() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        let run = runs::create_run(&conn, &Uuid::nil(), serde_json::json!({})).unwrap();
        let db_path = conn.path().unwrap().to_path_buf();
        drop(conn);

        let lock_manager: Arc<dyn AssetLockManager> = Arc::new(InMemoryLockManager::default());
        let asset_id = Uuid::new_v4();
        lock_manager
            .acquire_asset_lock(&asset_id, &run.accession_id, &Uuid::new_v4(), None)
            .await
            .unwrap();

        let runtime = Arc::new(InMemoryRuntime::new());
        let orchestrator = Arc::new(InProcessOrchestrator::new(runtime, lock_manager.clone()));
        orchestrator.request_cancel(&run.accession_id);
        let ctx = ExecutionContext::new(db_path, lock_manager.clone(), orchestrator);

        execute_protocol_run(&ctx, run.accession_id, vec![], vec![]).await.unwrap();

        assert!(lock_manager.check_asset_availability(&asset_id).await.unwrap());
    }

    #[test]
    fn blocking_wrapper_does_not_need_an_existing_runtime() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        let run = runs::create_run(&conn, &Uuid::nil(), serde_json::json!({})).unwrap();
        let db_path = conn.path().unwrap().to_path_buf();
        drop(conn);

        let runtime = Arc::new(InMemoryRuntime::new());
        let ctx = ctx_for(db_path.clone(), runtime);

        execute_protocol_run_blocking(&ctx, run.accession_id, vec![], vec![]).unwrap();

        let conn = store::open(&db_path).unwrap();
        let finished = runs::get_run(&conn, &run.accession_id).unwrap().unwrap();
        assert_eq!(finished.status, ProtocolRunStatus::Completed);
    }
}
