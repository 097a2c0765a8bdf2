// src/orchestrator.rs
//
// =============================================================================
// WORKCELL CORE: ORCHESTRATOR
// =============================================================================
//
// Drives a single protocol run end to end: acquires every required asset
// (C7), runs the function-call sequence against a `WorkcellRuntime`, logging
// each call to the ledger (C8) as it goes, and releases what it acquired
// when the run finishes, whether it succeeded or failed. This is the piece
// `_execute_protocol_async` delegates to after flipping a run to RUNNING;
// the executor (executor.rs) owns the status transitions, the broad failure
// catch, and the unconditional `release_all_protocol_locks` backstop for
// anything this orchestrator didn't get a chance to release cleanly.

use crate::acquire::{self, AcquiredAsset, AssetRequirement};
use crate::enums::FunctionCallStatus;
use crate::errors::{CoreError, CoreResult};
use crate::locks::AssetLockManager;
use crate::runtime::{FunctionCall, WorkcellRuntime};
use crate::store::calls;
use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Acquires every asset in `requirements`, runs every call in
    /// `protocol_calls` against the runtime in order, logging each to the
    /// function-call ledger under `run_accession_id`, then releases
    /// everything it acquired. Stops and returns an error at the first call
    /// that fails, at the first requirement that can't be acquired, or if
    /// `should_cancel` reports true between calls — in every case, whatever
    /// was already acquired is still released before the error propagates.
    async fn execute_existing_protocol_run(
        &self,
        conn: &Connection,
        run_accession_id: &Uuid,
        requirements: &[AssetRequirement],
        protocol_calls: &[FunctionCall],
    ) -> CoreResult<serde_json::Value>;

    /// Polled between calls; a true return aborts the run with a
    /// `CANCELING` transition instead of running to completion. The source
    /// system's protocol runs have no built-in interrupt signal of their
    /// own, so this is the explicit cooperative cancellation contract this
    /// crate adds on top (spec §9 design note).
    fn should_cancel(&self, run_accession_id: &Uuid) -> bool;
}

/// In-process orchestrator: acquires assets and executes calls sequentially
/// on the runtime it's given. Cancellation is requested by accession id
/// through `request_cancel` and observed via an `AtomicBool` per run.
pub struct InProcessOrchestrator {
    runtime: Arc<dyn WorkcellRuntime>,
    lock_manager: Arc<dyn AssetLockManager>,
    cancel_flags: std::sync::Mutex<std::collections::HashMap<Uuid, Arc<AtomicBool>>>,
}

impl InProcessOrchestrator {
    pub fn new(runtime: Arc<dyn WorkcellRuntime>, lock_manager: Arc<dyn AssetLockManager>) -> Self {
        Self {
            runtime,
            lock_manager,
            cancel_flags: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn flag_for(&self, run_accession_id: &Uuid) -> Arc<AtomicBool> {
        self.cancel_flags
            .lock()
            .unwrap()
            .entry(*run_accession_id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    pub fn request_cancel(&self, run_accession_id: &Uuid) {
        self.flag_for(run_accession_id).store(true, Ordering::SeqCst);
    }

    async fn release_all(&self, conn: &Connection, run_accession_id: &Uuid, acquired: &[AcquiredAsset]) {
        for asset in acquired {
            if let Err(e) = acquire::release(conn, &self.lock_manager, &self.runtime, run_accession_id, asset).await {
                log::error!(
                    "run {} failed to cleanly release asset {}: {}",
                    run_accession_id,
                    asset.asset.accession_id,
                    e
                );
            }
        }
    }
}

#[async_trait]
impl Orchestrator for InProcessOrchestrator {
    async fn execute_existing_protocol_run(
        &self,
        conn: &Connection,
        run_accession_id: &Uuid,
        requirements: &[AssetRequirement],
        protocol_calls: &[FunctionCall],
    ) -> CoreResult<serde_json::Value> {
        let mut acquired = Vec::with_capacity(requirements.len());
        for requirement in requirements {
            match acquire::acquire(conn, &self.lock_manager, &self.runtime, run_accession_id, requirement).await {
                Ok(asset) => acquired.push(asset),
                Err(e) => {
                    self.release_all(conn, run_accession_id, &acquired).await;
                    return Err(e);
                }
            }
        }

        let result = self.run_calls(conn, run_accession_id, protocol_calls).await;
        self.release_all(conn, run_accession_id, &acquired).await;
        result
    }

    fn should_cancel(&self, run_accession_id: &Uuid) -> bool {
        self.flag_for(run_accession_id).load(Ordering::SeqCst)
    }
}

impl InProcessOrchestrator {
    async fn run_calls(
        &self,
        conn: &Connection,
        run_accession_id: &Uuid,
        protocol_calls: &[FunctionCall],
    ) -> CoreResult<serde_json::Value> {
        let mut last_return = serde_json::Value::Null;

        for (sequence, call) in protocol_calls.iter().enumerate() {
            if self.should_cancel(run_accession_id) {
                return Err(CoreError::AssetAcquisition("run canceled before completion".into()));
            }

            let log = calls::log_call_start(
                conn,
                run_accession_id,
                sequence as i64,
                &call.function_name,
                call.args.clone(),
                None,
            )?;

            match self.runtime.call(call).await {
                Ok(value) => {
                    calls::log_call_end(conn, &log.accession_id, FunctionCallStatus::Success, Some(value.clone()), None)?;
                    last_return = value;
                }
                Err(e) => {
                    calls::log_call_end(conn, &log.accession_id, FunctionCallStatus::Error, None, Some(&e.to_string()))?;
                    return Err(e);
                }
            }
        }

        Ok(last_return)
    }
}
