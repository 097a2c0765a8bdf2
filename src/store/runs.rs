// src/store/runs.rs
//
// =============================================================================
// WORKCELL CORE: PROTOCOL RUN STORE & STATE MACHINE (C10)
// =============================================================================

use crate::enums::ProtocolRunStatus;
use crate::errors::CoreError;
use crate::errors::CoreResult;
use crate::ids;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolRun {
    pub accession_id: Uuid,
    pub protocol_definition_accession_id: Uuid,
    pub status: ProtocolRunStatus,
    pub input_parameters: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ProtocolRun {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        let output: Option<String> = row.get("output_data_json")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let started_at: Option<String> = row.get("started_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;
        let input: String = row.get("input_parameters_json")?;
        let protocol_def: String = row.get("protocol_definition_accession_id")?;
        let accession_id: String = row.get("accession_id")?;

        Ok(ProtocolRun {
            accession_id: Uuid::parse_str(&accession_id).unwrap_or_default(),
            protocol_definition_accession_id: Uuid::parse_str(&protocol_def).unwrap_or_default(),
            status: serde_json::from_str(&format!("\"{}\"", status)).unwrap_or(ProtocolRunStatus::Queued),
            input_parameters: serde_json::from_str(&input).unwrap_or(serde_json::Value::Null),
            output_data: output.and_then(|o| serde_json::from_str(&o).ok()),
            error_message: row.get("error_message")?,
            created_at: created_at.parse().unwrap_or_else(|_| ids::now()),
            updated_at: updated_at.parse().unwrap_or_else(|_| ids::now()),
            started_at: started_at.and_then(|s| s.parse().ok()),
            completed_at: completed_at.and_then(|s| s.parse().ok()),
        })
    }
}

pub fn create_run(
    conn: &Connection,
    protocol_definition_accession_id: &Uuid,
    input_parameters: serde_json::Value,
) -> CoreResult<ProtocolRun> {
    let now = ids::now();
    let run = ProtocolRun {
        accession_id: ids::new_id(),
        protocol_definition_accession_id: *protocol_definition_accession_id,
        status: ProtocolRunStatus::Queued,
        input_parameters,
        output_data: None,
        error_message: None,
        created_at: now,
        updated_at: now,
        started_at: None,
        completed_at: None,
    };

    conn.execute(
        "INSERT INTO protocol_runs (
            accession_id, protocol_definition_accession_id, status,
            input_parameters_json, output_data_json, error_message,
            created_at, updated_at, started_at, completed_at
        ) VALUES (?1, ?2, ?3, ?4, NULL, NULL, ?5, ?6, NULL, NULL)",
        params![
            run.accession_id.to_string(),
            run.protocol_definition_accession_id.to_string(),
            "QUEUED",
            serde_json::to_string(&run.input_parameters)?,
            run.created_at.to_rfc3339(),
            run.updated_at.to_rfc3339(),
        ],
    )?;

    Ok(run)
}

pub fn get_run(conn: &Connection, accession_id: &Uuid) -> CoreResult<Option<ProtocolRun>> {
    conn.query_row(
        "SELECT * FROM protocol_runs WHERE accession_id = ?1",
        params![accession_id.to_string()],
        ProtocolRun::from_row,
    )
    .optional()
    .map_err(CoreError::from)
}

/// Every legal `(from, to)` transition (spec §4.6). Anything not listed here
/// is rejected with `CoreError::InvalidTransition`. Terminal states have no
/// outgoing edges; `update_run_status` on a terminal run is a silent no-op
/// rather than an error, matching the source system's idempotent-retry
/// tolerance for task re-delivery.
fn is_legal_transition(from: ProtocolRunStatus, to: ProtocolRunStatus) -> bool {
    use ProtocolRunStatus::*;
    matches!(
        (from, to),
        (Queued, Pending)
            | (Pending, Preparing)
            | (Pending, Running) // explicit shortcut (spec §3): skipping Preparing is allowed directly from Pending.
            | (Preparing, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Canceling)
            | (Canceling, Cancelled)
            | (Running, Pausing)
            | (Pausing, Paused)
            | (Paused, Resuming)
            | (Resuming, Running)
            | (Running, RequiresIntervention)
            | (RequiresIntervention, Intervening)
            | (Intervening, Running)
    )
}

/// Applies a status transition inside a transaction, validating it against
/// the table above. Terminal current states are absorbing: the call
/// succeeds without modifying the row (spec §4.6's "terminal states are
/// final" rule), which keeps a stray duplicate task delivery harmless.
pub fn update_run_status(
    conn: &mut Connection,
    accession_id: &Uuid,
    to: ProtocolRunStatus,
    error_message: Option<&str>,
) -> CoreResult<ProtocolRun> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    let current: ProtocolRun = tx
        .query_row(
            "SELECT * FROM protocol_runs WHERE accession_id = ?1",
            params![accession_id.to_string()],
            ProtocolRun::from_row,
        )
        .optional()?
        .ok_or(CoreError::NotFound)?;

    if current.status.is_terminal() {
        tx.commit()?;
        return Ok(current);
    }

    if !is_legal_transition(current.status, to) {
        return Err(CoreError::InvalidTransition {
            from: current.status,
            to,
        });
    }

    let now = ids::now();
    let status_tag = serde_json::to_string(&to)?;
    let status_tag = status_tag.trim_matches('"');

    let started_at = if to == ProtocolRunStatus::Running && current.started_at.is_none() {
        Some(now)
    } else {
        current.started_at
    };
    let completed_at = if to.is_terminal() { Some(now) } else { None };

    tx.execute(
        "UPDATE protocol_runs SET status = ?1, error_message = ?2, updated_at = ?3, started_at = ?4, completed_at = ?5
         WHERE accession_id = ?6",
        params![
            status_tag,
            error_message,
            now.to_rfc3339(),
            started_at.map(|t| t.to_rfc3339()),
            completed_at.map(|t| t.to_rfc3339()),
            accession_id.to_string(),
        ],
    )?;
    tx.commit()?;

    Ok(ProtocolRun {
        status: to,
        error_message: error_message.map(String::from),
        updated_at: now,
        started_at,
        completed_at,
        ..current
    })
}

pub fn set_output_data(conn: &Connection, accession_id: &Uuid, output: serde_json::Value) -> CoreResult<()> {
    let touched = conn.execute(
        "UPDATE protocol_runs SET output_data_json = ?1, updated_at = ?2 WHERE accession_id = ?3",
        params![
            serde_json::to_string(&output)?,
            ids::now().to_rfc3339(),
            accession_id.to_string(),
        ],
    )?;
    if touched == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;

    #[test]
    fn legal_lifecycle_transitions_succeed() {
        let (_dir, store) = temp_store();
        let mut conn = store.conn().unwrap();
        let run = create_run(&conn, &Uuid::nil(), serde_json::json!({})).unwrap();

        let run = update_run_status(&mut conn, &run.accession_id, ProtocolRunStatus::Preparing, None).unwrap();
        assert_eq!(run.status, ProtocolRunStatus::Preparing);

        let run = update_run_status(&mut conn, &run.accession_id, ProtocolRunStatus::Running, None).unwrap();
        assert!(run.started_at.is_some());

        let run = update_run_status(&mut conn, &run.accession_id, ProtocolRunStatus::Completed, None).unwrap();
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let (_dir, store) = temp_store();
        let mut conn = store.conn().unwrap();
        let run = create_run(&conn, &Uuid::nil(), serde_json::json!({})).unwrap();

        let err = update_run_status(&mut conn, &run.accession_id, ProtocolRunStatus::Completed, None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn terminal_state_is_absorbing() {
        let (_dir, store) = temp_store();
        let mut conn = store.conn().unwrap();
        let run = create_run(&conn, &Uuid::nil(), serde_json::json!({})).unwrap();
        let run = update_run_status(&mut conn, &run.accession_id, ProtocolRunStatus::Pending, None).unwrap();
        let run = update_run_status(&mut conn, &run.accession_id, ProtocolRunStatus::Preparing, None).unwrap();
        let run = update_run_status(&mut conn, &run.accession_id, ProtocolRunStatus::Running, None).unwrap();
        let run = update_run_status(&mut conn, &run.accession_id, ProtocolRunStatus::Failed, Some("boom")).unwrap();
        assert_eq!(run.status, ProtocolRunStatus::Failed);

        // A stray duplicate delivery trying to push it to Running again is a no-op, not an error.
        let run = update_run_status(&mut conn, &run.accession_id, ProtocolRunStatus::Running, None).unwrap();
        assert_eq!(run.status, ProtocolRunStatus::Failed);
    }

    #[test]
    fn queued_cannot_skip_straight_to_preparing() {
        let (_dir, store) = temp_store();
        let mut conn = store.conn().unwrap();
        let run = create_run(&conn, &Uuid::nil(), serde_json::json!({})).unwrap();
        let err = update_run_status(&mut conn, &run.accession_id, ProtocolRunStatus::Preparing, None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn pending_may_jump_directly_to_running() {
        let (_dir, store) = temp_store();
        let mut conn = store.conn().unwrap();
        let run = create_run(&conn, &Uuid::nil(), serde_json::json!({})).unwrap();
        let run = update_run_status(&mut conn, &run.accession_id, ProtocolRunStatus::Pending, None).unwrap();
        let run = update_run_status(&mut conn, &run.accession_id, ProtocolRunStatus::Running, None).unwrap();
        assert_eq!(run.status, ProtocolRunStatus::Running);
        assert!(run.started_at.is_some());
    }
}
