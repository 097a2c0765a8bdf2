// src/store/calls.rs
//
// =============================================================================
// WORKCELL CORE: FUNCTION CALL LEDGER (C8)
// =============================================================================
//
// An append-mostly log of every function call made during a protocol run.
// `sequence_in_run` is assigned by the caller (the executor, which knows its
// own step counter) and enforced unique per run so two concurrent loggers
// can never silently collide on the same slot.

use crate::enums::FunctionCallStatus;
use crate::errors::{ConflictKind, CoreError, CoreResult};
use crate::ids;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallLog {
    pub accession_id: Uuid,
    pub protocol_run_accession_id: Uuid,
    pub parent_function_call_log_accession_id: Option<Uuid>,
    pub sequence_in_run: i64,
    pub function_name: String,
    pub status: FunctionCallStatus,
    pub args: serde_json::Value,
    pub return_value: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl FunctionCallLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        let args: String = row.get("args_json")?;
        let return_value: Option<String> = row.get("return_value_json")?;
        let started_at: String = row.get("started_at")?;
        let ended_at: Option<String> = row.get("ended_at")?;
        let accession_id: String = row.get("accession_id")?;
        let run_id: String = row.get("protocol_run_accession_id")?;
        let parent_id: Option<String> = row.get("parent_function_call_log_accession_id")?;

        Ok(FunctionCallLog {
            accession_id: Uuid::parse_str(&accession_id).unwrap_or_default(),
            protocol_run_accession_id: Uuid::parse_str(&run_id).unwrap_or_default(),
            parent_function_call_log_accession_id: parent_id.and_then(|s| Uuid::parse_str(&s).ok()),
            sequence_in_run: row.get("sequence_in_run")?,
            function_name: row.get("function_name")?,
            status: serde_json::from_str(&format!("\"{}\"", status)).unwrap_or(FunctionCallStatus::Unknown),
            args: serde_json::from_str(&args).unwrap_or(serde_json::Value::Null),
            return_value: return_value.and_then(|v| serde_json::from_str(&v).ok()),
            error_message: row.get("error_message")?,
            started_at: started_at.parse().unwrap_or_else(|_| ids::now()),
            ended_at: ended_at.and_then(|s| s.parse().ok()),
        })
    }
}

/// Opens a new call-log row in `PENDING`/`IN_PROGRESS` status. Returns a
/// `Conflict` error if `sequence_in_run` is already taken for this run —
/// the executor's step counter should make that impossible in the single-
/// writer case, but a retried task re-delivery can race it.
///
/// `parent_call_accession_id` links a nested call (a protocol step invoked
/// by another protocol step) to its caller, making the ledger tree-shaped
/// rather than a flat per-run list; top-level calls pass `None`.
pub fn log_call_start(
    conn: &Connection,
    protocol_run_accession_id: &Uuid,
    sequence_in_run: i64,
    function_name: &str,
    args: serde_json::Value,
    parent_call_accession_id: Option<&Uuid>,
) -> CoreResult<FunctionCallLog> {
    let now = ids::now();
    let log = FunctionCallLog {
        accession_id: ids::new_id(),
        protocol_run_accession_id: *protocol_run_accession_id,
        parent_function_call_log_accession_id: parent_call_accession_id.copied(),
        sequence_in_run,
        function_name: function_name.to_string(),
        status: FunctionCallStatus::InProgress,
        args,
        return_value: None,
        error_message: None,
        started_at: now,
        ended_at: None,
    };

    let result = conn.execute(
        "INSERT INTO function_call_logs (
            accession_id, protocol_run_accession_id, parent_function_call_log_accession_id,
            sequence_in_run, function_name,
            status, args_json, return_value_json, error_message, started_at, ended_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, ?8, NULL)",
        params![
            log.accession_id.to_string(),
            log.protocol_run_accession_id.to_string(),
            log.parent_function_call_log_accession_id.map(|u| u.to_string()),
            log.sequence_in_run,
            log.function_name,
            "IN_PROGRESS",
            serde_json::to_string(&log.args)?,
            log.started_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => Ok(log),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Err(CoreError::Conflict {
                kind: ConflictKind::Uniqueness { field: "sequence_in_run".into() },
                details: format!(
                    "sequence {} already logged for run {}",
                    sequence_in_run, protocol_run_accession_id
                ),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Closes out a call-log row with a terminal status and, if present, either
/// a return value or an error message — never both. A missing `accession_id`
/// returns `Ok(false)` rather than raising: the ledger's end-of-call hook is
/// best-effort bookkeeping, not a step a caller should have to guard with a
/// prior existence check.
pub fn log_call_end(
    conn: &Connection,
    accession_id: &Uuid,
    status: FunctionCallStatus,
    return_value: Option<serde_json::Value>,
    error_message: Option<&str>,
) -> CoreResult<bool> {
    let status_tag = serde_json::to_string(&status)?;
    let status_tag = status_tag.trim_matches('"').to_string();
    let return_value_json = match &return_value {
        Some(v) => Some(serde_json::to_string(v)?),
        None => None,
    };

    let touched = conn.execute(
        "UPDATE function_call_logs SET status = ?1, return_value_json = ?2, error_message = ?3, ended_at = ?4
         WHERE accession_id = ?5",
        params![
            status_tag,
            return_value_json,
            error_message,
            ids::now().to_rfc3339(),
            accession_id.to_string(),
        ],
    )?;
    Ok(touched > 0)
}

pub fn get_call(conn: &Connection, accession_id: &Uuid) -> CoreResult<Option<FunctionCallLog>> {
    conn.query_row(
        "SELECT * FROM function_call_logs WHERE accession_id = ?1",
        params![accession_id.to_string()],
        FunctionCallLog::from_row,
    )
    .optional()
    .map_err(CoreError::from)
}

pub fn list_calls_for_run(conn: &Connection, protocol_run_accession_id: &Uuid) -> CoreResult<Vec<FunctionCallLog>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM function_call_logs WHERE protocol_run_accession_id = ?1 ORDER BY sequence_in_run",
    )?;
    let rows = stmt.query_map(params![protocol_run_accession_id.to_string()], FunctionCallLog::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
