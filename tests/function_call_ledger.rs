// tests/function_call_ledger.rs

use uuid::Uuid;
use workcell_core::store::calls;
use workcell_core::{FunctionCallStatus, Store};

fn open_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calls.db");
    let store = Store::open(&path).unwrap();
    (dir, store)
}

#[test]
fn a_multi_step_protocol_leaves_an_ordered_ledger() {
    let (_dir, store) = open_store();
    let conn = store.conn().unwrap();
    let run_id = Uuid::new_v4();

    let aspirate = calls::log_call_start(&conn, &run_id, 0, "aspirate", serde_json::json!({"volume_ul": 100})).unwrap();
    calls::log_call_end(&conn, &aspirate.accession_id, FunctionCallStatus::Success, Some(serde_json::json!(null)), None).unwrap();

    let dispense = calls::log_call_start(&conn, &run_id, 1, "dispense", serde_json::json!({"volume_ul": 100})).unwrap();
    calls::log_call_end(&conn, &dispense.accession_id, FunctionCallStatus::Error, None, Some("tip clog")).unwrap();

    let ledger = calls::list_calls_for_run(&conn, &run_id).unwrap();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[0].status, FunctionCallStatus::Success);
    assert_eq!(ledger[1].status, FunctionCallStatus::Error);
    assert_eq!(ledger[1].error_message.as_deref(), Some("tip clog"));
}

#[test]
fn two_runs_keep_independent_sequence_counters() {
    let (_dir, store) = open_store();
    let conn = store.conn().unwrap();
    let run_a = Uuid::new_v4();
    let run_b = Uuid::new_v4();

    calls::log_call_start(&conn, &run_a, 0, "aspirate", serde_json::json!({})).unwrap();
    // Same sequence number in a different run is not a conflict.
    calls::log_call_start(&conn, &run_b, 0, "aspirate", serde_json::json!({})).unwrap();

    assert_eq!(calls::list_calls_for_run(&conn, &run_a).unwrap().len(), 1);
    assert_eq!(calls::list_calls_for_run(&conn, &run_b).unwrap().len(), 1);
}
