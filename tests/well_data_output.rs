// tests/well_data_output.rs

use uuid::Uuid;
use workcell_core::store::assets::{self, NewAsset};
use workcell_core::store::calls;
use workcell_core::store::outputs::{self, create_function_data_output};
use workcell_core::store::runs;
use workcell_core::{AssetType, DataOutputType, SpatialContext, Store};

fn open_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outputs.db");
    let store = Store::open(&path).unwrap();
    (dir, store)
}

fn make_plate(conn: &rusqlite::Connection, rows: u32, columns: u32) -> Uuid {
    let plate = assets::create_asset(
        conn,
        NewAsset {
            asset_type: AssetType::Resource,
            name: "plate-1".into(),
            definition_name: "96_well_plate".into(),
            status: "AVAILABLE_ON_DECK".into(),
            properties: serde_json::json!({"num_rows": rows, "num_columns": columns}),
        },
    )
    .unwrap();
    plate.accession_id
}

#[test]
fn a_plate_read_materializes_into_96_well_rows() {
    let (_dir, store) = open_store();
    let conn = store.conn().unwrap();
    let plate_id = make_plate(&conn, 8, 12);
    let run = runs::create_run(&conn, &Uuid::nil(), serde_json::json!({})).unwrap();
    let call = calls::log_call_start(&conn, &run.accession_id, 0, "read_absorbance", serde_json::json!({}), None).unwrap();

    let output = create_function_data_output(
        &conn,
        &run.accession_id,
        &call.accession_id,
        Some(&plate_id),
        DataOutputType::Absorbance,
        "absorbance_600nm",
        SpatialContext::PlateSpecific,
        serde_json::json!({"wavelength_nm": 600}),
    )
    .unwrap();

    let readings: Vec<f64> = (0..96).map(|i| 0.1 + (i as f64) * 0.001).collect();
    let wells = outputs::create_well_data_outputs_from_flat_array(&conn, &output.accession_id, &plate_id, &readings).unwrap();
    assert_eq!(wells.len(), 96);

    let fetched = outputs::list_well_outputs(&conn, &output.accession_id).unwrap();
    assert_eq!(fetched.len(), 96);
    assert_eq!(fetched[0].well_name, "A1");
    assert_eq!(fetched[95].well_name, "H12");

    let viz = outputs::get_plate_visualization_data(&conn, &plate_id, None).unwrap().unwrap();
    assert_eq!(viz.well_data.len(), 96);
    assert_eq!(viz.data_range.1, *readings.last().unwrap());
}

#[test]
fn a_384_well_plate_exercises_double_letter_well_names() {
    let (_dir, store) = open_store();
    let conn = store.conn().unwrap();
    let plate_id = make_plate(&conn, 16, 24);
    let run = runs::create_run(&conn, &Uuid::nil(), serde_json::json!({})).unwrap();
    let call = calls::log_call_start(&conn, &run.accession_id, 0, "read_fluorescence", serde_json::json!({}), None).unwrap();
    let output = create_function_data_output(
        &conn,
        &run.accession_id,
        &call.accession_id,
        Some(&plate_id),
        DataOutputType::Fluorescence,
        "fluorescence_485nm",
        SpatialContext::PlateSpecific,
        serde_json::json!({}),
    )
    .unwrap();

    let readings = vec![0.0_f64; 16 * 24];
    let wells = outputs::create_well_data_outputs_from_flat_array(&conn, &output.accession_id, &plate_id, &readings).unwrap();
    assert_eq!(wells.last().unwrap().well_name, "P24");
}
