// src/store/outputs.rs
//
// =============================================================================
// WORKCELL CORE: DATA OUTPUT STORE (C9)
// =============================================================================
//
// A function call can produce a data output (a plate read, a weight, an
// image) that is either a single scalar or a per-well grid. Grids are
// materialized eagerly into one `well_data_outputs` row per well so callers
// can query "give me well B7 across every run" with a plain index scan
// instead of re-parsing a JSON blob on every read.
//
// Plate dimensions are never passed in by the caller: they're read off the
// plate resource itself (its own `properties` first, falling back to its
// catalog definition) at insertion time, the same place the source system's
// `plr_state` lookup resolves them from.

use crate::enums::{DataOutputType, SpatialContext};
use crate::errors::{CoreError, CoreResult};
use crate::ids;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDataOutput {
    pub accession_id: Uuid,
    pub protocol_run_accession_id: Uuid,
    pub function_call_log_accession_id: Uuid,
    pub resource_accession_id: Option<Uuid>,
    pub data_type: DataOutputType,
    pub data_key: String,
    pub spatial_context: SpatialContext,
    pub value: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellDataOutput {
    pub accession_id: Uuid,
    pub function_data_output_accession_id: Uuid,
    pub well_name: String,
    pub well_row: u32,
    pub well_column: u32,
    pub well_index: i64,
    pub value: Option<f64>,
    pub value_json: Option<serde_json::Value>,
}

/// `get_plate_visualization_data`'s return shape (spec §4.5): one entry per
/// well that has data, plus the value range across them for a renderer to
/// scale a color gradient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateVisualization {
    pub plate_resource_accession_id: Uuid,
    pub well_data: Vec<WellDatum>,
    pub data_range: (f64, f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellDatum {
    pub well_name: String,
    pub value: f64,
}

fn data_output_from_row(row: &Row) -> rusqlite::Result<FunctionDataOutput> {
    let data_type: String = row.get("data_type")?;
    let spatial_context: String = row.get("spatial_context")?;
    let value: String = row.get("data_json")?;
    let created_at: String = row.get("created_at")?;
    let accession_id: String = row.get("accession_id")?;
    let run_id: String = row.get("protocol_run_accession_id")?;
    let call_id: String = row.get("function_call_log_accession_id")?;
    let resource_id: Option<String> = row.get("resource_accession_id")?;

    Ok(FunctionDataOutput {
        accession_id: Uuid::parse_str(&accession_id).unwrap_or_default(),
        protocol_run_accession_id: Uuid::parse_str(&run_id).unwrap_or_default(),
        function_call_log_accession_id: Uuid::parse_str(&call_id).unwrap_or_default(),
        resource_accession_id: resource_id.and_then(|s| Uuid::parse_str(&s).ok()),
        data_type: serde_json::from_str(&format!("\"{}\"", data_type)).unwrap_or(DataOutputType::Generic),
        data_key: row.get("data_key")?,
        spatial_context: serde_json::from_str(&format!("\"{}\"", spatial_context)).unwrap_or(SpatialContext::None_),
        value: serde_json::from_str(&value).unwrap_or(serde_json::Value::Null),
        created_at: created_at.parse().unwrap_or_else(|_| ids::now()),
    })
}

fn well_output_from_row(row: &Row) -> rusqlite::Result<WellDataOutput> {
    let accession_id: String = row.get("accession_id")?;
    let parent: String = row.get("function_data_output_accession_id")?;
    let value_json: Option<String> = row.get("value_json")?;
    let well_name: String = row.get("well_name")?;
    let well_index: i64 = row.get("well_index")?;
    let (row_idx, col_idx) = parse_well_name(&well_name).unwrap_or((0, 0));
    Ok(WellDataOutput {
        accession_id: Uuid::parse_str(&accession_id).unwrap_or_default(),
        function_data_output_accession_id: Uuid::parse_str(&parent).unwrap_or_default(),
        well_name,
        well_row: row_idx,
        well_column: col_idx,
        well_index,
        value: row.get("value")?,
        value_json: value_json.and_then(|v| serde_json::from_str(&v).ok()),
    })
}

#[allow(clippy::too_many_arguments)]
pub fn create_function_data_output(
    conn: &Connection,
    protocol_run_accession_id: &Uuid,
    function_call_log_accession_id: &Uuid,
    resource_accession_id: Option<&Uuid>,
    data_type: DataOutputType,
    data_key: impl Into<String>,
    spatial_context: SpatialContext,
    value: serde_json::Value,
) -> CoreResult<FunctionDataOutput> {
    let output = FunctionDataOutput {
        accession_id: ids::new_id(),
        protocol_run_accession_id: *protocol_run_accession_id,
        function_call_log_accession_id: *function_call_log_accession_id,
        resource_accession_id: resource_accession_id.copied(),
        data_type,
        data_key: data_key.into(),
        spatial_context,
        value,
        created_at: ids::now(),
    };

    let data_type_tag = serde_json::to_string(&output.data_type)?;
    let data_type_tag = data_type_tag.trim_matches('"');
    let spatial_tag = serde_json::to_string(&output.spatial_context)?;
    let spatial_tag = spatial_tag.trim_matches('"');

    conn.execute(
        "INSERT INTO function_data_outputs (
            accession_id, protocol_run_accession_id, function_call_log_accession_id,
            resource_accession_id, data_type, data_key, spatial_context, data_json, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            output.accession_id.to_string(),
            output.protocol_run_accession_id.to_string(),
            output.function_call_log_accession_id.to_string(),
            output.resource_accession_id.map(|u| u.to_string()),
            data_type_tag,
            output.data_key,
            spatial_tag,
            serde_json::to_string(&output.value)?,
            output.created_at.to_rfc3339(),
        ],
    )?;

    Ok(output)
}

/// Bijective base-26 letter sequence: 0 -> A, 1 -> B, ..., 25 -> Z, 26 -> AA,
/// 27 -> AB, ... Strict superset of the source system's <=26-row assumption
/// (spec §9 open question (b)): 384- and 1536-well plates still get a
/// well-formed name instead of wrapping back to "A".
fn row_letters(mut index: u32) -> String {
    let mut letters = Vec::new();
    loop {
        let rem = index % 26;
        letters.push((b'A' + rem as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// `row_index`/`col_index` are 0-based. Well names are 1-based columns,
/// e.g. row 0 col 0 -> "A1", row 7 col 11 -> "H12", row 26 col 0 -> "AA1".
pub fn well_name(row_index: u32, col_index: u32) -> String {
    format!("{}{}", row_letters(row_index), col_index + 1)
}

/// Inverse of `well_name`: splits the leading letter run from the trailing
/// digit run and decodes each back to a 0-based (row, column) pair. Returns
/// `None` for a malformed name (no letters, no digits, or a "1"-based column
/// of zero).
fn parse_well_name(name: &str) -> Option<(u32, u32)> {
    let split = name.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = name.split_at(split);
    if letters.is_empty() || digits.is_empty() {
        return None;
    }
    let mut row: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_uppercase() {
            return None;
        }
        row = row * 26 + (c as u32 - 'A' as u32) + 1;
    }
    let col: u32 = digits.parse().ok()?;
    if col == 0 {
        return None;
    }
    Some((row - 1, col - 1))
}

/// Row-major flat index, matching the source system's default plate
/// iteration order (spec §9 resolves the ambiguity in spec.md in favor of
/// row-major, since that's what `original_source`'s flat-array tests feed).
pub fn well_index(row_index: u32, col_index: u32, num_columns: u32) -> i64 {
    (row_index * num_columns + col_index) as i64
}

/// Reads a plate resource's row/column count: first from its own
/// `properties` (an in-progress run may have overridden the catalog
/// default), falling back to its resource definition's `extra` fields.
/// `InvalidPlateDimensions` if neither source has both numbers.
pub fn read_plate_dimensions(conn: &Connection, plate_resource_accession_id: &Uuid) -> CoreResult<(u32, u32)> {
    let asset = crate::store::assets::get_asset(conn, plate_resource_accession_id)?
        .ok_or(CoreError::NotFound)?;

    if let (Some(rows), Some(cols)) = (
        asset.properties.get("num_rows").and_then(|v| v.as_u64()),
        asset.properties.get("num_columns").and_then(|v| v.as_u64()),
    ) {
        return Ok((rows as u32, cols as u32));
    }

    let definition = crate::store::definitions::get_resource_definition(conn, &asset.definition_name)?
        .ok_or_else(|| CoreError::InvalidPlateDimensions(format!(
            "no definition catalogued for '{}'", asset.definition_name
        )))?;
    match (
        definition.extra.get("num_rows").and_then(|v| v.as_u64()),
        definition.extra.get("num_columns").and_then(|v| v.as_u64()),
    ) {
        (Some(rows), Some(cols)) => Ok((rows as u32, cols as u32)),
        _ => Err(CoreError::InvalidPlateDimensions(format!(
            "neither asset '{}' nor its definition '{}' declares num_rows/num_columns",
            asset.name, asset.definition_name
        ))),
    }
}

/// Materializes a flat row-major array of per-well values (e.g. a plate
/// reader's raw output) into one `well_data_outputs` row per well. Plate
/// dimensions are read from `plate_resource_accession_id`, not passed in.
pub fn create_well_data_outputs_from_flat_array(
    conn: &Connection,
    function_data_output_accession_id: &Uuid,
    plate_resource_accession_id: &Uuid,
    values: &[f64],
) -> CoreResult<Vec<WellDataOutput>> {
    let (num_rows, num_columns) = read_plate_dimensions(conn, plate_resource_accession_id)?;
    let expected = (num_rows * num_columns) as usize;
    if values.len() != expected {
        return Err(CoreError::DimensionMismatch {
            expected,
            got: values.len(),
        });
    }

    let mut out = Vec::with_capacity(expected);
    for row_idx in 0..num_rows {
        for col_idx in 0..num_columns {
            let idx = well_index(row_idx, col_idx, num_columns);
            let value = values[idx as usize];
            let well = WellDataOutput {
                accession_id: ids::new_id(),
                function_data_output_accession_id: *function_data_output_accession_id,
                well_name: well_name(row_idx, col_idx),
                well_row: row_idx,
                well_column: col_idx,
                well_index: idx,
                value: Some(value),
                value_json: None,
            };

            conn.execute(
                "INSERT INTO well_data_outputs (
                    accession_id, function_data_output_accession_id, well_name, well_index, value, value_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
                params![
                    well.accession_id.to_string(),
                    well.function_data_output_accession_id.to_string(),
                    well.well_name,
                    well.well_index,
                    well.value,
                ],
            )?;
            out.push(well);
        }
    }

    Ok(out)
}

/// Inserts a single named well's value, checking it against
/// `plate_resource_accession_id`'s dimensions first. An out-of-range well
/// name (e.g. "J1" on an 8-row plate) fails with `DimensionMismatch` rather
/// than silently inserting an unreachable row.
pub fn create_well_data_output(
    conn: &Connection,
    function_data_output_accession_id: &Uuid,
    plate_resource_accession_id: &Uuid,
    well_name: &str,
    value: f64,
) -> CoreResult<WellDataOutput> {
    let (num_rows, num_columns) = read_plate_dimensions(conn, plate_resource_accession_id)?;
    let (row_idx, col_idx) = parse_well_name(well_name).ok_or_else(|| {
        CoreError::DimensionMismatch { expected: (num_rows * num_columns) as usize, got: 0 }
    })?;
    if row_idx >= num_rows || col_idx >= num_columns {
        return Err(CoreError::DimensionMismatch {
            expected: (num_rows * num_columns) as usize,
            got: well_index(row_idx, col_idx, num_columns) as usize + 1,
        });
    }

    let well = WellDataOutput {
        accession_id: ids::new_id(),
        function_data_output_accession_id: *function_data_output_accession_id,
        well_name: well_name.to_string(),
        well_row: row_idx,
        well_column: col_idx,
        well_index: well_index(row_idx, col_idx, num_columns),
        value: Some(value),
        value_json: None,
    };

    conn.execute(
        "INSERT INTO well_data_outputs (
            accession_id, function_data_output_accession_id, well_name, well_index, value, value_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
        params![
            well.accession_id.to_string(),
            well.function_data_output_accession_id.to_string(),
            well.well_name,
            well.well_index,
            well.value,
        ],
    )?;
    Ok(well)
}

pub fn get_function_data_output(conn: &Connection, accession_id: &Uuid) -> CoreResult<Option<FunctionDataOutput>> {
    conn.query_row(
        "SELECT * FROM function_data_outputs WHERE accession_id = ?1",
        params![accession_id.to_string()],
        data_output_from_row,
    )
    .optional()
    .map_err(CoreError::from)
}

pub fn list_well_outputs(conn: &Connection, function_data_output_accession_id: &Uuid) -> CoreResult<Vec<WellDataOutput>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM well_data_outputs WHERE function_data_output_accession_id = ?1 ORDER BY well_index",
    )?;
    let rows = stmt.query_map(params![function_data_output_accession_id.to_string()], well_output_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Flattens every well reading recorded against `plate_resource_accession_id`
/// (optionally narrowed to one `data_type`) into the renderer-friendly shape
/// a plate heatmap wants: one `(well_name, value)` pair per well plus the
/// min/max across them. Returns `None` if the plate has no data outputs at
/// all under the given filter, rather than an empty-but-present struct.
pub fn get_plate_visualization_data(
    conn: &Connection,
    plate_resource_accession_id: &Uuid,
    data_type: Option<DataOutputType>,
) -> CoreResult<Option<PlateVisualization>> {
    let mut stmt = conn.prepare(
        "SELECT accession_id FROM function_data_outputs WHERE resource_accession_id = ?1",
    )?;
    let output_ids: Vec<String> = stmt
        .query_map(params![plate_resource_accession_id.to_string()], |r| r.get(0))?
        .collect::<Result<_, _>>()?;

    let mut well_data = Vec::new();
    for output_id in output_ids {
        let output_id = Uuid::parse_str(&output_id).unwrap_or_default();
        let output = match get_function_data_output(conn, &output_id)? {
            Some(o) => o,
            None => continue,
        };
        if let Some(filter) = data_type {
            if output.data_type != filter {
                continue;
            }
        }
        for well in list_well_outputs(conn, &output_id)? {
            if let Some(value) = well.value {
                well_data.push(WellDatum { well_name: well.well_name, value });
            }
        }
    }

    if well_data.is_empty() {
        return Ok(None);
    }

    let min = well_data.iter().map(|w| w.value).fold(f64::INFINITY, f64::min);
    let max = well_data.iter().map(|w| w.value).fold(f64::NEG_INFINITY, f64::max);

    Ok(Some(PlateVisualization {
        plate_resource_accession_id: *plate_resource_accession_id,
        well_data,
        data_range: (min, max),
    }))
}
