// src/store/definitions.rs
//
// =============================================================================
// WORKCELL CORE: DEFINITION CATALOGS (C3)
// =============================================================================
//
// Static catalogs of what CAN exist: resource/machine/deck/deck-position
// definitions and function-protocol definitions. These are reference data —
// written rarely (catalog ingestion), read often (by the acquirer and the
// executor). Each definition's open-ended shape (capabilities, parameter
// schemas) lives in a JSON column; only the fields the store needs to filter
// or join on are promoted to real columns.

use crate::enums::MachineCategory;
use crate::errors::{ConflictKind, CoreError, CoreResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub name: String,
    pub fqn: Option<String>,
    pub category: String,
    pub is_consumable: bool,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineDefinition {
    pub name: String,
    pub fqn: Option<String>,
    pub category: MachineCategory,
    pub backend_type: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckPositionDefinition {
    pub position_name: String,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckDefinition {
    pub name: String,
    pub fqn: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionProtocolDefinition {
    pub accession_id: uuid::Uuid,
    pub fqn: Option<String>,
    pub name: String,
    pub version: String,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Filters accepted by `list_resource_definitions` (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct ResourceDefinitionFilter {
    pub manufacturer_contains: Option<String>,
    pub is_consumable: Option<bool>,
}

/// Filters accepted by `list_machine_definitions` (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct MachineDefinitionFilter {
    pub category: Option<MachineCategory>,
}

pub fn put_resource_definition(conn: &Connection, def: &ResourceDefinition) -> CoreResult<()> {
    let json = serde_json::to_string(def)?;
    conn.execute(
        "INSERT INTO resource_definitions (name, fqn, category, is_consumable, definition_json)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(name) DO UPDATE SET
            fqn=excluded.fqn,
            category=excluded.category,
            is_consumable=excluded.is_consumable,
            definition_json=excluded.definition_json",
        params![def.name, def.fqn, def.category, def.is_consumable, json],
    )?;
    Ok(())
}

pub fn get_resource_definition(conn: &Connection, name: &str) -> CoreResult<Option<ResourceDefinition>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT definition_json FROM resource_definitions WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )
        .optional()?;
    Ok(match json {
        Some(j) => Some(serde_json::from_str(&j)?),
        None => None,
    })
}

pub fn get_resource_definition_by_fqn(conn: &Connection, fqn: &str) -> CoreResult<Option<ResourceDefinition>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT definition_json FROM resource_definitions WHERE fqn = ?1",
            params![fqn],
            |r| r.get(0),
        )
        .optional()?;
    Ok(match json {
        Some(j) => Some(serde_json::from_str(&j)?),
        None => None,
    })
}

/// Lists resource definitions matching `filter`, applying `limit`/`offset`
/// after the filter (spec §4.1). Filtering happens in Rust over the JSON
/// payload rather than in SQL since `manufacturer` lives inside `extra`, not
/// a promoted column.
pub fn list_resource_definitions(
    conn: &Connection,
    filter: &ResourceDefinitionFilter,
    limit: usize,
    offset: usize,
) -> CoreResult<Vec<ResourceDefinition>> {
    let mut stmt = conn.prepare("SELECT definition_json FROM resource_definitions ORDER BY name")?;
    let rows: Vec<String> = stmt.query_map([], |r| r.get(0))?.collect::<Result<_, _>>()?;

    let mut matched = Vec::new();
    for json in rows {
        let def: ResourceDefinition = serde_json::from_str(&json)?;
        if let Some(is_consumable) = filter.is_consumable {
            if def.is_consumable != is_consumable {
                continue;
            }
        }
        if let Some(needle) = &filter.manufacturer_contains {
            let manufacturer = def.extra.get("manufacturer").and_then(|v| v.as_str()).unwrap_or("");
            if !manufacturer.to_lowercase().contains(&needle.to_lowercase()) {
                continue;
            }
        }
        matched.push(def);
    }

    Ok(matched.into_iter().skip(offset).take(limit).collect())
}

/// Deletes a resource definition. Fails with `ConflictError{kind: ForeignKey}`
/// if any asset still references it by `definition_name` — a definition in
/// active use can't be removed out from under its instances.
pub fn delete_resource_definition(conn: &Connection, name: &str) -> CoreResult<()> {
    let referencing: i64 = conn.query_row(
        "SELECT count(*) FROM assets WHERE definition_name = ?1",
        params![name],
        |r| r.get(0),
    )?;
    if referencing > 0 {
        return Err(CoreError::Conflict {
            kind: ConflictKind::ForeignKey { referencing: "assets".into() },
            details: format!("{} asset(s) still reference definition '{}'", referencing, name),
        });
    }
    let touched = conn.execute("DELETE FROM resource_definitions WHERE name = ?1", params![name])?;
    if touched == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

pub fn put_machine_definition(conn: &Connection, def: &MachineDefinition) -> CoreResult<()> {
    let json = serde_json::to_string(def)?;
    let category = serde_json::to_string(&def.category)?;
    let category = category.trim_matches('"');
    conn.execute(
        "INSERT INTO machine_definitions (name, fqn, category, backend_type, definition_json)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(name) DO UPDATE SET
            fqn=excluded.fqn,
            category=excluded.category,
            backend_type=excluded.backend_type,
            definition_json=excluded.definition_json",
        params![def.name, def.fqn, category, def.backend_type, json],
    )?;
    Ok(())
}

pub fn get_machine_definition(conn: &Connection, name: &str) -> CoreResult<Option<MachineDefinition>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT definition_json FROM machine_definitions WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )
        .optional()?;
    Ok(match json {
        Some(j) => Some(serde_json::from_str(&j)?),
        None => None,
    })
}

pub fn get_machine_definition_by_fqn(conn: &Connection, fqn: &str) -> CoreResult<Option<MachineDefinition>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT definition_json FROM machine_definitions WHERE fqn = ?1",
            params![fqn],
            |r| r.get(0),
        )
        .optional()?;
    Ok(match json {
        Some(j) => Some(serde_json::from_str(&j)?),
        None => None,
    })
}

pub fn list_machine_definitions(
    conn: &Connection,
    filter: &MachineDefinitionFilter,
    limit: usize,
    offset: usize,
) -> CoreResult<Vec<MachineDefinition>> {
    let mut stmt = conn.prepare("SELECT definition_json FROM machine_definitions ORDER BY name")?;
    let rows: Vec<String> = stmt.query_map([], |r| r.get(0))?.collect::<Result<_, _>>()?;

    let mut matched = Vec::new();
    for json in rows {
        let def: MachineDefinition = serde_json::from_str(&json)?;
        if let Some(category) = filter.category {
            if def.category != category {
                continue;
            }
        }
        matched.push(def);
    }

    Ok(matched.into_iter().skip(offset).take(limit).collect())
}

pub fn delete_machine_definition(conn: &Connection, name: &str) -> CoreResult<()> {
    let referencing: i64 = conn.query_row(
        "SELECT count(*) FROM assets WHERE definition_name = ?1",
        params![name],
        |r| r.get(0),
    )?;
    if referencing > 0 {
        return Err(CoreError::Conflict {
            kind: ConflictKind::ForeignKey { referencing: "assets".into() },
            details: format!("{} asset(s) still reference definition '{}'", referencing, name),
        });
    }
    let touched = conn.execute("DELETE FROM machine_definitions WHERE name = ?1", params![name])?;
    if touched == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

pub fn put_deck_definition(conn: &Connection, def: &DeckDefinition) -> CoreResult<()> {
    let json = serde_json::to_string(def)?;
    conn.execute(
        "INSERT INTO deck_definitions (name, fqn, definition_json) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET fqn=excluded.fqn, definition_json=excluded.definition_json",
        params![def.name, def.fqn, json],
    )?;
    Ok(())
}

pub fn get_deck_definition(conn: &Connection, name: &str) -> CoreResult<Option<DeckDefinition>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT definition_json FROM deck_definitions WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )
        .optional()?;
    Ok(match json {
        Some(j) => Some(serde_json::from_str(&j)?),
        None => None,
    })
}

pub fn delete_deck_definition(conn: &Connection, name: &str) -> CoreResult<()> {
    let referencing: i64 = conn.query_row(
        "SELECT count(*) FROM deck_position_definitions WHERE deck_name = ?1",
        params![name],
        |r| r.get(0),
    )?;
    if referencing > 0 {
        return Err(CoreError::Conflict {
            kind: ConflictKind::ForeignKey { referencing: "deck_position_definitions".into() },
            details: format!("deck '{}' still has {} position definition(s)", name, referencing),
        });
    }
    let touched = conn.execute("DELETE FROM deck_definitions WHERE name = ?1", params![name])?;
    if touched == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

pub fn put_deck_position_definition(
    conn: &Connection,
    deck_name: &str,
    def: &DeckPositionDefinition,
) -> CoreResult<()> {
    let json = serde_json::to_string(def)?;
    conn.execute(
        "INSERT INTO deck_position_definitions (deck_name, position_name, definition_json)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(deck_name, position_name) DO UPDATE SET definition_json=excluded.definition_json",
        params![deck_name, def.position_name, json],
    )?;
    Ok(())
}

pub fn list_deck_positions(conn: &Connection, deck_name: &str) -> CoreResult<Vec<DeckPositionDefinition>> {
    let mut stmt = conn.prepare(
        "SELECT definition_json FROM deck_position_definitions WHERE deck_name = ?1 ORDER BY position_name",
    )?;
    let rows = stmt.query_map(params![deck_name], |r| r.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(serde_json::from_str(&row?)?);
    }
    Ok(out)
}

pub fn put_function_protocol_definition(
    conn: &Connection,
    def: &FunctionProtocolDefinition,
) -> CoreResult<()> {
    let json = serde_json::to_string(def)?;
    conn.execute(
        "INSERT INTO function_protocol_definitions (accession_id, fqn, name, version, definition_json)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(accession_id) DO UPDATE SET fqn=excluded.fqn, definition_json=excluded.definition_json",
        params![def.accession_id.to_string(), def.fqn, def.name, def.version, json],
    )?;
    Ok(())
}

pub fn get_function_protocol_definition(
    conn: &Connection,
    accession_id: &uuid::Uuid,
) -> CoreResult<Option<FunctionProtocolDefinition>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT definition_json FROM function_protocol_definitions WHERE accession_id = ?1",
            params![accession_id.to_string()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(match json {
        Some(j) => Some(serde_json::from_str(&j)?),
        None => None,
    })
}

pub fn get_function_protocol_definition_by_fqn(
    conn: &Connection,
    fqn: &str,
) -> CoreResult<Option<FunctionProtocolDefinition>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT definition_json FROM function_protocol_definitions WHERE fqn = ?1",
            params![fqn],
            |r| r.get(0),
        )
        .optional()?;
    Ok(match json {
        Some(j) => Some(serde_json::from_str(&j)?),
        None => None,
    })
}

pub fn delete_function_protocol_definition(conn: &Connection, accession_id: &uuid::Uuid) -> CoreResult<()> {
    let referencing: i64 = conn.query_row(
        "SELECT count(*) FROM protocol_runs WHERE protocol_definition_accession_id = ?1",
        params![accession_id.to_string()],
        |r| r.get(0),
    )?;
    if referencing > 0 {
        return Err(CoreError::Conflict {
            kind: ConflictKind::ForeignKey { referencing: "protocol_runs".into() },
            details: format!("{} run(s) still reference protocol definition '{}'", referencing, accession_id),
        });
    }
    let touched = conn.execute(
        "DELETE FROM function_protocol_definitions WHERE accession_id = ?1",
        params![accession_id.to_string()],
    )?;
    if touched == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::assets::{self, NewAsset};
    use crate::store::test_support::temp_store;
    use crate::enums::AssetType;

    #[test]
    fn resource_definition_roundtrips() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        let def = ResourceDefinition {
            name: "96_well_plate".into(),
            fqn: Some("pylabrobot.resources.corning_costar.Cor_96_wellplate_360ul_Fb".into()),
            category: "plate".into(),
            is_consumable: false,
            extra: serde_json::json!({"num_rows": 8, "num_columns": 12, "manufacturer": "Corning"}),
        };
        put_resource_definition(&conn, &def).unwrap();
        let got = get_resource_definition(&conn, "96_well_plate").unwrap().unwrap();
        assert_eq!(got.name, def.name);
        assert_eq!(got.extra["num_rows"], 8);

        let by_fqn = get_resource_definition_by_fqn(&conn, def.fqn.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(by_fqn.name, def.name);
    }

    #[test]
    fn upsert_overwrites_existing_definition() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        let mut def = MachineDefinition {
            name: "liquid_handler_1".into(),
            fqn: Some("pylabrobot.liquid_handling.backends.hamilton.STAR".into()),
            category: MachineCategory::LiquidHandler,
            backend_type: Some("hamilton_star".into()),
            extra: serde_json::json!({}),
        };
        put_machine_definition(&conn, &def).unwrap();
        def.backend_type = Some("opentrons_ot2".into());
        put_machine_definition(&conn, &def).unwrap();
        let got = get_machine_definition(&conn, "liquid_handler_1").unwrap().unwrap();
        assert_eq!(got.backend_type.as_deref(), Some("opentrons_ot2"));
    }

    #[test]
    fn list_resource_definitions_filters_by_manufacturer_and_paginates() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        for (name, manufacturer) in [("plate-a", "Corning"), ("plate-b", "Corning"), ("plate-c", "Greiner")] {
            put_resource_definition(
                &conn,
                &ResourceDefinition {
                    name: name.into(),
                    fqn: None,
                    category: "plate".into(),
                    is_consumable: true,
                    extra: serde_json::json!({"manufacturer": manufacturer}),
                },
            )
            .unwrap();
        }

        let filter = ResourceDefinitionFilter { manufacturer_contains: Some("corning".into()), is_consumable: None };
        let all = list_resource_definitions(&conn, &filter, 100, 0).unwrap();
        assert_eq!(all.len(), 2);

        let page = list_resource_definitions(&conn, &filter, 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "plate-b");
    }

    #[test]
    fn delete_fails_when_an_asset_still_references_the_definition() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        put_resource_definition(
            &conn,
            &ResourceDefinition {
                name: "96_well_plate".into(),
                fqn: None,
                category: "plate".into(),
                is_consumable: false,
                extra: serde_json::json!({}),
            },
        )
        .unwrap();
        assets::create_asset(
            &conn,
            NewAsset {
                asset_type: AssetType::Resource,
                name: "plate-1".into(),
                definition_name: "96_well_plate".into(),
                status: "AVAILABLE_IN_STORAGE".into(),
                properties: serde_json::json!({}),
            },
        )
        .unwrap();

        let err = delete_resource_definition(&conn, "96_well_plate").unwrap_err();
        assert!(matches!(err, CoreError::Conflict { kind: ConflictKind::ForeignKey { .. }, .. }));
    }

    #[test]
    fn delete_succeeds_once_unreferenced() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        put_resource_definition(
            &conn,
            &ResourceDefinition {
                name: "96_well_plate".into(),
                fqn: None,
                category: "plate".into(),
                is_consumable: false,
                extra: serde_json::json!({}),
            },
        )
        .unwrap();
        delete_resource_definition(&conn, "96_well_plate").unwrap();
        assert!(get_resource_definition(&conn, "96_well_plate").unwrap().is_none());
    }
}
