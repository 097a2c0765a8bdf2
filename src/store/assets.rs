// src/store/assets.rs
//
// =============================================================================
// WORKCELL CORE: ASSET STORE (C4)
// =============================================================================
//
// Machines, resources, and decks all live in one `assets` table with a
// `kind` discriminator instead of three joined tables. This is a deliberate
// departure from the relational-inheritance style a Python ORM favors: the
// lock manager (C6) needs to read-and-flip a single asset's status inside
// one transaction, and a single wide table makes that one `UPDATE ... WHERE`
// statement rather than a join across subtype tables.

use crate::enums::{AssetType, MachineStatus, ResourceStatus};
use crate::errors::{ConflictKind, CoreError, CoreResult};
use crate::ids;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub accession_id: Uuid,
    pub asset_type: AssetType,
    pub name: String,
    pub definition_name: String,
    pub status: String,
    pub current_protocol_run_accession_id: Option<Uuid>,
    pub lock_reservation_id: Option<Uuid>,
    pub linked_counterpart_accession_id: Option<Uuid>,
    pub parent_deck_accession_id: Option<Uuid>,
    pub current_deck_position_name: Option<String>,
    pub properties: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Asset {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let accession_id: String = row.get("accession_id")?;
        let asset_type: String = row.get("asset_type")?;
        let current_run: Option<String> = row.get("current_protocol_run_accession_id")?;
        let reservation: Option<String> = row.get("lock_reservation_id")?;
        let counterpart: Option<String> = row.get("linked_counterpart_accession_id")?;
        let parent_deck: Option<String> = row.get("parent_deck_accession_id")?;
        let properties: String = row.get("properties_json")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(Asset {
            accession_id: Uuid::parse_str(&accession_id).unwrap_or_default(),
            asset_type: serde_json::from_str(&format!("\"{}\"", asset_type)).unwrap_or(AssetType::Resource),
            name: row.get("name")?,
            definition_name: row.get("definition_name")?,
            status: row.get("status")?,
            current_protocol_run_accession_id: current_run.and_then(|s| Uuid::parse_str(&s).ok()),
            lock_reservation_id: reservation.and_then(|s| Uuid::parse_str(&s).ok()),
            linked_counterpart_accession_id: counterpart.and_then(|s| Uuid::parse_str(&s).ok()),
            parent_deck_accession_id: parent_deck.and_then(|s| Uuid::parse_str(&s).ok()),
            current_deck_position_name: row.get("current_deck_position_name")?,
            properties: serde_json::from_str(&properties).unwrap_or(serde_json::Value::Null),
            created_at: created_at.parse().unwrap_or_else(|_| ids::now()),
            updated_at: updated_at.parse().unwrap_or_else(|_| ids::now()),
        })
    }
}

pub struct NewAsset {
    pub asset_type: AssetType,
    pub name: String,
    pub definition_name: String,
    pub status: String,
    pub properties: serde_json::Value,
}

/// Creates a new asset row. `name` is not unique at the database level: a
/// linked counterpart pair (C5) deliberately shares one name across two
/// distinct accession ids for as long as the link holds, so uniqueness is
/// only enforced on `accession_id`.
pub fn create_asset(conn: &Connection, new: NewAsset) -> CoreResult<Asset> {
    let now = ids::now();
    let asset = Asset {
        accession_id: ids::new_id(),
        asset_type: new.asset_type,
        name: new.name,
        definition_name: new.definition_name,
        status: new.status,
        current_protocol_run_accession_id: None,
        lock_reservation_id: None,
        linked_counterpart_accession_id: None,
        parent_deck_accession_id: None,
        current_deck_position_name: None,
        properties: new.properties,
        created_at: now,
        updated_at: now,
    };

    let asset_type_tag = serde_json::to_string(&asset.asset_type)?;
    let asset_type_tag = asset_type_tag.trim_matches('"');

    let result = conn.execute(
        "INSERT INTO assets (
            accession_id, asset_type, name, definition_name, status,
            current_protocol_run_accession_id, lock_reservation_id,
            linked_counterpart_accession_id,
            parent_deck_accession_id, current_deck_position_name,
            properties_json, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, NULL, NULL, NULL, ?6, ?7, ?8)",
        params![
            asset.accession_id.to_string(),
            asset_type_tag,
            asset.name,
            asset.definition_name,
            asset.status,
            serde_json::to_string(&asset.properties)?,
            asset.created_at.to_rfc3339(),
            asset.updated_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => Ok(asset),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Err(CoreError::Conflict {
                kind: ConflictKind::Uniqueness { field: "accession_id".into() },
                details: format!("asset '{}' already exists", asset.accession_id),
            })
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_asset(conn: &Connection, accession_id: &Uuid) -> CoreResult<Option<Asset>> {
    conn.query_row(
        "SELECT * FROM assets WHERE accession_id = ?1",
        params![accession_id.to_string()],
        Asset::from_row,
    )
    .optional()
    .map_err(CoreError::from)
}

pub fn get_asset_by_name(conn: &Connection, name: &str) -> CoreResult<Option<Asset>> {
    conn.query_row(
        "SELECT * FROM assets WHERE name = ?1",
        params![name],
        Asset::from_row,
    )
    .optional()
    .map_err(CoreError::from)
}

/// Lists assets of a given type, optionally filtered to a single status,
/// ordered by accession id (spec §4.2 — insertion order via UUIDv7).
pub fn list_assets(
    conn: &Connection,
    asset_type: AssetType,
    status: Option<&str>,
) -> CoreResult<Vec<Asset>> {
    let asset_type_tag = serde_json::to_string(&asset_type)?;
    let asset_type_tag = asset_type_tag.trim_matches('"').to_string();

    let mut stmt = if status.is_some() {
        conn.prepare(
            "SELECT * FROM assets WHERE asset_type = ?1 AND status = ?2 ORDER BY accession_id",
        )?
    } else {
        conn.prepare("SELECT * FROM assets WHERE asset_type = ?1 ORDER BY accession_id")?
    };

    let rows = if let Some(status) = status {
        stmt.query_map(params![asset_type_tag, status], Asset::from_row)?
    } else {
        stmt.query_map(params![asset_type_tag], Asset::from_row)?
    };

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn update_asset_status(conn: &Connection, accession_id: &Uuid, status: &str) -> CoreResult<()> {
    let touched = conn.execute(
        "UPDATE assets SET status = ?1, updated_at = ?2 WHERE accession_id = ?3",
        params![status, ids::now().to_rfc3339(), accession_id.to_string()],
    )?;
    if touched == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

/// Updates the deck position an asset occupies (or clears it, passing
/// `None`), and its parent deck. Used when a resource is placed on or
/// removed from a deck.
pub fn update_asset_position(
    conn: &Connection,
    accession_id: &Uuid,
    parent_deck_accession_id: Option<&Uuid>,
    position_name: Option<&str>,
) -> CoreResult<()> {
    let touched = conn.execute(
        "UPDATE assets SET parent_deck_accession_id = ?1, current_deck_position_name = ?2, updated_at = ?3
         WHERE accession_id = ?4",
        params![
            parent_deck_accession_id.map(|u| u.to_string()),
            position_name,
            ids::now().to_rfc3339(),
            accession_id.to_string(),
        ],
    )?;
    if touched == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

/// Sets or clears the forward counterpart link (spec §4.2 / entity linker).
/// The linker is the only caller that should invoke this directly, so both
/// sides of a link stay consistent.
pub fn set_counterpart(conn: &Connection, accession_id: &Uuid, counterpart: Option<&Uuid>) -> CoreResult<()> {
    let touched = conn.execute(
        "UPDATE assets SET linked_counterpart_accession_id = ?1, updated_at = ?2 WHERE accession_id = ?3",
        params![
            counterpart.map(|u| u.to_string()),
            ids::now().to_rfc3339(),
            accession_id.to_string(),
        ],
    )?;
    if touched == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

/// Flips an asset's `asset_type` column. The entity linker (C5) is the only
/// caller: linking a machine to a resource counterpart reclassifies both
/// sides as `MACHINE_RESOURCE`, and unlinking restores each side's original
/// type.
pub fn set_asset_type(conn: &Connection, accession_id: &Uuid, asset_type: AssetType) -> CoreResult<()> {
    let asset_type_tag = serde_json::to_string(&asset_type)?;
    let asset_type_tag = asset_type_tag.trim_matches('"');
    let touched = conn.execute(
        "UPDATE assets SET asset_type = ?1, updated_at = ?2 WHERE accession_id = ?3",
        params![asset_type_tag, ids::now().to_rfc3339(), accession_id.to_string()],
    )?;
    if touched == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

/// Renames an asset in place. The entity linker (C5) uses this to keep a
/// linked counterpart's display name exactly mirroring its owner's.
pub fn rename_asset(conn: &Connection, accession_id: &Uuid, new_name: &str) -> CoreResult<()> {
    let touched = conn.execute(
        "UPDATE assets SET name = ?1, updated_at = ?2 WHERE accession_id = ?3",
        params![new_name, ids::now().to_rfc3339(), accession_id.to_string()],
    )?;
    if touched == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

pub fn set_current_protocol_run(
    conn: &Connection,
    accession_id: &Uuid,
    run: Option<&Uuid>,
) -> CoreResult<()> {
    let touched = conn.execute(
        "UPDATE assets SET current_protocol_run_accession_id = ?1, updated_at = ?2 WHERE accession_id = ?3",
        params![
            run.map(|u| u.to_string()),
            ids::now().to_rfc3339(),
            accession_id.to_string(),
        ],
    )?;
    if touched == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

/// The teacher's `MachineStatus`/`ResourceStatus` both have a notion of
/// "acquirable"; this helper lets the lock manager check either family
/// without caring which one it's holding.
pub fn status_is_acquirable(asset_type: AssetType, status: &str) -> bool {
    match asset_type {
        AssetType::Machine | AssetType::MachineResource => serde_json::from_str::<MachineStatus>(&format!("\"{}\"", status))
            .map(|s| s.is_acquirable())
            .unwrap_or(false),
        AssetType::Resource => serde_json::from_str::<ResourceStatus>(&format!("\"{}\"", status))
            .map(|s| s.is_acquirable())
            .unwrap_or(false),
        AssetType::Deck => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;

    fn sample(name: &str) -> NewAsset {
        NewAsset {
            asset_type: AssetType::Machine,
            name: name.into(),
            definition_name: "liquid_handler_1".into(),
            status: "AVAILABLE".into(),
            properties: serde_json::json!({}),
        }
    }

    #[test]
    fn create_and_fetch_round_trip() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        let asset = create_asset(&conn, sample("lh-1")).unwrap();
        let fetched = get_asset(&conn, &asset.accession_id).unwrap().unwrap();
        assert_eq!(fetched.name, "lh-1");
        assert_eq!(fetched.status, "AVAILABLE");
    }

    #[test]
    fn two_assets_may_share_a_name() {
        // A linked counterpart pair (C5) deliberately shares a name across
        // two distinct accession ids, so creation must not reject this.
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        let a = create_asset(&conn, sample("lh-1")).unwrap();
        let b = create_asset(&conn, sample("lh-1")).unwrap();
        assert_ne!(a.accession_id, b.accession_id);
    }

    #[test]
    fn update_status_on_missing_asset_is_not_found() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        let err = update_asset_status(&conn, &Uuid::nil(), "IN_USE").unwrap_err();
        assert!(matches!(err, CoreError::NotFound));
    }

    #[test]
    fn acquirability_checks_the_right_enum_family() {
        assert!(status_is_acquirable(AssetType::Machine, "AVAILABLE"));
        assert!(!status_is_acquirable(AssetType::Machine, "IN_USE"));
        assert!(status_is_acquirable(AssetType::Resource, "AVAILABLE_ON_DECK"));
        assert!(!status_is_acquirable(AssetType::Deck, "AVAILABLE"));
    }
}
