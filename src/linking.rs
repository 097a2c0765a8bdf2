// src/linking.rs
//
// =============================================================================
// WORKCELL CORE: ENTITY LINKER (C5)
// =============================================================================
//
// Machines and resources can have a "counterpart": a heater-shaker machine
// that is also addressable as a resource occupying a deck position, or a
// plate-reader resource that is also the machine driving reads. The link is
// stored as a pair of forward pointers (`linked_counterpart_accession_id` on
// both rows) rather than an in-memory bidirectional graph edge, so there is
// never a cycle to walk — this module is the only code allowed to write
// that column, which keeps both sides in sync by construction.
//
// Linking also reclassifies both sides: a linked pair's `asset_type` becomes
// `MACHINE_RESOURCE` on both rows for as long as the link holds, and each
// side's name is mirrored onto the other exactly (no decoration) so a lookup
// by name finds either half. Unlinking restores each side's original type.
//
// Grounded on `_create_or_link_resource_counterpart_for_machine` and
// `_create_or_link_machine_counterpart_for_resource` in the source system's
// entity-linking service: four cases per direction (existing counterpart
// given explicitly, create a new counterpart from a definition, reuse the
// existing link as a no-op, or unlink).

use crate::enums::AssetType;
use crate::errors::{CoreError, CoreResult};
use crate::store::assets::{self, Asset, NewAsset};
use crate::store::definitions;
use rusqlite::Connection;
use uuid::Uuid;

/// What to do with a machine's resource counterpart.
pub enum CounterpartRequest {
    /// Link to this already-existing asset.
    LinkExisting(Uuid),
    /// Create a new counterpart asset from the named definition and link it.
    /// The counterpart's name is not given here — it is mirrored from the
    /// owner's own name, matching `synchronize_names`'s invariant from the
    /// moment the counterpart is born.
    CreateFromDefinition { definition_name: String },
    /// Remove any existing counterpart link.
    Unlink,
}

/// Links (or unlinks) a machine's resource counterpart. Mirrors
/// `_create_or_link_resource_counterpart_for_machine`: if the machine
/// already points at the requested counterpart, this is a no-op; otherwise
/// the old link (if any) is cleared before the new one is set, since a
/// counterpart link is one-to-one on each side.
pub fn link_machine_to_resource(
    conn: &Connection,
    machine_accession_id: &Uuid,
    request: CounterpartRequest,
) -> CoreResult<Option<Asset>> {
    link_counterpart(conn, machine_accession_id, AssetType::Machine, AssetType::Resource, request)
}

/// Links (or unlinks) a resource's machine counterpart. Mirrors
/// `_create_or_link_machine_counterpart_for_resource`.
pub fn link_resource_to_machine(
    conn: &Connection,
    resource_accession_id: &Uuid,
    request: CounterpartRequest,
) -> CoreResult<Option<Asset>> {
    link_counterpart(conn, resource_accession_id, AssetType::Resource, AssetType::Machine, request)
}

fn link_counterpart(
    conn: &Connection,
    owner_accession_id: &Uuid,
    owner_home_type: AssetType,
    counterpart_home_type: AssetType,
    request: CounterpartRequest,
) -> CoreResult<Option<Asset>> {
    let owner = assets::get_asset(conn, owner_accession_id)?.ok_or(CoreError::NotFound)?;

    match request {
        CounterpartRequest::Unlink => {
            clear_existing_link(conn, &owner, counterpart_home_type)?;
            assets::set_asset_type(conn, owner_accession_id, owner_home_type)?;
            Ok(None)
        }

        CounterpartRequest::LinkExisting(counterpart_id) => {
            // Already linked to exactly this counterpart: no-op, matching
            // the source's "reuse existing link" branch.
            if owner.linked_counterpart_accession_id == Some(counterpart_id) {
                return Ok(assets::get_asset(conn, &counterpart_id)?);
            }

            let counterpart = assets::get_asset(conn, &counterpart_id)?.ok_or(CoreError::NotFound)?;
            if counterpart.asset_type != counterpart_home_type {
                return Err(CoreError::InvalidLinkOperation(format!(
                    "expected an unlinked {:?} counterpart, got {:?}",
                    counterpart_home_type, counterpart.asset_type
                )));
            }

            clear_existing_link(conn, &owner, counterpart_home_type)?;
            establish_link(conn, owner_accession_id, &counterpart.accession_id)?;
            Ok(assets::get_asset(conn, &counterpart_id)?)
        }

        CounterpartRequest::CreateFromDefinition { definition_name } => {
            ensure_definition_exists(conn, counterpart_home_type, &definition_name)?;
            clear_existing_link(conn, &owner, counterpart_home_type)?;

            let status = match counterpart_home_type {
                AssetType::Machine => "OFFLINE",
                _ => "AVAILABLE_IN_STORAGE",
            };
            let counterpart = assets::create_asset(
                conn,
                NewAsset {
                    asset_type: counterpart_home_type,
                    name: owner.name.clone(),
                    definition_name,
                    status: status.to_string(),
                    properties: serde_json::json!({}),
                },
            )?;

            establish_link(conn, owner_accession_id, &counterpart.accession_id)?;
            Ok(assets::get_asset(conn, &counterpart.accession_id)?)
        }
    }
}

/// Checks that `definition_name` names a real catalog entry before a
/// counterpart is created from it — creating an asset against a definition
/// that doesn't exist would leave a dangling `definition_name` with no
/// catalog row to describe its capabilities.
fn ensure_definition_exists(conn: &Connection, asset_type: AssetType, definition_name: &str) -> CoreResult<()> {
    let exists = match asset_type {
        AssetType::Machine => definitions::get_machine_definition(conn, definition_name)?.is_some(),
        _ => definitions::get_resource_definition(conn, definition_name)?.is_some(),
    };
    if !exists {
        return Err(CoreError::DefinitionNotFound(definition_name.to_string()));
    }
    Ok(())
}

/// Sets the forward pointers on both sides and reclassifies both rows as
/// `MACHINE_RESOURCE` for the duration of the link.
fn establish_link(conn: &Connection, owner_accession_id: &Uuid, counterpart_accession_id: &Uuid) -> CoreResult<()> {
    assets::set_counterpart(conn, owner_accession_id, Some(counterpart_accession_id))?;
    assets::set_counterpart(conn, counterpart_accession_id, Some(owner_accession_id))?;
    assets::set_asset_type(conn, owner_accession_id, AssetType::MachineResource)?;
    assets::set_asset_type(conn, counterpart_accession_id, AssetType::MachineResource)?;
    Ok(())
}

/// Clears `owner`'s existing counterpart link, if any, restoring that
/// counterpart's `asset_type` to its home type. Does not touch `owner`'s own
/// `asset_type` — the caller decides what `owner` becomes next.
fn clear_existing_link(conn: &Connection, owner: &Asset, counterpart_home_type: AssetType) -> CoreResult<()> {
    if let Some(existing) = owner.linked_counterpart_accession_id {
        assets::set_asset_type(conn, &existing, counterpart_home_type)?;
        assets::set_counterpart(conn, &existing, None)?;
    }
    Ok(())
}

/// Keeps a counterpart pair's display names in sync after a rename, mirroring
/// the new name onto the counterpart exactly — the source system relies on
/// either half resolving to the same logical name, so a suffix or other
/// decoration here would break that lookup.
pub fn synchronize_names(conn: &Connection, accession_id: &Uuid, new_name: &str) -> CoreResult<()> {
    let asset = assets::get_asset(conn, accession_id)?.ok_or(CoreError::NotFound)?;
    assets::rename_asset(conn, accession_id, new_name)?;
    if let Some(counterpart_id) = asset.linked_counterpart_accession_id {
        assets::rename_asset(conn, &counterpart_id, new_name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;
    use crate::enums::MachineCategory;

    fn seed_definitions(conn: &Connection) {
        definitions::put_machine_definition(
            conn,
            &definitions::MachineDefinition {
                name: "heater_shaker_1".into(),
                fqn: None,
                category: MachineCategory::HeaterShaker,
                backend_type: Some("inheco_thermoshake".into()),
                extra: serde_json::json!({}),
            },
        )
        .unwrap();
        definitions::put_resource_definition(
            conn,
            &definitions::ResourceDefinition {
                name: "heater_shaker_plate_site".into(),
                fqn: None,
                category: "plate_site".into(),
                is_consumable: false,
                extra: serde_json::json!({}),
            },
        )
        .unwrap();
    }

    fn make_machine(conn: &Connection, name: &str) -> Asset {
        assets::create_asset(
            conn,
            NewAsset {
                asset_type: AssetType::Machine,
                name: name.into(),
                definition_name: "heater_shaker_1".into(),
                status: "AVAILABLE".into(),
                properties: serde_json::json!({}),
            },
        )
        .unwrap()
    }

    #[test]
    fn create_from_definition_links_both_sides_and_reclassifies_them() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        seed_definitions(&conn);
        let machine = make_machine(&conn, "hs-1");

        let resource = link_machine_to_resource(
            &conn,
            &machine.accession_id,
            CounterpartRequest::CreateFromDefinition { definition_name: "heater_shaker_plate_site".into() },
        )
        .unwrap()
        .unwrap();

        assert_eq!(resource.name, "hs-1");
        assert_eq!(resource.asset_type, AssetType::MachineResource);

        let machine_reloaded = assets::get_asset(&conn, &machine.accession_id).unwrap().unwrap();
        assert_eq!(machine_reloaded.linked_counterpart_accession_id, Some(resource.accession_id));
        assert_eq!(machine_reloaded.asset_type, AssetType::MachineResource);
        assert_eq!(resource.linked_counterpart_accession_id, Some(machine.accession_id));
    }

    #[test]
    fn create_from_definition_rejects_an_unknown_definition() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        let machine = make_machine(&conn, "hs-1");

        let err = link_machine_to_resource(
            &conn,
            &machine.accession_id,
            CounterpartRequest::CreateFromDefinition { definition_name: "no_such_definition".into() },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::DefinitionNotFound(_)));
    }

    #[test]
    fn relinking_to_same_counterpart_is_a_noop() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        seed_definitions(&conn);
        let machine = make_machine(&conn, "hs-1");
        let resource = link_machine_to_resource(
            &conn,
            &machine.accession_id,
            CounterpartRequest::CreateFromDefinition { definition_name: "heater_shaker_plate_site".into() },
        )
        .unwrap()
        .unwrap();

        let again = link_machine_to_resource(
            &conn,
            &machine.accession_id,
            CounterpartRequest::LinkExisting(resource.accession_id),
        )
        .unwrap()
        .unwrap();
        assert_eq!(again.accession_id, resource.accession_id);
    }

    #[test]
    fn unlink_clears_both_sides_and_restores_their_original_types() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        seed_definitions(&conn);
        let machine = make_machine(&conn, "hs-1");
        let resource = link_machine_to_resource(
            &conn,
            &machine.accession_id,
            CounterpartRequest::CreateFromDefinition { definition_name: "heater_shaker_plate_site".into() },
        )
        .unwrap()
        .unwrap();

        link_machine_to_resource(&conn, &machine.accession_id, CounterpartRequest::Unlink).unwrap();

        let machine_reloaded = assets::get_asset(&conn, &machine.accession_id).unwrap().unwrap();
        let resource_reloaded = assets::get_asset(&conn, &resource.accession_id).unwrap().unwrap();
        assert!(machine_reloaded.linked_counterpart_accession_id.is_none());
        assert!(resource_reloaded.linked_counterpart_accession_id.is_none());
        assert_eq!(machine_reloaded.asset_type, AssetType::Machine);
        assert_eq!(resource_reloaded.asset_type, AssetType::Resource);
    }

    #[test]
    fn linking_wrong_asset_type_is_rejected() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        let machine_a = make_machine(&conn, "hs-1");
        let machine_b = make_machine(&conn, "hs-2");

        let err = link_machine_to_resource(
            &conn,
            &machine_a.accession_id,
            CounterpartRequest::LinkExisting(machine_b.accession_id),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidLinkOperation(_)));
    }

    #[test]
    fn renaming_the_owner_mirrors_the_name_onto_its_counterpart_exactly() {
        let (_dir, store) = temp_store();
        let conn = store.conn().unwrap();
        seed_definitions(&conn);
        let machine = make_machine(&conn, "hs-1");
        let resource = link_machine_to_resource(
            &conn,
            &machine.accession_id,
            CounterpartRequest::CreateFromDefinition { definition_name: "heater_shaker_plate_site".into() },
        )
        .unwrap()
        .unwrap();

        synchronize_names(&conn, &machine.accession_id, "hs-1-renamed").unwrap();

        let resource_reloaded = assets::get_asset(&conn, &resource.accession_id).unwrap().unwrap();
        assert_eq!(resource_reloaded.name, "hs-1-renamed");
    }
}
