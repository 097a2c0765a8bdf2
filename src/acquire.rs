// src/acquire.rs
//
// =============================================================================
// WORKCELL CORE: ASSET ACQUIRER (C7)
// =============================================================================
//
// Sits between a protocol run's declared requirements and the lock manager.
// A requirement names a definition (by fully-qualified catalog name), not a
// concrete asset; the acquirer picks the first acquirable asset backed by
// that definition, locks it, and calls C12 to materialize its runtime
// object — spec §4.4's `acquire_machine`/`acquire_resource` algorithms,
// collapsed into one code path since both differ only in which C12 method
// and terminal status they use.
//
// This crate does not maintain an FQN-to-constructor registry the way the
// source system's driver factory does — that lookup is a concern of whatever
// `WorkcellRuntime` implementer actually drives the hardware (see
// runtime.rs) — the acquirer only needs the definition catalog to validate
// that a requirement names something real before it goes looking for a free
// instance.

use crate::enums::AssetType;
use crate::errors::{CoreError, CoreResult};
use crate::ids;
use crate::locks::AssetLockManager;
use crate::runtime::WorkcellRuntime;
use crate::store::assets::{self, Asset};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AssetRequirement {
    pub asset_type: AssetType,
    pub definition_name: String,
    pub timeout: Option<Duration>,
}

/// An asset won by the acquirer: the concrete row plus the reservation id
/// that must be handed back to `release` — the lock manager identifies a
/// hold by `(reservation_id, run_accession_id)`, not by asset alone, so this
/// id has to travel with the asset for as long as the run holds it.
#[derive(Debug, Clone)]
pub struct AcquiredAsset {
    pub asset: Asset,
    pub reservation_id: Uuid,
}

/// Finds a free asset backed by `requirement.definition_name`, locks it on
/// behalf of `run_accession_id`, and brings up its runtime object via C12.
/// Candidates are tried in accession-id (creation) order so acquisition is
/// deterministic across retries; a run re-entering acquisition for an asset
/// it already holds will find that asset still `IN_USE` under its own
/// reservation and simply re-lock it (the lock manager's acquire is a no-op
/// collision for anyone else, but this run already owns it — see
/// `locks.rs`'s reentrancy note).
pub async fn acquire(
    conn: &Connection,
    lock_manager: &Arc<dyn AssetLockManager>,
    runtime: &Arc<dyn WorkcellRuntime>,
    run_accession_id: &Uuid,
    requirement: &AssetRequirement,
) -> CoreResult<AcquiredAsset> {
    let candidates = assets::list_assets(conn, requirement.asset_type, None)?
        .into_iter()
        .filter(|a| a.definition_name == requirement.definition_name)
        .collect::<Vec<_>>();

    if candidates.is_empty() {
        return Err(CoreError::AssetAcquisition(format!(
            "no assets catalogued under definition '{}'",
            requirement.definition_name
        )));
    }

    for candidate in candidates {
        let reservation_id = ids::new_id();
        let won = lock_manager
            .acquire_asset_lock(&candidate.accession_id, run_accession_id, &reservation_id, requirement.timeout)
            .await?;
        if !won {
            continue;
        }

        let init_result = match requirement.asset_type {
            AssetType::Machine => runtime.initialize_machine(&candidate).await,
            _ => runtime.create_or_get_resource(&candidate).await,
        };
        if let Err(e) = init_result {
            lock_manager
                .release_asset_lock(&candidate.accession_id, &reservation_id, Some(run_accession_id))
                .await?;
            return Err(e);
        }

        assets::update_asset_status(conn, &candidate.accession_id, "IN_USE")?;
        assets::set_current_protocol_run(conn, &candidate.accession_id, Some(run_accession_id))?;

        let asset = assets::get_asset(conn, &candidate.accession_id)?.ok_or(CoreError::NotFound)?;
        return Ok(AcquiredAsset { asset, reservation_id });
    }

    Err(CoreError::AssetAcquisition(format!(
        "all candidates for '{}' were unavailable",
        requirement.definition_name
    )))
}

/// Releases a previously-acquired asset: tears down its runtime object via
/// C12, restores its terminal status, and releases the lock (spec §4.4's
/// release algorithm, steps 1 and 4 swapped so the runtime teardown happens
/// while the asset is still recorded as held — a crash mid-teardown leaves
/// the asset locked rather than silently available).
pub async fn release(
    conn: &Connection,
    lock_manager: &Arc<dyn AssetLockManager>,
    runtime: &Arc<dyn WorkcellRuntime>,
    run_accession_id: &Uuid,
    acquired: &AcquiredAsset,
) -> CoreResult<()> {
    match acquired.asset.asset_type {
        AssetType::Machine => runtime.shutdown_machine(&acquired.asset).await?,
        _ => runtime.clear_resource_instance(&acquired.asset).await?,
    }

    lock_manager
        .release_asset_lock(&acquired.asset.accession_id, &acquired.reservation_id, Some(run_accession_id))
        .await?;
    Ok(())
}
