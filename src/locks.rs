// src/locks.rs
//
// =============================================================================
// WORKCELL CORE: ASSET LOCK MANAGER (C6)
// =============================================================================
//
// Grounded on `IAssetLockManager` (asset_lock_manager.py): acquire, release,
// release-all-for-a-run, and an availability check, expressed here as an
// async trait so a caller can swap in a remote lock service without
// touching the orchestrator.
//
// Lock identity is conceptually the tuple (asset_type, asset_name) (spec
// §4.3); this crate addresses that same identity by `asset_accession_id`
// instead, since `name` is already enforced unique per asset_type by the
// asset store (C4) and the accession id is the identifier every other
// module already keys on. A lock is held by `(run_accession_id,
// reservation_id)`: the reservation id is minted by the *caller* (the
// acquirer, C7) before the attempt, not generated here, so the acquirer can
// recognize its own reservation on release without a round trip.
//
// Acquisition is a single-row check-and-flip: `UPDATE assets SET status =
// 'IN_USE', current_protocol_run_accession_id = ?run, lock_reservation_id =
// ?reservation WHERE accession_id = ?asset AND status IN (<acquirable
// statuses>)`. The row count tells us whether we won the race; no separate
// SELECT-then-UPDATE window exists for two callers to both observe
// "available" and both proceed.

use crate::enums::AssetType;
use crate::errors::{CoreError, CoreResult};
use crate::ids;
use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[async_trait]
pub trait AssetLockManager: Send + Sync {
    /// Attempts to acquire `asset_accession_id` on behalf of `run_accession_id`
    /// under the caller-chosen `reservation_id` (spec §4.3: the reservation id
    /// is minted by the acquirer, not by this manager), polling cooperatively
    /// until `timeout` elapses if the asset is busy. `None` timeout means a
    /// single attempt with no retry. Returns `false`, not an error, if the
    /// asset never became available — unavailability is an ordinary outcome
    /// here; only the acquirer (C7) decides whether exhausting every
    /// candidate is a hard failure.
    async fn acquire_asset_lock(
        &self,
        asset_accession_id: &Uuid,
        run_accession_id: &Uuid,
        reservation_id: &Uuid,
        timeout: Option<Duration>,
    ) -> CoreResult<bool>;

    /// Releases `asset_accession_id` only if it is currently held under
    /// `reservation_id` (and, when supplied, `run_accession_id` matches the
    /// recorded holder too). A mismatched reservation is a no-op returning
    /// `false`, not an error — idempotent under a double release or a release
    /// racing a run that was never the true holder.
    async fn release_asset_lock(
        &self,
        asset_accession_id: &Uuid,
        reservation_id: &Uuid,
        run_accession_id: Option<&Uuid>,
    ) -> CoreResult<bool>;

    /// Releases every asset currently held by `run_accession_id`, regardless
    /// of reservation id. Called unconditionally at the end of a protocol
    /// run's lifecycle, success or failure, so a crashed run can never leave
    /// an asset stranded. Returns the count released.
    async fn release_all_protocol_locks(&self, run_accession_id: &Uuid) -> CoreResult<usize>;

    async fn check_asset_availability(&self, asset_accession_id: &Uuid) -> CoreResult<bool>;
}

/// SQLite-backed lock manager. Holds the database path rather than a shared
/// `Connection`, since `rusqlite::Connection` is `!Sync` and this trait's
/// methods are called concurrently from multiple tokio tasks.
pub struct SqliteLockManager {
    db_path: std::path::PathBuf,
    poll_interval: Duration,
}

impl SqliteLockManager {
    pub fn new(db_path: impl Into<std::path::PathBuf>, poll_interval: Duration) -> Self {
        Self {
            db_path: db_path.into(),
            poll_interval,
        }
    }

    fn conn(&self) -> CoreResult<Connection> {
        crate::store::open(&self.db_path)
    }

    fn try_acquire_once(
        &self,
        asset_accession_id: &Uuid,
        run_accession_id: &Uuid,
        reservation_id: &Uuid,
    ) -> CoreResult<bool> {
        let conn = self.conn()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let (asset_type, status): (String, String) = tx.query_row(
            "SELECT asset_type, status FROM assets WHERE accession_id = ?1",
            rusqlite::params![asset_accession_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let asset_type: AssetType = serde_json::from_str(&format!("\"{}\"", asset_type))?;

        if !crate::store::assets::status_is_acquirable(asset_type, &status) {
            return Ok(false);
        }

        let touched = tx.execute(
            "UPDATE assets SET status = ?1, current_protocol_run_accession_id = ?2,
                lock_reservation_id = ?3, updated_at = ?4
             WHERE accession_id = ?5 AND status = ?6",
            rusqlite::params![
                "IN_USE",
                run_accession_id.to_string(),
                reservation_id.to_string(),
                ids::now().to_rfc3339(),
                asset_accession_id.to_string(),
                status,
            ],
        )?;
        tx.commit()?;
        Ok(touched == 1)
    }
}

#[async_trait]
impl AssetLockManager for SqliteLockManager {
    async fn acquire_asset_lock(
        &self,
        asset_accession_id: &Uuid,
        run_accession_id: &Uuid,
        reservation_id: &Uuid,
        timeout: Option<Duration>,
    ) -> CoreResult<bool> {
        let asset_accession_id = *asset_accession_id;
        let run_accession_id = *run_accession_id;
        let reservation_id = *reservation_id;
        let deadline = timeout.map(|t| Instant::now() + t);
        let poll_interval = self.poll_interval;

        loop {
            let db_path = self.db_path.clone();
            let won = tokio::task::spawn_blocking(move || {
                let mgr = SqliteLockManager { db_path, poll_interval };
                mgr.try_acquire_once(&asset_accession_id, &run_accession_id, &reservation_id)
            })
            .await
            .map_err(|e| CoreError::AssetAcquisition(e.to_string()))??;

            if won {
                return Ok(true);
            }

            match deadline {
                Some(deadline) if Instant::now() >= deadline => return Ok(false),
                None => return Ok(false),
                Some(_) => {
                    // Cooperative poll: yield the task, never block the
                    // executor thread on the DB (spec §5).
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    async fn release_asset_lock(
        &self,
        asset_accession_id: &Uuid,
        reservation_id: &Uuid,
        run_accession_id: Option<&Uuid>,
    ) -> CoreResult<bool> {
        let asset_accession_id = *asset_accession_id;
        let reservation_id = *reservation_id;
        let run_accession_id = run_accession_id.copied();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = crate::store::open(&db_path)?;
            let asset = crate::store::assets::get_asset(&conn, &asset_accession_id)?.ok_or(CoreError::NotFound)?;

            let holds = asset.lock_reservation_id == Some(reservation_id)
                && run_accession_id.map_or(true, |run| asset.current_protocol_run_accession_id == Some(run));
            if !holds {
                return Ok(false);
            }

            let restored_status = match asset.asset_type {
                AssetType::Machine | AssetType::MachineResource => "AVAILABLE",
                AssetType::Resource => "AVAILABLE_ON_DECK",
                AssetType::Deck => "AVAILABLE",
            };
            conn.execute(
                "UPDATE assets SET status = ?1, current_protocol_run_accession_id = NULL,
                    lock_reservation_id = NULL, updated_at = ?2
                 WHERE accession_id = ?3",
                rusqlite::params![restored_status, ids::now().to_rfc3339(), asset_accession_id.to_string()],
            )?;
            Ok::<_, CoreError>(true)
        })
        .await
        .map_err(|e| CoreError::AssetRelease(e.to_string()))?
    }

    async fn release_all_protocol_locks(&self, run_accession_id: &Uuid) -> CoreResult<usize> {
        let run_accession_id = *run_accession_id;
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = crate::store::open(&db_path)?;
            let mut stmt = conn.prepare(
                "SELECT accession_id, asset_type FROM assets WHERE current_protocol_run_accession_id = ?1",
            )?;
            let held: Vec<(String, String)> = stmt
                .query_map(rusqlite::params![run_accession_id.to_string()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<_, _>>()?;

            let mut released = 0usize;
            for (accession_id, asset_type) in held {
                let asset_type: AssetType = serde_json::from_str(&format!("\"{}\"", asset_type))
                    .unwrap_or(AssetType::Resource);
                let restored_status = match asset_type {
                    AssetType::Machine | AssetType::MachineResource => "AVAILABLE",
                    AssetType::Resource => "AVAILABLE_ON_DECK",
                    AssetType::Deck => "AVAILABLE",
                };
                conn.execute(
                    "UPDATE assets SET status = ?1, current_protocol_run_accession_id = NULL,
                        lock_reservation_id = NULL, updated_at = ?2
                     WHERE accession_id = ?3",
                    rusqlite::params![restored_status, ids::now().to_rfc3339(), accession_id],
                )?;
                released += 1;
            }
            Ok::<_, CoreError>(released)
        })
        .await
        .map_err(|e| CoreError::AssetRelease(e.to_string()))?
    }

    async fn check_asset_availability(&self, asset_accession_id: &Uuid) -> CoreResult<bool> {
        let asset_accession_id = *asset_accession_id;
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = crate::store::open(&db_path)?;
            let asset = crate::store::assets::get_asset(&conn, &asset_accession_id)?.ok_or(CoreError::NotFound)?;
            Ok(crate::store::assets::status_is_acquirable(asset.asset_type, &asset.status))
        })
        .await
        .map_err(|e| CoreError::AssetAcquisition(e.to_string()))?
    }
}

struct InMemoryHold {
    run_accession_id: Uuid,
    reservation_id: Uuid,
}

/// In-memory lock manager for tests and single-process embedding that don't
/// want a file on disk. Keeps the same semantics as the SQLite-backed
/// manager but over a plain mutex-guarded map.
#[derive(Default, Clone)]
pub struct InMemoryLockManager {
    held: Arc<Mutex<std::collections::HashMap<Uuid, InMemoryHold>>>,
}

#[async_trait]
impl AssetLockManager for InMemoryLockManager {
    async fn acquire_asset_lock(
        &self,
        asset_accession_id: &Uuid,
        run_accession_id: &Uuid,
        reservation_id: &Uuid,
        _timeout: Option<Duration>,
    ) -> CoreResult<bool> {
        let mut held = self.held.lock().unwrap();
        if held.contains_key(asset_accession_id) {
            return Ok(false);
        }
        held.insert(
            *asset_accession_id,
            InMemoryHold {
                run_accession_id: *run_accession_id,
                reservation_id: *reservation_id,
            },
        );
        Ok(true)
    }

    async fn release_asset_lock(
        &self,
        asset_accession_id: &Uuid,
        reservation_id: &Uuid,
        run_accession_id: Option<&Uuid>,
    ) -> CoreResult<bool> {
        let mut held = self.held.lock().unwrap();
        let holds = match held.get(asset_accession_id) {
            Some(hold) => {
                hold.reservation_id == *reservation_id
                    && run_accession_id.map_or(true, |run| hold.run_accession_id == *run)
            }
            None => false,
        };
        if holds {
            held.remove(asset_accession_id);
        }
        Ok(holds)
    }

    async fn release_all_protocol_locks(&self, run_accession_id: &Uuid) -> CoreResult<usize> {
        let mut held = self.held.lock().unwrap();
        let before = held.len();
        held.retain(|_, hold| hold.run_accession_id != *run_accession_id);
        Ok(before - held.len())
    }

    async fn check_asset_availability(&self, asset_accession_id: &Uuid) -> CoreResult<bool> {
        Ok(!self.held.lock().unwrap().contains_key(asset_accession_id))
    }
}
