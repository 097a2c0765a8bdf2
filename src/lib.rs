// src/lib.rs
//
// =============================================================================
// WORKCELL CORE: LIBRARY ROOT
// =============================================================================
//
// This file declares the module tree and exports public types.

// 1. Declare Modules
pub mod acquire;
pub mod config;
pub mod enums;
pub mod errors;
pub mod executor;
pub mod ids;
pub mod linking;
pub mod locks;
pub mod logging;
pub mod orchestrator;
pub mod runtime;
pub mod store;

// 2. Re-exports (The Public API)
// These allow `use workcell_core::CoreError` or `use workcell_core::AssetLockManager`
// to work from outside the crate without reaching into individual modules.

pub use acquire::{AcquiredAsset, AssetRequirement};
pub use config::CoreConfig;
pub use enums::{
    AssetType, DataOutputType, FunctionCallStatus, MachineCategory, MachineStatus,
    ProtocolRunStatus, ResourceStatus, SpatialContext,
};
pub use errors::{ConflictKind, CoreError, CoreResult};
pub use executor::{execute_protocol_run, execute_protocol_run_blocking, ExecutionContext};
pub use locks::{AssetLockManager, InMemoryLockManager, SqliteLockManager};
pub use orchestrator::{InProcessOrchestrator, Orchestrator};
pub use runtime::{FunctionCall, InMemoryRuntime, RuntimeEvent, WorkcellRuntime};
pub use store::definitions::{MachineDefinitionFilter, ResourceDefinitionFilter};
pub use store::outputs::{PlateVisualization, WellDatum};
pub use store::Store;
