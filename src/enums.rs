// src/enums.rs
//
// =============================================================================
// WORKCELL CORE: ENUM VOCABULARIES (C2)
// =============================================================================
//
// Closed status/category tag sets. Wire tags are bit-exact with the source
// system's string enums (see spec §6) so they can round-trip through JSON
// bags stored alongside them without a translation layer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetType {
    Machine,
    Resource,
    Deck,
    MachineResource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStatus {
    Available,
    InUse,
    Error,
    Offline,
    Initializing,
    Maintenance,
}

impl MachineStatus {
    /// Statuses from which a lock acquisition is admissible (spec §4.3).
    pub fn is_acquirable(&self) -> bool {
        matches!(self, MachineStatus::Available)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    AvailableInStorage,
    AvailableOnDeck,
    InUse,
    Empty,
    PartiallyFilled,
    Full,
    NeedsRefill,
    ToBeDisposed,
    Disposed,
    ToBeCleaned,
    Cleaned,
    Error,
    Unknown,
}

impl ResourceStatus {
    pub fn is_acquirable(&self) -> bool {
        matches!(
            self,
            ResourceStatus::AvailableInStorage | ResourceStatus::AvailableOnDeck
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolRunStatus {
    Queued,
    Pending,
    Preparing,
    Running,
    Pausing,
    Paused,
    Resuming,
    Completed,
    Failed,
    Canceling,
    Cancelled,
    Intervening,
    RequiresIntervention,
}

impl ProtocolRunStatus {
    /// Terminal states are absorbing (spec §4.6): once here, further
    /// `update_run_status` calls are a no-op.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProtocolRunStatus::Completed
                | ProtocolRunStatus::Failed
                | ProtocolRunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionCallStatus {
    Success,
    Error,
    Pending,
    InProgress,
    Skipped,
    Canceled,
    Unknown,
}

/// Broad classification of machine types, mirroring the source catalog's
/// `MachineCategoryEnum`. Used by the acquirer's "looks like a Deck but
/// isn't catalogued" fast-fail heuristic (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineCategory {
    LiquidHandler,
    PlateReader,
    Incubator,
    Shaker,
    HeaterShaker,
    Pump,
    Fan,
    TemperatureController,
    Tilting,
    Thermocycler,
    Sealer,
    FlowCytometer,
    Scale,
    Centrifuge,
    Arm,
    GeneralAutomationDevice,
    OtherInstrument,
    Unknown,
}

impl MachineCategory {
    /// Categories that double as resources (heaters, shakers, readers, ...
    /// anything with a deck position it can occupy). Used when deciding
    /// whether to auto-offer a resource counterpart during linking.
    pub fn is_resource_capable(&self) -> bool {
        matches!(
            self,
            MachineCategory::PlateReader
                | MachineCategory::Incubator
                | MachineCategory::Shaker
                | MachineCategory::HeaterShaker
                | MachineCategory::TemperatureController
                | MachineCategory::Tilting
                | MachineCategory::Thermocycler
                | MachineCategory::FlowCytometer
                | MachineCategory::Scale
                | MachineCategory::Centrifuge
                | MachineCategory::Arm
                | MachineCategory::GeneralAutomationDevice
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataOutputType {
    OpticalDensity,
    Fluorescence,
    Luminescence,
    Absorbance,
    Weight,
    Temperature,
    Image,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpatialContext {
    WellSpecific,
    PlateSpecific,
    DeckPositionSpecific,
    #[serde(rename = "NONE")]
    None_,
}
