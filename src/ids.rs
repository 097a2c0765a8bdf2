// src/ids.rs
//
// =============================================================================
// WORKCELL CORE: IDENTIFIER & CLOCK SERVICES (C1)
// =============================================================================
//
// Every persistent entity gets a time-ordered 128-bit identifier. Ordering
// by accession_id approximates creation order without a second index.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generates a fresh UUIDv7 accession id.
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

/// Current UTC wall-clock time. Centralized so tests can reason about the
/// one seam that touches real time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
