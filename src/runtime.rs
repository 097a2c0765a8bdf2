// src/runtime.rs
//
// =============================================================================
// WORKCELL CORE: WORKCELL RUNTIME PORT (C12)
// =============================================================================
//
// The seam between this crate and whatever actually drives hardware or
// simulates it. Mirrors the teacher's `CodeDriver` trait + `DriverFactory`
// split (drivers.rs): a small async-trait port, with dispatch-by-name left
// to the implementer rather than baked into this crate, since the concrete
// drivers live outside the orchestration core.
//
// Six lifecycle operations (spec §4.8) plus `call`, which drives a protocol's
// own function-call sequence once its assets are live. The acquirer (C7)
// calls `initialize_machine`/`create_or_get_resource` when it wins a lock and
// `shutdown_machine`/`clear_resource_instance` when it releases one.

use crate::errors::CoreResult;
use crate::store::assets::Asset;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// A single function invocation dispatched to the runtime: the function
/// name from a protocol definition's call sequence, plus its arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function_name: String,
    pub args: serde_json::Value,
}

#[async_trait]
pub trait WorkcellRuntime: Send + Sync {
    /// Executes one function call against the workcell and returns its
    /// return value. Implementers own all hardware/simulator dispatch;
    /// this crate only needs the result to log and to thread into the next
    /// call's arguments if the protocol definition says so.
    async fn call(&self, call: &FunctionCall) -> CoreResult<serde_json::Value>;

    /// Brings up the concrete runtime object for a machine the acquirer just
    /// won a lock on. If `machine`'s definition declares a deck and it has
    /// none assigned yet, implementers auto-assign one (spec §4.8) before
    /// returning.
    async fn initialize_machine(&self, machine: &Asset) -> CoreResult<serde_json::Value>;

    /// Tears down the runtime object for a machine being released.
    async fn shutdown_machine(&self, machine: &Asset) -> CoreResult<()>;

    /// Materializes (or reuses) the runtime object backing a resource
    /// instance the acquirer just won a lock on.
    async fn create_or_get_resource(&self, resource: &Asset) -> CoreResult<serde_json::Value>;

    /// Places a resource's runtime object onto a named position on a deck's
    /// runtime object.
    async fn assign_resource_to_deck(
        &self,
        resource: &Asset,
        deck: &Asset,
        position_name: &str,
    ) -> CoreResult<()>;

    /// Releases a resource's runtime object without necessarily unassigning
    /// its deck position (e.g. a plate left in a reader between runs).
    async fn clear_resource_instance(&self, resource: &Asset) -> CoreResult<()>;

    /// Clears whatever occupies a named deck position.
    async fn clear_deck_position(&self, deck: &Asset, position_name: &str) -> CoreResult<()>;
}

/// One lifecycle event recorded by `InMemoryRuntime`, for tests that assert
/// on what the acquirer/orchestrator actually drove through the port.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    InitializeMachine(String),
    ShutdownMachine(String),
    CreateOrGetResource(String),
    AssignResourceToDeck(String, String, String),
    ClearResourceInstance(String),
    ClearDeckPosition(String, String),
}

/// A reference runtime for tests and dry-run embedding: records every call
/// it receives and returns a canned or echoed value. Not meant for
/// production use — grounded on the teacher's `ExternalDriver`, which plays
/// the same "does nothing but prove the port works" role for its own
/// integration tests.
#[derive(Default)]
pub struct InMemoryRuntime {
    calls: Mutex<Vec<FunctionCall>>,
    events: Mutex<Vec<RuntimeEvent>>,
    canned_responses: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, function_name: impl Into<String>, value: serde_json::Value) -> Self {
        self.canned_responses
            .lock()
            .unwrap()
            .insert(function_name.into(), value);
        self
    }

    pub fn calls(&self) -> Vec<FunctionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkcellRuntime for InMemoryRuntime {
    async fn call(&self, call: &FunctionCall) -> CoreResult<serde_json::Value> {
        self.calls.lock().unwrap().push(call.clone());
        let canned = self.canned_responses.lock().unwrap().get(&call.function_name).cloned();
        Ok(canned.unwrap_or(serde_json::Value::Null))
    }

    async fn initialize_machine(&self, machine: &Asset) -> CoreResult<serde_json::Value> {
        self.events.lock().unwrap().push(RuntimeEvent::InitializeMachine(machine.name.clone()));
        Ok(serde_json::json!({"kind": "machine", "name": machine.name}))
    }

    async fn shutdown_machine(&self, machine: &Asset) -> CoreResult<()> {
        self.events.lock().unwrap().push(RuntimeEvent::ShutdownMachine(machine.name.clone()));
        Ok(())
    }

    async fn create_or_get_resource(&self, resource: &Asset) -> CoreResult<serde_json::Value> {
        self.events.lock().unwrap().push(RuntimeEvent::CreateOrGetResource(resource.name.clone()));
        Ok(serde_json::json!({"kind": "resource", "name": resource.name}))
    }

    async fn assign_resource_to_deck(&self, resource: &Asset, deck: &Asset, position_name: &str) -> CoreResult<()> {
        self.events.lock().unwrap().push(RuntimeEvent::AssignResourceToDeck(
            resource.name.clone(),
            deck.name.clone(),
            position_name.to_string(),
        ));
        Ok(())
    }

    async fn clear_resource_instance(&self, resource: &Asset) -> CoreResult<()> {
        self.events.lock().unwrap().push(RuntimeEvent::ClearResourceInstance(resource.name.clone()));
        Ok(())
    }

    async fn clear_deck_position(&self, deck: &Asset, position_name: &str) -> CoreResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(RuntimeEvent::ClearDeckPosition(deck.name.clone(), position_name.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::AssetType;
    use crate::ids;

    fn sample_asset(name: &str, asset_type: AssetType) -> Asset {
        Asset {
            accession_id: ids::new_id(),
            asset_type,
            name: name.into(),
            definition_name: "def".into(),
            status: "AVAILABLE".into(),
            current_protocol_run_accession_id: None,
            lock_reservation_id: None,
            linked_counterpart_accession_id: None,
            parent_deck_accession_id: None,
            current_deck_position_name: None,
            properties: serde_json::json!({}),
            created_at: ids::now(),
            updated_at: ids::now(),
        }
    }

    #[tokio::test]
    async fn records_every_call_it_receives() {
        let runtime = InMemoryRuntime::new().with_response("aspirate", serde_json::json!({"ok": true}));
        let result = runtime
            .call(&FunctionCall {
                function_name: "aspirate".into(),
                args: serde_json::json!({"volume": 50}),
            })
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
        assert_eq!(runtime.calls().len(), 1);
    }

    #[tokio::test]
    async fn records_machine_and_resource_lifecycle_events() {
        let runtime = InMemoryRuntime::new();
        let machine = sample_asset("lh-1", AssetType::Machine);
        let resource = sample_asset("plate-1", AssetType::Resource);
        let deck = sample_asset("deck-1", AssetType::Deck);

        runtime.initialize_machine(&machine).await.unwrap();
        runtime.create_or_get_resource(&resource).await.unwrap();
        runtime.assign_resource_to_deck(&resource, &deck, "A1").await.unwrap();
        runtime.clear_resource_instance(&resource).await.unwrap();
        runtime.clear_deck_position(&deck, "A1").await.unwrap();
        runtime.shutdown_machine(&machine).await.unwrap();

        let events = runtime.events();
        assert_eq!(events.len(), 6);
        assert_eq!(events[0], RuntimeEvent::InitializeMachine("lh-1".into()));
        assert_eq!(events[5], RuntimeEvent::ShutdownMachine("lh-1".into()));
    }
}
