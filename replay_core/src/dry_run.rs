//! An in-memory surface for rehearsing a trace without a live session.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use serde_json::json;
use trace_runtime::actions;

use crate::surface::{
    CallValue, EntityHandle, ExecutionSurface, MarshalledCall, Position, Prototype, SurfaceError,
};

const KNOWN_ACTIONS: [&str; 10] = [
    actions::CRAFT_ITEM,
    actions::MOVE_TO,
    actions::PICKUP_ENTITY,
    actions::PLACE_ENTITY,
    actions::EXTRACT_ITEM,
    actions::INSERT_ITEM,
    actions::ROTATE_ENTITY,
    actions::SET_ENTITY_RECIPE,
    actions::SET_RESEARCH,
    actions::HARVEST_RESOURCE,
];

#[derive(Debug, Default)]
struct DryRunState {
    calls: Vec<MarshalledCall>,
    entities: Vec<EntityHandle>,
    next_id: u64,
}

/// Records every call and tracks placed entities. Without a catalog every
/// name resolves.
#[derive(Debug, Default)]
pub struct DryRunSurface {
    catalog: Option<BTreeSet<String>>,
    failures: HashMap<String, String>,
    latency: Duration,
    state: Mutex<DryRunState>,
    releases: AtomicUsize,
}

impl DryRunSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.catalog = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_entity(self, name: &str, position: Position) -> Self {
        self.spawn_entity(Prototype::new(name), position);
        self
    }

    /// Every call to `action` fails with `message`.
    pub fn fail_on(mut self, action: &str, message: &str) -> Self {
        self.failures.insert(action.to_string(), message.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<MarshalledCall> {
        self.state().calls.clone()
    }

    pub fn entities(&self) -> Vec<EntityHandle> {
        self.state().entities.clone()
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DryRunState> {
        self.state.lock().expect("dry run state mutex poisoned")
    }

    fn spawn_entity(&self, prototype: Prototype, position: Position) -> EntityHandle {
        let mut state = self.state();
        state.next_id += 1;
        let entity = EntityHandle {
            id: state.next_id,
            prototype,
            position,
        };
        state.entities.push(entity.clone());
        entity
    }

    fn apply(&self, call: &MarshalledCall) -> serde_json::Value {
        let name = call.arg("entity").and_then(CallValue::as_name);
        let position = call.arg("position").and_then(CallValue::as_position);
        match (call.name.as_str(), name, position) {
            (actions::PLACE_ENTITY, Some(name), Some(position)) => {
                let entity = self.spawn_entity(Prototype::new(name), position);
                json!({ "placed": entity.id })
            }
            (actions::PICKUP_ENTITY, Some(name), Some(position)) => {
                let mut state = self.state();
                let found = state.entities.iter().position(|entity| {
                    entity.prototype.name() == name && entity.position.distance(&position) <= 0.5
                });
                let removed = found.map(|index| state.entities.remove(index).id);
                json!({ "removed": removed })
            }
            _ => json!({ "ok": true }),
        }
    }
}

impl ExecutionSurface for DryRunSurface {
    fn has_action(&self, name: &str) -> bool {
        KNOWN_ACTIONS.contains(&name)
    }

    fn invoke(&self, call: &MarshalledCall) -> Result<serde_json::Value, SurfaceError> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        self.state().calls.push(call.clone());
        if let Some(message) = self.failures.get(&call.name) {
            return Err(SurfaceError::new(message.clone()));
        }
        Ok(self.apply(call))
    }

    fn prototype(&self, name: &str) -> Option<Prototype> {
        match &self.catalog {
            Some(catalog) if !catalog.contains(name) => None,
            _ => Some(Prototype::new(name)),
        }
    }

    fn find_entity(
        &self,
        prototype: &Prototype,
        position: Position,
        radius: f64,
    ) -> Option<EntityHandle> {
        self.state()
            .entities
            .iter()
            .find(|entity| &entity.prototype == prototype && entity.position.distance(&position) <= radius)
            .cloned()
    }

    fn observe_state(&self) -> Option<serde_json::Value> {
        let state = self.state();
        Some(json!({
            "calls": state.calls.len(),
            "entities": state.entities,
        }))
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placed_entities_can_be_found_and_picked_up() {
        let surface = DryRunSurface::new();
        let furnace = Prototype::new("stone-furnace");
        let place = MarshalledCall::new(actions::PLACE_ENTITY)
            .with("entity", CallValue::Prototype(furnace.clone()))
            .with("position", CallValue::Position(Position::new(2.0, 2.0)));
        surface.invoke(&place).unwrap();

        let found = surface
            .find_entity(&furnace, Position::new(2.3, 2.0), 0.5)
            .expect("furnace is nearby");
        assert_eq!(found.position, Position::new(2.0, 2.0));
        assert!(surface.find_entity(&furnace, Position::new(3.0, 2.0), 0.5).is_none());

        let pickup = MarshalledCall::new(actions::PICKUP_ENTITY)
            .with("entity", CallValue::Prototype(furnace.clone()))
            .with("position", CallValue::Position(Position::new(2.0, 2.0)));
        assert_eq!(surface.invoke(&pickup).unwrap(), json!({ "removed": found.id }));
        assert!(surface.entities().is_empty());
    }

    #[test]
    fn catalog_limits_resolution() {
        let surface = DryRunSurface::new().with_catalog(["coal"]);
        assert_eq!(surface.prototype("coal"), Some(Prototype::new("coal")));
        assert_eq!(surface.prototype("uranium-ore"), None);
        assert!(DryRunSurface::new().prototype("anything").is_some());
    }
}
