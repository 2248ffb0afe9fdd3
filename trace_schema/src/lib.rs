//! Data contracts shared by the trace decoder, the normalizer and the replay
//! runtime.

use ahash::RandomState;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{BuildHasher, Hasher};

/// Logical ticks per simulated second.
pub const TICKS_PER_SECOND: u32 = 60;

/// Canonical action names emitted by the normalizer and understood by the
/// replay marshaller.
pub mod actions {
    pub const CRAFT_ITEM: &str = "craft_item";
    pub const MOVE_TO: &str = "move_to";
    pub const PICKUP_ENTITY: &str = "pickup_entity";
    pub const PLACE_ENTITY: &str = "place_entity";
    pub const EXTRACT_ITEM: &str = "extract_item";
    pub const INSERT_ITEM: &str = "insert_item";
    pub const ROTATE_ENTITY: &str = "rotate_entity";
    pub const SET_ENTITY_RECIPE: &str = "set_entity_recipe";
    pub const SET_RESEARCH: &str = "set_research";
    pub const HARVEST_RESOURCE: &str = "harvest_resource";

    /// Argument keys that only exist for scheduling.
    pub const TIMING_KEYS: [&str; 3] = ["start_tick", "end_tick", "tick"];
}

/// Approximate header recovered by the heuristic frame walker. Carries no
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    pub action_id: u8,
    pub tick: u32,
    pub originator: u16,
}

/// One entry of a multi-item transfer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item: String,
    #[serde(default = "default_item_count")]
    pub count: u32,
}

fn default_item_count() -> u32 {
    1
}

impl ItemStack {
    pub fn new(item: impl Into<String>, count: u32) -> Self {
        Self {
            item: item.into(),
            count,
        }
    }
}

/// Argument value carried by a canonical action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    Int(i64),
    Float(f64),
    Str(String),
    Items(Vec<ItemStack>),
}

impl ArgValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Integers widen to floats; strings never coerce.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ArgValue::Int(value) => Some(*value as f64),
            ArgValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_items(&self) -> Option<&[ItemStack]> {
        match self {
            ArgValue::Items(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Int(value)
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        ArgValue::Int(value.into())
    }
}

impl From<u32> for ArgValue {
    fn from(value: u32) -> Self {
        ArgValue::Int(value.into())
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Float(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Str(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Str(value)
    }
}

impl From<Vec<ItemStack>> for ArgValue {
    fn from(value: Vec<ItemStack>) -> Self {
        ArgValue::Items(value)
    }
}

/// Insertion-ordered argument mapping. Keys are unique; inserting an existing
/// key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionArgs(Vec<(String, ArgValue)>);

impl ActionArgs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ArgValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn remove(&mut self, key: &str) -> Option<ArgValue> {
        let index = self.0.iter().position(|(existing, _)| existing == key)?;
        Some(self.0.remove(index).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ArgValue::as_int)
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ArgValue::as_float)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ArgValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, ArgValue)> for ActionArgs {
    fn from_iter<T: IntoIterator<Item = (K, ArgValue)>>(iter: T) -> Self {
        let mut args = ActionArgs::new();
        for (key, value) in iter {
            args.insert(key, value);
        }
        args
    }
}

/// Normalized `(tick, name, arguments)` unit, independent of the schema the
/// record came from. `sort_tick` is the start tick for actions with duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAction {
    pub sort_tick: i64,
    pub name: String,
    pub args: ActionArgs,
}

impl CanonicalAction {
    pub fn new(sort_tick: i64, name: impl Into<String>, args: ActionArgs) -> Self {
        Self {
            sort_tick,
            name: name.into(),
            args,
        }
    }
}

/// One speed-bounded piece of a decomposed movement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveSegment {
    pub start_tick: i64,
    pub end_tick: i64,
    pub start_x: f64,
    pub start_y: f64,
    pub end_x: f64,
    pub end_y: f64,
}

impl MoveSegment {
    pub fn duration(&self) -> i64 {
        self.end_tick.saturating_sub(self.start_tick)
    }

    pub fn distance(&self) -> f64 {
        (self.end_x - self.start_x).hypot(self.end_y - self.start_y)
    }

    pub fn displacement(&self) -> (f64, f64) {
        (self.end_x - self.start_x, self.end_y - self.start_y)
    }
}

/// Line of the persisted trace artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TraceEntry {
    /// Tick at which the call should be dispatched.
    pub tick: i64,
    /// Function-call text, `name(key=value, ...)`.
    pub call: String,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} {}", self.tick, self.call)
    }
}

/// Deterministic fingerprint of an action sequence. Equal inputs hash equally
/// across runs and processes.
pub fn hash_actions(actions: &[CanonicalAction]) -> u64 {
    let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    for action in actions {
        // bincode of plain data cannot fail; an empty buffer still hashes deterministically.
        let encoded = bincode::serialize(action).unwrap_or_default();
        hasher.write(&encoded);
    }
    hasher.finish()
}

pub fn encode_actions(actions: &[CanonicalAction]) -> bincode::Result<Vec<u8>> {
    bincode::serialize(actions)
}

pub fn decode_actions(data: &[u8]) -> bincode::Result<Vec<CanonicalAction>> {
    bincode::deserialize(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_existing_key_in_place() {
        let mut args = ActionArgs::new().with("a", 1i64).with("b", "two");
        args.insert("a", 3.5);
        let keys: Vec<_> = args.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(args.float("a"), Some(3.5));
        assert_eq!(args.int("a"), None);
    }

    #[test]
    fn ints_widen_to_floats() {
        let args = ActionArgs::new().with("x", 4i64);
        assert_eq!(args.float("x"), Some(4.0));
        assert_eq!(args.str("x"), None);
    }

    #[test]
    fn fingerprint_is_order_sensitive() {
        let a = CanonicalAction::new(1, "a", ActionArgs::new());
        let b = CanonicalAction::new(1, "b", ActionArgs::new());
        let forward = hash_actions(&[a.clone(), b.clone()]);
        assert_eq!(forward, hash_actions(&[a.clone(), b.clone()]));
        assert_ne!(forward, hash_actions(&[b, a]));
    }

    #[test]
    fn binary_cache_preserves_actions() {
        let actions = vec![CanonicalAction::new(
            12,
            actions::EXTRACT_ITEM,
            ActionArgs::new()
                .with("entity", "wooden-chest")
                .with("items", vec![ItemStack::new("coal", 5)]),
        )];
        let bytes = encode_actions(&actions).expect("encode");
        assert_eq!(decode_actions(&bytes).expect("decode"), actions);
    }

    #[test]
    fn item_count_defaults_to_one() {
        let stack: ItemStack = serde_json::from_str(r#"{"item":"coal"}"#).expect("parse");
        assert_eq!(stack.count, 1);
    }
}
