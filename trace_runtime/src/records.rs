//! Structured log records and their schema-versioned shapes.
//!
//! Records arrive as open JSON objects. Classification turns each one into a
//! closed [`RecordShape`]; anything that cannot be classified lands in
//! [`RecordShape::Unrecognized`] instead of erroring.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use trace_schema::ItemStack;

pub const METADATA_SOURCE: &str = "core-meta";
pub const HARVEST_COLLATED_SOURCE: &str = "harvest_resource_collated";
pub const TIME_ALIASES: [&str; 2] = ["t", "tick"];

/// Stream a record came from, derived from the source file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Metadata,
    HarvestCollated,
    Other(String),
}

impl SourceKind {
    /// Accepts a bare stem, a file name or a path.
    pub fn from_source_name(name: &str) -> Self {
        let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let stem = file_name.strip_suffix(".jsonl").unwrap_or(file_name);
        match stem {
            METADATA_SOURCE => SourceKind::Metadata,
            HARVEST_COLLATED_SOURCE => SourceKind::HarvestCollated,
            other => SourceKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SourceKind::Metadata => METADATA_SOURCE,
            SourceKind::HarvestCollated => HARVEST_COLLATED_SOURCE,
            SourceKind::Other(name) => name,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RecordParseError {
    #[error("invalid JSON on line {line} of {origin}: {cause}")]
    InvalidJson {
        origin: String,
        line: usize,
        #[source]
        cause: serde_json::Error,
    },
    #[error("line {line} of {origin} is not a JSON object")]
    NotAnObject { origin: String, line: usize },
}

/// One structured record plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub origin: String,
    pub kind: SourceKind,
    pub line: usize,
    pub value: Map<String, Value>,
}

impl LogRecord {
    pub fn new(origin: impl Into<String>, line: usize, value: Map<String, Value>) -> Self {
        let origin = origin.into();
        let kind = SourceKind::from_source_name(&origin);
        Self {
            origin,
            kind,
            line,
            value,
        }
    }

    /// Parses one JSONL line. Blank lines yield `Ok(None)`.
    pub fn parse_line(
        origin: &str,
        line: usize,
        text: &str,
    ) -> Result<Option<Self>, RecordParseError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let value: Value =
            serde_json::from_str(trimmed).map_err(|cause| RecordParseError::InvalidJson {
                origin: origin.to_string(),
                line,
                cause,
            })?;
        match value {
            Value::Object(map) => Ok(Some(Self::new(origin, line, map))),
            _ => Err(RecordParseError::NotAnObject {
                origin: origin.to_string(),
                line,
            }),
        }
    }

    pub fn action(&self) -> Option<&str> {
        self.value.get("action").and_then(Value::as_str)
    }

    pub fn resolve_tick(&self) -> Option<i64> {
        resolve_tick(&self.value)
    }

    /// Case-insensitive substring match over the serialized record.
    pub fn contains_marker(&self, marker: &str) -> bool {
        let marker = marker.to_lowercase();
        serde_json::to_string(&self.value)
            .map(|text| text.to_lowercase().contains(&marker))
            .unwrap_or(false)
    }
}

/// Resolves the record time from the `t` and `tick` aliases. Integers and
/// integer strings are accepted; when both aliases parse the larger wins.
pub fn resolve_tick(value: &Map<String, Value>) -> Option<i64> {
    TIME_ALIASES
        .iter()
        .filter_map(|alias| value.get(*alias).and_then(tick_value))
        .max()
}

fn tick_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Deserializers that accept the loose typing found across schema versions:
/// numbers given as strings, and `null` standing in for a missing field.
pub(crate) mod lenient {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use serde_json::Value;

    pub fn int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(0),
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|f| f.trunc() as i64))
                .ok_or_else(|| D::Error::custom(format!("integer out of range: {number}"))),
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|err| D::Error::custom(format!("invalid integer '{text}': {err}"))),
            other => Err(D::Error::custom(format!("expected integer, found {other}"))),
        }
    }

    pub fn float<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(0.0),
            Value::Number(number) => number
                .as_f64()
                .ok_or_else(|| D::Error::custom(format!("invalid number: {number}"))),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|err| D::Error::custom(format!("invalid number '{text}': {err}"))),
            other => Err(D::Error::custom(format!("expected number, found {other}"))),
        }
    }

    #[derive(Deserialize)]
    struct LooseStack {
        #[serde(alias = "name", deserialize_with = "string")]
        item: String,
        #[serde(default = "one", deserialize_with = "int")]
        count: i64,
    }

    fn one() -> i64 {
        1
    }

    /// Item stacks keyed by `item` or `name`, with loosely typed counts.
    /// Negative counts clamp to zero.
    pub fn items<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<super::ItemStack>, D::Error> {
        let stacks = Option::<Vec<LooseStack>>::deserialize(deserializer)?.unwrap_or_default();
        Ok(stacks
            .into_iter()
            .map(|stack| {
                let count = u32::try_from(stack.count.max(0)).unwrap_or(u32::MAX);
                super::ItemStack::new(stack.item, count)
            })
            .collect())
    }

    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(String::new()),
            Value::String(text) => Ok(text),
            Value::Number(number) => Ok(number.to_string()),
            Value::Bool(flag) => Ok(flag.to_string()),
            other => Err(D::Error::custom(format!("expected string, found {other}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Timing {
    #[serde(deserialize_with = "lenient::int")]
    pub start_tick: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub end_tick: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Crafting {
    #[serde(deserialize_with = "lenient::string")]
    pub recipe: String,
    #[serde(deserialize_with = "lenient::int")]
    pub total_crafted: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CraftRecord {
    pub timing: Timing,
    pub crafting: Crafting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MovePoint {
    #[serde(deserialize_with = "lenient::int")]
    pub tick: i64,
    #[serde(deserialize_with = "lenient::float")]
    pub x: f64,
    #[serde(deserialize_with = "lenient::float")]
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MovePlayer {
    pub start_movement: MovePoint,
    pub end_movement: MovePoint,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MoveRecord {
    pub player: MovePlayer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Point {
    #[serde(deserialize_with = "lenient::float")]
    pub x: f64,
    #[serde(deserialize_with = "lenient::float")]
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NamedPoint {
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(deserialize_with = "lenient::float")]
    pub x: f64,
    #[serde(deserialize_with = "lenient::float")]
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PickupRecord {
    pub selected_entity: NamedPoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DirectionValue {
    #[serde(deserialize_with = "lenient::int")]
    pub value: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NamedItem {
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlacedEntity {
    #[serde(deserialize_with = "lenient::float")]
    pub x: f64,
    #[serde(deserialize_with = "lenient::float")]
    pub y: f64,
    pub direction: DirectionValue,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlaceRecord {
    pub item: NamedItem,
    pub entity: PlacedEntity,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransferRecord {
    pub entity: NamedPoint,
    #[serde(deserialize_with = "lenient::items")]
    pub items: Vec<ItemStack>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RotationChange {
    pub previous: DirectionValue,
    pub new: DirectionValue,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RotatedEntity {
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(deserialize_with = "lenient::float")]
    pub x: f64,
    #[serde(deserialize_with = "lenient::float")]
    pub y: f64,
    pub direction: RotationChange,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RotateRecord {
    pub entity: RotatedEntity,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecipeEntity {
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(deserialize_with = "lenient::string")]
    pub new_recipe: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SetRecipeRecord {
    pub entity: RecipeEntity,
    pub player: Point,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResearchRecord {
    #[serde(deserialize_with = "lenient::string")]
    pub research: String,
}

/// Flat legacy shape of the collated harvest stream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HarvestRecord {
    #[serde(deserialize_with = "lenient::string")]
    pub entity: String,
    #[serde(deserialize_with = "lenient::float")]
    pub x: f64,
    #[serde(deserialize_with = "lenient::float")]
    pub y: f64,
    #[serde(deserialize_with = "lenient::int")]
    pub duration_ticks: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Extract,
    Insert,
}

/// Why a record could not be classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unrecognized {
    Action(String),
    Source(String),
    Malformed { action: String, reason: String },
}

impl fmt::Display for Unrecognized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unrecognized::Action(action) => write!(f, "unknown action '{action}'"),
            Unrecognized::Source(source) => write!(f, "unknown source kind '{source}'"),
            Unrecognized::Malformed { action, reason } => {
                write!(f, "malformed '{action}' record: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordShape {
    Metadata,
    Craft(CraftRecord),
    Move(MoveRecord),
    Pickup(PickupRecord),
    Place(PlaceRecord),
    Transfer(TransferKind, TransferRecord),
    Rotate(RotateRecord),
    SetRecipe(SetRecipeRecord),
    Research(ResearchRecord),
    Harvest(HarvestRecord),
    Unrecognized(Unrecognized),
}

impl RecordShape {
    /// Metadata streams are checked first, then the `action` discriminator,
    /// then the source kind.
    pub fn classify(record: &LogRecord) -> Self {
        if record.kind == SourceKind::Metadata {
            return RecordShape::Metadata;
        }

        if let Some(action) = record.action() {
            return match action {
                "craft_item" => typed(record, action, RecordShape::Craft),
                "move_to_direction" => typed(record, action, RecordShape::Move),
                "pickup_entity" => typed(record, action, RecordShape::Pickup),
                "place_entity" => typed(record, action, RecordShape::Place),
                "extract_item" => typed(record, action, |payload| {
                    RecordShape::Transfer(TransferKind::Extract, payload)
                }),
                "insert_item" => typed(record, action, |payload| {
                    RecordShape::Transfer(TransferKind::Insert, payload)
                }),
                "rotate_entity" => typed(record, action, RecordShape::Rotate),
                "set_entity_recipe" => typed(record, action, RecordShape::SetRecipe),
                "research_started" => typed(record, action, RecordShape::Research),
                other => RecordShape::Unrecognized(Unrecognized::Action(other.to_string())),
            };
        }

        match &record.kind {
            SourceKind::HarvestCollated => {
                typed(record, HARVEST_COLLATED_SOURCE, RecordShape::Harvest)
            }
            kind => RecordShape::Unrecognized(Unrecognized::Source(kind.to_string())),
        }
    }
}

fn typed<T, F>(record: &LogRecord, action: &str, wrap: F) -> RecordShape
where
    T: DeserializeOwned,
    F: FnOnce(T) -> RecordShape,
{
    match serde_json::from_value::<T>(Value::Object(record.value.clone())) {
        Ok(payload) => wrap(payload),
        Err(err) => RecordShape::Unrecognized(Unrecognized::Malformed {
            action: action.to_string(),
            reason: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(origin: &str, value: Value) -> LogRecord {
        match value {
            Value::Object(map) => LogRecord::new(origin, 1, map),
            _ => panic!("test record must be an object"),
        }
    }

    #[test]
    fn time_aliases_take_the_larger_value() {
        assert_eq!(record("a", json!({"t": 50})).resolve_tick(), Some(50));
        assert_eq!(record("a", json!({"t": 50, "tick": 70})).resolve_tick(), Some(70));
        assert_eq!(record("a", json!({"t": "90", "tick": 70})).resolve_tick(), Some(90));
        assert_eq!(record("a", json!({"t": "soon", "tick": 70})).resolve_tick(), Some(70));
        assert_eq!(record("a", json!({"x": 1})).resolve_tick(), None);
        assert_eq!(record("a", json!({"t": null})).resolve_tick(), None);
    }

    #[test]
    fn source_kind_comes_from_the_file_stem() {
        assert_eq!(
            SourceKind::from_source_name("logs/core-meta.jsonl"),
            SourceKind::Metadata
        );
        assert_eq!(
            SourceKind::from_source_name("harvest_resource_collated.jsonl"),
            SourceKind::HarvestCollated
        );
        assert_eq!(
            SourceKind::from_source_name("player_actions"),
            SourceKind::Other("player_actions".into())
        );
    }

    #[test]
    fn metadata_wins_over_action_discriminator() {
        let rec = record("core-meta.jsonl", json!({"action": "craft_item", "t": 1}));
        assert_eq!(RecordShape::classify(&rec), RecordShape::Metadata);
    }

    #[test]
    fn nested_groups_default_when_missing() {
        let rec = record("actions", json!({"action": "craft_item", "t": 5}));
        match RecordShape::classify(&rec) {
            RecordShape::Craft(craft) => {
                assert_eq!(craft.timing, Timing::default());
                assert_eq!(craft.crafting.recipe, "");
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let rec = record(
            "actions",
            json!({"action": "pickup_entity", "t": 5,
                   "selected_entity": {"name": "wooden-chest", "x": "1.5", "y": -2}}),
        );
        match RecordShape::classify(&rec) {
            RecordShape::Pickup(pickup) => {
                assert_eq!(pickup.selected_entity.x, 1.5);
                assert_eq!(pickup.selected_entity.y, -2.0);
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn wrong_types_are_malformed_not_errors() {
        let rec = record(
            "actions",
            json!({"action": "place_entity", "t": 5, "entity": {"x": {"nested": true}}}),
        );
        assert!(matches!(
            RecordShape::classify(&rec),
            RecordShape::Unrecognized(Unrecognized::Malformed { .. })
        ));
    }

    #[test]
    fn unknown_discriminators_and_sources_are_unrecognized() {
        let rec = record("actions", json!({"action": "teleport", "t": 5}));
        assert_eq!(
            RecordShape::classify(&rec),
            RecordShape::Unrecognized(Unrecognized::Action("teleport".into()))
        );
        let rec = record("weather.jsonl", json!({"t": 5}));
        assert_eq!(
            RecordShape::classify(&rec),
            RecordShape::Unrecognized(Unrecognized::Source("weather".into()))
        );
    }

    #[test]
    fn markers_match_case_insensitively() {
        let rec = record("a", json!({"entity": "Crash-Site-Wreck", "t": 1}));
        assert!(rec.contains_marker("crash-site"));
        assert!(!rec.contains_marker("spaceship"));
    }

    #[test]
    fn parse_line_rejects_non_objects() {
        assert!(LogRecord::parse_line("a", 1, "   ").unwrap().is_none());
        assert!(matches!(
            LogRecord::parse_line("a", 2, "[1, 2]"),
            Err(RecordParseError::NotAnObject { line: 2, .. })
        ));
        assert!(matches!(
            LogRecord::parse_line("a", 3, "{oops"),
            Err(RecordParseError::InvalidJson { line: 3, .. })
        ));
    }
}
